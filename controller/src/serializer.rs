use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use lighting_common::{EngineStatus, LightingEngine, RegionStatus, Update};
use tokio::{
    sync::{mpsc, oneshot},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::outbound::PublishQueue;

/// Everything the serializer accepts. Status queries are answered from the
/// loop itself so readers never share the engine.
#[derive(Debug)]
pub enum Inbound {
    Update(Update),
    Status(oneshot::Sender<EngineStatus>),
    RegionStatus(String, oneshot::Sender<Option<RegionStatus>>),
}

/// Sole owner of the engine. Each iteration handles one update or one tick,
/// then runs exactly one reconciliation pass.
pub struct Serializer<C> {
    engine: LightingEngine,
    inbound: mpsc::Receiver<Inbound>,
    outbound: PublishQueue,
    clock: C,
    tick: Duration,
}

impl<C> Serializer<C>
where
    C: Fn() -> DateTime<FixedOffset>,
{
    pub fn new(
        engine: LightingEngine,
        inbound: mpsc::Receiver<Inbound>,
        outbound: PublishQueue,
        clock: C,
    ) -> Self {
        let tick = Duration::from_millis(engine.config.tick_interval_ms);
        Self {
            engine,
            inbound,
            outbound,
            clock,
            tick,
        }
    }

    /// Runs until every inbound sender is gone or the publish queue closes,
    /// then hands the engine back.
    pub async fn run(mut self) -> LightingEngine {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("updater running, tick every {:?}", self.tick);

        loop {
            tokio::select! {
                message = self.inbound.recv() => {
                    let Some(message) = message else {
                        info!("update queue closed, updater stopping");
                        break;
                    };
                    match message {
                        Inbound::Update(update) => {
                            debug!("update received: {update:?}");
                            let actions = self.engine.apply(update, (self.clock)());
                            if let Err(err) = self.outbound.dispatch(actions).await {
                                warn!("{err:#}");
                                break;
                            }
                        }
                        Inbound::Status(reply) => {
                            let _ = reply.send(self.engine.status((self.clock)()));
                            continue;
                        }
                        Inbound::RegionStatus(name, reply) => {
                            let _ = reply.send(self.engine.region_status(&name, (self.clock)()));
                            continue;
                        }
                    }
                }
                _ = ticker.tick() => debug!("updater tick"),
            }

            let actions = self.engine.reconcile((self.clock)());
            if let Err(err) = self.outbound.dispatch(actions).await {
                warn!("{err:#}");
                break;
            }
        }

        self.engine
    }
}
