use anyhow::Context;
use lighting_common::{device_subscription, EngineAction};
use rumqttc::{AsyncClient, QoS};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// Bounded conduit between reconciliation and the MQTT client. A full queue
/// blocks the producer.
#[derive(Debug, Clone)]
pub struct PublishQueue {
    tx: mpsc::Sender<EngineAction>,
}

impl PublishQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineAction>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn dispatch(&self, actions: Vec<EngineAction>) -> anyhow::Result<()> {
        for action in actions {
            self.tx.send(action).await.context("publish queue closed")?;
        }
        Ok(())
    }
}

pub fn spawn_transport_loop(
    mqtt: AsyncClient,
    mut rx: mpsc::Receiver<EngineAction>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(action) = rx.recv().await {
            match action {
                EngineAction::Publish(publish) => {
                    if publish.is_erase() {
                        debug!("erasing {}", publish.topic);
                    } else {
                        debug!("publishing {}: {}", publish.topic, publish.payload);
                    }
                    let result = mqtt
                        .publish(
                            &publish.topic,
                            QoS::AtMostOnce,
                            publish.retained,
                            publish.payload,
                        )
                        .await;
                    if let Err(err) = result {
                        warn!("publish to {} failed: {err}", publish.topic);
                    }
                }
                EngineAction::SubscribeDevice(device) => {
                    let topic = device_subscription(&device);
                    match mqtt.subscribe(&topic, QoS::AtMostOnce).await {
                        Ok(()) => info!("subscribed to {topic}"),
                        Err(err) => warn!("failed to subscribe to {topic}: {err}"),
                    }
                }
            }
        }
        info!("publish queue closed, transport loop stopping");
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lighting_common::Publish;
    use tokio::time::timeout;

    use super::*;

    fn publish(topic: &str) -> EngineAction {
        EngineAction::Publish(Publish::retained(topic.to_string(), "on"))
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_applies_backpressure() {
        let (queue, mut rx) = PublishQueue::channel(1);

        let pending = vec![publish("lighting/a/state"), publish("lighting/b/state")];
        let wait = Duration::from_millis(50);
        let blocked = timeout(wait, queue.dispatch(pending)).await;
        assert!(blocked.is_err());

        assert_eq!(rx.recv().await, Some(publish("lighting/a/state")));
        queue
            .dispatch(vec![publish("lighting/c/state")])
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(publish("lighting/c/state")));
    }

    #[tokio::test]
    async fn preserves_order() {
        let (queue, mut rx) = PublishQueue::channel(8);
        let actions = vec![
            EngineAction::SubscribeDevice("a".to_string()),
            publish("devices/a/outlet/on/set"),
        ];
        queue.dispatch(actions.clone()).await.unwrap();

        assert_eq!(rx.recv().await, Some(actions[0].clone()));
        assert_eq!(rx.recv().await, Some(actions[1].clone()));
    }

    #[tokio::test]
    async fn closed_queue_is_an_error() {
        let (queue, rx) = PublishQueue::channel(1);
        drop(rx);
        let closed = queue.dispatch(vec![publish("lighting/a/state")]).await;
        assert!(closed.is_err());
        assert!(queue.dispatch(Vec::new()).await.is_ok());
    }
}
