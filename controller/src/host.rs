use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use chrono_tz::Tz;
use lighting_common::{
    classify, LightingEngine, RuntimeConfig, Update, TOPIC_LIGHTING_ALL, TOPIC_OUTDOOR_LIGHT,
};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    api,
    outbound::{self, PublishQueue},
    serializer::{Inbound, Serializer},
};

const DEFAULT_CONFIG_PATH: &str = "./lighting.json";

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::var("LIGHTING_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut runtime = load_runtime_config(&path).await?;
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();

    let clock = clock_for(runtime.timezone.as_deref());
    let engine = LightingEngine::new(runtime.lighting.clone());

    let network = &runtime.network;
    let mut mqtt_options = MqttOptions::new(
        network.mqtt_client_id.clone(),
        network.mqtt_host.clone(),
        network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(60));
    // Device subscriptions are made on demand; keep them across reconnects.
    mqtt_options.set_clean_session(false);
    if !network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }
    info!(
        "connecting to mqtt broker {}:{}",
        network.mqtt_host, network.mqtt_port
    );
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let (inbound_tx, inbound_rx) = mpsc::channel(runtime.lighting.update_queue_capacity);
    let (queue, outbound_rx) = PublishQueue::channel(runtime.lighting.publish_queue_capacity);

    spawn_mqtt_loop(mqtt.clone(), eventloop, inbound_tx.clone());
    outbound::spawn_transport_loop(mqtt, outbound_rx);
    tokio::spawn(Serializer::new(engine, inbound_rx, queue, clock).run());

    let app = api::router(inbound_tx);
    let addr = SocketAddr::from(([0, 0, 0, 0], network.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;

    info!("status api listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid config file {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!("no config at {}, using defaults", path.display());
            Ok(RuntimeConfig::default())
        }
        Err(err) => Err(err)
            .with_context(|| format!("failed to read config file {}", path.display())),
    }
}

/// `MQTTBROKER` (`tcp://host:port`) is read first so the split variables win.
fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    let network = &mut runtime.network;
    if let Some(url) = lookup("MQTTBROKER") {
        match parse_broker_url(&url) {
            Some((host, port)) => {
                network.mqtt_host = host;
                if let Some(port) = port {
                    network.mqtt_port = port;
                }
            }
            None => warn!("ignoring malformed MQTTBROKER {url:?}"),
        }
    }
    if let Some(host) = lookup("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = env_port(&lookup, "MQTT_PORT") {
        network.mqtt_port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Some(port) = env_port(&lookup, "LIGHTING_HTTP_PORT") {
        network.http_port = port;
    }
    if let Some(timezone) = lookup("LIGHTING_TIMEZONE") {
        runtime.timezone = Some(timezone);
    }
}

fn env_port(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u16> {
    lookup(key)?.parse().ok()
}

/// Splits `tcp://host:port` (scheme and port optional) into host and port.
fn parse_broker_url(url: &str) -> Option<(String, Option<u16>)> {
    let rest = match url.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some(_) => return None,
        None => url,
    };
    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, Some(port.parse::<u16>().ok()?)),
        None => (rest, None),
    };
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

/// Wall clock in the configured zone, or the host's local zone when unset or unknown.
fn clock_for(timezone: Option<&str>) -> impl Fn() -> DateTime<FixedOffset> + Send + 'static {
    let tz = timezone.and_then(|name| match name.parse::<Tz>() {
        Ok(tz) => {
            info!("using timezone {name}");
            Some(tz)
        }
        Err(_) => {
            warn!("unknown timezone {name}, using local time");
            None
        }
    });
    move || now_in(tz)
}

fn now_in(tz: Option<Tz>) -> DateTime<FixedOffset> {
    match tz {
        Some(tz) => {
            let local = Utc::now().with_timezone(&tz);
            local.with_timezone(&local.offset().fix())
        }
        None => Local::now().fixed_offset(),
    }
}

/// The poll task is the only reader of the client's request channel, so it
/// must never wait on anything that waits on that channel.
fn spawn_mqtt_loop(
    mqtt: AsyncClient,
    mut eventloop: EventLoop,
    inbound: mpsc::Sender<Inbound>,
) {
    let (forward_tx, forward_rx) = mpsc::unbounded_channel();
    spawn_update_forwarder(forward_rx, inbound);

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    let Some(update) = decode_publish(&message.topic, &message.payload) else {
                        continue;
                    };
                    if forward_tx.send(update).is_err() {
                        info!("update forwarder gone, mqtt loop stopping");
                        return;
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    spawn_base_subscriptions(mqtt.clone());
                }
                Ok(event) => debug!("mqtt event: {event:?}"),
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn decode_publish(topic: &str, payload: &[u8]) -> Option<Update> {
    let Ok(payload) = std::str::from_utf8(payload) else {
        warn!("dropping non utf8 payload on topic {topic}");
        return None;
    };
    classify(topic, payload)
}

/// Moves classified updates into the bounded update queue, absorbing its
/// backpressure off the poll task.
fn spawn_update_forwarder(
    mut updates: mpsc::UnboundedReceiver<Update>,
    inbound: mpsc::Sender<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            if inbound.send(Inbound::Update(update)).await.is_err() {
                info!("update queue closed, forwarder stopping");
                return;
            }
        }
    })
}

fn spawn_base_subscriptions(mqtt: AsyncClient) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = subscribe_topics(&mqtt).await {
            warn!("base subscription failed: {err:#}");
        }
    })
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in [TOPIC_LIGHTING_ALL, TOPIC_OUTDOOR_LIGHT] {
        mqtt.subscribe(topic, QoS::AtMostOnce)
            .await
            .with_context(|| format!("subscribe to {topic}"))?;
    }
    Ok(())
}
