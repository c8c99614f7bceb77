//! MQTT publisher module
//!
//! Mirrors every variable update to a broker under `{prefix}/{variable}`,
//! with a retained `online`/`offline` marker on `{prefix}/status`.

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::registry::VariableUpdate;

/// MQTT Publisher for variable updates
pub struct MqttPublisher {
    client: AsyncClient,
    topic_prefix: String,
    qos: QoS,
    retain: bool,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    /// Create a new MQTT publisher; the connection is made by a background event loop
    pub fn new(config: &MqttConfig) -> Self {
        let mut mqttoptions = MqttOptions::new(&config.client_id, &config.host, config.port);

        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            mqttoptions.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);
        let connected = Arc::new(AtomicBool::new(false));

        Self::spawn_event_loop(
            eventloop,
            connected.clone(),
            config.host.clone(),
            config.port,
        );

        info!(
            "MQTT publisher initialized: {}:{} (prefix: {}, qos: {})",
            config.host, config.port, config.topic_prefix, config.qos
        );

        Self {
            client,
            topic_prefix: config.topic_prefix.clone(),
            qos: qos_from_level(config.qos),
            retain: config.retain,
            connected,
        }
    }

    fn spawn_event_loop(
        mut eventloop: EventLoop,
        connected: Arc<AtomicBool>,
        host: String,
        port: u16,
    ) {
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == rumqttc::ConnectReturnCode::Success {
                            connected.store(true, Ordering::SeqCst);
                            info!("Connected to MQTT broker at {}:{}", host, port);
                        } else {
                            error!("MQTT connection rejected: {:?}", ack.code);
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        connected.store(false, Ordering::SeqCst);
                        warn!("Disconnected from MQTT broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if connected.swap(false, Ordering::SeqCst) {
                            error!("MQTT connection lost: {:?}", e);
                        } else {
                            debug!("MQTT connect attempt failed: {:?}", e);
                        }
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
    }

    /// Whether the broker has acknowledged the connection
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Publish one variable update
    pub async fn publish_update(&self, update: &VariableUpdate) -> Result<()> {
        let topic = variable_topic(&self.topic_prefix, &update.name);
        let payload = update_payload(update)?;

        self.client
            .publish(&topic, self.qos, self.retain, payload.as_bytes())
            .await
            .with_context(|| format!("Failed to publish to {}", topic))?;

        debug!("MQTT published to {}: {}", topic, payload);

        Ok(())
    }

    /// Publish bridge status (online/offline), always retained
    pub async fn publish_status(&self, online: bool) -> Result<()> {
        let topic = status_topic(&self.topic_prefix);
        let payload = if online { "online" } else { "offline" };

        self.client
            .publish(&topic, self.qos, true, payload.as_bytes())
            .await
            .with_context(|| format!("Failed to publish status to {}", topic))?;

        info!("MQTT status: {} = {}", topic, payload);

        Ok(())
    }

    /// Forward updates from the broadcast channel until it closes
    pub async fn start_publishing(
        self: Arc<Self>,
        mut update_rx: broadcast::Receiver<VariableUpdate>,
    ) {
        info!("MQTT publishing loop started");

        loop {
            match update_rx.recv().await {
                Ok(update) => {
                    if let Err(e) = self.publish_update(&update).await {
                        error!("MQTT publish error: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("MQTT publisher lagged, missed {} updates", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("MQTT broadcast channel closed, stopping publisher");
                    break;
                }
            }
        }
    }
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => {
            warn!("Invalid QoS level {}, using 1", level);
            QoS::AtLeastOnce
        }
    }
}

/// Variable names may carry spaces; MQTT wildcards are not allowed in topics
fn variable_topic(prefix: &str, name: &str) -> String {
    let segment: String = name
        .chars()
        .map(|c| match c {
            '+' | '#' | '/' => '_',
            c => c,
        })
        .collect();
    format!("{}/{}", prefix, segment)
}

fn status_topic(prefix: &str) -> String {
    format!("{}/status", prefix)
}

fn update_payload(update: &VariableUpdate) -> Result<String> {
    let payload = serde_json::json!({
        "value": update.value,
        "dataType": update.data_type,
        "simulated": update.simulated,
        "timestamp": update.timestamp,
    });

    serde_json::to_string(&payload).with_context(|| "Failed to serialize payload")
}
