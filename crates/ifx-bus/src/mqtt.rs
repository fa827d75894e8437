//! MQTT transport: ingress subscriber and egress publisher.
//!
//! Both sides share one rumqttc session. QoS 1 gives at-least-once delivery
//! in both directions; the broker may redeliver, and the business logic is
//! written to tolerate duplicates. Connection recovery is owned by the
//! event loop: a dropped connection surfaces as a poll error, the subscriber
//! backs off and polls again, and rumqttc re-establishes the session.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ifx_common::IngressEnvelope;
use ifx_store::{BusSession, SessionError};

/// Connection settings for the broker session.
#[derive(Debug, Clone)]
pub struct MqttSessionOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Delay between event-loop reconnect attempts after a poll error.
    pub reconnect_delay: Duration,
    /// Connection attempts allowed before the first successful ConnAck.
    /// A broker that never answers within this budget is a startup failure;
    /// once a session has been established, reconnects retry indefinitely.
    pub max_connect_attempts: u32,
}

impl Default for MqttSessionOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "ifx-inflector".to_string(),
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            max_connect_attempts: 10,
        }
    }
}

/// Connection-attempt budget that only applies until the first ConnAck.
struct ConnectBudget {
    max_attempts: u32,
    failures: u32,
    connected_once: bool,
}

impl ConnectBudget {
    fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            failures: 0,
            connected_once: false,
        }
    }

    fn on_connected(&mut self) {
        self.connected_once = true;
        self.failures = 0;
    }

    /// Record a poll failure; true when the initial budget is exhausted.
    fn on_failure(&mut self) -> bool {
        if self.connected_once {
            return false;
        }
        self.failures += 1;
        self.failures >= self.max_attempts
    }
}

/// Create the shared MQTT session.
///
/// Returns the client (hand it to [`MqttBusSession`] and the subscriber) and
/// the event loop (hand it to [`run_ingress`]).
pub fn connect(options: &MqttSessionOptions) -> (AsyncClient, EventLoop) {
    let mut mqtt_options =
        MqttOptions::new(&options.client_id, &options.host, options.port);
    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_clean_session(true);

    AsyncClient::new(mqtt_options, 100)
}

/// Egress side of the MQTT session.
pub struct MqttBusSession {
    client: AsyncClient,
}

impl MqttBusSession {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BusSession for MqttBusSession {
    async fn publish(&self, destination: &str, payload: &[u8]) -> Result<(), SessionError> {
        self.client
            .publish(destination, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| SessionError::Communication(format!("MQTT publish failed: {}", e)))
    }

    async fn reconnect(&self) -> Result<(), SessionError> {
        // Reconnection is driven by the event loop; the next poll after a
        // connection error re-establishes the session.
        Ok(())
    }
}

/// Run the ingress subscriber until cancellation.
///
/// Decoded envelopes are pushed onto the bounded ingress queue with
/// `send().await`, so a full queue backpressures the broker session instead
/// of dropping messages. Payloads that do not decode as an envelope are
/// logged and skipped. The subscription is re-issued after every ConnAck so
/// it survives reconnects.
///
/// A broker that never answers the initial connect within
/// `max_connect_attempts` polls makes this return an error so the process
/// can exit non-zero; after the first successful session, poll errors retry
/// indefinitely at `reconnect_delay`.
pub async fn run_ingress(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topic: String,
    reconnect_delay: Duration,
    max_connect_attempts: u32,
    queue: mpsc::Sender<IngressEnvelope>,
    cancel: CancellationToken,
) -> Result<(), SessionError> {
    info!(topic = %topic, "Starting MQTT ingress subscriber");

    let mut budget = ConnectBudget::new(max_connect_attempts);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Ingress subscriber cancelled");
                let _ = client.disconnect().await;
                break;
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        budget.on_connected();
                        info!(topic = %topic, "Connected to broker, subscribing");
                        if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                            error!(error = %e, "Failed to subscribe to ingress topic");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match serde_json::from_slice::<IngressEnvelope>(&publish.payload) {
                            Ok(envelope) => {
                                debug!(
                                    correlation_id = %envelope.correlation_id,
                                    action = %envelope.action,
                                    "Received ingress envelope"
                                );
                                // Acknowledged once queued; a crash between
                                // enqueue and processing relies on broker
                                // redelivery of un-acked messages.
                                if queue.send(envelope).await.is_err() {
                                    warn!("Ingress queue closed, stopping subscriber");
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(
                                    topic = %publish.topic,
                                    error = %e,
                                    "Discarding payload that is not an ingress envelope"
                                );
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if budget.on_failure() {
                            error!(
                                error = %e,
                                attempts = max_connect_attempts,
                                "Broker unreachable, giving up on initial connection"
                            );
                            return Err(SessionError::Communication(format!(
                                "broker unreachable after {} connection attempts: {}",
                                max_connect_attempts, e
                            )));
                        }
                        warn!(error = %e, "MQTT event loop error, reconnecting");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(reconnect_delay) => {}
                        }
                    }
                }
            }
        }
    }

    info!("MQTT ingress subscriber stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exhausts_after_max_initial_failures() {
        let mut budget = ConnectBudget::new(3);
        assert!(!budget.on_failure());
        assert!(!budget.on_failure());
        assert!(budget.on_failure());
    }

    #[test]
    fn budget_no_longer_applies_after_first_connection() {
        let mut budget = ConnectBudget::new(2);
        assert!(!budget.on_failure());
        budget.on_connected();
        for _ in 0..10 {
            assert!(!budget.on_failure());
        }
    }
}

