//! Single-consumer dispatch loop.
//!
//! One bounded queue, one consumer. The transport adapter is the producer;
//! a full queue backpressures it rather than dropping messages. Messages are
//! processed strictly in dequeue order because the read-modify-write
//! sequences in the action logics are not safe under concurrent execution
//! against the same store keys.
//!
//! Every dequeued message produces exactly one egress publish attempt:
//! a computed response on success, the original envelope verbatim when no
//! logic is registered for the action tag, or a synthetic error envelope
//! when the action fails. A failure to publish the error envelope is logged
//! and swallowed; the loop never stops because it could not report a
//! failure. Only cancellation ends the loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ifx_common::{EgressEnvelope, IngressEnvelope};
use ifx_logic::LogicRegistry;
use ifx_store::{Publisher, StateStore};

/// Create the bounded ingress queue shared by the transport adapter and the
/// dispatcher.
pub fn ingress_queue(
    capacity: usize,
) -> (mpsc::Sender<IngressEnvelope>, mpsc::Receiver<IngressEnvelope>) {
    mpsc::channel(capacity)
}

pub struct Dispatcher {
    registry: LogicRegistry,
    store: Arc<dyn StateStore>,
    publisher: Arc<dyn Publisher>,
    egress_topic: String,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        registry: LogicRegistry,
        store: Arc<dyn StateStore>,
        publisher: Arc<dyn Publisher>,
        egress_topic: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            store,
            publisher,
            egress_topic,
            cancel,
        }
    }

    /// Run the loop until cancellation or until the queue's senders drop.
    pub async fn run(&self, mut queue: mpsc::Receiver<IngressEnvelope>) {
        info!(
            egress_topic = %self.egress_topic,
            registered_actions = self.registry.len(),
            "Dispatcher started"
        );

        loop {
            let envelope = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Dispatcher cancelled, shutting down");
                    break;
                }
                item = queue.recv() => match item {
                    Some(envelope) => envelope,
                    None => {
                        info!("Ingress queue closed, shutting down");
                        break;
                    }
                },
            };

            self.process(envelope).await;

            if self.cancel.is_cancelled() {
                info!("Dispatcher cancelled, shutting down");
                break;
            }
        }
    }

    async fn process(&self, envelope: IngressEnvelope) {
        debug!(
            correlation_id = %envelope.correlation_id,
            action = %envelope.action,
            "Processing message"
        );

        let Some(logic) = self.registry.get(&envelope.action) else {
            // Routing outcome, not a failure: republish untouched.
            debug!(
                correlation_id = %envelope.correlation_id,
                action = %envelope.action,
                "No logic registered for action, republishing verbatim"
            );
            self.publish_value(&envelope, serde_json::to_value(&envelope).ok())
                .await;
            return;
        };

        match logic
            .execute(&envelope, self.store.as_ref(), &self.cancel)
            .await
        {
            Ok(egress) => {
                self.publish_value(&envelope, serde_json::to_value(&egress).ok())
                    .await;
            }
            Err(e) if e.is_cancellation() => {
                debug!(
                    correlation_id = %envelope.correlation_id,
                    "Action cancelled mid-flight"
                );
            }
            Err(e) => {
                warn!(
                    correlation_id = %envelope.correlation_id,
                    action = %envelope.action,
                    error = %e,
                    "Action failed, publishing error envelope"
                );
                let error_envelope = EgressEnvelope::error(&envelope, &e.to_string());
                self.publish_value(&envelope, serde_json::to_value(&error_envelope).ok())
                    .await;
            }
        }
    }

    /// Best-effort publish of an already-serialized envelope.
    async fn publish_value(
        &self,
        envelope: &IngressEnvelope,
        payload: Option<serde_json::Value>,
    ) {
        let Some(payload) = payload else {
            error!(
                correlation_id = %envelope.correlation_id,
                "Failed to serialize egress payload, dropping"
            );
            return;
        };

        if let Err(e) = self.publisher.publish(&self.egress_topic, &payload).await {
            if e.is_cancellation() {
                debug!(
                    correlation_id = %envelope.correlation_id,
                    "Publish cancelled mid-flight"
                );
            } else {
                error!(
                    correlation_id = %envelope.correlation_id,
                    error = %e,
                    "Failed to publish egress envelope, continuing"
                );
            }
        }
    }
}
