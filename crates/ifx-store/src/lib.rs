//! Resilient access to the distributed state store (DSS) and the egress bus.
//!
//! Transport sessions are narrow traits (`StoreSession`, `BusSession`)
//! implemented by the adapters in `ifx-bus`; this crate wraps them with the
//! shared retry/backoff/reconnect policy and exposes the `StateStore` and
//! `Publisher` traits the business logic and the dispatcher consume.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use ifx_common::{InflectorError, Result};

mod retry;

pub use retry::{RetryError, RetryPolicy};

/// Error raised by a transport session implementation.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Connection-level failure; the operation may succeed after a
    /// reconnect and is retried by the resilience policy.
    #[error("Communication failure: {0}")]
    Communication(String),

    /// The peer answered but the exchange was malformed; retrying with the
    /// same request would not help.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    pub fn is_communication(&self) -> bool {
        matches!(self, SessionError::Communication(_))
    }
}

/// Raw key/value session against the state store.
///
/// `read` returns `None` for a missing key — "no prior data" is an expected
/// steady state during warm-up, not a failure.
#[async_trait]
pub trait StoreSession: Send + Sync {
    async fn read(&self, key: &str) -> std::result::Result<Option<String>, SessionError>;
    async fn write(&self, key: &str, value: &str) -> std::result::Result<(), SessionError>;
    async fn reconnect(&self) -> std::result::Result<(), SessionError>;
}

/// Raw outbound session against the message bus.
#[async_trait]
pub trait BusSession: Send + Sync {
    async fn publish(
        &self,
        destination: &str,
        payload: &[u8],
    ) -> std::result::Result<(), SessionError>;
    async fn reconnect(&self) -> std::result::Result<(), SessionError>;
}

/// Read/write surface the action logics run against.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>>;
    async fn write(&self, key: &str, value: &Value) -> Result<()>;
}

/// Egress surface the dispatcher publishes through.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, destination: &str, payload: &Value) -> Result<()>;
}

/// Normalize a raw store payload into a single structured document.
///
/// Single JSON documents pass through unchanged. Multi-line record-oriented
/// text becomes one array with an element per non-blank line; lines that are
/// not themselves JSON are kept as strings.
pub fn normalize_document(raw: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }

    let records: Vec<Value> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str::<Value>(line)
                .unwrap_or_else(|_| Value::String(line.to_string()))
        })
        .collect();

    Value::Array(records)
}

/// State-store client with the full resilience policy applied to every call.
///
/// Reads and writes carry independent policies. Sequences of reads/writes
/// issued by one action invocation are not atomic at the store; single-writer
/// discipline per key namespace is a deployment constraint, not enforced
/// here.
pub struct ResilientStore {
    session: Arc<dyn StoreSession>,
    read_policy: RetryPolicy,
    write_policy: RetryPolicy,
    cancel: CancellationToken,
}

impl ResilientStore {
    pub fn new(
        session: Arc<dyn StoreSession>,
        read_policy: RetryPolicy,
        write_policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            read_policy,
            write_policy,
            cancel,
        }
    }

    fn map_error(error: RetryError) -> InflectorError {
        match error {
            RetryError::Cancelled => InflectorError::Cancelled,
            RetryError::Exhausted { attempts, last } => InflectorError::StoreUnavailable {
                attempts,
                reason: last.to_string(),
            },
            RetryError::Fatal { attempts, error } => InflectorError::StoreUnavailable {
                attempts,
                reason: error.to_string(),
            },
        }
    }
}

#[async_trait]
impl StateStore for ResilientStore {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        let session = Arc::clone(&self.session);
        let reconnect_session = Arc::clone(&self.session);
        let key_owned = key.to_string();

        let raw = self
            .read_policy
            .execute(
                "store-read",
                &self.cancel,
                move || {
                    let session = Arc::clone(&session);
                    let key = key_owned.clone();
                    Box::pin(async move { session.read(&key).await })
                },
                move || {
                    let session = Arc::clone(&reconnect_session);
                    Box::pin(async move { session.reconnect().await })
                },
            )
            .await
            .map_err(Self::map_error)?;

        trace!(key, found = raw.is_some(), "Read from state store");

        Ok(raw
            .filter(|payload| !payload.trim().is_empty())
            .map(|payload| normalize_document(&payload)))
    }

    async fn write(&self, key: &str, value: &Value) -> Result<()> {
        let session = Arc::clone(&self.session);
        let reconnect_session = Arc::clone(&self.session);
        let key_owned = key.to_string();
        let serialized = serde_json::to_string(value)?;

        self.write_policy
            .execute(
                "store-write",
                &self.cancel,
                move || {
                    let session = Arc::clone(&session);
                    let key = key_owned.clone();
                    let payload = serialized.clone();
                    Box::pin(async move { session.write(&key, &payload).await })
                },
                move || {
                    let session = Arc::clone(&reconnect_session);
                    Box::pin(async move { session.reconnect().await })
                },
            )
            .await
            .map_err(Self::map_error)?;

        trace!(key, "Wrote to state store");
        Ok(())
    }
}

/// Bus publisher with the resilience policy applied.
///
/// Delivery is at-least-once: a retry after a lost acknowledgement can
/// duplicate a message on the bus, and downstream consumers must tolerate
/// that. No dedup token is attached.
pub struct ResilientPublisher {
    session: Arc<dyn BusSession>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl ResilientPublisher {
    pub fn new(
        session: Arc<dyn BusSession>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            policy,
            cancel,
        }
    }
}

#[async_trait]
impl Publisher for ResilientPublisher {
    async fn publish(&self, destination: &str, payload: &Value) -> Result<()> {
        let session = Arc::clone(&self.session);
        let reconnect_session = Arc::clone(&self.session);
        let destination_owned = destination.to_string();
        let bytes = serde_json::to_vec(payload)?;

        self.policy
            .execute(
                "publish",
                &self.cancel,
                move || {
                    let session = Arc::clone(&session);
                    let destination = destination_owned.clone();
                    let bytes = bytes.clone();
                    Box::pin(async move { session.publish(&destination, &bytes).await })
                },
                move || {
                    let session = Arc::clone(&reconnect_session);
                    Box::pin(async move { session.reconnect().await })
                },
            )
            .await
            .map_err(|error| match error {
                RetryError::Cancelled => InflectorError::Cancelled,
                RetryError::Exhausted { attempts, last } => InflectorError::PublishUnavailable {
                    attempts,
                    reason: last.to_string(),
                },
                RetryError::Fatal { attempts, error } => InflectorError::PublishUnavailable {
                    attempts,
                    reason: error.to_string(),
                },
            })?;

        trace!(destination, "Published to bus");
        Ok(())
    }
}
