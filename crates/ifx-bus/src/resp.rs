//! State-store session over the store's RESP surface.
//!
//! The distributed state store speaks the RESP protocol, so the session is a
//! thin wrapper over the `redis` crate's connection manager. The manager
//! multiplexes one TCP connection and re-establishes it on its own after a
//! drop; `reconnect` therefore only has to verify the link with a PING.

use async_trait::async_trait;
use tracing::debug;

use ifx_store::{SessionError, StoreSession};

/// RESP-speaking store session backed by a multiplexed connection.
pub struct RespStoreSession {
    conn: redis::aio::ConnectionManager,
}

impl RespStoreSession {
    /// Connect to the store at `url` (e.g. `redis://dss.default:6379`).
    pub async fn connect(url: &str) -> Result<Self, SessionError> {
        let client = redis::Client::open(url)
            .map_err(|e| SessionError::Protocol(format!("Invalid store URL: {}", e)))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| SessionError::Communication(format!("Store connect failed: {}", e)))?;

        debug!(url, "Connected to state store");
        Ok(Self { conn })
    }

    fn map_error(error: redis::RedisError) -> SessionError {
        if error.is_io_error() || error.is_connection_dropped() || error.is_timeout() {
            SessionError::Communication(error.to_string())
        } else {
            SessionError::Protocol(error.to_string())
        }
    }
}

#[async_trait]
impl StoreSession for RespStoreSession {
    async fn read(&self, key: &str) -> Result<Option<String>, SessionError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_error)?;
        Ok(value)
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::map_error)?;
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(Self::map_error)?;
        Ok(())
    }
}
