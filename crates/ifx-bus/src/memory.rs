//! In-memory store and bus sessions for tests and local development.
//!
//! Both support scripted communication failures so the resilience layer's
//! retry/reconnect behavior can be exercised without a broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use ifx_store::{BusSession, SessionError, StoreSession};

/// In-memory key/value session.
#[derive(Default)]
pub struct MemoryStoreSession {
    data: Mutex<HashMap<String, String>>,
    fail_next: AtomicU32,
    reconnects: AtomicU32,
    operations: AtomicU32,
}

impl MemoryStoreSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key with a JSON document.
    pub fn seed(&self, key: &str, value: Value) {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    /// Make the next `count` operations fail with a communication error.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Total reads and writes attempted against this session.
    pub fn operation_count(&self) -> u32 {
        self.operations.load(Ordering::SeqCst)
    }

    /// Current document stored under `key`, parsed back from JSON.
    pub fn document(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .unwrap()
            .get(key)
            .map(|raw| serde_json::from_str(raw).expect("stored document is JSON"))
    }

    fn check_failure(&self) -> Result<(), SessionError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(SessionError::Communication("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreSession for MemoryStoreSession {
    async fn read(&self, key: &str) -> Result<Option<String>, SessionError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), SessionError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory bus session recording everything published.
#[derive(Default)]
pub struct MemoryBusSession {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    fail_next: AtomicU32,
    reconnects: AtomicU32,
}

impl MemoryBusSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Everything published so far, parsed back from JSON.
    pub fn published(&self) -> Vec<(String, Value)> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(destination, bytes)| {
                (
                    destination.clone(),
                    serde_json::from_slice(bytes).expect("published payload is JSON"),
                )
            })
            .collect()
    }
}

#[async_trait]
impl BusSession for MemoryBusSession {
    async fn publish(&self, destination: &str, payload: &[u8]) -> Result<(), SessionError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(SessionError::Communication("injected failure".into()));
        }
        self.published
            .lock()
            .unwrap()
            .push((destination.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), SessionError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
