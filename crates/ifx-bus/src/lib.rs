//! Transport adapters for the inflector.
//!
//! The core only ever talks to the boundary traits in `ifx-store`
//! (`StoreSession`, `BusSession`) plus an ingress feed into the bounded
//! queue. Concrete backends live here behind cargo features:
//!
//! - `mqtt` — rumqttc-based ingress subscriber and egress publisher (QoS 1,
//!   at-least-once, JSON envelope payloads).
//! - `resp-store` — state-store session over the store's RESP surface via
//!   the `redis` crate's connection manager.
//!
//! The in-memory sessions are always available and back the test suites and
//! local development.

pub mod memory;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "resp-store")]
pub mod resp;
