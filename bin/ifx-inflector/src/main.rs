//! Inflector service binary.
//!
//! Wires the MQTT ingress/egress session, the RESP state-store session, the
//! action-logic registry and the dispatch loop together, then runs until
//! SIGINT. Startup failures (bad configuration, unreachable state store)
//! exit non-zero; cancellation exits cleanly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ifx_bus::mqtt::{self, MqttBusSession, MqttSessionOptions};
use ifx_bus::resp::RespStoreSession;
use ifx_common::ActionTag;
use ifx_config::{AppConfig, RetryPolicyConfig};
use ifx_logic::{CycleTimeAverageLogic, LogicRegistry, ShiftCounterLogic};
use ifx_store::{
    BusSession, Publisher, ResilientPublisher, ResilientStore, RetryPolicy, StateStore,
    StoreSession,
};
use ifx_worker::{ingress_queue, Dispatcher};

fn retry_policy(config: &RetryPolicyConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: config.max_retries,
        initial_delay: Duration::from_millis(config.initial_delay_ms),
        max_delay: Duration::from_millis(config.max_delay_ms),
        jitter: config.jitter,
        timeout: Duration::from_millis(config.timeout_ms),
    }
}

fn build_registry(config: &AppConfig) -> LogicRegistry {
    let mut registry = LogicRegistry::new();
    registry.register(
        ActionTag::CycleTimeAverage,
        Arc::new(CycleTimeAverageLogic::new(
            config.keys.shifts_reference.clone(),
            config.keys.last_ten_shifts.clone(),
            config.logic.cycle_time_attribute.clone(),
        )),
    );
    registry.register(
        ActionTag::ShiftCounter,
        Arc::new(ShiftCounterLogic::new(
            config.keys.shifts_reference.clone(),
            config.keys.lkv_shift_counter.clone(),
            config.keys.previous_shift_counter.clone(),
            config.logic.shift_counter_attribute.clone(),
        )),
    );
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    ifx_common::logging::init_logging();

    info!("Starting inflector service");

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        store = %config.store.url,
        ingress = %config.mqtt.ingress_topic,
        egress = %config.mqtt.egress_topic,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();

    // State store session; an unreachable store at startup is fatal.
    let store_session = Arc::new(
        RespStoreSession::connect(&config.store.url)
            .await
            .context("Failed to connect to the state store")?,
    );

    // Shared MQTT session: the client publishes, the event loop feeds ingress.
    let mqtt_options = MqttSessionOptions {
        host: config.mqtt.host.clone(),
        port: config.mqtt.port,
        client_id: config.mqtt.client_id.clone(),
        keep_alive: Duration::from_secs(config.mqtt.keep_alive_secs),
        ..MqttSessionOptions::default()
    };
    let (client, eventloop) = mqtt::connect(&mqtt_options);

    let (ingress_tx, ingress_rx) = ingress_queue(config.worker.queue_capacity);

    let mut ingress_task = tokio::spawn(mqtt::run_ingress(
        client.clone(),
        eventloop,
        config.mqtt.ingress_topic.clone(),
        mqtt_options.reconnect_delay,
        mqtt_options.max_connect_attempts,
        ingress_tx,
        cancel.clone(),
    ));

    let store: Arc<dyn StateStore> = Arc::new(ResilientStore::new(
        store_session as Arc<dyn StoreSession>,
        retry_policy(&config.retry.store_read),
        retry_policy(&config.retry.store_write),
        cancel.clone(),
    ));
    let publisher: Arc<dyn Publisher> = Arc::new(ResilientPublisher::new(
        Arc::new(MqttBusSession::new(client)) as Arc<dyn BusSession>,
        retry_policy(&config.retry.publish),
        cancel.clone(),
    ));

    let dispatcher = Dispatcher::new(
        build_registry(&config),
        store,
        publisher,
        config.mqtt.egress_topic.clone(),
        cancel.clone(),
    );

    let mut dispatcher_task = tokio::spawn(async move { dispatcher.run(ingress_rx).await });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            cancel.cancel();
            if let Err(e) = dispatcher_task.await {
                error!(error = %e, "Dispatcher task panicked during shutdown");
            }
            let _ = ingress_task.await;
        }
        result = &mut ingress_task => {
            cancel.cancel();
            if let Err(e) = dispatcher_task.await {
                error!(error = %e, "Dispatcher task panicked during shutdown");
            }
            match result {
                // Queue closed or cancellation; normal shutdown path.
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "MQTT ingress terminated");
                    return Err(anyhow::anyhow!(e).context("MQTT ingress terminated"));
                }
                Err(e) => {
                    error!(error = %e, "Ingress task panicked");
                    return Err(e.into());
                }
            }
        }
        result = &mut dispatcher_task => {
            if let Err(e) = result {
                error!(error = %e, "Dispatcher task ended unexpectedly");
            }
            cancel.cancel();
            let _ = ingress_task.await;
        }
    }

    info!("Inflector service stopped");
    Ok(())
}
