//! Rolling average of the last ten cycle-time samples.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ifx_common::{
    CounterSample, EgressEnvelope, InflectorError, IngressEnvelope, Result,
};
use ifx_store::StateStore;

use crate::{attribute_event, extract_sample, load_shifts, shift, ActionLogic};

const WINDOW_CAPACITY: usize = 10;

/// Maintains a bounded FIFO window of cycle-time samples in the store and
/// reports the arithmetic mean of whatever the window currently holds.
pub struct CycleTimeAverageLogic {
    shifts_key: String,
    window_key: String,
    attribute_name: String,
}

impl CycleTimeAverageLogic {
    pub fn new(shifts_key: String, window_key: String, attribute_name: String) -> Self {
        Self {
            shifts_key,
            window_key,
            attribute_name,
        }
    }
}

#[async_trait]
impl ActionLogic for CycleTimeAverageLogic {
    async fn execute(
        &self,
        ingress: &IngressEnvelope,
        store: &dyn StateStore,
        cancel: &CancellationToken,
    ) -> Result<EgressEnvelope> {
        if cancel.is_cancelled() {
            return Err(InflectorError::Cancelled);
        }

        let sample = extract_sample(&ingress.action_request_payload, "CycleTime")?;

        // An absent or non-array window is warm-up state, not an error.
        let mut window: Vec<CounterSample> = match store.read(&self.window_key).await? {
            Some(document) if document.is_array() => serde_json::from_value(document)
                .map_err(|e| {
                    InflectorError::ReferenceData(format!(
                        "key '{}' is malformed: {}",
                        self.window_key, e
                    ))
                })?,
            _ => {
                debug!(key = %self.window_key, "No prior window in store, starting empty");
                Vec::new()
            }
        };

        if window.len() >= WINDOW_CAPACITY {
            window.remove(0);
        }
        // QoS 1 can redeliver a sample; a duplicate skews the window until it
        // ages out but the design accepts that.
        window.push(sample.clone());

        let average = window.iter().map(|s| s.value).sum::<f64>() / window.len() as f64;

        store
            .write(&self.window_key, &serde_json::to_value(&window)?)
            .await?;

        let shifts = load_shifts(store, &self.shifts_key).await?;
        let matched = shift::match_shift(sample.source_timestamp, &shifts)
            .ok_or(InflectorError::NoMatch(sample.source_timestamp))?;

        debug!(
            correlation_id = %ingress.correlation_id,
            samples = window.len(),
            average,
            shift = %matched.name,
            "Computed cycle-time average"
        );

        Ok(EgressEnvelope {
            correlation_id: ingress.correlation_id.clone(),
            action_response_payload: attribute_event(
                matched,
                &self.attribute_name,
                average,
                &sample,
            ),
            passthrough_payload: ingress.passthrough_payload.clone(),
        })
    }
}
