//! Shift-boundary delta counter.
//!
//! The upstream counter is cumulative and never resets on its own; this
//! logic reports production within the currently-active shift by tracking
//! two records in the store:
//!
//! - the last-known-value record (raw cumulative counter plus the shift it
//!   was observed in), overwritten on every invocation
//! - the previous-shift-baseline record, advanced only when the matched
//!   shift identity changes between observations
//!
//! The reported delta is the current cumulative value minus the baseline
//! value, defaulting to zero when no baseline is available yet.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ifx_common::{
    EgressEnvelope, InflectorError, IngressEnvelope, Result, ShiftCounterRecord,
};
use ifx_store::StateStore;

use crate::{attribute_event, extract_sample, load_shifts, shift, ActionLogic};

pub struct ShiftCounterLogic {
    shifts_key: String,
    lkv_key: String,
    baseline_key: String,
    attribute_name: String,
}

impl ShiftCounterLogic {
    pub fn new(
        shifts_key: String,
        lkv_key: String,
        baseline_key: String,
        attribute_name: String,
    ) -> Self {
        Self {
            shifts_key,
            lkv_key,
            baseline_key,
            attribute_name,
        }
    }

    async fn read_record(
        &self,
        store: &dyn StateStore,
        key: &str,
    ) -> Result<Option<ShiftCounterRecord>> {
        match store.read(key).await? {
            Some(document) => serde_json::from_value(document)
                .map(Some)
                .map_err(|e| {
                    InflectorError::ReferenceData(format!("key '{}' is malformed: {}", key, e))
                }),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ActionLogic for ShiftCounterLogic {
    async fn execute(
        &self,
        ingress: &IngressEnvelope,
        store: &dyn StateStore,
        cancel: &CancellationToken,
    ) -> Result<EgressEnvelope> {
        if cancel.is_cancelled() {
            return Err(InflectorError::Cancelled);
        }

        let sample = extract_sample(&ingress.action_request_payload, "TotalCounter")?;

        let shifts = load_shifts(store, &self.shifts_key).await?;
        let matched = shift::match_shift(sample.source_timestamp, &shifts)
            .ok_or(InflectorError::NoMatch(sample.source_timestamp))?;

        let current = ShiftCounterRecord {
            shift_number: matched.id,
            day_of_week: matched.from_day_of_week,
            start_time: matched.from_time_of_day_seconds,
            end_time: matched.to_time_of_day_seconds,
            value: sample.value,
        };

        let mut reference_value = 0.0;

        match self.read_record(store, &self.lkv_key).await? {
            None => {
                // First observation ever; seed the baseline with the current
                // record and report against a zero reference.
                store
                    .write(&self.baseline_key, &serde_json::to_value(&current)?)
                    .await?;
            }
            Some(lkv) if lkv.shift_number == current.shift_number => {
                if let Some(baseline) = self.read_record(store, &self.baseline_key).await? {
                    reference_value = baseline.value;
                }
            }
            Some(lkv) => {
                // Shift boundary crossed: the old last-known value becomes
                // the new baseline and the reference for this delta.
                reference_value = lkv.value;
                store
                    .write(&self.baseline_key, &serde_json::to_value(&lkv)?)
                    .await?;
            }
        }

        store
            .write(&self.lkv_key, &serde_json::to_value(&current)?)
            .await?;

        let delta = sample.value - reference_value;

        debug!(
            correlation_id = %ingress.correlation_id,
            shift = %matched.name,
            cumulative = sample.value,
            reference = reference_value,
            delta,
            "Computed shift counter delta"
        );

        Ok(EgressEnvelope {
            correlation_id: ingress.correlation_id.clone(),
            action_response_payload: attribute_event(
                matched,
                &self.attribute_name,
                delta,
                &sample,
            ),
            passthrough_payload: ingress.passthrough_payload.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ifx_bus::memory::MemoryStoreSession;
    use ifx_common::ActionTag;
    use ifx_store::{ResilientStore, RetryPolicy, StoreSession};
    use uuid::Uuid;

    const MORNING: &str = "11111111-1111-1111-1111-111111111111";
    const AFTERNOON: &str = "22222222-2222-2222-2222-222222222222";

    fn logic() -> ShiftCounterLogic {
        ShiftCounterLogic::new(
            "shifts".to_string(),
            "lkvShiftCounter".to_string(),
            "previousShiftCounter".to_string(),
            "ShiftCounter".to_string(),
        )
    }

    fn store(session: &Arc<MemoryStoreSession>) -> ResilientStore {
        ResilientStore::new(
            Arc::clone(session) as Arc<dyn StoreSession>,
            RetryPolicy::default(),
            RetryPolicy::default(),
            CancellationToken::new(),
        )
    }

    fn seed_shifts(session: &MemoryStoreSession) {
        // Monday 07:00-15:00 and 15:00:01-23:00.
        session.seed(
            "shifts",
            serde_json::json!([
                {
                    "id": MORNING,
                    "name": "morning",
                    "equipmentId": Uuid::new_v4(),
                    "areaId": Uuid::new_v4(),
                    "siteId": Uuid::new_v4(),
                    "fromDayOfWeek": 1,
                    "fromTimeOfDaySeconds": 25_200,
                    "toTimeOfDaySeconds": 54_000
                },
                {
                    "id": AFTERNOON,
                    "name": "afternoon",
                    "equipmentId": Uuid::new_v4(),
                    "areaId": Uuid::new_v4(),
                    "siteId": Uuid::new_v4(),
                    "fromDayOfWeek": 1,
                    "fromTimeOfDaySeconds": 54_001,
                    "toTimeOfDaySeconds": 82_800
                }
            ]),
        );
    }

    fn ingress(timestamp: &str, value: f64) -> IngressEnvelope {
        IngressEnvelope {
            correlation_id: "c-7".to_string(),
            action: ActionTag::ShiftCounter,
            action_request_payload: serde_json::json!({
                "TotalCounter": {"SourceTimestamp": timestamp, "Value": value}
            }),
            passthrough_payload: None,
        }
    }

    fn delta_of(egress: &EgressEnvelope) -> f64 {
        egress.action_response_payload["payload"]["data"]["attributeValue"]
            .as_f64()
            .unwrap()
    }

    #[tokio::test]
    async fn first_observation_seeds_baseline_and_reports_raw_value() {
        let session = Arc::new(MemoryStoreSession::new());
        seed_shifts(&session);
        let store = store(&session);
        let cancel = CancellationToken::new();

        let egress = logic()
            .execute(&ingress("2024-01-08T08:00:00Z", 100.0), &store, &cancel)
            .await
            .unwrap();

        assert_eq!(delta_of(&egress), 100.0);
        let baseline = session.document("previousShiftCounter").unwrap();
        assert_eq!(baseline["value"], 100.0);
        assert_eq!(baseline["shiftNumber"], MORNING);
        let lkv = session.document("lkvShiftCounter").unwrap();
        assert_eq!(lkv["value"], 100.0);
    }

    #[tokio::test]
    async fn same_shift_subtracts_the_unchanged_baseline() {
        let session = Arc::new(MemoryStoreSession::new());
        seed_shifts(&session);
        let store = store(&session);
        let cancel = CancellationToken::new();
        let logic = logic();

        logic
            .execute(&ingress("2024-01-08T08:00:00Z", 100.0), &store, &cancel)
            .await
            .unwrap();
        let second = logic
            .execute(&ingress("2024-01-08T09:00:00Z", 130.0), &store, &cancel)
            .await
            .unwrap();
        let third = logic
            .execute(&ingress("2024-01-08T10:00:00Z", 150.0), &store, &cancel)
            .await
            .unwrap();

        assert_eq!(delta_of(&second), 30.0);
        assert_eq!(delta_of(&third), 50.0);
        let baseline = session.document("previousShiftCounter").unwrap();
        assert_eq!(baseline["value"], 100.0);
    }

    #[tokio::test]
    async fn shift_change_promotes_old_lkv_to_baseline() {
        let session = Arc::new(MemoryStoreSession::new());
        seed_shifts(&session);
        let store = store(&session);
        let cancel = CancellationToken::new();
        let logic = logic();

        logic
            .execute(&ingress("2024-01-08T08:00:00Z", 100.0), &store, &cancel)
            .await
            .unwrap();
        logic
            .execute(&ingress("2024-01-08T14:00:00Z", 180.0), &store, &cancel)
            .await
            .unwrap();

        // 16:00 falls in the afternoon shift.
        let boundary = logic
            .execute(&ingress("2024-01-08T16:00:00Z", 200.0), &store, &cancel)
            .await
            .unwrap();

        assert_eq!(delta_of(&boundary), 20.0);
        let baseline = session.document("previousShiftCounter").unwrap();
        assert_eq!(baseline["value"], 180.0);
        assert_eq!(baseline["shiftNumber"], MORNING);
        let lkv = session.document("lkvShiftCounter").unwrap();
        assert_eq!(lkv["value"], 200.0);
        assert_eq!(lkv["shiftNumber"], AFTERNOON);
    }

    #[tokio::test]
    async fn lkv_is_overwritten_on_every_invocation() {
        let session = Arc::new(MemoryStoreSession::new());
        seed_shifts(&session);
        let store = store(&session);
        let cancel = CancellationToken::new();
        let logic = logic();

        logic
            .execute(&ingress("2024-01-08T08:00:00Z", 10.0), &store, &cancel)
            .await
            .unwrap();
        logic
            .execute(&ingress("2024-01-08T08:30:00Z", 25.0), &store, &cancel)
            .await
            .unwrap();

        let lkv = session.document("lkvShiftCounter").unwrap();
        assert_eq!(lkv["value"], 25.0);
    }

    #[tokio::test]
    async fn missing_total_counter_field_is_a_validation_error() {
        let session = Arc::new(MemoryStoreSession::new());
        seed_shifts(&session);
        let store = store(&session);
        let cancel = CancellationToken::new();

        let mut message = ingress("2024-01-08T08:00:00Z", 1.0);
        message.action_request_payload = serde_json::json!({"CycleTime": {}});

        let error = logic()
            .execute(&message, &store, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, InflectorError::Validation(_)));
    }

    #[tokio::test]
    async fn empty_shift_list_is_a_reference_data_error() {
        let session = Arc::new(MemoryStoreSession::new());
        session.seed("shifts", serde_json::json!([]));
        let store = store(&session);
        let cancel = CancellationToken::new();

        let error = logic()
            .execute(&ingress("2024-01-08T08:00:00Z", 1.0), &store, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, InflectorError::ReferenceData(_)));
    }
}
