//! Business actions the inflector can execute.
//!
//! Every action implements [`ActionLogic`]: take one ingress envelope, run a
//! read-modify-write cycle against the state store, and return the egress
//! envelope. Actions never publish; the dispatcher owns egress. Errors
//! propagate to the dispatcher, which converts them into an error envelope.
//!
//! Reference data is re-read from the store on every invocation so operator
//! updates take effect without a restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use ifx_common::{
    ActionTag, CounterSample, EgressEnvelope, InflectorError, IngressEnvelope, Result,
    ShiftReference,
};
use ifx_store::StateStore;

pub mod cycle_time;
pub mod shift;
pub mod shift_counter;

pub use cycle_time::CycleTimeAverageLogic;
pub use shift_counter::ShiftCounterLogic;

/// One pluggable business action.
#[async_trait]
pub trait ActionLogic: Send + Sync {
    async fn execute(
        &self,
        ingress: &IngressEnvelope,
        store: &dyn StateStore,
        cancel: &CancellationToken,
    ) -> Result<EgressEnvelope>;
}

/// Action-tag to logic dispatch table.
///
/// A tag with no entry is a routing outcome handled by the dispatcher, not
/// an error.
#[derive(Default)]
pub struct LogicRegistry {
    logics: HashMap<ActionTag, Arc<dyn ActionLogic>>,
}

impl LogicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: ActionTag, logic: Arc<dyn ActionLogic>) {
        self.logics.insert(tag, logic);
    }

    pub fn get(&self, tag: &ActionTag) -> Option<&Arc<dyn ActionLogic>> {
        self.logics.get(tag)
    }

    pub fn len(&self) -> usize {
        self.logics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logics.is_empty()
    }
}

/// Pull the named observation document out of a request payload.
fn extract_sample(payload: &Value, field: &str) -> Result<CounterSample> {
    let document = payload.get(field).ok_or_else(|| {
        InflectorError::Validation(format!(
            "'{}' property not found in action request payload",
            field
        ))
    })?;

    serde_json::from_value(document.clone()).map_err(|e| {
        InflectorError::Validation(format!("'{}' document is malformed: {}", field, e))
    })
}

/// Load the shift reference list from the store.
///
/// Absent key, non-array shape, and an empty list all surface as reference
/// data errors; a later message may succeed once the data is populated.
async fn load_shifts(store: &dyn StateStore, key: &str) -> Result<Vec<ShiftReference>> {
    let document = store
        .read(key)
        .await?
        .ok_or_else(|| InflectorError::ReferenceData(format!("key '{}' is absent", key)))?;

    if !document.is_array() {
        return Err(InflectorError::ReferenceData(format!(
            "key '{}' does not hold an array",
            key
        )));
    }

    let shifts: Vec<ShiftReference> = serde_json::from_value(document).map_err(|e| {
        InflectorError::ReferenceData(format!("key '{}' is malformed: {}", key, e))
    })?;

    if shifts.is_empty() {
        return Err(InflectorError::ReferenceData(format!(
            "key '{}' holds no shift entries",
            key
        )));
    }

    Ok(shifts)
}

/// Build the standardized attribute-update event published on success.
fn attribute_event(
    shift: &ShiftReference,
    attribute_name: &str,
    attribute_value: f64,
    sample: &CounterSample,
) -> Value {
    serde_json::json!({
        "action": "result",
        "payload": {
            "specVersion": "1.0",
            "type": "StationAttribute.Value.Updated.v1",
            "source": format!("inflector/{}", attribute_name),
            "id": uuid::Uuid::new_v4(),
            "time": sample.source_timestamp,
            "data": {
                "siteId": shift.site_id,
                "areaId": shift.area_id,
                "equipmentId": shift.equipment_id,
                "attributeName": attribute_name,
                "attributeValue": attribute_value,
                "attributeValueType": "double",
                "attributeTime": chrono::Utc::now(),
            }
        }
    })
}
