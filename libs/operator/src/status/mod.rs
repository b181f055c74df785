mod config_connector;
mod default;
mod rollout;

pub use config_connector::ConfigConnectorStatusReader;
pub use default::DefaultStatusReader;
pub use rollout::RolloutStatusReader;

use crate::error::Result;
use crate::resource_map::CachedStatus;

use resourcegroup_api::{
    Condition, ConditionStatus, GroupKind, Status, OWNING_INVENTORY_ANNOTATION,
    RECONCILING_CONDITION, SOURCE_HASH_ANNOTATION, STALLED_CONDITION,
};

use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use serde_json::Value;
use tracing::error;

pub const CNRM_GROUP_SUFFIX: &str = "cnrm.cloud.google.com";
const SOURCE_HASH_LENGTH: usize = 7;

/// Outcome of a status computation for a single observed object.
#[derive(Clone, Debug, Default)]
pub struct StatusResult {
    pub status: Status,
    pub conditions: Vec<Condition>,
}

impl StatusResult {
    pub(crate) fn new(status: Status) -> Self {
        Self {
            status,
            conditions: Vec::new(),
        }
    }

    pub(crate) fn in_progress(reason: &str, message: String) -> Self {
        Self {
            status: Status::InProgress,
            conditions: vec![Condition {
                type_: RECONCILING_CONDITION.to_string(),
                status: ConditionStatus::True,
                reason: reason.to_string(),
                message,
                last_transition_time: Some(Time(Utc::now())),
            }],
        }
    }

    pub(crate) fn failed(reason: &str, message: String) -> Self {
        Self {
            status: Status::Failed,
            conditions: vec![Condition {
                type_: STALLED_CONDITION.to_string(),
                status: ConditionStatus::True,
                reason: reason.to_string(),
                message,
                last_transition_time: Some(Time(Utc::now())),
            }],
        }
    }
}

/// A per-kind status computation. Readers are evaluated in order, first
/// match wins; the default reader terminates the chain.
pub trait StatusReader {
    fn supports(&self, group_kind: &GroupKind) -> bool;
    fn compute(&self, obj: &DynamicObject) -> Result<StatusResult>;
}

pub struct DelegateStatusReader {
    readers: Vec<Box<dyn StatusReader + Send + Sync>>,
}

impl DelegateStatusReader {
    pub fn new() -> Self {
        Self {
            // if more customized readers are needed, add them before the
            // default one
            readers: vec![
                Box::new(RolloutStatusReader),
                Box::new(ConfigConnectorStatusReader),
                Box::new(DefaultStatusReader),
            ],
        }
    }
}

impl Default for DelegateStatusReader {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReader for DelegateStatusReader {
    fn supports(&self, _group_kind: &GroupKind) -> bool {
        true
    }

    fn compute(&self, obj: &DynamicObject) -> Result<StatusResult> {
        let group_kind = object_group_kind(obj);
        for reader in &self.readers {
            if reader.supports(&group_kind) {
                return reader.compute(obj);
            }
        }
        // not reached: the default reader supports all kinds
        Ok(StatusResult::new(Status::Unknown))
    }
}

/// Compute the status snapshot cached in the resource map for an observed
/// object: source hash and owning inventory from annotations, health from
/// the reader chain.
pub fn compute_status(obj: &DynamicObject) -> CachedStatus {
    let annotations = obj.metadata.annotations.clone().unwrap_or_default();
    let mut cached = CachedStatus {
        source_hash: get_source_hash(&annotations),
        inventory_id: annotations
            .get(OWNING_INVENTORY_ANNOTATION)
            .cloned()
            .unwrap_or_default(),
        ..Default::default()
    };

    let group_kind = object_group_kind(obj);
    match DelegateStatusReader::new().compute(obj) {
        Err(e) => {
            error!(msg = format!("status computation for {group_kind} failed"), %e);
            cached.status = Status::Unknown;
        }
        Ok(result) => {
            cached.status = result.status;
            // Failures always surface their conditions; Config Connector
            // kinds surface them for anything not yet Current.
            if cached.status == Status::Failed
                || (is_cnrm_resource(&group_kind.group) && cached.status != Status::Current)
            {
                cached.conditions = result.conditions;
            }
        }
    }
    cached
}

/// Source hash from the object annotations, truncated to seven characters.
pub fn get_source_hash(annotations: &BTreeMap<String, String>) -> String {
    annotations
        .get(SOURCE_HASH_ANNOTATION)
        .map(|hash| hash.chars().take(SOURCE_HASH_LENGTH).collect())
        .unwrap_or_default()
}

pub fn is_cnrm_resource(group: &str) -> bool {
    group.ends_with(CNRM_GROUP_SUFFIX)
}

pub(crate) fn object_group_kind(obj: &DynamicObject) -> GroupKind {
    match &obj.types {
        Some(types) => {
            let group = match types.api_version.split_once('/') {
                Some((group, _version)) => group.to_string(),
                None => String::new(),
            };
            GroupKind {
                group,
                kind: types.kind.clone(),
            }
        }
        None => GroupKind::default(),
    }
}

pub(crate) fn field<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    Some(current)
}

pub(crate) fn int_field(value: &Value, path: &[&str]) -> Option<i64> {
    field(value, path).and_then(Value::as_i64)
}

pub(crate) fn str_field<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    field(value, path).and_then(Value::as_str)
}

/// Look up an entry of `status.conditions` by type.
pub(crate) fn find_condition<'a>(data: &'a Value, type_: &str) -> Option<&'a Value> {
    field(data, &["status", "conditions"])?
        .as_array()?
        .iter()
        .find(|condition| condition.get("type").and_then(Value::as_str) == Some(type_))
}

/// The object declares a status.observedGeneration that lags its generation.
pub(crate) fn observed_generation_behind(obj: &DynamicObject) -> bool {
    match (
        obj.metadata.generation,
        int_field(&obj.data, &["status", "observedGeneration"]),
    ) {
        (Some(generation), Some(observed)) => observed < generation,
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use kube::api::{ApiResource, DynamicObject, GroupVersionKind};

    pub(crate) fn dynamic_object(
        group: &str,
        version: &str,
        kind: &str,
        name: &str,
        data: serde_json::Value,
    ) -> DynamicObject {
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let api_resource = ApiResource::from_gvk(&gvk);
        DynamicObject::new(name, &api_resource).data(data)
    }
}
