use super::{
    find_condition, is_cnrm_resource, observed_generation_behind, StatusReader, StatusResult,
};
use crate::error::Result;

use resourcegroup_api::{GroupKind, Status};

use kube::api::DynamicObject;
use serde_json::Value;

/// Computes status for Config Connector kinds from their `Ready` condition.
pub struct ConfigConnectorStatusReader;

impl StatusReader for ConfigConnectorStatusReader {
    fn supports(&self, group_kind: &GroupKind) -> bool {
        is_cnrm_resource(&group_kind.group)
    }

    fn compute(&self, obj: &DynamicObject) -> Result<StatusResult> {
        if obj.metadata.deletion_timestamp.is_some() {
            return Ok(StatusResult::new(Status::Terminating));
        }
        if observed_generation_behind(obj) {
            return Ok(StatusResult::in_progress(
                "LatestGenerationNotObserved",
                "observed generation is behind the latest generation".to_string(),
            ));
        }

        let Some(ready) = find_condition(&obj.data, "Ready") else {
            return Ok(StatusResult::in_progress(
                "NoReadyCondition",
                "resource has not published a Ready condition yet".to_string(),
            ));
        };
        let reason = ready.get("reason").and_then(Value::as_str).unwrap_or_default();
        let message = ready
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let result = match ready.get("status").and_then(Value::as_str) {
            Some("True") => StatusResult::new(Status::Current),
            // terminal actuation errors carry a *Failed reason, anything
            // else is still converging
            _ if reason.ends_with("Failed") => StatusResult::failed(reason, message),
            _ => StatusResult::in_progress(reason, message),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::dynamic_object;
    use super::*;
    use serde_json::json;

    fn bucket(data: serde_json::Value) -> DynamicObject {
        dynamic_object(
            "storage.cnrm.cloud.google.com",
            "v1beta1",
            "StorageBucket",
            "bucket1",
            data,
        )
    }

    #[test]
    fn test_supports_cnrm_groups() {
        let reader = ConfigConnectorStatusReader;
        assert!(reader.supports(&GroupKind {
            group: "storage.cnrm.cloud.google.com".to_string(),
            kind: "StorageBucket".to_string(),
        }));
        assert!(!reader.supports(&GroupKind {
            group: "apps".to_string(),
            kind: "Deployment".to_string(),
        }));
    }

    #[test]
    fn test_ready_true_is_current() {
        let obj = bucket(json!({"status": {"conditions": [
            {"type": "Ready", "status": "True", "reason": "UpToDate"},
        ]}}));
        let result = ConfigConnectorStatusReader.compute(&obj).unwrap();
        assert_eq!(result.status, Status::Current);
        assert!(result.conditions.is_empty());
    }

    #[test]
    fn test_ready_false_with_failed_reason_is_failed() {
        let obj = bucket(json!({"status": {"conditions": [
            {"type": "Ready", "status": "False", "reason": "UpdateFailed", "message": "denied"},
        ]}}));
        let result = ConfigConnectorStatusReader.compute(&obj).unwrap();
        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.conditions[0].reason, "UpdateFailed");
        assert_eq!(result.conditions[0].message, "denied");
    }

    #[test]
    fn test_ready_false_otherwise_is_in_progress() {
        let obj = bucket(json!({"status": {"conditions": [
            {"type": "Ready", "status": "False", "reason": "Updating", "message": "working"},
        ]}}));
        let result = ConfigConnectorStatusReader.compute(&obj).unwrap();
        assert_eq!(result.status, Status::InProgress);
        assert_eq!(result.conditions[0].reason, "Updating");
    }

    #[test]
    fn test_missing_ready_condition_is_in_progress() {
        let obj = bucket(json!({}));
        let result = ConfigConnectorStatusReader.compute(&obj).unwrap();
        assert_eq!(result.status, Status::InProgress);
        assert_eq!(result.conditions[0].reason, "NoReadyCondition");
    }
}
