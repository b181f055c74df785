use super::{str_field, StatusReader, StatusResult};
use crate::error::Result;

use resourcegroup_api::{GroupKind, Status};

use kube::api::DynamicObject;

pub const ARGO_GROUP: &str = "argoproj.io";
const ROLLOUT_KIND: &str = "Rollout";

/// Maps the Argo Rollouts phase to a standardized status.
pub struct RolloutStatusReader;

impl StatusReader for RolloutStatusReader {
    fn supports(&self, group_kind: &GroupKind) -> bool {
        group_kind.group == ARGO_GROUP && group_kind.kind == ROLLOUT_KIND
    }

    fn compute(&self, obj: &DynamicObject) -> Result<StatusResult> {
        let message = str_field(&obj.data, &["status", "message"])
            .unwrap_or_default()
            .to_string();
        let result = match str_field(&obj.data, &["status", "phase"]) {
            Some("Healthy") => StatusResult::new(Status::Current),
            Some(phase @ ("Degraded" | "Failed")) => StatusResult::failed(phase, message),
            Some("Paused") => StatusResult::in_progress("RolloutPaused", message),
            Some("Progressing") => StatusResult::in_progress("RolloutProgressing", message),
            _ => StatusResult::in_progress(
                "RolloutPhaseNotReported",
                "rollout has not reported its phase yet".to_string(),
            ),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::dynamic_object;
    use super::*;
    use serde_json::json;

    fn rollout(data: serde_json::Value) -> DynamicObject {
        dynamic_object(ARGO_GROUP, "v1alpha1", ROLLOUT_KIND, "rollout1", data)
    }

    #[test]
    fn test_supports_only_argo_rollouts() {
        let reader = RolloutStatusReader;
        assert!(reader.supports(&GroupKind {
            group: ARGO_GROUP.to_string(),
            kind: ROLLOUT_KIND.to_string(),
        }));
        assert!(!reader.supports(&GroupKind {
            group: "apps".to_string(),
            kind: "Deployment".to_string(),
        }));
    }

    #[test]
    fn test_phase_mapping() {
        let healthy = rollout(json!({"status": {"phase": "Healthy"}}));
        assert_eq!(
            RolloutStatusReader.compute(&healthy).unwrap().status,
            Status::Current
        );

        let degraded = rollout(json!({"status": {"phase": "Degraded", "message": "old pods"}}));
        let result = RolloutStatusReader.compute(&degraded).unwrap();
        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.conditions[0].reason, "Degraded");
        assert_eq!(result.conditions[0].message, "old pods");

        let paused = rollout(json!({"status": {"phase": "Paused"}}));
        assert_eq!(
            RolloutStatusReader.compute(&paused).unwrap().status,
            Status::InProgress
        );

        let progressing = rollout(json!({"status": {"phase": "Progressing"}}));
        assert_eq!(
            RolloutStatusReader.compute(&progressing).unwrap().status,
            Status::InProgress
        );

        let missing = rollout(json!({}));
        let result = RolloutStatusReader.compute(&missing).unwrap();
        assert_eq!(result.status, Status::InProgress);
        assert_eq!(result.conditions[0].reason, "RolloutPhaseNotReported");
    }
}
