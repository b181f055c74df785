use super::{
    field, find_condition, int_field, object_group_kind, observed_generation_behind, str_field,
    StatusReader, StatusResult,
};
use crate::error::Result;

use resourcegroup_api::{GroupKind, Status};

use kube::api::DynamicObject;
use serde_json::Value;

/// Terminal reader computing a standardized health status for any kind:
/// generic metadata and condition checks plus dedicated rules for the core
/// workload kinds.
pub struct DefaultStatusReader;

impl StatusReader for DefaultStatusReader {
    fn supports(&self, _group_kind: &GroupKind) -> bool {
        true
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

        let group_kind = object_group_kind(obj);
        let result = match (group_kind.group.as_str(), group_kind.kind.as_str()) {
            ("apps", "Deployment") => deployment_status(&obj.data),
            ("apps", "StatefulSet") => stateful_set_status(&obj.data),
            ("apps", "ReplicaSet") => replica_set_status(&obj.data),
            ("apps", "DaemonSet") => daemon_set_status(&obj.data),
            ("batch", "Job") => job_status(&obj.data),
            ("", "Pod") => pod_status(&obj.data),
            ("", "PersistentVolumeClaim") => pvc_status(&obj.data),
            ("", "Service") => service_status(&obj.data),
            _ => generic_status(&obj.data),
        };
        Ok(result)
    }
}

/// Fallback for kinds without dedicated rules: honor the standard
/// Reconciling/Stalled conditions if the object publishes them.
fn generic_status(data: &Value) -> StatusResult {
    if let Some(stalled) = find_condition(data, "Stalled") {
        if condition_is_true(stalled) {
            return StatusResult::failed(
                condition_reason(stalled, "Stalled"),
                condition_message(stalled),
            );
        }
    }
    if let Some(reconciling) = find_condition(data, "Reconciling") {
        if condition_is_true(reconciling) {
            return StatusResult::in_progress(
                condition_reason(reconciling, "Reconciling"),
                condition_message(reconciling),
            );
        }
    }
    StatusResult::new(Status::Current)
}

fn deployment_status(data: &Value) -> StatusResult {
    if let Some(progressing) = find_condition(data, "Progressing") {
        let reason = condition_reason(progressing, "");
        if !condition_is_true(progressing) && reason == "ProgressDeadlineExceeded" {
            return StatusResult::failed(reason, condition_message(progressing));
        }
    }

    let spec_replicas = int_field(data, &["spec", "replicas"]).unwrap_or(1);
    let status_replicas = int_field(data, &["status", "replicas"]).unwrap_or(0);
    let updated = int_field(data, &["status", "updatedReplicas"]).unwrap_or(0);
    let ready = int_field(data, &["status", "readyReplicas"]).unwrap_or(0);
    let available = int_field(data, &["status", "availableReplicas"]).unwrap_or(0);

    if updated < spec_replicas {
        return StatusResult::in_progress(
            "LessUpdated",
            format!("updated: {updated}/{spec_replicas}"),
        );
    }
    if status_replicas > spec_replicas {
        return StatusResult::in_progress(
            "ExtraPods",
            format!("pending termination: {}", status_replicas - spec_replicas),
        );
    }
    if available < updated {
        return StatusResult::in_progress(
            "LessAvailable",
            format!("available: {available}/{updated}"),
        );
    }
    if ready < spec_replicas {
        return StatusResult::in_progress("LessReady", format!("ready: {ready}/{spec_replicas}"));
    }
    if let Some(available_condition) = find_condition(data, "Available") {
        if !condition_is_true(available_condition) {
            return StatusResult::in_progress(
                "DeploymentNotAvailable",
                condition_message(available_condition),
            );
        }
    }
    StatusResult::new(Status::Current)
}

fn stateful_set_status(data: &Value) -> StatusResult {
    let spec_replicas = int_field(data, &["spec", "replicas"]).unwrap_or(1);
    let status_replicas = int_field(data, &["status", "replicas"]).unwrap_or(0);
    let ready = int_field(data, &["status", "readyReplicas"]).unwrap_or(0);

    if status_replicas > spec_replicas {
        return StatusResult::in_progress(
            "ExtraPods",
            format!("pending termination: {}", status_replicas - spec_replicas),
        );
    }
    if ready < spec_replicas {
        return StatusResult::in_progress("LessReady", format!("ready: {ready}/{spec_replicas}"));
    }
    let current_revision = str_field(data, &["status", "currentRevision"]);
    let update_revision = str_field(data, &["status", "updateRevision"]);
    if update_revision.is_some() && current_revision != update_revision {
        return StatusResult::in_progress(
            "RevisionMismatch",
            "update revision is being rolled out".to_string(),
        );
    }
    StatusResult::new(Status::Current)
}

fn replica_set_status(data: &Value) -> StatusResult {
    let spec_replicas = int_field(data, &["spec", "replicas"]).unwrap_or(1);
    let status_replicas = int_field(data, &["status", "replicas"]).unwrap_or(0);
    let ready = int_field(data, &["status", "readyReplicas"]).unwrap_or(0);
    let available = int_field(data, &["status", "availableReplicas"]).unwrap_or(0);

    if status_replicas > spec_replicas {
        return StatusResult::in_progress(
            "ExtraPods",
            format!("pending termination: {}", status_replicas - spec_replicas),
        );
    }
    if ready < spec_replicas {
        return StatusResult::in_progress("LessReady", format!("ready: {ready}/{spec_replicas}"));
    }
    if available < spec_replicas {
        return StatusResult::in_progress(
            "LessAvailable",
            format!("available: {available}/{spec_replicas}"),
        );
    }
    StatusResult::new(Status::Current)
}

fn daemon_set_status(data: &Value) -> StatusResult {
    let Some(desired) = int_field(data, &["status", "desiredNumberScheduled"]) else {
        return StatusResult::in_progress(
            "NoDesiredNumber",
            "desired number of pods not published yet".to_string(),
        );
    };
    let updated = int_field(data, &["status", "updatedNumberScheduled"]).unwrap_or(0);
    let available = int_field(data, &["status", "numberAvailable"]).unwrap_or(0);
    let ready = int_field(data, &["status", "numberReady"]).unwrap_or(0);

    if updated < desired {
        return StatusResult::in_progress("LessUpdated", format!("updated: {updated}/{desired}"));
    }
    if available < desired {
        return StatusResult::in_progress(
            "LessAvailable",
            format!("available: {available}/{desired}"),
        );
    }
    if ready < desired {
        return StatusResult::in_progress("LessReady", format!("ready: {ready}/{desired}"));
    }
    StatusResult::new(Status::Current)
}

fn job_status(data: &Value) -> StatusResult {
    if let Some(failed) = find_condition(data, "Failed") {
        if condition_is_true(failed) {
            return StatusResult::failed(
                condition_reason(failed, "JobFailed"),
                condition_message(failed),
            );
        }
    }
    if let Some(complete) = find_condition(data, "Complete") {
        if condition_is_true(complete) {
            return StatusResult::new(Status::Current);
        }
    }
    if field_missing(data, &["status", "startTime"]) {
        return StatusResult::in_progress("JobNotStarted", "job not started".to_string());
    }
    StatusResult::in_progress("JobInProgress", "job in progress".to_string())
}

fn pod_status(data: &Value) -> StatusResult {
    match str_field(data, &["status", "phase"]) {
        Some("Succeeded") => StatusResult::new(Status::Current),
        Some("Failed") => StatusResult::failed(
            "PodFailed",
            str_field(data, &["status", "message"])
                .unwrap_or("pod failed")
                .to_string(),
        ),
        Some("Running") => {
            if let Some(crashed) = crash_looping_container(data) {
                return StatusResult::failed(
                    "ContainerCrashLooping",
                    format!("container {crashed} is in CrashLoopBackOff"),
                );
            }
            match find_condition(data, "Ready") {
                Some(ready) if condition_is_true(ready) => StatusResult::new(Status::Current),
                _ => StatusResult::in_progress(
                    "PodRunningNotReady",
                    "pod is running but not ready".to_string(),
                ),
            }
        }
        _ => {
            if let Some(crashed) = crash_looping_container(data) {
                return StatusResult::failed(
                    "ContainerCrashLooping",
                    format!("container {crashed} is in CrashLoopBackOff"),
                );
            }
            StatusResult::in_progress("PodPending", "pod is pending".to_string())
        }
    }
}

fn crash_looping_container(data: &Value) -> Option<&str> {
    let statuses = field(data, &["status", "containerStatuses"])?.as_array()?;
    statuses.iter().find_map(|container| {
        let waiting_reason = container
            .get("state")?
            .get("waiting")?
            .get("reason")?
            .as_str()?;
        if waiting_reason == "CrashLoopBackOff" {
            container.get("name")?.as_str()
        } else {
            None
        }
    })
}

fn pvc_status(data: &Value) -> StatusResult {
    match str_field(data, &["status", "phase"]) {
        Some("Bound") => StatusResult::new(Status::Current),
        _ => StatusResult::in_progress("NotBound", "claim is not bound".to_string()),
    }
}

fn service_status(data: &Value) -> StatusResult {
    if str_field(data, &["spec", "type"]) == Some("LoadBalancer") {
        let assigned = field(data, &["status", "loadBalancer", "ingress"])
            .and_then(Value::as_array)
            .is_some_and(|ingress| !ingress.is_empty());
        if !assigned {
            return StatusResult::in_progress(
                "NoIPAssigned",
                "load balancer ingress not assigned".to_string(),
            );
        }
    }
    StatusResult::new(Status::Current)
}

fn field_missing(data: &Value, path: &[&str]) -> bool {
    field(data, path).is_none()
}

fn condition_is_true(condition: &Value) -> bool {
    condition.get("status").and_then(Value::as_str) == Some("True")
}

fn condition_reason<'a>(condition: &'a Value, fallback: &'a str) -> &'a str {
    condition
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or(fallback)
}

fn condition_message(condition: &Value) -> String {
    condition
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
