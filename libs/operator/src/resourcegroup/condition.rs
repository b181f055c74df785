use resourcegroup_api::{
    Condition, ConditionStatus, ResourceGroupStatus, ResourceStatus, Status, COMPONENT_FAILED,
    FINISH_RECONCILING, OWNERSHIP_CONDITION, OWNERSHIP_EMPTY, OWNERSHIP_UNMATCH,
    RECONCILING_CONDITION, STALLED_CONDITION,
};

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

pub(crate) const FINISH_RECONCILING_MESSAGE: &str = "finish reconciling";
pub(crate) const COMPONENT_FAILED_MESSAGE_PREFIX: &str = "The following components failed: ";

pub(crate) fn new_condition(
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status,
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Some(Time(Utc::now())),
    }
}

pub(crate) fn new_reconciling_condition(
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> Condition {
    new_condition(RECONCILING_CONDITION, status, reason, message)
}

pub(crate) fn new_stalled_condition(
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> Condition {
    new_condition(STALLED_CONDITION, status, reason, message)
}

/// The group is reconciling while any member is still converging or opaque.
pub(crate) fn reconciling_condition(resource_statuses: &[ResourceStatus]) -> Condition {
    let converging = resource_statuses
        .iter()
        .any(|entry| matches!(entry.status, Status::InProgress | Status::Unknown));
    if converging {
        new_reconciling_condition(
            ConditionStatus::True,
            "InProgress",
            "one or more resources are reconciling",
        )
    } else {
        new_reconciling_condition(
            ConditionStatus::False,
            FINISH_RECONCILING,
            FINISH_RECONCILING_MESSAGE,
        )
    }
}

/// Stalled aggregation over the member statuses: True with the list of
/// failed components, False otherwise.
pub(crate) fn aggregate_resource_statuses(resource_statuses: &[ResourceStatus]) -> Condition {
    let failed: Vec<String> = resource_statuses
        .iter()
        .filter(|entry| entry.status == Status::Failed)
        .map(|entry| entry.resource.to_string())
        .collect();
    if failed.is_empty() {
        new_stalled_condition(
            ConditionStatus::False,
            FINISH_RECONCILING,
            FINISH_RECONCILING_MESSAGE,
        )
    } else {
        new_stalled_condition(
            ConditionStatus::True,
            COMPONENT_FAILED,
            &format!("{COMPONENT_FAILED_MESSAGE_PREFIX}{}", failed.join(", ")),
        )
    }
}

/// Enforce the fixed condition order: Reconciling first, Stalled second,
/// everything else behind them in input order. Missing front conditions are
/// filled in as Unknown.
pub(crate) fn adjust_condition_order(conditions: Vec<Condition>) -> Vec<Condition> {
    let mut reconciling = None;
    let mut stalled = None;
    let mut rest = Vec::new();
    for condition in conditions {
        match condition.type_.as_str() {
            RECONCILING_CONDITION if reconciling.is_none() => reconciling = Some(condition),
            STALLED_CONDITION if stalled.is_none() => stalled = Some(condition),
            _ => rest.push(condition),
        }
    }
    let mut ordered = vec![
        reconciling
            .unwrap_or_else(|| new_reconciling_condition(ConditionStatus::Unknown, "", "")),
        stalled.unwrap_or_else(|| new_stalled_condition(ConditionStatus::Unknown, "", "")),
    ];
    ordered.extend(rest);
    ordered
}

/// Surface ownership conflicts between the group's inventory id and the
/// owning-inventory annotation observed on the object.
pub(crate) fn ownership_condition(inventory_id: &str, owner: &str) -> Option<Condition> {
    if inventory_id == owner {
        return None;
    }
    if owner.is_empty() {
        return Some(new_condition(
            OWNERSHIP_CONDITION,
            ConditionStatus::Unknown,
            OWNERSHIP_EMPTY,
            "This object is not owned by any inventory object.",
        ));
    }
    Some(new_condition(
        OWNERSHIP_CONDITION,
        ConditionStatus::True,
        OWNERSHIP_UNMATCH,
        &format!("This object is owned by another inventory object with id {owner}"),
    ))
}

/// Aggregate status of a subgroup derived from its top-level conditions.
pub(crate) fn aggregate_group_status(status: Option<&ResourceGroupStatus>) -> Status {
    let Some(status) = status else {
        return Status::Unknown;
    };
    let condition_status = |type_: &str| {
        status
            .conditions
            .iter()
            .find(|condition| condition.type_ == type_)
            .map(|condition| condition.status)
    };
    match (
        condition_status(STALLED_CONDITION),
        condition_status(RECONCILING_CONDITION),
    ) {
        (Some(ConditionStatus::True), _) => Status::Failed,
        (_, Some(ConditionStatus::True)) => Status::InProgress,
        (Some(ConditionStatus::False), Some(ConditionStatus::False)) => Status::Current,
        _ => Status::Unknown,
    }
}

/// Keep the previous transition timestamp for conditions that did not
/// actually transition, so steady-state reconciles produce identical
/// statuses.
pub(crate) fn carry_transition_times(previous: Option<&[Condition]>, conditions: &mut [Condition]) {
    let Some(previous) = previous else { return };
    for condition in conditions.iter_mut() {
        let unchanged = previous.iter().find(|prev| {
            prev.type_ == condition.type_
                && prev.status == condition.status
                && prev.reason == condition.reason
                && prev.message == condition.message
        });
        if let Some(prev) = unchanged {
            if prev.last_transition_time.is_some() {
                condition.last_transition_time = prev.last_transition_time.clone();
            }
        }
    }
}
