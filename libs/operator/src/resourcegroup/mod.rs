pub mod condition;

use self::condition::{
    adjust_condition_order, aggregate_group_status, aggregate_resource_statuses,
    carry_transition_times, ownership_condition, reconciling_condition,
};
use crate::backoff_reconciler;
use crate::controller::{
    check_api_queryable, error_policy, Context, ControllerId, State, DEFAULT_RECONCILE_INTERVAL,
};
use crate::error::{Error, Result};
use crate::resource_map::ResourceMap;

use resourcegroup_api::{
    Actuation, Condition, GroupRef, GroupStatus, ReconcileStatus, ResourceGroup,
    ResourceGroupStatus, ResourceStatus, Status,
};

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::client::Client;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::ResourceExt;
use serde_json::json;
use tokio::time::Duration;
use tracing::{debug, info};

pub const CONTROLLER_ID: ControllerId = "resourcegroup";

/// Initialize the status controller. It recomputes a group's status when the
/// group itself changes and whenever the root controller or the watch
/// manager nudges it over the event channel.
pub async fn run(
    state: State,
    client: Client,
    workers: u16,
    events: futures::channel::mpsc::Receiver<ObjectRef<ResourceGroup>>,
) {
    let resource_groups = check_api_queryable::<ResourceGroup>(client.clone()).await;
    let ctx = Arc::new(state.to_context(client, CONTROLLER_ID));

    info!(msg = format!("starting {CONTROLLER_ID} controller"));
    let status_controller = Controller::new(
        resource_groups,
        watcher::Config::default().any_semantic(),
    )
    // debounce to filter out reconcile calls that happen in quick
    // succession (only taking the latest)
    .with_config(
        controller::Config::default()
            .debounce(Duration::from_millis(500))
            .concurrency(workers),
    )
    .reconcile_on(events)
    .shutdown_on_signal()
    .run(
        backoff_reconciler!(reconcile_status),
        error_policy,
        ctx.clone(),
    )
    .filter_map(|x| async move { std::result::Result::ok(x) })
    .for_each(|_| futures::future::ready(()));

    ctx.metrics.ready_set(1);
    status_controller.await;
}

/// Bound for a single status pass as a function of the member count.
fn reconcile_timeout(resource_count: usize) -> Duration {
    match resource_count {
        0..=500 => Duration::from_secs(30),
        501..=1500 => Duration::from_secs(60),
        1501..=3000 => Duration::from_secs(150),
        _ => Duration::from_secs(300),
    }
}

async fn reconcile_status(resource_group: Arc<ResourceGroup>, ctx: Arc<Context>) -> Result<Action> {
    let timeout = reconcile_timeout(resource_group.spec.resources.len());
    tokio::time::timeout(timeout, update_group_status(resource_group, ctx))
        .await
        .map_err(|_| Error::ReconcileTimeout(timeout))?
}

async fn update_group_status(
    resource_group: Arc<ResourceGroup>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let _timer = ctx.metrics.reconcile_count_and_measure();
    // safe unwrap: ResourceGroup is namespace scoped
    let namespace = resource_group.namespace().unwrap();
    let name = resource_group.name_any();
    info!(msg = "reconciling group status", %namespace, %name);

    let api: Api<ResourceGroup> = Api::namespaced(ctx.client.clone(), &namespace);

    if resource_group.status_disabled() {
        let has_status = resource_group
            .status
            .as_ref()
            .is_some_and(|status| *status != ResourceGroupStatus::default());
        if has_status {
            debug!(msg = "status reporting disabled, clearing status", %namespace, %name);
            patch_status(&api, &name, &namespace, json!({"status": null}), &ctx).await?;
        }
        return Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL));
    }

    let previous = resource_group.status.clone().unwrap_or_default();
    let resource_statuses = compute_resource_statuses(&resource_group, &ctx.resource_map);
    let subgroup_statuses =
        compute_subgroup_statuses(&resource_group.spec.subgroups, &ctx.client).await?;
    let conditions = group_conditions(&resource_statuses, &previous.conditions);
    let new_status = ResourceGroupStatus {
        observed_generation: resource_group.metadata.generation.unwrap_or_default(),
        resource_statuses,
        subgroup_statuses,
        conditions,
    };

    if previous == new_status {
        debug!(msg = "status unchanged, skipping write", %namespace, %name);
        return Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL));
    }

    patch_status(&api, &name, &namespace, json!({"status": new_status}), &ctx).await?;
    Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL))
}

/// JSON-merge-patch the status subresource so unrelated fields written by
/// other tooling are not clobbered.
async fn patch_status(
    api: &Api<ResourceGroup>,
    name: &str,
    namespace: &str,
    patch: serde_json::Value,
    ctx: &Context,
) -> Result<()> {
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| {
            ctx.metrics.status_update_errors_inc();
            Error::KubeError(
                format!("failed to patch ResourceGroup/status {namespace}/{name}"),
                Box::new(e),
            )
        })?;
    Ok(())
}

/// One status entry per spec resource, in spec order: the cached informer
/// view merged with any actuation fields injected by external apply tooling.
fn compute_resource_statuses(
    resource_group: &ResourceGroup,
    resource_map: &ResourceMap,
) -> Vec<ResourceStatus> {
    let inventory_id = resource_group.inventory_id();
    let mut injected = HashMap::new();
    if let Some(status) = &resource_group.status {
        for entry in &status.resource_statuses {
            injected.entry(&entry.resource).or_insert(entry);
        }
    }

    resource_group
        .spec
        .resources
        .iter()
        .map(|resource| {
            let cached = resource_map.get_status(resource);
            let prior = injected.get(resource).copied();
            let mut entry = ResourceStatus {
                resource: resource.clone(),
                status: cached
                    .as_ref()
                    .map_or(Status::NotFound, |cached| cached.status),
                source_hash: cached
                    .as_ref()
                    .map(|cached| cached.source_hash.clone())
                    .unwrap_or_default(),
                strategy: prior.and_then(|prior| prior.strategy),
                actuation: prior.and_then(|prior| prior.actuation),
                reconcile: prior.and_then(|prior| prior.reconcile),
                conditions: cached
                    .as_ref()
                    .map(|cached| cached.conditions.clone())
                    .unwrap_or_default(),
            };
            entry.status = actuation_status_to_legacy(&entry);
            if let Some(cached) = &cached {
                if let Some(ownership) = ownership_condition(&inventory_id, &cached.inventory_id) {
                    entry.conditions.push(ownership);
                }
            }
            carry_transition_times(
                prior.map(|prior| prior.conditions.as_slice()),
                &mut entry.conditions,
            );
            entry
        })
        .collect()
}

/// Fold the externally-injected actuation and reconcile fields into the
/// observed status.
fn actuation_status_to_legacy(resource_status: &ResourceStatus) -> Status {
    if resource_status.status == Status::NotFound {
        return Status::NotFound;
    }
    match resource_status.actuation {
        None => resource_status.status,
        Some(Actuation::Succeeded) => match resource_status.reconcile {
            Some(ReconcileStatus::Succeeded) => Status::Current,
            _ => resource_status.status,
        },
        Some(_) => Status::Unknown,
    }
}

/// One entry per spec subgroup, in spec order. A missing subgroup reports
/// NotFound; a found one reports the aggregate of its own conditions.
async fn compute_subgroup_statuses(
    subgroups: &[GroupRef],
    client: &Client,
) -> Result<Vec<GroupStatus>> {
    let mut statuses = Vec::with_capacity(subgroups.len());
    for group in subgroups {
        let api: Api<ResourceGroup> = Api::namespaced(client.clone(), &group.namespace);
        let status = match api.get_opt(&group.name).await.map_err(|e| {
            Error::KubeError(
                format!("failed to get subgroup {}/{}", group.namespace, group.name),
                Box::new(e),
            )
        })? {
            Some(subgroup) => aggregate_group_status(subgroup.status.as_ref()),
            None => Status::NotFound,
        };
        statuses.push(GroupStatus {
            group: group.clone(),
            status,
            conditions: Vec::new(),
        });
    }
    Ok(statuses)
}

fn group_conditions(
    resource_statuses: &[ResourceStatus],
    previous_conditions: &[Condition],
) -> Vec<Condition> {
    let mut conditions = adjust_condition_order(vec![
        reconciling_condition(resource_statuses),
        aggregate_resource_statuses(resource_statuses),
    ]);
    carry_transition_times(Some(previous_conditions), &mut conditions);
    conditions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_map::CachedStatus;

    use resourcegroup_api::{
        ConditionStatus, ResourceGroupSpec, ResourceRef, Strategy, COMPONENT_FAILED,
        FINISH_RECONCILING, INVENTORY_LABEL, OWNERSHIP_UNMATCH, RECONCILING_CONDITION,
        STALLED_CONDITION,
    };

    fn resource(kind: &str, namespace: &str, name: &str) -> ResourceRef {
        ResourceRef {
            group: String::new(),
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn group_with_resources(resources: Vec<ResourceRef>) -> ResourceGroup {
        let mut resource_group = ResourceGroup::new(
            "group0",
            ResourceGroupSpec {
                resources,
                subgroups: Vec::new(),
            },
        );
        resource_group.metadata.namespace = Some("default".to_string());
        resource_group.metadata.generation = Some(1);
        resource_group
    }

    #[test]
    fn test_reconcile_timeout_steps() {
        assert_eq!(reconcile_timeout(0), Duration::from_secs(30));
        assert_eq!(reconcile_timeout(500), Duration::from_secs(30));
        assert_eq!(reconcile_timeout(750), Duration::from_secs(60));
        assert_eq!(reconcile_timeout(2235), Duration::from_secs(150));
        assert_eq!(reconcile_timeout(1_000_000), Duration::from_secs(300));
    }

    #[test]
    fn test_actuation_status_to_legacy_table() {
        let entry = |status, actuation, reconcile| ResourceStatus {
            status,
            actuation,
            reconcile,
            ..Default::default()
        };

        // status as-is when actuation succeeded without reconcile outcome
        assert_eq!(
            actuation_status_to_legacy(&entry(Status::Current, Some(Actuation::Succeeded), None)),
            Status::Current
        );
        // status as-is when no actuation reported
        assert_eq!(
            actuation_status_to_legacy(&entry(Status::InProgress, None, None)),
            Status::InProgress
        );
        // anything but a successful actuation hides the observed status
        assert_eq!(
            actuation_status_to_legacy(&entry(Status::Current, Some(Actuation::Pending), None)),
            Status::Unknown
        );
        // NotFound always wins
        assert_eq!(
            actuation_status_to_legacy(&entry(Status::NotFound, Some(Actuation::Pending), None)),
            Status::NotFound
        );
        assert_eq!(
            actuation_status_to_legacy(&entry(Status::NotFound, Some(Actuation::Succeeded), None)),
            Status::NotFound
        );
        // both pipeline stages succeeded
        assert_eq!(
            actuation_status_to_legacy(&entry(
                Status::Unknown,
                Some(Actuation::Succeeded),
                Some(ReconcileStatus::Succeeded)
            )),
            Status::Current
        );
    }

    #[test]
    fn test_resource_statuses_follow_spec_order_and_default_to_not_found() {
        let ns1 = resource("Namespace", "", "ns1");
        let pod1 = resource("Pod", "default", "pod1");
        let resource_group = group_with_resources(vec![ns1.clone(), pod1.clone()]);
        let map = ResourceMap::default();

        let statuses = compute_resource_statuses(&resource_group, &map);
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].resource, ns1);
        assert_eq!(statuses[0].status, Status::NotFound);
        assert!(statuses[0].conditions.is_empty());
        assert_eq!(statuses[1].resource, pod1);
        assert_eq!(statuses[1].status, Status::NotFound);
    }

    #[test]
    fn test_resource_statuses_surface_cache_and_ownership() {
        let ns1 = resource("Namespace", "", "ns1");
        let pod1 = resource("Pod", "default", "pod1");
        let mut resource_group = group_with_resources(vec![ns1.clone(), pod1.clone()]);
        resource_group.metadata.labels = Some(
            [(INVENTORY_LABEL.to_string(), "group0".to_string())]
                .into_iter()
                .collect(),
        );

        let group_ref = GroupRef::from(&resource_group);
        let map = ResourceMap::default();
        map.reconcile(group_ref, vec![ns1.clone(), pod1.clone()], false);
        map.set_status(
            &ns1,
            CachedStatus {
                status: Status::Current,
                inventory_id: "group0".to_string(),
                source_hash: "abcdef1".to_string(),
                ..Default::default()
            },
        );
        map.set_status(
            &pod1,
            CachedStatus {
                status: Status::InProgress,
                inventory_id: "other".to_string(),
                ..Default::default()
            },
        );

        let statuses = compute_resource_statuses(&resource_group, &map);
        assert_eq!(statuses[0].status, Status::Current);
        assert_eq!(statuses[0].source_hash, "abcdef1");
        assert!(statuses[0].conditions.is_empty());

        assert_eq!(statuses[1].status, Status::InProgress);
        assert_eq!(statuses[1].conditions.len(), 1);
        assert_eq!(statuses[1].conditions[0].reason, OWNERSHIP_UNMATCH);
        assert_eq!(
            statuses[1].conditions[0].message,
            "This object is owned by another inventory object with id other"
        );
    }

    #[test]
    fn test_resource_statuses_preserve_injected_actuation_fields() {
        let pod1 = resource("Pod", "default", "pod1");
        let mut resource_group = group_with_resources(vec![pod1.clone()]);
        resource_group.status = Some(ResourceGroupStatus {
            resource_statuses: vec![ResourceStatus {
                resource: pod1.clone(),
                status: Status::Unknown,
                strategy: Some(Strategy::Apply),
                actuation: Some(Actuation::Succeeded),
                reconcile: Some(ReconcileStatus::Succeeded),
                ..Default::default()
            }],
            ..Default::default()
        });

        let group_ref = GroupRef::from(&resource_group);
        let map = ResourceMap::default();
        map.reconcile(group_ref, vec![pod1.clone()], false);
        map.set_status(
            &pod1,
            CachedStatus {
                status: Status::Unknown,
                ..Default::default()
            },
        );

        let statuses = compute_resource_statuses(&resource_group, &map);
        assert_eq!(statuses[0].strategy, Some(Strategy::Apply));
        assert_eq!(statuses[0].actuation, Some(Actuation::Succeeded));
        assert_eq!(statuses[0].reconcile, Some(ReconcileStatus::Succeeded));
        // both pipeline stages succeeded, so the opaque cache entry reads
        // Current
        assert_eq!(statuses[0].status, Status::Current);
    }

    #[test]
    fn test_group_conditions_for_empty_group() {
        let conditions = group_conditions(&[], &[]);
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].type_, RECONCILING_CONDITION);
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_eq!(conditions[0].reason, FINISH_RECONCILING);
        assert_eq!(conditions[1].type_, STALLED_CONDITION);
        assert_eq!(conditions[1].status, ConditionStatus::False);
        assert_eq!(conditions[1].reason, FINISH_RECONCILING);
    }

    #[test]
    fn test_group_conditions_stalled_aggregation() {
        let failed1 = ResourceStatus {
            resource: ResourceRef {
                group: "group1".to_string(),
                kind: "kind1".to_string(),
                namespace: "ns1".to_string(),
                name: "name1".to_string(),
            },
            status: Status::Failed,
            ..Default::default()
        };
        let failed2 = ResourceStatus {
            resource: ResourceRef {
                group: "group2".to_string(),
                kind: "kind2".to_string(),
                namespace: "ns2".to_string(),
                name: "name2".to_string(),
            },
            status: Status::Failed,
            ..Default::default()
        };
        let current = ResourceStatus {
            status: Status::Current,
            ..Default::default()
        };

        let conditions = group_conditions(&[current, failed1, failed2], &[]);
        assert_eq!(conditions[1].status, ConditionStatus::True);
        assert_eq!(conditions[1].reason, COMPONENT_FAILED);
        assert_eq!(
            conditions[1].message,
            "The following components failed: group1/kind1/ns1/name1, group2/kind2/ns2/name2"
        );
    }

    #[test]
    fn test_group_conditions_are_stable_across_reconciles() {
        let statuses = vec![ResourceStatus {
            status: Status::Current,
            ..Default::default()
        }];
        let first = group_conditions(&statuses, &[]);
        let second = group_conditions(&statuses, &first);
        assert_eq!(first, second);
    }
}
