use crate::backoff_reconciler;
use crate::controller::{
    check_api_queryable, error_policy, Context, ControllerId, State, DEFAULT_RECONCILE_INTERVAL,
};
use crate::error::Result;

use resourcegroup_api::{GroupRef, ResourceGroup, ResourceRef};

use std::collections::HashSet;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use kube::client::Client;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector;
use kube::runtime::{watcher, WatchStreamExt};
use tokio::time::Duration;
use tracing::{debug, info};

pub const CONTROLLER_ID: ControllerId = "root";

/// Initialize the root controller: it keeps the resource map and the watch
/// set aligned with every group's spec and nudges the status controller.
pub async fn run(state: State, client: Client, workers: u16) {
    let resource_groups = check_api_queryable::<ResourceGroup>(client.clone()).await;
    let ctx = Arc::new(state.to_context(client, CONTROLLER_ID));

    let (reader, writer) = reflector::store();
    // Group deletions never reach the reconciler, so the map cleanup runs
    // straight off the watch stream.
    let deletion_ctx = ctx.clone();
    let resource_group_events = watcher(
        resource_groups,
        watcher::Config::default().any_semantic(),
    )
    .default_backoff()
    .reflect(writer)
    .inspect_ok(move |event| {
        if let watcher::Event::Delete(resource_group) = event {
            handle_group_deleted(resource_group, &deletion_ctx);
        }
    })
    .touched_objects();

    info!(msg = format!("starting {CONTROLLER_ID} controller"));
    let root_controller = Controller::for_stream(resource_group_events, reader)
        // debounce to filter out reconcile calls that happen in quick
        // succession (only taking the latest)
        .with_config(
            controller::Config::default()
                .debounce(Duration::from_millis(500))
                .concurrency(workers),
        )
        .shutdown_on_signal()
        .run(
            backoff_reconciler!(reconcile_root),
            error_policy,
            ctx.clone(),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()));

    ctx.metrics.ready_set(1);
    root_controller.await;
}

fn handle_group_deleted(resource_group: &ResourceGroup, ctx: &Context) {
    let group = GroupRef::from(resource_group);
    debug!(
        msg = "cleaning up deleted group",
        namespace = %group.namespace,
        name = %group.name,
    );
    ctx.resource_map.reconcile(group.clone(), Vec::new(), true);
    ctx.watches.update_watches(&ctx.resource_map.kinds_in_use());
    // final nudge so the status controller observes the deletion
    ctx.events.nudge(&group);
}

/// Duplicate spec entries collapse to their first occurrence before they
/// reach the resource map.
fn dedup_resources(resources: &[ResourceRef]) -> Vec<ResourceRef> {
    let mut seen = HashSet::new();
    resources
        .iter()
        .filter(|resource| seen.insert((*resource).clone()))
        .cloned()
        .collect()
}

async fn reconcile_root(resource_group: Arc<ResourceGroup>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.reconcile_count_and_measure();
    let group = GroupRef::from(resource_group.as_ref());
    info!(
        msg = "reconciling group spec",
        namespace = %group.namespace,
        name = %group.name,
    );

    let resources = dedup_resources(&resource_group.spec.resources);
    let changed = ctx.resource_map.reconcile(group.clone(), resources, false);
    if !changed.is_empty() {
        debug!(msg = format!("kinds crossing zero population: {changed:?}"));
    }
    ctx.watches.update_watches(&ctx.resource_map.kinds_in_use());

    // trigger a status recompute even if no object event ever arrives
    ctx.events.nudge(&group);
    Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(kind: &str, name: &str) -> ResourceRef {
        ResourceRef {
            group: String::new(),
            kind: kind.to_string(),
            namespace: "ns".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_dedup_resources_keeps_first_occurrence_order() {
        let pod1 = resource("Pod", "pod1");
        let pod2 = resource("Pod", "pod2");
        let deduped = dedup_resources(&[pod1.clone(), pod2.clone(), pod1.clone()]);
        assert_eq!(deduped, vec![pod1, pod2]);
    }

    #[test]
    fn test_dedup_resources_empty() {
        assert!(dedup_resources(&[]).is_empty());
    }
}
