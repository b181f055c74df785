use crate::controller::ControllerId;
use crate::metrics::{Action, ControllerMetrics};
use crate::resource_map::ResourceMap;
use crate::status;
use crate::throttler::Throttler;
use crate::typeresolver::TypeResolver;

use resourcegroup_api::{GroupKind, ResourceRef};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use backon::{BackoffBuilder, ExponentialBuilder};
use futures::StreamExt;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::client::Client;
use kube::runtime::{watcher, WatchStreamExt};
use kube::ResourceExt;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

pub const CONTROLLER_ID: ControllerId = "watch";

const RESOLVE_RETRY_MIN_DELAY: Duration = Duration::from_secs(1);
const RESOLVE_RETRY_MAX_DELAY: Duration = Duration::from_secs(300);

struct WatchHandle {
    task: JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns one dynamic informer per referenced kind. The only component that
/// starts or stops informers; everything else hands it the desired kind set.
pub struct WatchManager {
    client: Client,
    resolver: Arc<TypeResolver>,
    resource_map: Arc<ResourceMap>,
    throttler: Arc<Throttler>,
    metrics: Arc<ControllerMetrics>,
    watches: Mutex<HashMap<GroupKind, WatchHandle>>,
}

impl WatchManager {
    pub fn new(
        client: Client,
        resolver: Arc<TypeResolver>,
        resource_map: Arc<ResourceMap>,
        throttler: Arc<Throttler>,
        metrics: Arc<ControllerMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            resolver,
            resource_map,
            throttler,
            metrics,
            watches: Mutex::new(HashMap::new()),
        })
    }

    /// Reconcile the active watch set against the desired kinds: stop
    /// watches whose kind is no longer referenced, start watches for kinds
    /// that appeared. Stops are best-effort task aborts.
    pub fn update_watches(self: &Arc<Self>, kinds: &HashSet<GroupKind>) {
        let mut watches = self.watches.lock().unwrap_or_else(PoisonError::into_inner);
        watches.retain(|kind, _| {
            let keep = kinds.contains(kind);
            if !keep {
                info!(msg = "stopping watch", group = %kind.group, kind = %kind.kind);
            }
            keep
        });
        for kind in kinds {
            if watches.contains_key(kind) {
                continue;
            }
            info!(msg = "starting watch", group = %kind.group, kind = %kind.kind);
            let manager = Arc::clone(self);
            let watched_kind = kind.clone();
            let task = tokio::spawn(async move { manager.run_watch(watched_kind).await });
            watches.insert(kind.clone(), WatchHandle { task });
        }
        self.metrics.active_watches_set(watches.len() as i64);
    }

    async fn run_watch(self: Arc<Self>, kind: GroupKind) {
        let api_resource = self.resolve_with_backoff(&kind).await;
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &api_resource);

        let manager = Arc::clone(&self);
        let watched_kind = kind.clone();
        watcher(api, watcher::Config::default().any_semantic())
            .default_backoff()
            .for_each(move |event| {
                let manager = Arc::clone(&manager);
                let kind = watched_kind.clone();
                async move {
                    match event {
                        Ok(watcher::Event::InitApply(obj)) | Ok(watcher::Event::Apply(obj)) => {
                            manager.handle_object_event(&kind, obj, false);
                        }
                        Ok(watcher::Event::Delete(obj)) => {
                            manager.handle_object_event(&kind, obj, true);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(
                                msg = "unexpected error while watching kind",
                                group = %kind.group,
                                kind = %kind.kind,
                                %e,
                            );
                            manager.metrics.watch_operations_failed_inc();
                        }
                    }
                }
            })
            .await;
    }

    /// Resolve the kind against discovery, refreshing and backing off until
    /// it appears. A missing kind usually means its CRD has not been
    /// installed yet; resources of that kind report NotFound meanwhile.
    async fn resolve_with_backoff(&self, kind: &GroupKind) -> ApiResource {
        let mut backoff = ExponentialBuilder::default()
            .with_min_delay(RESOLVE_RETRY_MIN_DELAY)
            .with_max_delay(RESOLVE_RETRY_MAX_DELAY)
            .without_max_times()
            .build();
        loop {
            if let Some(api_resource) = self.resolver.resolve(kind) {
                return api_resource;
            }
            if let Err(e) = self.resolver.refresh().await {
                warn!(msg = "discovery refresh failed", %e);
            }
            if let Some(api_resource) = self.resolver.resolve(kind) {
                return api_resource;
            }
            let delay = backoff.next().unwrap_or(RESOLVE_RETRY_MAX_DELAY);
            debug!(
                msg = "kind not found in discovery, retrying",
                group = %kind.group,
                kind = %kind.kind,
                ?delay,
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Cache the object's computed status (or purge it on delete) and fan
    /// the change out to every owning group through the throttler.
    fn handle_object_event(&self, kind: &GroupKind, obj: DynamicObject, deleted: bool) {
        let resource = ResourceRef {
            group: kind.group.clone(),
            kind: kind.kind.clone(),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.name_any(),
        };
        if !self.resource_map.has_resource(&resource) {
            return;
        }

        if deleted {
            self.resource_map.remove_status(&resource);
            self.metrics.triggered_inc(Action::Delete, &resource.kind);
        } else {
            self.resource_map
                .set_status(&resource, status::compute_status(&obj));
            self.metrics.triggered_inc(Action::Apply, &resource.kind);
        }

        for group in self.resource_map.groups_for(&resource) {
            self.throttler.tick(group);
        }
    }
}
