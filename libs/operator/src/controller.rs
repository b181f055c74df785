use crate::error::{Error, Result};
use crate::metrics::{ControllerMetrics, Metrics};
use crate::prometheus_exporter;
use crate::resource_map::ResourceMap;
use crate::typeresolver::TypeResolver;
use crate::watch::WatchManager;

use resourcegroup_api::{GroupRef, ResourceGroup};
use resourcegroup_k8s_util::types::short_type_name;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use futures::channel::mpsc;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::Resource;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{error, trace, warn};

/// Idle requeue interval; the informer and channel paths are the fast paths.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(300);
const ERROR_BACKOFF_MAX_DELAY: Duration = Duration::from_secs(60);
pub const GROUP_EVENT_BUFFER_SIZE: usize = 256;

pub type ControllerId = &'static str;

/// Sender half of the bounded channel the status controller reconciles on.
/// Nudges are dropped when the buffer is full; the ResourceGroup watch still
/// guarantees an eventual reconcile.
#[derive(Clone)]
pub struct GroupEventSender(Arc<Mutex<mpsc::Sender<ObjectRef<ResourceGroup>>>>);

impl GroupEventSender {
    pub fn nudge(&self, group: &GroupRef) {
        let obj_ref = ObjectRef::new(&group.name).within(&group.namespace);
        let mut tx = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = tx.try_send(obj_ref) {
            if e.is_full() {
                warn!(
                    msg = "group event channel full, dropping nudge",
                    namespace = %group.namespace,
                    name = %group.name,
                );
            } else {
                trace!(
                    msg = "group event channel closed",
                    namespace = %group.namespace,
                    name = %group.name,
                );
            }
        }
    }
}

pub fn group_event_channel() -> (GroupEventSender, mpsc::Receiver<ObjectRef<ResourceGroup>>) {
    let (tx, rx) = mpsc::channel(GROUP_EVENT_BUFFER_SIZE);
    (GroupEventSender(Arc::new(Mutex::new(tx))), rx)
}

/// State shared between the controllers and the web server
#[derive(Clone)]
pub struct State {
    /// Prometheus metrics
    metrics: Arc<Metrics>,
    registry: Arc<prometheus_client::registry::Registry>,
    /// Shared group/resource index with cached per-resource statuses
    pub resource_map: Arc<ResourceMap>,
    /// Discovery-backed kind resolver
    pub resolver: Arc<TypeResolver>,
    /// Owner of the dynamic per-kind watches
    pub watches: Arc<WatchManager>,
    /// Sender for group-level reconcile nudges
    pub events: GroupEventSender,
}

impl State {
    pub fn new(
        registry: prometheus_client::registry::Registry,
        metrics: Metrics,
        resource_map: Arc<ResourceMap>,
        resolver: Arc<TypeResolver>,
        watches: Arc<WatchManager>,
        events: GroupEventSender,
    ) -> Self {
        Self {
            metrics: Arc::new(metrics),
            registry: Arc::new(registry),
            resource_map,
            resolver,
            watches,
            events,
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Result<String> {
        prometheus_exporter::format_prometheus_metrics(&self.registry)
            .map_err(|e| Error::FormattingError("failed to export metrics".to_string(), e))
    }

    /// Create a Controller Context that can update State
    pub fn to_context(&self, client: Client, controller_id: ControllerId) -> Context {
        Context::new(
            controller_id,
            client,
            self.metrics
                .controllers
                .get(controller_id)
                .expect("all CONTROLLER_IDs have to be registered")
                .clone(),
            self.resource_map.clone(),
            self.resolver.clone(),
            self.watches.clone(),
            self.events.clone(),
        )
    }
}

// Context for our reconcilers
#[derive(Clone)]
pub struct Context {
    /// Controller ID
    pub controller_id: ControllerId,
    /// Kubernetes client
    pub client: Client,
    /// Prometheus metrics
    pub metrics: Arc<ControllerMetrics>,
    /// Shared group/resource index with cached per-resource statuses
    pub resource_map: Arc<ResourceMap>,
    /// Discovery-backed kind resolver
    pub resolver: Arc<TypeResolver>,
    /// Owner of the dynamic per-kind watches
    pub watches: Arc<WatchManager>,
    /// Sender for group-level reconcile nudges
    pub events: GroupEventSender,
    /// State of the error backoff policy per object
    error_backoff_cache: Arc<RwLock<HashMap<ObjectRef<ResourceGroup>, RwLock<ExponentialBackoff>>>>,
}

impl Context {
    pub fn new(
        controller_id: ControllerId,
        client: Client,
        metrics: Arc<ControllerMetrics>,
        resource_map: Arc<ResourceMap>,
        resolver: Arc<TypeResolver>,
        watches: Arc<WatchManager>,
        events: GroupEventSender,
    ) -> Self {
        Self {
            controller_id,
            client,
            metrics,
            resource_map,
            resolver,
            watches,
            events,
            error_backoff_cache: Arc::default(),
        }
    }

    /// Return next duration of the backoff policy for the given object
    pub async fn get_backoff(&self, obj_ref: ObjectRef<ResourceGroup>) -> Duration {
        {
            let read_guard = self.error_backoff_cache.read().await;
            if let Some(backoff) = read_guard.get(&obj_ref) {
                if let Some(duration) = backoff.write().await.next() {
                    return duration;
                }
            }
        }

        // Backoff policy: 1s, 2s, 4s, 8s, 16s, 32s, 60s, 60s...
        let mut backoff = ExponentialBuilder::default()
            .with_max_delay(ERROR_BACKOFF_MAX_DELAY)
            .without_max_times()
            .build();
        // safe unwrap: first backoff is always Some(Duration)
        let duration = backoff.next().unwrap();
        self.error_backoff_cache
            .write()
            .await
            .insert(obj_ref.clone(), RwLock::new(backoff));
        trace!(
            msg = "recreate backoff policy",
            namespace = obj_ref.namespace.as_deref().unwrap_or_default(),
            name = obj_ref.name,
        );
        duration
    }

    /// Reset the backoff policy for the given object
    pub async fn reset_backoff(&self, obj_ref: ObjectRef<ResourceGroup>) {
        let read_guard = self.error_backoff_cache.read().await;
        if read_guard.get(&obj_ref).is_some() {
            drop(read_guard);
            trace!(
                msg = "reset backoff policy",
                namespace = obj_ref.namespace.as_deref().unwrap_or_default(),
                name = obj_ref.name
            );
            self.error_backoff_cache.write().await.remove(&obj_ref);
        }
    }
}

pub async fn check_api_queryable<K>(client: Client) -> Api<K>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    let api = Api::<K>::all(client.clone());
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!(
            "{} is not queryable; {e:?}. Check controller permissions",
            short_type_name::<K>().unwrap_or("Unknown resource"),
        );
        std::process::exit(1);
    }
    api
}

pub fn error_policy(_obj: Arc<ResourceGroup>, _error: &Error, _ctx: Arc<Context>) -> Action {
    unreachable!("Handle in backoff_reconciler macro")
}

#[macro_export]
macro_rules! backoff_reconciler {
    ($inner_reconciler:ident) => {
        |obj, ctx| async move {
            match $inner_reconciler(obj.clone(), ctx.clone()).await {
                Ok(action) => {
                    ctx.reset_backoff(kube::runtime::reflector::ObjectRef::from(obj.as_ref()))
                        .await;
                    Ok(action)
                }
                Err(error) => {
                    // safe unwrap: ResourceGroup is namespace scoped
                    let namespace = kube::ResourceExt::namespace(obj.as_ref()).unwrap();
                    let name = kube::ResourceExt::name_any(obj.as_ref());
                    tracing::error!(msg = "failed reconciliation", %namespace, %name, %error);
                    ctx.metrics.reconcile_failure_inc();
                    let backoff_duration = ctx
                        .get_backoff(kube::runtime::reflector::ObjectRef::from(obj.as_ref()))
                        .await;
                    tracing::trace!(
                        msg = format!("backoff duration: {backoff_duration:?}"),
                        %namespace,
                        %name,
                    );
                    Ok(kube::runtime::controller::Action::requeue(backoff_duration))
                }
            }
        }
    };
}
