use crate::controller::ControllerId;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ControllerLabels {
    controller: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct TriggeredLabels {
    controller: String,
    action: String,
    kind: String,
}

#[derive(Clone, Copy, Debug)]
pub enum Action {
    Apply,
    Delete,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Action::Apply => "apply",
            Action::Delete => "delete",
        }
    }
}

#[derive(Clone)]
pub struct Metrics {
    pub controllers: HashMap<ControllerId, Arc<ControllerMetrics>>,
}

impl Metrics {
    pub fn new(registry: &mut Registry, controller_ids: &[ControllerId]) -> Self {
        let reconcile_operations = Family::<ControllerLabels, Counter>::default();
        registry.register(
            "reconcile_operations",
            "Number of reconcile invocations",
            reconcile_operations.clone(),
        );

        let reconcile_failures = Family::<ControllerLabels, Counter>::default();
        registry.register(
            "reconcile_failures",
            "Number of reconcile invocations that returned an error",
            reconcile_failures.clone(),
        );

        let reconcile_duration = Family::<ControllerLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.005, 2.0, 12))
        });
        registry.register(
            "reconcile_duration_seconds",
            "Reconcile duration in seconds",
            reconcile_duration.clone(),
        );

        let triggered = Family::<TriggeredLabels, Counter>::default();
        registry.register(
            "triggered",
            "Number of object events that triggered a group reconcile",
            triggered.clone(),
        );

        let watch_operations_failed = Family::<ControllerLabels, Counter>::default();
        registry.register(
            "watch_operations_failed",
            "Total number of watch operations that failed",
            watch_operations_failed.clone(),
        );

        let status_update_errors = Family::<ControllerLabels, Counter>::default();
        registry.register(
            "status_update_errors",
            "Number of errors that occurred during update operations to status subresources",
            status_update_errors.clone(),
        );

        let active_watches = Family::<ControllerLabels, Gauge>::default();
        registry.register(
            "active_watches",
            "Number of kinds currently being watched",
            active_watches.clone(),
        );

        let ready = Family::<ControllerLabels, Gauge>::default();
        registry.register(
            "ready",
            "1 when the controller is ready to reconcile resources, 0 otherwise",
            ready.clone(),
        );

        let controllers = controller_ids
            .iter()
            .map(|&id| {
                (
                    id,
                    Arc::new(ControllerMetrics {
                        labels: ControllerLabels {
                            controller: id.to_string(),
                        },
                        controller: id,
                        reconcile_operations: reconcile_operations.clone(),
                        reconcile_failures: reconcile_failures.clone(),
                        reconcile_duration: reconcile_duration.clone(),
                        triggered: triggered.clone(),
                        watch_operations_failed: watch_operations_failed.clone(),
                        status_update_errors: status_update_errors.clone(),
                        active_watches: active_watches.clone(),
                        ready: ready.clone(),
                    }),
                )
            })
            .collect::<HashMap<ControllerId, Arc<ControllerMetrics>>>();

        Self { controllers }
    }
}

#[derive(Clone)]
pub struct ControllerMetrics {
    labels: ControllerLabels,
    controller: ControllerId,
    reconcile_operations: Family<ControllerLabels, Counter>,
    reconcile_failures: Family<ControllerLabels, Counter>,
    reconcile_duration: Family<ControllerLabels, Histogram>,
    triggered: Family<TriggeredLabels, Counter>,
    watch_operations_failed: Family<ControllerLabels, Counter>,
    status_update_errors: Family<ControllerLabels, Counter>,
    active_watches: Family<ControllerLabels, Gauge>,
    ready: Family<ControllerLabels, Gauge>,
}

impl ControllerMetrics {
    pub fn reconcile_count_and_measure(&self) -> ReconcileMeasurer {
        self.reconcile_operations.get_or_create(&self.labels).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            labels: self.labels.clone(),
            metric: self.reconcile_duration.clone(),
        }
    }

    pub fn reconcile_failure_inc(&self) {
        self.reconcile_failures.get_or_create(&self.labels).inc();
    }

    pub fn triggered_inc(&self, action: Action, kind: &str) {
        self.triggered
            .get_or_create(&TriggeredLabels {
                controller: self.controller.to_string(),
                action: action.as_str().to_string(),
                kind: kind.to_string(),
            })
            .inc();
    }

    pub fn watch_operations_failed_inc(&self) {
        self.watch_operations_failed
            .get_or_create(&self.labels)
            .inc();
    }

    pub fn status_update_errors_inc(&self) {
        self.status_update_errors.get_or_create(&self.labels).inc();
    }

    pub fn active_watches_set(&self, count: i64) {
        self.active_watches.get_or_create(&self.labels).set(count);
    }

    pub fn ready_set(&self, ready: i64) {
        self.ready.get_or_create(&self.labels).set(ready);
    }
}

/// Observes the reconcile duration when dropped.
pub struct ReconcileMeasurer {
    start: Instant,
    labels: ControllerLabels,
    metric: Family<ControllerLabels, Histogram>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metric.get_or_create(&self.labels).observe(duration);
    }
}
