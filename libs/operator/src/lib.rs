pub mod controller;
pub mod error;
pub mod metrics;
pub mod prometheus_exporter;
pub mod resource_map;
pub mod resourcegroup;
pub mod root;
pub mod status;
pub mod telemetry;
pub mod throttler;
pub mod typeresolver;
pub mod watch;
