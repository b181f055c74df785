use resourcegroup_k8s_util::client::new_client_with_metrics;
use resourcegroup_operator::controller::{group_event_channel, State as ControllerState};
use resourcegroup_operator::metrics::Metrics;
use resourcegroup_operator::resource_map::ResourceMap;
use resourcegroup_operator::throttler::Throttler;
use resourcegroup_operator::typeresolver::TypeResolver;
use resourcegroup_operator::watch::WatchManager;
use resourcegroup_operator::{resourcegroup, root, telemetry, watch};

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, Router};
use axum::Json;
use clap::Parser;
use kube::Config;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tracing::{info, warn};

async fn metrics(State(state): State<ControllerState>) -> impl IntoResponse {
    match state.metrics() {
        Ok(metrics) => (
            StatusCode::OK,
            [(
                "content-type",
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            metrics,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to get metrics: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    Json("healthy")
}

#[derive(Parser, Debug)]
#[command(name = "resourcegroup-controller", about, version)]
struct Args {
    /// The address the metric endpoint binds to.
    #[arg(long, default_value = ":8080", env)]
    metrics_addr: String,

    /// Enable leader election for the controller manager. Enabling this will
    /// ensure there is only one active controller manager; the election
    /// itself is provided by the hosting deployment.
    #[arg(long, env)]
    enable_leader_election: bool,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`.
    /// Example: "info,kube=warn"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// Minimum seconds between status reconciles triggered by a single
    /// group's object events.
    #[arg(long, default_value_t = 30, env)]
    status_throttle_secs: u64,

    /// Concurrent workers for the spec (root) controller.
    #[arg(long, default_value_t = 2, env)]
    root_workers: u16,

    /// Concurrent workers for the status controller.
    #[arg(long, default_value_t = 4, env)]
    status_workers: u16,
}

/// Accept the conventional ":8080" shorthand for an all-interfaces bind.
fn listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(&args.log_filter, args.log_format)?;
    if args.enable_leader_election {
        info!(msg = "leader election is delegated to the hosting deployment");
    }

    let mut registry = Registry::with_prefix("resourcegroup");
    let config = Config::infer().await?;
    let client = new_client_with_metrics(config, &mut registry).await?;

    let controllers = [
        root::CONTROLLER_ID,
        resourcegroup::CONTROLLER_ID,
        watch::CONTROLLER_ID,
    ];
    let metrics_families = Metrics::new(&mut registry, &controllers);
    let watch_metrics = metrics_families
        .controllers
        .get(watch::CONTROLLER_ID)
        .expect("all CONTROLLER_IDs have to be registered")
        .clone();

    let resource_map = Arc::new(ResourceMap::default());
    let resolver = TypeResolver::new(client.clone());
    if let Err(e) = resolver.refresh().await {
        warn!(msg = "initial API discovery failed, kinds resolve on demand", %e);
    }

    let (events, event_stream) = group_event_channel();
    let throttler = Arc::new(Throttler::new(
        Duration::from_secs(args.status_throttle_secs),
        events.clone(),
    ));
    let watches = WatchManager::new(
        client.clone(),
        resolver.clone(),
        resource_map.clone(),
        throttler,
        watch_metrics,
    );

    let state = ControllerState::new(
        registry,
        metrics_families,
        resource_map,
        resolver,
        watches,
        events,
    );

    let root_controller = root::run(state.clone(), client.clone(), args.root_workers);
    let status_controller =
        resourcegroup::run(state.clone(), client, args.status_workers, event_stream);

    let app = Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state.clone());

    let listener = TcpListener::bind(listen_addr(&args.metrics_addr)).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    tokio::join!(root_controller, status_controller, server).2?;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
}
