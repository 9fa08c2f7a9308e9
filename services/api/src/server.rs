use crate::cli::ServeArgs;
use crate::infra::{seed_demo_portfolio, AppState};
use crate::routes::with_tenancy_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tenancy_core::config::AppConfig;
use tenancy_core::error::AppError;
use tenancy_core::telemetry;
use tenancy_core::tenancy::{
    InMemoryStore, TenancyLifecycleService, TenancyStores, TracingChangeFeed, WorkflowSettings,
};
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let stores = TenancyStores::shared(Arc::new(InMemoryStore::new()));
    if args.seed_demo_data {
        seed_demo_portfolio(&stores).await?;
        info!("sample portfolio loaded");
    }

    let settings = WorkflowSettings::from(&config.tenancy);
    let service = Arc::new(TenancyLifecycleService::new(
        stores,
        Arc::new(TracingChangeFeed),
        settings,
    ));

    let app = with_tenancy_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, lease_days = settings.lease_days, "tenancy lifecycle service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
