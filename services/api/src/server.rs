use crate::cli::ServeArgs;
use crate::infra::{
    AppState, InMemoryAgencyDirectory, InMemoryAppointmentRepository, InMemoryNotifier,
    InMemoryPropertyCatalog,
};
use crate::routes::with_scheduling_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;
use visit_scheduler::config::AppConfig;
use visit_scheduler::error::AppError;
use visit_scheduler::scheduling::SchedulingService;
use visit_scheduler::telemetry;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let scheduling_service = Arc::new(SchedulingService::new(
        Arc::new(InMemoryAppointmentRepository::default()),
        Arc::new(InMemoryNotifier::default()),
        Box::new(InMemoryAgencyDirectory::seeded()),
        Box::new(InMemoryPropertyCatalog::default()),
        config.scheduling,
    )?);

    let app = with_scheduling_routes(scheduling_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        slot_minutes = config.scheduling.slot_minutes,
        "visit scheduler ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
