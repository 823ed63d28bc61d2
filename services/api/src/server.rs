use crate::cli::ServeArgs;
use crate::infra::{AppState, SeedData, TracingAuditLog, TracingNotifier};
use crate::routes::with_application_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use review_routing::config::AppConfig;
use review_routing::error::AppError;
use review_routing::telemetry;
use review_routing::workflows::review::{
    MemoryDirectory, MemoryWorkflowRepository, RuleBasedEligibility, SideEffectQueue,
    WorkflowEngine,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(seed) = args.seed.take() {
        config.workflow.seed_path = Some(seed);
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let repository = Arc::new(MemoryWorkflowRepository::default());
    let directory = Arc::new(MemoryDirectory::default());
    let seed = match &config.workflow.seed_path {
        Some(path) => {
            info!(path = %path.display(), "loading workflow seed data");
            SeedData::load(path)?
        }
        None => {
            warn!("WORKFLOW_SEED_PATH not set; starting with demo seed data");
            SeedData::demo()
        }
    };
    seed.apply(&repository, &directory)?;

    let (side_effects, _worker) = SideEffectQueue::spawn(
        Arc::new(TracingNotifier),
        Arc::new(RuleBasedEligibility::new()),
        config.workflow.queue_capacity,
    );
    let engine = Arc::new(WorkflowEngine::new(
        repository,
        directory,
        Arc::new(TracingAuditLog),
        side_effects,
        config.workflow.clone(),
    ));

    let app = with_application_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        strict_step_order = config.workflow.strict_step_order,
        "review routing service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
