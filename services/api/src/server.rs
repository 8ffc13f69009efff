use crate::cli::ServeArgs;
use crate::infra::{AppState, TracingAlertPublisher};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use patron_card::config::AppConfig;
use patron_card::error::AppError;
use patron_card::patrons::{
    patron_router, AddressValidator, BarcodeStore, CardIssuanceService, IdentityGateway,
    IlsClient, InMemoryBarcodeStore, IssuanceSettings, PgBarcodeStore, ServiceObjectsClient,
};
use patron_card::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

fn issuance_router<S>(
    store: Arc<S>,
    gateway: Arc<dyn IdentityGateway>,
    addresses: Arc<dyn AddressValidator>,
    settings: IssuanceSettings,
) -> axum::Router
where
    S: BarcodeStore + 'static,
{
    let service = CardIssuanceService::new(
        gateway,
        addresses,
        store,
        Arc::new(TracingAlertPublisher),
        settings,
    );
    patron_router(Arc::new(service))
}

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

    let gateway: Arc<dyn IdentityGateway> = Arc::new(IlsClient::new(&config.ils)?);
    let addresses: Arc<dyn AddressValidator> =
        Arc::new(ServiceObjectsClient::new(&config.address_vendor)?);
    let settings = IssuanceSettings::from_config(&config);

    let patrons = match config.store.database_url.as_deref() {
        Some(url) => {
            let store = PgBarcodeStore::connect(url).await?;
            store.migrate().await?;
            info!("barcode ledger connected to postgres");
            issuance_router(Arc::new(store), gateway, addresses, settings)
        }
        None => {
            warn!("DATABASE_URL not set; barcode ledger is in memory and resets on restart");
            issuance_router(
                Arc::new(InMemoryBarcodeStore::new()),
                gateway,
                addresses,
                settings,
            )
        }
    };

    let app = with_operational_routes(patrons)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, ils = %config.ils.base_url, "patron card service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
