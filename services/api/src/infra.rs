use metrics_exporter_prometheus::PrometheusHandle;
use patron_card::patrons::{AlertError, AlertPublisher, SupplyAlert};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Emits low-supply alerts as structured warnings for the log pipeline to route.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TracingAlertPublisher;

impl AlertPublisher for TracingAlertPublisher {
    fn publish(&self, alert: SupplyAlert) -> Result<(), AlertError> {
        warn!(
            template = %alert.template,
            family = %alert.family_prefix,
            remaining = alert.remaining,
            details = ?alert.details,
            "barcode supply alert"
        );
        Ok(())
    }
}
