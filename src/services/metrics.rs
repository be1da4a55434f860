use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static DONATION_RECEIPTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static DONATION_AMOUNT_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static SEQUENCING_CONFLICTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

pub fn init_metrics() {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }

    let registry = Registry::new();

    let receipts_counter = IntCounterVec::new(
        Opts::new(
            "donation_receipts_total",
            "Receipts issued by ledger and payment method",
        ),
        &["ledger", "method"],
    )
    .expect("Failed to create donation_receipts_total metric");

    // Amounts in paise (smallest currency unit).
    let amount_counter = IntCounterVec::new(
        Opts::new(
            "donation_amount_total",
            "Completed donation amounts by ledger and method (in paise)",
        ),
        &["ledger", "method"],
    )
    .expect("Failed to create donation_amount_total metric");

    let conflicts_counter = IntCounterVec::new(
        Opts::new(
            "receipt_sequencing_conflicts_total",
            "Receipt id collisions retried by the sequencer",
        ),
        &["ledger"],
    )
    .expect("Failed to create receipt_sequencing_conflicts_total metric");

    registry
        .register(Box::new(receipts_counter.clone()))
        .expect("Failed to register donation_receipts_total");
    registry
        .register(Box::new(amount_counter.clone()))
        .expect("Failed to register donation_amount_total");
    registry
        .register(Box::new(conflicts_counter.clone()))
        .expect("Failed to register receipt_sequencing_conflicts_total");

    PROMETHEUS_REGISTRY
        .set(registry)
        .expect("Failed to set prometheus registry");
    DONATION_RECEIPTS_TOTAL
        .set(receipts_counter)
        .expect("Failed to set donation_receipts_total");
    DONATION_AMOUNT_TOTAL
        .set(amount_counter)
        .expect("Failed to set donation_amount_total");
    SEQUENCING_CONFLICTS_TOTAL
        .set(conflicts_counter)
        .expect("Failed to set receipt_sequencing_conflicts_total");
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

/// Record a receipt issuance.
pub fn record_receipt(ledger: &str, method: &str) {
    if let Some(counter) = DONATION_RECEIPTS_TOTAL.get() {
        counter.with_label_values(&[ledger, method]).inc();
    }
}

/// Record a completed donation amount (converted to paise).
pub fn record_amount(ledger: &str, method: &str, amount: f64) {
    if let Some(counter) = DONATION_AMOUNT_TOTAL.get() {
        counter
            .with_label_values(&[ledger, method])
            .inc_by((amount * 100.0) as u64);
    }
}

/// Record a retried receipt id collision.
pub fn record_sequencing_conflict(ledger: &str) {
    if let Some(counter) = SEQUENCING_CONFLICTS_TOTAL.get() {
        counter.with_label_values(&[ledger]).inc();
    }
}
