//! Prediction metrics registered in the default Prometheus registry and served on `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts};
use std::time::Duration;

pub struct PredictionMetrics {
    pub predictions_total: IntCounterVec,
    pub latency_ms: Histogram,
}

pub static PREDICTION_METRICS: Lazy<PredictionMetrics> = Lazy::new(|| {
    let predictions_total = IntCounterVec::new(
        Opts::new("energy_predictions_total", "Prediction requests by outcome (ok, validation_error, model_error)"),
        &["outcome"],
    ).expect("static counter definition");
    let latency_ms = Histogram::with_opts(
        HistogramOpts::new("energy_prediction_latency_ms", "End-to-end prediction latency in milliseconds")
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0]),
    ).expect("static histogram definition");
    let registry = prometheus::default_registry();
    if let Err(e) = registry.register(Box::new(predictions_total.clone())) {
        tracing::warn!(error=?e, "predictions counter not registered");
    }
    if let Err(e) = registry.register(Box::new(latency_ms.clone())) {
        tracing::warn!(error=?e, "latency histogram not registered");
    }
    PredictionMetrics { predictions_total, latency_ms }
});

pub fn record_prediction(outcome: &str, elapsed: Duration) {
    PREDICTION_METRICS.predictions_total.with_label_values(&[outcome]).inc();
    PREDICTION_METRICS.latency_ms.observe(elapsed.as_secs_f64() * 1000.0);
}
