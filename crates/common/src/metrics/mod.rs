//! Metrics and observability utilities
//!
//! Prometheus-style counters and histograms with standardized naming.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all pipeline metrics
pub const METRICS_PREFIX: &str = "faturaforge";

/// Histogram buckets for pipeline stage latency (in seconds). Recognition
/// and extraction both sit in the seconds-to-minutes range.
pub const STAGE_BUCKETS: &[f64] = &[
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
    60.00, // 1m
    120.0, // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_invoices_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Invoices that finished processing, by outcome"
    );

    describe_histogram!(
        format!("{}_processing_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end invoice processing latency"
    );

    describe_counter!(
        format!("{}_extraction_attempts_total", METRICS_PREFIX),
        Unit::Count,
        "Language model extraction attempts, by status"
    );

    describe_counter!(
        format!("{}_exports_total", METRICS_PREFIX),
        Unit::Count,
        "Ledger export calls, by status"
    );

    describe_histogram!(
        format!("{}_export_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Ledger export latency"
    );

    describe_counter!(
        format!("{}_token_cache_total", METRICS_PREFIX),
        Unit::Count,
        "Ledger token cache lookups, by result"
    );

    tracing::info!("Metrics registered");
}

/// Record a finished processing job
pub fn record_processing(duration_secs: f64, outcome: &str) {
    counter!(
        format!("{}_invoices_processed_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_processing_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Record a single extraction attempt
pub fn record_extraction_attempt(success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_extraction_attempts_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a ledger export call
pub fn record_export(duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_exports_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(format!("{}_export_duration_seconds", METRICS_PREFIX)).record(duration_secs);
    }
}

/// Record a ledger token cache lookup
pub fn record_token_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };

    counter!(
        format!("{}_token_cache_total", METRICS_PREFIX),
        "result" => result.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in STAGE_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recorders_run() {
        record_processing(1.5, "completed");
        record_extraction_attempt(true);
        record_export(0.4, false);
        record_token_cache(true);
        // Just verify they run without panic
    }
}
