//! Metrics and observability utilities
//!
//! Metric names share the `lingoforge_` prefix. Recording goes through the
//! `metrics` facade, so nothing is exported unless a binary installs a
//! recorder (the indexer worker installs the Prometheus exporter).

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all LingoForge metrics
pub const METRICS_PREFIX: &str = "lingoforge";

/// Buckets for in-process and index latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00,
];

/// Buckets for model invocation latency; answers take seconds, not millis
pub const MODEL_BUCKETS: &[f64] = &[
    0.250, 0.500, 1.000, 2.000, 5.000, 10.00, 20.00, 30.00, 60.00, 120.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        Unit::Count,
        "Retrievals, labelled by whether they degraded"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end retrieval latency in seconds"
    );

    describe_counter!(
        format!("{}_retrieved_passages_total", METRICS_PREFIX),
        Unit::Count,
        "Context passages handed to prompt assembly"
    );

    describe_counter!(
        format!("{}_metadata_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Index matches with no metadata record"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding errors"
    );

    describe_counter!(
        format!("{}_model_invocations_total", METRICS_PREFIX),
        Unit::Count,
        "Language model calls, labelled by outcome"
    );

    describe_histogram!(
        format!("{}_model_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Language model latency in seconds"
    );

    describe_counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Documents written to both stores"
    );

    describe_histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Ingest latency in seconds"
    );

    describe_counter!(
        format!("{}_ingestion_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Ingest calls that failed, labelled by error code"
    );

    describe_counter!(
        format!("{}_interaction_log_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Interaction or feedback writes that were dropped"
    );

    describe_counter!(
        format!("{}_queue_messages_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Ingest queue messages handled, labelled by status"
    );

    tracing::info!("Metrics registered");
}

/// Record one retrieval
pub fn record_retrieval(duration_secs: f64, passages: usize, degraded: bool) {
    let degraded = if degraded { "true" } else { "false" };

    counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        "degraded" => degraded
    )
    .increment(1);

    histogram!(format!("{}_retrieval_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    counter!(format!("{}_retrieved_passages_total", METRICS_PREFIX)).increment(passages as u64);
}

/// Record index matches that had no metadata record
pub fn record_metadata_misses(count: usize) {
    if count > 0 {
        counter!(format!("{}_metadata_misses_total", METRICS_PREFIX)).increment(count as u64);
    }
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(batch_size.max(1) as u64);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Record one language model call. `outcome` is "success" or an error code.
pub fn record_model_invocation(duration_secs: f64, model_id: &str, outcome: &str) {
    counter!(
        format!("{}_model_invocations_total", METRICS_PREFIX),
        "model" => model_id.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_model_duration_seconds", METRICS_PREFIX),
        "model" => model_id.to_string()
    )
    .record(duration_secs);
}

/// Helper to record ingestion metrics
pub fn record_ingestion(duration_secs: f64, documents: usize, namespace: &str) {
    counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        "namespace" => namespace.to_string()
    )
    .increment(documents as u64);

    histogram!(format!("{}_ingestion_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

pub fn record_ingestion_failure(code: &str) {
    counter!(
        format!("{}_ingestion_failures_total", METRICS_PREFIX),
        "code" => code.to_string()
    )
    .increment(1);
}

pub fn record_interaction_log_failure(kind: &str) {
    counter!(
        format!("{}_interaction_log_failures_total", METRICS_PREFIX),
        "kind" => kind.to_string()
    )
    .increment(1);
}

pub fn record_queue_message(status: &str) {
    counter!(
        format!("{}_queue_messages_processed_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_are_sorted() {
        for buckets in [LATENCY_BUCKETS, MODEL_BUCKETS] {
            assert!(buckets.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every helper is a no-op
        register_metrics();
        record_retrieval(0.01, 3, false);
        record_metadata_misses(1);
        record_model_invocation(1.5, "mock", "success");
        record_ingestion(0.2, 4, "default");
        record_interaction_log_failure("interaction");
    }
}
