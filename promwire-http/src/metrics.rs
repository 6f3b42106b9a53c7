//! Codec Metrics
//!
//! Counters and histograms for decode and encode calls made through the assembler,
//! broken down by wire format and outcome.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use promwire_core::CodecError;
use std::time::Duration;

/// Label used when a call failed before a wire format was chosen
pub const UNKNOWN_FORMAT: &str = "unknown";

/// Which side of the codec a measurement belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Decode,
    Encode,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Decode => "decode",
            Operation::Encode => "encode",
        }
    }
}

/// Prometheus metrics for codec calls
#[derive(Debug, Clone)]
pub struct CodecMetrics {
    /// Calls by operation, format and outcome (`success` or an error category)
    pub operations_total: IntCounterVec,

    /// Call duration by operation and format
    pub duration_seconds: HistogramVec,

    /// Body size by operation and format
    pub body_size_bytes: HistogramVec,

    /// Samples decoded or encoded
    pub samples_total: IntCounterVec,

    /// Non-2xx upstream responses by status class
    pub upstream_errors_total: IntCounterVec,
}

impl CodecMetrics {
    /// Create the metrics and register them in `registry`
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let operations_total = IntCounterVec::new(
            Opts::new(
                "promwire_codec_operations_total",
                "Total number of codec operations",
            ),
            &["operation", "format", "outcome"],
        )?;

        let duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "promwire_codec_duration_seconds",
                "Time spent decoding or encoding a response",
            ),
            &["operation", "format"],
        )?;

        let body_size_bytes = HistogramVec::new(
            HistogramOpts::new(
                "promwire_codec_body_size_bytes",
                "Size of decoded or encoded response bodies",
            )
            .buckets(prometheus::exponential_buckets(1024.0, 4.0, 10)?),
            &["operation", "format"],
        )?;

        let samples_total = IntCounterVec::new(
            Opts::new(
                "promwire_codec_samples_total",
                "Total number of samples decoded or encoded",
            ),
            &["operation", "format"],
        )?;

        let upstream_errors_total = IntCounterVec::new(
            Opts::new(
                "promwire_upstream_errors_total",
                "Total number of non-2xx upstream responses",
            ),
            &["status_class"],
        )?;

        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(duration_seconds.clone()))?;
        registry.register(Box::new(body_size_bytes.clone()))?;
        registry.register(Box::new(samples_total.clone()))?;
        registry.register(Box::new(upstream_errors_total.clone()))?;

        Ok(Self {
            operations_total,
            duration_seconds,
            body_size_bytes,
            samples_total,
            upstream_errors_total,
        })
    }

    /// Record a completed call
    pub fn record_success(
        &self,
        operation: Operation,
        format: &str,
        duration: Duration,
        body_bytes: usize,
        samples: usize,
    ) {
        let op = operation.as_str();
        self.operations_total
            .with_label_values(&[op, format, "success"])
            .inc();
        self.duration_seconds
            .with_label_values(&[op, format])
            .observe(duration.as_secs_f64());
        self.body_size_bytes
            .with_label_values(&[op, format])
            .observe(body_bytes as f64);
        self.samples_total
            .with_label_values(&[op, format])
            .inc_by(samples as u64);
    }

    /// Record a failed call
    pub fn record_failure(&self, operation: Operation, format: &str, error: &CodecError) {
        self.operations_total
            .with_label_values(&[operation.as_str(), format, error.category()])
            .inc();

        if let CodecError::Upstream { status, .. } = error {
            let class = match status {
                400..=499 => "4xx",
                500..=599 => "5xx",
                _ => "other",
            };
            self.upstream_errors_total.with_label_values(&[class]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn test_metrics_register_and_record() {
        let registry = Registry::new();
        let metrics = CodecMetrics::new(&registry).unwrap();

        metrics.record_success(Operation::Decode, "json", Duration::from_millis(3), 2048, 6);
        metrics.record_failure(
            Operation::Decode,
            UNKNOWN_FORMAT,
            &CodecError::Upstream {
                status: 503,
                error_type: None,
                message: "unavailable".to_string(),
            },
        );

        assert_eq!(
            metrics
                .operations_total
                .with_label_values(&["decode", "json", "success"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .samples_total
                .with_label_values(&["decode", "json"])
                .get(),
            6
        );
        assert_eq!(
            metrics.upstream_errors_total.with_label_values(&["5xx"]).get(),
            1
        );

        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("promwire_codec_operations_total"));
        assert!(text.contains("outcome=\"upstream\""));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        assert!(CodecMetrics::new(&registry).is_ok());
        assert!(CodecMetrics::new(&registry).is_err());
    }
}
