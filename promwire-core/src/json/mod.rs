//! JSON transcoder for the public Prometheus HTTP API response format

mod decode;
mod encode;

pub(crate) use decode::{decode_scalar, decode_string, push_sample_stats_member};
pub(crate) use encode::write_steps;

/// Member names of the counters inside `stats.samples`
pub(crate) const TOTAL_QUERYABLE_SAMPLES: &str = "totalQueryableSamples";
pub(crate) const TOTAL_QUERYABLE_SAMPLES_PER_STEP: &str = "totalQueryableSamplesPerStep";
pub(crate) const PEAK_SAMPLES: &str = "peakSamples";

use tracing::trace;

use crate::config::CodecConfig;
use crate::context::CallContext;
use crate::error::CodecResult;
use crate::model::QueryResponse;
use crate::negotiate::{Transcoder, WireFormat};
use crate::time::TimestampStyle;

/// Converts query responses to and from `application/json`
#[derive(Debug, Clone)]
pub struct JsonTranscoder {
    /// Timestamp rendering used when encoding
    timestamp_style: TimestampStyle,
    /// Series between cancellation checks
    cancel_check_interval: usize,
}

impl JsonTranscoder {
    /// Create a new JSON transcoder
    pub fn new(timestamp_style: TimestampStyle, cancel_check_interval: usize) -> Self {
        Self {
            timestamp_style,
            cancel_check_interval: cancel_check_interval.max(1),
        }
    }

    pub fn from_config(config: &CodecConfig) -> Self {
        Self::new(config.timestamp_style, config.cancel_check_interval)
    }

    pub fn timestamp_style(&self) -> TimestampStyle {
        self.timestamp_style
    }
}

impl Default for JsonTranscoder {
    fn default() -> Self {
        Self::from_config(&CodecConfig::default())
    }
}

impl Transcoder for JsonTranscoder {
    fn format(&self) -> WireFormat {
        WireFormat::Json
    }

    fn decode(&self, body: &[u8], ctx: &CallContext) -> CodecResult<QueryResponse> {
        trace!("Decoding JSON response, length: {}", body.len());
        let response = decode::decode(body, ctx, self.cancel_check_interval)?;
        trace!(
            "Decoded JSON response: {} series, {} samples",
            response.series_count(),
            response.sample_count()
        );
        Ok(response)
    }

    fn encode(&self, response: &QueryResponse, ctx: &CallContext) -> CodecResult<Vec<u8>> {
        let body = encode::encode(
            response,
            ctx,
            self.timestamp_style,
            self.cancel_check_interval,
        )?;
        trace!(
            "Encoded JSON response: {} series, {} bytes",
            response.series_count(),
            body.len()
        );
        Ok(body)
    }
}
