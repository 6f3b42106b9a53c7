//! Binary transcoder: a protobuf-compatible encoding used between query-serving
//! components and for cached partial results

mod decode;
mod encode;
mod wire;

use tracing::trace;

use crate::config::CodecConfig;
use crate::context::CallContext;
use crate::error::CodecResult;
use crate::model::QueryResponse;
use crate::negotiate::{Transcoder, WireFormat};

/// Converts query responses to and from `application/x-protobuf`
#[derive(Debug, Clone)]
pub struct BinaryTranscoder {
    cancel_check_interval: usize,
}

impl BinaryTranscoder {
    /// Create a new binary transcoder
    pub fn new(cancel_check_interval: usize) -> Self {
        Self {
            cancel_check_interval: cancel_check_interval.max(1),
        }
    }

    pub fn from_config(config: &CodecConfig) -> Self {
        Self::new(config.cancel_check_interval)
    }
}

impl Default for BinaryTranscoder {
    fn default() -> Self {
        Self::from_config(&CodecConfig::default())
    }
}

impl Transcoder for BinaryTranscoder {
    fn format(&self) -> WireFormat {
        WireFormat::Protobuf
    }

    fn decode(&self, body: &[u8], ctx: &CallContext) -> CodecResult<QueryResponse> {
        trace!("Decoding binary response, length: {}", body.len());
        let response = decode::decode(body, ctx, self.cancel_check_interval)?;
        trace!(
            "Decoded binary response: {} series, {} samples",
            response.series_count(),
            response.sample_count()
        );
        Ok(response)
    }

    fn encode(&self, response: &QueryResponse, ctx: &CallContext) -> CodecResult<Vec<u8>> {
        let body = encode::encode(response, ctx, self.cancel_check_interval)?;
        trace!(
            "Encoded binary response: {} series, {} bytes",
            response.series_count(),
            body.len()
        );
        Ok(body)
    }
}
