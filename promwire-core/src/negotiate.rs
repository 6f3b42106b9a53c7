//! Format negotiation and the transcoder registry
//!
//! Decoding picks a transcoder strictly from `Content-Type`. Encoding reads the
//! `Accept` list and falls back to the configured default format whenever nothing
//! usable is requested.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::binary::BinaryTranscoder;
use crate::config::CodecConfig;
use crate::context::CallContext;
use crate::error::{CodecError, CodecResult};
use crate::json::JsonTranscoder;
use crate::model::QueryResponse;
use crate::{APPLICATION_JSON, APPLICATION_PROTOBUF};

/// Wire encodings known to the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    Json,
    Protobuf,
}

impl WireFormat {
    pub fn media_type(&self) -> &'static str {
        match self {
            WireFormat::Json => APPLICATION_JSON,
            WireFormat::Protobuf => APPLICATION_PROTOBUF,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::Protobuf => "protobuf",
        }
    }

    /// Look up a format by media type, ignoring parameters and ASCII case
    pub fn from_media_type(value: &str) -> Option<Self> {
        let essence = media_type_essence(value);
        [WireFormat::Json, WireFormat::Protobuf]
            .into_iter()
            .find(|format| format.media_type().eq_ignore_ascii_case(essence))
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "protobuf" | "proto" | "binary" => Ok(WireFormat::Protobuf),
            other => WireFormat::from_media_type(other)
                .ok_or_else(|| CodecError::unsupported(format!("unknown format '{}'", other))),
        }
    }
}

/// Media type with parameters stripped, e.g. `application/json; charset=utf-8` -> `application/json`
pub fn media_type_essence(value: &str) -> &str {
    value.split(';').next().unwrap_or_default().trim()
}

/// Converts between the canonical result model and one wire encoding
pub trait Transcoder: Send + Sync + fmt::Debug {
    /// The encoding this transcoder handles
    fn format(&self) -> WireFormat;

    /// Media type written to `Content-Type` on encode
    fn media_type(&self) -> &'static str {
        self.format().media_type()
    }

    /// Parse a complete body
    fn decode(&self, body: &[u8], ctx: &CallContext) -> CodecResult<QueryResponse>;

    /// Serialize a response. Nothing is returned unless the whole body was produced.
    fn encode(&self, response: &QueryResponse, ctx: &CallContext) -> CodecResult<Vec<u8>>;
}

/// An encoded body and the media type it was produced in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody {
    pub format: WireFormat,
    pub media_type: &'static str,
    pub body: Vec<u8>,
}

/// Immutable set of transcoders built once from configuration
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    transcoders: Vec<Arc<dyn Transcoder>>,
    default_index: usize,
    default_format: WireFormat,
    max_response_bytes: usize,
}

impl CodecRegistry {
    /// Build a registry holding the JSON and binary transcoders
    pub fn new(config: &CodecConfig) -> CodecResult<Self> {
        Self::with_transcoders(
            config,
            vec![
                Arc::new(JsonTranscoder::from_config(config)) as Arc<dyn Transcoder>,
                Arc::new(BinaryTranscoder::from_config(config)),
            ],
        )
    }

    /// Build a registry from explicit transcoders, one per format
    pub fn with_transcoders(
        config: &CodecConfig,
        transcoders: Vec<Arc<dyn Transcoder>>,
    ) -> CodecResult<Self> {
        config.validate()?;

        for (i, transcoder) in transcoders.iter().enumerate() {
            if transcoders[..i]
                .iter()
                .any(|earlier| earlier.format() == transcoder.format())
            {
                return Err(CodecError::configuration(format!(
                    "format '{}' is registered twice",
                    transcoder.format()
                )));
            }
        }

        let default_index = transcoders
            .iter()
            .position(|t| t.format() == config.default_format)
            .ok_or_else(|| {
                CodecError::configuration(format!(
                    "default format '{}' has no registered transcoder",
                    config.default_format
                ))
            })?;

        Ok(Self {
            transcoders,
            default_index,
            default_format: config.default_format,
            max_response_bytes: config.max_response_bytes,
        })
    }

    pub fn default_format(&self) -> WireFormat {
        self.default_format
    }

    pub fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }

    /// Registered formats in registration order
    pub fn formats(&self) -> impl Iterator<Item = WireFormat> + '_ {
        self.transcoders.iter().map(|t| t.format())
    }

    pub fn get(&self, format: WireFormat) -> Option<&dyn Transcoder> {
        self.transcoders
            .iter()
            .find(|t| t.format() == format)
            .map(|t| t.as_ref())
    }

    fn default_transcoder(&self) -> &dyn Transcoder {
        self.transcoders[self.default_index].as_ref()
    }

    fn by_media_type(&self, value: &str) -> Option<&dyn Transcoder> {
        let essence = media_type_essence(value);
        self.transcoders
            .iter()
            .find(|t| t.media_type().eq_ignore_ascii_case(essence))
            .map(|t| t.as_ref())
    }

    /// Pick the decoder for a `Content-Type` value. Missing or unknown types are errors.
    pub fn select_decoder(&self, content_type: Option<&str>) -> CodecResult<&dyn Transcoder> {
        let content_type = content_type
            .filter(|value| !media_type_essence(value).is_empty())
            .ok_or_else(|| CodecError::unsupported("missing Content-Type"))?;

        self.by_media_type(content_type).ok_or_else(|| {
            CodecError::unsupported(format!("no decoder for Content-Type '{}'", content_type))
        })
    }

    /// Pick the encoder for an `Accept` value, falling back to `default`.
    ///
    /// The registered media type with the highest q-value wins, ties go to the earlier
    /// entry, `q=0` entries are ignored, and `*/*` or `application/*` mean `default`.
    pub fn select_encoder(&self, accept: Option<&str>, default: WireFormat) -> &dyn Transcoder {
        let fallback = self.get(default).unwrap_or_else(|| self.default_transcoder());

        let Some(accept) = accept else {
            return fallback;
        };

        let mut best: Option<(f32, &dyn Transcoder)> = None;
        for range in parse_accept(accept) {
            let candidate = if range.essence == "*/*"
                || range.essence.eq_ignore_ascii_case("application/*")
            {
                Some(fallback)
            } else {
                self.by_media_type(range.essence)
            };

            if let Some(transcoder) = candidate {
                if best.map_or(true, |(q, _)| range.quality > q) {
                    best = Some((range.quality, transcoder));
                }
            }
        }

        match best {
            Some((_, transcoder)) => transcoder,
            None => {
                debug!(
                    "No registered media type in Accept '{}', using {}",
                    accept,
                    fallback.media_type()
                );
                fallback
            }
        }
    }

    /// Pick the encoder for an `Accept` value using the configured default
    pub fn encoder_for(&self, accept: Option<&str>) -> &dyn Transcoder {
        self.select_encoder(accept, self.default_format)
    }

    /// Decode an in-memory body, enforcing the size cap before any parsing
    pub fn decode(
        &self,
        content_type: Option<&str>,
        body: &[u8],
        ctx: &CallContext,
    ) -> CodecResult<QueryResponse> {
        let transcoder = self.select_decoder(content_type)?;
        if body.len() > self.max_response_bytes {
            return Err(CodecError::too_large(
                self.max_response_bytes,
                body.len() as u64,
            ));
        }
        transcoder.decode(body, ctx)
    }

    /// Encode a response in the format negotiated from `accept`
    pub fn encode(
        &self,
        accept: Option<&str>,
        response: &QueryResponse,
        ctx: &CallContext,
    ) -> CodecResult<EncodedBody> {
        let transcoder = self.encoder_for(accept);
        let body = transcoder.encode(response, ctx)?;
        if body.len() > self.max_response_bytes {
            return Err(CodecError::too_large(
                self.max_response_bytes,
                body.len() as u64,
            ));
        }
        Ok(EncodedBody {
            format: transcoder.format(),
            media_type: transcoder.media_type(),
            body,
        })
    }
}

struct MediaRange<'a> {
    essence: &'a str,
    quality: f32,
}

fn parse_accept(header: &str) -> Vec<MediaRange<'_>> {
    let mut ranges = Vec::new();
    for item in header.split(',') {
        let mut parts = item.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        if essence.is_empty() {
            continue;
        }

        let mut quality = 1.0f32;
        for param in parts {
            if let Some((name, value)) = param.split_once('=') {
                if name.trim().eq_ignore_ascii_case("q") {
                    quality = value.trim().parse().unwrap_or(0.0);
                }
            }
        }

        if quality > 0.0 {
            ranges.push(MediaRange { essence, quality });
        }
    }
    ranges
}
