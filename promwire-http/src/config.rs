use anyhow::Result;
use promwire_core::{CodecConfig, TimestampStyle, WireFormat};
use serde::{Deserialize, Serialize};
use std::env;

/// Configuration for the response assembler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Codec settings shared with the transcoders
    pub codec: CodecConfig,

    /// How much of a non-2xx body is read to classify the failure
    pub max_error_body_bytes: usize,

    /// Accept `Content-Encoding: gzip` on decode
    pub decode_gzip: bool,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            codec: CodecConfig::default(),
            max_error_body_bytes: 64 * 1024,
            decode_gzip: true,
        }
    }
}

impl AssemblerConfig {
    /// Load configuration from environment variables and defaults
    pub fn load() -> Result<Self> {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Load configuration using `lookup` in place of the process environment
    pub fn load_from<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(max_bytes) = lookup("PROMWIRE_MAX_RESPONSE_BYTES") {
            config.codec.max_response_bytes = max_bytes.parse()?;
        }

        if let Some(format) = lookup("PROMWIRE_DEFAULT_FORMAT") {
            config.codec.default_format = format.parse::<WireFormat>()?;
        }

        if let Some(style) = lookup("PROMWIRE_TIMESTAMP_STYLE") {
            config.codec.timestamp_style = TimestampStyle::parse(&style)?;
        }

        if let Some(interval) = lookup("PROMWIRE_CANCEL_CHECK_INTERVAL") {
            config.codec.cancel_check_interval = interval.parse()?;
        }

        if let Some(max_error_bytes) = lookup("PROMWIRE_MAX_ERROR_BODY_BYTES") {
            config.max_error_body_bytes = max_error_bytes.parse()?;
        }

        if let Some(decode_gzip) = lookup("PROMWIRE_DECODE_GZIP") {
            config.decode_gzip = decode_gzip.parse()?;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.codec.validate()?;

        if self.max_error_body_bytes == 0 {
            return Err(anyhow::anyhow!("Max error body size must be greater than 0"));
        }

        Ok(())
    }
}
