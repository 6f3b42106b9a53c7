//! Codec configuration

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};
use crate::negotiate::WireFormat;
use crate::time::TimestampStyle;
use crate::DEFAULT_MAX_RESPONSE_BYTES;

/// Settings shared by every transcoder in a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Largest body accepted on decode or released on encode, in bytes
    pub max_response_bytes: usize,

    /// Encoding used when the caller expresses no usable preference
    pub default_format: WireFormat,

    /// JSON timestamp rendering
    pub timestamp_style: TimestampStyle,

    /// Number of series processed between cancellation checks
    pub cancel_check_interval: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            default_format: WireFormat::Json,
            timestamp_style: TimestampStyle::Prometheus,
            cancel_check_interval: 256,
        }
    }
}

impl CodecConfig {
    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    pub fn with_default_format(mut self, format: WireFormat) -> Self {
        self.default_format = format;
        self
    }

    pub fn with_timestamp_style(mut self, style: TimestampStyle) -> Self {
        self.timestamp_style = style;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> CodecResult<()> {
        if self.max_response_bytes == 0 {
            return Err(CodecError::configuration(
                "max_response_bytes must be greater than 0",
            ));
        }

        if self.cancel_check_interval == 0 {
            return Err(CodecError::configuration(
                "cancel_check_interval must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CodecConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_format, WireFormat::Json);
        assert_eq!(config.max_response_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let config = CodecConfig::default().with_max_response_bytes(0);
        assert!(matches!(
            config.validate(),
            Err(CodecError::Configuration(_))
        ));

        let config = CodecConfig {
            cancel_check_interval: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_from_json() {
        let config: CodecConfig = serde_json::from_str(
            r#"{"max_response_bytes":1024,"default_format":"protobuf","timestamp_style":"fixed_millis","cancel_check_interval":8}"#,
        )
        .unwrap();
        assert_eq!(config.default_format, WireFormat::Protobuf);
        assert_eq!(config.timestamp_style, TimestampStyle::FixedMillis);
    }
}
