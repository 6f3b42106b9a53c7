//! Error types for codec operations

use thiserror::Error;

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Failure conditions raised while decoding, encoding or building query results
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed body: {0}")]
    MalformedBody(String),

    #[error("Response too large: {observed} bytes exceeds the configured limit of {limit} bytes")]
    ResponseTooLarge { limit: usize, observed: u64 },

    #[error("Truncated body: {0}")]
    Truncated(String),

    #[error("Malformed result: {0}")]
    MalformedResult(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Upstream responded with status {status}: {message}")]
    Upstream {
        status: u16,
        error_type: Option<String>,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Create a new unsupported format error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::UnsupportedFormat(message.into())
    }

    /// Create a new malformed body error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedBody(message.into())
    }

    /// Create a new truncation error
    pub fn truncated<S: Into<String>>(message: S) -> Self {
        Self::Truncated(message.into())
    }

    /// Create a new malformed result error
    pub fn malformed_result<S: Into<String>>(message: S) -> Self {
        Self::MalformedResult(message.into())
    }

    /// Create a new invalid model error
    pub fn invalid_model<S: Into<String>>(message: S) -> Self {
        Self::InvalidModel(message.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a size limit error
    pub fn too_large(limit: usize, observed: u64) -> Self {
        Self::ResponseTooLarge { limit, observed }
    }

    /// Check whether the surrounding pipeline may retry the request
    pub fn is_retriable(&self) -> bool {
        match self {
            CodecError::Upstream { status, .. } => *status >= 500 || *status == 429,
            CodecError::Io(_) => true,
            _ => false,
        }
    }

    /// Whether this error is a decode-side failure
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            CodecError::UnsupportedFormat(_)
                | CodecError::MalformedBody(_)
                | CodecError::ResponseTooLarge { .. }
                | CodecError::Truncated(_)
                | CodecError::MalformedResult(_)
        )
    }

    /// Get the error category for monitoring/metrics
    pub fn category(&self) -> &'static str {
        match self {
            CodecError::UnsupportedFormat(_) => "unsupported_format",
            CodecError::MalformedBody(_) => "malformed_body",
            CodecError::ResponseTooLarge { .. } => "response_too_large",
            CodecError::Truncated(_) => "truncated",
            CodecError::MalformedResult(_) => "malformed_result",
            CodecError::InvalidModel(_) => "invalid_model",
            CodecError::Cancelled => "cancelled",
            CodecError::DeadlineExceeded => "deadline_exceeded",
            CodecError::Upstream { .. } => "upstream",
            CodecError::Configuration(_) => "configuration",
            CodecError::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        use serde_json::error::Category;

        match err.classify() {
            Category::Eof => CodecError::Truncated(err.to_string()),
            Category::Io => CodecError::Io(err.into()),
            Category::Syntax | Category::Data => CodecError::MalformedBody(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_classification() {
        let eof = serde_json::from_str::<serde_json::Value>("{\"status\":").unwrap_err();
        assert!(matches!(CodecError::from(eof), CodecError::Truncated(_)));

        let syntax = serde_json::from_str::<serde_json::Value>("{status}").unwrap_err();
        assert!(matches!(CodecError::from(syntax), CodecError::MalformedBody(_)));
    }

    #[test]
    fn test_too_large_message_names_limit() {
        let err = CodecError::too_large(1024, 4096);
        assert_eq!(err.category(), "response_too_large");
        assert!(err.to_string().contains("1024"));
        assert!(err.is_decode_failure());
    }

    #[test]
    fn test_retriable_upstream() {
        let unavailable = CodecError::Upstream {
            status: 503,
            error_type: None,
            message: "unavailable".to_string(),
        };
        let bad_request = CodecError::Upstream {
            status: 400,
            error_type: Some("bad_data".to_string()),
            message: "invalid".to_string(),
        };
        assert!(unavailable.is_retriable());
        assert!(!bad_request.is_retriable());
        assert!(!CodecError::invalid_model("x").is_retriable());
    }
}
