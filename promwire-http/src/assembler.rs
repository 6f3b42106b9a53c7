//! Response Assembler
//!
//! Unwraps transport responses into [`QueryResponse`] values and wraps encoded
//! responses back into HTTP responses. Body bytes are read incrementally so the size
//! cap and the caller's deadline are enforced while the body is still arriving.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use futures::StreamExt;
use promwire_core::{
    CallContext, CodecError, CodecRegistry, CodecResult, QueryResponse, Status, WireFormat,
};
use serde::Deserialize;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::AssemblerConfig;
use crate::metrics::{CodecMetrics, Operation, UNKNOWN_FORMAT};

/// Non-standard status used by Prometheus for cancelled queries
const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

/// Bridges HTTP responses and the codec registry
#[derive(Debug, Clone)]
pub struct ResponseAssembler {
    registry: Arc<CodecRegistry>,
    max_error_body_bytes: usize,
    decode_gzip: bool,
    metrics: Option<CodecMetrics>,
}

/// An encoded query response ready to be sent
#[derive(Debug, Clone)]
pub struct EncodedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Default)]
struct Observed {
    format: Option<WireFormat>,
    body_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overflow {
    Reject,
    Truncate,
}

impl ResponseAssembler {
    /// Create an assembler over an existing registry
    pub fn new(registry: Arc<CodecRegistry>, config: &AssemblerConfig) -> Self {
        Self {
            registry,
            max_error_body_bytes: config.max_error_body_bytes,
            decode_gzip: config.decode_gzip,
            metrics: None,
        }
    }

    /// Build the registry from `config` and wrap it
    pub fn from_config(config: &AssemblerConfig) -> CodecResult<Self> {
        let registry = Arc::new(CodecRegistry::new(&config.codec)?);
        Ok(Self::new(registry, config))
    }

    pub fn with_metrics(mut self, metrics: CodecMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    /// Decode a complete HTTP response.
    ///
    /// `size_hint` is an expected body size supplied by the caller; like
    /// `Content-Length` it is checked against the cap before any byte is read.
    pub async fn decode(
        &self,
        ctx: &CallContext,
        response: Response<Body>,
        size_hint: Option<u64>,
    ) -> CodecResult<QueryResponse> {
        let (parts, body) = response.into_parts();
        self.decode_parts(ctx, parts.status, &parts.headers, body, size_hint)
            .await
    }

    /// Decode a response given as separate status, headers and body
    pub async fn decode_parts(
        &self,
        ctx: &CallContext,
        status: StatusCode,
        headers: &HeaderMap,
        body: Body,
        size_hint: Option<u64>,
    ) -> CodecResult<QueryResponse> {
        let started = Instant::now();
        let mut observed = Observed::default();
        let result = self
            .decode_body(ctx, status, headers, body, size_hint, &mut observed)
            .await;

        let format = observed.format.map_or(UNKNOWN_FORMAT, |f| f.as_str());
        match &result {
            Ok(response) => {
                debug!(
                    "Decoded {} response: {} series, {} samples, {} bytes in {:?}",
                    format,
                    response.series_count(),
                    response.sample_count(),
                    observed.body_len,
                    started.elapsed()
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_success(
                        Operation::Decode,
                        format,
                        started.elapsed(),
                        observed.body_len,
                        response.sample_count(),
                    );
                }
            }
            Err(e) => {
                debug!("Failed to decode {} response: {}", format, e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(Operation::Decode, format, e);
                }
            }
        }
        result
    }

    async fn decode_body(
        &self,
        ctx: &CallContext,
        status: StatusCode,
        headers: &HeaderMap,
        body: Body,
        size_hint: Option<u64>,
        observed: &mut Observed,
    ) -> CodecResult<QueryResponse> {
        ctx.check()?;

        if !status.is_success() {
            let text = read_body(ctx, body, self.max_error_body_bytes, 0, Overflow::Truncate).await?;
            let error = classify_upstream(status, &text);
            warn!("Upstream query failed: {}", error);
            return Err(error);
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        let transcoder = self.registry.select_decoder(content_type)?;
        observed.format = Some(transcoder.format());

        let gzip = is_gzip(headers, self.decode_gzip)?;
        let limit = self.registry.max_response_bytes();
        let declared = content_length(headers).or(size_hint);
        if let Some(declared) = declared {
            if declared > limit as u64 {
                return Err(CodecError::too_large(limit, declared));
            }
        }

        let capacity = declared.map_or(0, |d| d as usize);
        let raw = read_body(ctx, body, limit, capacity, Overflow::Reject).await?;
        let bytes = if gzip {
            trace!("Decompressing gzip body, length: {}", raw.len());
            gunzip(ctx, &raw, limit)?
        } else {
            raw
        };
        observed.body_len = bytes.len();

        ctx.check()?;
        transcoder.decode(&bytes, ctx)
    }

    /// Encode `response` in the format negotiated from an `Accept` value
    pub fn encode(
        &self,
        ctx: &CallContext,
        accept: Option<&str>,
        response: &QueryResponse,
    ) -> CodecResult<EncodedResponse> {
        let started = Instant::now();
        let format = self.registry.encoder_for(accept).format();

        let encoded = match self.registry.encode(accept, response, ctx) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Failed to encode {} response: {}", format, e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(Operation::Encode, format.as_str(), &e);
                }
                return Err(e);
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_success(
                Operation::Encode,
                format.as_str(),
                started.elapsed(),
                encoded.body.len(),
                response.sample_count(),
            );
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(encoded.media_type),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.body.len()));
        headers.insert(header::VARY, HeaderValue::from_static("Accept"));

        debug!(
            "Encoded {} response: {} bytes in {:?}",
            encoded.format,
            encoded.body.len(),
            started.elapsed()
        );

        Ok(EncodedResponse {
            status: status_for(response),
            headers,
            body: Bytes::from(encoded.body),
        })
    }

    /// Encode for a request, negotiating from its `Accept` header
    pub fn encode_for_request(
        &self,
        ctx: &CallContext,
        request_headers: &HeaderMap,
        response: &QueryResponse,
    ) -> CodecResult<EncodedResponse> {
        let accept = request_headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok());
        self.encode(ctx, accept, response)
    }
}

impl EncodedResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

impl IntoResponse for EncodedResponse {
    fn into_response(self) -> axum::response::Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// HTTP status for a response, following the Prometheus API's errorType mapping
pub fn status_for(response: &QueryResponse) -> StatusCode {
    match response.status {
        Status::Success => StatusCode::OK,
        Status::Error => status_for_error_type(response.error_type.as_deref()),
    }
}

pub fn status_for_error_type(error_type: Option<&str>) -> StatusCode {
    match error_type {
        Some("bad_data") => StatusCode::BAD_REQUEST,
        Some("execution") => StatusCode::UNPROCESSABLE_ENTITY,
        Some("canceled") => StatusCode::from_u16(STATUS_CLIENT_CLOSED_REQUEST)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Some("timeout") | Some("unavailable") => StatusCode::SERVICE_UNAVAILABLE,
        Some("not_found") => StatusCode::NOT_FOUND,
        Some("not_acceptable") => StatusCode::NOT_ACCEPTABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error envelope reporting a codec failure to a client
pub fn error_response(error: &CodecError) -> QueryResponse {
    let error_type = match error {
        CodecError::Upstream {
            error_type: Some(error_type),
            ..
        } => error_type.as_str(),
        CodecError::Upstream { status, .. } => match status {
            502..=504 => "unavailable",
            400..=499 => "bad_data",
            _ => "internal",
        },
        CodecError::Cancelled => "canceled",
        CodecError::DeadlineExceeded => "timeout",
        CodecError::ResponseTooLarge { .. } => "execution",
        _ => "internal",
    };
    let message = match error {
        CodecError::Upstream { message, .. } => message.clone(),
        other => other.to_string(),
    };
    QueryResponse::error(error_type, message)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope {
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Classify a non-2xx response without reading it as a result payload
fn classify_upstream(status: StatusCode, body: &[u8]) -> CodecError {
    let (error_type, message) = match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) if envelope.error_type.is_some() || envelope.error.is_some() => {
            (envelope.error_type, envelope.error.unwrap_or_default())
        }
        _ => (None, String::from_utf8_lossy(body).trim().to_string()),
    };

    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("no response body").to_string()
    } else {
        message
    };

    CodecError::Upstream {
        status: status.as_u16(),
        error_type,
        message,
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn is_gzip(headers: &HeaderMap, allow_gzip: bool) -> CodecResult<bool> {
    let Some(value) = headers.get(header::CONTENT_ENCODING) else {
        return Ok(false);
    };
    let value = value
        .to_str()
        .map_err(|_| CodecError::unsupported("Content-Encoding is not valid ASCII"))?
        .trim();

    if value.is_empty() || value.eq_ignore_ascii_case("identity") {
        Ok(false)
    } else if allow_gzip
        && (value.eq_ignore_ascii_case("gzip") || value.eq_ignore_ascii_case("x-gzip"))
    {
        Ok(true)
    } else {
        Err(CodecError::unsupported(format!(
            "unsupported Content-Encoding '{}'",
            value
        )))
    }
}

/// Output inflated between call context checks
const GUNZIP_CHUNK_BYTES: usize = 64 * 1024;

/// Inflate a gzip body, failing once the output passes `limit`
fn gunzip(ctx: &CallContext, compressed: &[u8], limit: usize) -> CodecResult<Bytes> {
    let mut decoder = GzDecoder::new(compressed);
    let mut out = Vec::with_capacity(compressed.len().saturating_mul(4).min(limit));
    let mut chunk = vec![0u8; GUNZIP_CHUNK_BYTES];

    loop {
        ctx.check()?;
        let read = match decoder.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(CodecError::truncated(format!("gzip stream ended early: {}", e)))
            }
            Err(e) => return Err(CodecError::malformed(format!("invalid gzip body: {}", e))),
        };
        if out.len() + read > limit {
            return Err(CodecError::too_large(limit, (out.len() + read) as u64));
        }
        out.extend_from_slice(&chunk[..read]);
    }
    Ok(Bytes::from(out))
}

/// Collect body frames until the end of the stream, the cap, or the caller giving up
async fn read_body(
    ctx: &CallContext,
    body: Body,
    limit: usize,
    capacity: usize,
    overflow: Overflow,
) -> CodecResult<Bytes> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::with_capacity(capacity.min(limit));

    let aborted = wait_for_abort(ctx);
    tokio::pin!(aborted);

    loop {
        let frame = tokio::select! {
            biased;
            error = &mut aborted => return Err(error),
            frame = stream.next() => frame,
        };
        let Some(chunk) = frame else {
            break;
        };
        let chunk = chunk.map_err(|e| CodecError::Io(io::Error::other(e)))?;

        if buf.len() + chunk.len() > limit {
            match overflow {
                Overflow::Reject => {
                    return Err(CodecError::too_large(
                        limit,
                        (buf.len() + chunk.len()) as u64,
                    ));
                }
                Overflow::Truncate => {
                    let room = limit - buf.len();
                    buf.extend_from_slice(&chunk[..room]);
                    break;
                }
            }
        }
        buf.extend_from_slice(&chunk);
    }

    trace!("Read response body, length: {}", buf.len());
    Ok(buf.freeze())
}

/// Resolves once the context is cancelled or its deadline passes
async fn wait_for_abort(ctx: &CallContext) -> CodecError {
    let cancelled = async {
        match ctx.token() {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };
    let expired = async {
        match ctx.deadline() {
            Some(deadline) => {
                tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = cancelled => CodecError::Cancelled,
        _ = expired => CodecError::DeadlineExceeded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tokio_util::sync::CancellationToken;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for_error_type(Some("bad_data")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for_error_type(Some("execution")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for_error_type(Some("canceled")).as_u16(), 499);
        assert_eq!(
            status_for_error_type(Some("timeout")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for_error_type(Some("not_found")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for_error_type(Some("internal")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for_error_type(Some("something_new")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_classify_json_error_body() {
        let body = br#"{"status":"error","errorType":"bad_data","error":"invalid time range"}"#;
        match classify_upstream(StatusCode::BAD_REQUEST, body) {
            CodecError::Upstream {
                status,
                error_type,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(error_type.as_deref(), Some("bad_data"));
                assert_eq!(message, "invalid time range");
            }
            other => panic!("expected Upstream, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_plain_error_body() {
        let err = classify_upstream(StatusCode::BAD_GATEWAY, b"  upstream connect error\n");
        assert!(err.is_retriable());
        assert!(err.to_string().contains("upstream connect error"));

        let err = classify_upstream(StatusCode::SERVICE_UNAVAILABLE, b"");
        assert!(err.to_string().contains("Service Unavailable"));

        let err = classify_upstream(StatusCode::BAD_REQUEST, br#"{"unrelated":1}"#);
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("unrelated"));
    }

    #[test]
    fn test_error_response_envelope() {
        let upstream = CodecError::Upstream {
            status: 504,
            error_type: None,
            message: "gateway timeout".to_string(),
        };
        let envelope = error_response(&upstream);
        assert_eq!(envelope.error_type.as_deref(), Some("unavailable"));
        assert_eq!(envelope.error.as_deref(), Some("gateway timeout"));
        assert_eq!(status_for(&envelope), StatusCode::SERVICE_UNAVAILABLE);

        let envelope = error_response(&CodecError::Cancelled);
        assert_eq!(envelope.error_type.as_deref(), Some("canceled"));
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn test_gunzip_enforces_limit() {
        let data = vec![b'x'; 4096];
        let compressed = gzip(&data);
        assert!(compressed.len() < 1024);

        let ctx = CallContext::background();
        assert_eq!(gunzip(&ctx, &compressed, 8192).unwrap().len(), 4096);
        assert!(matches!(
            gunzip(&ctx, &compressed, 1024),
            Err(CodecError::ResponseTooLarge { limit: 1024, .. })
        ));
        assert!(gunzip(&ctx, b"not gzip at all", 1024)
            .unwrap_err()
            .is_decode_failure());
    }

    #[test]
    fn test_gunzip_spans_chunks_and_stops_when_cancelled() {
        let data: Vec<u8> = (0..GUNZIP_CHUNK_BYTES * 3).map(|i| (i % 251) as u8).collect();
        let compressed = gzip(&data);

        let inflated = gunzip(&CallContext::background(), &compressed, data.len()).unwrap();
        assert_eq!(&inflated[..], &data[..]);

        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::background().with_cancellation(token);
        assert!(matches!(
            gunzip(&ctx, &compressed, data.len()),
            Err(CodecError::Cancelled)
        ));
    }

    #[test]
    fn test_content_encoding() {
        let mut headers = HeaderMap::new();
        assert!(!is_gzip(&headers, true).unwrap());

        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("GZIP"));
        assert!(is_gzip(&headers, true).unwrap());
        assert!(matches!(
            is_gzip(&headers, false),
            Err(CodecError::UnsupportedFormat(_))
        ));

        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("br"));
        assert!(is_gzip(&headers, true).is_err());
    }
}
