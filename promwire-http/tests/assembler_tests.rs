//! Integration tests for the response assembler
//!
//! Upstream responses are produced by an in-process axum router and fed to the
//! assembler exactly as a query frontend would receive them.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use prometheus::Registry;
use promwire_core::{
    BinaryTranscoder, CallContext, CodecConfig, CodecError, Labels, QueryData, QueryResponse,
    ResultPayload, Sample, SampleStream, Transcoder, APPLICATION_JSON, APPLICATION_PROTOBUF,
};
use promwire_http::{AssemblerConfig, CodecMetrics, ResponseAssembler};
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const MATRIX_BODY: &str = concat!(
    r#"{"status":"success","data":{"resultType":"matrix","result":["#,
    r#"{"metric":{"__name__":"up","job":"api"},"values":[[1609459200,"1"],[1609459215,"1"],[1609459230,"0"]]},"#,
    r#"{"metric":{"__name__":"up","job":"db"},"values":[[1609459200,"0"],[1609459215,"1"],[1609459230,"1"]]}"#,
    r#"]}}"#
);

fn matrix_response() -> QueryResponse {
    let stream = |job: &str, values: [f64; 3]| {
        SampleStream::new(
            Labels::try_from_iter([("__name__", "up"), ("job", job)]).unwrap(),
            values
                .iter()
                .enumerate()
                .map(|(i, v)| Sample::new(1_609_459_200_000 + i as i64 * 15_000, *v))
                .collect(),
        )
        .unwrap()
    };
    QueryResponse::success(QueryData::from_payload(ResultPayload::Matrix(vec![
        stream("api", [1.0, 1.0, 0.0]),
        stream("db", [0.0, 1.0, 1.0]),
    ])))
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn create_upstream() -> Router {
    Router::new()
        .route(
            "/json",
            get(|| async { ([(header::CONTENT_TYPE, "application/json")], MATRIX_BODY) }),
        )
        .route(
            "/protobuf",
            get(|| async {
                let body = BinaryTranscoder::default()
                    .encode(&matrix_response(), &CallContext::background())
                    .unwrap();
                ([(header::CONTENT_TYPE, APPLICATION_PROTOBUF)], body)
            }),
        )
        .route(
            "/gzip",
            get(|| async {
                (
                    [
                        (header::CONTENT_TYPE, "application/json; charset=utf-8"),
                        (header::CONTENT_ENCODING, "gzip"),
                    ],
                    gzip(MATRIX_BODY.as_bytes()),
                )
            }),
        )
        .route(
            "/bad-data",
            get(|| async {
                let body = json!({
                    "status": "error",
                    "errorType": "bad_data",
                    "error": "invalid time range"
                });
                (
                    StatusCode::BAD_REQUEST,
                    [(header::CONTENT_TYPE, "application/json")],
                    body.to_string(),
                )
            }),
        )
        .route(
            "/unavailable",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "upstream overloaded") }),
        )
        .route("/text", get(|| async { "not a query response" }))
}

async fn fetch(uri: &str) -> Response<Body> {
    create_upstream()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn assembler() -> ResponseAssembler {
    ResponseAssembler::from_config(&AssemblerConfig::default()).unwrap()
}

fn assembler_with_limit(limit: usize) -> ResponseAssembler {
    let mut config = AssemblerConfig::default();
    config.codec = CodecConfig::default().with_max_response_bytes(limit);
    ResponseAssembler::from_config(&config).unwrap()
}

fn streamed_response(chunks: Vec<Bytes>) -> Response<Body> {
    let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
    let mut response = Response::new(Body::from_stream(stream));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    response
}

#[cfg(test)]
mod decode_tests {
    use super::*;

    #[tokio::test]
    async fn test_decode_json_response() {
        let response = assembler()
            .decode(&CallContext::background(), fetch("/json").await, None)
            .await
            .unwrap();
        assert_eq!(response, matrix_response());
    }

    #[tokio::test]
    async fn test_decode_protobuf_response() {
        let response = assembler()
            .decode(&CallContext::background(), fetch("/protobuf").await, None)
            .await
            .unwrap();
        assert_eq!(response, matrix_response());
    }

    #[tokio::test]
    async fn test_decode_gzip_response() {
        let response = assembler()
            .decode(&CallContext::background(), fetch("/gzip").await, None)
            .await
            .unwrap();
        assert_eq!(response, matrix_response());
    }

    #[tokio::test]
    async fn test_gzip_rejected_when_disabled() {
        let mut config = AssemblerConfig::default();
        config.decode_gzip = false;
        let assembler = ResponseAssembler::from_config(&config).unwrap();

        let err = assembler
            .decode(&CallContext::background(), fetch("/gzip").await, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_error_status_is_classified() {
        let err = assembler()
            .decode(&CallContext::background(), fetch("/bad-data").await, None)
            .await
            .unwrap_err();
        match err {
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

        let err = assembler()
            .decode(&CallContext::background(), fetch("/unavailable").await, None)
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        assert!(err.to_string().contains("upstream overloaded"));
    }

    #[tokio::test]
    async fn test_unknown_content_type_is_rejected() {
        let err = assembler()
            .decode(&CallContext::background(), fetch("/text").await, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedFormat(_)));

        let mut response = Response::new(Body::from(MATRIX_BODY));
        response.headers_mut().clear();
        let err = assembler()
            .decode(&CallContext::background(), response, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_declared_size_checked_before_reading() {
        let assembler = assembler_with_limit(100);

        let mut response = streamed_response(vec![Bytes::from_static(b"{}")]);
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("10000"));
        let err = assembler
            .decode(&CallContext::background(), response, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::ResponseTooLarge {
                limit: 100,
                observed: 10000
            }
        ));

        let response = streamed_response(vec![Bytes::from_static(b"{}")]);
        let err = assembler
            .decode(&CallContext::background(), response, Some(5000))
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::ResponseTooLarge { limit: 100, .. }));
    }

    #[tokio::test]
    async fn test_streamed_body_is_capped() {
        let chunks = vec![Bytes::from(vec![b' '; 40]); 10];
        let err = assembler_with_limit(100)
            .decode(&CallContext::background(), streamed_response(chunks), None)
            .await
            .unwrap_err();
        match err {
            CodecError::ResponseTooLarge { limit, observed } => {
                assert_eq!(limit, 100);
                assert_eq!(observed, 120);
            }
            other => panic!("expected ResponseTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_streamed_body_is_reassembled() {
        let chunks = MATRIX_BODY
            .as_bytes()
            .chunks(17)
            .map(Bytes::copy_from_slice)
            .collect();
        let response = assembler()
            .decode(&CallContext::background(), streamed_response(chunks), None)
            .await
            .unwrap();
        assert_eq!(response, matrix_response());
    }

    #[tokio::test]
    async fn test_deadline_interrupts_stalled_body() {
        let stalled = futures::stream::pending::<Result<Bytes, std::io::Error>>();
        let mut response = Response::new(Body::from_stream(stalled));
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));

        let ctx = CallContext::background().with_timeout(Duration::from_millis(50));
        let err = assembler().decode(&ctx, response, None).await.unwrap_err();
        assert!(matches!(err, CodecError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_stalled_body() {
        let stalled = futures::stream::pending::<Result<Bytes, std::io::Error>>();
        let mut response = Response::new(Body::from_stream(stalled));
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));

        let token = CancellationToken::new();
        let ctx = CallContext::background().with_cancellation(token.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = assembler().decode(&ctx, response, None).await.unwrap_err();
        assert!(matches!(err, CodecError::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_context() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::background().with_cancellation(token);

        let err = assembler()
            .decode(&ctx, fetch("/json").await, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::Cancelled));
    }
}

#[cfg(test)]
mod encode_tests {
    use super::*;

    #[tokio::test]
    async fn test_encode_defaults_to_json() {
        let encoded = assembler()
            .encode(&CallContext::background(), None, &matrix_response())
            .unwrap();
        assert_eq!(encoded.status, StatusCode::OK);
        assert_eq!(encoded.content_type(), Some(APPLICATION_JSON));
        assert_eq!(&encoded.body[..], MATRIX_BODY.as_bytes());
        assert_eq!(
            encoded.headers.get(header::CONTENT_LENGTH).unwrap(),
            &MATRIX_BODY.len().to_string()
        );
    }

    #[tokio::test]
    async fn test_encode_then_decode_through_http() {
        let assembler = assembler();
        let mut request_headers = HeaderMap::new();
        request_headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/x-protobuf;q=0.9, application/json;q=0.5"),
        );

        let encoded = assembler
            .encode_for_request(&CallContext::background(), &request_headers, &matrix_response())
            .unwrap();
        assert_eq!(encoded.content_type(), Some(APPLICATION_PROTOBUF));

        let decoded = assembler
            .decode(&CallContext::background(), encoded.into_response(), None)
            .await
            .unwrap();
        assert_eq!(decoded, matrix_response());
    }

    #[tokio::test]
    async fn test_error_envelope_status_codes() {
        let assembler = assembler();
        let cases = [
            ("bad_data", 400u16),
            ("execution", 422),
            ("canceled", 499),
            ("timeout", 503),
            ("internal", 500),
        ];

        for (error_type, status) in cases {
            let response = QueryResponse::error(error_type, "query failed");
            let encoded = assembler
                .encode(&CallContext::background(), None, &response)
                .unwrap();
            assert_eq!(encoded.status.as_u16(), status);

            let err = assembler
                .decode(&CallContext::background(), encoded.into_response(), None)
                .await
                .unwrap_err();
            match err {
                CodecError::Upstream {
                    status: upstream_status,
                    error_type: decoded_type,
                    message,
                } => {
                    assert_eq!(upstream_status, status);
                    assert_eq!(decoded_type.as_deref(), Some(error_type));
                    assert_eq!(message, "query failed");
                }
                other => panic!("expected Upstream, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_encode_rejects_oversized_body() {
        let err = assembler_with_limit(64)
            .encode(&CallContext::background(), None, &matrix_response())
            .unwrap_err();
        assert!(matches!(err, CodecError::ResponseTooLarge { limit: 64, .. }));
    }

    #[tokio::test]
    async fn test_encode_rejects_invalid_model() {
        let mut response = QueryResponse::error("bad_data", "oops");
        response.error = None;
        let err = assembler()
            .encode(&CallContext::background(), None, &response)
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidModel(_)));
    }
}

#[cfg(test)]
mod metrics_tests {
    use super::*;

    #[tokio::test]
    async fn test_assembler_records_metrics() {
        let registry = Registry::new();
        let metrics = CodecMetrics::new(&registry).unwrap();
        let assembler = assembler().with_metrics(metrics.clone());

        assembler
            .decode(&CallContext::background(), fetch("/json").await, None)
            .await
            .unwrap();
        assembler
            .decode(&CallContext::background(), fetch("/text").await, None)
            .await
            .unwrap_err();
        assembler
            .encode(&CallContext::background(), Some(APPLICATION_PROTOBUF), &matrix_response())
            .unwrap();

        assert_eq!(
            metrics
                .operations_total
                .with_label_values(&["decode", "json", "success"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .operations_total
                .with_label_values(&["decode", "unknown", "unsupported_format"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .samples_total
                .with_label_values(&["encode", "protobuf"])
                .get(),
            6
        );
    }
}
