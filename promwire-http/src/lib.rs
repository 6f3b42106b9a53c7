//! # Promwire HTTP
//!
//! HTTP side of the promwire codecs: turns upstream query responses into
//! [`QueryResponse`](promwire_core::QueryResponse) values and encoded responses back
//! into `axum` responses.
//!
//! - **Assembler**: `Content-Type` driven decode with an incremental size cap, gzip
//!   support and classification of non-2xx responses
//! - **Configuration**: `PROMWIRE_*` environment variables over defaults
//! - **Metrics**: Prometheus counters and histograms per format and outcome

pub mod assembler;
pub mod config;
pub mod metrics;

pub use assembler::{error_response, status_for, EncodedResponse, ResponseAssembler};
pub use config::AssemblerConfig;
pub use metrics::CodecMetrics;
pub use promwire_core;
