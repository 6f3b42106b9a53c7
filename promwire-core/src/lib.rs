//! # Promwire Core Library
//!
//! Canonical result model and wire codecs for Prometheus-compatible query responses,
//! shared by the HTTP layer and anything that caches or merges partial results.
//!
//! ## Features
//!
//! - **Result Model**: Matrix, vector, scalar and string results behind one tagged enum
//! - **JSON**: Byte-compatible with the public Prometheus HTTP API
//! - **Binary**: Protobuf-compatible encoding for internal transport and caching
//! - **Negotiation**: `Content-Type`/`Accept` driven transcoder selection
//!
//! ## Architecture
//!
//! Everything here is synchronous and does no I/O. A [`CodecRegistry`] is built once
//! from a [`CodecConfig`] and shared; every decode or encode call works only on its
//! own buffers, so calls can run concurrently without locking. Long calls observe a
//! [`CallContext`] for deadlines and cancellation.

pub mod binary;
pub mod config;
pub mod context;
pub mod error;
mod intern;
pub mod json;
pub mod labels;
pub mod model;
pub mod negotiate;
pub mod stats;
pub mod time;

// Re-export commonly used types
pub use binary::BinaryTranscoder;
pub use config::CodecConfig;
pub use context::CallContext;
pub use error::{CodecError, CodecResult};
pub use json::JsonTranscoder;
pub use labels::{LabelPair, Labels};
pub use model::{
    ExtraField, QueryData, QueryResponse, ResultPayload, ResultType, Sample, SampleStream, Status,
    StringSample, VectorSample,
};
pub use negotiate::{CodecRegistry, EncodedBody, Transcoder, WireFormat};
pub use stats::{SampleStats, Stats, StepStat};
pub use time::TimestampStyle;

/// Version information for promwire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Media type of the JSON encoding
pub const APPLICATION_JSON: &str = "application/json";

/// Media type of the binary encoding
pub const APPLICATION_PROTOBUF: &str = "application/x-protobuf";

/// Default cap on response bodies (100 MiB)
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 100 * 1024 * 1024;
