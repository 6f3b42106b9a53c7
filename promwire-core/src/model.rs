//! Canonical in-memory representation of a query response
//!
//! Every wire format decodes into and encodes from these types. Values are plain owned
//! data: nothing here refers back to the bytes they were decoded from.

use ordered_float::OrderedFloat;
use std::fmt;

use crate::error::{CodecError, CodecResult};
use crate::labels::Labels;
use crate::stats::Stats;

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Error,
}

/// Discriminant of the result payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultType {
    Matrix,
    Vector,
    Scalar,
    String,
}

/// A single time/value observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sample {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,

    /// Sample value, compared bitwise-equal for NaN so special values round trip
    pub value: OrderedFloat<f64>,
}

/// One label set and its ordered samples
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleStream {
    pub labels: Labels,
    pub samples: Vec<Sample>,
}

/// One label set and the single sample taken at the evaluation instant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VectorSample {
    pub labels: Labels,
    pub sample: Sample,
}

/// A string result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StringSample {
    pub timestamp_ms: i64,
    pub value: String,
}

/// Result payload, one variant per result type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultPayload {
    Matrix(Vec<SampleStream>),
    Vector(Vec<VectorSample>),
    Scalar(Sample),
    String(StringSample),
}

/// A field that is not part of the known schema, kept as raw JSON text so it can be
/// written back unchanged
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtraField {
    pub name: String,
    pub raw_json: String,
}

/// The `data` section of a successful response
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryData {
    pub result: ResultPayload,
    pub stats: Option<Stats>,
    pub extra_fields: Vec<ExtraField>,
}

/// A complete query response
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryResponse {
    pub status: Status,
    pub error_type: Option<String>,
    pub error: Option<String>,
    pub data: Option<QueryData>,
    pub warnings: Vec<String>,
    pub infos: Vec<String>,
    pub extra_fields: Vec<ExtraField>,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Error => "error",
        }
    }

    /// Parse a status string
    pub fn parse(s: &str) -> CodecResult<Self> {
        match s {
            "success" => Ok(Status::Success),
            "error" => Ok(Status::Error),
            other => Err(CodecError::malformed(format!("unknown status '{}'", other))),
        }
    }
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Matrix => "matrix",
            ResultType::Vector => "vector",
            ResultType::Scalar => "scalar",
            ResultType::String => "string",
        }
    }

    /// Parse a result type string
    pub fn parse(s: &str) -> CodecResult<Self> {
        match s {
            "matrix" => Ok(ResultType::Matrix),
            "vector" => Ok(ResultType::Vector),
            "scalar" => Ok(ResultType::Scalar),
            "string" => Ok(ResultType::String),
            other => Err(CodecError::malformed(format!(
                "unknown resultType '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Sample {
    /// Create a new sample
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value: OrderedFloat(value),
        }
    }

    /// Get the raw float value
    pub fn value(&self) -> f64 {
        self.value.into_inner()
    }
}

impl SampleStream {
    /// Create a stream, rejecting samples whose timestamps go backwards
    pub fn new(labels: Labels, samples: Vec<Sample>) -> CodecResult<Self> {
        check_sample_order(&samples).map_err(CodecError::malformed_result)?;
        Ok(Self { labels, samples })
    }

    /// Append a sample at or after the last timestamp
    pub fn push(&mut self, sample: Sample) -> CodecResult<()> {
        if let Some(last) = self.samples.last() {
            if sample.timestamp_ms < last.timestamp_ms {
                return Err(CodecError::malformed_result(format!(
                    "sample at {} precedes previous sample at {} in series {}",
                    sample.timestamp_ms, last.timestamp_ms, self.labels
                )));
            }
        }
        self.samples.push(sample);
        Ok(())
    }
}

fn check_sample_order(samples: &[Sample]) -> Result<(), String> {
    match samples
        .windows(2)
        .position(|pair| pair[1].timestamp_ms < pair[0].timestamp_ms)
    {
        Some(i) => Err(format!(
            "sample timestamps decrease at index {} ({} after {})",
            i + 1,
            samples[i + 1].timestamp_ms,
            samples[i].timestamp_ms
        )),
        None => Ok(()),
    }
}

impl VectorSample {
    pub fn new(labels: Labels, sample: Sample) -> Self {
        Self { labels, sample }
    }
}

impl StringSample {
    pub fn new<S: Into<String>>(timestamp_ms: i64, value: S) -> Self {
        Self {
            timestamp_ms,
            value: value.into(),
        }
    }
}

impl ResultPayload {
    /// The result type this payload carries
    pub fn result_type(&self) -> ResultType {
        match self {
            ResultPayload::Matrix(_) => ResultType::Matrix,
            ResultPayload::Vector(_) => ResultType::Vector,
            ResultPayload::Scalar(_) => ResultType::Scalar,
            ResultPayload::String(_) => ResultType::String,
        }
    }

    /// Number of label-identified series (scalar and string count as none)
    pub fn series_count(&self) -> usize {
        match self {
            ResultPayload::Matrix(streams) => streams.len(),
            ResultPayload::Vector(samples) => samples.len(),
            ResultPayload::Scalar(_) | ResultPayload::String(_) => 0,
        }
    }

    /// Total number of samples
    pub fn sample_count(&self) -> usize {
        match self {
            ResultPayload::Matrix(streams) => streams.iter().map(|s| s.samples.len()).sum(),
            ResultPayload::Vector(samples) => samples.len(),
            ResultPayload::Scalar(_) | ResultPayload::String(_) => 1,
        }
    }
}

impl ExtraField {
    pub fn new<N: Into<String>, R: Into<String>>(name: N, raw_json: R) -> Self {
        Self {
            name: name.into(),
            raw_json: raw_json.into(),
        }
    }
}

impl QueryData {
    /// Create query data, checking that the declared result type matches the payload
    pub fn new(declared: ResultType, result: ResultPayload) -> CodecResult<Self> {
        if result.result_type() != declared {
            return Err(CodecError::malformed_result(format!(
                "resultType '{}' does not match a {} payload",
                declared,
                result.result_type()
            )));
        }
        Ok(Self::from_payload(result))
    }

    /// Create query data whose result type is taken from the payload
    pub fn from_payload(result: ResultPayload) -> Self {
        Self {
            result,
            stats: None,
            extra_fields: Vec::new(),
        }
    }

    pub fn with_stats(mut self, stats: Stats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn result_type(&self) -> ResultType {
        self.result.result_type()
    }
}

impl QueryResponse {
    /// Create a successful response
    pub fn success(data: QueryData) -> Self {
        Self {
            status: Status::Success,
            error_type: None,
            error: None,
            data: Some(data),
            warnings: Vec::new(),
            infos: Vec::new(),
            extra_fields: Vec::new(),
        }
    }

    /// Create an error response
    pub fn error<T: Into<String>, M: Into<String>>(error_type: T, message: M) -> Self {
        Self {
            status: Status::Error,
            error_type: Some(error_type.into()),
            error: Some(message.into()),
            data: None,
            warnings: Vec::new(),
            infos: Vec::new(),
            extra_fields: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_infos(mut self, infos: Vec<String>) -> Self {
        self.infos = infos;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn result_type(&self) -> Option<ResultType> {
        self.data.as_ref().map(QueryData::result_type)
    }

    pub fn series_count(&self) -> usize {
        self.data
            .as_ref()
            .map(|d| d.result.series_count())
            .unwrap_or(0)
    }

    pub fn sample_count(&self) -> usize {
        self.data
            .as_ref()
            .map(|d| d.result.sample_count())
            .unwrap_or(0)
    }

    /// Check the response invariants before it is written out.
    ///
    /// Violations are caller bugs and are reported as `InvalidModel`.
    pub fn validate(&self) -> CodecResult<()> {
        match self.status {
            Status::Error => {
                if self.error_type.is_none() || self.error.is_none() {
                    return Err(CodecError::invalid_model(
                        "error response requires both errorType and error",
                    ));
                }
                if self.data.is_some() {
                    return Err(CodecError::invalid_model(
                        "error response must not carry data",
                    ));
                }
            }
            Status::Success => {
                let data = self.data.as_ref().ok_or_else(|| {
                    CodecError::invalid_model("success response requires data")
                })?;
                if let ResultPayload::Matrix(streams) = &data.result {
                    for stream in streams {
                        check_sample_order(&stream.samples).map_err(|msg| {
                            CodecError::invalid_model(format!("series {}: {}", stream.labels, msg))
                        })?;
                    }
                }
            }
        }
        Ok(())
    }
}
