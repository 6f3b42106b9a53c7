//! Binary decoding
//!
//! Unknown fields are skipped at every level. Label strings are validated as UTF-8
//! once per distinct byte sequence and shared between series.

use prost::encoding::WireType;
use prost::Message;
use serde_json::Number;

use crate::context::{CallContext, Checkpoint};
use crate::error::{CodecError, CodecResult};
use crate::intern::Interner;
use crate::json;
use crate::labels::{LabelPair, Labels};
use crate::model::{
    ExtraField, QueryData, QueryResponse, ResultPayload, ResultType, Sample, SampleStream, Status,
    StringSample, VectorSample,
};
use crate::stats::{SampleStats, Stats, StepStat};

use super::wire::{
    expect_wire_type, tags, ProtoExtraField, ProtoSampleStats, ProtoStats, Reader,
};

/// Decode a binary query response
pub(crate) fn decode(
    buf: &[u8],
    ctx: &CallContext,
    check_interval: usize,
) -> CodecResult<QueryResponse> {
    ctx.check()?;

    let mut state = DecodeState {
        interner: Interner::new(),
        checkpoint: Checkpoint::new(ctx, check_interval),
    };

    let mut status = None;
    let mut error_type = None;
    let mut error = None;
    let mut data = None;
    let mut warnings = Vec::new();
    let mut infos = Vec::new();
    let mut extra_fields = Vec::new();

    let mut reader = Reader::new(buf);
    while !reader.is_empty() {
        let (tag, wire_type) = reader.key()?;
        match tag {
            tags::RESPONSE_STATUS => {
                expect_wire_type("status", wire_type, WireType::LengthDelimited)?;
                status = Some(Status::parse(reader.str()?)?);
            }
            tags::RESPONSE_DATA => {
                expect_wire_type("data", wire_type, WireType::LengthDelimited)?;
                data = Some(decode_data(reader.bytes()?, &mut state)?);
            }
            tags::RESPONSE_ERROR_TYPE => {
                expect_wire_type("errorType", wire_type, WireType::LengthDelimited)?;
                error_type = Some(reader.str()?.to_owned());
            }
            tags::RESPONSE_ERROR => {
                expect_wire_type("error", wire_type, WireType::LengthDelimited)?;
                error = Some(reader.str()?.to_owned());
            }
            tags::RESPONSE_WARNINGS => {
                expect_wire_type("warnings", wire_type, WireType::LengthDelimited)?;
                warnings.push(reader.str()?.to_owned());
            }
            tags::RESPONSE_INFOS => {
                expect_wire_type("infos", wire_type, WireType::LengthDelimited)?;
                infos.push(reader.str()?.to_owned());
            }
            tags::EXTRA_FIELDS => {
                expect_wire_type("extra field", wire_type, WireType::LengthDelimited)?;
                extra_fields.push(decode_extra(reader.bytes()?)?);
            }
            _ => reader.skip(wire_type)?,
        }
    }

    let status = status.ok_or_else(|| CodecError::malformed("response is missing status"))?;
    let response = QueryResponse {
        status,
        error_type,
        error,
        data,
        warnings,
        infos,
        extra_fields,
    };
    response.validate().map_err(|err| match err {
        CodecError::InvalidModel(message) => CodecError::MalformedResult(message),
        other => other,
    })?;
    Ok(response)
}

struct DecodeState<'a, 'c> {
    interner: Interner<'a>,
    checkpoint: Checkpoint<'c>,
}

fn decode_data<'a>(buf: &'a [u8], state: &mut DecodeState<'a, '_>) -> CodecResult<QueryData> {
    let mut result_type = None;
    let mut result = None;
    let mut stats = None;
    let mut extra_fields = Vec::new();

    let mut reader = Reader::new(buf);
    while !reader.is_empty() {
        let (tag, wire_type) = reader.key()?;
        match tag {
            tags::DATA_RESULT_TYPE => {
                expect_wire_type("resultType", wire_type, WireType::LengthDelimited)?;
                result_type = Some(ResultType::parse(reader.str()?)?);
            }
            tags::DATA_RESULT => {
                expect_wire_type("result", wire_type, WireType::LengthDelimited)?;
                result = Some(reader.bytes()?);
            }
            tags::DATA_STATS => {
                expect_wire_type("stats", wire_type, WireType::LengthDelimited)?;
                stats = Some(decode_stats(reader.bytes()?)?);
            }
            tags::EXTRA_FIELDS => {
                expect_wire_type("extra field", wire_type, WireType::LengthDelimited)?;
                extra_fields.push(decode_extra(reader.bytes()?)?);
            }
            _ => reader.skip(wire_type)?,
        }
    }

    let result_type =
        result_type.ok_or_else(|| CodecError::malformed("data is missing resultType"))?;
    let result = result.ok_or_else(|| CodecError::malformed("data is missing result"))?;
    let payload = decode_result(result, result_type, state)?;

    let mut data = QueryData::new(result_type, payload)?;
    data.stats = stats;
    data.extra_fields = extra_fields;
    Ok(data)
}

/// Decode the result oneof. As with any oneof, the last member present wins.
fn decode_result<'a>(
    buf: &'a [u8],
    result_type: ResultType,
    state: &mut DecodeState<'a, '_>,
) -> CodecResult<ResultPayload> {
    let mut payload = None;

    let mut reader = Reader::new(buf);
    while !reader.is_empty() {
        let (tag, wire_type) = reader.key()?;
        match tag {
            tags::RESULT_VECTOR => {
                expect_wire_type("vector", wire_type, WireType::LengthDelimited)?;
                payload = Some(ResultPayload::Vector(decode_vector(reader.bytes()?, state)?));
            }
            tags::RESULT_MATRIX => {
                expect_wire_type("matrix", wire_type, WireType::LengthDelimited)?;
                payload = Some(ResultPayload::Matrix(decode_matrix(reader.bytes()?, state)?));
            }
            tags::RESULT_SCALAR => {
                expect_wire_type("scalar", wire_type, WireType::LengthDelimited)?;
                payload = Some(ResultPayload::Scalar(decode_sample(reader.bytes()?)?));
            }
            tags::RESULT_STRING => {
                expect_wire_type("string", wire_type, WireType::LengthDelimited)?;
                payload = Some(ResultPayload::String(decode_string_sample(reader.bytes()?)?));
            }
            tags::RESULT_RAW_BYTES => {
                expect_wire_type("rawBytes", wire_type, WireType::LengthDelimited)?;
                payload = Some(decode_raw_bytes(reader.bytes()?, result_type)?);
            }
            _ => reader.skip(wire_type)?,
        }
    }

    payload.ok_or_else(|| CodecError::malformed("result carries no value"))
}

/// Older writers stored scalar and string results as their JSON form
fn decode_raw_bytes(buf: &[u8], result_type: ResultType) -> CodecResult<ResultPayload> {
    match result_type {
        ResultType::Scalar => Ok(ResultPayload::Scalar(json::decode_scalar(buf)?)),
        ResultType::String => Ok(ResultPayload::String(json::decode_string(buf)?)),
        other => Err(CodecError::malformed(format!(
            "rawBytes result is not valid for resultType '{}'",
            other
        ))),
    }
}

fn decode_matrix<'a>(
    buf: &'a [u8],
    state: &mut DecodeState<'a, '_>,
) -> CodecResult<Vec<SampleStream>> {
    let mut streams = Vec::new();

    let mut reader = Reader::new(buf);
    while !reader.is_empty() {
        let (tag, wire_type) = reader.key()?;
        if tag != tags::LIST_ITEMS {
            reader.skip(wire_type)?;
            continue;
        }
        expect_wire_type("matrix series", wire_type, WireType::LengthDelimited)?;
        streams.push(decode_stream(reader.bytes()?, state)?);
        state.checkpoint.tick()?;
    }
    Ok(streams)
}

fn decode_stream<'a>(buf: &'a [u8], state: &mut DecodeState<'a, '_>) -> CodecResult<SampleStream> {
    let mut labels = Vec::new();
    let mut samples = Vec::new();

    let mut reader = Reader::new(buf);
    while !reader.is_empty() {
        let (tag, wire_type) = reader.key()?;
        match tag {
            tags::SERIES_LABELS => {
                expect_wire_type("labels", wire_type, WireType::LengthDelimited)?;
                labels.push(decode_label(reader.bytes()?, &mut state.interner)?);
            }
            tags::STREAM_SAMPLES => {
                expect_wire_type("samples", wire_type, WireType::LengthDelimited)?;
                samples.push(decode_sample(reader.bytes()?)?);
            }
            _ => reader.skip(wire_type)?,
        }
    }

    SampleStream::new(Labels::from_pairs(labels)?, samples)
}

fn decode_vector<'a>(
    buf: &'a [u8],
    state: &mut DecodeState<'a, '_>,
) -> CodecResult<Vec<VectorSample>> {
    let mut samples = Vec::new();

    let mut reader = Reader::new(buf);
    while !reader.is_empty() {
        let (tag, wire_type) = reader.key()?;
        if tag != tags::LIST_ITEMS {
            reader.skip(wire_type)?;
            continue;
        }
        expect_wire_type("vector sample", wire_type, WireType::LengthDelimited)?;
        samples.push(decode_vector_sample(reader.bytes()?, state)?);
        state.checkpoint.tick()?;
    }
    Ok(samples)
}

fn decode_vector_sample<'a>(
    buf: &'a [u8],
    state: &mut DecodeState<'a, '_>,
) -> CodecResult<VectorSample> {
    let mut labels = Vec::new();
    let mut sample = Sample::new(0, 0.0);

    let mut reader = Reader::new(buf);
    while !reader.is_empty() {
        let (tag, wire_type) = reader.key()?;
        match tag {
            tags::SERIES_LABELS => {
                expect_wire_type("labels", wire_type, WireType::LengthDelimited)?;
                labels.push(decode_label(reader.bytes()?, &mut state.interner)?);
            }
            tags::VECTOR_SAMPLE => {
                expect_wire_type("sample", wire_type, WireType::LengthDelimited)?;
                sample = decode_sample(reader.bytes()?)?;
            }
            _ => reader.skip(wire_type)?,
        }
    }

    Ok(VectorSample::new(Labels::from_pairs(labels)?, sample))
}

fn decode_label<'a>(buf: &'a [u8], interner: &mut Interner<'a>) -> CodecResult<LabelPair> {
    let mut name = "";
    let mut value = "";

    let mut reader = Reader::new(buf);
    while !reader.is_empty() {
        let (tag, wire_type) = reader.key()?;
        match tag {
            tags::LABEL_NAME => {
                expect_wire_type("label name", wire_type, WireType::LengthDelimited)?;
                name = reader.str()?;
            }
            tags::LABEL_VALUE => {
                expect_wire_type("label value", wire_type, WireType::LengthDelimited)?;
                value = reader.str()?;
            }
            _ => reader.skip(wire_type)?,
        }
    }

    Ok(LabelPair {
        name: interner.intern(name),
        value: interner.intern(value),
    })
}

#[inline]
fn decode_sample(buf: &[u8]) -> CodecResult<Sample> {
    let mut timestamp_ms = 0i64;
    let mut value = 0f64;

    let mut reader = Reader::new(buf);
    while !reader.is_empty() {
        let (tag, wire_type) = reader.key()?;
        match tag {
            tags::SAMPLE_VALUE => {
                expect_wire_type("sample value", wire_type, WireType::SixtyFourBit)?;
                value = f64::from_bits(reader.fixed64()?);
            }
            tags::SAMPLE_TIMESTAMP => {
                expect_wire_type("sample timestamp", wire_type, WireType::Varint)?;
                timestamp_ms = reader.varint()? as i64;
            }
            _ => reader.skip(wire_type)?,
        }
    }

    Ok(Sample::new(timestamp_ms, value))
}

fn decode_string_sample(buf: &[u8]) -> CodecResult<StringSample> {
    let mut timestamp_ms = 0i64;
    let mut value = String::new();

    let mut reader = Reader::new(buf);
    while !reader.is_empty() {
        let (tag, wire_type) = reader.key()?;
        match tag {
            tags::STRING_VALUE => {
                expect_wire_type("string value", wire_type, WireType::LengthDelimited)?;
                value = reader.str()?.to_owned();
            }
            tags::STRING_TIMESTAMP => {
                expect_wire_type("string timestamp", wire_type, WireType::Varint)?;
                timestamp_ms = reader.varint()? as i64;
            }
            _ => reader.skip(wire_type)?,
        }
    }

    Ok(StringSample::new(timestamp_ms, value))
}

fn decode_stats(buf: &[u8]) -> CodecResult<Stats> {
    let proto = ProtoStats::decode(buf)
        .map_err(|e| CodecError::malformed(format!("invalid stats message: {}", e)))?;

    Ok(Stats {
        samples: proto.samples.map(sample_stats),
        extra_fields: proto
            .extra_fields
            .into_iter()
            .map(|e| ExtraField::new(e.name, e.raw_json))
            .collect(),
    })
}

fn sample_stats(proto: ProtoSampleStats) -> SampleStats {
    let steps = proto.total_queryable_samples_per_step;
    let mut samples = SampleStats {
        total_queryable_samples: proto.total_queryable_samples.map(Number::from),
        total_queryable_samples_per_step: (!steps.is_empty()).then(|| {
            steps
                .into_iter()
                .map(|step| StepStat::new(step.timestamp_ms, step.value))
                .collect()
        }),
        peak_samples: proto.peak_samples.map(Number::from),
        extra_fields: Vec::new(),
    };
    for extra in proto.extra_fields {
        json::push_sample_stats_member(&mut samples, extra.name, &extra.raw_json);
    }
    samples
}

fn decode_extra(buf: &[u8]) -> CodecResult<ExtraField> {
    let proto = ProtoExtraField::decode(buf)
        .map_err(|e| CodecError::malformed(format!("invalid extra field message: {}", e)))?;
    Ok(ExtraField::new(proto.name, proto.raw_json))
}
