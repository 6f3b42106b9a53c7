//! JSON decoding
//!
//! The envelope (`status`, `data`, ...) is read first with every member kept as raw
//! JSON so unknown members can be carried through untouched. The `result` member is
//! then parsed according to `resultType`, interning label strings and checking the
//! call context between series.

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Number;
use std::borrow::Cow;
use std::fmt;

use crate::context::{CallContext, Checkpoint};
use crate::error::{CodecError, CodecResult};
use crate::intern::Interner;
use crate::labels::{LabelPair, Labels};
use crate::model::{
    ExtraField, QueryData, QueryResponse, ResultPayload, ResultType, Sample, SampleStream, Status,
    StringSample, VectorSample,
};
use crate::stats::{SampleStats, Stats, StepStat};
use crate::time;

use super::{PEAK_SAMPLES, TOTAL_QUERYABLE_SAMPLES, TOTAL_QUERYABLE_SAMPLES_PER_STEP};

/// Decode a JSON query response
pub(crate) fn decode(
    bytes: &[u8],
    ctx: &CallContext,
    check_interval: usize,
) -> CodecResult<QueryResponse> {
    ctx.check()?;
    // A serde error raised by an aborted checkpoint is reported as the abort itself
    decode_response(bytes, ctx, check_interval).map_err(|err| match ctx.check() {
        Err(aborted) => aborted,
        Ok(()) => err,
    })
}

/// Decode a bare `[<ts>, "<value>"]` scalar
pub(crate) fn decode_scalar(raw: &[u8]) -> CodecResult<Sample> {
    let point: SamplePoint = serde_json::from_slice(raw)?;
    Ok(point.0)
}

/// Decode a bare `[<ts>, "<string>"]` string result
pub(crate) fn decode_string(raw: &[u8]) -> CodecResult<StringSample> {
    let point: StringPoint = serde_json::from_slice(raw)?;
    Ok(point.0)
}

fn decode_response(
    bytes: &[u8],
    ctx: &CallContext,
    check_interval: usize,
) -> CodecResult<QueryResponse> {
    let envelope: RawObject<'_> = serde_json::from_slice(bytes)?;

    let mut status = None;
    let mut error_type = None;
    let mut error = None;
    let mut data = None;
    let mut warnings = Vec::new();
    let mut infos = Vec::new();
    let mut extra_fields = Vec::new();

    for (key, raw) in envelope.0 {
        match key.as_str() {
            "status" => status = Some(Status::parse(&serde_json::from_str::<String>(raw.get())?)?),
            "errorType" => error_type = serde_json::from_str(raw.get())?,
            "error" => error = serde_json::from_str(raw.get())?,
            "data" => data = Some(raw),
            "warnings" => {
                warnings = serde_json::from_str::<Option<Vec<String>>>(raw.get())?.unwrap_or_default()
            }
            "infos" => {
                infos = serde_json::from_str::<Option<Vec<String>>>(raw.get())?.unwrap_or_default()
            }
            _ => extra_fields.push(ExtraField::new(key, raw.get())),
        }
    }

    let status = status.ok_or_else(|| CodecError::malformed("response is missing 'status'"))?;
    let data = match data {
        Some(raw) if !is_null(raw) => Some(decode_data(raw, ctx, check_interval)?),
        _ => None,
    };

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

fn decode_data<'a>(
    raw: &'a RawValue,
    ctx: &CallContext,
    check_interval: usize,
) -> CodecResult<QueryData> {
    let object: RawObject<'a> = serde_json::from_str(raw.get())?;

    let mut result_type = None;
    let mut result = None;
    let mut stats = None;
    let mut extra_fields = Vec::new();

    for (key, value) in object.0 {
        match key.as_str() {
            "resultType" => {
                result_type = Some(ResultType::parse(&serde_json::from_str::<String>(
                    value.get(),
                )?)?)
            }
            "result" => result = Some(value),
            "stats" if !is_null(value) => stats = Some(decode_stats(value)?),
            "stats" => {}
            _ => extra_fields.push(ExtraField::new(key, value.get())),
        }
    }

    let result_type =
        result_type.ok_or_else(|| CodecError::malformed("data is missing 'resultType'"))?;
    let result = result.ok_or_else(|| CodecError::malformed("data is missing 'result'"))?;

    let mut state = DecodeState {
        interner: Interner::new(),
        checkpoint: Checkpoint::new(ctx, check_interval),
    };

    let payload = match result_type {
        ResultType::Matrix => {
            let mut streams = Vec::new();
            if !is_null(result) {
                let series = parse_seed(result, SeriesListSeed { state: &mut state })?;
                streams.reserve_exact(series.len());
                for s in series {
                    // Series without float samples carry no `values` member at all
                    let samples = s.values.unwrap_or_default();
                    streams.push(SampleStream::new(Labels::from_pairs(s.labels)?, samples)?);
                }
            }
            ResultPayload::Matrix(streams)
        }
        ResultType::Vector => {
            let mut samples = Vec::new();
            if !is_null(result) {
                let series = parse_seed(result, SeriesListSeed { state: &mut state })?;
                samples.reserve_exact(series.len());
                for s in series {
                    let sample = match s.value {
                        Some(sample) => sample,
                        None if s.histogram => {
                            return Err(CodecError::malformed(
                                "vector sample holds a native histogram, which is not supported",
                            ))
                        }
                        None => return Err(CodecError::malformed("vector sample is missing 'value'")),
                    };
                    samples.push(VectorSample::new(Labels::from_pairs(s.labels)?, sample));
                }
            }
            ResultPayload::Vector(samples)
        }
        ResultType::Scalar => {
            let point: SamplePoint = serde_json::from_str(result.get())?;
            ResultPayload::Scalar(point.0)
        }
        ResultType::String => {
            let point: StringPoint = serde_json::from_str(result.get())?;
            ResultPayload::String(point.0)
        }
    };

    let mut data = QueryData::new(result_type, payload)?;
    data.stats = stats;
    data.extra_fields = extra_fields;
    Ok(data)
}

fn decode_stats(raw: &RawValue) -> CodecResult<Stats> {
    let object: RawObject<'_> = serde_json::from_str(raw.get())?;
    let mut stats = Stats::default();

    for (key, value) in object.0 {
        if key == "samples" && !is_null(value) {
            let object: RawObject<'_> = serde_json::from_str(value.get())?;
            let mut samples = SampleStats::default();
            for (name, member) in object.0 {
                push_sample_stats_member(&mut samples, name, member.get());
            }
            stats.samples = Some(samples);
        } else {
            stats.extra_fields.push(ExtraField::new(key, value.get()));
        }
    }
    Ok(stats)
}

/// Add one member of a `samples` stats object. Known counters are typed when they
/// hold numbers; anything else is kept as raw JSON.
pub(crate) fn push_sample_stats_member(samples: &mut SampleStats, name: String, raw: &str) {
    match name.as_str() {
        TOTAL_QUERYABLE_SAMPLES => {
            if let Ok(count) = serde_json::from_str::<Number>(raw) {
                samples.total_queryable_samples = Some(count);
                return;
            }
        }
        TOTAL_QUERYABLE_SAMPLES_PER_STEP => {
            if let Ok(steps) = serde_json::from_str::<Vec<StepPoint>>(raw) {
                samples.total_queryable_samples_per_step = Some(
                    steps
                        .into_iter()
                        .map(|StepPoint(timestamp, value)| StepStat::new(timestamp.0, value))
                        .collect(),
                );
                return;
            }
        }
        PEAK_SAMPLES => {
            if let Ok(count) = serde_json::from_str::<Number>(raw) {
                samples.peak_samples = Some(count);
                return;
            }
        }
        _ => {}
    }
    samples.extra_fields.push(ExtraField::new(name, raw));
}

fn is_null(raw: &RawValue) -> bool {
    raw.get().trim() == "null"
}

fn parse_seed<'a, S>(raw: &'a RawValue, seed: S) -> serde_json::Result<S::Value>
where
    S: DeserializeSeed<'a>,
{
    let mut de = serde_json::Deserializer::from_str(raw.get());
    let value = seed.deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

fn token_error<E: de::Error>(err: CodecError) -> E {
    match err {
        CodecError::MalformedBody(message) => E::custom(message),
        other => E::custom(other),
    }
}

/// Object members as raw JSON, in document order
struct RawObject<'a>(Vec<(String, &'a RawValue)>);

impl<'de> Deserialize<'de> for RawObject<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ObjectVisitor;

        impl<'de> Visitor<'de> for ObjectVisitor {
            type Value = RawObject<'de>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut members = Vec::with_capacity(map.size_hint().unwrap_or(8));
                while let Some(key) = map.next_key::<String>()? {
                    let value: &'de RawValue = map.next_value()?;
                    members.push((key, value));
                }
                Ok(RawObject(members))
            }
        }

        deserializer.deserialize_map(ObjectVisitor)
    }
}

/// A string borrowed from the input when it needed no unescaping
struct StrToken<'a>(Cow<'a, str>);

impl<'de> Deserialize<'de> for StrToken<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StrVisitor;

        impl<'de> Visitor<'de> for StrVisitor {
            type Value = StrToken<'de>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string")
            }

            fn visit_borrowed_str<E: de::Error>(self, v: &'de str) -> Result<Self::Value, E> {
                Ok(StrToken(Cow::Borrowed(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(StrToken(Cow::Owned(v.to_owned())))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(StrToken(Cow::Owned(v)))
            }
        }

        deserializer.deserialize_str(StrVisitor)
    }
}

struct DecodeState<'a, 'c> {
    interner: Interner<'a>,
    checkpoint: Checkpoint<'c>,
}

/// One element of a matrix or vector result before model invariants are checked
struct RawSeries {
    labels: Vec<LabelPair>,
    values: Option<Vec<Sample>>,
    value: Option<Sample>,
    histogram: bool,
}

struct SeriesListSeed<'s, 'a, 'c> {
    state: &'s mut DecodeState<'a, 'c>,
}

impl<'s, 'a, 'c> DeserializeSeed<'a> for SeriesListSeed<'s, 'a, 'c> {
    type Value = Vec<RawSeries>;

    fn deserialize<D: Deserializer<'a>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'s, 'a, 'c> Visitor<'a> for SeriesListSeed<'s, 'a, 'c> {
    type Value = Vec<RawSeries>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of series")
    }

    fn visit_seq<A: SeqAccess<'a>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let state = self.state;
        let mut series = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(s) = seq.next_element_seed(SeriesSeed { state: &mut *state })? {
            series.push(s);
            state
                .checkpoint
                .tick()
                .map_err(<A::Error as de::Error>::custom)?;
        }
        Ok(series)
    }
}

struct SeriesSeed<'s, 'a, 'c> {
    state: &'s mut DecodeState<'a, 'c>,
}

impl<'s, 'a, 'c> DeserializeSeed<'a> for SeriesSeed<'s, 'a, 'c> {
    type Value = RawSeries;

    fn deserialize<D: Deserializer<'a>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'s, 'a, 'c> Visitor<'a> for SeriesSeed<'s, 'a, 'c> {
    type Value = RawSeries;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a series object")
    }

    fn visit_map<A: MapAccess<'a>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let state = self.state;
        let mut series = RawSeries {
            labels: Vec::new(),
            values: None,
            value: None,
            histogram: false,
        };

        while let Some(key) = map.next_key::<StrToken<'a>>()? {
            match &*key.0 {
                "metric" => {
                    series.labels = map.next_value_seed(LabelsSeed {
                        interner: &mut state.interner,
                    })?
                }
                "values" => series.values = Some(map.next_value::<SampleList>()?.0),
                "value" => series.value = Some(map.next_value::<SamplePoint>()?.0),
                "histogram" => {
                    series.histogram = true;
                    map.next_value::<IgnoredAny>()?;
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(series)
    }
}

struct LabelsSeed<'s, 'a> {
    interner: &'s mut Interner<'a>,
}

impl<'s, 'a> DeserializeSeed<'a> for LabelsSeed<'s, 'a> {
    type Value = Vec<LabelPair>;

    fn deserialize<D: Deserializer<'a>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'s, 'a> Visitor<'a> for LabelsSeed<'s, 'a> {
    type Value = Vec<LabelPair>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a label object")
    }

    fn visit_map<A: MapAccess<'a>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let interner = self.interner;
        let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(8));
        while let Some(name) = map.next_key::<StrToken<'a>>()? {
            let value = map.next_value::<StrToken<'a>>()?;
            pairs.push(LabelPair {
                name: interner.intern_cow(name.0),
                value: interner.intern_cow(value.0),
            });
        }
        Ok(pairs)
    }
}

/// `[[<ts>, "<value>"], ...]`
struct SampleList(Vec<Sample>);

impl<'de> Deserialize<'de> for SampleList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = SampleList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an array of samples")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut samples = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(point) = seq.next_element::<SamplePoint>()? {
                    samples.push(point.0);
                }
                Ok(SampleList(samples))
            }
        }

        deserializer.deserialize_seq(ListVisitor)
    }
}

/// `[<ts>, "<value>"]`
struct SamplePoint(Sample);

impl<'de> Deserialize<'de> for SamplePoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PointVisitor;

        impl<'de> Visitor<'de> for PointVisitor {
            type Value = SamplePoint;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a [timestamp, value] pair")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let timestamp = seq
                    .next_element::<TimestampToken>()?
                    .ok_or_else(|| <A::Error as de::Error>::invalid_length(0, &self))?;
                let value = seq
                    .next_element::<ValueToken>()?
                    .ok_or_else(|| <A::Error as de::Error>::invalid_length(1, &self))?;
                if seq.next_element::<IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(3, &self));
                }
                Ok(SamplePoint(Sample::new(timestamp.0, value.0)))
            }
        }

        deserializer.deserialize_seq(PointVisitor)
    }
}

/// `[<ts>, "<string>"]`
struct StringPoint(StringSample);

impl<'de> Deserialize<'de> for StringPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PointVisitor;

        impl<'de> Visitor<'de> for PointVisitor {
            type Value = StringPoint;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a [timestamp, string] pair")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let timestamp = seq
                    .next_element::<TimestampToken>()?
                    .ok_or_else(|| <A::Error as de::Error>::invalid_length(0, &self))?;
                let value = seq
                    .next_element::<String>()?
                    .ok_or_else(|| <A::Error as de::Error>::invalid_length(1, &self))?;
                if seq.next_element::<IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(3, &self));
                }
                Ok(StringPoint(StringSample::new(timestamp.0, value)))
            }
        }

        deserializer.deserialize_seq(PointVisitor)
    }
}

/// Seconds since the epoch, as a number or a decimal string, converted to milliseconds
struct TimestampToken(i64);

impl<'de> Deserialize<'de> for TimestampToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TimestampVisitor;

        impl<'de> Visitor<'de> for TimestampVisitor {
            type Value = TimestampToken;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a timestamp in seconds")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                time::whole_seconds_to_millis(v)
                    .map(TimestampToken)
                    .map_err(token_error)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                let seconds = i64::try_from(v)
                    .map_err(|_| E::custom(format!("timestamp out of range: {}", v)))?;
                self.visit_i64(seconds)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                time::seconds_to_millis(v)
                    .map(TimestampToken)
                    .map_err(token_error)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                time::parse_timestamp(v)
                    .map(TimestampToken)
                    .map_err(token_error)
            }
        }

        deserializer.deserialize_any(TimestampVisitor)
    }
}

/// A sample value, normally a string but numbers are accepted too
struct ValueToken(f64);

impl<'de> Deserialize<'de> for ValueToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = ValueToken;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a sample value")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(ValueToken(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ValueToken(v as f64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(ValueToken(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                time::parse_float(v).map(ValueToken).map_err(token_error)
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// `[<ts>, <count>]`
#[derive(Deserialize)]
struct StepPoint(TimestampToken, Number);
