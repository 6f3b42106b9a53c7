//! Binary encoding
//!
//! Every nested message is length-prefixed, so sizes are worked out before anything
//! is written. The sizing pass caches per-series body lengths; the write pass then
//! fills a buffer allocated once at its exact final size.

use prost::Message;
use serde_json::Number;

use crate::context::{CallContext, Checkpoint};
use crate::error::CodecResult;
use crate::labels::Labels;
use crate::model::{ExtraField, QueryData, QueryResponse, ResultPayload, Sample, StringSample};
use crate::json::{
    write_steps, PEAK_SAMPLES, TOTAL_QUERYABLE_SAMPLES, TOTAL_QUERYABLE_SAMPLES_PER_STEP,
};
use crate::stats::{SampleStats, Stats};
use crate::time::TimestampStyle;

use super::wire::{
    delimited_len, double_len, int64_len, put_delimited_header, put_double, put_int64, put_str,
    put_str_always, str_len, tags, ProtoExtraField, ProtoSampleStats, ProtoStats, ProtoStepStat,
};

/// Encode a query response in the binary format
pub(crate) fn encode(
    response: &QueryResponse,
    ctx: &CallContext,
    check_interval: usize,
) -> CodecResult<Vec<u8>> {
    ctx.check()?;
    response.validate()?;

    let mut checkpoint = Checkpoint::new(ctx, check_interval);
    let plan = Plan::build(response, &mut checkpoint)?;

    let mut buf = Vec::with_capacity(plan.total_len);
    write_response(&mut buf, response, &plan, &mut checkpoint)?;
    debug_assert_eq!(buf.len(), plan.total_len);
    Ok(buf)
}

/// Sizes computed ahead of the write pass
struct Plan {
    total_len: usize,
    data_len: usize,
    result_len: usize,
    payload_len: usize,
    /// Body length of each series (stream or vector sample), in result order
    series_lens: Vec<usize>,
    stats: Option<ProtoStats>,
    response_extras: Vec<ProtoExtraField>,
    data_extras: Vec<ProtoExtraField>,
}

impl Plan {
    fn build(response: &QueryResponse, checkpoint: &mut Checkpoint<'_>) -> CodecResult<Self> {
        let mut plan = Plan {
            total_len: 0,
            data_len: 0,
            result_len: 0,
            payload_len: 0,
            series_lens: Vec::new(),
            stats: None,
            response_extras: proto_extras(&response.extra_fields),
            data_extras: Vec::new(),
        };

        let mut total = delimited_len(tags::RESPONSE_STATUS, response.status.as_str().len());

        if let Some(data) = &response.data {
            plan.measure_data(data, checkpoint)?;
            total += delimited_len(tags::RESPONSE_DATA, plan.data_len);
        }
        if let Some(error_type) = &response.error_type {
            total += delimited_len(tags::RESPONSE_ERROR_TYPE, error_type.len());
        }
        if let Some(error) = &response.error {
            total += delimited_len(tags::RESPONSE_ERROR, error.len());
        }
        total += response
            .warnings
            .iter()
            .map(|w| delimited_len(tags::RESPONSE_WARNINGS, w.len()))
            .sum::<usize>();
        total += response
            .infos
            .iter()
            .map(|i| delimited_len(tags::RESPONSE_INFOS, i.len()))
            .sum::<usize>();
        total += extras_len(&plan.response_extras);

        plan.total_len = total;
        Ok(plan)
    }

    fn measure_data(&mut self, data: &QueryData, checkpoint: &mut Checkpoint<'_>) -> CodecResult<()> {
        self.payload_len = match &data.result {
            ResultPayload::Matrix(streams) => {
                self.series_lens.reserve_exact(streams.len());
                let mut len = 0;
                for stream in streams {
                    let body = labels_len(&stream.labels)
                        + stream
                            .samples
                            .iter()
                            .map(|s| delimited_len(tags::STREAM_SAMPLES, sample_len(s)))
                            .sum::<usize>();
                    self.series_lens.push(body);
                    len += delimited_len(tags::LIST_ITEMS, body);
                    checkpoint.tick()?;
                }
                len
            }
            ResultPayload::Vector(samples) => {
                self.series_lens.reserve_exact(samples.len());
                let mut len = 0;
                for vector_sample in samples {
                    let body = labels_len(&vector_sample.labels)
                        + delimited_len(tags::VECTOR_SAMPLE, sample_len(&vector_sample.sample));
                    self.series_lens.push(body);
                    len += delimited_len(tags::LIST_ITEMS, body);
                    checkpoint.tick()?;
                }
                len
            }
            ResultPayload::Scalar(sample) => sample_len(sample),
            ResultPayload::String(string) => string_sample_len(string),
        };

        self.result_len = delimited_len(result_tag(&data.result), self.payload_len);

        self.stats = data.stats.as_ref().map(proto_stats);
        self.data_extras = proto_extras(&data.extra_fields);

        self.data_len = delimited_len(tags::DATA_RESULT_TYPE, data.result_type().as_str().len())
            + delimited_len(tags::DATA_RESULT, self.result_len)
            + self
                .stats
                .as_ref()
                .map(|s| prost::encoding::message::encoded_len(tags::DATA_STATS, s))
                .unwrap_or(0)
            + extras_len(&self.data_extras);
        Ok(())
    }
}

fn write_response(
    buf: &mut Vec<u8>,
    response: &QueryResponse,
    plan: &Plan,
    checkpoint: &mut Checkpoint<'_>,
) -> CodecResult<()> {
    put_str_always(buf, tags::RESPONSE_STATUS, response.status.as_str());

    if let Some(data) = &response.data {
        put_delimited_header(buf, tags::RESPONSE_DATA, plan.data_len);
        write_data(buf, data, plan, checkpoint)?;
    }
    if let Some(error_type) = &response.error_type {
        put_str_always(buf, tags::RESPONSE_ERROR_TYPE, error_type);
    }
    if let Some(error) = &response.error {
        put_str_always(buf, tags::RESPONSE_ERROR, error);
    }
    for warning in &response.warnings {
        put_str_always(buf, tags::RESPONSE_WARNINGS, warning);
    }
    for info in &response.infos {
        put_str_always(buf, tags::RESPONSE_INFOS, info);
    }
    write_extras(buf, &plan.response_extras);
    Ok(())
}

fn write_data(
    buf: &mut Vec<u8>,
    data: &QueryData,
    plan: &Plan,
    checkpoint: &mut Checkpoint<'_>,
) -> CodecResult<()> {
    put_str_always(buf, tags::DATA_RESULT_TYPE, data.result_type().as_str());

    put_delimited_header(buf, tags::DATA_RESULT, plan.result_len);
    put_delimited_header(buf, result_tag(&data.result), plan.payload_len);

    match &data.result {
        ResultPayload::Matrix(streams) => {
            for (stream, body_len) in streams.iter().zip(&plan.series_lens) {
                put_delimited_header(buf, tags::LIST_ITEMS, *body_len);
                write_labels(buf, &stream.labels);
                for sample in &stream.samples {
                    put_delimited_header(buf, tags::STREAM_SAMPLES, sample_len(sample));
                    write_sample(buf, sample);
                }
                checkpoint.tick()?;
            }
        }
        ResultPayload::Vector(samples) => {
            for (vector_sample, body_len) in samples.iter().zip(&plan.series_lens) {
                put_delimited_header(buf, tags::LIST_ITEMS, *body_len);
                write_labels(buf, &vector_sample.labels);
                put_delimited_header(buf, tags::VECTOR_SAMPLE, sample_len(&vector_sample.sample));
                write_sample(buf, &vector_sample.sample);
                checkpoint.tick()?;
            }
        }
        ResultPayload::Scalar(sample) => write_sample(buf, sample),
        ResultPayload::String(string) => {
            put_str(buf, tags::STRING_VALUE, &string.value);
            put_int64(buf, tags::STRING_TIMESTAMP, string.timestamp_ms);
        }
    }

    if let Some(stats) = &plan.stats {
        prost::encoding::message::encode(tags::DATA_STATS, stats, buf);
    }
    write_extras(buf, &plan.data_extras);
    Ok(())
}

fn result_tag(result: &ResultPayload) -> u32 {
    match result {
        ResultPayload::Vector(_) => tags::RESULT_VECTOR,
        ResultPayload::Matrix(_) => tags::RESULT_MATRIX,
        ResultPayload::Scalar(_) => tags::RESULT_SCALAR,
        ResultPayload::String(_) => tags::RESULT_STRING,
    }
}

#[inline]
fn label_pair_len(name: &str, value: &str) -> usize {
    str_len(tags::LABEL_NAME, name) + str_len(tags::LABEL_VALUE, value)
}

fn labels_len(labels: &Labels) -> usize {
    labels
        .iter()
        .map(|pair| delimited_len(tags::SERIES_LABELS, label_pair_len(&pair.name, &pair.value)))
        .sum()
}

#[inline]
fn sample_len(sample: &Sample) -> usize {
    double_len(tags::SAMPLE_VALUE, sample.value())
        + int64_len(tags::SAMPLE_TIMESTAMP, sample.timestamp_ms)
}

fn string_sample_len(string: &StringSample) -> usize {
    str_len(tags::STRING_VALUE, &string.value) + int64_len(tags::STRING_TIMESTAMP, string.timestamp_ms)
}

fn write_labels(buf: &mut Vec<u8>, labels: &Labels) {
    for pair in labels {
        put_delimited_header(
            buf,
            tags::SERIES_LABELS,
            label_pair_len(&pair.name, &pair.value),
        );
        put_str(buf, tags::LABEL_NAME, &pair.name);
        put_str(buf, tags::LABEL_VALUE, &pair.value);
    }
}

#[inline]
fn write_sample(buf: &mut Vec<u8>, sample: &Sample) {
    put_double(buf, tags::SAMPLE_VALUE, sample.value());
    put_int64(buf, tags::SAMPLE_TIMESTAMP, sample.timestamp_ms);
}

fn proto_stats(stats: &Stats) -> ProtoStats {
    ProtoStats {
        samples: stats.samples.as_ref().map(proto_sample_stats),
        extra_fields: proto_extras(&stats.extra_fields),
    }
}

fn proto_sample_stats(samples: &SampleStats) -> ProtoSampleStats {
    let mut proto = ProtoSampleStats::default();

    if let Some(steps) = &samples.total_queryable_samples_per_step {
        let integral: Option<Vec<ProtoStepStat>> = steps
            .iter()
            .map(|step| {
                step.value.as_i64().map(|value| ProtoStepStat {
                    value,
                    timestamp_ms: step.timestamp_ms,
                })
            })
            .collect();
        match integral {
            Some(list) if !list.is_empty() => proto.total_queryable_samples_per_step = list,
            _ => {
                let mut raw = Vec::new();
                // Writing into a Vec cannot fail
                let _ = write_steps(&mut raw, steps, TimestampStyle::Prometheus);
                proto.extra_fields.push(ProtoExtraField {
                    name: TOTAL_QUERYABLE_SAMPLES_PER_STEP.to_string(),
                    raw_json: String::from_utf8_lossy(&raw).into_owned(),
                });
            }
        }
    }
    proto.total_queryable_samples = counter_field(
        &samples.total_queryable_samples,
        TOTAL_QUERYABLE_SAMPLES,
        &mut proto.extra_fields,
    );
    proto.peak_samples = counter_field(
        &samples.peak_samples,
        PEAK_SAMPLES,
        &mut proto.extra_fields,
    );

    proto.extra_fields.extend(proto_extras(&samples.extra_fields));
    proto
}

/// Typed value of a counter, or `None` with the counter moved to `extras` when it is
/// not a 64-bit integer
fn counter_field(
    counter: &Option<Number>,
    name: &str,
    extras: &mut Vec<ProtoExtraField>,
) -> Option<i64> {
    let counter = counter.as_ref()?;
    match counter.as_i64() {
        Some(value) => Some(value),
        None => {
            extras.push(ProtoExtraField {
                name: name.to_string(),
                raw_json: counter.to_string(),
            });
            None
        }
    }
}

fn proto_extras(fields: &[ExtraField]) -> Vec<ProtoExtraField> {
    fields
        .iter()
        .map(|field| ProtoExtraField {
            name: field.name.clone(),
            raw_json: field.raw_json.clone(),
        })
        .collect()
}

fn extras_len(extras: &[ProtoExtraField]) -> usize {
    extras
        .iter()
        .map(|e| delimited_len(tags::EXTRA_FIELDS, e.encoded_len()))
        .sum()
}

fn write_extras(buf: &mut Vec<u8>, extras: &[ProtoExtraField]) {
    for extra in extras {
        prost::encoding::message::encode(tags::EXTRA_FIELDS, extra, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::model::{SampleStream, VectorSample};
    use crate::stats::StepStat;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        Labels::try_from_iter(pairs.iter().copied()).unwrap()
    }

    fn encode_bytes(response: &QueryResponse) -> Vec<u8> {
        encode(response, &CallContext::background(), 256).unwrap()
    }

    #[test]
    fn test_scalar_layout() {
        let response =
            QueryResponse::success(QueryData::from_payload(ResultPayload::Scalar(Sample::new(
                1, 1.0,
            ))));
        let bytes = encode_bytes(&response);

        let expected: Vec<u8> = [
            &[0x0a, 7][..],
            b"success",
            &[0x12, 23],
            &[0x0a, 6],
            b"scalar",
            &[0x12, 13, 0x22, 11],
            &[0x09],
            &1.0f64.to_le_bytes(),
            &[0x10, 1],
        ]
        .concat();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_buffer_is_allocated_at_exact_size() {
        let streams = (0..50)
            .map(|i| {
                SampleStream::new(
                    labels(&[("__name__", "up"), ("instance", &format!("host-{}", i))]),
                    (0..20).map(|t| Sample::new(t * 15_000, t as f64 * 0.5)).collect(),
                )
                .unwrap()
            })
            .collect();
        let mut response = QueryResponse::success(QueryData::from_payload(ResultPayload::Matrix(
            streams,
        )))
        .with_warnings(vec!["slow".to_string()]);
        response.extra_fields.push(ExtraField::new("x", "1"));

        let bytes = encode_bytes(&response);
        assert_eq!(bytes.len(), bytes.capacity());
    }

    #[test]
    fn test_zero_sample_still_written() {
        let response = QueryResponse::success(QueryData::from_payload(ResultPayload::Vector(vec![
            VectorSample::new(Labels::new(), Sample::new(0, 0.0)),
        ])));
        let bytes = encode_bytes(&response);
        // Vector item with an empty sample message: 0x0a 0x02 0x12 0x00
        assert!(bytes.windows(4).any(|w| w == [0x0a, 0x02, 0x12, 0x00]));
    }

    #[test]
    fn test_invalid_model_rejected() {
        let mut response = QueryResponse::error("internal", "boom");
        response.data = Some(QueryData::from_payload(ResultPayload::Vector(Vec::new())));
        assert!(matches!(
            encode(&response, &CallContext::background(), 256),
            Err(CodecError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_sample_stats_layout() {
        let samples = SampleStats {
            total_queryable_samples: Some(4.into()),
            total_queryable_samples_per_step: Some(vec![StepStat::new(1_000, 4)]),
            peak_samples: Some(0.into()),
            extra_fields: Vec::new(),
        };
        let proto = proto_sample_stats(&samples);
        assert_eq!(proto.total_queryable_samples, Some(4));
        assert_eq!(proto.peak_samples, Some(0));
        assert_eq!(proto.total_queryable_samples_per_step.len(), 1);
        assert!(proto.extra_fields.is_empty());
        // A present zero counter is still on the wire
        assert!(proto.encode_to_vec().windows(2).any(|w| w == [0x18, 0x00]));
    }

    #[test]
    fn test_untyped_sample_stats_travel_as_json() {
        let samples = SampleStats {
            total_queryable_samples: Number::from_f64(4.5),
            total_queryable_samples_per_step: Some(Vec::new()),
            peak_samples: None,
            extra_fields: vec![ExtraField::new("newCounter", "9")],
        };
        let proto = proto_sample_stats(&samples);
        assert_eq!(proto.total_queryable_samples, None);
        assert!(proto.total_queryable_samples_per_step.is_empty());

        let extras: Vec<(&str, &str)> = proto
            .extra_fields
            .iter()
            .map(|e| (e.name.as_str(), e.raw_json.as_str()))
            .collect();
        assert_eq!(
            extras,
            vec![
                ("totalQueryableSamplesPerStep", "[]"),
                ("totalQueryableSamples", "4.5"),
                ("newCounter", "9"),
            ]
        );
    }
}
