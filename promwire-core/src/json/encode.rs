//! JSON encoding
//!
//! Output follows the Prometheus HTTP API serializer: member order
//! `status, data, errorType, error, warnings, infos`, label maps as objects in label
//! order, `[<ts>, "<value>"]` sample pairs. Extra fields are written after the known
//! members of the object they were captured from.

use std::io::Write;

use crate::context::{CallContext, Checkpoint};
use crate::error::CodecResult;
use crate::labels::Labels;
use crate::model::{ExtraField, QueryData, QueryResponse, ResultPayload, Sample};
use crate::stats::{SampleStats, Stats, StepStat};
use crate::time::{self, TimestampStyle};

/// Rough per-sample output size: `[1609459200.123,"0.123456789"],`
const SAMPLE_SIZE_ESTIMATE: usize = 32;

/// Upper bound on the initial buffer, the vector grows past it if needed
const MAX_PRESIZE: usize = 64 * 1024 * 1024;

/// Encode a query response as JSON
pub(crate) fn encode(
    response: &QueryResponse,
    ctx: &CallContext,
    style: TimestampStyle,
    check_interval: usize,
) -> CodecResult<Vec<u8>> {
    ctx.check()?;
    response.validate()?;

    let mut writer = JsonWriter {
        out: Vec::with_capacity(estimate_len(response).min(MAX_PRESIZE)),
        style,
        checkpoint: Checkpoint::new(ctx, check_interval),
    };
    writer.response(response)?;
    Ok(writer.out)
}

fn estimate_len(response: &QueryResponse) -> usize {
    let payload = match response.data.as_ref().map(|d| &d.result) {
        Some(ResultPayload::Matrix(streams)) => streams
            .iter()
            .map(|s| labels_len(&s.labels) + 32 + s.samples.len() * SAMPLE_SIZE_ESTIMATE)
            .sum(),
        Some(ResultPayload::Vector(samples)) => samples
            .iter()
            .map(|s| labels_len(&s.labels) + 32 + SAMPLE_SIZE_ESTIMATE)
            .sum(),
        Some(ResultPayload::String(s)) => s.value.len() + SAMPLE_SIZE_ESTIMATE,
        Some(ResultPayload::Scalar(_)) | None => SAMPLE_SIZE_ESTIMATE,
    };
    let messages: usize = response
        .warnings
        .iter()
        .chain(response.infos.iter())
        .chain(response.error.iter())
        .map(|m| m.len() + 3)
        .sum();
    128 + payload + messages
}

fn labels_len(labels: &Labels) -> usize {
    labels.text_len() + labels.len() * 6
}

/// Write a per-step sample count list, `[[<ts>, <count>], ...]`
pub(crate) fn write_steps<W: Write>(
    out: &mut W,
    steps: &[StepStat],
    style: TimestampStyle,
) -> std::io::Result<()> {
    out.write_all(b"[")?;
    for (i, step) in steps.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        out.write_all(b"[")?;
        time::write_timestamp(out, step.timestamp_ms, style)?;
        write!(out, ",{}]", step.value)?;
    }
    out.write_all(b"]")
}

struct JsonWriter<'c> {
    out: Vec<u8>,
    style: TimestampStyle,
    checkpoint: Checkpoint<'c>,
}

impl<'c> JsonWriter<'c> {
    fn response(&mut self, response: &QueryResponse) -> CodecResult<()> {
        self.raw("{\"status\":")?;
        self.string(response.status.as_str())?;

        if let Some(data) = &response.data {
            self.raw(",\"data\":")?;
            self.data(data)?;
        }
        if let Some(error_type) = &response.error_type {
            self.raw(",\"errorType\":")?;
            self.string(error_type)?;
        }
        if let Some(error) = &response.error {
            self.raw(",\"error\":")?;
            self.string(error)?;
        }
        if !response.warnings.is_empty() {
            self.raw(",\"warnings\":")?;
            self.string_list(&response.warnings)?;
        }
        if !response.infos.is_empty() {
            self.raw(",\"infos\":")?;
            self.string_list(&response.infos)?;
        }
        self.extra_fields(&response.extra_fields)?;
        self.raw("}")
    }

    fn data(&mut self, data: &QueryData) -> CodecResult<()> {
        self.raw("{\"resultType\":")?;
        self.string(data.result_type().as_str())?;
        self.raw(",\"result\":")?;

        match &data.result {
            ResultPayload::Matrix(streams) => {
                self.raw("[")?;
                for (i, stream) in streams.iter().enumerate() {
                    if i > 0 {
                        self.raw(",")?;
                    }
                    self.raw("{\"metric\":")?;
                    self.labels(&stream.labels)?;
                    if !stream.samples.is_empty() {
                        self.raw(",\"values\":[")?;
                        for (j, sample) in stream.samples.iter().enumerate() {
                            if j > 0 {
                                self.raw(",")?;
                            }
                            self.sample(sample)?;
                        }
                        self.raw("]")?;
                    }
                    self.raw("}")?;
                    self.checkpoint.tick()?;
                }
                self.raw("]")?;
            }
            ResultPayload::Vector(samples) => {
                self.raw("[")?;
                for (i, vector_sample) in samples.iter().enumerate() {
                    if i > 0 {
                        self.raw(",")?;
                    }
                    self.raw("{\"metric\":")?;
                    self.labels(&vector_sample.labels)?;
                    self.raw(",\"value\":")?;
                    self.sample(&vector_sample.sample)?;
                    self.raw("}")?;
                    self.checkpoint.tick()?;
                }
                self.raw("]")?;
            }
            ResultPayload::Scalar(sample) => self.sample(sample)?,
            ResultPayload::String(string) => {
                self.raw("[")?;
                self.timestamp(string.timestamp_ms)?;
                self.raw(",")?;
                self.string(&string.value)?;
                self.raw("]")?;
            }
        }

        if let Some(stats) = &data.stats {
            self.raw(",\"stats\":")?;
            self.stats(stats)?;
        }
        self.extra_fields(&data.extra_fields)?;
        self.raw("}")
    }

    fn stats(&mut self, stats: &Stats) -> CodecResult<()> {
        self.raw("{")?;
        let mut first = true;
        for field in &stats.extra_fields {
            self.separator(&mut first)?;
            self.member(field)?;
        }
        if let Some(samples) = &stats.samples {
            self.separator(&mut first)?;
            self.raw("\"samples\":")?;
            self.sample_stats(samples)?;
        }
        self.raw("}")
    }

    fn sample_stats(&mut self, samples: &SampleStats) -> CodecResult<()> {
        self.raw("{")?;
        let mut first = true;
        if let Some(steps) = &samples.total_queryable_samples_per_step {
            self.separator(&mut first)?;
            self.raw("\"totalQueryableSamplesPerStep\":")?;
            write_steps(&mut self.out, steps, self.style)?;
        }
        if let Some(total) = &samples.total_queryable_samples {
            self.separator(&mut first)?;
            write!(self.out, "\"totalQueryableSamples\":{}", total)?;
        }
        if let Some(peak) = &samples.peak_samples {
            self.separator(&mut first)?;
            write!(self.out, "\"peakSamples\":{}", peak)?;
        }
        for field in &samples.extra_fields {
            self.separator(&mut first)?;
            self.member(field)?;
        }
        self.raw("}")
    }

    fn separator(&mut self, first: &mut bool) -> CodecResult<()> {
        if !std::mem::take(first) {
            self.raw(",")?;
        }
        Ok(())
    }

    fn labels(&mut self, labels: &Labels) -> CodecResult<()> {
        self.raw("{")?;
        for (i, pair) in labels.iter().enumerate() {
            if i > 0 {
                self.raw(",")?;
            }
            self.string(&pair.name)?;
            self.raw(":")?;
            self.string(&pair.value)?;
        }
        self.raw("}")
    }

    #[inline]
    fn sample(&mut self, sample: &Sample) -> CodecResult<()> {
        self.raw("[")?;
        self.timestamp(sample.timestamp_ms)?;
        self.raw(",\"")?;
        time::write_float(&mut self.out, sample.value())?;
        self.raw("\"]")
    }

    #[inline]
    fn timestamp(&mut self, timestamp_ms: i64) -> CodecResult<()> {
        time::write_timestamp(&mut self.out, timestamp_ms, self.style)?;
        Ok(())
    }

    fn extra_fields(&mut self, fields: &[ExtraField]) -> CodecResult<()> {
        for field in fields {
            self.raw(",")?;
            self.member(field)?;
        }
        Ok(())
    }

    fn member(&mut self, field: &ExtraField) -> CodecResult<()> {
        self.string(&field.name)?;
        self.raw(":")?;
        self.raw(&field.raw_json)
    }

    fn string_list(&mut self, values: &[String]) -> CodecResult<()> {
        self.raw("[")?;
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.raw(",")?;
            }
            self.string(value)?;
        }
        self.raw("]")
    }

    #[inline]
    fn string(&mut self, value: &str) -> CodecResult<()> {
        serde_json::to_writer(&mut self.out, value)?;
        Ok(())
    }

    #[inline]
    fn raw(&mut self, text: &str) -> CodecResult<()> {
        self.out.extend_from_slice(text.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::model::{QueryData, SampleStream, StringSample, VectorSample};

    fn encode_str(response: &QueryResponse) -> String {
        let bytes = encode(
            response,
            &CallContext::background(),
            TimestampStyle::Prometheus,
            256,
        )
        .unwrap();
        String::from_utf8(bytes).unwrap()
    }

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        Labels::try_from_iter(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn test_encode_matrix() {
        let response = QueryResponse::success(QueryData::from_payload(ResultPayload::Matrix(vec![
            SampleStream::new(
                labels(&[("__name__", "up"), ("job", "api")]),
                vec![Sample::new(1_609_459_200_000, 1.0), Sample::new(1_609_459_215_500, 0.5)],
            )
            .unwrap(),
        ])));

        assert_eq!(
            encode_str(&response),
            r#"{"status":"success","data":{"resultType":"matrix","result":[{"metric":{"__name__":"up","job":"api"},"values":[[1609459200,"1"],[1609459215.500,"0.5"]]}]}}"#
        );
    }

    #[test]
    fn test_encode_vector_with_special_values() {
        let response = QueryResponse::success(QueryData::from_payload(ResultPayload::Vector(vec![
            VectorSample::new(labels(&[("a", "1")]), Sample::new(1000, f64::NAN)),
            VectorSample::new(labels(&[("a", "2")]), Sample::new(1000, f64::NEG_INFINITY)),
        ])));

        assert_eq!(
            encode_str(&response),
            r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{"a":"1"},"value":[1,"NaN"]},{"metric":{"a":"2"},"value":[1,"-Inf"]}]}}"#
        );
    }

    #[test]
    fn test_encode_scalar_and_string() {
        let scalar =
            QueryResponse::success(QueryData::from_payload(ResultPayload::Scalar(Sample::new(
                1_609_459_200_001,
                2.0,
            ))));
        assert_eq!(
            encode_str(&scalar),
            r#"{"status":"success","data":{"resultType":"scalar","result":[1609459200.001,"2"]}}"#
        );

        let string = QueryResponse::success(QueryData::from_payload(ResultPayload::String(
            StringSample::new(0, "a \"quoted\" value"),
        )));
        assert_eq!(
            encode_str(&string),
            r#"{"status":"success","data":{"resultType":"string","result":[0,"a \"quoted\" value"]}}"#
        );
    }

    #[test]
    fn test_empty_stream_has_no_values_member() {
        let response = QueryResponse::success(QueryData::from_payload(ResultPayload::Matrix(vec![
            SampleStream::new(labels(&[("job", "a")]), Vec::new()).unwrap(),
        ])));

        assert_eq!(
            encode_str(&response),
            r#"{"status":"success","data":{"resultType":"matrix","result":[{"metric":{"job":"a"}}]}}"#
        );
    }

    #[test]
    fn test_encode_extreme_magnitudes() {
        let cases = [
            (1e21, "1e+21"),
            (1e-7, "1e-07"),
            (5e-324, "5e-324"),
            (f64::MAX, "1.7976931348623157e+308"),
            (-2.5e-300, "-2.5e-300"),
            (1e20, "100000000000000000000"),
        ];
        for (value, text) in cases {
            let response = QueryResponse::success(QueryData::from_payload(ResultPayload::Scalar(
                Sample::new(0, value),
            )));
            assert_eq!(
                encode_str(&response),
                format!(
                    r#"{{"status":"success","data":{{"resultType":"scalar","result":[0,"{}"]}}}}"#,
                    text
                )
            );
        }
    }

    #[test]
    fn test_stats_members_written_when_present() {
        let mut data = QueryData::from_payload(ResultPayload::Vector(Vec::new()));
        data.stats = Some(Stats {
            samples: Some(SampleStats {
                total_queryable_samples: Some(4.into()),
                total_queryable_samples_per_step: Some(Vec::new()),
                peak_samples: Some(0.into()),
                extra_fields: vec![ExtraField::new("newCounter", "9")],
            }),
            extra_fields: Vec::new(),
        });

        assert_eq!(
            encode_str(&QueryResponse::success(data)),
            concat!(
                r#"{"status":"success","data":{"resultType":"vector","result":[],"#,
                r#""stats":{"samples":{"totalQueryableSamplesPerStep":[],"totalQueryableSamples":4,"peakSamples":0,"newCounter":9}}}}"#
            )
        );
    }

    #[test]
    fn test_encode_error_envelope() {
        let response = QueryResponse::error("bad_data", "invalid time range")
            .with_warnings(vec!["partial".to_string()]);
        assert_eq!(
            encode_str(&response),
            r#"{"status":"error","errorType":"bad_data","error":"invalid time range","warnings":["partial"]}"#
        );
    }

    #[test]
    fn test_encode_stats_and_extras() {
        let mut data = QueryData::from_payload(ResultPayload::Vector(Vec::new()));
        data.stats = Some(Stats {
            samples: Some(SampleStats {
                total_queryable_samples: Some(4.into()),
                total_queryable_samples_per_step: Some(vec![StepStat::new(1_609_459_200_000, 4)]),
                ..Default::default()
            }),
            extra_fields: vec![ExtraField::new("timings", r#"{"evalTotalTime":0.01}"#)],
        });
        data.extra_fields = vec![ExtraField::new("analysis", "null")];
        let mut response = QueryResponse::success(data);
        response.extra_fields = vec![ExtraField::new("traceId", r#""abc""#)];

        assert_eq!(
            encode_str(&response),
            concat!(
                r#"{"status":"success","data":{"resultType":"vector","result":[],"#,
                r#""stats":{"timings":{"evalTotalTime":0.01},"samples":{"totalQueryableSamplesPerStep":[[1609459200,4]],"totalQueryableSamples":4}},"#,
                r#""analysis":null},"traceId":"abc"}"#
            )
        );
    }

    #[test]
    fn test_fixed_millis_style() {
        let response =
            QueryResponse::success(QueryData::from_payload(ResultPayload::Scalar(Sample::new(
                1_609_459_200_000,
                1.0,
            ))));
        let bytes = encode(
            &response,
            &CallContext::background(),
            TimestampStyle::FixedMillis,
            256,
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"status":"success","data":{"resultType":"scalar","result":[1609459200.000,"1"]}}"#
        );
    }

    #[test]
    fn test_invalid_model_produces_no_output() {
        let mut response = QueryResponse::error("internal", "boom");
        response.error = None;
        let err = encode(
            &response,
            &CallContext::background(),
            TimestampStyle::Prometheus,
            256,
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::InvalidModel(_)));
    }
}
