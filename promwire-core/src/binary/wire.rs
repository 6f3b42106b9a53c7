//! Protobuf wire primitives and message layout
//!
//! ```text
//! message Response    { string status = 1; Data data = 2; string error_type = 3;
//!                       string error = 4; repeated string warnings = 6;
//!                       repeated string infos = 7; repeated ExtraField extra = 15; }
//! message Data        { string result_type = 1; Result result = 2; Stats stats = 3;
//!                       repeated ExtraField extra = 15; }
//! message Result      { oneof value { Vector vector = 1; bytes raw_bytes = 2;
//!                       Matrix matrix = 3; Sample scalar = 4; StringSample string = 5; } }
//! message Vector      { repeated VectorSample samples = 1; }
//! message VectorSample{ repeated LabelPair labels = 1; Sample sample = 2; }
//! message Matrix      { repeated SampleStream streams = 1; }
//! message SampleStream{ repeated LabelPair labels = 1; repeated Sample samples = 2; }
//! message Sample      { double value = 1; int64 timestamp_ms = 2; }
//! message StringSample{ string value = 1; int64 timestamp_ms = 2; }
//! message LabelPair   { string name = 1; string value = 2; }
//! ```
//!
//! message Stats       { SampleStats samples = 1; repeated ExtraField extra = 15; }
//! message SampleStats { optional int64 total_queryable_samples = 1;
//!                       repeated StepStat total_queryable_samples_per_step = 2;
//!                       optional int64 peak_samples = 3; repeated ExtraField extra = 15; }
//! message StepStat    { int64 value = 1; int64 timestamp_ms = 2; }
//!
//! Stats and extra fields are rare and small, so they use derived prost messages.
//! Everything on the per-series path is written and read by hand.

use bytes::BufMut;
use prost::encoding::{
    decode_key, decode_varint, encode_key, encode_varint, encoded_len_varint, key_len, WireType,
};
use prost::DecodeError;

use crate::error::{CodecError, CodecResult};

const MAX_VARINT_LEN: usize = 10;

pub(crate) mod tags {
    pub const RESPONSE_STATUS: u32 = 1;
    pub const RESPONSE_DATA: u32 = 2;
    pub const RESPONSE_ERROR_TYPE: u32 = 3;
    pub const RESPONSE_ERROR: u32 = 4;
    pub const RESPONSE_WARNINGS: u32 = 6;
    pub const RESPONSE_INFOS: u32 = 7;
    pub const EXTRA_FIELDS: u32 = 15;

    pub const DATA_RESULT_TYPE: u32 = 1;
    pub const DATA_RESULT: u32 = 2;
    pub const DATA_STATS: u32 = 3;

    pub const RESULT_VECTOR: u32 = 1;
    pub const RESULT_RAW_BYTES: u32 = 2;
    pub const RESULT_MATRIX: u32 = 3;
    pub const RESULT_SCALAR: u32 = 4;
    pub const RESULT_STRING: u32 = 5;

    pub const SERIES_LABELS: u32 = 1;
    pub const VECTOR_SAMPLE: u32 = 2;
    pub const STREAM_SAMPLES: u32 = 2;
    pub const LIST_ITEMS: u32 = 1;

    pub const SAMPLE_VALUE: u32 = 1;
    pub const SAMPLE_TIMESTAMP: u32 = 2;

    pub const STRING_VALUE: u32 = 1;
    pub const STRING_TIMESTAMP: u32 = 2;

    pub const LABEL_NAME: u32 = 1;
    pub const LABEL_VALUE: u32 = 2;
}

#[derive(Clone, PartialEq, prost::Message)]
pub(crate) struct ProtoStats {
    #[prost(message, optional, tag = "1")]
    pub samples: Option<ProtoSampleStats>,
    #[prost(message, repeated, tag = "15")]
    pub extra_fields: Vec<ProtoExtraField>,
}

/// Counters that are not 64-bit integers, and a present but empty per-step list, travel
/// in `extra_fields` as raw JSON under their JSON member name.
#[derive(Clone, PartialEq, prost::Message)]
pub(crate) struct ProtoSampleStats {
    #[prost(int64, optional, tag = "1")]
    pub total_queryable_samples: Option<i64>,
    #[prost(message, repeated, tag = "2")]
    pub total_queryable_samples_per_step: Vec<ProtoStepStat>,
    #[prost(int64, optional, tag = "3")]
    pub peak_samples: Option<i64>,
    #[prost(message, repeated, tag = "15")]
    pub extra_fields: Vec<ProtoExtraField>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub(crate) struct ProtoStepStat {
    #[prost(int64, tag = "1")]
    pub value: i64,
    #[prost(int64, tag = "2")]
    pub timestamp_ms: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub(crate) struct ProtoExtraField {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub raw_json: String,
}

/// Encoded size of a length-delimited field with a body of `body_len` bytes
#[inline]
pub(crate) fn delimited_len(tag: u32, body_len: usize) -> usize {
    key_len(tag) + encoded_len_varint(body_len as u64) + body_len
}

/// Encoded size of a string field, zero when proto3 would omit it
#[inline]
pub(crate) fn str_len(tag: u32, value: &str) -> usize {
    if value.is_empty() {
        0
    } else {
        delimited_len(tag, value.len())
    }
}

/// Encoded size of an int64 field, zero when proto3 would omit it
#[inline]
pub(crate) fn int64_len(tag: u32, value: i64) -> usize {
    if value == 0 {
        0
    } else {
        key_len(tag) + encoded_len_varint(value as u64)
    }
}

/// Encoded size of a double field. Negative zero is written to keep its sign.
#[inline]
pub(crate) fn double_len(tag: u32, value: f64) -> usize {
    if value.to_bits() == 0 {
        0
    } else {
        key_len(tag) + 8
    }
}

#[inline]
pub(crate) fn put_delimited_header(buf: &mut Vec<u8>, tag: u32, body_len: usize) {
    encode_key(tag, WireType::LengthDelimited, buf);
    encode_varint(body_len as u64, buf);
}

/// Write a string field, always, even when empty
#[inline]
pub(crate) fn put_str_always(buf: &mut Vec<u8>, tag: u32, value: &str) {
    put_delimited_header(buf, tag, value.len());
    buf.put_slice(value.as_bytes());
}

#[inline]
pub(crate) fn put_str(buf: &mut Vec<u8>, tag: u32, value: &str) {
    if !value.is_empty() {
        put_str_always(buf, tag, value);
    }
}

#[inline]
pub(crate) fn put_int64(buf: &mut Vec<u8>, tag: u32, value: i64) {
    if value != 0 {
        encode_key(tag, WireType::Varint, buf);
        encode_varint(value as u64, buf);
    }
}

#[inline]
pub(crate) fn put_double(buf: &mut Vec<u8>, tag: u32, value: f64) {
    if value.to_bits() != 0 {
        encode_key(tag, WireType::SixtyFourBit, buf);
        buf.put_f64_le(value);
    }
}

/// Bounds-checked reader over a protobuf message body
pub(crate) struct Reader<'a> {
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { rest: buf }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    pub(crate) fn varint(&mut self) -> CodecResult<u64> {
        let mut rest = self.rest;
        let value = decode_varint(&mut rest).map_err(|e| self.prefix_error(e))?;
        self.rest = rest;
        Ok(value)
    }

    /// Read a field key, rejecting group wire types
    pub(crate) fn key(&mut self) -> CodecResult<(u32, WireType)> {
        let mut rest = self.rest;
        let (tag, wire_type) = decode_key(&mut rest).map_err(|e| self.prefix_error(e))?;
        if matches!(wire_type, WireType::StartGroup | WireType::EndGroup) {
            return Err(CodecError::malformed(format!(
                "field {} uses unsupported group encoding",
                tag
            )));
        }
        self.rest = rest;
        Ok((tag, wire_type))
    }

    /// A varint cut off by the end of the buffer is truncation, anything else is malformed
    fn prefix_error(&self, err: DecodeError) -> CodecError {
        if self.rest.len() < MAX_VARINT_LEN && self.rest.iter().all(|byte| byte & 0x80 != 0) {
            CodecError::truncated("varint runs past the end of the buffer")
        } else {
            CodecError::malformed(err.to_string())
        }
    }

    /// Read a length-delimited body
    pub(crate) fn bytes(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.varint()?;
        if len > self.rest.len() as u64 {
            return Err(CodecError::truncated(format!(
                "field length {} exceeds the {} bytes remaining",
                len,
                self.rest.len()
            )));
        }
        let (body, rest) = self.rest.split_at(len as usize);
        self.rest = rest;
        Ok(body)
    }

    pub(crate) fn str(&mut self) -> CodecResult<&'a str> {
        let body = self.bytes()?;
        std::str::from_utf8(body)
            .map_err(|e| CodecError::malformed(format!("string field is not valid UTF-8: {}", e)))
    }

    pub(crate) fn fixed64(&mut self) -> CodecResult<u64> {
        if self.rest.len() < 8 {
            return Err(CodecError::truncated("fixed64 runs past the end of the buffer"));
        }
        let (head, rest) = self.rest.split_at(8);
        self.rest = rest;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(head);
        Ok(u64::from_le_bytes(bytes))
    }

    fn fixed32(&mut self) -> CodecResult<()> {
        if self.rest.len() < 4 {
            return Err(CodecError::truncated("fixed32 runs past the end of the buffer"));
        }
        self.rest = &self.rest[4..];
        Ok(())
    }

    /// Skip a field this reader does not know
    pub(crate) fn skip(&mut self, wire_type: WireType) -> CodecResult<()> {
        match wire_type {
            WireType::Varint => self.varint().map(|_| ()),
            WireType::SixtyFourBit => self.fixed64().map(|_| ()),
            WireType::LengthDelimited => self.bytes().map(|_| ()),
            WireType::ThirtyTwoBit => self.fixed32(),
            WireType::StartGroup | WireType::EndGroup => Err(CodecError::malformed(
                "group encoding is not supported",
            )),
        }
    }
}

/// Fail unless a known field arrived with the wire type its schema declares
#[inline]
pub(crate) fn expect_wire_type(
    field: &str,
    actual: WireType,
    expected: WireType,
) -> CodecResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(CodecError::malformed(format!(
            "field '{}' has wire type {:?}, expected {:?}",
            field, actual, expected
        )))
    }
}
