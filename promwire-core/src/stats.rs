//! Query statistics carried next to the result
//!
//! The codec does not interpret these numbers, it only carries them across formats.
//! Keys it does not know about are kept as [`ExtraField`]s, and a known key is only
//! written back when it was present.

use serde_json::Number;

use crate::model::ExtraField;

/// Statistics section of a response
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Stats {
    /// Sample counters reported by the query engine
    pub samples: Option<SampleStats>,

    /// Any other stats keys (timings and the like), as raw JSON
    pub extra_fields: Vec<ExtraField>,
}

/// Sample counters
///
/// Counters keep the JSON number they were read from, integer or not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SampleStats {
    pub total_queryable_samples: Option<Number>,

    /// Samples touched per evaluation step, in step order
    pub total_queryable_samples_per_step: Option<Vec<StepStat>>,

    pub peak_samples: Option<Number>,

    /// Members of `samples` other than the counters above, as raw JSON
    pub extra_fields: Vec<ExtraField>,
}

/// Samples counted at one step
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepStat {
    pub timestamp_ms: i64,
    pub value: Number,
}

impl Stats {
    /// Stats holding only a total sample count
    pub fn with_total_samples(total: i64) -> Self {
        Self {
            samples: Some(SampleStats {
                total_queryable_samples: Some(total.into()),
                ..Default::default()
            }),
            extra_fields: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_none() && self.extra_fields.is_empty()
    }
}

impl StepStat {
    pub fn new<V: Into<Number>>(timestamp_ms: i64, value: V) -> Self {
        Self {
            timestamp_ms,
            value: value.into(),
        }
    }
}
