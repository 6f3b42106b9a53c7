//! Label pairs identifying a series

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{CodecError, CodecResult};

/// Label sets at or below this size are checked for duplicates with a linear scan
const LINEAR_SCAN_LIMIT: usize = 16;

/// A single label name/value pair.
///
/// Names and values are reference counted so decoders can share one allocation
/// between every series carrying the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelPair {
    pub name: Arc<str>,
    pub value: Arc<str>,
}

/// An insertion-ordered set of labels with unique names
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Labels(Vec<LabelPair>);

impl LabelPair {
    /// Create a new label pair
    pub fn new<N, V>(name: N, value: V) -> Self
    where
        N: Into<Arc<str>>,
        V: Into<Arc<str>>,
    {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Labels {
    /// Create an empty label set
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Create an empty label set with room for `capacity` pairs
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Build a label set from pairs, rejecting duplicate names
    pub fn from_pairs(pairs: Vec<LabelPair>) -> CodecResult<Self> {
        if let Some(name) = first_duplicate(&pairs) {
            return Err(CodecError::malformed_result(format!(
                "duplicate label name '{}'",
                name
            )));
        }
        Ok(Self(pairs))
    }

    /// Build a label set from string tuples, rejecting duplicate names
    pub fn try_from_iter<I, N, V>(iter: I) -> CodecResult<Self>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<Arc<str>>,
        V: Into<Arc<str>>,
    {
        Self::from_pairs(
            iter.into_iter()
                .map(|(name, value)| LabelPair::new(name, value))
                .collect(),
        )
    }

    /// Append a label, failing if the name is already present
    pub fn push<N, V>(&mut self, name: N, value: V) -> CodecResult<()>
    where
        N: Into<Arc<str>>,
        V: Into<Arc<str>>,
    {
        let pair = LabelPair::new(name, value);
        if self.contains(&pair.name) {
            return Err(CodecError::malformed_result(format!(
                "duplicate label name '{}'",
                pair.name
            )));
        }
        self.0.push(pair);
        Ok(())
    }

    /// Get a label value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|pair| &*pair.name == name)
            .map(|pair| &*pair.value)
    }

    /// Check if a label name exists
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|pair| &*pair.name == name)
    }

    /// Get the number of labels
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the label set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over pairs in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, LabelPair> {
        self.0.iter()
    }

    /// Borrow the pairs as a slice
    pub fn as_slice(&self) -> &[LabelPair] {
        &self.0
    }

    /// Name of the first label that appears twice, if any
    pub fn first_duplicate(&self) -> Option<&str> {
        first_duplicate(&self.0)
    }

    /// Total bytes of label names and values
    pub fn text_len(&self) -> usize {
        self.0
            .iter()
            .map(|pair| pair.name.len() + pair.value.len())
            .sum()
    }

    /// Consume the set and return its pairs
    pub fn into_inner(self) -> Vec<LabelPair> {
        self.0
    }
}

fn first_duplicate(pairs: &[LabelPair]) -> Option<&str> {
    if pairs.len() <= LINEAR_SCAN_LIMIT {
        for (i, pair) in pairs.iter().enumerate() {
            if pairs[..i].iter().any(|earlier| earlier.name == pair.name) {
                return Some(&*pair.name);
            }
        }
        return None;
    }

    let mut seen = HashSet::with_capacity(pairs.len());
    pairs
        .iter()
        .find(|pair| !seen.insert(&*pair.name))
        .map(|pair| &*pair.name)
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a LabelPair;
    type IntoIter = std::slice::Iter<'a, LabelPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, pair) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=\"{}\"", pair.name, pair.value)?;
        }
        write!(f, "}}")
    }
}
