//! Per-call string interning for label names and values
//!
//! Responses repeat the same handful of label names (and often values) across
//! thousands of series. Decoders share one `Arc<str>` per distinct string for the
//! duration of a single call; nothing is kept between calls.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct Interner<'a> {
    strings: HashMap<&'a str, Arc<str>>,
}

impl<'a> Interner<'a> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Intern a string borrowed from the input buffer
    pub(crate) fn intern(&mut self, s: &'a str) -> Arc<str> {
        self.strings.entry(s).or_insert_with(|| Arc::from(s)).clone()
    }

    /// Intern a string that had to be unescaped. Only reuses existing entries.
    pub(crate) fn intern_owned(&mut self, s: String) -> Arc<str> {
        match self.strings.get(s.as_str()) {
            Some(shared) => shared.clone(),
            None => Arc::from(s),
        }
    }

    pub(crate) fn intern_cow(&mut self, s: Cow<'a, str>) -> Arc<str> {
        match s {
            Cow::Borrowed(b) => self.intern(b),
            Cow::Owned(o) => self.intern_owned(o),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.strings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_strings_share_allocation() {
        let input = String::from("job job");
        let (a, b) = input.split_at(3);
        let b = b.trim_start();

        let mut interner = Interner::new();
        let first = interner.intern(a);
        let second = interner.intern(b);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(interner.len(), 1);

        let owned = interner.intern_owned("job".to_string());
        assert!(Arc::ptr_eq(&first, &owned));
    }
}
