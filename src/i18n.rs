//! User-facing string lookup
//!
//! The host passes its translations in the configuration; lookups fall back
//! to the source string.

use std::borrow::Cow;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Translator {
    strings: HashMap<String, String>,
}

impl Translator {
    pub fn new(strings: HashMap<String, String>) -> Self {
        Self { strings }
    }

    pub fn translate<'a>(&'a self, source: &'a str) -> Cow<'a, str> {
        match self.strings.get(source) {
            Some(localized) => Cow::Borrowed(localized.as_str()),
            None => Cow::Borrowed(source),
        }
    }

    /// Localized string for `key`, if the host provided one
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.strings.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
