//! Flat `key=value` record format shared by every state file.
//!
//! Blank lines and `#` comments are skipped, unknown keys are preserved but
//! ignored by decoders, and the last occurrence of a key wins. Key order is
//! kept stable on render so files diff cleanly.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use crate::domain::errors::{DomainError, DomainResult};

/// An ordered set of `key=value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvRecord {
    fields: BTreeMap<String, String>,
}

impl KvRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse text into a record. Lines without `=` are skipped.
    pub fn parse(text: &str) -> Self {
        let fields = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        Self { fields }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.fields {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        // Newlines would split the value into a second record line.
        let value = value.to_string().replace(['\n', '\r'], " ");
        self.fields.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Fetch a required field or report which file lacks it.
    pub fn require(&self, key: &str, path: &Path) -> DomainResult<&str> {
        self.get(key).ok_or_else(|| DomainError::MissingField {
            path: path.to_path_buf(),
            field: key.to_string(),
        })
    }

    /// Fetch and parse a required field.
    pub fn parse_field<T: FromStr>(&self, key: &str, path: &Path) -> DomainResult<T> {
        let raw = self.require(key, path)?;
        raw.parse().map_err(|_| DomainError::MalformedStateFile {
            path: path.to_path_buf(),
            reason: format!("field '{key}' has invalid value '{raw}'"),
        })
    }

    /// Parse an optional field, treating blanks and garbage as absent.
    pub fn parse_opt<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse().ok())
    }
}
