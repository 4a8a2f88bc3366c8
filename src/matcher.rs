//! One-line pattern matching for the synth's tabular text output.
//!
//! A `Matcher` holds the captures of the *last* line it was given. Asking for
//! captures after a failed match is a `StateError`, never a stale record.

use std::collections::BTreeMap;
use std::str::FromStr;

use regex::Regex;

use crate::error::{ProtocolParseError, StateError};

pub struct Matcher {
    re: Regex,
    current: Option<Captured>,
}

struct Captured {
    groups: Vec<Option<String>>,
    named: BTreeMap<String, Option<String>>,
}

/// Named captures of one matched line, in a caller-chosen field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, Option<String>)>,
}

impl Matcher {
    /// Compile `pattern`. It is matched from the start of each line.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            re: Regex::new(&format!("^(?:{pattern})"))?,
            current: None,
        })
    }

    /// Try the pattern against one line. Bytes are decoded lossily first.
    pub fn is_match(&mut self, line: impl AsRef<[u8]>) -> bool {
        let text = String::from_utf8_lossy(line.as_ref());
        self.current = self.re.captures(&text).map(|caps| {
            let groups = caps
                .iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()))
                .collect();
            let named = self
                .re
                .capture_names()
                .flatten()
                .map(|name| {
                    let value = caps.name(name).map(|m| m.as_str().to_string());
                    (name.to_string(), value)
                })
                .collect();
            Captured { groups, named }
        });
        self.current.is_some()
    }

    /// The i-th capture group (0-based, not counting the whole match).
    pub fn get(&self, i: usize) -> Option<&str> {
        self.current
            .as_ref()
            .and_then(|c| c.groups.get(i))
            .and_then(|g| g.as_deref())
    }

    /// A named capture of the current match.
    pub fn name(&self, field: &str) -> Option<&str> {
        self.current
            .as_ref()
            .and_then(|c| c.named.get(field))
            .and_then(|g| g.as_deref())
    }

    /// All positional captures of the current match.
    pub fn groups(&self) -> Result<Vec<Option<&str>>, StateError> {
        let current = self.current.as_ref().ok_or(StateError)?;
        Ok(current.groups.iter().map(|g| g.as_deref()).collect())
    }

    /// Build a record from the named captures. An empty `fields` list takes
    /// every named group, sorted by name.
    pub fn record(&self, fields: &[&str]) -> Result<Record, StateError> {
        self.record_with(fields, &[])
    }

    /// Like [`record`](Self::record), with extra values that override or extend
    /// the captures.
    pub fn record_with(
        &self,
        fields: &[&str],
        extras: &[(&str, String)],
    ) -> Result<Record, StateError> {
        let current = self.current.as_ref().ok_or(StateError)?;

        let mut all: BTreeMap<&str, Option<&str>> = current
            .named
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_deref()))
            .collect();
        for (k, v) in extras {
            all.insert(*k, Some(v.as_str()));
        }

        let fields = if fields.is_empty() {
            all.iter()
                .map(|(&k, &v)| (k.to_string(), v.map(str::to_string)))
                .collect()
        } else {
            fields
                .iter()
                .map(|&f| {
                    let value = all.get(f).copied().flatten().map(str::to_string);
                    (f.to_string(), value)
                })
                .collect()
        };
        Ok(Record { fields })
    }
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == field)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> Vec<Option<&str>> {
        self.fields.iter().map(|(_, v)| v.as_deref()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn text(&self, field: &str) -> Result<&str, ProtocolParseError> {
        self.get(field)
            .ok_or_else(|| ProtocolParseError::MissingField(field.to_string()))
    }

    pub fn parse<T: FromStr>(&self, field: &str) -> Result<T, ProtocolParseError> {
        let raw = self.text(field)?;
        raw.trim()
            .parse()
            .map_err(|_| ProtocolParseError::BadValue {
                field: field.to_string(),
                value: raw.to_string(),
            })
    }
}
