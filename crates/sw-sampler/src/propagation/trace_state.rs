// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! W3C `tracestate` codec.
//!
//! A `tracestate` header is an ordered, comma-separated list of `key=value` members where the
//! leftmost member belongs to the vendor that most recently touched the trace:
//!
//! ```text
//! tracestate: sw=00f067aa0ba902b7-01,congo=t61rcWkgMzE,rojo=00f067aa0ba902b7
//! ```
//!
//! # Limits
//!
//! Outbound headers never exceed [`MAX_SIZE`] characters nor [`MAX_MEMBERS`] members. When the
//! foreign members do not fit next to the `sw` member, they are packed greedily in their original
//! order, and the first member of [`OVERSIZE_ENTRY_LENGTH`] characters or more is sacrificed.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

/// Vendor key carrying `<span id>-<flags>`.
pub const SW_KEY: &str = "sw";

/// Vendor key piggybacking the sanitized trigger-trace response.
pub const XTRACE_OPTIONS_RESPONSE_KEY: &str = "xtrace_options_response";

/// Maximum serialized length of an outbound `tracestate`.
pub const MAX_SIZE: usize = 512;

/// Maximum number of members of an outbound `tracestate`.
pub const MAX_MEMBERS: usize = 32;

/// Members at least this long (`key=value`) may be dropped to make room.
pub const OVERSIZE_ENTRY_LENGTH: usize = 129;

const ENTRY_DELIMITER: char = ',';
const KEY_VALUE_DELIMITER: char = '=';

lazy_static! {
    static ref SPAN_ID_REGEX: Regex = Regex::new(r"^[0-9a-fA-F]{16}$").expect("failed creating regex");
}

/// Ordered list of `tracestate` members with unique keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceState {
    entries: Vec<(String, String)>,
}

impl TraceState {
    /// Parses a `tracestate` header value.
    ///
    /// Members are split on `,` and then on the first `=`; whitespace around members, keys and
    /// values is ignored. Members without `=`, with an empty key, a key containing whitespace, or
    /// an empty value are dropped. When a key repeats, the leftmost member is kept.
    ///
    /// ```
    /// use sw_sampler::propagation::trace_state::TraceState;
    ///
    /// let ts = TraceState::parse("sw=a2d8376f3cab2837-00, congo=t61rcWkgMzE,broken");
    /// assert_eq!(ts.len(), 2);
    /// assert_eq!(ts.get("congo"), Some("t61rcWkgMzE"));
    /// ```
    #[must_use]
    pub fn parse(header: &str) -> Self {
        let mut entries: Vec<(String, String)> = Vec::new();
        for member in header.split(ENTRY_DELIMITER) {
            let Some((key, value)) = member.trim().split_once(KEY_VALUE_DELIMITER) else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() || key.contains(char::is_whitespace) {
                continue;
            }
            if entries.iter().any(|(k, _)| k == key) {
                continue;
            }
            entries.push((key.to_string(), value.to_string()));
        }
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets `key` as the leftmost member, replacing any previous member under the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.remove(&key);
        self.entries.insert(0, (key, value.into()));
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    #[must_use]
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the members as they are, without applying any limit.
    #[must_use]
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    /// Serializes the trace state with `sw=<sw_value>` as the leftmost member.
    ///
    /// Members under [`SW_KEY`] and [`XTRACE_OPTIONS_RESPONSE_KEY`] are superseded and never
    /// forwarded. Remaining members follow in their original order as long as the output stays
    /// within [`MAX_SIZE`] characters and [`MAX_MEMBERS`] members. If all of them cannot fit, the
    /// first member of [`OVERSIZE_ENTRY_LENGTH`] characters or more that would otherwise be kept
    /// is dropped; at most one member is dropped that way per call.
    ///
    /// ```
    /// use sw_sampler::propagation::trace_state::TraceState;
    ///
    /// let ts = TraceState::parse("sw=0000000000000000-00,foo=bar");
    /// assert_eq!(ts.merge_vendor_entry("aabbccddeeff0011-01"), "sw=aabbccddeeff0011-01,foo=bar");
    /// ```
    #[must_use]
    pub fn merge_vendor_entry(&self, sw_value: &str) -> String {
        let mut out = String::with_capacity(MAX_SIZE);
        out.push_str(SW_KEY);
        out.push(KEY_VALUE_DELIMITER);
        out.push_str(sw_value);

        let foreign_length: usize = self
            .foreign_entries()
            .map(|(key, value)| key.len() + value.len() + 2)
            .sum();
        let mut truncate_large_entry = foreign_length + out.len() > MAX_SIZE;

        let mut members = 1;
        for (key, value) in self.foreign_entries() {
            let entry_length = key.len() + 1 + value.len();
            if members >= MAX_MEMBERS || out.len() + 1 + entry_length > MAX_SIZE {
                continue;
            }
            if truncate_large_entry && entry_length >= OVERSIZE_ENTRY_LENGTH {
                truncate_large_entry = false;
                continue;
            }
            out.push(ENTRY_DELIMITER);
            out.push_str(key);
            out.push(KEY_VALUE_DELIMITER);
            out.push_str(value);
            members += 1;
        }
        out
    }

    fn foreign_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries().filter(|(key, _)| !is_reserved_key(key))
    }
}

impl fmt::Display for TraceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, "{ENTRY_DELIMITER}")?;
            }
            write!(f, "{key}{KEY_VALUE_DELIMITER}{value}")?;
        }
        Ok(())
    }
}

fn is_reserved_key(key: &str) -> bool {
    key == SW_KEY || key == XTRACE_OPTIONS_RESPONSE_KEY
}

/// Formats the `sw` member value for a span.
#[must_use]
pub fn sw_value(span_id: u64, sampled: bool) -> String {
    format!("{span_id:016x}-{}", if sampled { "01" } else { "00" })
}

/// Checks that an `sw` member value reads `<16 hex chars>-<00|01>`.
#[must_use]
pub fn is_valid_sw_value(value: &str) -> bool {
    let mut parts = value.split('-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(span_id), Some(flags), None) => {
            SPAN_ID_REGEX.is_match(span_id) && (flags == "00" || flags == "01")
        }
        _ => false,
    }
}

/// Returns the span id part of a valid `sw` member value.
#[must_use]
pub fn sw_parent_id(value: &str) -> Option<&str> {
    if is_valid_sw_value(value) {
        value.split('-').next()
    } else {
        None
    }
}
