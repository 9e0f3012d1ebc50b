// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Carriers that headers are read from and written to.
//!
//! Implemented for:
//! - **HashMap**: HTTP header maps and tests
//! - **serde_json::Value**: JSON message metadata
//!
//! All carriers are case-insensitive, so `X-Trace-Options` and `x-trace-options` address the same
//! header.

use std::collections::HashMap;

use serde_json::Value;

/// Writes header values into a carrier.
///
/// ```
/// use std::collections::HashMap;
/// use sw_sampler::propagation::carrier::Injector;
///
/// let mut headers = HashMap::new();
/// headers.set("X-Trace-Options", "trigger-trace".to_string());
///
/// assert_eq!(headers.get("x-trace-options"), Some(&"trigger-trace".to_string()));
/// ```
pub trait Injector {
    /// Sets `key` (lowercased) to `value`.
    fn set(&mut self, key: &str, value: String);
}

/// Reads header values from a carrier.
pub trait Extractor {
    /// Gets the value under `key`, case-insensitively.
    fn get(&self, key: &str) -> Option<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        let lowercase = key.to_lowercase();
        if let Some(value) = HashMap::get(self, &lowercase) {
            return Some(value.as_str());
        }
        // maps filled without `Injector::set` may keep the original casing
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Only `Value::Object` carries headers; other variants are left untouched.
impl Injector for Value {
    fn set(&mut self, key: &str, value: String) {
        if let Value::Object(map) = self {
            map.insert(key.to_lowercase(), Value::String(value));
        }
    }
}

/// Only `Value::Object` carries headers; other variants read as empty.
impl Extractor for Value {
    fn get(&self, key: &str) -> Option<&str> {
        let Value::Object(map) = self else {
            return None;
        };
        map.get(&key.to_lowercase())
            .or_else(|| {
                map.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .and_then(Value::as_str)
    }
}
