// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transaction naming for root spans.
//!
//! A transaction name groups requests in downstream views. It is derived from span attributes
//! (first match wins):
//!
//! 1. a custom name registered for the trace with [`TransactionNameManager::set_custom_name`]
//! 2. the configured [`NamingChain`]
//! 3. `HandlerName`
//! 4. `http.route`
//! 5. tokens of `url.path` selected by a pattern (`[p1, p2]` by default)
//! 6. the span name
//!
//! Derived names are optionally prefixed with the request domain, then normalized by
//! [`transform`]. The number of distinct names is bounded: once the limit is reached, new names
//! are reported as `other` until the names are cleared.

pub mod scheme;
pub mod url_cache;

use std::collections::HashSet;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::watch;
use tracing::{debug, trace};

pub use scheme::{NamingChain, NamingScheme, TransactionNamingScheme};
use url_cache::{Expiry, ExpiringCache, DEFAULT_CAPACITY, DEFAULT_TTL};

use crate::context::{string_attribute, Attributes};

pub const DEFAULT_MAX_NAME_COUNT: usize = 200;
pub const MAX_TRANSACTION_NAME_LENGTH: usize = 255;
pub const TRANSACTION_NAME_ELLIPSIS: &str = "...";
pub const OVER_LIMIT_TRANSACTION_NAME: &str = "other";
pub const UNKNOWN_TRANSACTION_NAME: &str = "unknown";

pub const HANDLER_NAME_KEY: &str = "HandlerName";
pub const HTTP_ROUTE_KEY: &str = "http.route";
pub const URL_PATH_KEY: &str = "url.path";
pub const HTTP_HOST_KEY: &str = "http.host";
pub const SERVER_ADDRESS_KEY: &str = "server.address";

const DEFAULT_PATTERN: [&str; 2] = ["p1", "p2"];
const DEFAULT_PATTERN_SEPARATOR: &str = "/";
const CUSTOM_PATTERN_SEPARATOR: &str = ".";
const DOMAIN_PREFIX_SEPARATOR: &str = "/";

lazy_static! {
    static ref REPLACE_REGEX: Regex =
        Regex::new(r"[^-.:_\\/A-Za-z0-9? ]").expect("failed creating regex");
}

/// Normalizes a transaction name: at most 255 characters (truncated ones end with `...`), never
/// empty, characters outside `[-.:_\/A-Za-z0-9? ]` replaced with `_`, lower case.
///
/// Applying it to its own output changes nothing.
#[must_use]
pub fn transform(name: &str) -> String {
    let name = if name.chars().count() > MAX_TRANSACTION_NAME_LENGTH {
        let keep = MAX_TRANSACTION_NAME_LENGTH - TRANSACTION_NAME_ELLIPSIS.len();
        let mut truncated: String = name.chars().take(keep).collect();
        truncated.push_str(TRANSACTION_NAME_ELLIPSIS);
        debug!("Transaction name {name} truncated to {truncated}");
        truncated
    } else if name.is_empty() {
        " ".to_string()
    } else {
        name.to_string()
    };
    REPLACE_REGEX.replace_all(&name, "_").to_lowercase()
}

/// Splits a comma separated pattern such as `p1, p3` into trimmed tokens.
#[must_use]
pub fn parse_pattern(pattern: &str) -> Vec<String> {
    pattern.split(',').map(|token| token.trim().to_string()).collect()
}

/// Builds a name out of the path tokens named by `pattern` (`p1` is the first non-empty segment).
fn name_from_path(path: &str, pattern: &[&str], separator: &str, separator_as_prefix: bool) -> String {
    let tokens: Vec<&str> = path.split('/').filter(|t| !t.is_empty()).collect();
    let selected: Vec<&str> = pattern
        .iter()
        .filter_map(|name| {
            let index: usize = name.strip_prefix('p')?.parse().ok()?;
            tokens.get(index.checked_sub(1)?).copied()
        })
        .collect();

    let mut name = if separator_as_prefix {
        separator.to_string()
    } else {
        String::new()
    };
    name.push_str(&selected.join(separator));
    name
}

/// Options shaping derived names.
#[derive(Clone, Debug, Default)]
pub struct NamingConfig {
    /// Path tokens used instead of `[p1, p2]`, joined with `.`.
    pub custom_pattern: Option<Vec<String>>,
    /// Prefix derived names with `http.host` or `server.address`.
    pub domain_prefixed: bool,
    pub schemes: NamingChain,
}

struct NameRegistry {
    names: HashSet<String>,
    limit_exceeded: bool,
    max_name_count: usize,
    max_name_count_updates: Option<watch::Receiver<Option<usize>>>,
}

impl NameRegistry {
    fn poll_max_name_count(&mut self) {
        let Some(rx) = self.max_name_count_updates.as_mut() else {
            return;
        };
        if !rx.has_changed().unwrap_or(false) {
            return;
        }
        match *rx.borrow_and_update() {
            Some(count) => {
                if count > self.max_name_count {
                    self.limit_exceeded = false;
                }
                self.max_name_count = count;
            }
            None => self.max_name_count = DEFAULT_MAX_NAME_COUNT,
        }
        debug!("Max transaction name count set to {}", self.max_name_count);
    }

    fn admit(&mut self, name: &str) -> bool {
        if self.names.contains(name) {
            return true;
        }
        if self.names.len() < self.max_name_count {
            self.names.insert(name.to_string());
            return true;
        }
        self.limit_exceeded = true;
        false
    }
}

/// Derives transaction names and bounds how many distinct ones are reported.
pub struct TransactionNameManager {
    config: NamingConfig,
    registry: Mutex<NameRegistry>,
    url_names: ExpiringCache<String, String>,
    custom_names: ExpiringCache<u128, String>,
}

impl Default for TransactionNameManager {
    fn default() -> Self {
        Self::new(NamingConfig::default())
    }
}

impl TransactionNameManager {
    #[must_use]
    pub fn new(config: NamingConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(NameRegistry {
                names: HashSet::new(),
                limit_exceeded: false,
                max_name_count: DEFAULT_MAX_NAME_COUNT,
                max_name_count_updates: None,
            }),
            url_names: ExpiringCache::new(DEFAULT_CAPACITY, DEFAULT_TTL, Expiry::AfterWrite),
            custom_names: ExpiringCache::new(DEFAULT_CAPACITY, DEFAULT_TTL, Expiry::AfterAccess),
        }
    }

    /// Follows max-name-count updates published on `rx`. `None` restores the default of 200.
    ///
    /// The value already on the channel applies to the next naming call. The channel is polled
    /// on every naming call, so later updates apply from the next call on.
    #[must_use]
    pub fn with_max_name_count_updates(self, mut rx: watch::Receiver<Option<usize>>) -> Self {
        rx.mark_changed();
        self.registry.lock().max_name_count_updates = Some(rx);
        self
    }

    /// Registers a caller chosen name for a trace. The name is normalized once here and then
    /// returned as is, bypassing the distinct name limit.
    ///
    /// Returns `false` for an invalid trace id or an empty name.
    pub fn set_custom_name(&self, trace_id: u128, name: &str) -> bool {
        if trace_id == 0 || name.is_empty() {
            return false;
        }
        self.custom_names.put(trace_id, transform(name));
        true
    }

    /// Transaction name of a root span.
    #[must_use]
    pub fn transaction_name(&self, trace_id: u128, span_name: &str, attributes: &Attributes) -> String {
        if let Some(custom) = self.custom_names.get(&trace_id) {
            trace!("Using custom transaction name {custom}");
            return custom;
        }

        let Some(name) = self.build_name(span_name, attributes) else {
            return UNKNOWN_TRANSACTION_NAME.to_string();
        };
        let name = if self.config.domain_prefixed {
            prefix_with_domain(name, attributes)
        } else {
            name
        };
        let name = transform(&name);

        let mut registry = self.registry.lock();
        registry.poll_max_name_count();
        if registry.admit(&name) {
            name
        } else {
            OVER_LIMIT_TRANSACTION_NAME.to_string()
        }
    }

    fn build_name(&self, span_name: &str, attributes: &Attributes) -> Option<String> {
        if let Some(name) = self
            .config
            .schemes
            .create_name(attributes)
            .filter(|name| !name.is_empty())
        {
            trace!("Using scheme derived transaction name {name}");
            return Some(name);
        }
        if let Some(handler) = string_attribute(attributes, HANDLER_NAME_KEY) {
            trace!("Using HandlerName {handler} as the transaction name");
            return Some(handler.to_string());
        }
        if let Some(route) = string_attribute(attributes, HTTP_ROUTE_KEY) {
            trace!("Using http.route {route} as the transaction name");
            return Some(route.to_string());
        }
        if let Some(path) = string_attribute(attributes, URL_PATH_KEY) {
            return Some(self.name_from_url(path));
        }
        if span_name.trim().is_empty() {
            None
        } else {
            Some(span_name.to_string())
        }
    }

    fn name_from_url(&self, path: &str) -> String {
        if let Some(name) = self.url_names.get(&path.to_string()) {
            return name;
        }

        let custom = self.config.custom_pattern.as_ref().map(|pattern| {
            let pattern: Vec<&str> = pattern.iter().map(String::as_str).collect();
            name_from_path(path, &pattern, CUSTOM_PATTERN_SEPARATOR, false)
        });
        let name = match custom {
            Some(name) if !name.is_empty() => name,
            _ => name_from_path(path, &DEFAULT_PATTERN, DEFAULT_PATTERN_SEPARATOR, true),
        };
        trace!("Using path pattern to extract transaction name {name}");
        self.url_names.put(path.to_string(), name.clone());
        name
    }

    /// Whether a new name was turned into `other` since the last clear.
    #[must_use]
    pub fn is_limit_exceeded(&self) -> bool {
        self.registry.lock().limit_exceeded
    }

    #[must_use]
    pub fn name_count(&self) -> usize {
        self.registry.lock().names.len()
    }

    #[must_use]
    pub fn max_name_count(&self) -> usize {
        self.registry.lock().max_name_count
    }

    /// Forgets every recorded name and clears the limit flag. Meant for the periodic flush.
    pub fn clear_transaction_names(&self) {
        let mut registry = self.registry.lock();
        trace!(
            "Clearing transaction names, unique transaction count: {}",
            registry.names.len()
        );
        registry.names.clear();
        registry.limit_exceeded = false;
    }

    /// Clears names, the URL cache and restores the default name limit.
    pub fn reset(&self) {
        self.clear_transaction_names();
        self.url_names.clear();
        self.registry.lock().max_name_count = DEFAULT_MAX_NAME_COUNT;
    }
}

fn prefix_with_domain(name: String, attributes: &Attributes) -> String {
    let domain = string_attribute(attributes, HTTP_HOST_KEY)
        .filter(|host| !host.is_empty())
        .or_else(|| string_attribute(attributes, SERVER_ADDRESS_KEY).filter(|a| !a.is_empty()));
    match domain {
        Some(domain) if name.starts_with(DOMAIN_PREFIX_SEPARATOR) => format!("{domain}{name}"),
        Some(domain) => format!("{domain}{DOMAIN_PREFIX_SEPARATOR}{name}"),
        None => name,
    }
}
