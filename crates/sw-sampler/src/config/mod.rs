// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment-driven configuration of the sampler.
//!
//! Reading the environment never fails: a malformed value is reported with a `warn!` and the
//! setting falls back to its default.

pub mod log_level;

use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::naming::{parse_pattern, NamingChain, NamingConfig};
use crate::sampler::{LocalOverrides, ResourceOverride};

use self::log_level::LogLevel;

/// Verbosity of the sampler's own logs.
const ENV_DEBUG_LEVEL: &str = "SW_APM_DEBUG_LEVEL";
/// Comma separated URL path tokens (`p1,p3`) used to name transactions.
const ENV_TRANSACTION_NAME_PATTERN: &str = "SW_APM_TRANSACTION_NAME_PATTERN";
/// Prefix transaction names with the request host.
const ENV_DOMAIN_PREFIXED_TRANSACTION_NAME: &str = "SW_APM_DOMAIN_PREFIXED_TRANSACTION_NAME";
/// JSON list of naming schemes.
const ENV_TRANSACTION_NAME_SCHEMES: &str = "SW_APM_TRANSACTION_NAME_SCHEMES";
/// JSON list of per-resource tracing modes.
const ENV_TRANSACTION_SETTINGS: &str = "SW_APM_TRANSACTION_SETTINGS";
/// Local tracing mode, `enabled` or `disabled`.
const ENV_TRACING_MODE: &str = "SW_APM_TRACING_MODE";
/// Local trigger-trace mode, `enabled` or `disabled`.
const ENV_TRIGGER_TRACE: &str = "SW_APM_TRIGGER_TRACE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{variable} is not valid JSON: {source}")]
    Json {
        variable: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{variable} has an invalid regex {pattern:?}: {source}")]
    Regex {
        variable: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("{variable} has an invalid value {value:?}")]
    InvalidValue {
        variable: &'static str,
        value: String,
    },
}

/// Entry of `SW_APM_TRANSACTION_SETTINGS`.
///
/// ```json
/// [{ "regex": "^.*/health$", "tracing": "disabled" }]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransactionSetting {
    pub regex: Option<String>,
    pub tracing: Option<String>,
}

impl TransactionSetting {
    fn to_override(&self) -> Result<ResourceOverride, ConfigError> {
        let (Some(pattern), Some(tracing)) = (self.regex.as_deref(), self.tracing.as_deref())
        else {
            return Err(ConfigError::InvalidValue {
                variable: ENV_TRANSACTION_SETTINGS,
                value: format!("{self:?}"),
            });
        };
        let tracing_enabled = parse_tracing_mode(ENV_TRANSACTION_SETTINGS, tracing)?;
        ResourceOverride::new(pattern, tracing_enabled).map_err(|source| ConfigError::Regex {
            variable: ENV_TRANSACTION_SETTINGS,
            pattern: pattern.to_string(),
            source,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct SamplerConfig {
    pub log_level: LogLevel,
    /// Tokens of the custom URL pattern, `None` for the default `p1, p2`.
    pub transaction_name_pattern: Option<Vec<String>>,
    pub domain_prefixed_transaction_name: bool,
    pub naming_schemes: NamingChain,
    /// Per-resource tracing modes, in configuration order.
    pub transaction_settings: Vec<ResourceOverride>,
    /// `None` leaves the tracing mode to the remote settings.
    pub tracing_mode: Option<bool>,
    /// `None` leaves the trigger-trace mode to the remote settings.
    pub trigger_trace: Option<bool>,
}

impl SamplerConfig {
    /// Builds the configuration from the current process environment.
    #[must_use]
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds the configuration from key/value pairs.
    #[must_use]
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| map.get(key).and_then(|value| sanitize_non_empty(value));

        let log_level = get(ENV_DEBUG_LEVEL)
            .and_then(|value| match LogLevel::from_str(&value) {
                Ok(level) => Some(level),
                Err(e) => {
                    warn!("{ENV_DEBUG_LEVEL}: {e}");
                    None
                }
            })
            .unwrap_or_default();

        let transaction_name_pattern =
            get(ENV_TRANSACTION_NAME_PATTERN).map(|value| parse_pattern(&value));
        let domain_prefixed_transaction_name = parse_bool(
            map.get(ENV_DOMAIN_PREFIXED_TRANSACTION_NAME)
                .map(String::as_str),
            false,
        );

        let naming_schemes = get(ENV_TRANSACTION_NAME_SCHEMES)
            .and_then(|json| {
                NamingChain::from_json(&json)
                    .map_err(|source| ConfigError::Json {
                        variable: ENV_TRANSACTION_NAME_SCHEMES,
                        source,
                    })
                    .map_err(|e| warn!("{e}"))
                    .ok()
            })
            .unwrap_or_default();

        let transaction_settings = get(ENV_TRANSACTION_SETTINGS)
            .map(|json| match parse_transaction_settings(&json) {
                Ok(resources) => resources,
                Err(e) => {
                    warn!("{e}");
                    Vec::new()
                }
            })
            .unwrap_or_default();

        let tracing_mode = get(ENV_TRACING_MODE).and_then(|value| {
            parse_tracing_mode(ENV_TRACING_MODE, &value)
                .map_err(|e| warn!("{e}"))
                .ok()
        });
        let trigger_trace = get(ENV_TRIGGER_TRACE).and_then(|value| {
            parse_tracing_mode(ENV_TRIGGER_TRACE, &value)
                .map_err(|e| warn!("{e}"))
                .ok()
        });

        debug!(
            "Sampler configuration: log level {}, {} naming schemes, {} transaction settings",
            log_level.as_ref(),
            naming_schemes.len(),
            transaction_settings.len()
        );

        Self {
            log_level,
            transaction_name_pattern,
            domain_prefixed_transaction_name,
            naming_schemes,
            transaction_settings,
            tracing_mode,
            trigger_trace,
        }
    }

    /// Options for the [`crate::naming::TransactionNameManager`].
    #[must_use]
    pub fn naming_config(&self) -> NamingConfig {
        NamingConfig {
            custom_pattern: self.transaction_name_pattern.clone(),
            domain_prefixed: self.domain_prefixed_transaction_name,
            schemes: self.naming_schemes.clone(),
        }
    }

    /// Local settings narrowing the remote ones in [`crate::sampler::SettingsDecisionMaker`].
    #[must_use]
    pub fn local_overrides(&self) -> LocalOverrides {
        LocalOverrides {
            tracing_enabled: self.tracing_mode,
            trigger_trace_enabled: self.trigger_trace,
            resources: self.transaction_settings.clone(),
        }
    }
}

/// Parses the JSON list of transaction settings. Unusable entries are skipped with a warning;
/// only a list that is not valid JSON is an error.
pub fn parse_transaction_settings(json: &str) -> Result<Vec<ResourceOverride>, ConfigError> {
    let entries: Vec<TransactionSetting> =
        serde_json::from_str(json).map_err(|source| ConfigError::Json {
            variable: ENV_TRANSACTION_SETTINGS,
            source,
        })?;

    Ok(entries
        .iter()
        .filter_map(|entry| match entry.to_override() {
            Ok(resource) => Some(resource),
            Err(e) => {
                warn!("Skipping transaction setting: {e}");
                None
            }
        })
        .collect())
}

/// `enabled` (or the legacy `always`) and `disabled` (or `never`), case-insensitive.
fn parse_tracing_mode(variable: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "enabled" | "always" => Ok(true),
        "disabled" | "never" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            variable,
            value: value.to_string(),
        }),
    }
}

/// Trims whitespace and discards empty values.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses boolean values from strings, falling back to the provided default.
fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}
