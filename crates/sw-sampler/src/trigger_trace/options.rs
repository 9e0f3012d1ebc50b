// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `X-Trace-Options` parser.
//!
//! The header is a `;` separated list of `key[=value]` tokens:
//!
//! ```text
//! X-Trace-Options: trigger-trace;sw-keys=lo:se,check-id:123;custom-tier=gold;ts=1564597681
//! ```
//!
//! | key | meaning |
//! |---|---|
//! | `trigger-trace` | request a trace regardless of the sample rate (no value) |
//! | `sw-keys` | opaque value copied into the `SWKeys` attribute |
//! | `custom-<name>` | copied into a span attribute named after the key |
//! | `ts` | unix timestamp used by signature validation |
//!
//! Anything else is reported back under `ignored`.

use tracing::trace;

use crate::sampler::decision::RequestType;

use super::signature::{AuthStatus, PresenceVerifier, SignatureVerifier};

pub const TRIGGER_TRACE_KEY: &str = "trigger-trace";
pub const SW_KEYS_KEY: &str = "sw-keys";
pub const TIMESTAMP_KEY: &str = "ts";
pub const CUSTOM_KEY_PREFIX: &str = "custom-";

const TOKEN_DELIMITER: char = ';';
const KEY_VALUE_DELIMITER: char = '=';

/// Parsed `X-Trace-Options` header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XTraceOptions {
    trigger_trace: bool,
    sw_keys: Option<String>,
    custom_kvs: Vec<(String, String)>,
    timestamp: Option<i64>,
    ignored: Vec<String>,
    auth_status: AuthStatus,
}

impl XTraceOptions {
    /// Parses the header pair, trusting any non-blank signature.
    ///
    /// Returns `None` when the options header is absent or blank.
    ///
    /// ```
    /// use sw_sampler::trigger_trace::XTraceOptions;
    ///
    /// let options = XTraceOptions::parse(Some("trigger-trace;custom-tier=gold;foo"), None).unwrap();
    /// assert!(options.trigger_trace());
    /// assert_eq!(options.custom_kvs(), &[("custom-tier".to_string(), "gold".to_string())]);
    /// assert_eq!(options.ignored(), &["foo".to_string()]);
    /// ```
    #[must_use]
    pub fn parse(header: Option<&str>, signature: Option<&str>) -> Option<Self> {
        Self::parse_with_verifier(header, signature, &PresenceVerifier)
    }

    #[must_use]
    pub fn parse_with_verifier(
        header: Option<&str>,
        signature: Option<&str>,
        verifier: &dyn SignatureVerifier,
    ) -> Option<Self> {
        let header = header?;
        if header.trim().is_empty() {
            return None;
        }

        let mut options = XTraceOptions::default();
        for token in header.split(TOKEN_DELIMITER) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let (key, value) = match token.split_once(KEY_VALUE_DELIMITER) {
                Some((key, value)) => (key.trim(), Some(value.trim())),
                None => (token, None),
            };
            options.apply(key, value);
        }

        options.auth_status = verifier.verify(header, signature, options.timestamp);
        trace!(
            "Parsed X-Trace-Options trigger_trace={} auth={:?} ignored={:?}",
            options.trigger_trace,
            options.auth_status,
            options.ignored
        );
        Some(options)
    }

    fn apply(&mut self, key: &str, value: Option<&str>) {
        match (key, value) {
            (TRIGGER_TRACE_KEY, None) => self.trigger_trace = true,
            (SW_KEYS_KEY, Some(value)) => {
                if self.sw_keys.is_none() {
                    self.sw_keys = Some(value.to_string());
                }
            }
            (TIMESTAMP_KEY, Some(value)) => match value.parse::<i64>() {
                Ok(ts) => self.timestamp = Some(ts),
                Err(_) => self.ignore(key),
            },
            (key, Some(value)) if is_custom_key(key) => {
                if !self.custom_kvs.iter().any(|(k, _)| k == key) {
                    self.custom_kvs.push((key.to_string(), value.to_string()));
                }
            }
            (key, _) => self.ignore(key),
        }
    }

    fn ignore(&mut self, key: &str) {
        if !key.is_empty() {
            self.ignored.push(key.to_string());
        }
    }

    #[must_use]
    pub fn trigger_trace(&self) -> bool {
        self.trigger_trace
    }

    #[must_use]
    pub fn sw_keys(&self) -> Option<&str> {
        self.sw_keys.as_deref()
    }

    /// `custom-*` options in header order.
    #[must_use]
    pub fn custom_kvs(&self) -> &[(String, String)] {
        &self.custom_kvs
    }

    #[cfg(test)]
    #[must_use]
    fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// Keys that were not understood, in header order.
    #[must_use]
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    #[must_use]
    pub fn auth_status(&self) -> AuthStatus {
        self.auth_status
    }

    /// Request type implied by the options.
    ///
    /// A signature that fails validation does not reject the request: a trigger-trace request
    /// is then handled as unauthenticated.
    #[must_use]
    pub fn request_type(&self) -> RequestType {
        if !self.trigger_trace {
            RequestType::Regular
        } else if self.auth_status.is_authenticated() {
            RequestType::AuthenticatedTriggerTrace
        } else {
            RequestType::UnauthenticatedTriggerTrace
        }
    }
}

fn is_custom_key(key: &str) -> bool {
    key.strip_prefix(CUSTOM_KEY_PREFIX)
        .is_some_and(|name| !name.is_empty() && !name.contains(char::is_whitespace))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::trigger_trace::signature::AuthFailure;

    struct RejectingVerifier;

    impl SignatureVerifier for RejectingVerifier {
        fn verify(&self, _: &str, _: Option<&str>, _: Option<i64>) -> AuthStatus {
            AuthStatus::Failure(AuthFailure::BadSignature)
        }
    }

    #[test]
    fn absent_or_blank_header() {
        assert!(XTraceOptions::parse(None, Some("sig")).is_none());
        assert!(XTraceOptions::parse(Some("  "), None).is_none());
    }

    #[test]
    fn full_header() {
        let options = XTraceOptions::parse(
            Some("trigger-trace ; sw-keys = lo:se,check-id:123 ;custom-tier=gold;custom-x = a=b;ts=1564597681"),
            None,
        )
        .unwrap();

        assert!(options.trigger_trace());
        assert_eq!(options.sw_keys(), Some("lo:se,check-id:123"));
        assert_eq!(
            options.custom_kvs(),
            &[
                ("custom-tier".to_string(), "gold".to_string()),
                ("custom-x".to_string(), "a=b".to_string()),
            ]
        );
        assert_eq!(options.timestamp(), Some(1_564_597_681));
        assert!(options.ignored().is_empty());
        assert_eq!(options.request_type(), RequestType::UnauthenticatedTriggerTrace);
    }

    #[test]
    fn unknown_and_malformed_keys_are_ignored() {
        let options = XTraceOptions::parse(
            Some("foo=bar;trigger-trace=1;custom-=x;ts=abc;custom-key;;bar"),
            None,
        )
        .unwrap();

        assert!(!options.trigger_trace());
        assert!(options.custom_kvs().is_empty());
        assert_eq!(
            options.ignored(),
            &["foo", "trigger-trace", "custom-", "ts", "custom-key", "bar"]
        );
        assert_eq!(options.request_type(), RequestType::Regular);
    }

    #[test]
    fn first_custom_value_wins() {
        let options =
            XTraceOptions::parse(Some("custom-a=1;custom-a=2;sw-keys=x;sw-keys=y"), None).unwrap();
        assert_eq!(options.custom_kvs(), &[("custom-a".to_string(), "1".to_string())]);
        assert_eq!(options.sw_keys(), Some("x"));
    }

    #[test]
    fn signature_presence_authenticates() {
        let options = XTraceOptions::parse(Some("trigger-trace"), Some("0123abcd")).unwrap();
        assert_eq!(options.auth_status(), AuthStatus::Ok);
        assert_eq!(options.request_type(), RequestType::AuthenticatedTriggerTrace);
    }

    #[test]
    fn failed_signature_degrades_to_unauthenticated() {
        let options = XTraceOptions::parse_with_verifier(
            Some("trigger-trace;ts=12"),
            Some("bad"),
            &RejectingVerifier,
        )
        .unwrap();
        assert_eq!(
            options.auth_status(),
            AuthStatus::Failure(AuthFailure::BadSignature)
        );
        assert_eq!(options.request_type(), RequestType::UnauthenticatedTriggerTrace);
    }
}
