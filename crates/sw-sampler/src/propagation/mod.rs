// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace context propagation across process boundaries.
//!
//! # Headers
//!
//! - **`traceparent`**: W3C parent span identity, read on extract
//! - **`tracestate`**: vendor state; the `sw` entry is rewritten on every inject
//! - **`X-Trace-Options`** / **`X-Trace-Options-Signature`**: trigger-trace request, forwarded
//!   verbatim downstream
//!
//! # Flow
//!
//! ```text
//! Incoming Request Headers
//!   ↓
//! extract ─▶ Context { remote SpanContext, XTraceOptions, upstream tracestate }
//!   ↓
//! sample and start the span
//!   ↓
//! inject ─▶ tracestate: sw=<span id>-<01|00>,<foreign entries>
//!   ↓
//! Outgoing Request Headers
//! ```
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use sw_sampler::propagation::{ContextPropagator, Propagator};
//!
//! let headers = HashMap::from([
//!     (
//!         "traceparent".to_string(),
//!         "00-80f198ee56343ba864fe8b2a57d3eff7-00f067aa0ba902b7-01".to_string(),
//!     ),
//!     ("tracestate".to_string(), "sw=a2d8376f3cab2837-01,foo=bar".to_string()),
//! ]);
//!
//! let context = ContextPropagator::default().extract(&headers);
//! let parent = context.span_context.unwrap();
//! assert!(parent.is_remote);
//! assert_eq!(parent.trace_state.get("sw"), Some("a2d8376f3cab2837-01"));
//! ```

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::context::{Context, SpanContext};
use crate::trigger_trace::{PresenceVerifier, SignatureVerifier, XTraceOptions};
use carrier::{Extractor, Injector};
use error::Error;
use trace_state::{sw_parent_id, sw_value, TraceState, SW_KEY};

pub mod carrier;
pub mod error;
pub mod trace_state;

pub const TRACEPARENT_KEY: &str = "traceparent";
pub const TRACESTATE_KEY: &str = "tracestate";
pub const X_TRACE_OPTIONS_KEY: &str = "x-trace-options";
pub const X_TRACE_OPTIONS_SIGNATURE_KEY: &str = "x-trace-options-signature";

const FIELDS: [&str; 4] = [
    TRACEPARENT_KEY,
    TRACESTATE_KEY,
    X_TRACE_OPTIONS_KEY,
    X_TRACE_OPTIONS_SIGNATURE_KEY,
];

lazy_static! {
    /// `version-traceId-spanId-flags[-optional]`
    static ref TRACEPARENT_REGEX: Regex =
        Regex::new(r"(?i)^([a-f0-9]{2})-([a-f0-9]{32})-([a-f0-9]{16})-([a-f0-9]{2})(-.*)?$")
            .expect("failed creating regex");

    /// All-zero identifiers are invalid.
    static ref INVALID_SEGMENT_REGEX: Regex = Regex::new(r"^0+$").expect("failed creating regex");
}

/// Reads and writes trace context headers.
pub trait Propagator {
    /// Builds the request [`Context`] out of inbound headers. Malformed headers are treated as
    /// absent.
    fn extract(&self, carrier: &dyn Extractor) -> Context;

    /// Writes the headers of `span_context` into an outbound carrier, forwarding the
    /// trigger-trace headers held by `context`.
    fn inject(&self, context: &Context, span_context: &SpanContext, carrier: &mut dyn Injector);

    /// Header names this propagator reads or writes.
    fn fields(&self) -> &'static [&'static str];
}

/// Propagator for `traceparent`, the vendor `tracestate` entry and the trigger-trace headers.
#[derive(Clone)]
pub struct ContextPropagator {
    verifier: Arc<dyn SignatureVerifier>,
}

impl Default for ContextPropagator {
    fn default() -> Self {
        Self::new(Arc::new(PresenceVerifier))
    }
}

impl ContextPropagator {
    /// Creates a propagator validating `X-Trace-Options-Signature` with `verifier`.
    #[must_use]
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { verifier }
    }

    fn extract_span_context(carrier: &dyn Extractor) -> Option<SpanContext> {
        let traceparent = carrier.get(TRACEPARENT_KEY)?.trim();
        match Self::extract_traceparent(traceparent) {
            Ok((trace_id, span_id, trace_flags)) => {
                let trace_state = carrier
                    .get(TRACESTATE_KEY)
                    .map(TraceState::parse)
                    .unwrap_or_default();
                Some(SpanContext {
                    trace_id,
                    span_id,
                    trace_flags,
                    is_remote: true,
                    trace_state,
                })
            }
            Err(e) => {
                debug!("{e}");
                None
            }
        }
    }

    fn extract_traceparent(traceparent: &str) -> Result<(u128, u64, u8), Error> {
        let captures = TRACEPARENT_REGEX
            .captures(traceparent)
            .ok_or_else(|| Error::extract("invalid traceparent", TRACEPARENT_KEY))?;

        let version = &captures[1];
        let tail = captures.get(5).map_or("", |m| m.as_str());
        Self::extract_version(version, tail)?;

        let trace_id = Self::extract_trace_id(&captures[2])?;
        let span_id = Self::extract_span_id(&captures[3])?;
        let trace_flags = Self::extract_trace_flags(&captures[4])?;

        Ok((trace_id, span_id, trace_flags))
    }

    fn extract_version(version: &str, tail: &str) -> Result<(), Error> {
        match version {
            "ff" | "FF" => Err(Error::extract(
                "`ff` is an invalid traceparent version",
                TRACEPARENT_KEY,
            )),
            "00" if !tail.is_empty() => Err(Error::extract(
                "traceparent with version `00` should contain only 4 values delimited by `-`",
                TRACEPARENT_KEY,
            )),
            "00" => Ok(()),
            _ => {
                warn!("Unsupported traceparent version {version}, still attempting to parse");
                Ok(())
            }
        }
    }

    fn extract_trace_id(trace_id: &str) -> Result<u128, Error> {
        if INVALID_SEGMENT_REGEX.is_match(trace_id) {
            return Err(Error::extract(
                "`0` value for trace_id is invalid",
                TRACEPARENT_KEY,
            ));
        }

        u128::from_str_radix(trace_id, 16)
            .map_err(|_| Error::extract("Failed to decode trace_id", TRACEPARENT_KEY))
    }

    fn extract_span_id(span_id: &str) -> Result<u64, Error> {
        if INVALID_SEGMENT_REGEX.is_match(span_id) {
            return Err(Error::extract(
                "`0` value for span_id is invalid",
                TRACEPARENT_KEY,
            ));
        }

        u64::from_str_radix(span_id, 16)
            .map_err(|_| Error::extract("Failed to decode span_id", TRACEPARENT_KEY))
    }

    fn extract_trace_flags(flags: &str) -> Result<u8, Error> {
        u8::from_str_radix(flags, 16)
            .map_err(|_| Error::extract("Failed to decode trace_flags", TRACEPARENT_KEY))
    }

    /// Keeps the inbound `tracestate` only when some entry belongs to another vendor.
    fn extract_upstream_trace_state(carrier: &dyn Extractor) -> Option<String> {
        let trace_state = carrier.get(TRACESTATE_KEY)?;
        let foreign = trace_state
            .split(',')
            .map(str::trim)
            .any(|entry| !entry.starts_with("sw="));
        foreign.then(|| trace_state.to_string())
    }
}

impl Propagator for ContextPropagator {
    fn extract(&self, carrier: &dyn Extractor) -> Context {
        let header = carrier.get(X_TRACE_OPTIONS_KEY);
        let signature = carrier.get(X_TRACE_OPTIONS_SIGNATURE_KEY);

        let mut context = Context {
            span_context: Self::extract_span_context(carrier),
            upstream_trace_state: Self::extract_upstream_trace_state(carrier),
            ..Context::default()
        };

        if let Some(options) = XTraceOptions::parse_with_verifier(header, signature, self.verifier.as_ref()) {
            context.x_trace_options = Some(options);
            context.x_trace_options_header = header.map(str::to_string);
            context.x_trace_options_signature = signature.map(str::to_string);
        }
        context
    }

    fn inject(&self, context: &Context, span_context: &SpanContext, carrier: &mut dyn Injector) {
        if !span_context.is_valid() {
            debug!("{}", Error::inject("invalid span context", TRACESTATE_KEY));
            return;
        }

        let value = sw_value(span_context.span_id, span_context.is_sampled());
        carrier.set(
            TRACESTATE_KEY,
            span_context.trace_state.merge_vendor_entry(&value),
        );

        if let Some(header) = &context.x_trace_options_header {
            carrier.set(X_TRACE_OPTIONS_KEY, header.clone());
        }
        if let Some(signature) = &context.x_trace_options_signature {
            carrier.set(X_TRACE_OPTIONS_SIGNATURE_KEY, signature.clone());
        }
    }

    fn fields(&self) -> &'static [&'static str] {
        &FIELDS
    }
}

/// Parent id carried by the vendor entry of `trace_state`, if the entry is well formed.
#[must_use]
pub fn sw_parent(trace_state: &TraceState) -> Option<&str> {
    trace_state.get(SW_KEY).and_then(sw_parent_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use std::collections::HashMap;

    use super::*;
    use crate::trigger_trace::{AuthFailure, AuthStatus};

    const TRACEPARENT: &str = "00-80f198ee56343ba864fe8b2a57d3eff7-00f067aa0ba902b7-01";

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn extract_traceparent_and_tracestate() {
        let carrier = headers(&[
            ("traceparent", TRACEPARENT),
            ("tracestate", "sw=a2d8376f3cab2837-01,foo=bar"),
        ]);
        let context = ContextPropagator::default().extract(&carrier);

        let span_context = context.span_context.unwrap();
        assert_eq!(span_context.trace_id, 0x80f1_98ee_5634_3ba8_64fe_8b2a_57d3_eff7);
        assert_eq!(span_context.span_id, 0x00f0_67aa_0ba9_02b7);
        assert!(span_context.is_sampled());
        assert!(span_context.is_remote);
        assert_eq!(sw_parent(&span_context.trace_state), Some("a2d8376f3cab2837"));
        assert_eq!(
            context.upstream_trace_state.as_deref(),
            Some("sw=a2d8376f3cab2837-01,foo=bar")
        );
        assert!(context.x_trace_options.is_none());
    }

    #[test]
    fn upstream_trace_state_needs_foreign_entries() {
        let carrier = headers(&[("traceparent", TRACEPARENT), ("tracestate", "sw=a2d8376f3cab2837-01")]);
        let context = ContextPropagator::default().extract(&carrier);
        assert!(context.upstream_trace_state.is_none());
        assert!(context.span_context.is_some());
    }

    #[test]
    fn invalid_traceparent_is_absent() {
        let invalid = [
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-80f198ee56343ba864fe8b2a57d3eff7-0000000000000000-01",
            "ff-80f198ee56343ba864fe8b2a57d3eff7-00f067aa0ba902b7-01",
            "00-80f198ee56343ba864fe8b2a57d3eff7-00f067aa0ba902b7-01-extra",
            "00-80f198ee56343ba864fe8b2a57d3eff7-00f067aa0ba902b7",
            "garbage",
        ];
        for traceparent in invalid {
            let carrier = headers(&[("traceparent", traceparent)]);
            assert!(
                ContextPropagator::default().extract(&carrier).span_context.is_none(),
                "{traceparent}"
            );
        }

        let future = headers(&[(
            "traceparent",
            "01-80f198ee56343ba864fe8b2a57d3eff7-00f067aa0ba902b7-00-extra",
        )]);
        let span_context = ContextPropagator::default()
            .extract(&future)
            .span_context
            .unwrap();
        assert!(!span_context.is_sampled());
    }

    #[test]
    fn extract_trigger_trace_headers() {
        let carrier = headers(&[
            ("X-Trace-Options", "trigger-trace;custom-tier=gold"),
            ("X-Trace-Options-Signature", "abc"),
        ]);
        let context = ContextPropagator::default().extract(&carrier);

        let options = context.x_trace_options.unwrap();
        assert!(options.trigger_trace());
        assert_eq!(options.auth_status(), AuthStatus::Ok);
        assert_eq!(
            context.x_trace_options_header.as_deref(),
            Some("trigger-trace;custom-tier=gold")
        );
        assert_eq!(context.x_trace_options_signature.as_deref(), Some("abc"));
        assert!(context.span_context.is_none());
    }

    #[test]
    fn extract_with_rejecting_verifier() {
        struct Rejecting;
        impl SignatureVerifier for Rejecting {
            fn verify(&self, _: &str, _: Option<&str>, _: Option<i64>) -> AuthStatus {
                AuthStatus::Failure(AuthFailure::BadSignature)
            }
        }

        let carrier = headers(&[("x-trace-options", "trigger-trace"), ("x-trace-options-signature", "abc")]);
        let context = ContextPropagator::new(Arc::new(Rejecting)).extract(&carrier);
        let options = context.x_trace_options.unwrap();
        assert_eq!(
            options.request_type(),
            crate::sampler::RequestType::UnauthenticatedTriggerTrace
        );
    }

    #[test]
    fn inject_rewrites_tracestate_and_forwards_options() {
        let propagator = ContextPropagator::default();
        let context = propagator.extract(&headers(&[
            ("x-trace-options", "trigger-trace"),
            ("x-trace-options-signature", "abc"),
        ]));
        let span_context = SpanContext::new(1, 0xaabb_ccdd_eeff_0011, true)
            .with_trace_state(TraceState::parse("sw=0000000000000000-00,foo=bar"));

        let mut carrier: HashMap<String, String> = HashMap::new();
        propagator.inject(&context, &span_context, &mut carrier);

        assert_eq!(
            carrier.get("tracestate").unwrap(),
            "sw=aabbccddeeff0011-01,foo=bar"
        );
        assert_eq!(carrier.get("x-trace-options").unwrap(), "trigger-trace");
        assert_eq!(carrier.get("x-trace-options-signature").unwrap(), "abc");
    }

    #[test]
    fn inject_skips_invalid_span_context() {
        let mut carrier: HashMap<String, String> = HashMap::new();
        ContextPropagator::default().inject(&Context::default(), &SpanContext::default(), &mut carrier);
        assert!(carrier.is_empty());
    }

    #[test]
    fn inject_into_json_carrier() {
        let mut carrier = serde_json::json!({});
        let span_context = SpanContext::new(1, 0x12, false);
        ContextPropagator::default().inject(&Context::default(), &span_context, &mut carrier);
        assert_eq!(carrier["tracestate"], "sw=0000000000000012-00");
    }

    #[test]
    fn fields() {
        assert_eq!(
            ContextPropagator::default().fields(),
            &["traceparent", "tracestate", "x-trace-options", "x-trace-options-signature"]
        );
    }
}
