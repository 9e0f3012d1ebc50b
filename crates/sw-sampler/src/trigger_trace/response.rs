// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `X-Trace-Options-Response` computation and its `tracestate` safe encoding.

use std::fmt;

use crate::sampler::decision::TraceDecision;

use super::options::XTraceOptions;

pub const AUTH_KEY: &str = "auth";
pub const TRIGGER_TRACE_KEY: &str = "trigger-trace";
pub const IGNORED_KEY: &str = "ignored";

/// Outcome of a trigger-trace request, as reported back to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerTraceOutcome {
    Ok,
    RateExceeded,
    TracingDisabled,
    TriggerTracingDisabled,
    SettingsNotAvailable,
    Ignored,
    NotRequested,
}

impl fmt::Display for TriggerTraceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            TriggerTraceOutcome::Ok => "ok",
            TriggerTraceOutcome::RateExceeded => "rate-exceeded",
            TriggerTraceOutcome::TracingDisabled => "tracing-disabled",
            TriggerTraceOutcome::TriggerTracingDisabled => "trigger-tracing-disabled",
            TriggerTraceOutcome::SettingsNotAvailable => "settings-not-available",
            TriggerTraceOutcome::Ignored => "ignored",
            TriggerTraceOutcome::NotRequested => "not-requested",
        };
        f.write_str(value)
    }
}

/// Response to an `X-Trace-Options` header, serialized as `key=value` pairs joined with `;`.
///
/// ```text
/// auth=ok;trigger-trace=ok;ignored=foo,bar
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XTraceOptionsResponse {
    pairs: Vec<(&'static str, String)>,
}

impl XTraceOptionsResponse {
    /// Computes the response for a decision.
    ///
    /// `genesis` is true when the decision started a new trace; trigger-trace requests on
    /// continued traces are reported as `ignored`. Returns `None` without options.
    #[must_use]
    pub fn compute(
        options: Option<&XTraceOptions>,
        decision: &TraceDecision,
        genesis: bool,
    ) -> Option<Self> {
        let options = options?;
        let mut pairs = Vec::with_capacity(3);

        let auth = options.auth_status();
        if let Some(reason) = auth.failure() {
            pairs.push((AUTH_KEY, reason.to_string()));
        } else if auth.is_authenticated() {
            pairs.push((AUTH_KEY, "ok".to_string()));
        }

        let outcome = if options.trigger_trace() {
            trigger_trace_outcome(decision, genesis)
        } else {
            TriggerTraceOutcome::NotRequested
        };
        pairs.push((TRIGGER_TRACE_KEY, outcome.to_string()));

        if !options.ignored().is_empty() {
            pairs.push((IGNORED_KEY, options.ignored().join(",")));
        }

        Some(Self { pairs })
    }

    #[cfg(test)]
    #[must_use]
    fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn trigger_trace_outcome(decision: &TraceDecision, genesis: bool) -> TriggerTraceOutcome {
    if !genesis {
        return TriggerTraceOutcome::Ignored;
    }
    let Some(config) = decision.trace_config.as_ref() else {
        return TriggerTraceOutcome::SettingsNotAvailable;
    };
    if !config.trigger_trace_enabled {
        TriggerTraceOutcome::TriggerTracingDisabled
    } else if decision.sampled {
        TriggerTraceOutcome::Ok
    } else if decision.bucket_exhausted {
        TriggerTraceOutcome::RateExceeded
    } else {
        TriggerTraceOutcome::TracingDisabled
    }
}

impl fmt::Display for XTraceOptionsResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Encodes a response so it fits the `tracestate` value grammar: `=` becomes `####` and `,`
/// becomes `....`.
///
/// The encoding is not injective: input that already contains `####` or `....`, or that places
/// `.`/`#` next to an encoded character, does not decode back to itself. Responses are built from
/// option keys and fixed words, so this is accepted.
#[must_use]
pub fn sanitize(response: &str) -> String {
    response.replace('=', "####").replace(',', "....")
}

/// Reverses [`sanitize`]. Runs of four `#` or `.` already present before sanitizing come back
/// as `=` and `,`.
#[must_use]
pub fn desanitize(sanitized: &str) -> String {
    sanitized.replace("####", "=").replace("....", ",")
}
