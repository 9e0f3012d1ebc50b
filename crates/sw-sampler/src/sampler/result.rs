// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sampling results handed back to the span pipeline.

use crate::context::{AttributeValue, Attributes};
use crate::propagation::trace_state::{TraceState, XTRACE_OPTIONS_RESPONSE_KEY};
use crate::trigger_trace::sanitize;

pub const DETAILED_TRACING_KEY: &str = "sw.internal.detailedTracing";
pub const METRICS_KEY: &str = "sw.internal.metrics";
pub const SAMPLER_KEY: &str = "sw.internal.sampler";
pub const SAMPLE_RATE_KEY: &str = "sw.SampleRate";
pub const SAMPLE_SOURCE_KEY: &str = "sw.SampleSource";
pub const BUCKET_RATE_KEY: &str = "sw.BucketRate";
pub const BUCKET_CAPACITY_KEY: &str = "sw.BucketCapacity";
pub const REQUEST_TYPE_KEY: &str = "sw.RequestType";
pub const PARENT_ID_KEY: &str = "sw.tracestate_parent_id";
pub const UPSTREAM_TRACESTATE_KEY: &str = "sw.w3c.tracestate";
pub const TRANSACTION_NAME_KEY: &str = "sw.transaction";
pub const TRIGGERED_TRACE_KEY: &str = "TriggeredTrace";
pub const SW_KEYS_KEY: &str = "SWKeys";

/// What the span pipeline does with a span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingDecision {
    Drop,
    /// Recorded for metrics, not exported.
    RecordOnly,
    RecordAndSample,
}

/// Sampling verdict with the attributes to set on the span.
///
/// Every result carries the three `sw.internal.*` markers so downstream processors can tell
/// whether this sampler handled the span.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingResult {
    decision: SamplingDecision,
    attributes: Attributes,
    x_trace_options_response: Option<String>,
}

impl SamplingResult {
    #[must_use]
    pub fn new(decision: SamplingDecision, attributes: Attributes) -> Self {
        Self {
            decision,
            attributes,
            x_trace_options_response: None,
        }
    }

    fn with_markers(decision: SamplingDecision, detailed_tracing: bool, metrics: bool) -> Self {
        Self::new(decision, markers(detailed_tracing, metrics))
    }

    /// Local child of a sampled parent.
    #[must_use]
    pub fn parent_sampled() -> Self {
        Self::with_markers(SamplingDecision::RecordAndSample, true, true)
    }

    /// Local child of an unsampled parent.
    #[must_use]
    pub fn parent_not_sampled() -> Self {
        Self::with_markers(SamplingDecision::Drop, false, false)
    }

    #[must_use]
    pub fn metrics_only() -> Self {
        Self::with_markers(SamplingDecision::RecordOnly, false, true)
    }

    #[must_use]
    pub fn not_traced() -> Self {
        Self::with_markers(SamplingDecision::Drop, false, false)
    }

    /// Merges `additional` attributes and attaches the trigger-trace response, sanitized for
    /// `tracestate`.
    #[must_use]
    pub fn wrap(mut self, additional: Attributes, x_trace_options_response: Option<&str>) -> Self {
        self.attributes.extend(additional);
        self.x_trace_options_response = x_trace_options_response.map(sanitize);
        self
    }

    #[must_use]
    pub fn decision(&self) -> SamplingDecision {
        self.decision
    }

    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Sanitized trigger-trace response, if one was computed.
    #[must_use]
    pub fn x_trace_options_response(&self) -> Option<&str> {
        self.x_trace_options_response.as_deref()
    }

    /// Trace state of the new span: the parent's, plus the sanitized response when present.
    #[must_use]
    pub fn updated_trace_state(&self, parent: &TraceState) -> TraceState {
        let mut trace_state = parent.clone();
        if let Some(response) = &self.x_trace_options_response {
            trace_state.insert(XTRACE_OPTIONS_RESPONSE_KEY, response.clone());
        }
        trace_state
    }
}

pub(crate) fn markers(detailed_tracing: bool, metrics: bool) -> Attributes {
    Attributes::from([
        (
            DETAILED_TRACING_KEY.to_string(),
            AttributeValue::Bool(detailed_tracing),
        ),
        (METRICS_KEY.to_string(), AttributeValue::Bool(metrics)),
        (SAMPLER_KEY.to_string(), AttributeValue::Bool(true)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_attributes_are_always_set() {
        for result in [
            SamplingResult::parent_sampled(),
            SamplingResult::parent_not_sampled(),
            SamplingResult::metrics_only(),
            SamplingResult::not_traced(),
        ] {
            assert_eq!(
                result.attributes().get(SAMPLER_KEY),
                Some(&AttributeValue::Bool(true))
            );
        }
        let metrics_only = SamplingResult::metrics_only();
        assert_eq!(metrics_only.decision(), SamplingDecision::RecordOnly);
        assert_eq!(
            metrics_only.attributes().get(DETAILED_TRACING_KEY),
            Some(&AttributeValue::Bool(false))
        );
        assert_eq!(
            metrics_only.attributes().get(METRICS_KEY),
            Some(&AttributeValue::Bool(true))
        );
    }

    #[test]
    fn wrap_merges_attributes_and_sanitizes_response() {
        let additional = Attributes::from([(
            PARENT_ID_KEY.to_string(),
            AttributeValue::from("a2d8376f3cab2837"),
        )]);
        let result = SamplingResult::not_traced().wrap(additional, Some("trigger-trace=ok;ignored=a,b"));

        assert_eq!(
            result.attributes().get(PARENT_ID_KEY),
            Some(&AttributeValue::from("a2d8376f3cab2837"))
        );
        assert_eq!(
            result.x_trace_options_response(),
            Some("trigger-trace####ok;ignored####a....b")
        );

        let parent = TraceState::parse("foo=bar,xtrace_options_response=old");
        assert_eq!(
            result.updated_trace_state(&parent).serialize(),
            "xtrace_options_response=trigger-trace####ok;ignored####a....b,foo=bar"
        );
    }

    #[test]
    fn trace_state_untouched_without_response() {
        let parent = TraceState::parse("foo=bar");
        assert_eq!(
            SamplingResult::parent_sampled().updated_trace_state(&parent),
            parent
        );
    }
}
