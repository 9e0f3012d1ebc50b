// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Headers added to the HTTP response of a traced request.
//!
//! - **`X-Trace`**: `00-<trace id>-<span id>-<01|00>` of the server span
//! - **`X-Trace-Options-Response`**: outcome of the trigger-trace request, recovered from the
//!   sanitized form kept in `tracestate`

use tracing::trace;

use crate::context::SpanContext;
use crate::propagation::carrier::Injector;
use crate::propagation::trace_state::XTRACE_OPTIONS_RESPONSE_KEY;
use crate::trigger_trace::desanitize;

pub const X_TRACE_HEADER: &str = "X-Trace";
pub const X_TRACE_OPTIONS_RESPONSE_HEADER: &str = "X-Trace-Options-Response";

/// Writes the response headers of `span_context` into `response`.
///
/// Nothing is written for an invalid span context.
pub fn inject_response_headers(span_context: &SpanContext, response: &mut dyn Injector) {
    if !span_context.is_valid() {
        return;
    }

    response.set(X_TRACE_HEADER, x_trace(span_context));
    if let Some(value) = x_trace_options_response(span_context) {
        trace!("Responding to X-Trace-Options with {value}");
        response.set(X_TRACE_OPTIONS_RESPONSE_HEADER, value);
    }
}

/// `X-Trace` value of a span context.
#[must_use]
pub fn x_trace(span_context: &SpanContext) -> String {
    format!(
        "00-{}-{}-{}",
        span_context.trace_id_hex(),
        span_context.span_id_hex(),
        if span_context.is_sampled() { "01" } else { "00" }
    )
}

/// `X-Trace-Options-Response` value, if the trace state carries a response.
#[must_use]
pub fn x_trace_options_response(span_context: &SpanContext) -> Option<String> {
    span_context
        .trace_state
        .get(XTRACE_OPTIONS_RESPONSE_KEY)
        .map(desanitize)
}
