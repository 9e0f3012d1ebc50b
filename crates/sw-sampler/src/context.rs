// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace context structures shared by the propagator and the sampler.
//!
//! - **`SpanContext`**: W3C identity of a span (trace id, span id, flags) plus its `tracestate`
//! - **`Context`**: what extraction produced for the current request: the parent span context,
//!   the parsed trigger-trace options and a snapshot of the foreign `tracestate`
//! - **`Attributes`**: span attributes consulted by naming and written by sampling
//!
//! ```text
//! Incoming Request
//!   ↓
//! Extract Context (traceparent, tracestate, X-Trace-Options)
//!   ↓
//! Sample (parent SpanContext + attributes)
//!   ↓
//! Inject SpanContext (into outgoing request headers)
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::propagation::trace_state::TraceState;
use crate::trigger_trace::XTraceOptions;

/// Span attributes keyed by attribute name.
///
/// Ordered so that emitted attribute sets are deterministic.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Value of a span attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    I64(i64),
    F64(f64),
    Array(Vec<AttributeValue>),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::I64(i) => write!(f, "{i}"),
            AttributeValue::F64(v) => write!(f, "{v}"),
            AttributeValue::Array(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::I64(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::F64(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(values: Vec<String>) -> Self {
        AttributeValue::Array(values.into_iter().map(AttributeValue::String).collect())
    }
}

/// Returns the attribute under `key` when it holds a string.
#[must_use]
pub fn string_attribute<'a>(attributes: &'a Attributes, key: &str) -> Option<&'a str> {
    match attributes.get(key) {
        Some(AttributeValue::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// Role of a span in its trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpanKind::Internal => "INTERNAL",
            SpanKind::Server => "SERVER",
            SpanKind::Client => "CLIENT",
            SpanKind::Producer => "PRODUCER",
            SpanKind::Consumer => "CONSUMER",
        };
        f.write_str(name)
    }
}

/// W3C identity of a span.
///
/// A span context is valid when both identifiers are non-zero. Contexts built by
/// [`ContextPropagator::extract`](crate::propagation::ContextPropagator) are marked remote;
/// contexts of spans started in this process are local.
///
/// # Example
///
/// ```
/// use sw_sampler::context::SpanContext;
///
/// let ctx = SpanContext::new(0x80f1_98ee_5634_3ba8_64fe_8b2a_57d3_eff7, 0x00f0_67aa_0ba9_02b7, true);
/// assert_eq!(ctx.to_w3c_hex(), "00-80f198ee56343ba864fe8b2a57d3eff7-00f067aa0ba902b7-01");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpanContext {
    /// 128-bit trace identifier.
    pub trace_id: u128,
    /// 64-bit span identifier.
    pub span_id: u64,
    /// W3C trace flags; bit 0 is the sampled flag.
    pub trace_flags: u8,
    /// Whether this context was propagated from another process.
    pub is_remote: bool,
    /// Vendor state carried alongside the context.
    pub trace_state: TraceState,
}

impl SpanContext {
    /// Trace flag bit marking a sampled trace.
    pub const FLAG_SAMPLED: u8 = 0x01;

    /// Creates a local span context with an empty trace state.
    #[must_use]
    pub fn new(trace_id: u128, span_id: u64, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            trace_flags: if sampled { Self::FLAG_SAMPLED } else { 0 },
            is_remote: false,
            trace_state: TraceState::default(),
        }
    }

    #[must_use]
    pub fn with_remote(mut self, is_remote: bool) -> Self {
        self.is_remote = is_remote;
        self
    }

    #[must_use]
    pub fn with_trace_state(mut self, trace_state: TraceState) -> Self {
        self.trace_state = trace_state;
        self
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.trace_id != 0 && self.span_id != 0
    }

    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.trace_flags & Self::FLAG_SAMPLED != 0
    }

    #[must_use]
    pub fn trace_id_hex(&self) -> String {
        format!("{:032x}", self.trace_id)
    }

    #[must_use]
    pub fn span_id_hex(&self) -> String {
        format!("{:016x}", self.span_id)
    }

    /// Formats the context as a version `00` `traceparent` value.
    #[must_use]
    pub fn to_w3c_hex(&self) -> String {
        format!(
            "00-{}-{}-{:02x}",
            self.trace_id_hex(),
            self.span_id_hex(),
            self.trace_flags
        )
    }
}

/// Request scoped state produced by extraction and consumed by sampling and injection.
#[derive(Clone, Debug, Default)]
pub struct Context {
    /// Parent span context, remote when extracted from a `traceparent` header.
    pub span_context: Option<SpanContext>,
    /// Parsed `X-Trace-Options`, if the request carried the header.
    pub x_trace_options: Option<XTraceOptions>,
    /// Raw `X-Trace-Options` header, forwarded verbatim on inject.
    pub x_trace_options_header: Option<String>,
    /// Raw `X-Trace-Options-Signature` header, forwarded verbatim on inject.
    pub x_trace_options_signature: Option<String>,
    /// Inbound `tracestate`, kept only when it carries entries of other vendors.
    pub upstream_trace_state: Option<String>,
}

impl Context {
    #[must_use]
    pub fn with_span_context(mut self, span_context: SpanContext) -> Self {
        self.span_context = Some(span_context);
        self
    }
}
