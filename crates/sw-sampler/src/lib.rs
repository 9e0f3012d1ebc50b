// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # SW Sampler
//!
//! Sampling and context-propagation core for a W3C trace-context based tracing
//! agent. Given a span about to start, the crate decides whether its trace is
//! recorded, derives a bounded-cardinality transaction name for root spans, and
//! carries vendor state across process boundaries through `tracestate`.
//!
//! ## Architecture
//!
//! - [`propagation`]: `tracestate` codec, carriers and the [`propagation::ContextPropagator`]
//! - [`trigger_trace`]: `X-Trace-Options` parsing, signature seam and response computation
//! - [`naming`]: the [`naming::TransactionNameManager`] and its naming strategy chain
//! - [`sampler`]: the [`sampler::SamplingDecisionEngine`], decision types and quota machinery
//! - [`response_headers`]: outbound `X-Trace` / `X-Trace-Options-Response` headers
//! - [`config`]: environment driven configuration
//! - [`logger`]: log formatting for `tracing-subscriber`
//!
//! ## Flow
//!
//! ```text
//! inbound headers ── ContextPropagator::extract ──▶ Context
//!                                                      │
//!                       SamplingDecisionEngine::should_sample
//!                                                      │
//!                                                SamplingResult
//!                                                      │
//! outbound headers ◀── ContextPropagator::inject ── SpanContext
//! ```

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(missing_copy_implementations)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]

/// Configuration read from the process environment
pub mod config;

/// Span context, span kinds and attribute values
pub mod context;

/// Log formatting and subscriber setup
pub mod logger;

/// Transaction naming with bounded cardinality
pub mod naming;

/// `tracestate` codec and header propagation
pub mod propagation;

/// Outbound response headers
pub mod response_headers;

/// Sampling decision engine
pub mod sampler;

/// Trigger-trace options and responses
pub mod trigger_trace;
