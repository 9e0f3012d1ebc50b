// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trigger-trace support.
//!
//! A caller can ask for a specific request to be traced by sending `X-Trace-Options`, optionally
//! signed with `X-Trace-Options-Signature`. The options are parsed on extract, influence the
//! request type of the sampling decision, and are answered through `X-Trace-Options-Response`:
//!
//! ```text
//! X-Trace-Options: trigger-trace;custom-tier=gold;foo
//!   ↓
//! XTraceOptions { trigger_trace, custom_kvs: [custom-tier=gold], ignored: [foo] }
//!   ↓
//! TraceDecision
//!   ↓
//! X-Trace-Options-Response: trigger-trace=ok;ignored=foo
//! ```

pub mod options;
pub mod response;
pub mod signature;

pub use options::XTraceOptions;
pub use response::{desanitize, sanitize, XTraceOptionsResponse};
pub use signature::{AuthFailure, AuthStatus, PresenceVerifier, SignatureVerifier};
