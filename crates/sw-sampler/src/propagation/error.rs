// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Errors raised while reading or writing propagation headers.
//!
//! They never reach the caller of [`ContextPropagator`](super::ContextPropagator): an extract
//! failure is logged and the header is treated as absent.

use thiserror::Error;

/// Failure to decode or encode a propagation header.
///
/// Displayed as `"Cannot {operation} {header}: {message}"`, e.g.
/// `"Cannot extract traceparent: invalid traceparent"`.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("Cannot {} {}: {}", operation, header, message)]
pub struct Error {
    message: &'static str,
    header: &'static str,
    operation: &'static str,
}

impl Error {
    #[must_use]
    pub fn extract(message: &'static str, header: &'static str) -> Self {
        Self {
            message,
            header,
            operation: "extract",
        }
    }

    #[must_use]
    pub fn inject(message: &'static str, header: &'static str) -> Self {
        Self {
            message,
            header,
            operation: "inject",
        }
    }
}
