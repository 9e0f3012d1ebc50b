// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Seam for `X-Trace-Options-Signature` validation.
//!
//! Cryptographic validation belongs to an embedder supplied [`SignatureVerifier`]. The crate only
//! ships [`PresenceVerifier`], which trusts any non-blank signature.

use std::fmt;

/// Reason why a signed request was not authenticated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthFailure {
    BadSignature,
    BadTimestamp,
    NoSignatureKey,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            AuthFailure::BadSignature => "bad-signature",
            AuthFailure::BadTimestamp => "bad-timestamp",
            AuthFailure::NoSignatureKey => "no-signature-key",
        };
        f.write_str(reason)
    }
}

/// Outcome of signature validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AuthStatus {
    /// No signature was supplied.
    #[default]
    NotAuthenticated,
    Ok,
    Failure(AuthFailure),
}

impl AuthStatus {
    #[must_use]
    pub fn is_authenticated(self) -> bool {
        self == AuthStatus::Ok
    }

    #[must_use]
    pub fn failure(self) -> Option<AuthFailure> {
        match self {
            AuthStatus::Failure(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Validates the signature of an `X-Trace-Options` header.
pub trait SignatureVerifier: Send + Sync {
    /// Validates `signature` over the raw `options` header.
    ///
    /// `timestamp` is the parsed `ts` option, if any.
    fn verify(&self, options: &str, signature: Option<&str>, timestamp: Option<i64>) -> AuthStatus;
}

/// Treats any non-blank signature as valid.
#[derive(Clone, Copy, Debug, Default)]
pub struct PresenceVerifier;

impl SignatureVerifier for PresenceVerifier {
    fn verify(&self, _options: &str, signature: Option<&str>, _timestamp: Option<i64>) -> AuthStatus {
        match signature.map(str::trim) {
            Some(s) if !s.is_empty() => AuthStatus::Ok,
            _ => AuthStatus::NotAuthenticated,
        }
    }
}
