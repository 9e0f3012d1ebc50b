// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Failure of the quota machinery.
///
/// The engine never surfaces it: any error turns into a not sampled, not measured result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid parent context: {0}")]
    InvalidParent(String),
    #[error("quota machinery failure: {0}")]
    Internal(String),
}
