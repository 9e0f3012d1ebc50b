// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Values exchanged with the quota machinery.

use std::collections::HashMap;
use std::fmt;

/// Sample rates are expressed in parts per million.
pub const SAMPLE_RESOLUTION: i32 = 1_000_000;

/// Token bucket a request draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BucketType {
    Regular,
    /// Authenticated trigger-trace requests.
    TriggerTraceRelaxed,
    /// Unauthenticated trigger-trace requests.
    TriggerTraceStrict,
}

/// Kind of request being sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum RequestType {
    #[default]
    Regular,
    AuthenticatedTriggerTrace,
    UnauthenticatedTriggerTrace,
}

impl RequestType {
    #[must_use]
    pub fn bucket_type(self) -> BucketType {
        match self {
            RequestType::Regular => BucketType::Regular,
            RequestType::AuthenticatedTriggerTrace => BucketType::TriggerTraceRelaxed,
            RequestType::UnauthenticatedTriggerTrace => BucketType::TriggerTraceStrict,
        }
    }

    #[must_use]
    pub fn is_trigger_trace(self) -> bool {
        self != RequestType::Regular
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            RequestType::Regular => "REGULAR",
            RequestType::AuthenticatedTriggerTrace => "AUTHENTICATED_TRIGGER_TRACE",
            RequestType::UnauthenticatedTriggerTrace => "UNAUTHENTICATED_TRIGGER_TRACE",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the sample rate of a decision came from.
///
/// Numeric values are reported in the `sw.SampleSource` attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SampleRateSource {
    File = 1,
    #[default]
    Default = 2,
    Oboe = 3,
    LastOboe = 4,
    DefaultMisconfigured = 5,
    OboeDefault = 6,
    Custom = 7,
}

impl SampleRateSource {
    #[must_use]
    pub fn value(self) -> i64 {
        self as i64
    }
}

/// Capacity and refill rate of one token bucket.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BucketSettings {
    pub capacity: f64,
    pub rate_per_sec: f64,
}

/// Sampling configuration a decision was made with.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TraceConfig {
    /// Parts per [`SAMPLE_RESOLUTION`].
    pub sample_rate: i32,
    pub sample_rate_source: SampleRateSource,
    pub tracing_enabled: bool,
    pub trigger_trace_enabled: bool,
    pub buckets: HashMap<BucketType, BucketSettings>,
}

impl TraceConfig {
    #[must_use]
    pub fn bucket_rate(&self, bucket: BucketType) -> f64 {
        self.buckets.get(&bucket).map_or(0.0, |b| b.rate_per_sec)
    }

    #[must_use]
    pub fn bucket_capacity(&self, bucket: BucketType) -> f64 {
        self.buckets.get(&bucket).map_or(0.0, |b| b.capacity)
    }
}

/// Verdict of the quota machinery for one span.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TraceDecision {
    pub sampled: bool,
    pub report_metrics: bool,
    pub request_type: RequestType,
    /// `None` when no settings were available.
    pub trace_config: Option<TraceConfig>,
    /// The request was selected but its bucket had no token left.
    pub bucket_exhausted: bool,
}

impl TraceDecision {
    /// Decision used when no settings are available: nothing is traced nor measured.
    #[must_use]
    pub fn without_settings(request_type: RequestType) -> Self {
        Self {
            request_type,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_type_buckets() {
        assert_eq!(RequestType::Regular.bucket_type(), BucketType::Regular);
        assert_eq!(
            RequestType::AuthenticatedTriggerTrace.bucket_type(),
            BucketType::TriggerTraceRelaxed
        );
        assert_eq!(
            RequestType::UnauthenticatedTriggerTrace.bucket_type(),
            BucketType::TriggerTraceStrict
        );
        assert_eq!(
            RequestType::UnauthenticatedTriggerTrace.to_string(),
            "UNAUTHENTICATED_TRIGGER_TRACE"
        );
    }

    #[test]
    fn missing_bucket_reads_as_zero() {
        let config = TraceConfig::default();
        assert!(config.bucket_rate(BucketType::Regular).abs() < f64::EPSILON);
        assert_eq!(SampleRateSource::Oboe.value(), 3);
    }
}
