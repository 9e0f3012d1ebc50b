// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Quota machinery: turns settings, request type and upstream state into a [`TraceDecision`].
//!
//! The engine depends on the [`DecisionMaker`] trait only. [`SettingsDecisionMaker`] is the
//! default implementation:
//!
//! 1. Without a usable settings snapshot nothing is traced nor measured.
//! 2. Tracing is enabled by the settings, then narrowed by a matching resource override or the
//!    local tracing mode.
//! 3. A request is selected by the upstream sampled flag (continued traces), by the
//!    trigger-trace option (new traces asking for it) or by a dice roll against the sample rate.
//! 4. A selected request is sampled only if its token bucket still has a token.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use rand::Rng;
use regex::{Regex, RegexBuilder};
use tracing::{debug, trace};

use crate::trigger_trace::XTraceOptions;

use super::decision::{BucketType, RequestType, TraceConfig, TraceDecision, SAMPLE_RESOLUTION};
use super::error::Error;
use super::settings::{Settings, SettingsFetcher};

/// Request-type to bucket quota function consulted for root spans.
pub trait DecisionMaker: Send + Sync {
    /// Decides whether a request is traced.
    ///
    /// * `span_name` - name of the span being started
    /// * `parent` - W3C hex form (`00-<trace>-<span>-<flags>`) of a remote parent carrying valid
    ///   vendor state, `None` for a new trace
    /// * `options` - parsed `X-Trace-Options`
    /// * `signals` - request URL and `<kind>:<name>` layer, matched by resource overrides
    fn should_trace_request(
        &self,
        span_name: &str,
        parent: Option<&str>,
        options: Option<&XTraceOptions>,
        signals: &[String],
    ) -> Result<TraceDecision, Error>;
}

/// Locally configured tracing mode for requests whose signals match a pattern.
#[derive(Clone, Debug)]
pub struct ResourceOverride {
    matcher: Regex,
    tracing_enabled: bool,
}

impl ResourceOverride {
    /// `pattern` is matched case-insensitively.
    pub fn new(pattern: &str, tracing_enabled: bool) -> Result<Self, regex::Error> {
        Ok(Self {
            matcher: RegexBuilder::new(pattern).case_insensitive(true).build()?,
            tracing_enabled,
        })
    }

    #[must_use]
    pub fn matches(&self, signals: &[String]) -> bool {
        signals.iter().any(|signal| self.matcher.is_match(signal))
    }

    #[must_use]
    pub fn tracing_enabled(&self) -> bool {
        self.tracing_enabled
    }
}

/// Local configuration narrowing the remote settings.
#[derive(Clone, Debug, Default)]
pub struct LocalOverrides {
    /// Local tracing mode; `Some(false)` disables tracing.
    pub tracing_enabled: Option<bool>,
    /// Local trigger-trace mode; `Some(false)` disables trigger tracing.
    pub trigger_trace_enabled: Option<bool>,
    /// Evaluated in order, the first match wins over the local tracing mode.
    pub resources: Vec<ResourceOverride>,
}

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, rate_per_sec: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Default [`DecisionMaker`] backed by a [`SettingsFetcher`] and per-bucket token buckets.
pub struct SettingsDecisionMaker<F> {
    fetcher: F,
    overrides: LocalOverrides,
    buckets: Mutex<HashMap<BucketType, TokenBucket>>,
}

impl<F: SettingsFetcher> SettingsDecisionMaker<F> {
    pub fn new(fetcher: F, overrides: LocalOverrides) -> Self {
        Self {
            fetcher,
            overrides,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn tracing_enabled(&self, settings: &Settings, signals: &[String]) -> bool {
        if !settings.tracing_enabled {
            return false;
        }
        if let Some(resource) = self.overrides.resources.iter().find(|r| r.matches(signals)) {
            return resource.tracing_enabled;
        }
        self.overrides.tracing_enabled.unwrap_or(true)
    }

    fn take_token(&self, bucket: BucketType, config: &TraceConfig) -> bool {
        let capacity = config.bucket_capacity(bucket);
        let rate = config.bucket_rate(bucket);
        let now = Instant::now();

        let mut buckets = self.buckets.lock();
        buckets
            .entry(bucket)
            .or_insert_with(|| TokenBucket::new(capacity, now))
            .try_acquire(capacity, rate, now)
    }
}

fn roll(sample_rate: i32) -> bool {
    if sample_rate <= 0 {
        false
    } else if sample_rate >= SAMPLE_RESOLUTION {
        true
    } else {
        rand::rng().random_range(0..SAMPLE_RESOLUTION) < sample_rate
    }
}

fn parent_sampled(parent: &str) -> Result<bool, Error> {
    let parts: Vec<&str> = parent.split('-').collect();
    match parts.as_slice() {
        [_, _, _, flags] if flags.len() == 2 => u8::from_str_radix(flags, 16)
            .map(|flags| flags & 0x1 != 0)
            .map_err(|_| Error::InvalidParent(parent.to_string())),
        _ => Err(Error::InvalidParent(parent.to_string())),
    }
}

impl<F: SettingsFetcher> DecisionMaker for SettingsDecisionMaker<F> {
    fn should_trace_request(
        &self,
        span_name: &str,
        parent: Option<&str>,
        options: Option<&XTraceOptions>,
        signals: &[String],
    ) -> Result<TraceDecision, Error> {
        let requested = options.map_or(RequestType::Regular, XTraceOptions::request_type);
        let Some(settings) = self.fetcher.get_settings() else {
            debug!("No sampling settings available, not tracing {span_name}");
            return Ok(TraceDecision::without_settings(requested));
        };

        let mut config = settings.trace_config();
        config.tracing_enabled = self.tracing_enabled(&settings, signals);
        config.trigger_trace_enabled = settings.trigger_trace_enabled
            && self.overrides.trigger_trace_enabled.unwrap_or(true);

        // trigger-trace only applies to new traces
        let request_type = if parent.is_some() {
            RequestType::Regular
        } else {
            requested
        };

        let mut decision = TraceDecision {
            sampled: false,
            report_metrics: config.tracing_enabled,
            request_type,
            trace_config: None,
            bucket_exhausted: false,
        };

        if config.tracing_enabled {
            let selected = match parent {
                Some(parent) => parent_sampled(parent)?,
                None if request_type.is_trigger_trace() => config.trigger_trace_enabled,
                None => roll(config.sample_rate),
            };
            if selected {
                decision.sampled = self.take_token(request_type.bucket_type(), &config);
                decision.bucket_exhausted = !decision.sampled;
            }
        }

        trace!(
            "Trace decision for {span_name}: sampled={} request_type={request_type} exhausted={}",
            decision.sampled,
            decision.bucket_exhausted
        );
        decision.trace_config = Some(config);
        Ok(decision)
    }
}
