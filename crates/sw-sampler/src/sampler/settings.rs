// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sampling settings snapshots.
//!
//! Settings are fetched by an external component and published as immutable snapshots. The
//! sampler only reads the latest snapshot through a [`SettingsFetcher`]; a snapshot older than its
//! TTL is treated as unavailable.
//!
//! ```text
//! fetcher task ── watch::Sender<Option<Arc<Settings>>> ──▶ WatchSettingsFetcher ──▶ quota machinery
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::decision::{BucketSettings, BucketType, SampleRateSource, TraceConfig};

/// Default time a snapshot stays usable.
pub const DEFAULT_SETTINGS_TTL: Duration = Duration::from_secs(120);

/// Read-only sampling settings.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Parts per [`SAMPLE_RESOLUTION`](super::decision::SAMPLE_RESOLUTION).
    pub sample_rate: i32,
    pub sample_rate_source: SampleRateSource,
    pub tracing_enabled: bool,
    pub trigger_trace_enabled: bool,
    pub buckets: HashMap<BucketType, BucketSettings>,
    pub ttl: Duration,
    pub fetched_at: Instant,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: 0,
            sample_rate_source: SampleRateSource::Default,
            tracing_enabled: true,
            trigger_trace_enabled: true,
            buckets: HashMap::new(),
            ttl: DEFAULT_SETTINGS_TTL,
            fetched_at: Instant::now(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) > self.ttl
    }

    #[must_use]
    pub fn with_bucket(mut self, bucket: BucketType, capacity: f64, rate_per_sec: f64) -> Self {
        self.buckets.insert(
            bucket,
            BucketSettings {
                capacity,
                rate_per_sec,
            },
        );
        self
    }

    /// Projects the snapshot into the configuration attached to a decision.
    #[must_use]
    pub fn trace_config(&self) -> TraceConfig {
        TraceConfig {
            sample_rate: self.sample_rate,
            sample_rate_source: self.sample_rate_source,
            tracing_enabled: self.tracing_enabled,
            trigger_trace_enabled: self.trigger_trace_enabled,
            buckets: self.buckets.clone(),
        }
    }
}

/// Source of the current settings snapshot.
///
/// Implementations must not block: a fetcher without a usable snapshot returns `None`.
pub trait SettingsFetcher: Send + Sync {
    fn get_settings(&self) -> Option<Arc<Settings>>;
}

/// [`SettingsFetcher`] reading the latest snapshot published on a `tokio::sync::watch` channel.
#[derive(Clone, Debug)]
pub struct WatchSettingsFetcher {
    rx: watch::Receiver<Option<Arc<Settings>>>,
}

impl WatchSettingsFetcher {
    #[must_use]
    pub fn new(rx: watch::Receiver<Option<Arc<Settings>>>) -> Self {
        Self { rx }
    }

    /// Creates a fetcher together with the sender publishing into it.
    #[must_use]
    pub fn channel() -> (watch::Sender<Option<Arc<Settings>>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self::new(rx))
    }
}

impl SettingsFetcher for WatchSettingsFetcher {
    fn get_settings(&self) -> Option<Arc<Settings>> {
        let current = self.rx.borrow().clone();
        current.filter(|settings| !settings.is_expired(Instant::now()))
    }
}
