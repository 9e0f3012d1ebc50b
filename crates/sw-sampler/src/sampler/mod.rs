// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sampling decision engine.
//!
//! The engine looks at the parent of the span being started:
//!
//! | parent | behavior |
//! |---|---|
//! | none or invalid | new trace: quota machinery, transaction name, trigger-trace response |
//! | remote, valid `sw` entry | continued trace: quota machinery with the parent context, parent id attribute |
//! | remote, no or malformed `sw` entry | handled as a new trace |
//! | local | sampled iff the parent is sampled |
//!
//! Failures of the quota machinery never escape: the span is then neither sampled nor measured.

pub mod decision;
pub mod error;
pub mod quota;
pub mod result;
pub mod settings;

use std::sync::Arc;

use tracing::{debug, trace};

pub use decision::{RequestType, TraceDecision};
pub use error::Error;
pub use quota::{DecisionMaker, LocalOverrides, ResourceOverride, SettingsDecisionMaker};
pub use result::{SamplingDecision, SamplingResult};
pub use settings::{Settings, SettingsFetcher, WatchSettingsFetcher};

use crate::context::{string_attribute, AttributeValue, Attributes, Context, SpanContext, SpanKind};
use crate::naming::{TransactionNameManager, SERVER_ADDRESS_KEY, URL_PATH_KEY};
use crate::propagation::sw_parent;
use crate::trigger_trace::{XTraceOptions, XTraceOptionsResponse};

use result::{
    markers, BUCKET_CAPACITY_KEY, BUCKET_RATE_KEY, PARENT_ID_KEY, REQUEST_TYPE_KEY,
    SAMPLE_RATE_KEY, SAMPLE_SOURCE_KEY, SW_KEYS_KEY, TRANSACTION_NAME_KEY, TRIGGERED_TRACE_KEY,
    UPSTREAM_TRACESTATE_KEY,
};

pub const URL_FULL_KEY: &str = "url.full";
pub const URL_SCHEME_KEY: &str = "url.scheme";

/// Request URL used to match resource overrides: `url.full`, or whatever of
/// `<url.scheme>://<server.address><url.path>` is present.
#[must_use]
pub fn construct_url(attributes: &Attributes) -> String {
    if let Some(url) = string_attribute(attributes, URL_FULL_KEY) {
        return url.to_string();
    }

    let mut url = String::new();
    if let Some(scheme) = string_attribute(attributes, URL_SCHEME_KEY) {
        url.push_str(scheme);
        url.push_str("://");
    }
    if let Some(host) = string_attribute(attributes, SERVER_ADDRESS_KEY) {
        url.push_str(host);
    }
    if let Some(path) = string_attribute(attributes, URL_PATH_KEY) {
        url.push_str(path);
    }
    trace!("Constructed url {url}");
    url
}

/// Signals handed to the quota machinery: request URL and `<KIND>:<name>`.
#[must_use]
pub fn signals(name: &str, kind: SpanKind, attributes: &Attributes) -> Vec<String> {
    vec![construct_url(attributes), format!("{kind}:{}", name.trim())]
}

/// How a root span relates to an upstream trace.
enum Root<'a> {
    Genesis,
    Continued {
        parent: &'a SpanContext,
        parent_id: &'a str,
    },
}

/// Decides whether spans are recorded and attaches the vendor attributes.
pub struct SamplingDecisionEngine<D> {
    decision_maker: D,
    naming: Arc<TransactionNameManager>,
}

impl<D: DecisionMaker> SamplingDecisionEngine<D> {
    pub fn new(decision_maker: D, naming: Arc<TransactionNameManager>) -> Self {
        Self {
            decision_maker,
            naming,
        }
    }

    #[must_use]
    pub fn naming(&self) -> &Arc<TransactionNameManager> {
        &self.naming
    }

    /// Samples a span about to start.
    ///
    /// * `parent` - extracted context of the request, holding the parent span context if any
    /// * `trace_id` - trace id of the new span
    /// * `name`, `kind`, `attributes` - the new span
    pub fn should_sample(
        &self,
        parent: &Context,
        trace_id: u128,
        name: &str,
        kind: SpanKind,
        attributes: &Attributes,
    ) -> SamplingResult {
        let parent_span = parent.span_context.as_ref().filter(|sc| sc.is_valid());

        let result = match parent_span {
            None => self.sample_root(parent, trace_id, name, kind, attributes, &Root::Genesis),
            Some(span_context) if span_context.is_remote => {
                let root = sw_parent(&span_context.trace_state).map_or(Root::Genesis, |parent_id| {
                    Root::Continued {
                        parent: span_context,
                        parent_id,
                    }
                });
                self.sample_root(parent, trace_id, name, kind, attributes, &root)
            }
            Some(span_context) if span_context.is_sampled() => SamplingResult::parent_sampled(),
            Some(_) => SamplingResult::parent_not_sampled(),
        };

        trace!("Sampling decision for {name}: {:?}", result.decision());
        result
    }

    fn sample_root(
        &self,
        context: &Context,
        trace_id: u128,
        name: &str,
        kind: SpanKind,
        attributes: &Attributes,
        root: &Root<'_>,
    ) -> SamplingResult {
        let signals = signals(name, kind, attributes);
        let options = context.x_trace_options.as_ref();
        let (parent_hex, genesis) = match root {
            Root::Genesis => (None, true),
            Root::Continued { parent, .. } => (Some(parent.to_w3c_hex()), false),
        };

        let mut additional = Attributes::new();
        if let Root::Continued { parent_id, .. } = root {
            additional.insert(PARENT_ID_KEY.to_string(), AttributeValue::from(*parent_id));
        }
        if context.span_context.as_ref().is_some_and(|sc| sc.is_remote) {
            if let Some(upstream) = &context.upstream_trace_state {
                additional.insert(
                    UPSTREAM_TRACESTATE_KEY.to_string(),
                    AttributeValue::from(upstream.as_str()),
                );
            }
        }
        additional.insert(
            TRANSACTION_NAME_KEY.to_string(),
            AttributeValue::from(self.naming.transaction_name(trace_id, name, attributes)),
        );

        let decision = match self.decision_maker.should_trace_request(
            name,
            parent_hex.as_deref(),
            options,
            &signals,
        ) {
            Ok(decision) => decision,
            Err(err) => {
                debug!("Unable to make a trace decision for {name}, not tracing: {err}");
                return SamplingResult::not_traced().wrap(additional, None);
            }
        };

        let response = XTraceOptionsResponse::compute(options, &decision, genesis)
            .map(|response| response.to_string());
        to_sampling_result(&decision, options, genesis).wrap(additional, response.as_deref())
    }
}

fn to_sampling_result(
    decision: &TraceDecision,
    options: Option<&XTraceOptions>,
    genesis: bool,
) -> SamplingResult {
    if !decision.sampled {
        return if decision.report_metrics {
            SamplingResult::metrics_only()
        } else {
            SamplingResult::not_traced()
        };
    }

    let mut attributes = markers(true, decision.report_metrics);
    let bucket = decision.request_type.bucket_type();
    if let Some(config) = &decision.trace_config {
        attributes.insert(
            SAMPLE_RATE_KEY.to_string(),
            AttributeValue::I64(i64::from(config.sample_rate)),
        );
        attributes.insert(
            SAMPLE_SOURCE_KEY.to_string(),
            AttributeValue::I64(config.sample_rate_source.value()),
        );
        attributes.insert(
            BUCKET_RATE_KEY.to_string(),
            AttributeValue::F64(config.bucket_rate(bucket)),
        );
        attributes.insert(
            BUCKET_CAPACITY_KEY.to_string(),
            AttributeValue::F64(config.bucket_capacity(bucket)),
        );
    }
    attributes.insert(
        REQUEST_TYPE_KEY.to_string(),
        AttributeValue::from(decision.request_type.name()),
    );

    if let Some(options) = options.filter(|_| genesis) {
        for (key, value) in options.custom_kvs() {
            attributes.insert(key.clone(), AttributeValue::from(value.as_str()));
        }
        if decision.request_type.is_trigger_trace() {
            attributes.insert(TRIGGERED_TRACE_KEY.to_string(), AttributeValue::Bool(true));
        }
        if let Some(sw_keys) = options.sw_keys() {
            attributes.insert(SW_KEYS_KEY.to_string(), AttributeValue::from(sw_keys));
        }
    }

    SamplingResult::new(SamplingDecision::RecordAndSample, attributes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    use super::decision::{BucketSettings, BucketType, SampleRateSource, TraceConfig};
    use super::result::{DETAILED_TRACING_KEY, METRICS_KEY, SAMPLER_KEY};
    use super::*;
    use crate::propagation::trace_state::TraceState;

    const TRACE_ID: u128 = 0x80f1_98ee_5634_3ba8_64fe_8b2a_57d3_eff7;

    /// Records its calls and answers with a fixed decision.
    struct FixedDecision {
        decision: Result<TraceDecision, Error>,
        calls: Mutex<Vec<(Option<String>, Vec<String>)>>,
    }

    impl FixedDecision {
        fn new(decision: Result<TraceDecision, Error>) -> Self {
            Self {
                decision,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl DecisionMaker for &FixedDecision {
        fn should_trace_request(
            &self,
            _span_name: &str,
            parent: Option<&str>,
            _options: Option<&XTraceOptions>,
            signals: &[String],
        ) -> Result<TraceDecision, Error> {
            self.calls
                .lock()
                .push((parent.map(str::to_string), signals.to_vec()));
            self.decision.clone()
        }
    }

    fn sampled_decision(request_type: RequestType) -> TraceDecision {
        let mut buckets = std::collections::HashMap::new();
        buckets.insert(
            request_type.bucket_type(),
            BucketSettings {
                capacity: 6.0,
                rate_per_sec: 0.5,
            },
        );
        TraceDecision {
            sampled: true,
            report_metrics: true,
            request_type,
            trace_config: Some(TraceConfig {
                sample_rate: 1_000_000,
                sample_rate_source: SampleRateSource::Oboe,
                tracing_enabled: true,
                trigger_trace_enabled: true,
                buckets,
            }),
            bucket_exhausted: false,
        }
    }

    fn engine(maker: &FixedDecision) -> SamplingDecisionEngine<&FixedDecision> {
        SamplingDecisionEngine::new(maker, Arc::new(TransactionNameManager::default()))
    }

    fn remote_parent(trace_state: &str) -> Context {
        Context::default().with_span_context(
            SpanContext::new(TRACE_ID, 0x00f0_67aa_0ba9_02b7, true)
                .with_remote(true)
                .with_trace_state(TraceState::parse(trace_state)),
        )
    }

    fn http_attributes() -> Attributes {
        Attributes::from([
            (URL_SCHEME_KEY.to_string(), AttributeValue::from("https")),
            (SERVER_ADDRESS_KEY.to_string(), AttributeValue::from("shop.local")),
            (URL_PATH_KEY.to_string(), AttributeValue::from("/orders/42/items")),
        ])
    }

    #[test]
    fn url_construction() {
        assert_eq!(construct_url(&http_attributes()), "https://shop.local/orders/42/items");
        let full = Attributes::from([
            (URL_FULL_KEY.to_string(), AttributeValue::from("http://a/b?c")),
            (URL_PATH_KEY.to_string(), AttributeValue::from("/ignored")),
        ]);
        assert_eq!(construct_url(&full), "http://a/b?c");
        assert_eq!(construct_url(&Attributes::new()), "");
        assert_eq!(
            signals(" GET /orders ", SpanKind::Server, &Attributes::new()),
            vec![String::new(), "SERVER:GET /orders".to_string()]
        );
    }

    #[test]
    fn genesis_sampled() {
        let maker = FixedDecision::new(Ok(sampled_decision(RequestType::Regular)));
        let engine = engine(&maker);
        let result = engine.should_sample(
            &Context::default(),
            TRACE_ID,
            "GET",
            SpanKind::Server,
            &http_attributes(),
        );

        assert_eq!(result.decision(), SamplingDecision::RecordAndSample);
        let attrs = result.attributes();
        assert_eq!(attrs.get(SAMPLE_RATE_KEY), Some(&AttributeValue::I64(1_000_000)));
        assert_eq!(attrs.get(SAMPLE_SOURCE_KEY), Some(&AttributeValue::I64(3)));
        assert_eq!(attrs.get(BUCKET_CAPACITY_KEY), Some(&AttributeValue::F64(6.0)));
        assert_eq!(attrs.get(BUCKET_RATE_KEY), Some(&AttributeValue::F64(0.5)));
        assert_eq!(attrs.get(REQUEST_TYPE_KEY), Some(&AttributeValue::from("REGULAR")));
        assert_eq!(attrs.get(DETAILED_TRACING_KEY), Some(&AttributeValue::Bool(true)));
        assert_eq!(attrs.get(SAMPLER_KEY), Some(&AttributeValue::Bool(true)));
        assert_eq!(
            attrs.get(TRANSACTION_NAME_KEY),
            Some(&AttributeValue::from("/orders/42"))
        );
        assert!(attrs.get(PARENT_ID_KEY).is_none());
        assert!(result.x_trace_options_response().is_none());

        let calls = maker.calls.lock();
        assert_eq!(calls[0].0, None);
        assert_eq!(
            calls[0].1,
            vec![
                "https://shop.local/orders/42/items".to_string(),
                "SERVER:GET".to_string()
            ]
        );
    }

    #[test]
    fn genesis_trigger_trace_carries_options() {
        let maker = FixedDecision::new(Ok(sampled_decision(RequestType::AuthenticatedTriggerTrace)));
        let engine = engine(&maker);
        let context = Context {
            x_trace_options: XTraceOptions::parse(
                Some("trigger-trace;sw-keys=lo:se;custom-tier=gold;foo"),
                Some("signature"),
            ),
            ..Context::default()
        };

        let result = engine.should_sample(&context, TRACE_ID, "GET", SpanKind::Server, &Attributes::new());
        let attrs = result.attributes();
        assert_eq!(attrs.get("custom-tier"), Some(&AttributeValue::from("gold")));
        assert_eq!(attrs.get(TRIGGERED_TRACE_KEY), Some(&AttributeValue::Bool(true)));
        assert_eq!(attrs.get(SW_KEYS_KEY), Some(&AttributeValue::from("lo:se")));
        assert_eq!(
            result.x_trace_options_response(),
            Some("auth####ok;trigger-trace####ok;ignored####foo")
        );

        let trace_state = result.updated_trace_state(&TraceState::default());
        assert_eq!(
            trace_state.get("xtrace_options_response"),
            Some("auth####ok;trigger-trace####ok;ignored####foo")
        );
    }

    #[test]
    fn continued_trace_passes_parent_through() {
        let maker = FixedDecision::new(Ok(sampled_decision(RequestType::Regular)));
        let engine = engine(&maker);
        let mut context = remote_parent("sw=a2d8376f3cab2837-01,foo=bar");
        context.upstream_trace_state = Some("sw=a2d8376f3cab2837-01,foo=bar".to_string());
        context.x_trace_options = XTraceOptions::parse(Some("trigger-trace;custom-tier=gold"), None);

        let result = engine.should_sample(&context, TRACE_ID, "GET", SpanKind::Server, &Attributes::new());
        let attrs = result.attributes();
        assert_eq!(
            attrs.get(PARENT_ID_KEY),
            Some(&AttributeValue::from("a2d8376f3cab2837"))
        );
        assert_eq!(
            attrs.get(UPSTREAM_TRACESTATE_KEY),
            Some(&AttributeValue::from("sw=a2d8376f3cab2837-01,foo=bar"))
        );
        // options only decorate new traces
        assert!(attrs.get("custom-tier").is_none());
        assert_eq!(
            result.x_trace_options_response(),
            Some("trigger-trace####ignored")
        );
        assert_eq!(
            maker.calls.lock()[0].0.as_deref(),
            Some("00-80f198ee56343ba864fe8b2a57d3eff7-00f067aa0ba902b7-01")
        );
    }

    #[test]
    fn malformed_vendor_entry_starts_a_new_trace() {
        let maker = FixedDecision::new(Ok(sampled_decision(RequestType::Regular)));
        let engine = engine(&maker);
        for trace_state in ["sw=xyz", "sw=a2d8376f3cab2837-02", "foo=bar", "not-a-valid-entry"] {
            let result = engine.should_sample(
                &remote_parent(trace_state),
                TRACE_ID,
                "GET",
                SpanKind::Server,
                &Attributes::new(),
            );
            assert_eq!(result.decision(), SamplingDecision::RecordAndSample);
            assert!(result.attributes().get(PARENT_ID_KEY).is_none());
        }
        assert!(maker.calls.lock().iter().all(|(parent, _)| parent.is_none()));
    }

    #[test]
    fn local_parent_is_followed() {
        let maker = FixedDecision::new(Ok(sampled_decision(RequestType::Regular)));
        let engine = engine(&maker);

        let sampled = Context::default().with_span_context(SpanContext::new(TRACE_ID, 7, true));
        let result = engine.should_sample(&sampled, TRACE_ID, "child", SpanKind::Internal, &Attributes::new());
        assert_eq!(result, SamplingResult::parent_sampled());

        let unsampled = Context::default().with_span_context(SpanContext::new(TRACE_ID, 7, false));
        let result = engine.should_sample(&unsampled, TRACE_ID, "child", SpanKind::Internal, &Attributes::new());
        assert_eq!(result, SamplingResult::parent_not_sampled());

        assert!(maker.calls.lock().is_empty());
        assert_eq!(engine.naming().name_count(), 0);
    }

    #[test]
    fn unsampled_with_metrics_is_record_only() {
        let decision = TraceDecision {
            sampled: false,
            report_metrics: true,
            ..TraceDecision::default()
        };
        let maker = FixedDecision::new(Ok(decision));
        let result = engine(&maker).should_sample(
            &Context::default(),
            TRACE_ID,
            "GET",
            SpanKind::Server,
            &Attributes::new(),
        );
        assert_eq!(result.decision(), SamplingDecision::RecordOnly);
        assert_eq!(result.attributes().get(METRICS_KEY), Some(&AttributeValue::Bool(true)));
        assert!(result.attributes().get(SAMPLE_RATE_KEY).is_none());
    }

    #[test]
    #[traced_test]
    fn quota_failure_fails_closed() {
        let maker = FixedDecision::new(Err(Error::Internal("settings store poisoned".to_string())));
        let context = Context {
            x_trace_options: XTraceOptions::parse(Some("trigger-trace"), None),
            ..Context::default()
        };
        let result = engine(&maker).should_sample(&context, TRACE_ID, "GET", SpanKind::Server, &Attributes::new());

        assert_eq!(result.decision(), SamplingDecision::Drop);
        assert_eq!(result.attributes().get(METRICS_KEY), Some(&AttributeValue::Bool(false)));
        assert!(result.x_trace_options_response().is_none());
        assert!(logs_contain("settings store poisoned"));
    }

    #[test]
    fn invalid_parent_is_treated_as_absent() {
        let maker = FixedDecision::new(Ok(sampled_decision(RequestType::Regular)));
        let context = Context::default().with_span_context(SpanContext::new(0, 0, true).with_remote(true));
        let result = engine(&maker).should_sample(&context, TRACE_ID, "GET", SpanKind::Server, &Attributes::new());
        assert_eq!(result.decision(), SamplingDecision::RecordAndSample);
        assert_eq!(maker.calls.lock().len(), 1);
    }

    #[test]
    fn with_default_quota_machinery() {
        let (tx, fetcher) = WatchSettingsFetcher::channel();
        tx.send_replace(Some(Arc::new(
            Settings {
                sample_rate: decision::SAMPLE_RESOLUTION,
                ..Settings::default()
            }
            .with_bucket(BucketType::Regular, 1.0, 0.0),
        )));
        let engine = SamplingDecisionEngine::new(
            SettingsDecisionMaker::new(fetcher, LocalOverrides::default()),
            Arc::new(TransactionNameManager::default()),
        );

        let first = engine.should_sample(&Context::default(), TRACE_ID, "GET", SpanKind::Server, &Attributes::new());
        assert_eq!(first.decision(), SamplingDecision::RecordAndSample);
        let second = engine.should_sample(&Context::default(), TRACE_ID + 1, "GET", SpanKind::Server, &Attributes::new());
        assert_eq!(second.decision(), SamplingDecision::RecordOnly);
    }
}
