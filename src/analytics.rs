//! Admission engine and recording entry point.

use crate::config::Config;
use crate::crawler::{CrawlerDetector, UserAgentCrawlerDetector};
use crate::exclusions::ExclusionRules;
use crate::hooks::{EntityRef, HookPipeline, HookResult};
use crate::known_bots;
use crate::reputation::ipinfo::IpInfoClient;
use crate::reputation::{AsnBlocklist, ReputationClassifier, ReputationClient};
use crate::request::{InboundRequest, RequestDetails};
use crate::sink::{AnalyticsRecord, AnalyticsSink, TracingSink};
use crate::store::{BlockedIpStore, FileBlockedIpStore, MemoryBlockedIpStore};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Why a request was left out of analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Analytics is switched off.
    Disabled,
    ExcludedIp,
    KnownBotRange,
    /// Cached or freshly confirmed blocked ASN.
    BlockedAsn,
    ExcludedRoute,
    ExcludedMethod,
    /// User agent identified as a crawler.
    Crawler,
}

impl ExclusionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExclusionReason::Disabled => "disabled",
            ExclusionReason::ExcludedIp => "excluded-ip",
            ExclusionReason::KnownBotRange => "known-bot-range",
            ExclusionReason::BlockedAsn => "blocked-asn",
            ExclusionReason::ExcludedRoute => "excluded-route",
            ExclusionReason::ExcludedMethod => "excluded-method",
            ExclusionReason::Crawler => "crawler",
        }
    }
}

/// Admission decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Exclude(ExclusionReason),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit)
    }

    /// Tag for logs and diagnostics.
    pub fn tag(&self) -> String {
        match self {
            Decision::Admit => "server-analytics:admitted".to_string(),
            Decision::Exclude(reason) => format!("server-analytics:excluded:{}", reason.as_str()),
        }
    }
}

/// Decides which requests are recorded and builds their records.
///
/// Exclusions and hooks are registered through `&mut self` during startup;
/// afterwards the engine is shared (usually behind an `Arc`) and only read.
/// Hosts that enable deferred delivery call [`ServerAnalytics::flush`]
/// before shutting down.
pub struct ServerAnalytics {
    config: Arc<Config>,
    exclusions: ExclusionRules,
    classifier: ReputationClassifier,
    crawler: Box<dyn CrawlerDetector>,
    hooks: HookPipeline,
    sink: Arc<dyn AnalyticsSink>,
    pending: Mutex<JoinSet<()>>,
}

impl ServerAnalytics {
    /// Build the engine and its collaborators from configuration.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn BlockedIpStore> = match config.block_cache.path {
            Some(ref path) => Arc::new(FileBlockedIpStore::open(path)?),
            None => Arc::new(MemoryBlockedIpStore::new()),
        };

        let client: Option<Arc<dyn ReputationClient>> = match config.ipinfo {
            Some(ref ipinfo) if ipinfo.enabled => {
                info!("ipinfo lookups enabled");
                let client: Arc<dyn ReputationClient> = Arc::new(IpInfoClient::new(ipinfo.clone())?);
                Some(client)
            }
            _ => None,
        };

        let classifier = ReputationClassifier::new(
            client,
            AsnBlocklist::new(&config.blocked_asn_list),
            store,
            config.settings.fail_action,
        );

        Ok(Self::from_parts(
            config,
            classifier,
            Box::new(UserAgentCrawlerDetector::new()?),
            Arc::new(TracingSink),
        ))
    }

    /// Build the engine around explicit collaborators.
    pub fn from_parts(
        config: Config,
        classifier: ReputationClassifier,
        crawler: Box<dyn CrawlerDetector>,
        sink: Arc<dyn AnalyticsSink>,
    ) -> Self {
        let mut exclusions = ExclusionRules::new();
        exclusions.add_ip_exclusions(config.exclusions.ips.iter().cloned());
        exclusions.add_route_exclusions(&config.exclusions.routes);
        exclusions.add_method_exclusions(&config.exclusions.methods);

        info!(
            enabled = config.settings.enabled,
            ignore_bot_requests = config.settings.ignore_bot_requests,
            excluded_ips = exclusions.excluded_ips().len(),
            excluded_routes = config.exclusions.routes.len(),
            excluded_methods = exclusions.excluded_methods().len(),
            sink = sink.name(),
            "Server analytics initialized"
        );

        Self {
            config: Arc::new(config),
            exclusions,
            classifier,
            crawler,
            hooks: HookPipeline::new(),
            sink,
            pending: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_crawler_detector(mut self, crawler: Box<dyn CrawlerDetector>) -> Self {
        self.crawler = crawler;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn exclusions(&self) -> &ExclusionRules {
        &self.exclusions
    }

    pub fn hooks(&self) -> &HookPipeline {
        &self.hooks
    }

    pub fn classifier(&self) -> &ReputationClassifier {
        &self.classifier
    }

    pub fn add_ip_exclusions<I, S>(&mut self, ips: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions.add_ip_exclusions(ips);
    }

    pub fn add_route_exclusions<I, S>(&mut self, routes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclusions.add_route_exclusions(routes);
    }

    pub fn add_method_exclusions<I, S>(&mut self, methods: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclusions.add_method_exclusions(methods);
    }

    pub fn add_meta_hook<F>(&mut self, hook: F)
    where
        F: Fn(&RequestDetails) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.add_meta_hook(hook);
    }

    pub fn add_relation_hook<F>(&mut self, hook: F)
    where
        F: Fn(&RequestDetails) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.add_relation_hook(hook);
    }

    pub fn add_meta(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.hooks.add_meta(key, value);
    }

    pub fn add_relation(&mut self, entity: EntityRef, reason: Option<&str>) {
        self.hooks.add_relation(entity, reason);
    }

    /// Run the admission chain. Cheap local checks come first; the
    /// external lookup only runs when none of them excluded the request.
    pub async fn decide(&self, request: &InboundRequest) -> Decision {
        let decision = self.evaluate(request).await;

        match decision {
            Decision::Exclude(reason) if self.config.settings.log_excluded => {
                info!(
                    ip = %request.ip,
                    method = %request.method,
                    path = %request.path,
                    reason = reason.as_str(),
                    "Excluding request from analytics"
                );
            }
            Decision::Admit if self.config.settings.log_admitted => {
                debug!(ip = %request.ip, path = %request.path, "Admitting request");
            }
            _ => {}
        }

        decision
    }

    async fn evaluate(&self, request: &InboundRequest) -> Decision {
        if !self.config.settings.enabled {
            return Decision::Exclude(ExclusionReason::Disabled);
        }

        let ip = request.ip.as_str();

        if self.exclusions.is_excluded_ip(ip) {
            return Decision::Exclude(ExclusionReason::ExcludedIp);
        }

        if known_bots::is_known_bot_range(ip) {
            return Decision::Exclude(ExclusionReason::KnownBotRange);
        }

        if self.classifier.is_cached_block(ip).await || self.classifier.classify(ip).await {
            return Decision::Exclude(ExclusionReason::BlockedAsn);
        }

        if self.exclusions.is_excluded_route(request) {
            return Decision::Exclude(ExclusionReason::ExcludedRoute);
        }

        if self.exclusions.is_excluded_method(&request.method) {
            return Decision::Exclude(ExclusionReason::ExcludedMethod);
        }

        if self.config.settings.ignore_bot_requests {
            let user_agent = request.user_agent.as_deref().unwrap_or_default();
            if self.crawler.is_crawler(user_agent) {
                return Decision::Exclude(ExclusionReason::Crawler);
            }
        }

        Decision::Admit
    }

    /// Whether the request should be recorded.
    pub async fn should_track(&self, request: &InboundRequest) -> bool {
        self.decide(request).await.is_admitted()
    }

    /// Snapshot the request for hooks and sinks.
    pub fn request_details(&self, request: &InboundRequest) -> RequestDetails {
        RequestDetails::from_request(request, &self.config.request_details)
    }

    pub fn run_meta_hooks(&self, details: &RequestDetails) -> Vec<HookResult> {
        self.hooks.run_meta_hooks(details)
    }

    pub fn run_relation_hooks(&self, details: &RequestDetails) -> Vec<HookResult> {
        self.hooks.run_relation_hooks(details)
    }

    /// Run every hook over `details` and assemble the record.
    pub fn build_record(&self, details: RequestDetails) -> AnalyticsRecord {
        let meta = self.run_meta_hooks(&details);
        let relations = self.run_relation_hooks(&details);
        let user = details
            .user_id
            .as_ref()
            .map(|id| EntityRef::new(self.config.settings.user_model.clone(), id.clone()));

        AnalyticsRecord {
            details,
            user,
            meta,
            relations,
        }
    }

    /// Build the record for an admitted request and hand it to the sink.
    ///
    /// Sink failures are logged, never returned: recording must not affect
    /// the response.
    pub async fn record(&self, details: RequestDetails) {
        let record = self.build_record(details);

        match self.config.settings.queue_connection {
            Some(ref queue) => {
                debug!(queue = %queue, "Deferring analytics record");
                let sink = self.sink.clone();
                let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                // Reap finished deliveries so the set only holds in-flight ones
                while pending.try_join_next().is_some() {}
                pending.spawn(async move {
                    deliver(sink.as_ref(), &record).await;
                });
            }
            None => deliver(self.sink.as_ref(), &record).await,
        }
    }

    /// Number of deferred deliveries not yet reaped.
    pub fn pending_deliveries(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait for every deferred delivery started so far.
    pub async fn flush(&self) {
        let mut pending = {
            let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };

        if pending.is_empty() {
            return;
        }

        debug!(pending = pending.len(), "Flushing deferred analytics records");
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Deferred analytics delivery did not complete");
            }
        }
    }

    /// Decide and, when admitted, record the request.
    ///
    /// `response` carries the status code and handling time in
    /// milliseconds when the host has them.
    pub async fn track(&self, request: &InboundRequest, response: Option<(u16, u64)>) -> Decision {
        let decision = self.decide(request).await;

        if decision.is_admitted() {
            let mut details = self.request_details(request);
            if let Some((status, duration_ms)) = response {
                details = details.with_response(status, duration_ms);
            }
            self.record(details).await;
        }

        decision
    }
}

async fn deliver(sink: &dyn AnalyticsSink, record: &AnalyticsRecord) {
    if let Err(e) = sink.record(record).await {
        warn!(
            sink = sink.name(),
            ip = %record.details.ip,
            error = %e,
            "Failed to record request"
        );
    }
}
