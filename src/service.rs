use crate::aggregator::DecisionAggregator;
use crate::backscatter::BackscatterCheck;
use crate::config::Config;
use crate::engine::ReputationQueryEngine;
use crate::health::{zones_start_active, HealthHandle, HealthMonitor};
use crate::metrics::{MetricsSink, NoopSink, PrometheusSink};
use crate::registry::ZoneRegistry;
use crate::resolver::{Resolver, UdpResolver};
use crate::types::{Decision, DecisionCode, Peer, SearchMode};
use std::sync::Arc;

/// Everything one configuration generation needs, wired together.
pub struct DnsList {
    pub config: Config,
    pub registry: Arc<ZoneRegistry>,
    pub engine: Arc<ReputationQueryEngine>,
    pub aggregator: DecisionAggregator,
    pub health: Arc<HealthMonitor>,
    pub backscatter: Option<BackscatterCheck>,
}

impl DnsList {
    pub fn new(config: Config, resolver: Arc<dyn Resolver>, metrics: Arc<dyn MetricsSink>) -> Self {
        let registry = Arc::new(ZoneRegistry::new(config.zones.clone(), zones_start_active(config.main.periodic_checks)));
        let engine = Arc::new(ReputationQueryEngine::new(registry.clone(), resolver.clone(), metrics, config.main.timeout));
        let health = Arc::new(HealthMonitor::new(registry.clone(), resolver, config.main.timeout));
        let backscatter = config.backscatterer.then(BackscatterCheck::default);
        Self {
            aggregator: DecisionAggregator::new(engine.clone()),
            config,
            registry,
            engine,
            health,
            backscatter,
        }
    }

    pub fn from_config(config: Config) -> Self {
        let resolver = Arc::new(UdpResolver::new(config.main.nameservers.clone(), config.main.tries));
        tracing::info!("Using nameservers {:?}", resolver.nameservers());
        let metrics: Arc<dyn MetricsSink> = if config.stats.enable { Arc::new(PrometheusSink) } else { Arc::new(NoopSink) };
        Self::new(config, resolver, metrics)
    }

    /// Startup probe plus the periodic schedule, if one is configured.
    pub async fn start_health(&self) -> Option<HealthHandle> {
        self.health.start(self.config.main.periodic_checks).await
    }

    /// Startup probe only.
    pub async fn probe_once(&self) {
        if self.config.main.periodic_checks > 0 {
            self.health.check_zones().await;
        }
    }

    pub async fn decide(&self, peer: &Peer) -> Decision {
        self.aggregator.decide(peer, self.config.main.search).await
    }

    pub async fn decide_in(&self, peer: &Peer, mode: SearchMode) -> Decision {
        self.aggregator.decide(peer, mode).await
    }

    /// Drops a Deny when every matched zone is configured `reject false`.
    pub fn enforce(&self, decision: Decision) -> Decision {
        if decision.code != DecisionCode::Deny {
            return decision;
        }
        if decision.matched_zones.iter().any(|z| self.registry.zone_reject(z)) {
            return decision;
        }
        tracing::info!("[dnslist] not rejecting (reject false): {}", decision.message.as_deref().unwrap_or_default());
        Decision::undetermined()
    }

    /// An allow-list hit skips the HELO checks only with `ok_helo`.
    pub fn skips_helo_checks(&self, decision: &Decision) -> bool {
        decision.bypasses_later_checks() && self.config.dnswl.ok_helo
    }

    /// An allow-list hit skips the MAIL FROM checks only with `ok_mail`.
    pub fn skips_mail_checks(&self, decision: &Decision) -> bool {
        decision.bypasses_later_checks() && self.config.dnswl.ok_mail
    }

    /// MAIL FROM stage: the backscatter check, when enabled.
    pub async fn check_sender(&self, peer: &Peer, sender: &str) -> Decision {
        match &self.backscatter {
            Some(check) => check.check(&self.engine, peer, sender).await,
            None => Decision::undetermined(),
        }
    }
}
