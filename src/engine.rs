use crate::codec::build_query_addr;
use crate::metrics::MetricsSink;
use crate::registry::ZoneRegistry;
use crate::resolver::{LookupResult, Resolver};
use crate::types::{QueryOutcome, Verdict, Zone, ZoneType};
use crate::validator::{validate, Validation};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

const KARMA_GOOD: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
const KARMA_BAD: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

/// Queries one zone for one address and classifies the answer.
pub struct ReputationQueryEngine {
    registry: Arc<ZoneRegistry>,
    resolver: Arc<dyn Resolver>,
    metrics: Arc<dyn MetricsSink>,
    timeout: Duration,
}

impl ReputationQueryEngine {
    pub fn new(registry: Arc<ZoneRegistry>, resolver: Arc<dyn Resolver>, metrics: Arc<dyn MetricsSink>, timeout: Duration) -> Self {
        Self { registry, resolver, metrics, timeout }
    }

    pub fn registry(&self) -> &Arc<ZoneRegistry> { &self.registry }

    pub fn resolver(&self) -> &Arc<dyn Resolver> { &self.resolver }

    pub fn timeout(&self) -> Duration { self.timeout }

    pub async fn evaluate(&self, ip: IpAddr, zone_name: &str) -> QueryOutcome {
        let Some(entry) = self.registry.get(zone_name) else {
            return QueryOutcome::skip(zone_name, ZoneType::Block);
        };
        let zone = &entry.zone;
        if !entry.is_active() {
            tracing::debug!("Zone '{}' inactive, skipping {}", zone_name, ip);
            return QueryOutcome::skip(zone_name, zone.zone_type);
        }

        match self.lookup(ip, zone_name).await {
            Lookup::Listed(answers) => classify(zone, answers),
            Lookup::NotListed => QueryOutcome::not_listed(zone_name, zone.zone_type),
            Lookup::Unusable => QueryOutcome::skip(zone_name, zone.zone_type),
        }
    }

    /// Resolves and validates without looking at the zone's active flag.
    /// Timeouts and poisoned answers still disable the zone.
    pub async fn lookup(&self, ip: IpAddr, zone_name: &str) -> Lookup {
        let query = build_query_addr(&ip, zone_name);
        let start = Instant::now();
        let result = self.resolver.resolve_a(&query, self.timeout).await;
        self.metrics.record(zone_name, result.kind(), start.elapsed());

        match result {
            LookupResult::NotFound => Lookup::NotListed,
            LookupResult::Timeout => {
                self.registry.disable(zone_name, "TIMEOUT");
                Lookup::Unusable
            }
            LookupResult::OtherError(e) => {
                tracing::error!("Lookup of '{}' failed: {}", query, e);
                Lookup::Unusable
            }
            LookupResult::Answers(answers) => {
                tracing::debug!("Lookup {} -> {:?}", query, answers);
                if let Validation::Poisoned(reason) = validate(zone_name, &answers) {
                    self.registry.disable(zone_name, &reason.to_string());
                    return Lookup::Unusable;
                }
                Lookup::Listed(answers)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Listed(Vec<Ipv4Addr>),
    NotListed,
    /// Timed out, failed, or answered with something we refuse to trust.
    Unusable,
}

fn classify(zone: &Zone, answers: Vec<Ipv4Addr>) -> QueryOutcome {
    let notes: Vec<&str> = answers.iter().filter_map(|a| zone.annotations.get(a)).map(String::as_str).collect();
    let annotation = if notes.is_empty() { None } else { Some(notes.join(", ")) };

    let verdict = match zone.zone_type {
        ZoneType::Allow => Verdict::Pass,
        ZoneType::Block => Verdict::Fail,
        ZoneType::Karma if answers.contains(&KARMA_GOOD) => Verdict::Pass,
        ZoneType::Karma if answers.contains(&KARMA_BAD) => Verdict::Fail,
        ZoneType::Karma => Verdict::Info,
    };

    QueryOutcome { zone: zone.name.clone(), zone_type: zone.zone_type, verdict, answers, annotation }
}
