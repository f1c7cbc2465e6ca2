#![allow(dead_code)]

use async_trait::async_trait;
use dnslist_rust::codec::build_query_addr;
use dnslist_rust::metrics::MetricsSink;
use dnslist_rust::{LookupResult, ReputationQueryEngine, Resolver, Zone, ZoneRegistry};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory resolver: scripted answers per query name, NotFound otherwise.
#[derive(Default)]
pub struct ScriptedResolver {
    answers: Mutex<HashMap<String, LookupResult>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, ip: &str, zone: &str, result: LookupResult) {
        self.answers.lock().unwrap().insert(qname(ip, zone), result);
    }

    pub fn delay(&self, ip: &str, zone: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(qname(ip, zone), delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn was_queried(&self, ip: &str, zone: &str) -> bool {
        self.calls.lock().unwrap().contains(&qname(ip, zone))
    }
}

#[async_trait]
impl Resolver for ScriptedResolver {
    async fn resolve_a(&self, name: &str, _timeout: Duration) -> LookupResult {
        self.calls.lock().unwrap().push(name.to_string());
        let delay = self.delays.lock().unwrap().get(name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.answers.lock().unwrap().get(name).cloned().unwrap_or(LookupResult::NotFound)
    }
}

/// Records every `(zone, outcome)` pair it is handed.
#[derive(Default)]
pub struct RecordingSink {
    pub records: Mutex<Vec<(String, String)>>,
}

impl MetricsSink for RecordingSink {
    fn record(&self, zone: &str, outcome: &str, _elapsed: Duration) {
        self.records.lock().unwrap().push((zone.to_string(), outcome.to_string()));
    }
}

pub fn qname(ip: &str, zone: &str) -> String {
    let ip: IpAddr = ip.parse().unwrap();
    build_query_addr(&ip, zone)
}

pub fn listed(answers: &[&str]) -> LookupResult {
    LookupResult::Answers(answers.iter().map(|a| a.parse::<Ipv4Addr>().unwrap()).collect())
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub struct Harness {
    pub registry: Arc<ZoneRegistry>,
    pub resolver: Arc<ScriptedResolver>,
    pub sink: Arc<RecordingSink>,
    pub engine: Arc<ReputationQueryEngine>,
}

pub fn harness(zones: Vec<Zone>, active: bool) -> Harness {
    let registry = Arc::new(ZoneRegistry::new(zones, active));
    let resolver = ScriptedResolver::new();
    let sink = Arc::new(RecordingSink::default());
    let engine = Arc::new(ReputationQueryEngine::new(
        registry.clone(),
        resolver.clone(),
        sink.clone(),
        Duration::from_secs(1),
    ));
    Harness { registry, resolver, sink, engine }
}
