//! RFC 5782 section 5 self-test of DNS lists.
//!
//! An IPv4 list MUST answer for 127.0.0.2 and MUST NOT answer for 127.0.0.1
//! (IPv6 lists: ::ffff:7f00:2 and ::ffff:7f00:1). Zones that fail either test
//! are disabled; zones that pass are (re-)enabled.

use crate::codec::build_query_addr;
use crate::registry::ZoneRegistry;
use crate::resolver::{LookupResult, Resolver};
use crate::types::Zone;
use crate::validator::{validate, Validation};
use futures::future::join_all;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

/// Periodic checks below this many minutes are not scheduled.
pub const MIN_PERIODIC_MINUTES: u64 = 5;

const LISTED_V4: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2));
const UNLISTED_V4: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
const LISTED_V6: IpAddr = IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0x7f00, 2));
const UNLISTED_V6: IpAddr = IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0x7f00, 1));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState { Untested, Probing, Enabled, Disabled }

enum Probe {
    Passed,
    Failed(String),
    Inconclusive(String),
}

pub struct HealthMonitor {
    registry: Arc<ZoneRegistry>,
    resolver: Arc<dyn Resolver>,
    timeout: Duration,
    states: Mutex<HashMap<String, ProbeState>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ZoneRegistry>, resolver: Arc<dyn Resolver>, timeout: Duration) -> Self {
        let states = registry.zones().map(|z| (z.name.clone(), ProbeState::Untested)).collect();
        Self { registry, resolver, timeout, states: Mutex::new(states) }
    }

    pub fn state(&self, zone: &str) -> Option<ProbeState> {
        self.states.lock().ok()?.get(zone).copied()
    }

    fn set_state(&self, zone: &str, state: ProbeState) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(zone.to_string(), state);
        }
    }

    /// Probes every configured zone concurrently, active or not.
    pub async fn check_zones(&self) {
        let zones: Vec<Zone> = self.registry.zones().cloned().collect();
        let results = join_all(zones.iter().map(|z| self.check_zone(z))).await;
        let enabled = results.iter().filter(|s| **s == ProbeState::Enabled).count();
        tracing::info!("[health] {} of {} zones passed the RFC 5782 tests", enabled, zones.len());
    }

    pub async fn check_zone(&self, zone: &Zone) -> ProbeState {
        self.set_state(&zone.name, ProbeState::Probing);

        let verdict = match self.positive(zone, LISTED_V4).await {
            Err(reason) => Probe::Failed(reason),
            Ok(()) if zone.loopback_is_rejected => Probe::Passed,
            Ok(()) => self.negative(zone, UNLISTED_V4).await,
        };

        match verdict {
            Probe::Passed => {}
            Probe::Failed(reason) => {
                self.registry.disable(&zone.name, &reason);
                self.set_state(&zone.name, ProbeState::Disabled);
                return ProbeState::Disabled;
            }
            // Transient resolver trouble: leave the zone as it was.
            Probe::Inconclusive(reason) => {
                tracing::warn!("[health] test of '{}' inconclusive: {}", zone.name, reason);
                let state = if self.registry.is_active(&zone.name) { ProbeState::Enabled } else { ProbeState::Disabled };
                self.set_state(&zone.name, state);
                return state;
            }
        }

        self.registry.enable(&zone.name);
        self.set_state(&zone.name, ProbeState::Enabled);

        // IPv6 results are informational; the IPv4 tests already decided.
        if zone.ipv6 {
            if let Err(reason) = self.positive(zone, LISTED_V6).await {
                tracing::warn!("[health] IPv6 positive test for '{}' failed: {}", zone.name, reason);
            }
            if !zone.loopback_is_rejected {
                match self.negative(zone, UNLISTED_V6).await {
                    Probe::Passed => {}
                    Probe::Failed(reason) | Probe::Inconclusive(reason) => {
                        tracing::warn!("[health] IPv6 negative test for '{}' failed: {}", zone.name, reason);
                    }
                }
            }
        }

        ProbeState::Enabled
    }

    async fn positive(&self, zone: &Zone, ip: IpAddr) -> Result<(), String> {
        let query = build_query_addr(&ip, &zone.name);
        match self.resolver.resolve_a(&query, self.timeout).await {
            LookupResult::Answers(answers) => match validate(&zone.name, &answers) {
                Validation::Clean => {
                    tracing::debug!("[health] {} -> {:?}", query, answers);
                    Ok(())
                }
                Validation::Poisoned(reason) => Err(format!("{} -> {}", query, reason)),
            },
            LookupResult::NotFound => Err(format!("{} no response", query)),
            LookupResult::Timeout => Err(format!("{} TIMEOUT", query)),
            LookupResult::OtherError(e) => Err(format!("{} -> {}", query, e)),
        }
    }

    async fn negative(&self, zone: &Zone, ip: IpAddr) -> Probe {
        let query = build_query_addr(&ip, &zone.name);
        match self.resolver.resolve_a(&query, self.timeout).await {
            LookupResult::NotFound => Probe::Passed,
            LookupResult::Answers(answers) => Probe::Failed(format!("{} -> {:?} (must not be listed)", query, answers)),
            LookupResult::Timeout => Probe::Failed(format!("{} TIMEOUT", query)),
            LookupResult::OtherError(e) => Probe::Inconclusive(format!("{} -> {}", query, e)),
        }
    }

    /// Re-probes all zones every `every`, starting one interval from now.
    pub fn spawn_periodic(self: &Arc<Self>, every: Duration) -> HealthHandle {
        let monitor = self.clone();
        tracing::info!("[health] will re-test list zones every {:?}", every);
        let handle = tokio::spawn(async move {
            loop {
                sleep(every).await;
                monitor.check_zones().await;
            }
        });
        HealthHandle { handle }
    }

    /// Startup schedule keyed by `periodic_checks` minutes: 0 never probes,
    /// short intervals probe once, longer ones keep re-probing.
    pub async fn start(self: &Arc<Self>, periodic_minutes: u64) -> Option<HealthHandle> {
        if periodic_minutes == 0 { return None; }
        self.check_zones().await;
        if periodic_minutes < MIN_PERIODIC_MINUTES { return None; }
        Some(self.spawn_periodic(Duration::from_secs(periodic_minutes * 60)))
    }
}

/// Zones start active unless the periodic probe is going to populate them.
pub fn zones_start_active(periodic_minutes: u64) -> bool {
    periodic_minutes < MIN_PERIODIC_MINUTES
}

pub struct HealthHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl HealthHandle {
    pub fn stop(&self) { self.handle.abort(); }

    pub fn is_running(&self) -> bool { !self.handle.is_finished() }
}

impl Drop for HealthHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
