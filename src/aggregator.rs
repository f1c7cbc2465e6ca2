use crate::engine::ReputationQueryEngine;
use crate::metrics::DECISIONS_TOTAL;
use crate::types::{Decision, DecisionCode, Peer, QueryOutcome, SearchMode, Verdict, ZoneType};
use futures::future::join_all;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Write-once slot for the connection's decision. The first `finalize` wins,
/// every later call is a no-op that returns false.
pub struct DecisionLatch {
    tx: Mutex<Option<oneshot::Sender<Decision>>>,
}

impl DecisionLatch {
    pub fn open() -> (Arc<Self>, oneshot::Receiver<Decision>) {
        let (tx, rx) = oneshot::channel();
        (Arc::new(Self { tx: Mutex::new(Some(tx)) }), rx)
    }

    pub fn finalize(&self, decision: Decision) -> bool {
        let tx = match self.tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match tx {
            Some(tx) => {
                // The receiver may already be gone; the latch is closed either way.
                let _ = tx.send(decision);
                true
            }
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().map(|slot| slot.is_none()).unwrap_or(true)
    }
}

/// Fans one peer out to every active zone and folds the per-zone outcomes
/// into exactly one decision.
pub struct DecisionAggregator {
    engine: Arc<ReputationQueryEngine>,
}

impl DecisionAggregator {
    pub fn new(engine: Arc<ReputationQueryEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ReputationQueryEngine> { &self.engine }

    pub async fn decide(&self, peer: &Peer, mode: SearchMode) -> Decision {
        let zones = self.engine.registry().active_zones();
        self.decide_with(peer, zones, mode).await
    }

    pub async fn decide_with(&self, peer: &Peer, zones: Vec<String>, mode: SearchMode) -> Decision {
        if peer.private {
            tracing::info!("[dnslist] skip: private {}", peer.ip);
            return record(Decision::undetermined());
        }
        if zones.is_empty() {
            tracing::info!("[dnslist] skip: no zones for {}", peer.ip);
            return record(Decision::undetermined());
        }

        let ip = peer.ip;
        let (latch, rx) = DecisionLatch::open();

        let tasks: Vec<_> = zones
            .iter()
            .cloned()
            .map(|zone| {
                let engine = self.engine.clone();
                let latch = latch.clone();
                tokio::spawn(async move {
                    let outcome = engine.evaluate(ip, &zone).await;
                    if let Some(note) = &outcome.annotation {
                        tracing::info!("[dnslist] {} on {}: {}", ip, zone, note);
                    }
                    if mode == SearchMode::First {
                        if outcome.verdict == Verdict::Fail {
                            latch.finalize(Decision::listed(DecisionCode::Deny, ip, vec![zone]));
                        } else if outcome.is_allow_hit() {
                            latch.finalize(Decision::listed(DecisionCode::Allow, ip, vec![zone]));
                        }
                    }
                    outcome
                })
            })
            .collect();

        // Stragglers keep running after an early decision; only their results are dropped.
        tokio::spawn(async move {
            let outcomes: Vec<QueryOutcome> = join_all(tasks)
                .await
                .into_iter()
                .zip(zones.iter())
                .map(|(joined, zone)| {
                    joined.unwrap_or_else(|e| {
                        tracing::error!("[dnslist] evaluation of {} on {} aborted: {}", ip, zone, e);
                        QueryOutcome::skip(zone, ZoneType::Block)
                    })
                })
                .collect();
            latch.finalize(fold(ip, &outcomes));
        });

        record(rx.await.unwrap_or_else(|_| Decision::undetermined()))
    }
}

/// Exhaustive fold: any failure denies, else any allow-list hit allows.
pub fn fold(ip: IpAddr, outcomes: &[QueryOutcome]) -> Decision {
    let failed: Vec<String> = outcomes.iter().filter(|o| o.verdict == Verdict::Fail).map(|o| o.zone.clone()).collect();
    if !failed.is_empty() {
        return Decision::listed(DecisionCode::Deny, ip, failed);
    }

    let allowed: Vec<String> = outcomes.iter().filter(|o| o.is_allow_hit()).map(|o| o.zone.clone()).collect();
    if !allowed.is_empty() {
        return Decision::listed(DecisionCode::Allow, ip, allowed);
    }

    Decision::undetermined()
}

fn record(decision: Decision) -> Decision {
    DECISIONS_TOTAL.with_label_values(&[decision.code.as_str()]).inc();
    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(zone: &str, zone_type: ZoneType, verdict: Verdict) -> QueryOutcome {
        QueryOutcome { zone: zone.into(), zone_type, verdict, answers: Vec::new(), annotation: None }
    }

    #[tokio::test]
    async fn test_latch_finalizes_once() {
        let (latch, rx) = DecisionLatch::open();
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let latch = latch.clone();
                tokio::spawn(async move {
                    let ip: IpAddr = "192.0.2.1".parse().unwrap();
                    latch.finalize(Decision::listed(DecisionCode::Deny, ip, vec![format!("z{}.example", i)]))
                })
            })
            .collect();
        let wins = join_all(handles).await.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(wins, 1);
        assert!(latch.is_closed());
        assert_eq!(rx.await.unwrap().code, DecisionCode::Deny);
    }

    #[test]
    fn test_fold_deny_beats_allow() {
        let ip: IpAddr = "192.0.2.7".parse().unwrap();
        let outcomes = vec![
            outcome("list.dnswl.org", ZoneType::Allow, Verdict::Pass),
            outcome("bl.example", ZoneType::Block, Verdict::Fail),
            outcome("karma.example", ZoneType::Karma, Verdict::Fail),
        ];
        let d = fold(ip, &outcomes);
        assert_eq!(d.code, DecisionCode::Deny);
        assert_eq!(d.matched_zones, vec!["bl.example".to_string(), "karma.example".to_string()]);
        assert_eq!(d.message.as_deref(), Some("host [192.0.2.7] is listed on bl.example, karma.example"));
    }

    #[test]
    fn test_fold_allow_and_undetermined() {
        let ip: IpAddr = "192.0.2.7".parse().unwrap();
        let allow = fold(ip, &[outcome("list.dnswl.org", ZoneType::Allow, Verdict::Pass), outcome("bl.example", ZoneType::Block, Verdict::Info)]);
        assert_eq!(allow.code, DecisionCode::Allow);
        assert!(allow.bypasses_later_checks());

        let karma_pass = fold(ip, &[outcome("karma.example", ZoneType::Karma, Verdict::Pass)]);
        assert_eq!(karma_pass, Decision::undetermined());
        assert!(karma_pass.message.is_none());
    }
}
