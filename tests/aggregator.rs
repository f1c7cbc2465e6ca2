mod common;

use common::{harness, ip, listed};
use dnslist_rust::types::is_private_ip;
use dnslist_rust::{DecisionAggregator, DecisionCode, LookupResult, Peer, SearchMode, Zone, ZoneType};
use std::time::{Duration, Instant};

fn public(s: &str) -> Peer {
    Peer::new(ip(s)).with_private(false)
}

#[tokio::test]
async fn test_first_mode_denies_on_first_listing() {
    let h = harness(vec![Zone::new("xbl.spamhaus.org"), Zone::new("bl.spamcop.net")], true);
    for zone in ["xbl.spamhaus.org", "bl.spamcop.net"] {
        h.resolver.set("127.0.0.2", zone, listed(&["127.0.0.2"]));
    }
    let agg = DecisionAggregator::new(h.engine.clone());

    let d = agg.decide(&public("127.0.0.2"), SearchMode::First).await;
    assert_eq!(d.code, DecisionCode::Deny);
    assert_eq!(d.matched_zones.len(), 1);
    let message = d.message.unwrap();
    assert!(
        message == "host [127.0.0.2] is listed on xbl.spamhaus.org"
            || message == "host [127.0.0.2] is listed on bl.spamcop.net",
        "unexpected message: {}",
        message
    );
}

#[tokio::test]
async fn test_first_mode_returns_before_stragglers() {
    let h = harness(vec![Zone::new("slow.example.org"), Zone::new("fast.example.org")], true);
    h.resolver.set("192.0.2.1", "slow.example.org", listed(&["127.0.0.2"]));
    h.resolver.delay("192.0.2.1", "slow.example.org", Duration::from_millis(500));
    h.resolver.set("192.0.2.1", "fast.example.org", listed(&["127.0.0.3"]));
    let agg = DecisionAggregator::new(h.engine.clone());

    let started = Instant::now();
    let d = agg.decide(&Peer::new(ip("192.0.2.1")), SearchMode::First).await;
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(d.code, DecisionCode::Deny);
    assert_eq!(d.matched_zones, vec!["fast.example.org".to_string()]);

    // The straggler still completes and records its lookup, but the decision stands.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(h.sink.records.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_first_mode_allow_hit() {
    let h = harness(
        vec![Zone::new("list.dnswl.org").with_type(ZoneType::Allow), Zone::new("bl.spamcop.net")],
        true,
    );
    h.resolver.set("192.0.2.2", "list.dnswl.org", listed(&["127.0.10.0"]));
    let agg = DecisionAggregator::new(h.engine.clone());

    let d = agg.decide(&Peer::new(ip("192.0.2.2")), SearchMode::First).await;
    assert_eq!(d.code, DecisionCode::Allow);
    assert!(d.bypasses_later_checks());
    assert_eq!(d.message.as_deref(), Some("host [192.0.2.2] is listed on list.dnswl.org"));
}

#[tokio::test]
async fn test_all_mode_lists_every_failing_zone() {
    let h = harness(
        vec![
            Zone::new("a.example.org"),
            Zone::new("list.dnswl.org").with_type(ZoneType::Allow),
            Zone::new("b.example.org"),
            Zone::new("c.example.org"),
        ],
        true,
    );
    h.resolver.set("192.0.2.3", "a.example.org", listed(&["127.0.0.2"]));
    h.resolver.delay("192.0.2.3", "a.example.org", Duration::from_millis(50));
    h.resolver.set("192.0.2.3", "list.dnswl.org", listed(&["127.0.10.0"]));
    h.resolver.set("192.0.2.3", "c.example.org", listed(&["127.0.0.4"]));
    let agg = DecisionAggregator::new(h.engine.clone());

    let d = agg.decide(&Peer::new(ip("192.0.2.3")), SearchMode::All).await;
    assert_eq!(d.code, DecisionCode::Deny);
    assert_eq!(d.matched_zones, vec!["a.example.org".to_string(), "c.example.org".to_string()]);
    assert_eq!(d.message.as_deref(), Some("host [192.0.2.3] is listed on a.example.org, c.example.org"));
    assert_eq!(h.resolver.call_count(), 4);
}

#[tokio::test]
async fn test_all_mode_allow_without_failures() {
    let h = harness(vec![Zone::new("list.dnswl.org").with_type(ZoneType::Allow), Zone::new("b.example.org")], true);
    h.resolver.set("192.0.2.4", "list.dnswl.org", listed(&["127.0.10.0"]));
    let agg = DecisionAggregator::new(h.engine.clone());

    let d = agg.decide(&Peer::new(ip("192.0.2.4")), SearchMode::All).await;
    assert_eq!(d.code, DecisionCode::Allow);
    assert_eq!(d.matched_zones, vec!["list.dnswl.org".to_string()]);
}

#[tokio::test]
async fn test_clean_address_is_undetermined() {
    let h = harness(vec![Zone::new("a.example.org"), Zone::new("b.example.org")], true);
    h.resolver.set("192.0.2.5", "b.example.org", LookupResult::OtherError("REFUSED".into()));
    let agg = DecisionAggregator::new(h.engine.clone());

    for mode in [SearchMode::First, SearchMode::All] {
        let d = agg.decide(&Peer::new(ip("192.0.2.5")), mode).await;
        assert_eq!(d.code, DecisionCode::Undetermined);
        assert!(d.message.is_none());
        assert!(d.matched_zones.is_empty());
    }
}

#[tokio::test]
async fn test_private_peer_is_never_queried() {
    let h = harness(vec![Zone::new("bl.spamcop.net")], true);
    let agg = DecisionAggregator::new(h.engine.clone());

    for addr in ["10.1.2.3", "192.168.0.1", "127.0.0.2", "fe80::1", "fd00::1"] {
        assert!(is_private_ip(&ip(addr)), "{} should be private", addr);
        let d = agg.decide(&Peer::new(ip(addr)), SearchMode::First).await;
        assert_eq!(d.code, DecisionCode::Undetermined);
    }
    assert_eq!(h.resolver.call_count(), 0);
}

#[tokio::test]
async fn test_no_active_zones() {
    let h = harness(vec![Zone::new("bl.spamcop.net")], false);
    let agg = DecisionAggregator::new(h.engine.clone());

    let d = agg.decide(&Peer::new(ip("192.0.2.6")), SearchMode::All).await;
    assert_eq!(d.code, DecisionCode::Undetermined);
    assert_eq!(h.resolver.call_count(), 0);

    let d = agg.decide_with(&Peer::new(ip("192.0.2.6")), Vec::new(), SearchMode::First).await;
    assert_eq!(d.code, DecisionCode::Undetermined);
}

#[tokio::test]
async fn test_zone_disabled_mid_decision_does_not_fail() {
    let h = harness(vec![Zone::new("broken.example.org"), Zone::new("b.example.org")], true);
    h.resolver.set("192.0.2.7", "broken.example.org", listed(&["10.0.0.1"]));
    let agg = DecisionAggregator::new(h.engine.clone());

    let d = agg.decide(&Peer::new(ip("192.0.2.7")), SearchMode::All).await;
    assert_eq!(d.code, DecisionCode::Undetermined);
    assert_eq!(h.registry.active_zones(), vec!["b.example.org".to_string()]);
}
