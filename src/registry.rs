use crate::metrics::ZONE_ACTIVE;
use crate::types::{Zone, ZoneType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct ZoneEntry {
    pub zone: Zone,
    active: AtomicBool,
}

impl ZoneEntry {
    pub fn is_active(&self) -> bool { self.active.load(Ordering::Acquire) }
}

/// Owns every configured zone and its active flag. Readers take snapshots;
/// writers only ever go through `enable`/`disable`.
pub struct ZoneRegistry {
    entries: Vec<Arc<ZoneEntry>>,
    index: HashMap<String, usize>,
}

impl ZoneRegistry {
    pub fn new(zones: Vec<Zone>, initially_active: bool) -> Self {
        let mut entries = Vec::with_capacity(zones.len());
        let mut index = HashMap::new();
        for zone in zones {
            if index.contains_key(&zone.name) {
                tracing::warn!("Zone '{}' configured twice, keeping the first definition", zone.name);
                continue;
            }
            ZONE_ACTIVE.with_label_values(&[&zone.name]).set(if initially_active { 1.0 } else { 0.0 });
            index.insert(zone.name.clone(), entries.len());
            entries.push(Arc::new(ZoneEntry { zone, active: AtomicBool::new(initially_active) }));
        }
        Self { entries, index }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ZoneEntry>> {
        self.index.get(name).map(|&i| self.entries[i].clone())
    }

    pub fn contains(&self, name: &str) -> bool { self.index.contains_key(name) }

    pub fn is_active(&self, name: &str) -> bool {
        self.get(name).map(|e| e.is_active()).unwrap_or(false)
    }

    /// Returns true only when the zone went from inactive to active.
    pub fn enable(&self, name: &str) -> bool {
        let Some(entry) = self.get(name) else { return false };
        if entry.active.swap(true, Ordering::AcqRel) {
            tracing::debug!("{} zone '{}' already enabled", entry.zone.zone_type, name);
            return false;
        }
        tracing::info!("enabling {} zone '{}'", entry.zone.zone_type, name);
        ZONE_ACTIVE.with_label_values(&[name]).set(1.0);
        true
    }

    /// Returns true only when the zone went from active to inactive.
    pub fn disable(&self, name: &str, reason: &str) -> bool {
        let Some(entry) = self.get(name) else { return false };
        if !entry.active.swap(false, Ordering::AcqRel) { return false; }
        tracing::warn!("disabling {} zone '{}' {}", entry.zone.zone_type, name, reason);
        ZONE_ACTIVE.with_label_values(&[name]).set(0.0);
        true
    }

    /// Active zone names in configuration order.
    pub fn active_zones(&self) -> Vec<String> {
        self.entries.iter().filter(|e| e.is_active()).map(|e| e.zone.name.clone()).collect()
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.entries.iter().map(|e| &e.zone)
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Unknown zones are treated as block lists.
    pub fn zone_type(&self, name: &str) -> ZoneType {
        self.get(name).map(|e| e.zone.zone_type).unwrap_or_default()
    }

    pub fn zone_reject(&self, name: &str) -> bool {
        self.get(name).map(|e| e.zone.reject).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(active: bool) -> ZoneRegistry {
        ZoneRegistry::new(
            vec![
                Zone::new("reg-a.example"),
                Zone::new("reg-b.example").with_type(ZoneType::Allow),
                Zone::new("reg-c.example").with_type(ZoneType::Karma),
            ],
            active,
        )
    }

    #[test]
    fn test_enable_disable_idempotent() {
        let reg = registry(false);
        assert!(reg.active_zones().is_empty());
        assert!(reg.enable("reg-a.example"));
        assert!(!reg.enable("reg-a.example"));
        assert!(reg.is_active("reg-a.example"));

        assert!(reg.disable("reg-a.example", "timeout"));
        assert!(!reg.disable("reg-a.example", "timeout"));
        assert!(!reg.is_active("reg-a.example"));
    }

    #[test]
    fn test_unknown_zone() {
        let reg = registry(true);
        assert!(!reg.enable("nope.example"));
        assert!(!reg.disable("nope.example", ""));
        assert!(!reg.is_active("nope.example"));
        assert_eq!(reg.zone_type("nope.example"), ZoneType::Block);
        assert!(reg.zone_reject("nope.example"));
    }

    #[test]
    fn test_snapshot_keeps_config_order() {
        let reg = registry(true);
        reg.disable("reg-b.example", "test");
        assert_eq!(reg.active_zones(), vec!["reg-a.example".to_string(), "reg-c.example".to_string()]);
        assert_eq!(reg.zone_type("reg-c.example"), ZoneType::Karma);
    }

    #[test]
    fn test_duplicate_zone_ignored() {
        let reg = ZoneRegistry::new(vec![Zone::new("dup.example"), Zone::new("dup.example").with_type(ZoneType::Allow)], true);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.zone_type("dup.example"), ZoneType::Block);
    }
}
