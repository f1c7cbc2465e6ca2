//! Basic types for dnslist

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::error::DnsListError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZoneType {
    #[default]
    Block,
    Allow,
    Karma,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self { ZoneType::Block => "block", ZoneType::Allow => "allow", ZoneType::Karma => "karma" }
    }
}

impl FromStr for ZoneType {
    type Err = DnsListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" => Ok(ZoneType::Block),
            "allow" => Ok(ZoneType::Allow),
            "karma" => Ok(ZoneType::Karma),
            other => Err(DnsListError::Config(format!("unknown zone type '{}'", other))),
        }
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    First,
    All,
}

impl FromStr for SearchMode {
    type Err = DnsListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first" => Ok(SearchMode::First),
            "all" => Ok(SearchMode::All),
            other => Err(DnsListError::Config(format!("unknown search mode '{}'", other))),
        }
    }
}

/// Static configuration of one DNS list. The active flag lives in the registry.
#[derive(Debug, Clone)]
pub struct Zone {
    pub name: String,
    pub zone_type: ZoneType,
    pub reject: bool,
    pub ipv6: bool,
    pub loopback_is_rejected: bool,
    pub annotations: HashMap<Ipv4Addr, String>,
}

impl Zone {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            zone_type: ZoneType::Block,
            reject: true,
            ipv6: false,
            loopback_is_rejected: false,
            annotations: HashMap::new(),
        }
    }

    pub fn with_type(mut self, zone_type: ZoneType) -> Self {
        self.zone_type = zone_type;
        self
    }

    pub fn with_annotation(mut self, answer: Ipv4Addr, note: impl Into<String>) -> Self {
        self.annotations.insert(answer, note.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict { Pass, Fail, Info, Skip }

/// Result of querying one zone for one address.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub zone: String,
    pub zone_type: ZoneType,
    pub verdict: Verdict,
    pub answers: Vec<Ipv4Addr>,
    pub annotation: Option<String>,
}

impl QueryOutcome {
    pub fn skip(zone: &str, zone_type: ZoneType) -> Self {
        Self { zone: zone.to_string(), zone_type, verdict: Verdict::Skip, answers: Vec::new(), annotation: None }
    }

    pub fn not_listed(zone: &str, zone_type: ZoneType) -> Self {
        Self { verdict: Verdict::Info, ..Self::skip(zone, zone_type) }
    }

    /// A pass from an allow list, the only kind of pass that produces an `Allow` decision.
    pub fn is_allow_hit(&self) -> bool {
        self.verdict == Verdict::Pass && self.zone_type == ZoneType::Allow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionCode { Allow, Deny, Undetermined }

impl DecisionCode {
    pub fn as_str(&self) -> &'static str {
        match self { DecisionCode::Allow => "allow", DecisionCode::Deny => "deny", DecisionCode::Undetermined => "undetermined" }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub code: DecisionCode,
    pub matched_zones: Vec<String>,
    pub message: Option<String>,
}

impl Decision {
    pub fn undetermined() -> Self {
        Self { code: DecisionCode::Undetermined, matched_zones: Vec::new(), message: None }
    }

    pub fn listed(code: DecisionCode, ip: IpAddr, zones: Vec<String>) -> Self {
        let message = format!("host [{}] is listed on {}", ip, zones.join(", "));
        Self { code, matched_zones: zones, message: Some(message) }
    }

    /// Allow-listed peers skip the later HELO/MAIL reputation checks.
    pub fn bypasses_later_checks(&self) -> bool {
        self.code == DecisionCode::Allow
    }
}

/// The remote end of a connection. `private` is normally derived from the
/// address but a host that knows better (e.g. trusted relays) may override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub ip: IpAddr,
    pub private: bool,
}

impl Peer {
    pub fn new(ip: IpAddr) -> Self {
        Self { ip, private: is_private_ip(&ip) }
    }

    pub fn with_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }
}

impl From<IpAddr> for Peer {
    fn from(ip: IpAddr) -> Self { Peer::new(ip) }
}

pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || (o[0] == 100 && (o[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback() || v6.is_unspecified() || (first & 0xFE00) == 0xFC00 || (first & 0xFFC0) == 0xFE80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ranges() {
        for ip in ["10.1.2.3", "172.16.0.1", "192.168.1.1", "127.0.0.1", "169.254.1.1", "100.64.0.1", "::1", "fd00::1", "fe80::1", "::ffff:192.168.0.1"] {
            assert!(is_private_ip(&ip.parse().unwrap()), "{} should be private", ip);
        }
        for ip in ["8.8.8.8", "100.128.0.1", "2001:db8::1", "::ffff:8.8.8.8"] {
            assert!(!is_private_ip(&ip.parse().unwrap()), "{} should be public", ip);
        }
    }

    #[test]
    fn test_listed_message() {
        let d = Decision::listed(DecisionCode::Deny, "127.0.0.2".parse().unwrap(), vec!["a.example".into(), "b.example".into()]);
        assert_eq!(d.message.as_deref(), Some("host [127.0.0.2] is listed on a.example, b.example"));
        assert!(!d.bypasses_later_checks());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("Allow".parse::<ZoneType>().unwrap(), ZoneType::Allow);
        assert!("grey".parse::<ZoneType>().is_err());
        assert_eq!("all".parse::<SearchMode>().unwrap(), SearchMode::All);
    }
}
