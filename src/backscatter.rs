use crate::engine::{Lookup, ReputationQueryEngine};
use crate::types::{Decision, DecisionCode, Peer};

pub const BACKSCATTERER_ZONE: &str = "ips.backscatterer.org";

/// Bounces and postmaster mail from hosts on ips.backscatterer.org are
/// refused; ordinary senders are never looked up.
pub struct BackscatterCheck {
    zone: String,
}

impl Default for BackscatterCheck {
    fn default() -> Self { Self { zone: BACKSCATTERER_ZONE.to_string() } }
}

impl BackscatterCheck {
    pub async fn check(&self, engine: &ReputationQueryEngine, peer: &Peer, sender: &str) -> Decision {
        if !applies_to(sender) || peer.private {
            return Decision::undetermined();
        }
        match engine.lookup(peer.ip, &self.zone).await {
            Lookup::Listed(_) => Decision {
                code: DecisionCode::Deny,
                matched_zones: vec![self.zone.clone()],
                message: Some(format!("host [{}] is listed by {}", peer.ip, self.zone)),
            },
            Lookup::NotListed | Lookup::Unusable => Decision::undetermined(),
        }
    }
}

/// Null sender (`<>`) or a postmaster address.
pub fn applies_to(sender: &str) -> bool {
    let addr = sender.trim().trim_start_matches('<').trim_end_matches('>');
    if addr.is_empty() { return true; }
    let user = addr.split('@').next().unwrap_or_default();
    user.is_empty() || user.eq_ignore_ascii_case("postmaster")
}
