//! Anti-poisoning checks on list answers.
//!
//! A DNS list must only ever answer inside 127.0.0.0/8. Some operators also
//! use reserved answers to signal errors or rate limiting instead of a
//! listing; those answers must disable the zone rather than reject mail.
//!
//! - Spamhaus: <https://www.spamhaus.org/news/article/807>
//! - DNSWL: <https://www.dnswl.org/?page_id=15>

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::net::Ipv4Addr;

const SPAMHAUS_ERROR_CODES: [Ipv4Addr; 3] = [
    Ipv4Addr::new(127, 255, 255, 252),
    Ipv4Addr::new(127, 255, 255, 254),
    Ipv4Addr::new(127, 255, 255, 255),
];

pub const DNSWL_ZONE: &str = "list.dnswl.org";
const DNSWL_RATE_LIMITED: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 255);

lazy_static! {
    static ref SPAMHAUS_ZONE: Regex = Regex::new(r"spamhaus").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Clean,
    Poisoned(PoisonReason),
}

impl Validation {
    pub fn is_poisoned(&self) -> bool { matches!(self, Validation::Poisoned(_)) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoisonReason {
    OutOfRange(Ipv4Addr),
    ErrorSentinel(Ipv4Addr),
}

impl fmt::Display for PoisonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoisonReason::OutOfRange(a) => write!(f, "answer {} outside 127.0.0.0/8", a),
            PoisonReason::ErrorSentinel(a) => write!(f, "error/rate-limit answer {}", a),
        }
    }
}

pub fn validate(zone: &str, answers: &[Ipv4Addr]) -> Validation {
    if let Some(&bad) = answers.iter().find(|a| a.octets()[0] != 127) {
        return Validation::Poisoned(PoisonReason::OutOfRange(bad));
    }

    if SPAMHAUS_ZONE.is_match(zone) {
        if let Some(&code) = answers.iter().find(|a| SPAMHAUS_ERROR_CODES.contains(a)) {
            return Validation::Poisoned(PoisonReason::ErrorSentinel(code));
        }
    }

    if zone == DNSWL_ZONE && answers.contains(&DNSWL_RATE_LIMITED) {
        return Validation::Poisoned(PoisonReason::ErrorSentinel(DNSWL_RATE_LIMITED));
    }

    Validation::Clean
}
