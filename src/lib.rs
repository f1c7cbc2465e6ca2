//! dnslist - DNS reputation list (DNSBL/DNSWL) checks for mail hosts

pub mod aggregator;
pub mod backscatter;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod reload;
pub mod resolver;
pub mod server;
pub mod service;
pub mod types;
pub mod validator;

pub use aggregator::DecisionAggregator;
pub use engine::ReputationQueryEngine;
pub use error::{DnsListError, Result};
pub use health::HealthMonitor;
pub use registry::ZoneRegistry;
pub use resolver::{LookupResult, Resolver, UdpResolver};
pub use service::DnsList;
pub use types::{Decision, DecisionCode, Peer, QueryOutcome, SearchMode, Verdict, Zone, ZoneType};
