//! Configuration parsing for dnslist
//!
//! The file is a list of blocks. `main`, `stats` and `ips.backscatterer.org`
//! are reserved; any other block configures the zone of the same name.

use crate::backscatter::BACKSCATTERER_ZONE;
use crate::resolver::{parse_nameserver, DEFAULT_TIMEOUT};
use crate::types::{SearchMode, Zone, ZoneType};
use crate::validator::DNSWL_ZONE;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub block: Vec<Directive>,
}

#[derive(Clone, Debug)]
pub struct MainConfig {
    pub zones: Vec<String>,
    pub search: SearchMode,
    /// Minutes between RFC 5782 re-probes.
    pub periodic_checks: u64,
    pub timeout: Duration,
    pub tries: u8,
    pub nameservers: Vec<SocketAddr>,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            zones: Vec::new(),
            search: SearchMode::First,
            periodic_checks: 30,
            timeout: DEFAULT_TIMEOUT,
            tries: 1,
            nameservers: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StatsConfig {
    pub enable: bool,
    pub listen: String,
}

impl Default for StatsConfig {
    fn default() -> Self { Self { enable: false, listen: ":9153".to_string() } }
}

/// Which later stages a `list.dnswl.org` hit lets the peer skip.
#[derive(Clone, Debug, Default)]
pub struct DnswlConfig {
    pub ok_helo: bool,
    pub ok_mail: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub main: MainConfig,
    pub stats: StatsConfig,
    pub backscatterer: bool,
    pub dnswl: DnswlConfig,
    /// Zones named in `main.zones`, in that order, with their block settings applied.
    pub zones: Vec<Zone>,
}

#[derive(Debug, PartialEq)]
enum Token { Text(String), OpenBrace, CloseBrace, Newline }

struct RawBlock { name: String, directives: Vec<Directive> }

impl Config {
    /// Load configuration from a file path
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path))?;
        Self::parse(&content).with_context(|| format!("Invalid config file '{}'", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let tokens = Self::lex(content);
        let blocks = Self::parse_tokens(&tokens)?;

        let mut cfg = Config::default();
        let mut zone_blocks: HashMap<String, Vec<Directive>> = HashMap::new();

        for raw in blocks {
            match raw.name.as_str() {
                "main" => apply_main(&mut cfg.main, &raw.directives)?,
                "stats" => {
                    for d in &raw.directives {
                        match d.name.as_str() {
                            "enable" => cfg.stats.enable = parse_bool(d)?,
                            "listen" => cfg.stats.listen = first_arg(d)?.to_string(),
                            other => tracing::warn!("[config] unknown stats directive '{}'", other),
                        }
                    }
                }
                BACKSCATTERER_ZONE => {
                    for d in &raw.directives {
                        if d.name == "enable" { cfg.backscatterer = parse_bool(d)?; }
                    }
                }
                DNSWL_ZONE => {
                    let mut rest = Vec::new();
                    for d in raw.directives {
                        match d.name.as_str() {
                            "ok_helo" => cfg.dnswl.ok_helo = parse_bool(&d)?,
                            "ok_mail" => cfg.dnswl.ok_mail = parse_bool(&d)?,
                            _ => rest.push(d),
                        }
                    }
                    zone_blocks.entry(raw.name).or_default().extend(rest);
                }
                _ => zone_blocks.entry(raw.name).or_default().extend(raw.directives),
            }
        }

        for name in &cfg.main.zones {
            let mut zone = Zone::new(name.clone());
            if let Some(directives) = zone_blocks.get(name) {
                apply_zone(&mut zone, directives)?;
            }
            cfg.zones.push(zone);
        }

        for name in zone_blocks.keys().filter(|n| !cfg.main.zones.contains(n)) {
            tracing::debug!("[config] block '{}' is not listed in main.zones, ignoring", name);
        }

        Ok(cfg)
    }

    fn lex(input: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut chars = input.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c == '\n' { tokens.push(Token::Newline); chars.next(); }
            else if c.is_whitespace() { chars.next(); }
            else if c == '#' { while let Some(&c) = chars.peek() { if c == '\n' { break; } chars.next(); } }
            else if c == '{' { tokens.push(Token::OpenBrace); chars.next(); }
            else if c == '}' { tokens.push(Token::CloseBrace); chars.next(); }
            else if c == '"' {
                chars.next();
                let mut s = String::new();
                while let Some(&c) = chars.peek() { if c == '"' { chars.next(); break; } s.push(c); chars.next(); }
                tokens.push(Token::Text(s));
            } else {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '#' || c == '{' || c == '}' || c == '"' { break; }
                    s.push(c); chars.next();
                }
                tokens.push(Token::Text(s));
            }
        }
        tokens
    }

    fn parse_tokens(tokens: &[Token]) -> Result<Vec<RawBlock>> {
        let mut i = 0;
        let mut blocks = Vec::new();
        let mut names = Vec::new();
        while i < tokens.len() {
            match &tokens[i] {
                Token::Text(s) => { names.push(s.clone()); i += 1; }
                Token::OpenBrace => {
                    if names.is_empty() { anyhow::bail!("block without a name"); }
                    i += 1;
                    let (directives, next_i) = Self::parse_block(tokens, i)?;
                    i = next_i;
                    for name in names.drain(..) { blocks.push(RawBlock { name, directives: directives.clone() }); }
                }
                Token::Newline => { i += 1; names.clear(); }
                Token::CloseBrace => anyhow::bail!("unbalanced '}}'"),
            }
        }
        Ok(blocks)
    }

    /// Parse a configuration block starting at position i
    fn parse_block(tokens: &[Token], mut i: usize) -> Result<(Vec<Directive>, usize)> {
        let mut directives = Vec::new();
        while i < tokens.len() {
            match &tokens[i] {
                Token::Newline => { i += 1; }
                Token::CloseBrace => { i += 1; return Ok((directives, i)); }
                Token::Text(name) => {
                    let directive_name = name.clone(); i += 1;
                    let mut args = Vec::new();
                    let mut block = Vec::new();
                    while i < tokens.len() {
                        match &tokens[i] {
                            Token::Text(arg) => { args.push(arg.clone()); i += 1; }
                            Token::OpenBrace => {
                                i += 1;
                                let (sub_block, next_i) = Self::parse_block(tokens, i)?;
                                block = sub_block; i = next_i; break;
                            }
                            Token::Newline | Token::CloseBrace => { break; }
                        }
                    }
                    directives.push(Directive { name: directive_name, args, block });
                }
                Token::OpenBrace => anyhow::bail!("unexpected '{{'"),
            }
        }
        anyhow::bail!("unterminated block")
    }
}

fn apply_main(main: &mut MainConfig, directives: &[Directive]) -> Result<()> {
    for d in directives {
        match d.name.as_str() {
            "zones" => {
                for arg in &d.args {
                    for zone in arg.split([',', ';']).map(str::trim).filter(|z| !z.is_empty()) {
                        if !main.zones.iter().any(|z| z == zone) { main.zones.push(zone.to_string()); }
                    }
                }
            }
            "search" => main.search = first_arg(d)?.parse()?,
            "periodic_checks" => {
                main.periodic_checks = first_arg(d)?.parse().with_context(|| format!("periodic_checks '{:?}'", d.args))?;
            }
            "timeout" => main.timeout = parse_duration(first_arg(d)?)?,
            "tries" => main.tries = first_arg(d)?.parse().with_context(|| format!("tries '{:?}'", d.args))?,
            "nameservers" => {
                for arg in &d.args { main.nameservers.push(parse_nameserver(arg)?); }
            }
            other => tracing::warn!("[config] unknown main directive '{}'", other),
        }
    }
    Ok(())
}

fn apply_zone(zone: &mut Zone, directives: &[Directive]) -> Result<()> {
    for d in directives {
        match d.name.as_str() {
            "type" => zone.zone_type = first_arg(d)?.parse::<ZoneType>()?,
            "reject" => zone.reject = parse_bool(d)?,
            "ipv6" => zone.ipv6 = parse_bool(d)?,
            "loopback_is_rejected" => zone.loopback_is_rejected = parse_bool(d)?,
            name => match name.parse::<Ipv4Addr>() {
                Ok(answer) => { zone.annotations.insert(answer, d.args.join(" ")); }
                Err(_) => tracing::warn!("[config] unknown directive '{}' for zone '{}'", name, zone.name),
            },
        }
    }
    Ok(())
}

fn first_arg(d: &Directive) -> Result<&str> {
    d.args.first().map(String::as_str).ok_or_else(|| anyhow::anyhow!("'{}' needs an argument", d.name))
}

fn parse_bool(d: &Directive) -> Result<bool> {
    match d.args.first().map(|s| s.to_lowercase()) {
        None => Ok(true),
        Some(v) => match v.as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => anyhow::bail!("'{}' expects a boolean, got '{}'", d.name, v),
        },
    }
}

pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") { Ok(Duration::from_millis(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('s') { Ok(Duration::from_secs(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('m') { Ok(Duration::from_secs(stripped.parse::<u64>()? * 60)) }
    else if let Some(stripped) = s.strip_suffix('h') { Ok(Duration::from_secs(stripped.parse::<u64>()? * 3600)) }
    else if let Ok(secs) = s.parse::<u64>() { Ok(Duration::from_secs(secs)) }
    else { anyhow::bail!("invalid duration '{}'", s) }
}
