use crate::error::{DnsListError, Result};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(25);
pub const MAX_TRIES: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Answers(Vec<Ipv4Addr>),
    NotFound,
    Timeout,
    OtherError(String),
}

impl LookupResult {
    /// Label used for lookup statistics.
    pub fn kind(&self) -> &'static str {
        match self {
            LookupResult::Answers(_) => "LISTED",
            LookupResult::NotFound => "NXDOMAIN",
            LookupResult::Timeout => "TIMEOUT",
            LookupResult::OtherError(_) => "ERROR",
        }
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve_a(&self, name: &str, timeout: Duration) -> LookupResult;
}

/// Plain UDP stub resolver talking to recursive nameservers.
pub struct UdpResolver {
    nameservers: Vec<SocketAddr>,
    tries: u8,
}

impl UdpResolver {
    pub fn new(nameservers: Vec<SocketAddr>, tries: u8) -> Self {
        let nameservers = if nameservers.is_empty() { system_nameservers() } else { nameservers };
        Self { nameservers, tries: tries.clamp(1, MAX_TRIES) }
    }

    pub fn nameservers(&self) -> &[SocketAddr] { &self.nameservers }

    async fn exchange(&self, server: SocketAddr, query: &[u8], id: u16, wait: Duration) -> std::result::Result<Vec<u8>, Exchange> {
        let bind = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await.map_err(|e| Exchange::Failed(e.to_string()))?;
        socket.connect(server).await.map_err(|e| Exchange::Failed(e.to_string()))?;
        socket.send(query).await.map_err(|e| Exchange::Failed(e.to_string()))?;

        let deadline = Instant::now() + wait;
        let mut buf = vec![0u8; 4096];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let len = match timeout(remaining, socket.recv(&mut buf)).await {
                Err(_) => return Err(Exchange::TimedOut),
                Ok(Err(e)) => return Err(Exchange::Failed(e.to_string())),
                Ok(Ok(len)) => len,
            };
            // Stray datagrams with another id are dropped, not treated as answers.
            if len >= 2 && u16::from_be_bytes([buf[0], buf[1]]) == id {
                buf.truncate(len);
                return Ok(buf);
            }
        }
    }
}

enum Exchange { TimedOut, Failed(String) }

#[async_trait]
impl Resolver for UdpResolver {
    async fn resolve_a(&self, name: &str, wait: Duration) -> LookupResult {
        let id: u16 = rand::random();
        let query = match build_a_query(id, name) {
            Ok(q) => q,
            Err(e) => return LookupResult::OtherError(e.to_string()),
        };

        let mut last_error = None;
        for attempt in 0..self.tries {
            for &server in &self.nameservers {
                tracing::debug!("TxID: {:#06x} -> A {} via {} (attempt {})", id, name, server, attempt + 1);
                match self.exchange(server, &query, id, wait).await {
                    Ok(resp) => match parse_a_response(id, &resp) {
                        Ok(result) => return result,
                        Err(e) => last_error = Some(e.to_string()),
                    },
                    Err(Exchange::TimedOut) => {
                        tracing::debug!("Nameserver {} timed out for '{}'", server, name);
                    }
                    Err(Exchange::Failed(e)) => last_error = Some(format!("{}: {}", server, e)),
                }
            }
        }

        match last_error {
            Some(e) => LookupResult::OtherError(e),
            None => LookupResult::Timeout,
        }
    }
}

pub fn system_nameservers() -> Vec<SocketAddr> {
    let from_file = std::fs::read_to_string("/etc/resolv.conf")
        .map(|content| parse_resolv_conf(&content))
        .unwrap_or_default();
    if from_file.is_empty() { vec![SocketAddr::from(([127, 0, 0, 1], 53))] } else { from_file }
}

pub fn parse_resolv_conf(content: &str) -> Vec<SocketAddr> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#') && !l.starts_with(';'))
        .filter_map(|l| l.strip_prefix("nameserver"))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter_map(|ip| ip.split('%').next()?.parse::<IpAddr>().ok())
        .map(|ip| SocketAddr::new(ip, 53))
        .collect()
}

/// Accepts `1.1.1.1`, `1.1.1.1:5353`, `::1` or `[::1]:5353`.
pub fn parse_nameserver(s: &str) -> Result<SocketAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() { return Ok(addr); }
    s.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| DnsListError::Config(format!("invalid nameserver '{}'", s)))
}

pub fn build_a_query(id: u16, name: &str) -> Result<Vec<u8>> {
    let name = name.trim_end_matches('.');
    if name.is_empty() || name.len() > 253 {
        return Err(DnsListError::InvalidName(name.to_string()));
    }

    let mut q = Vec::with_capacity(name.len() + 18);
    q.extend_from_slice(&id.to_be_bytes());
    q.extend_from_slice(&[0x01, 0x00]); // RD
    q.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(DnsListError::InvalidName(name.to_string()));
        }
        q.push(label.len() as u8);
        q.extend_from_slice(label.as_bytes());
    }
    q.push(0);
    q.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A, IN
    Ok(q)
}

pub fn parse_a_response(id: u16, resp: &[u8]) -> Result<LookupResult> {
    if resp.len() < 12 {
        return Err(DnsListError::Malformed("short header".into()));
    }
    if u16::from_be_bytes([resp[0], resp[1]]) != id || resp[2] & 0x80 == 0 {
        return Err(DnsListError::Malformed("not a response to our query".into()));
    }
    if resp[2] & 0x02 != 0 {
        return Ok(LookupResult::OtherError("truncated response".into()));
    }

    match resp[3] & 0x0F {
        0 => {}
        3 => return Ok(LookupResult::NotFound),
        rcode => return Ok(LookupResult::OtherError(format!("server answered {}", rcode_to_str(rcode)))),
    }

    let qdcount = u16::from_be_bytes([resp[4], resp[5]]);
    let ancount = u16::from_be_bytes([resp[6], resp[7]]);

    let mut offset = 12;
    for _ in 0..qdcount {
        offset = skip_name(resp, offset)? + 4;
    }

    let mut answers = Vec::new();
    for _ in 0..ancount {
        offset = skip_name(resp, offset)?;
        if offset + 10 > resp.len() {
            return Err(DnsListError::Malformed("truncated resource record".into()));
        }
        let rtype = u16::from_be_bytes([resp[offset], resp[offset + 1]]);
        let class = u16::from_be_bytes([resp[offset + 2], resp[offset + 3]]);
        let rdlen = u16::from_be_bytes([resp[offset + 8], resp[offset + 9]]) as usize;
        offset += 10;
        if offset + rdlen > resp.len() {
            return Err(DnsListError::Malformed("rdata past end of message".into()));
        }
        if rtype == 1 && class == 1 && rdlen == 4 {
            let answer = Ipv4Addr::new(resp[offset], resp[offset + 1], resp[offset + 2], resp[offset + 3]);
            if !answers.contains(&answer) { answers.push(answer); }
        }
        offset += rdlen;
    }

    // NOERROR without A records (NODATA) is "not listed" too.
    if answers.is_empty() { Ok(LookupResult::NotFound) } else { Ok(LookupResult::Answers(answers)) }
}

fn skip_name(msg: &[u8], mut offset: usize) -> Result<usize> {
    loop {
        let Some(&len) = msg.get(offset) else {
            return Err(DnsListError::Malformed("name runs past end of message".into()));
        };
        match len {
            0 => return Ok(offset + 1),
            l if l & 0xC0 == 0xC0 => {
                if offset + 2 > msg.len() {
                    return Err(DnsListError::Malformed("truncated compression pointer".into()));
                }
                return Ok(offset + 2);
            }
            l if l & 0xC0 != 0 => return Err(DnsListError::Malformed("unsupported label type".into())),
            l => offset += 1 + l as usize,
        }
    }
}

pub fn rcode_to_str(rcode: u8) -> &'static str {
    match rcode { 0 => "NOERROR", 1 => "FORMERR", 2 => "SERVFAIL", 3 => "NXDOMAIN", 4 => "NOTIMP", 5 => "REFUSED", _ => "UNKNOWN" }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: u16, rcode: u8, answers: &[[u8; 4]]) -> Vec<u8> {
        let mut query = build_a_query(id, "2.0.0.127.bl.example").unwrap();
        query[2] = 0x81;
        query[3] = 0x80 | rcode;
        query[7] = answers.len() as u8;
        for a in answers {
            query.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x0E, 0x10, 0x00, 0x04]);
            query.extend_from_slice(a);
        }
        query
    }

    #[test]
    fn test_build_query_layout() {
        let q = build_a_query(0x1234, "4.3.2.1.zone.").unwrap();
        assert_eq!(&q[0..2], &[0x12, 0x34]);
        assert_eq!(&q[4..6], &[0x00, 0x01]);
        assert_eq!(&q[12..14], &[1, b'4']);
        assert_eq!(&q[q.len() - 5..], &[0, 0, 1, 0, 1]);
        assert!(build_a_query(1, "a..b").is_err());
        assert!(build_a_query(1, &"x".repeat(64)).is_err());
    }

    #[test]
    fn test_parse_answers() {
        let resp = response(7, 0, &[[127, 0, 0, 2], [127, 0, 0, 4], [127, 0, 0, 2]]);
        assert_eq!(
            parse_a_response(7, &resp).unwrap(),
            LookupResult::Answers(vec![Ipv4Addr::new(127, 0, 0, 2), Ipv4Addr::new(127, 0, 0, 4)])
        );
    }

    #[test]
    fn test_parse_rcodes() {
        assert_eq!(parse_a_response(9, &response(9, 3, &[])).unwrap(), LookupResult::NotFound);
        assert_eq!(parse_a_response(9, &response(9, 0, &[])).unwrap(), LookupResult::NotFound);
        assert!(matches!(parse_a_response(9, &response(9, 2, &[])).unwrap(), LookupResult::OtherError(_)));
        assert!(parse_a_response(10, &response(9, 0, &[])).is_err());
        assert!(parse_a_response(9, &[0, 9, 0x81]).is_err());
    }

    #[test]
    fn test_parse_rejects_overrun() {
        let mut resp = response(3, 0, &[[127, 0, 0, 2]]);
        resp.truncate(resp.len() - 2);
        assert!(parse_a_response(3, &resp).is_err());
    }

    #[test]
    fn test_resolv_conf() {
        let conf = "# comment\nsearch example.com\nnameserver 192.0.2.1\nnameserver fe80::1%eth0\nnameserver bogus\n";
        let servers = parse_resolv_conf(conf);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0], "192.0.2.1:53".parse().unwrap());
        assert_eq!(parse_nameserver("[::1]:5353").unwrap(), "[::1]:5353".parse().unwrap());
        assert_eq!(parse_nameserver("9.9.9.9").unwrap(), "9.9.9.9:53".parse().unwrap());
        assert!(parse_nameserver("dns.example").is_err());
    }
}
