//! RFC 5782 query names: reversed octets (IPv4) or reversed nibbles (IPv6)
//! prepended to the list's zone.

use crate::error::{DnsListError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub fn build_query(ip: &str, zone: &str) -> Result<String> {
    Ok(build_query_addr(&parse_ip(ip)?, zone))
}

pub fn parse_ip(ip: &str) -> Result<IpAddr> {
    ip.trim().parse().map_err(|_| DnsListError::InvalidAddress(ip.to_string()))
}

pub fn build_query_addr(ip: &IpAddr, zone: &str) -> String {
    let zone = zone.trim_end_matches('.');
    match ip {
        IpAddr::V4(v4) => format!("{}.{}", reverse_ipv4(v4), zone),
        IpAddr::V6(v6) => format!("{}.{}", reverse_ipv6(v6), zone),
    }
}

fn reverse_ipv4(ip: &Ipv4Addr) -> String {
    let o = ip.octets();
    format!("{}.{}.{}.{}", o[3], o[2], o[1], o[0])
}

fn reverse_ipv6(ip: &Ipv6Addr) -> String {
    let mut nibbles = Vec::with_capacity(32);
    for byte in ip.octets().iter().rev() {
        nibbles.push(format!("{:x}", byte & 0x0F));
        nibbles.push(format!("{:x}", byte >> 4));
    }
    nibbles.join(".")
}
