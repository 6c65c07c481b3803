//! IPv4 address and CIDR matching for IP restriction policies.
//!
//! Entries are either a plain dotted-quad (`10.0.0.7`) or a CIDR block
//! (`192.168.1.0/24`). Matching compares the masked `u32` forms.

use std::net::Ipv4Addr;

/// Parse a dotted-quad IPv4 address.
pub fn parse_ipv4(ip: &str) -> Option<Ipv4Addr> {
    ip.trim().parse::<Ipv4Addr>().ok()
}

/// Parse `a.b.c.d/bits` into its base address and prefix length.
pub fn parse_cidr(cidr: &str) -> Option<(Ipv4Addr, u8)> {
    let (range, bits) = cidr.trim().split_once('/')?;
    let base = parse_ipv4(range)?;
    let bits: u8 = bits.parse().ok()?;
    if bits > 32 {
        return None;
    }
    Some((base, bits))
}

fn prefix_mask(bits: u8) -> u32 {
    match bits {
        0 => 0,
        b => u32::MAX << (32 - u32::from(b)),
    }
}

/// Whether `ip` falls inside the CIDR block. Malformed input never matches.
pub fn ip_in_cidr(ip: &str, cidr: &str) -> bool {
    let (Some(addr), Some((base, bits))) = (parse_ipv4(ip), parse_cidr(cidr)) else {
        return false;
    };
    let mask = prefix_mask(bits);
    (u32::from(addr) & mask) == (u32::from(base) & mask)
}

/// Whether `ip` matches a whitelist/blacklist entry (plain address or CIDR).
pub fn ip_matches_entry(ip: &str, entry: &str) -> bool {
    if entry.contains('/') {
        return ip_in_cidr(ip, entry);
    }
    match (parse_ipv4(ip), parse_ipv4(entry)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Whether `entry` is acceptable in a policy: an IPv4 address or CIDR with
/// prefix 0..=32.
pub fn is_valid_entry(entry: &str) -> bool {
    if entry.contains('/') {
        parse_cidr(entry).is_some()
    } else {
        parse_ipv4(entry).is_some()
    }
}
