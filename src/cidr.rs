//! CIDR range matching for IPv4 and IPv6 addresses.
//!
//! Both the candidate address and the network address are masked with the
//! same prefix mask before comparison. Malformed input never panics or
//! errors: it simply does not match.

use std::net::{Ipv4Addr, Ipv6Addr};

/// Check whether `ip` falls inside `cidr` (e.g. `"66.249.64.0/19"`).
///
/// The address family is chosen by the range: a colon in `cidr` selects
/// IPv6. Mixed families, unparseable addresses, a missing prefix and
/// out-of-range prefix lengths all return `false`.
pub fn matches(ip: &str, cidr: &str) -> bool {
    let Some((network, prefix)) = cidr.trim().split_once('/') else {
        return false;
    };
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let Ok(prefix) = prefix.parse::<u8>() else {
        return false;
    };

    if network.contains(':') {
        matches_v6(ip.trim(), network, prefix)
    } else {
        matches_v4(ip.trim(), network, prefix)
    }
}

fn matches_v4(ip: &str, network: &str, prefix: u8) -> bool {
    if prefix > 32 || ip.contains(':') {
        return false;
    }
    let (Ok(ip), Ok(network)) = (ip.parse::<Ipv4Addr>(), network.parse::<Ipv4Addr>()) else {
        return false;
    };

    let mask = v4_mask(prefix);
    (u32::from(ip) & mask) == (u32::from(network) & mask)
}

fn matches_v6(ip: &str, network: &str, prefix: u8) -> bool {
    if prefix > 128 || !ip.contains(':') {
        return false;
    }
    let (Ok(ip), Ok(network)) = (ip.parse::<Ipv6Addr>(), network.parse::<Ipv6Addr>()) else {
        return false;
    };

    let mask = v6_mask(prefix);
    let ip = ip.octets();
    let network = network.octets();

    (0..16).all(|i| ip[i] & mask[i] == network[i] & mask[i])
}

/// All-ones shifted left by `32 - prefix`; a /0 mask is empty.
fn v4_mask(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

/// `prefix / 8` full bytes, one partial byte, then zero padding.
fn v6_mask(prefix: u8) -> [u8; 16] {
    let mut mask = [0u8; 16];
    let full = usize::from(prefix / 8);
    let rest = prefix % 8;

    for byte in mask.iter_mut().take(full) {
        *byte = 0xff;
    }
    if rest > 0 {
        mask[full] = 0xffu8 << (8 - rest);
    }

    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipnet::{Ipv4Net, Ipv6Net};

    #[test]
    fn test_ipv4_inside_and_outside() {
        assert!(matches("66.249.64.5", "66.249.64.0/19"));
        assert!(matches("66.249.95.255", "66.249.64.0/19"));
        assert!(!matches("66.249.96.0", "66.249.64.0/19"));
        assert!(!matches("8.8.8.8", "66.249.64.0/19"));
    }

    #[test]
    fn test_ipv4_prefix_zero_matches_everything() {
        assert!(matches("1.2.3.4", "0.0.0.0/0"));
        assert!(matches("255.255.255.255", "10.0.0.0/0"));
    }

    #[test]
    fn test_ipv4_full_prefix_is_exact() {
        assert!(matches("20.191.45.212", "20.191.45.212/32"));
        assert!(!matches("20.191.45.213", "20.191.45.212/32"));
    }

    #[test]
    fn test_network_address_is_masked() {
        // Host bits set in the network part are ignored.
        assert!(matches("10.1.2.3", "10.1.2.99/24"));
    }

    #[test]
    fn test_ipv4_matches_reference() {
        let ranges = ["66.249.64.0/19", "13.68.0.0/14", "89.38.96.0/19", "0.0.0.0/0", "1.2.3.4/32", "128.0.0.0/1"];
        let ips = ["66.249.64.5", "66.249.100.1", "13.71.255.255", "13.72.0.0", "89.38.127.1", "1.2.3.4", "1.2.3.5", "127.255.255.255", "200.1.1.1"];

        for range in ranges {
            let net: Ipv4Net = range.parse().unwrap();
            for ip in ips {
                let addr: Ipv4Addr = ip.parse().unwrap();
                assert_eq!(matches(ip, range), net.contains(&addr), "{} in {}", ip, range);
            }
        }
    }

    #[test]
    fn test_ipv6_inside_and_outside() {
        assert!(matches("2a03:6f00:1::1", "2a03:6f00:1::/48"));
        assert!(matches("2a03:6f00:1:ffff:ffff:ffff:ffff:ffff", "2a03:6f00:1::/48"));
        assert!(!matches("2a03:6f00:2::1", "2a03:6f00:1::/48"));
    }

    #[test]
    fn test_ipv6_partial_byte_boundary() {
        // /52 ends inside the seventh byte: bits beyond it are free.
        assert!(matches("2001:db8:0:0fff::1", "2001:db8::/52"));
        assert!(!matches("2001:db8:0:1000::1", "2001:db8::/52"));
    }

    #[test]
    fn test_ipv6_matches_reference() {
        let ranges = ["2a03:6f00:1::/48", "2001:db8::/33", "::/0", "fe80::1/128", "2001:db8:8000::/35"];
        let ips = ["2a03:6f00:1::abcd", "2001:db8:7fff::1", "2001:db8:8000::1", "fe80::1", "fe80::2", "2001:db8:9fff::1", "::1"];

        for range in ranges {
            let net: Ipv6Net = range.parse().unwrap();
            for ip in ips {
                let addr: Ipv6Addr = ip.parse().unwrap();
                assert_eq!(matches(ip, range), net.contains(&addr), "{} in {}", ip, range);
            }
        }
    }

    #[test]
    fn test_mixed_families_do_not_match() {
        assert!(!matches("::ffff:66.249.64.5", "66.249.64.0/19"));
        assert!(!matches("66.249.64.5", "::/0"));
    }

    #[test]
    fn test_malformed_input_fails_closed() {
        assert!(!matches("not-an-ip", "10.0.0.0/8"));
        assert!(!matches("10.0.0.1", "10.0.0.0"));
        assert!(!matches("10.0.0.1", "10.0.0.0/33"));
        assert!(!matches("10.0.0.1", "10.0.0.0/abc"));
        assert!(!matches("10.0.0.1", "garbage/8"));
        assert!(!matches("2001:db8::1", "2001:db8::/129"));
        assert!(!matches("", ""));
    }

    #[test]
    fn test_signed_or_empty_prefix_fails_closed() {
        assert!(!matches("10.0.0.1", "10.0.0.0/+8"));
        assert!(!matches("10.0.0.1", "10.0.0.0/-8"));
        assert!(!matches("10.0.0.1", "10.0.0.0/"));
        assert!(!matches("10.0.0.1", "10.0.0.0/ 8"));
        assert!(!matches("2001:db8::1", "2001:db8::/+32"));
        assert!(matches("10.0.0.1", "10.0.0.0/08"));
    }

    #[test]
    fn test_masks() {
        assert_eq!(v4_mask(0), 0);
        assert_eq!(v4_mask(19), 0xffff_e000);
        assert_eq!(v4_mask(32), u32::MAX);

        let mask = v6_mask(52);
        assert_eq!(&mask[..6], &[0xff; 6]);
        assert_eq!(mask[6], 0xf0);
        assert!(mask[7..].iter().all(|b| *b == 0));
        assert_eq!(v6_mask(128), [0xff; 16]);
    }
}
