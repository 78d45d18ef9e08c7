use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// Cloudflare edge ranges (IPv4 and IPv6).
/// Source: https://www.cloudflare.com/ips/
const CLOUDFLARE_IP_RANGES: &[&str] = &[
    "173.245.48.0/20",
    "103.21.244.0/22",
    "103.22.200.0/22",
    "103.31.4.0/22",
    "141.101.64.0/18",
    "108.162.192.0/18",
    "190.93.240.0/20",
    "188.114.96.0/20",
    "197.234.240.0/22",
    "198.41.128.0/17",
    "162.158.0.0/15",
    "104.16.0.0/13",
    "104.24.0.0/14",
    "172.64.0.0/13",
    "131.0.72.0/22",
    "2400:cb00::/32",
    "2606:4700::/32",
    "2803:f800::/32",
    "2405:b500::/32",
    "2405:8100::/32",
    "2a06:98c0::/29",
    "2c0f:f248::/32",
];

/// An address prefix such as `10.0.0.0/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    base: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Parses `addr/prefix`; returns `None` on malformed input or an
    /// out-of-range prefix.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (addr, prefix) = s.split_once('/')?;
        let base: IpAddr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        let max = if base.is_ipv4() { 32 } else { 128 };
        (prefix <= max).then_some(Self { base, prefix })
    }

    /// Returns `true` if `ip` falls inside this prefix.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (ip, self.base) {
            (IpAddr::V4(ip), IpAddr::V4(base)) => {
                // prefix == 0 would overflow the shift
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                (u32::from(ip) & mask) == (u32::from(base) & mask)
            }
            (IpAddr::V6(ip), IpAddr::V6(base)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix))
                    .unwrap_or(0);
                (u128::from(ip) & mask) == (u128::from(base) & mask)
            }
            _ => false,
        }
    }
}

fn is_cloudflare_ip(ip: IpAddr) -> bool {
    CLOUDFLARE_IP_RANGES
        .iter()
        .filter_map(|r| Cidr::parse(r))
        .any(|cidr| cidr.contains(ip))
}

/// Resolves the caller address used for rate limiting and route caching.
///
/// `CF-Connecting-IP` is trusted only when the TCP peer is a Cloudflare
/// edge; otherwise the socket peer address wins.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: &SocketAddr) -> IpAddr {
    if is_cloudflare_ip(peer.ip()) {
        if let Some(ip) = headers
            .get("cf-connecting-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
        {
            return ip;
        }
    }
    peer.ip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::net::Ipv4Addr;

    fn cloudflare_peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(173, 245, 48, 1)), 12345)
    }

    fn plain_peer() -> SocketAddr {
        "198.51.100.7:40000".parse().unwrap()
    }

    fn cf_headers(ip: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("cf-connecting-ip", HeaderValue::from_str(ip).unwrap());
        h
    }

    #[test]
    fn trusts_cf_header_from_cloudflare_peer() {
        assert_eq!(
            client_ip(&cf_headers("203.0.113.50"), &cloudflare_peer()),
            "203.0.113.50".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn ignores_cf_header_from_untrusted_peer() {
        assert_eq!(
            client_ip(&cf_headers("203.0.113.50"), &plain_peer()),
            plain_peer().ip()
        );
    }

    #[test]
    fn falls_back_to_peer_without_header() {
        assert_eq!(
            client_ip(&HeaderMap::new(), &cloudflare_peer()),
            cloudflare_peer().ip()
        );
    }

    #[test]
    fn cidr_contains_v4_and_v6() {
        let v4 = Cidr::parse("104.16.0.0/13").unwrap();
        assert!(v4.contains("104.23.255.255".parse().unwrap()));
        assert!(!v4.contains("104.24.0.0".parse().unwrap()));

        let v6 = Cidr::parse("2606:4700::/32").unwrap();
        assert!(v6.contains("2606:4700:10::1".parse().unwrap()));
        assert!(!v4.contains("2606:4700:10::1".parse().unwrap()));
    }

    #[test]
    fn cidr_zero_prefix_matches_everything() {
        let any = Cidr::parse("0.0.0.0/0").unwrap();
        assert!(any.contains("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn cidr_rejects_bad_prefix() {
        assert!(Cidr::parse("10.0.0.0/33").is_none());
        assert!(Cidr::parse("10.0.0.0").is_none());
    }
}
