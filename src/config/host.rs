//! Host and port sanitizing.
//!
//! The bridge dials loopback unless non-loopback targets are explicitly
//! allowed. Anything malformed falls back to [`DEFAULT_HOST`].

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

// ============================================================================
// Constants
// ============================================================================

/// Host used when none (or an unusable one) is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// RFC 1123 hostname: dot-separated labels of alphanumerics and inner hyphens.
static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)(?:\.(?i:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?))*$")
        .expect("hostname pattern is valid")
});

// ============================================================================
// Host
// ============================================================================

/// Normalizes a configured host.
///
/// Loopback hosts are always accepted (`localhost` becomes `127.0.0.1`,
/// `[::1]` becomes `::1`). Other hosts are kept verbatim when
/// `allow_non_loopback` is set and otherwise replaced by [`DEFAULT_HOST`].
#[must_use]
pub fn sanitize_host(raw: Option<&str>, allow_non_loopback: bool) -> String {
    let Some(host) = raw.map(str::trim).filter(|h| !h.is_empty()) else {
        return DEFAULT_HOST.to_string();
    };

    if host.eq_ignore_ascii_case("localhost") {
        return DEFAULT_HOST.to_string();
    }

    let unbracketed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if let Some(ip) = parse_ip(unbracketed) {
        if ip.is_loopback() {
            return unbracketed.to_string();
        }
        if allow_non_loopback {
            return host.to_string();
        }
        warn!(host, "Non-loopback automation host rejected; using loopback");
        return DEFAULT_HOST.to_string();
    }

    if looks_like_ipv4(host) || !HOSTNAME.is_match(host) {
        warn!(host, "Invalid automation host; using loopback");
        return DEFAULT_HOST.to_string();
    }

    if allow_non_loopback {
        host.to_string()
    } else {
        warn!(host, "Non-loopback automation host rejected; using loopback");
        DEFAULT_HOST.to_string()
    }
}

/// Parses an IP literal, accepting an IPv6 zone suffix (`fe80::1%eth0`).
fn parse_ip(host: &str) -> Option<IpAddr> {
    if let Ok(v4) = host.parse::<Ipv4Addr>() {
        return Some(IpAddr::V4(v4));
    }
    let address = host.split_once('%').map_or(host, |(addr, _zone)| addr);
    address.parse::<Ipv6Addr>().ok().map(IpAddr::V6)
}

/// All-numeric dotted labels must be a valid IPv4 literal, never a hostname.
fn looks_like_ipv4(host: &str) -> bool {
    host.split('.')
        .all(|label| !label.is_empty() && label.bytes().all(|b| b.is_ascii_digit()))
}

/// Formats `host:port` for a URL authority, bracketing IPv6 literals.
#[must_use]
pub fn authority(host: &str, port: u16) -> String {
    if host.starts_with('[') {
        format!("{host}:{port}")
    } else if host.contains(':') {
        format!("[{}]:{port}", host.replace('%', "%25"))
    } else {
        format!("{host}:{port}")
    }
}

// ============================================================================
// Ports
// ============================================================================

/// Parses a port; only integers in `1..=65535` are accepted.
#[must_use]
pub fn sanitize_port(raw: &str) -> Option<u16> {
    raw.trim().parse::<u16>().ok().filter(|p| *p > 0)
}

/// Builds the configured port list: `primary` first, then valid extras,
/// without duplicates.
#[must_use]
pub fn sanitize_ports(primary: u16, extras: &[u16]) -> Vec<u16> {
    let mut ports = vec![primary];
    for port in extras {
        if *port > 0 && !ports.contains(port) {
            ports.push(*port);
        }
    }
    ports
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_hosts_are_normalized() {
        assert_eq!(sanitize_host(Some("127.0.0.1"), false), "127.0.0.1");
        assert_eq!(sanitize_host(Some("localhost"), false), "127.0.0.1");
        assert_eq!(sanitize_host(Some("LOCALHOST"), false), "127.0.0.1");
        assert_eq!(sanitize_host(Some("::1"), false), "::1");
        assert_eq!(sanitize_host(Some("[::1]"), false), "::1");
        assert_eq!(sanitize_host(Some("  127.0.0.1  "), false), "127.0.0.1");
    }

    #[test]
    fn test_missing_or_blank_host_uses_default() {
        assert_eq!(sanitize_host(None, false), DEFAULT_HOST);
        assert_eq!(sanitize_host(Some(""), true), DEFAULT_HOST);
        assert_eq!(sanitize_host(Some("   "), true), DEFAULT_HOST);
    }

    #[test]
    fn test_non_loopback_rejected_by_default() {
        for host in ["0.0.0.0", "192.168.1.100", "8.8.8.8", "::", "fe80::1", "example.com"] {
            assert_eq!(sanitize_host(Some(host), false), DEFAULT_HOST, "host {host}");
        }
    }

    #[test]
    fn test_non_loopback_kept_verbatim_when_allowed() {
        for host in [
            "0.0.0.0",
            "10.0.0.1",
            "::",
            "2001:db8::1",
            "[fe80::1]",
            "fe80::1%eth0",
            "example.com",
            "unreal-server.local",
            "dev-pc",
        ] {
            assert_eq!(sanitize_host(Some(host), true), host, "host {host}");
        }
    }

    #[test]
    fn test_malformed_hosts_fall_back_even_when_allowed() {
        assert_eq!(sanitize_host(Some("256.1.1.1"), true), DEFAULT_HOST);
        assert_eq!(sanitize_host(Some("-invalid-hostname"), true), DEFAULT_HOST);
        assert_eq!(sanitize_host(Some("bad_host!"), true), DEFAULT_HOST);
    }

    #[test]
    fn test_authority_brackets_ipv6() {
        assert_eq!(authority("127.0.0.1", 8091), "127.0.0.1:8091");
        assert_eq!(authority("::1", 8091), "[::1]:8091");
        assert_eq!(authority("[fe80::1]", 80), "[fe80::1]:80");
        assert_eq!(authority("fe80::1%eth0", 80), "[fe80::1%25eth0]:80");
        assert_eq!(authority("dev-pc", 1), "dev-pc:1");
    }

    #[test]
    fn test_sanitize_port() {
        assert_eq!(sanitize_port("8091"), Some(8091));
        assert_eq!(sanitize_port(" 65535 "), Some(65535));
        assert_eq!(sanitize_port("0"), None);
        assert_eq!(sanitize_port("65536"), None);
        assert_eq!(sanitize_port("abc"), None);
    }

    #[test]
    fn test_sanitize_ports_keeps_primary_first_without_duplicates() {
        assert_eq!(sanitize_ports(8091, &[8090, 8091, 0, 8092, 8090]), vec![8091, 8090, 8092]);
    }
}
