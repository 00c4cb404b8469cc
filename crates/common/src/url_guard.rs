//! SSRF gate for outbound fetches performed on behalf of user code.
//!
//! Every fetch the platform performs for a tenant (source downloads, sandbox
//! `fetch`, api-backed tools) must pass [`validate_outbound_url`] first. The
//! check classifies the parsed host only; it never resolves DNS, so a
//! hostname that resolves to a private address is the egress layer's
//! problem, not this gate's.

use std::net::{
    Ipv4Addr,
    Ipv6Addr,
};

use url::{
    Host,
    Url,
};

/// A structured admission decision. Refusals carry a reason; they are never
/// surfaced as errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl UrlDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Classify a URL as safe or unsafe for an outbound fetch.
///
/// Rejection order: unparseable, bad scheme, non-local http, missing host,
/// blocked IPv4 range, blocked IPv6 range, integer-encoded host.
pub fn validate_outbound_url(raw: &str) -> UrlDecision {
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(e) => return UrlDecision::reject(format!("unparseable URL: {e}")),
    };

    match url.scheme() {
        "http" | "https" => (),
        other => return UrlDecision::reject(format!("scheme {other:?} is not allowed")),
    }

    if url.scheme() == "http" {
        let local = matches!(
            url.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("[::1]")
        );
        if !local {
            return UrlDecision::reject("plain http is only allowed for localhost");
        }
    }

    let host = match url.host() {
        Some(host) => host.to_owned(),
        None => return UrlDecision::reject("URL has no host"),
    };

    match host {
        Host::Ipv4(addr) => {
            if let Some(reason) = blocked_ipv4_reason(addr) {
                return UrlDecision::reject(reason);
            }
        },
        Host::Ipv6(addr) => {
            if let Some(reason) = blocked_ipv6_reason(addr) {
                return UrlDecision::reject(reason);
            }
        },
        Host::Domain(_) => (),
    }

    // The URL parser canonicalizes `https://2130706433` into dotted-quad
    // form, so integer-encoded hosts that canonicalize into a public range
    // are only catchable from the raw authority text.
    if let Some(raw_host) = raw_authority_host(raw) {
        if is_integer_host(raw_host) {
            return UrlDecision::reject(format!(
                "host {raw_host:?} is an integer-encoded ip address"
            ));
        }
    }

    UrlDecision::allow()
}

fn blocked_ipv4_reason(addr: Ipv4Addr) -> Option<String> {
    let [a, b, ..] = addr.octets();
    let range = match (a, b) {
        (0, _) => "the unspecified range 0.0.0.0/8",
        (10, _) => "the private range 10.0.0.0/8",
        (127, _) => "the loopback range 127.0.0.0/8",
        (169, 254) => "the link-local range 169.254.0.0/16",
        (172, 16..=31) => "the private range 172.16.0.0/12",
        (192, 168) => "the private range 192.168.0.0/16",
        _ => return None,
    };
    Some(format!("address {addr} is in {range}"))
}

fn blocked_ipv6_reason(addr: Ipv6Addr) -> Option<String> {
    if addr == Ipv6Addr::UNSPECIFIED {
        return Some("address :: is unspecified".to_string());
    }
    if addr == Ipv6Addr::LOCALHOST {
        return Some("address ::1 is loopback".to_string());
    }
    // An IPv4-mapped address is exactly as dangerous as the IPv4 address it
    // embeds.
    if let Some(mapped) = addr.to_ipv4_mapped() {
        if let Some(reason) = blocked_ipv4_reason(mapped) {
            return Some(format!("ipv4-mapped {reason}"));
        }
        return None;
    }
    let segments = addr.segments();
    if segments[0] & 0xfe00 == 0xfc00 {
        return Some(format!("address {addr} is in the unique-local range fc00::/7"));
    }
    if segments[0] & 0xffc0 == 0xfe80 {
        return Some(format!("address {addr} is in the link-local range fe80::/10"));
    }
    None
}

/// Extract the host portion of the authority from the raw URL text, before
/// any parser canonicalization.
fn raw_authority_host(raw: &str) -> Option<&str> {
    let after_scheme = raw.split_once("://")?.1;
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(after_scheme);
    let host_port = match authority.rsplit_once('@') {
        Some((_userinfo, rest)) => rest,
        None => authority,
    };
    if host_port.starts_with('[') {
        // Bracketed IPv6; never integer-encoded.
        return None;
    }
    let host = match host_port.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => host_port,
    };
    Some(host)
}

/// Bare decimal, octal (leading zero), or hex integers are all IPv4 encoding
/// tricks.
fn is_integer_host(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    if let Some(hex) = host.strip_prefix("0x").or_else(|| host.strip_prefix("0X")) {
        return !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    host.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::validate_outbound_url;

    fn allowed(url: &str) -> bool {
        validate_outbound_url(url).allowed
    }

    fn reason(url: &str) -> String {
        validate_outbound_url(url).reason.expect("expected a refusal")
    }

    #[test]
    fn test_accepts_public_hosts() {
        assert!(allowed("https://example.com/path?query=1"));
        assert!(allowed("https://8.8.8.8"));
        assert!(allowed("https://api.openai.com/v1/models"));
        assert!(allowed("http://localhost:3000/dev"));
    }

    #[test]
    fn test_rejects_unparseable_and_bad_schemes() {
        assert!(!allowed("not a url"));
        assert!(!allowed("ftp://example.com"));
        assert!(!allowed("file:///etc/passwd"));
        assert!(reason("gopher://example.com").contains("scheme"));
    }

    #[test]
    fn test_rejects_http_to_public_hosts() {
        assert!(!allowed("http://example.com"));
        assert!(reason("http://example.com").contains("http"));
    }

    #[test]
    fn test_rejects_private_ipv4_ranges() {
        for blocked in [
            "https://0.0.0.1",
            "https://10.1.2.3",
            "https://127.0.0.1",
            "https://169.254.169.254/latest/meta-data/",
            "https://172.16.0.0",
            "https://172.31.255.255",
            "https://192.168.1.1",
        ] {
            assert!(!allowed(blocked), "{blocked} should be rejected");
        }
    }

    #[test]
    fn test_ipv4_boundary_behavior() {
        assert!(allowed("https://172.15.255.255"));
        assert!(!allowed("https://172.16.0.0"));
        assert!(!allowed("https://172.31.255.255"));
        assert!(allowed("https://172.32.0.0"));
    }

    #[test]
    fn test_metadata_endpoint_reason_names_link_local() {
        assert!(reason("https://169.254.169.254/latest/meta-data/").contains("link-local"));
    }

    #[test]
    fn test_rejects_private_ipv6() {
        for blocked in [
            "https://[::]",
            "https://[::1]",
            "https://[fc00::1]",
            "https://[fd12:3456::1]",
            "https://[fe80::1]",
            "https://[::ffff:127.0.0.1]",
            "https://[::ffff:10.0.0.1]",
            "https://[::ffff:169.254.169.254]",
        ] {
            assert!(!allowed(blocked), "{blocked} should be rejected");
        }
        assert!(allowed("https://[2001:4860:4860::8888]"));
        assert!(allowed("https://[::ffff:8.8.8.8]"));
        assert!(reason("https://[fe80::1]").contains("link-local"));
    }

    #[test]
    fn test_rejects_integer_encoded_hosts() {
        // 2130706433 == 127.0.0.1, 134744072 == 8.8.8.8.
        assert!(!allowed("https://2130706433"));
        assert!(!allowed("https://134744072"));
        assert!(!allowed("https://0x7f000001"));
        assert!(!allowed("https://017700000001"));
    }

    #[test]
    fn test_is_referentially_transparent() {
        let first = validate_outbound_url("https://8.8.8.8");
        for _ in 0..10 {
            assert_eq!(validate_outbound_url("https://8.8.8.8"), first);
        }
    }
}
