use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Per-request client characteristics, passed explicitly by the web layer.
/// There is no request-scoped global state anywhere in the crate.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    /// The raw `User-Agent` header, if any.
    pub user_agent: Option<String>,
    /// The peer address, after any trusted-proxy resolution by the caller.
    pub source_addr: Option<IpAddr>,
    /// Whether the request arrived over a confidential channel. Drives the
    /// cookie's `Secure` attribute.
    pub secure_transport: bool,
}

impl ClientContext {
    /// Normalized user-agent fingerprint: trimmed, lowercased, truncated.
    pub fn ua_fingerprint(&self) -> Option<String> {
        self.user_agent.as_deref().map(normalize_user_agent)
    }

    /// Network prefix of the source address: /24 for IPv4, /64 for IPv6.
    /// Coarse on purpose; exact-IP comparison breaks mobile users.
    pub fn ip_prefix(&self) -> Option<String> {
        self.source_addr.map(|addr| match addr {
            IpAddr::V4(v4) => {
                let [a, b, c, _] = v4.octets();
                format!("{a}.{b}.{c}.0/24")
            }
            IpAddr::V6(v6) => {
                let s = v6.segments();
                format!("{:x}:{:x}:{:x}:{:x}::/64", s[0], s[1], s[2], s[3])
            }
        })
    }

    /// The binding captured into a freshly minted session.
    pub fn binding(&self) -> SessionBinding {
        SessionBinding {
            user_agent_fingerprint: self.ua_fingerprint(),
            ip_prefix: self.ip_prefix(),
        }
    }
}

/// Longest user-agent fingerprint kept, in bytes.
const MAX_UA_BYTES: usize = 256;

fn normalize_user_agent(ua: &str) -> String {
    let mut fp = ua.trim().to_lowercase();
    if fp.len() > MAX_UA_BYTES {
        // Back off to a char boundary; truncating mid-codepoint panics.
        let mut cut = MAX_UA_BYTES;
        while !fp.is_char_boundary(cut) {
            cut -= 1;
        }
        fp.truncate(cut);
    }
    fp
}

/// Client characteristics a session was bound to at mint time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionBinding {
    pub user_agent_fingerprint: Option<String>,
    pub ip_prefix: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(ua: &str, addr: &str) -> ClientContext {
        ClientContext {
            user_agent: Some(ua.to_string()),
            source_addr: Some(addr.parse().unwrap()),
            secure_transport: true,
        }
    }

    #[test]
    fn ua_fingerprint_is_normalized() {
        let a = ctx("  Mozilla/5.0 (X11; Linux) ", "10.0.0.1");
        let b = ctx("mozilla/5.0 (x11; linux)", "10.0.0.1");
        assert_eq!(a.ua_fingerprint(), b.ua_fingerprint());
    }

    #[test]
    fn long_multibyte_user_agent_truncates_on_a_char_boundary() {
        // 100 three-byte codepoints; byte 256 falls inside one of them.
        let long = "あ".repeat(100);
        let fp = ctx(&long, "10.0.0.1").ua_fingerprint().unwrap();
        assert!(fp.len() <= 256);
        assert!(fp.chars().all(|c| c == 'あ'));
    }

    #[test]
    fn long_ascii_user_agent_truncates_to_the_byte_limit() {
        let long = "x".repeat(1000);
        let fp = ctx(&long, "10.0.0.1").ua_fingerprint().unwrap();
        assert_eq!(fp.len(), 256);
    }

    #[test]
    fn ipv4_prefix_is_slash_24() {
        assert_eq!(
            ctx("ua", "203.0.113.57").ip_prefix().unwrap(),
            "203.0.113.0/24"
        );
        assert_eq!(
            ctx("ua", "203.0.113.200").ip_prefix().unwrap(),
            "203.0.113.0/24"
        );
    }

    #[test]
    fn ipv6_prefix_is_slash_64() {
        let p = ctx("ua", "2001:db8:1:2:aaaa:bbbb:cccc:dddd")
            .ip_prefix()
            .unwrap();
        assert_eq!(p, "2001:db8:1:2::/64");
    }

    #[test]
    fn empty_context_binds_to_nothing() {
        let binding = ClientContext::default().binding();
        assert_eq!(binding, SessionBinding::default());
    }
}
