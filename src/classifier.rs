//! # Payload Classifier
//!
//! Classifies a client's first bytes into the upstream protocol the proxy
//! should dial. This is a pure function: identical prefixes always yield
//! identical results, and classification never inspects more than the bytes
//! it is given.

use std::fmt;

/// The upstream protocol a session has been classified as, or `Unknown`
/// while classification is still pending.
///
/// `Unknown` is the initial value for every session; once a session
/// classifies to one of the other variants it never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    Ssh,
    OpenVpn,
    V2Ray,
    Unknown,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolKind::Ssh => "ssh",
            ProtocolKind::OpenVpn => "openvpn",
            ProtocolKind::V2Ray => "v2ray",
            ProtocolKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

const SSH_PREFIX: &[u8] = b"SSH-";

/// Classifies a byte prefix into a `ProtocolKind`.
///
/// Rules are evaluated in order, first match wins:
/// 1. `0x00 0x68 ...` -> OpenVpn
/// 2. `0x00 ...` (anything else, including a single `0x00` byte) -> V2Ray
/// 3. `SSH-` -> Ssh
/// 4. otherwise -> Unknown
///
/// The ordering is load-bearing: OpenVPN's pattern must be checked before
/// the more general V2Ray one, and a lone `0x00` byte is classified V2Ray
/// rather than treated as "not enough data yet" — there is no minimum
/// length guard on the second rule.
pub fn classify(data: &[u8]) -> ProtocolKind {
    if data.is_empty() {
        return ProtocolKind::Unknown;
    }

    if data[0] == 0x00 {
        if data.len() >= 2 && data[1] == 0x68 {
            return ProtocolKind::OpenVpn;
        }
        return ProtocolKind::V2Ray;
    }

    if data.starts_with(SSH_PREFIX) {
        return ProtocolKind::Ssh;
    }

    ProtocolKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_unknown() {
        assert_eq!(classify(&[]), ProtocolKind::Unknown);
    }

    #[test]
    fn lone_zero_byte_is_v2ray() {
        assert_eq!(classify(&[0x00]), ProtocolKind::V2Ray);
    }

    #[test]
    fn openvpn_prefix_wins_over_v2ray() {
        assert_eq!(classify(&[0x00, 0x68, 0x38, 0x01]), ProtocolKind::OpenVpn);
    }

    #[test]
    fn zero_followed_by_other_byte_is_v2ray() {
        assert_eq!(classify(&[0x00, 0x01, 0x02]), ProtocolKind::V2Ray);
    }

    #[test]
    fn ssh_greeting_is_classified() {
        assert_eq!(classify(b"SSH-2.0-OpenSSH_9.0\r\n"), ProtocolKind::Ssh);
    }

    #[test]
    fn unrecognised_text_is_unknown() {
        assert_eq!(classify(b"hello world"), ProtocolKind::Unknown);
    }

    #[test]
    fn classifier_is_pure() {
        let data = b"SSH-2.0-x";
        assert_eq!(classify(data), classify(data));
    }

    #[test]
    fn http_connect_prefix_is_unknown_at_this_layer() {
        // CONNECT priming is recognised one layer up, by the HTTP head
        // parser; the classifier itself never special-cases it.
        assert_eq!(
            classify(b"CONNECT example:22 HTTP/1.1\r\n"),
            ProtocolKind::Unknown
        );
    }
}
