//! # HTTP Head Parser
//!
//! Parses the first HTTP request line and headers from a client's opening
//! bytes, just enough to recognise an HTTP `CONNECT host:port` priming
//! handshake. This is intentionally not a general HTTP parser: it only ever
//! sees one head per session, and a non-`CONNECT` request carrying a body
//! is rejected rather than guessed at (see the `Content-Length` note on
//! `parse` below).

const CRLF: &str = "\r\n";

/// A parsed HTTP request head: the request line plus headers.
///
/// Header lookups are case-insensitive; the stored keys are lowercased on
/// insertion and `header` lowercases its argument before looking up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHead {
    pub method: String,
    pub target: String,
    pub version: String,
    headers: Vec<(String, String)>,
    pub body_prefix: Vec<u8>,
}

impl HttpHead {
    /// Looks up a header value by name, case-insensitively. Returns the
    /// last occurrence if the header was repeated (duplicate names are
    /// last-wins, both on parse and here).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the `(host, port)` authority of a `CONNECT` target, if this
    /// head is a `CONNECT` request with a well-formed `host:port` target.
    pub fn connect_authority(&self) -> Option<(String, u16)> {
        if !self.method.eq_ignore_ascii_case("CONNECT") {
            return None;
        }
        let (host, port) = self.target.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        Some((host.to_string(), port))
    }

    /// Reconstructs a canonical head suitable for forwarding to a backend:
    /// `METHOD target version CRLF`, each header `name: value CRLF`, a
    /// blank CRLF, then the body prefix.
    pub fn build(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}{}", self.method, self.target, self.version, CRLF);
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str(CRLF);
        }
        out.push_str(CRLF);
        let mut out = out.into_bytes();
        out.extend_from_slice(&self.body_prefix);
        out
    }
}

/// Parses a byte buffer believed to contain one HTTP request head
/// terminated by CRLFCRLF.
///
/// Fails if the first line has fewer than three whitespace-separated
/// tokens, if the buffer is not valid UTF-8, or if no CRLFCRLF terminator
/// is present.
///
/// Body handling: if `Content-Length` is present, this implementation
/// returns an error rather than slicing a body out of the buffer. A
/// byte-accurate body offset would need the header value as an index into
/// the raw buffer, not the CRLF-split line list; in practice only
/// `CONNECT` requests (which never carry a body) reach this parser, so
/// body slicing is left unimplemented and anything that would need it is
/// rejected instead.
pub fn parse(buf: &[u8]) -> Result<HttpHead, String> {
    let head_end = find_head_end(buf).ok_or_else(|| "no CRLFCRLF terminator".to_string())?;
    let text = std::str::from_utf8(&buf[..head_end])
        .map_err(|e| format!("head is not valid UTF-8: {e}"))?;

    let mut lines = text.split(CRLF);
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next();
    let target = parts.next();
    let version = parts.next();
    let (method, target, version) = match (method, target, version) {
        (Some(m), Some(t), Some(v)) => (m.to_string(), t.to_string(), v.to_string()),
        _ => return Err(format!("request line has fewer than 3 tokens: {request_line:?}")),
    };

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("header line missing ':': {line:?}"))?;
        let name = name.trim().to_string();
        let value = value.trim().to_string();

        if let Some(existing) = headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            existing.1 = value;
        } else {
            headers.push((name, value));
        }
    }

    if headers
        .iter()
        .any(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        && !method.eq_ignore_ascii_case("CONNECT")
    {
        return Err("non-CONNECT request with Content-Length is not supported".to_string());
    }

    Ok(HttpHead {
        method,
        target,
        version,
        headers,
        body_prefix: Vec::new(),
    })
}

/// Finds the index at which the CRLFCRLF-terminated head ends (the start
/// of whatever follows the blank line), or `None` if no terminator exists.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_request() {
        let raw = b"CONNECT example.com:22 HTTP/1.1\r\nHost: example.com:22\r\n\r\n";
        let head = parse(raw).unwrap();
        assert_eq!(head.method, "CONNECT");
        assert_eq!(head.target, "example.com:22");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.header("host"), Some("example.com:22"));
        assert_eq!(
            head.connect_authority(),
            Some(("example.com".to_string(), 22))
        );
    }

    #[test]
    fn missing_terminator_is_malformed() {
        let raw = b"CONNECT example.com:22 HTTP/1.1\r\nHost: example.com:22\r\n";
        assert!(parse(raw).is_err());
    }

    #[test]
    fn short_request_line_is_malformed() {
        let raw = b"CONNECT example.com:22\r\n\r\n";
        assert!(parse(raw).is_err());
    }

    #[test]
    fn duplicate_headers_last_wins() {
        let raw = b"CONNECT a:1 HTTP/1.1\r\nX-Foo: one\r\nX-Foo: two\r\n\r\n";
        let head = parse(raw).unwrap();
        assert_eq!(head.header("x-foo"), Some("two"));
    }

    #[test]
    fn content_length_on_non_connect_is_rejected() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc";
        assert!(parse(raw).is_err());
    }

    #[test]
    fn parse_build_parse_round_trip() {
        let raw = b"CONNECT a.b:443 HTTP/1.1\r\nHost: a.b:443\r\nX-A: 1\r\n\r\n";
        let head = parse(raw).unwrap();
        let rebuilt = head.build();
        let reparsed = parse(&rebuilt).unwrap();
        assert_eq!(head.method, reparsed.method);
        assert_eq!(head.target, reparsed.target);
        assert_eq!(head.version, reparsed.version);
        assert_eq!(head.header("host"), reparsed.header("host"));
        assert_eq!(head.header("x-a"), reparsed.header("x-a"));
    }

    #[test]
    fn header_value_is_trimmed() {
        let raw = b"CONNECT a:1 HTTP/1.1\r\nHost:   a:1   \r\n\r\n";
        let head = parse(raw).unwrap();
        assert_eq!(head.header("host"), Some("a:1"));
    }
}
