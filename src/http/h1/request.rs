//! Request targets and the GET request encoder.
//!
//! A [`Request`] is built once by the caller and never changes afterwards.
//! [`Request::encode`] produces the exact bytes queued on the transport:
//!
//! ```text
//! GET {path}[?query] HTTP/1.1\r\n
//! Host: {host}[:{port}]\r\n
//! Connection: keep-alive\r\n
//! Accept-Encoding: identity\r\n
//! {extra headers}\r\n
//! ```

use std::fmt;

/// URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain HTTP.
    Http,
    /// HTTPS (TLS).
    Https,
}

impl Scheme {
    /// Port used when the URL names none.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    /// Returns true for [`Scheme::Https`].
    #[must_use]
    pub const fn is_tls(self) -> bool {
        matches!(self, Self::Https)
    }

    /// Lowercase scheme name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// Why a URL was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    /// Only `http` and `https` are supported.
    #[error("unsupported scheme in {0:?}")]
    UnsupportedScheme(String),
    /// The authority has no host.
    #[error("missing host")]
    MissingHost,
    /// The host contains characters not allowed in a host name.
    #[error("invalid host {0:?}")]
    InvalidHost(String),
    /// The port is not a number in `1..=65535`.
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// A parsed `http`/`https` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    /// URL scheme.
    pub scheme: Scheme,
    /// Host name or IP literal, without IPv6 brackets.
    pub host: String,
    /// Port, defaulted from the scheme.
    pub port: u16,
    /// Path and query; never empty.
    pub path: String,
}

impl ParsedUrl {
    /// Parses an absolute `http://` or `https://` URL.
    ///
    /// The fragment is dropped. Userinfo is not supported.
    pub fn parse(url: &str) -> Result<Self, UrlError> {
        let url = url.trim();
        let (scheme, rest) = split_scheme(url)?;

        let rest = rest.split_once('#').map_or(rest, |(before, _)| before);
        let split = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, path) = rest.split_at(split);
        let path = if path.is_empty() {
            "/".to_owned()
        } else if path.starts_with('?') {
            format!("/{path}")
        } else {
            path.to_owned()
        };

        let (host, port) = split_authority(authority, scheme)?;
        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    /// Value of the `Host` header: the host, bracketed if IPv6, with the
    /// port appended when it is not the scheme default.
    #[must_use]
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

impl fmt::Display for ParsedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme.as_str(), self.authority(), self.path)
    }
}

fn split_scheme(url: &str) -> Result<(Scheme, &str), UrlError> {
    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(UrlError::UnsupportedScheme(url.to_owned()));
    };
    if scheme.eq_ignore_ascii_case("http") {
        Ok((Scheme::Http, rest))
    } else if scheme.eq_ignore_ascii_case("https") {
        Ok((Scheme::Https, rest))
    } else {
        Err(UrlError::UnsupportedScheme(scheme.to_owned()))
    }
}

fn split_authority(authority: &str, scheme: Scheme) -> Result<(String, u16), UrlError> {
    if authority.is_empty() {
        return Err(UrlError::MissingHost);
    }
    if authority.contains('@') {
        return Err(UrlError::InvalidHost(authority.to_owned()));
    }

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| UrlError::InvalidHost(authority.to_owned()))?;
        if host.parse::<std::net::Ipv6Addr>().is_err() {
            return Err(UrlError::InvalidHost(host.to_owned()));
        }
        let port = match after {
            "" => None,
            _ => Some(
                after
                    .strip_prefix(':')
                    .ok_or_else(|| UrlError::InvalidHost(authority.to_owned()))?,
            ),
        };
        (host, port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(UrlError::MissingHost);
    }
    if host.contains(|c: char| c.is_whitespace() || c.is_control() || c == '/' || c == '[') {
        return Err(UrlError::InvalidHost(host.to_owned()));
    }

    let port = match port {
        None | Some("") => scheme.default_port(),
        Some(raw) => match raw.parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => return Err(UrlError::InvalidPort(raw.to_owned())),
        },
    };
    Ok((host.to_owned(), port))
}

/// Header names the encoder always writes itself.
const FIXED_HEADERS: [&str; 3] = ["host", "connection", "accept-encoding"];

/// One GET request: target, extra headers, and the sink id its body goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    url: ParsedUrl,
    headers: Vec<(String, String)>,
    sink_id: String,
}

impl Request {
    /// Builds a GET for `url` whose body is stored under `sink_id`.
    pub fn get(url: &str, sink_id: impl Into<String>) -> Result<Self, UrlError> {
        Ok(Self::from_parsed(ParsedUrl::parse(url)?, sink_id))
    }

    /// Builds a GET for an already parsed URL.
    #[must_use]
    pub fn from_parsed(url: ParsedUrl, sink_id: impl Into<String>) -> Self {
        Self {
            url,
            headers: Vec::new(),
            sink_id: sink_id.into(),
        }
    }

    /// Adds a header.
    ///
    /// `Host`, `Connection`, and `Accept-Encoding` are always written by the
    /// encoder and user values for them are skipped, as are headers whose
    /// name or value contains CR or LF.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The target URL.
    #[must_use]
    pub fn url(&self) -> &ParsedUrl {
        &self.url
    }

    /// Extra headers in insertion order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Identifier handed to the sink with the body.
    #[must_use]
    pub fn sink_id(&self) -> &str {
        &self.sink_id
    }

    /// Serializes the request head.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.url.path.len());
        out.extend_from_slice(b"GET ");
        out.extend_from_slice(self.url.path.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\nHost: ");
        out.extend_from_slice(self.url.authority().as_bytes());
        out.extend_from_slice(b"\r\nConnection: keep-alive\r\nAccept-Encoding: identity\r\n");
        for (name, value) in self.headers.iter().filter(|(n, v)| emittable(n, v)) {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

fn emittable(name: &str, value: &str) -> bool {
    let breaks_line = |s: &str| s.bytes().any(|b| b == b'\r' || b == b'\n');
    !name.is_empty()
        && !name.contains(':')
        && !breaks_line(name)
        && !breaks_line(value)
        && !FIXED_HEADERS.iter().any(|f| name.eq_ignore_ascii_case(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults_port_and_path() {
        let url = ParsedUrl::parse("http://example.com").unwrap();
        assert_eq!(url.scheme, Scheme::Http);
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 80);
        assert_eq!(url.path, "/");

        let url = ParsedUrl::parse("https://example.com/a/b?x=1#frag").unwrap();
        assert_eq!(url.port, 443);
        assert_eq!(url.path, "/a/b?x=1");
    }

    #[test]
    fn parse_explicit_port_and_query_without_path() {
        let url = ParsedUrl::parse("HTTP://localhost:8080?q=2").unwrap();
        assert_eq!(url.port, 8080);
        assert_eq!(url.path, "/?q=2");
        assert_eq!(url.authority(), "localhost:8080");
    }

    #[test]
    fn parse_ipv6_literal() {
        let url = ParsedUrl::parse("http://[::1]:9000/x").unwrap();
        assert_eq!(url.host, "::1");
        assert_eq!(url.port, 9000);
        assert_eq!(url.authority(), "[::1]:9000");
        assert_eq!(url.to_string(), "http://[::1]:9000/x");

        let url = ParsedUrl::parse("https://[2001:db8::1]/").unwrap();
        assert_eq!(url.authority(), "[2001:db8::1]");
    }

    #[test]
    fn parse_rejects_bad_urls() {
        assert!(matches!(
            ParsedUrl::parse("ftp://example.com/"),
            Err(UrlError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            ParsedUrl::parse("example.com/"),
            Err(UrlError::UnsupportedScheme(_))
        ));
        assert_eq!(ParsedUrl::parse("http:///x"), Err(UrlError::MissingHost));
        assert_eq!(ParsedUrl::parse("http://:80/"), Err(UrlError::MissingHost));
        assert!(matches!(
            ParsedUrl::parse("http://host:99999/"),
            Err(UrlError::InvalidPort(_))
        ));
        assert!(matches!(
            ParsedUrl::parse("http://host:0/"),
            Err(UrlError::InvalidPort(_))
        ));
        assert!(matches!(
            ParsedUrl::parse("http://user@host/"),
            Err(UrlError::InvalidHost(_))
        ));
        assert!(matches!(
            ParsedUrl::parse("http://[nothex]/"),
            Err(UrlError::InvalidHost(_))
        ));
    }

    #[test]
    fn encode_minimal_get() {
        let request = Request::get("http://example.com/index.html?lang=en", "index").unwrap();
        assert_eq!(
            request.encode(),
            b"GET /index.html?lang=en HTTP/1.1\r\nHost: example.com\r\nConnection: keep-alive\r\nAccept-Encoding: identity\r\n\r\n"
        );
        assert_eq!(request.sink_id(), "index");
    }

    #[test]
    fn encode_keeps_non_default_port_in_host() {
        let request = Request::get("https://example.com:8443/", "x").unwrap();
        let wire = String::from_utf8(request.encode()).unwrap();
        assert!(wire.contains("\r\nHost: example.com:8443\r\n"));
    }

    #[test]
    fn extra_headers_follow_fixed_ones() {
        let request = Request::get("http://example.com/", "x")
            .unwrap()
            .with_header("User-Agent", "evfetch")
            .with_header("host", "evil.example")
            .with_header("X-Split", "a\r\nInjected: yes")
            .with_header("Accept", "*/*");
        let wire = String::from_utf8(request.encode()).unwrap();
        assert_eq!(
            wire,
            "GET / HTTP/1.1\r\nHost: example.com\r\nConnection: keep-alive\r\nAccept-Encoding: identity\r\nUser-Agent: evfetch\r\nAccept: */*\r\n\r\n"
        );
        assert_eq!(request.headers().len(), 4);
    }
}
