//! HTTP plumbing: request parsing, absolute-URI decomposition, upstream
//! header rewriting, and synthetic error pages.

use bytes::Bytes;

/// User-Agent presented to origin servers.
pub const USER_AGENT: &str = "tinysquid/0.1";

/// Client headers the proxy owns; inbound copies are dropped and replaced
/// with proxy-controlled values. Field-name match is exact.
const SUPPRESSED_HEADERS: [&str; 4] = ["Host", "User-Agent", "Connection", "Proxy-Connection"];

/// A parsed inbound request: method, the raw URI token from the request
/// line, and the header fields in arrival order.
#[derive(Debug)]
pub struct ParsedRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

/// Where a request is bound: origin host, port, and origin-form path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl RequestTarget {
    /// Canonical cache key: `host + path`, no scheme and no port.
    pub fn cache_key(&self) -> String {
        format!("{}{}", self.host, self.path)
    }
}

/// Parse a complete request head. Returns `None` while the head is still
/// incomplete or when it is malformed.
pub fn parse_request(data: &[u8]) -> Option<ParsedRequest> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(data) {
        Ok(httparse::Status::Complete(_)) => Some(ParsedRequest {
            method: req.method?.to_string(),
            uri: req.path?.to_string(),
            headers: req
                .headers
                .iter()
                .map(|h| {
                    (
                        h.name.to_string(),
                        String::from_utf8_lossy(h.value).into_owned(),
                    )
                })
                .collect(),
        }),
        _ => None,
    }
}

/// Decompose an absolute URI into host, port, and path.
///
/// Accepts `http://host[:port][/path]` and the scheme-less
/// `host[:port][/path]`. The port defaults to 80; a missing path comes
/// back empty. Ill-formed authorities are not rejected here - a bogus
/// host simply fails at dial time.
pub fn parse_uri(uri: &str) -> RequestTarget {
    // Skip past the scheme marker if there is one.
    let rest = match uri.find("//") {
        Some(pos) => &uri[pos + 2..],
        None => uri,
    };

    let (authority, path) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => (rest, ""),
    };

    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(80)),
        None => (authority, 80),
    };

    RequestTarget {
        host: host.to_string(),
        port,
        path: path.to_string(),
    }
}

/// Build the upstream request: a downgraded HTTP/1.0 GET, the client's
/// headers minus the suppressed set, then the proxy-forced `Host`,
/// `User-Agent`, `Connection: close`, and `Proxy-Connection: close`.
pub fn build_upstream_request(target: &RequestTarget, headers: &[(String, String)]) -> Bytes {
    let path = if target.path.is_empty() {
        "/"
    } else {
        target.path.as_str()
    };

    let mut out = String::with_capacity(256);
    out.push_str("GET ");
    out.push_str(path);
    out.push_str(" HTTP/1.0\r\n");

    for (name, value) in headers {
        if SUPPRESSED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }

    out.push_str(&format!("Host: {}:{}\r\n", target.host, target.port));
    out.push_str(&format!("User-Agent: {USER_AGENT}\r\n"));
    out.push_str("Connection: close\r\n");
    out.push_str("Proxy-Connection: close\r\n");
    out.push_str("\r\n");

    Bytes::from(out)
}

/// Render a synthetic error response in the Tiny error-page layout.
pub fn error_page(code: u16, short: &str, cause: &str, detail: &str) -> Bytes {
    let body = format!(
        "<html><title>Tiny Error</title><body bgcolor=\"ffffff\">\r\n\
         {code}: {short}\r\n\
         <p>{detail}: {cause}\r\n\
         <hr><em>The Tiny Web server</em>\r\n"
    );
    let mut out = format!(
        "HTTP/1.0 {code} {short}\r\n\
         Content-type: text/html\r\n\
         Content-length: {}\r\n\r\n",
        body.len()
    );
    out.push_str(&body);
    Bytes::from(out)
}
