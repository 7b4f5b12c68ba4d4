use http::Method;
use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;
use tracing::debug;

/// Request body as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Complete(Vec<u8>),
    /// The body exceeded the configured limit; only its announced or observed
    /// length is kept.
    TooLarge { length: usize },
}

impl RequestBody {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        match self {
            RequestBody::Complete(bytes) => bytes,
            RequestBody::TooLarge { .. } => &[],
        }
    }
}

/// Transport-independent view of one inbound HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRequest {
    pub method: Method,
    /// Raw request target, including any query string
    pub url: String,
    /// Header names lowercased; repeated headers are joined with `, `
    pub headers: HashMap<String, String>,
    pub remote_addr: Option<SocketAddr>,
    pub body: RequestBody,
}

impl GatewayRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            remote_addr: None,
            body: RequestBody::Complete(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        insert_header(&mut self.headers, name, &value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = RequestBody::Complete(body.into());
        self
    }

    /// Path component of the request target.
    #[must_use]
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }

    #[must_use]
    pub fn query_params(&self) -> HashMap<String, String> {
        parse_query_params(&self.url)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Bearer credential from the `Authorization` header, if well formed.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization").and_then(extract_bearer)
    }
}

/// Add a header under its lowercased name, joining repeats.
pub(crate) fn insert_header(headers: &mut HashMap<String, String>, name: &str, value: &str) {
    let key = name.to_ascii_lowercase();
    match headers.get_mut(&key) {
        Some(existing) => {
            existing.push_str(", ");
            existing.push_str(value);
        }
        None => {
            headers.insert(key, value.to_string());
        }
    }
}

/// Parse query string parameters from a request target.
///
/// Names and values are URL-decoded; the last occurrence of a name wins.
#[must_use]
pub fn parse_query_params(url: &str) -> HashMap<String, String> {
    match url.split_once('?') {
        Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        None => HashMap::new(),
    }
}

/// Extract the credential from an `Authorization: Bearer <token>` value.
///
/// The scheme is matched case-insensitively. Any other scheme, an empty
/// credential or a credential containing whitespace yields `None`.
#[must_use]
pub fn extract_bearer(value: &str) -> Option<&str> {
    let value = value.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

/// Read at most `limit` bytes of body.
///
/// A body whose announced length already exceeds the limit is not read at all.
/// A chunked body that grows past the limit is cut off and reported as too large.
pub fn read_body_limited<R: Read + ?Sized>(
    reader: &mut R,
    announced: Option<usize>,
    limit: usize,
) -> std::io::Result<RequestBody> {
    if let Some(length) = announced {
        if length > limit {
            debug!(length, limit, "Request body rejected by announced length");
            return Ok(RequestBody::TooLarge { length });
        }
    }

    let mut body = Vec::with_capacity(announced.unwrap_or(0));
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let read = reader.take(cap).read_to_end(&mut body)?;
    if read > limit {
        debug!(limit, "Request body exceeded limit while reading");
        return Ok(RequestBody::TooLarge { length: read });
    }
    Ok(RequestBody::Complete(body))
}
