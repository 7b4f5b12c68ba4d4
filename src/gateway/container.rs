//! The unit handed from HTTP worker threads to the flow trigger.

use crate::ids::RequestId;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvError, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;

/// Response the consumer produces for a proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProxyReply {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// One-shot channel back to the HTTP thread waiting on a proxied request.
pub struct ReplyHandle {
    tx: SyncSender<ProxyReply>,
    abandoned: Arc<AtomicBool>,
}

impl std::fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyHandle")
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

impl ReplyHandle {
    /// Handle plus the waiter the HTTP thread blocks on.
    #[must_use]
    pub fn pair() -> (Self, ReplyWaiter) {
        let (tx, rx) = mpsc::sync_channel(1);
        let abandoned = Arc::new(AtomicBool::new(false));
        (
            Self {
                tx,
                abandoned: Arc::clone(&abandoned),
            },
            ReplyWaiter { rx, abandoned },
        )
    }

    /// Deliver the reply. Returns false if the HTTP side already gave up.
    pub fn send(self, reply: ProxyReply) -> bool {
        match self.tx.try_send(reply) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }

    /// The HTTP client is no longer waiting (timed out or disconnected).
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }
}

/// Receiving end of a [`ReplyHandle`]. Dropping it marks the handle abandoned.
pub struct ReplyWaiter {
    rx: Receiver<ProxyReply>,
    abandoned: Arc<AtomicBool>,
}

impl ReplyWaiter {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ProxyReply, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn recv(&self) -> Result<ProxyReply, RecvError> {
        self.rx.recv()
    }
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        self.abandoned.store(true, Ordering::Release);
    }
}

/// Everything the downstream needs about one authenticated request.
///
/// Built once by the gateway handler; read-only afterwards apart from
/// [`take_parts`](Self::take_parts), which moves the body and reply handle out
/// when the trigger materialises it.
#[derive(Debug)]
pub struct HttpRequestContainer {
    request_id: RequestId,
    received_at: DateTime<Utc>,
    method: String,
    path: String,
    query_params: HashMap<String, String>,
    path_params: BTreeMap<String, String>,
    // lowercased names
    headers: HashMap<String, String>,
    remote_addr: Option<SocketAddr>,
    route: String,
    issuer: Option<String>,
    claims: Option<Value>,
    body: Vec<u8>,
    reply: Option<ReplyHandle>,
}

impl HttpRequestContainer {
    #[must_use]
    pub fn new(request_id: RequestId, method: &str, path: &str, route: &str) -> Self {
        Self {
            request_id,
            received_at: Utc::now(),
            method: method.to_string(),
            path: path.to_string(),
            query_params: HashMap::new(),
            path_params: BTreeMap::new(),
            headers: HashMap::new(),
            remote_addr: None,
            route: route.to_string(),
            issuer: None,
            claims: None,
            body: Vec::new(),
            reply: None,
        }
    }

    /// Header names are lowercased on the way in.
    #[must_use]
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.headers = headers
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
            .collect();
        self
    }

    #[must_use]
    pub fn with_query_params(mut self, params: HashMap<String, String>) -> Self {
        self.query_params = params;
        self
    }

    #[must_use]
    pub fn with_path_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.path_params = params;
        self
    }

    #[must_use]
    pub fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }

    /// Attach the validated token's issuer name and claims.
    #[must_use]
    pub fn with_identity(mut self, issuer: Option<String>, claims: Option<Value>) -> Self {
        self.issuer = issuer;
        self.claims = claims;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_reply(mut self, reply: ReplyHandle) -> Self {
        self.reply = Some(reply);
        self
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    #[must_use]
    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    #[must_use]
    pub fn path_params(&self) -> &BTreeMap<String, String> {
        &self.path_params
    }

    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    #[must_use]
    pub fn claims(&self) -> Option<&Value> {
        self.claims.as_ref()
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Media type of the body without parameters, e.g. `application/json`.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.claims.as_ref()?.get("sub")?.as_str()
    }

    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Proxied request whose client already received its 503.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.reply.as_ref().is_some_and(ReplyHandle::is_abandoned)
    }

    /// Split off the body and the reply handle, leaving the metadata.
    pub(crate) fn take_parts(&mut self) -> (Vec<u8>, Option<ReplyHandle>) {
        (std::mem::take(&mut self.body), self.reply.take())
    }
}
