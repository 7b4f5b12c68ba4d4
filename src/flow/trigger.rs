use crate::gateway::{HttpRequestContainer, ProxyReply, ReplyHandle, RequestBridgeQueue};
use crate::security::result::{roles_of, scopes_of};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

pub const ATTR_REQUEST_ID: &str = "http.request.id";
pub const ATTR_METHOD: &str = "http.method";
pub const ATTR_PATH: &str = "http.path";
pub const ATTR_ROUTE: &str = "http.route";
pub const ATTR_REMOTE_ADDR: &str = "http.remote.addr";
pub const ATTR_RECEIVED_AT: &str = "http.received.at";
pub const ATTR_HEADER_PREFIX: &str = "http.header.";
pub const ATTR_QUERY_PREFIX: &str = "http.query.";
pub const ATTR_PARAM_PREFIX: &str = "http.param.";
pub const ATTR_CONTENT_TYPE: &str = "http.content.type";

/// Request headers never copied onto a flow unit.
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "proxy-authorization", "cookie"];

pub const ATTR_JWT_VALID: &str = "jwt.valid";
pub const ATTR_JWT_ISSUER: &str = "jwt.issuer";
pub const ATTR_JWT_SUBJECT: &str = "jwt.subject";
pub const ATTR_JWT_SCOPES: &str = "jwt.scopes";
pub const ATTR_JWT_ROLES: &str = "jwt.roles";
pub const ATTR_JWT_CLAIMS: &str = "jwt.claims";

/// Default number of containers taken per trigger cycle.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Host-framework unit of work: string attributes plus opaque content.
#[derive(Debug, Default)]
pub struct FlowUnit {
    pub attributes: BTreeMap<String, String>,
    pub content: Vec<u8>,
    reply: Option<ReplyHandle>,
}

impl FlowUnit {
    #[must_use]
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            attributes: BTreeMap::new(),
            content,
            reply: None,
        }
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Header value copied from the originating HTTP request.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.attribute(&format!("{ATTR_HEADER_PREFIX}{}", name.to_ascii_lowercase()))
    }

    /// Whether an HTTP client is still waiting for [`FlowUnit::respond`].
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Answer the waiting client (proxy mode). Returns false when there is no
    /// waiting client or it has already timed out.
    pub fn respond(&mut self, reply: ProxyReply) -> bool {
        match self.reply.take() {
            Some(handle) => handle.send(reply),
            None => false,
        }
    }
}

/// Scheduled consumer of the bridge queue.
pub struct GatewayTrigger {
    queue: Arc<RequestBridgeQueue>,
    batch_size: usize,
}

impl GatewayTrigger {
    #[must_use]
    pub fn new(queue: Arc<RequestBridgeQueue>, batch_size: usize) -> Self {
        Self {
            queue,
            batch_size: batch_size.max(1),
        }
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// One trigger cycle: drain a batch and materialise it, preserving arrival order.
    ///
    /// Proxied requests whose client has already timed out are discarded here
    /// rather than processed late.
    #[must_use]
    pub fn on_trigger(&self) -> Vec<FlowUnit> {
        let batch = self.queue.drain(self.batch_size);
        if !batch.is_empty() {
            debug!(units = batch.len(), "Materialising flow units");
        }
        batch
            .into_iter()
            .filter(|container| {
                let abandoned = container.is_abandoned();
                if abandoned {
                    debug!(request_id = %container.request_id(), "Skipping request abandoned by its client");
                }
                !abandoned
            })
            .map(materialize)
            .collect()
    }
}

/// Convert one container into a flow unit.
#[must_use]
pub fn materialize(mut container: HttpRequestContainer) -> FlowUnit {
    let (content, reply) = container.take_parts();
    let mut unit = FlowUnit {
        attributes: BTreeMap::new(),
        content,
        reply,
    };

    unit.set_attribute(ATTR_REQUEST_ID, container.request_id().to_string());
    unit.set_attribute(ATTR_METHOD, container.method());
    unit.set_attribute(ATTR_PATH, container.path());
    unit.set_attribute(ATTR_ROUTE, container.route());
    unit.set_attribute(ATTR_RECEIVED_AT, container.received_at().to_rfc3339());
    if let Some(addr) = container.remote_addr() {
        unit.set_attribute(ATTR_REMOTE_ADDR, addr.to_string());
    }
    // credentials stay behind; the validated identity travels as jwt.*
    for (name, value) in container.headers() {
        if CREDENTIAL_HEADERS.contains(&name.as_str()) {
            continue;
        }
        unit.set_attribute(format!("{ATTR_HEADER_PREFIX}{name}"), value.as_str());
    }
    for (name, value) in container.query_params() {
        unit.set_attribute(format!("{ATTR_QUERY_PREFIX}{name}"), value.as_str());
    }
    for (name, value) in container.path_params() {
        unit.set_attribute(format!("{ATTR_PARAM_PREFIX}{name}"), value.as_str());
    }
    if let Some(content_type) = container.content_type() {
        unit.set_attribute(ATTR_CONTENT_TYPE, content_type);
    }

    if let Some(claims) = container.claims() {
        unit.set_attribute(ATTR_JWT_VALID, "true");
        if let Some(issuer) = container.issuer() {
            unit.set_attribute(ATTR_JWT_ISSUER, issuer);
        }
        if let Some(sub) = claims.get("sub").and_then(|v| v.as_str()) {
            unit.set_attribute(ATTR_JWT_SUBJECT, sub);
        }
        unit.set_attribute(ATTR_JWT_SCOPES, scopes_of(claims).join(" "));
        unit.set_attribute(ATTR_JWT_ROLES, roles_of(claims).join(" "));
        unit.set_attribute(ATTR_JWT_CLAIMS, claims.to_string());
    }

    trace!(request_id = %container.request_id(), attributes = unit.attributes.len(), "Flow unit ready");
    unit
}
