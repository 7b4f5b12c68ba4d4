//! Per-request gateway pipeline.
//!
//! `route -> body size -> bearer token -> token validation -> schema -> enqueue`.
//! Each step either advances or ends the request with a fixed status. The
//! handler is transport independent: the listener turns wire requests into
//! [`GatewayRequest`]s and writes back the [`GatewayResponse`].

use super::container::{HttpRequestContainer, ReplyHandle};
use super::queue::RequestBridgeQueue;
use super::request::{GatewayRequest, RequestBody};
use super::response::GatewayResponse;
use super::routes::{GatewayRouteTable, RouteMatch};
use crate::config::{GatewayMode, GatewaySettings};
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use crate::security::{ErrorCategory, TokenValidator};
use serde_json::json;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Terminal state of one gateway request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    RouteNotFound,
    PayloadTooLarge,
    TokenMissing,
    TokenRejected(ErrorCategory),
    SchemaInvalid,
    QueueFull,
    DownstreamTimeout,
    Accepted,
    /// Consumer replied with this status
    Proxied(u16),
}

impl GatewayOutcome {
    #[must_use]
    pub fn status(self) -> u16 {
        match self {
            GatewayOutcome::RouteNotFound => 404,
            GatewayOutcome::PayloadTooLarge => 413,
            GatewayOutcome::TokenMissing | GatewayOutcome::TokenRejected(_) => 401,
            GatewayOutcome::SchemaInvalid => 400,
            GatewayOutcome::QueueFull | GatewayOutcome::DownstreamTimeout => 503,
            GatewayOutcome::Accepted => 200,
            GatewayOutcome::Proxied(status) => status,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayOutcome::RouteNotFound => "ROUTE_NOT_FOUND",
            GatewayOutcome::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            GatewayOutcome::TokenMissing => "TOKEN_MISSING",
            GatewayOutcome::TokenRejected(_) => "TOKEN_REJECTED",
            GatewayOutcome::SchemaInvalid => "SCHEMA_INVALID",
            GatewayOutcome::QueueFull => "QUEUE_FULL",
            GatewayOutcome::DownstreamTimeout => "DOWNSTREAM_TIMEOUT",
            GatewayOutcome::Accepted => "ACCEPTED",
            GatewayOutcome::Proxied(_) => "PROXIED",
        }
    }
}

/// Outcome plus the response to send.
#[derive(Debug, Clone)]
pub struct GatewayReply {
    pub request_id: RequestId,
    pub outcome: GatewayOutcome,
    pub response: GatewayResponse,
}

/// Runs the gateway pipeline against the current route table.
pub struct GatewayRequestHandler {
    routes: Arc<GatewayRouteTable>,
    validator: Arc<TokenValidator>,
    queue: Arc<RequestBridgeQueue>,
    mode: GatewayMode,
    proxy_timeout: Duration,
    max_body_bytes: usize,
}

impl GatewayRequestHandler {
    pub fn new(
        routes: Arc<GatewayRouteTable>,
        validator: Arc<TokenValidator>,
        queue: Arc<RequestBridgeQueue>,
        settings: &GatewaySettings,
    ) -> Self {
        Self {
            routes,
            validator,
            queue,
            mode: settings.mode,
            proxy_timeout: settings.proxy_timeout,
            max_body_bytes: settings.max_body_bytes,
        }
    }

    #[must_use]
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    #[must_use]
    pub fn mode(&self) -> GatewayMode {
        self.mode
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<RequestBridgeQueue> {
        &self.queue
    }

    /// Run one request to completion. In proxy mode this blocks the calling
    /// thread for at most the proxy timeout.
    pub fn handle(&self, request: GatewayRequest) -> GatewayReply {
        let started = Instant::now();
        let request_id = RequestId::from_header_or_new(request.header(REQUEST_ID_HEADER));
        let (outcome, response) = self.run(request, request_id);

        debug!(
            %request_id,
            outcome = outcome.as_str(),
            status = outcome.status(),
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            "Gateway request finished"
        );

        GatewayReply {
            request_id,
            outcome,
            response: response.with_header("X-Request-Id", &request_id.to_string()),
        }
    }

    fn run(
        &self,
        request: GatewayRequest,
        request_id: RequestId,
    ) -> (GatewayOutcome, GatewayResponse) {
        let Some(matched) = self.routes.find(request.path(), &request.method) else {
            debug!(%request_id, method = %request.method, path = request.path(), "No route");
            return reject(
                GatewayOutcome::RouteNotFound,
                "not_found",
                &format!("no route for {} {}", request.method, request.path()),
            );
        };

        if let RequestBody::TooLarge { length } = request.body {
            debug!(%request_id, route = matched.route.name(), length, limit = self.max_body_bytes, "Body too large");
            return reject(
                GatewayOutcome::PayloadTooLarge,
                "payload_too_large",
                &format!("request body exceeds {} bytes", self.max_body_bytes),
            );
        }

        let Some(token) = request.bearer_token() else {
            let message = if request.header("authorization").is_some() {
                "authorization header is not a bearer token"
            } else {
                "missing bearer token"
            };
            let (outcome, response) = reject(GatewayOutcome::TokenMissing, "unauthorized", message);
            return (outcome, response.with_header("WWW-Authenticate", "Bearer"));
        };

        let result = self
            .validator
            .validate_with_policy(token, &matched.route.config().policy);
        if let Some(error) = result.error() {
            debug!(
                %request_id,
                route = matched.route.name(),
                issuer = result.issuer_name().unwrap_or("-"),
                category = error.category.as_str(),
                "Token rejected"
            );
            let outcome = GatewayOutcome::TokenRejected(error.category);
            let response = GatewayResponse::json_error(
                outcome.status(),
                "unauthorized",
                error.category.description(),
                Some(json!({ "category": error.category.as_str() })),
            )
            .with_header("WWW-Authenticate", "Bearer error=\"invalid_token\"");
            return (outcome, response);
        }

        if let Err(errors) = matched.route.validate_body(request.body.bytes()) {
            debug!(%request_id, route = matched.route.name(), errors = errors.len(), "Schema validation failed");
            let outcome = GatewayOutcome::SchemaInvalid;
            let response = GatewayResponse::json_error(
                outcome.status(),
                "bad_request",
                "request body failed schema validation",
                Some(json!({ "details": errors })),
            );
            return (outcome, response);
        }

        let container = build_container(request, request_id, &matched)
            .with_identity(result.issuer_name().map(str::to_string), result.claims().cloned());

        match self.mode {
            GatewayMode::Accept => self.enqueue_and_accept(container, request_id),
            GatewayMode::Proxy => self.enqueue_and_wait(container, request_id),
        }
    }

    fn enqueue_and_accept(
        &self,
        container: HttpRequestContainer,
        request_id: RequestId,
    ) -> (GatewayOutcome, GatewayResponse) {
        if !self.queue.offer(container) {
            return queue_full(request_id, self.queue.capacity());
        }
        let outcome = GatewayOutcome::Accepted;
        let response = GatewayResponse::json(
            outcome.status(),
            &json!({ "status": "accepted", "requestId": request_id.to_string() }),
        );
        (outcome, response)
    }

    fn enqueue_and_wait(
        &self,
        container: HttpRequestContainer,
        request_id: RequestId,
    ) -> (GatewayOutcome, GatewayResponse) {
        // dropping the waiter on timeout marks the queued container abandoned
        let (handle, waiter) = ReplyHandle::pair();
        if !self.queue.offer(container.with_reply(handle)) {
            return queue_full(request_id, self.queue.capacity());
        }

        match waiter.recv_timeout(self.proxy_timeout) {
            Ok(reply) => {
                let outcome = GatewayOutcome::Proxied(reply.status);
                let mut response = GatewayResponse::new(reply.status).with_body(reply.body);
                response.headers = reply.headers;
                (outcome, response)
            }
            Err(RecvTimeoutError::Timeout) => {
                info!(%request_id, timeout_ms = u64::try_from(self.proxy_timeout.as_millis()).unwrap_or(u64::MAX), "Downstream reply timed out");
                reject(
                    GatewayOutcome::DownstreamTimeout,
                    "service_unavailable",
                    "downstream did not respond in time",
                )
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(%request_id, "Downstream dropped the request without replying");
                reject(
                    GatewayOutcome::DownstreamTimeout,
                    "service_unavailable",
                    "downstream did not respond",
                )
            }
        }
    }
}

fn reject(outcome: GatewayOutcome, kind: &str, message: &str) -> (GatewayOutcome, GatewayResponse) {
    (
        outcome,
        GatewayResponse::json_error(outcome.status(), kind, message, None),
    )
}

fn queue_full(request_id: RequestId, capacity: usize) -> (GatewayOutcome, GatewayResponse) {
    warn!(%request_id, capacity, "Bridge queue full, shedding request");
    let (outcome, response) = reject(
        GatewayOutcome::QueueFull,
        "service_unavailable",
        "gateway is at capacity, retry later",
    );
    (outcome, response.with_header("Retry-After", "1"))
}

fn build_container(
    request: GatewayRequest,
    request_id: RequestId,
    matched: &RouteMatch,
) -> HttpRequestContainer {
    let container = HttpRequestContainer::new(
        request_id,
        request.method.as_str(),
        request.path(),
        matched.route.name(),
    )
    .with_query_params(request.query_params())
    .with_path_params(matched.path_params.clone())
    .with_remote_addr(request.remote_addr);
    let body = match request.body {
        RequestBody::Complete(bytes) => bytes,
        RequestBody::TooLarge { .. } => Vec::new(),
    };
    container.with_headers(request.headers).with_body(body)
}
