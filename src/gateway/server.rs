use super::handler::GatewayRequestHandler;
use super::request::{insert_header, read_body_limited, GatewayRequest};
use super::response::GatewayResponse;
use crate::config::GatewaySettings;
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long a worker blocks in `recv` before re-checking the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to a running gateway listener and its worker threads.
pub struct ServerHandle {
    addr: SocketAddr,
    server: Arc<tiny_http::Server>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Address the listener is bound to (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Poll the listener with TCP connects until it accepts (about 250ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Flag every worker to exit, wake them, and join them.
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Release);
        for _ in &self.workers {
            self.server.unblock();
        }
        for worker in self.workers {
            if worker.join().is_err() {
                error!("Gateway worker panicked during shutdown");
            }
        }
        info!(addr = %self.addr, "Gateway stopped");
    }

    /// Block until every worker exits. Workers only exit after `stop` is
    /// called from another handle holder or the process is signalled.
    pub fn join(self) -> thread::Result<()> {
        for worker in self.workers {
            worker.join()?;
        }
        Ok(())
    }

    /// Shared shutdown flag, for signal handlers.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }
}

/// Bind the listener described by `settings` and start its worker threads.
pub fn start(
    handler: Arc<GatewayRequestHandler>,
    settings: &GatewaySettings,
) -> io::Result<ServerHandle> {
    let addr = settings.listen_addr();
    let server = bind(&addr, settings)?;
    let local = server
        .server_addr()
        .to_ip()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "listener has no IP address"))?;

    let server = Arc::new(server);
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::with_capacity(settings.worker_threads);

    for worker_id in 0..settings.worker_threads.max(1) {
        let server = Arc::clone(&server);
        let handler = Arc::clone(&handler);
        let shutdown = Arc::clone(&shutdown);
        let worker = thread::Builder::new()
            .name(format!("gateway-worker-{worker_id}"))
            .spawn(move || worker_loop(worker_id, &server, &handler, &shutdown))?;
        workers.push(worker);
    }

    info!(
        addr = %local,
        workers = workers.len(),
        tls = settings.tls.is_some(),
        mode = ?settings.mode,
        "Gateway listening"
    );

    Ok(ServerHandle {
        addr: local,
        server,
        workers,
        shutdown,
    })
}

#[cfg(feature = "tls")]
fn bind(addr: &str, settings: &GatewaySettings) -> io::Result<tiny_http::Server> {
    match &settings.tls {
        Some(tls) => {
            let certificate = std::fs::read(&tls.certificate)?;
            let private_key = std::fs::read(&tls.private_key)?;
            tiny_http::Server::https(
                addr,
                tiny_http::SslConfig {
                    certificate,
                    private_key,
                },
            )
            .map_err(io::Error::other)
        }
        None => tiny_http::Server::http(addr).map_err(io::Error::other),
    }
}

#[cfg(not(feature = "tls"))]
fn bind(addr: &str, settings: &GatewaySettings) -> io::Result<tiny_http::Server> {
    if settings.tls.is_some() {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "TLS is configured but jwtbridge was built without the `tls` feature",
        ));
    }
    tiny_http::Server::http(addr).map_err(io::Error::other)
}

fn worker_loop(
    worker_id: usize,
    server: &tiny_http::Server,
    handler: &GatewayRequestHandler,
    shutdown: &AtomicBool,
) {
    debug!(worker_id, "Gateway worker started");
    while !shutdown.load(Ordering::Acquire) {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(request)) => serve(handler, request),
            Ok(None) => {}
            Err(err) => {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                warn!(worker_id, error = %err, "Gateway accept failed");
            }
        }
    }
    debug!(worker_id, "Gateway worker exiting");
}

fn serve(handler: &GatewayRequestHandler, mut request: tiny_http::Request) {
    let response = match read_request(&mut request, handler.max_body_bytes()) {
        Ok(gateway_request) => handler.handle(gateway_request).response,
        Err(reason) => {
            debug!(reason = %reason, "Unreadable request");
            GatewayResponse::json_error(400, "bad_request", &reason, None)
        }
    };

    if let Err(err) = request.respond(to_wire(response)) {
        debug!(error = %err, "Client went away before the response was written");
    }
}

fn read_request(
    request: &mut tiny_http::Request,
    max_body_bytes: usize,
) -> Result<GatewayRequest, String> {
    let method = http::Method::from_bytes(request.method().as_str().as_bytes())
        .map_err(|_| format!("unsupported method {}", request.method()))?;

    let mut headers = HashMap::new();
    for header in request.headers() {
        insert_header(
            &mut headers,
            header.field.as_str().as_str(),
            header.value.as_str(),
        );
    }

    let announced = request.body_length();
    let body = read_body_limited(request.as_reader(), announced, max_body_bytes)
        .map_err(|e| format!("failed to read request body: {e}"))?;

    Ok(GatewayRequest {
        method,
        url: request.url().to_string(),
        headers,
        remote_addr: request.remote_addr().copied(),
        body,
    })
}

fn to_wire(response: GatewayResponse) -> tiny_http::Response<io::Cursor<Vec<u8>>> {
    let mut wire = tiny_http::Response::from_data(response.body).with_status_code(response.status);
    for (name, value) in &response.headers {
        match tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => wire.add_header(header),
            Err(()) => debug!(header = %name, "Dropping response header that is not ASCII"),
        }
    }
    wire
}
