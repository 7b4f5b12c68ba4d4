use crate::bridge::JwtBridge;
use crate::config::load_properties;
use crate::flow::{FlowUnit, DEFAULT_BATCH_SIZE};
use crate::gateway::ProxyReply;
use crate::hot_reload::watch_bridge;
use crate::security::ValidationResult;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Command-line interface for jwtbridge
#[derive(Parser, Debug)]
#[command(name = "jwtbridge", version)]
#[command(about = "Multi-issuer JWT gateway", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the gateway with a logging consumer on the bridge queue
    Serve {
        /// YAML properties file (issuer.*, restapi.*, gateway.*, jwks.*)
        #[arg(short, long, env = "JWTBRIDGE_CONFIG")]
        config: PathBuf,

        /// Re-apply issuers and routes when the file changes
        #[arg(long, default_value_t = false)]
        watch: bool,

        /// Override gateway.port
        #[arg(long, env = "JWTBRIDGE_GATEWAY_PORT")]
        port: Option<u16>,

        /// Containers taken from the queue per trigger cycle
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Pause between trigger cycles when the queue is empty
        #[arg(long, default_value_t = 25)]
        poll_interval_ms: u64,
    },
    /// Validate one token and print the result as JSON
    ///
    /// Exits with status 1 when the token is rejected.
    Verify {
        #[arg(short, long, env = "JWTBRIDGE_CONFIG")]
        config: PathBuf,

        /// The raw token, or `-` to read it from stdin
        #[arg(short, long)]
        token: String,
    },
    /// List the configured gateway routes
    Routes {
        #[arg(short, long, env = "JWTBRIDGE_CONFIG")]
        config: PathBuf,
    },
}

/// Execute a parsed command line.
pub fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Serve {
            config,
            watch,
            port,
            batch_size,
            poll_interval_ms,
        } => {
            serve(
                &config,
                watch,
                port,
                batch_size,
                Duration::from_millis(poll_interval_ms),
            )?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify { config, token } => {
            let token = if token == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("failed to read token from stdin")?;
                buf
            } else {
                token
            };
            let result = verify_token(&config, &token)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.is_valid() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Commands::Routes { config } => {
            print!("{}", describe_routes(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_bridge(config: &Path) -> anyhow::Result<JwtBridge> {
    let properties = load_properties(config)
        .with_context(|| format!("failed to load {}", config.display()))?;
    JwtBridge::from_properties(&properties)
}

/// Validate `token` against the issuers configured in `config`.
pub fn verify_token(config: &Path, token: &str) -> anyhow::Result<ValidationResult> {
    let bridge = load_bridge(config)?;
    Ok(bridge.validate(token.trim()))
}

/// One line per route: name, methods, path, and flags.
pub fn describe_routes(config: &Path) -> anyhow::Result<String> {
    let bridge = load_bridge(config)?;
    let table = bridge.routes();
    let mut out = String::new();
    for route in table.iter() {
        let cfg = route.config();
        let methods: Vec<&str> = cfg.methods.iter().map(http::Method::as_str).collect();
        let mut flags = Vec::new();
        if !cfg.enabled {
            flags.push("disabled".to_string());
        }
        if cfg.schema.is_some() {
            flags.push("schema".to_string());
        }
        if !cfg.policy.required_scopes.is_empty() {
            flags.push(format!("scopes={}", cfg.policy.required_scopes.join(",")));
        }
        if !cfg.policy.required_roles.is_empty() {
            flags.push(format!("roles={}", cfg.policy.required_roles.join(",")));
        }
        writeln!(
            out,
            "{:<20} {:<16} {:<32} {}",
            cfg.name,
            methods.join(","),
            cfg.path,
            flags.join(" ")
        )?;
    }
    Ok(out)
}

fn serve(
    config: &Path,
    watch: bool,
    port: Option<u16>,
    batch_size: usize,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    let mut properties = load_properties(config)
        .with_context(|| format!("failed to load {}", config.display()))?;
    if let Some(port) = port {
        properties.insert("gateway.port".to_string(), port.to_string());
    }
    let bridge = Arc::new(JwtBridge::from_properties(&properties)?);

    let _watcher = if watch {
        Some(watch_bridge(config, Arc::clone(&bridge)).context("failed to watch config file")?)
    } else {
        None
    };

    let server = bridge.serve().context("failed to start gateway")?;
    let stop = Arc::new(AtomicBool::new(false));
    install_signal_handlers(Arc::clone(&stop))?;

    let trigger = bridge.trigger(batch_size);
    while !stop.load(Ordering::Acquire) {
        let units = trigger.on_trigger();
        if units.is_empty() {
            std::thread::sleep(poll_interval);
            continue;
        }
        for mut unit in units {
            consume(&mut unit);
        }
    }

    info!("Shutting down");
    server.stop();
    let snapshot = bridge.metrics_snapshot();
    info!(
        total = snapshot.total,
        valid = snapshot.valid,
        invalid = snapshot.invalid,
        avg_us = snapshot.average_response_time_us,
        "Final validation counters"
    );
    Ok(())
}

/// Logging sink: records each unit and answers proxied requests with 200.
fn consume(unit: &mut FlowUnit) {
    let request_id = unit.attribute("http.request.id").unwrap_or("-").to_string();
    info!(
        request_id = %request_id,
        method = unit.attribute("http.method").unwrap_or("-"),
        path = unit.attribute("http.path").unwrap_or("-"),
        route = unit.attribute("http.route").unwrap_or("-"),
        issuer = unit.attribute("jwt.issuer").unwrap_or("-"),
        subject = unit.attribute("jwt.subject").unwrap_or("-"),
        bytes = unit.content.len(),
        "Flow unit received"
    );
    if unit.expects_reply() {
        let body = serde_json::json!({ "status": "processed", "requestId": request_id });
        let reply = ProxyReply::new(200, body.to_string()).with_header("Content-Type", "application/json");
        if !unit.respond(reply) {
            warn!(request_id = %request_id, "Client gave up before the reply was ready");
        }
    }
}

#[cfg(unix)]
fn install_signal_handlers(stop: Arc<AtomicBool>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("failed to register signal handlers")?;
    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "Received shutdown signal");
                stop.store(true, Ordering::Release);
            }
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handlers(_stop: Arc<AtomicBool>) -> anyhow::Result<()> {
    Ok(())
}
