//! SNMP Trap Relay Daemon CLI
//!
//! Receives SNMP traps on the privileged trap port and fans them out, as
//! single-line JSON messages, to TCP subscribers over mutually
//! authenticated TLS.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trap_relay_core::config::{LoggingConfig, RelayConfig};
use trap_relay_core::ingest::{BerTrapDecoder, SnmpTrapListener, TrapDecoder, TrapIngestionPort};
use trap_relay_core::metrics::RelayMetrics;
use trap_relay_core::network::RelayServer;
use trap_relay_core::relay::{pump_traps, ClientRegistry};

/// SNMP trap relay daemon.
#[derive(Parser)]
#[command(name = "trap-relayd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Subscriber listener host. Defaults to the configured address.
    listen_address: Option<String>,

    /// Subscriber listener port. Defaults to the configured address.
    listen_port: Option<u16>,

    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the full listen address (host:port), taking precedence
    /// over the positionals.
    #[arg(long)]
    listen: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };

    // Apply positional overrides
    match (&args.listen_address, args.listen_port) {
        (Some(host), Some(port)) => config.listen.address = format!("{host}:{port}"),
        (Some(host), None) => {
            let port = config
                .listen
                .address
                .rsplit(':')
                .next()
                .unwrap_or("1162")
                .to_string();
            config.listen.address = format!("{host}:{port}");
        }
        _ => {}
    }
    if let Some(listen) = args.listen {
        config.listen.address = listen;
    }
    config.validate()?;

    // Override log level from verbosity flag
    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };

    // Setup tracing
    setup_tracing(&log_config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen.address,
        snmp = %config.snmp.bind_address,
        "starting trap relay daemon"
    );

    // Run the async runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { run_relay(config).await })
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

async fn run_relay(config: RelayConfig) -> anyhow::Result<()> {
    let registry = Arc::new(ClientRegistry::new());
    let metrics = Arc::new(RelayMetrics::new());

    // Start metrics server if enabled
    if config.metrics.enabled {
        let metrics_clone = Arc::clone(&metrics);
        let metrics_addr = config.metrics.address.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&metrics_addr, metrics_clone).await {
                tracing::error!(error = %e, "metrics server error");
            }
        });
        info!(address = %config.metrics.address, "metrics server started");
    }

    // Wire the trap pipeline: UDP listener -> decoder -> broadcast
    let (events, port) = TrapIngestionPort::channel();
    let decoder: Arc<dyn TrapDecoder> = Arc::new(BerTrapDecoder::new());
    let trap_listener = SnmpTrapListener::new(config.snmp.clone(), decoder, events);

    // Bind the subscriber listener first: TLS and bind failures must be
    // fatal before the trap socket starts consuming.
    let server = RelayServer::bind(config, Arc::clone(&registry), Arc::clone(&metrics)).await?;
    let shutdown_handle = server.shutdown_handle();

    tokio::spawn(pump_traps(port, registry, Arc::clone(&metrics)));

    let trap_task = tokio::spawn(async move {
        if let Err(e) = trap_listener.run().await {
            tracing::error!(error = %e, "SNMP trap listener failed");
        }
    });

    // Handle shutdown signals
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, stopping relay");
        let _ = shutdown_handle.send(());
    });

    server.run().await?;
    trap_task.abort();

    info!("relay shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn start_metrics_server(
    addr: &str,
    metrics: Arc<RelayMetrics>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = Arc::clone(&metrics);

        tokio::spawn(async move {
            let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                let metrics = Arc::clone(&metrics);
                async move {
                    let body = metrics.encode().unwrap_or_default();
                    Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(body))))
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "metrics connection error");
            }
        });
    }
}
