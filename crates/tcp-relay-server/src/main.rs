//! # TCP Relay Server
//!
//! Main entry point for the tcp-relay server.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tcp_relay_core::{HostPort, RelayConfig, RelayServer, Via};

#[derive(Parser, Debug)]
#[command(name = "tcp-relay")]
#[command(about = "Relay inbound TCP connections to a fixed target")]
#[command(version, disable_version_flag = true)]
struct Args {
    /// Local address to listen on
    #[arg(short = 'l', long = "listen_addr", default_value = "0.0.0.0")]
    listen_addr: IpAddr,

    /// Local port to listen on
    #[arg(short = 'p', long, default_value_t = 8886, value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Target address (host:port) to connect
    #[arg(short = 't', long, value_parser = parse_host_port)]
    target: HostPort,

    /// Connection idle timeout in seconds
    #[arg(long, default_value_t = 240, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Transfer via another proxy
    #[arg(long, value_enum, default_value_t = ViaArg::None)]
    via: ViaArg,

    /// HTTP proxy address (host:port)
    #[arg(
        long = "http_proxy",
        value_parser = parse_host_port,
        required_if_eq("via", "http_proxy")
    )]
    http_proxy: Option<HostPort>,

    /// Log level
    #[arg(long = "log_level", value_enum, default_value_t = LogLevelArg::Info)]
    log_level: LogLevelArg,

    /// Worker threads for the runtime
    #[arg(long, default_value_t = 4, value_parser = clap::builder::RangedI64ValueParser::<usize>::new().range(1..))]
    threads: usize,

    /// Print the program version and exit
    #[arg(short = 'v', long, action = ArgAction::Version, value_parser = clap::value_parser!(bool))]
    version: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ViaArg {
    /// Connect to the target directly
    None,
    /// Tunnel through an HTTP CONNECT proxy
    #[value(name = "http_proxy")]
    HttpProxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Disable,
}

impl LogLevelArg {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevelArg::Trace => "trace",
            LogLevelArg::Debug => "debug",
            LogLevelArg::Info => "info",
            LogLevelArg::Warn => "warn",
            LogLevelArg::Error => "error",
            LogLevelArg::Disable => "off",
        }
    }
}

fn parse_host_port(s: &str) -> std::result::Result<HostPort, tcp_relay_core::Error> {
    s.parse()
}

impl Args {
    fn relay_config(&self) -> Result<RelayConfig> {
        let via = match (self.via, &self.http_proxy) {
            (ViaArg::HttpProxy, Some(proxy)) => Via::HttpProxy(proxy.clone()),
            (ViaArg::HttpProxy, None) => bail!(
                "the argument '--http_proxy' is required because '--via' is set to 'http_proxy'"
            ),
            (ViaArg::None, _) => Via::Direct,
        };
        Ok(RelayConfig {
            target: self.target.clone(),
            idle_timeout: Duration::from_secs(self.timeout),
            via,
        })
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let config = args.relay_config()?;
    let listen_addr = SocketAddr::new(args.listen_addr, args.port);

    info!("starting tcp-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("listen address: {}", listen_addr);
    info!("target address: {}", config.target);
    if let Via::HttpProxy(proxy) = &config.via {
        info!("via HTTP proxy: {}", proxy);
    }
    info!("connection timeout: {}s", args.timeout);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.threads)
        .enable_all()
        .build()
        .context("failed to build the runtime")?;

    runtime.block_on(async move {
        let server = RelayServer::bind(listen_addr, config)
            .await
            .with_context(|| format!("failed to bind {}", listen_addr))?;

        tokio::select! {
            result = server.run() => result.context("accept loop failed")?,
            _ = shutdown_signal() => info!("received shutdown signal"),
        }
        Ok::<_, anyhow::Error>(())
    })?;

    info!("tcp-relay shutting down");
    Ok(())
}

/// Initialize logging with the specified level.
fn init_logging(level: LogLevelArg) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Resolve on SIGINT or SIGTERM. Shutdown is abortive: in-flight sessions
/// are dropped with the runtime.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        let mut signal =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
