//! Native transport server.
//!
//! ```text
//!   config (TOML + env)
//!        │
//!        ▼
//!   engine selection ──▶ shared event loop
//!        │
//!        ▼
//!   security policy ──▶ listener specs ──▶ construct ──▶ register metrics ──▶ start
//!                                                                              │
//!                            SIGINT/SIGTERM ──▶ stop accept ──▶ drain ◀─────────┘
//! ```
//!
//! Without a protocol backend wired in, accepted connections are served by
//! [`DiscardPersistence`].

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use native_transport::config::{default_config, load_config, TransportConfig};
use native_transport::lifecycle::signals::shutdown_signal;
use native_transport::lifecycle::startup::derive_listener_specs;
use native_transport::net::event_loop::{select_engine, PlatformProbe};
use native_transport::observability::logging::init_logging;
use native_transport::observability::metrics::PrometheusClientMetrics;
use native_transport::{DiscardPersistence, NativeTransport};

#[derive(Parser)]
#[command(name = "native-transport")]
#[command(about = "Native protocol transport listeners", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration, print the listener topology and exit.
    #[arg(long)]
    check_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => load_config(path),
        None => default_config(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.observability.log_level);
    tracing::info!("native-transport v{} starting", env!("CARGO_PKG_VERSION"));

    if cli.check_config {
        print_topology(&config);
        return ExitCode::SUCCESS;
    }

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Native transport failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config: TransportConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        bind_address = %config.transport.bind_address,
        port = config.transport.port,
        port_ssl = config.transport.secure_port(),
        encryption = config.encryption.enabled,
        "Configuration loaded"
    );

    let metrics_enabled = config.observability.metrics_enabled;
    let mut transport = NativeTransport::new(config)?;

    if metrics_enabled {
        transport.install_metrics_exporter()?;
    }

    let client_metrics = PrometheusClientMetrics::new();
    if let Err(e) = transport.start(Arc::new(DiscardPersistence), &client_metrics) {
        // Stop whatever did start before reporting the failure.
        transport.shutdown();
        return Err(e.into());
    }

    tracing::info!(
        listeners = ?transport.listeners().local_addrs(),
        engine = %transport.engine(),
        "Ready for client connections"
    );

    transport.block_on(shutdown_signal());

    tracing::info!(
        connected_clients = client_metrics.connected_clients(),
        "Shutting down"
    );
    transport.shutdown();
    Ok(())
}

fn print_topology(config: &TransportConfig) {
    let Some(bind_address) = config.bind_ip() else {
        return;
    };
    let selection = select_engine(config.event_loop.native_epoll_enabled, &PlatformProbe);
    println!("engine: {}", selection.choice);
    if let Some(warning) = &selection.warning {
        println!("warning: {}", warning);
    }
    for spec in derive_listener_specs(&config.security_policy(), bind_address, selection.choice) {
        println!("listener: {}", spec);
    }
}
