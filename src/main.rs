//! DNS Rewrite Server
//!
//! Serves configured rewrite entries locally and forwards all other queries
//! to an upstream DNS resolver.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;

use dns_rewrite_server::{
    config::ServerConfig,
    dns::{Dispatcher, UdpUpstream},
    errors::DnsError,
    handlers::run_udp_server,
};

#[tokio::main]
async fn main() -> Result<(), DnsError> {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    // Load configuration; any error here stops the process before serving
    let config = ServerConfig::from_env()?;

    let upstream = UdpUpstream::from_config(&config);
    info!(
        "Serving {} rewrite entries, forwarding everything else to {}",
        config.rewrite_table.len(),
        upstream.addr()
    );
    let dispatcher = Arc::new(Dispatcher::new(
        config.rewrite_table.clone(),
        Arc::new(upstream),
    ));

    // Set up shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        _ = shutdown_signal => {
            info!("Shutting down");
            Ok(())
        },
        res = run_udp_server(&config, dispatcher) => res,
    }
}
