//! Endpoint health probe
//!
//! Loads a resilience configuration, runs one TCP-connect probe per configured
//! endpoint through the health registry and prints the aggregated report as
//! JSON. The exit code reflects the degradation level: 0 for normal or
//! degraded, 1 for minimal, 2 for critical.

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use playlist_resilience::{
    init_logging, DegradationLevel, EndpointProbeConfig, HealthCheckOptions, HealthProbe,
    LogFormat, ResilienceConfig, ResilienceManager,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{info, warn};

/// Probe configuration
#[derive(Parser, Debug)]
#[command(name = "playlist-resilience-probe")]
#[command(about = "Probe configured endpoints and report the degradation level")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, env = "RESILIENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log line format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

/// Healthy when a TCP connection to the address can be established
struct TcpProbe {
    address: String,
}

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn check(&self) -> playlist_resilience::Result<serde_json::Value> {
        let start = Instant::now();
        let stream = TcpStream::connect(&self.address).await?;
        let peer = stream.peer_addr()?;
        Ok(serde_json::json!({
            "address": self.address,
            "peer": peer.to_string(),
            "connect_ms": start.elapsed().as_millis() as u64,
        }))
    }
}

fn probe_options(probe: &EndpointProbeConfig, defaults: &HealthCheckOptions) -> HealthCheckOptions {
    HealthCheckOptions {
        timeout: probe.timeout,
        critical: probe.critical,
        ..defaults.clone()
    }
}

fn exit_code(level: DegradationLevel) -> ExitCode {
    match level {
        DegradationLevel::Normal | DegradationLevel::Degraded => ExitCode::SUCCESS,
        DegradationLevel::Minimal => ExitCode::from(1),
        DegradationLevel::Critical => ExitCode::from(2),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = ResilienceConfig::load(cli.config.as_deref())
        .context("Failed to load resilience configuration")?;

    let mut logging = config.logging.clone();
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    if cli.debug {
        logging = logging.debug();
    }
    init_logging(&logging, cli.debug).context("Failed to initialise logging")?;

    let manager = ResilienceManager::from_config(&config);
    for probe in &config.probes {
        manager.register_health_check(
            &probe.name,
            TcpProbe {
                address: probe.address.clone(),
            },
            Some(probe_options(probe, &config.health)),
        );
    }
    if config.probes.is_empty() {
        warn!("No probes configured, reporting an empty system as healthy");
    }

    let health = manager.get_system_health().await;
    let level = health.degradation_level;
    info!(
        level = %level,
        healthy = health.summary.healthy,
        unhealthy = health.summary.unhealthy,
        "Probe run finished"
    );

    let report = serde_json::json!({
        "healthy": health.healthy,
        "degradation_level": level,
        "description": level.description(),
        "enabled_features": level.enabled_features(),
        "summary": health.summary,
        "checks": health.checks,
        "timestamp": health.timestamp,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(exit_code(level))
}
