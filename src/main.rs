use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use smartbus_bridge::broker::TopicLogger;
use smartbus_bridge::{Bridge, BridgeConfig};

/// Poll cadence for device models (temperature reads).
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "smartbus-bridge", about = "HDL Smartbus to broker bridge", version)]
struct Cli {
    /// Serial port address (/dev/..., udp, tcp://host:port or host:port)
    #[arg(long, default_value = "/dev/ttyNSC1")]
    serial: String,

    /// MQTT broker url the external broker client attaches to
    #[arg(long, default_value = "tcp://localhost:1883")]
    broker: String,

    /// Provide a UDP gateway next to the serial side
    #[arg(long)]
    gw: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!(
        serial = %cli.serial,
        broker = %cli.broker,
        gateway = cli.gw,
        "starting smartbus bridge"
    );

    let config = BridgeConfig {
        address: cli.serial.clone(),
        udp_gateway: cli.gw,
        ..BridgeConfig::default()
    };
    let bridge = Bridge::start(config, Box::new(TopicLogger::new()))
        .await
        .context("cannot start the smartbus driver")?;

    let poller = bridge.handle();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        loop {
            tick.tick().await;
            poller.poll();
        }
    });

    tokio::select! {
        result = bridge.run() => {
            result.context("smartbus driver failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
        }
    }
    Ok(())
}
