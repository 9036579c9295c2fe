use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    async_hid_impl::open_hidpp,
    config::{Config, DeviceConfig},
    device::ManagedDevice,
    sink::{InputSink, UinputSink},
};

/// The name of the virtual input device emitting synthetic events.
const VIRTUAL_DEVICE_NAME: &str = "logyd";

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// The configuration file to read
    #[arg(short, long, default_value = "/etc/logyd.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace), overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

pub async fn execute() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::load(&cli.config)?;
    if config.devices.is_empty() {
        bail!("{} does not configure any devices", cli.config.display());
    }
    info!(path = %cli.config.display(), devices = config.devices.len(), "loaded configuration");

    let sink: Arc<dyn InputSink> = Arc::new(
        UinputSink::new(VIRTUAL_DEVICE_NAME).context("could not create the virtual input device")?,
    );

    let mut devices = JoinSet::new();
    for device_config in &config.devices {
        match attach(device_config, &sink).await {
            Ok(Some(device)) => {
                devices.spawn(device.run());
            },
            Ok(None) => warn!(device = %device_config.display_name(), "device not found"),
            Err(err) => error!(device = %device_config.display_name(), "{err:#}"),
        }
    }

    if devices.is_empty() {
        bail!("none of the configured devices could be attached");
    }

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("could not wait for the interrupt signal")?;
            info!("shutting down");
        },
        _ = async { while devices.join_next().await.is_some() {} } => {
            info!("all devices disconnected");
        },
    }

    Ok(())
}

/// Attaches to the first HID++ channel of the configured device that hosts
/// it.
async fn attach(config: &DeviceConfig, sink: &Arc<dyn InputSink>) -> Result<Option<ManagedDevice>> {
    let mut last_err = None;

    for chan in open_hidpp(config.vendor_id, config.product_id).await? {
        match ManagedDevice::attach(config, Arc::new(chan), Arc::clone(sink)).await {
            Ok(device) => return Ok(Some(device)),
            Err(err) => last_err = Some(err),
        }
    }

    last_err.map_or(Ok(None), Err)
}
