use anyhow::{Context, Result};
use log::{error, info};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use p9813::{Config, Demo, Session};

const DEFAULT_CONFIG_PATH: &str = "/etc/p9813/config.yaml";

fn main() -> Result<()> {
    // Initialize logging
    init_logger();

    info!("P9813 driver starting...");

    let config = load_config(std::env::args().nth(1))?;

    // Stop a repeating demo on SIGTERM/SIGINT
    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&stop))
        .context("Failed to setup SIGTERM handler")?;
    signal_hook::flag::register(SIGINT, Arc::clone(&stop))
        .context("Failed to setup SIGINT handler")?;

    let session = Session::open(&config.spi, config.chain.length).context(format!(
        "Failed to open P9813 on {}",
        config.spi.device_path()
    ))?;

    let demo = Demo::new(session, config.demo, stop);
    if let Err(e) = demo.run_and_finish() {
        error!("Demo failed: {:#}", e);
        return Err(e);
    }

    info!("P9813 driver shutdown complete");
    Ok(())
}

/// An explicit path must load; without one, a missing default file means defaults
fn load_config(arg: Option<String>) -> Result<Config> {
    match arg {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            Config::from_file(Path::new(&path))
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            info!("Loading configuration from: {}", DEFAULT_CONFIG_PATH);
            Config::from_file(Path::new(DEFAULT_CONFIG_PATH))
        }
        None => {
            info!("No configuration file, using defaults");
            Ok(Config::default())
        }
    }
}

fn init_logger() {
    // Use `env_logger` for logging. Systemd/journald will capture stdout/stderr.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}
