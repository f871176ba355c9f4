use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;
use thermal_engine::config::AppConfig;
use thermal_engine::core::{builtin_theme, load_theme_file, Engine};
use thermal_engine_sources::SourceBackend;

const DIAG_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Thermal Engine - stream live sensor themes to a USB LCD panel
#[derive(Parser, Debug, Clone)]
#[command(name = "thermal-engine")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug verbosity level (0=quiet, 1=info, 2=debug, 3=trace)
    #[arg(short = 'd', long = "debug", value_name = "LEVEL", default_value = "0")]
    debug: u8,

    /// Config file to use instead of the one in the user config directory
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Target frame rate (1-60)
    #[arg(long = "fps", value_name = "FPS")]
    fps: Option<u32>,

    /// Theme JSON file to display
    #[arg(short = 't', long = "theme", value_name = "FILE")]
    theme: Option<PathBuf>,

    /// Stream to the built-in virtual panel instead of USB
    #[arg(long = "virtual")]
    virtual_panel: bool,

    /// Sensor backend: helper or shm
    #[arg(long = "backend", value_name = "BACKEND")]
    backend: Option<SourceBackend>,

    /// Path to the sensor helper executable
    #[arg(long = "helper", value_name = "PATH")]
    helper: Option<PathBuf>,

    /// List attached panels and exit
    #[arg(short = 'l', long = "list-devices")]
    list_devices: bool,

    /// Write the effective configuration to the config file and exit
    #[arg(long = "write-default-config")]
    write_default_config: bool,

    /// Print the sensor source's diagnostic dump and exit
    #[arg(long = "diag")]
    diag: bool,
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {:#}", e);
            AppConfig::default()
        }),
    };

    // Command line overrides
    if let Some(fps) = cli.fps {
        config.render.target_fps = fps;
    }
    if let Some(theme) = &cli.theme {
        config.render.theme = Some(theme.clone());
    }
    if cli.virtual_panel {
        config.device.virtual_panel = true;
    }
    if let Some(backend) = cli.backend {
        config.sensors.backend = backend;
    }
    if let Some(helper) = &cli.helper {
        config.sensors.helper.executable = Some(helper.clone());
    }
    Ok(config)
}

fn list_devices() -> Result<()> {
    #[cfg(feature = "hid")]
    {
        let mut transport = thermal_engine_device::HidTransport::new()?;
        let devices = thermal_engine_device::list_devices(&mut transport)?;
        println!("Attached HID devices ({}):", devices.len());
        println!();
        for (device, model) in devices {
            let product = device.product.as_deref().unwrap_or("Unknown");
            match model {
                Some(model) if model.is_supported() => {
                    println!("  {} - {} [supported: {}]", device.id, product, model.name())
                }
                Some(model) => {
                    println!("  {} - {} [recognised, no driver yet: {}]", device.id, product, model.name())
                }
                None => println!("  {} - {}", device.id, product),
            }
        }
        Ok(())
    }
    #[cfg(not(feature = "hid"))]
    {
        anyhow::bail!("built without USB HID support")
    }
}

async fn print_diagnostics(engine: &Engine) -> Result<()> {
    let status = engine.sensor_status();
    let deadline = tokio::time::Instant::now() + DIAG_CONNECT_TIMEOUT;
    while !status.state().is_connected() {
        if tokio::time::Instant::now() >= deadline {
            let detail = status.status();
            anyhow::bail!(
                "sensor source did not connect: {}{}",
                detail
                    .last_fault
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| status.state().to_string()),
                detail
                    .diagnostic
                    .as_ref()
                    .map(|d| format!("\n{}", d))
                    .unwrap_or_default()
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let dump = tokio::task::block_in_place(|| engine.sensor_diagnostics(Duration::from_secs(10)))
        .context("requesting sensor diagnostics")?;
    print!("{}", dump);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Level 0 (default): warn only (quiet, shows only important === messages)
    let log_level = match cli.debug {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // Allow RUST_LOG to override CLI setting
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if cli.list_devices {
        return list_devices();
    }

    let config = load_config(&cli)?;

    if cli.write_default_config {
        let path = match &cli.config {
            Some(path) => path.clone(),
            None => AppConfig::config_path()?,
        };
        config.save_to_path(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let theme = match &config.render.theme {
        Some(path) => load_theme_file(path)?,
        None => {
            info!("No theme configured, using the built-in theme");
            builtin_theme()
        }
    };

    let mut engine = Engine::start(&config, theme).context("starting engine")?;

    if cli.diag {
        let result = print_diagnostics(&engine).await;
        tokio::task::block_in_place(|| engine.shutdown());
        return result;
    }

    let mut report = tokio::time::interval(Duration::from_secs(30));
    report.tick().await;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = report.tick() => {
                let stats = engine.stats();
                info!(
                    "sensors: {} | device: {} | {} frames, {:.1} FPS, {} sent, {} skipped",
                    engine.sensor_status().state(),
                    engine.device_status().state(),
                    stats.render.frames_rendered,
                    stats.render.fps,
                    stats.device.frames_sent,
                    stats.device.frames_skipped,
                );
                if let Some(panel) = engine.virtual_panel() {
                    info!("virtual panel: {} frames, {:.1} FPS", panel.frames_received(), panel.fps());
                }
            }
        }
    }

    // Threads are joined here; keep it off the async workers
    tokio::task::block_in_place(|| engine.shutdown());
    Ok(())
}
