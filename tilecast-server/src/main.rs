//! tilecast server entry point.
//!
//! ```text
//! tilecast-server                          Listen on the configured ports
//! tilecast-server 9632 9633 8080 9634      Override video/control/web/audio ports
//! tilecast-server --no-web                 Disable the MJPEG bridge
//! tilecast-server --config <path>          Load a custom config TOML
//! tilecast-server --gen-config             Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tilecast_server::config::{LoggingConfig, ServerConfig};
use tilecast_server::service::{ServerService, platform_parts};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tilecast-server", about = "Tile-based remote screen server")]
struct Cli {
    /// Video port (overrides the config file).
    video_port: Option<u16>,

    /// Control port.
    control_port: Option<u16>,

    /// MJPEG bridge port.
    web_port: Option<u16>,

    /// Audio port.
    audio_port: Option<u16>,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tilecast-server.toml")]
    config: PathBuf,

    /// Do not start the browser MJPEG bridge.
    #[arg(long)]
    no_web: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        let net = &mut config.network;
        if let Some(port) = self.video_port {
            net.video_port = port;
        }
        if let Some(port) = self.control_port {
            net.control_port = port;
        }
        if let Some(port) = self.web_port {
            net.web_port = port;
        }
        if let Some(port) = self.audio_port {
            net.audio_port = port;
        }
        if self.no_web {
            net.web_enabled = false;
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ServerConfig::load(&cli.config);
    cli.apply(&mut config);
    init_tracing(&config.logging)?;

    info!("tilecast-server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "ports: video {}, control {}, audio {}, web {}",
        config.network.video_port,
        config.network.control_port,
        config.network.audio_port,
        if config.network.web_enabled {
            config.network.web_port.to_string()
        } else {
            "disabled".to_string()
        }
    );
    info!(
        "capture: {} fps, {}x{} tiles, {:?} codec, monitor {}",
        config.screen.fps,
        config.screen.tile_width,
        config.screen.tile_height,
        config.screen.codec,
        config.screen.monitor_index
    );

    let service = ServerService::bind(config)?;
    let parts = platform_parts(service.config()).inspect_err(|e| error!("{e}"))?;

    // Ctrl-C handler.
    let stop = service.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, Ordering::SeqCst);
    });

    service.run(parts).await?;
    info!("tilecast-server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_ports_override_config() {
        let cli = Cli::parse_from(["tilecast-server", "7000", "7001", "7002", "7003", "--no-web"]);
        let mut config = ServerConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.network.video_port, 7000);
        assert_eq!(config.network.control_port, 7001);
        assert_eq!(config.network.web_port, 7002);
        assert_eq!(config.network.audio_port, 7003);
        assert!(!config.network.web_enabled);
    }

    #[test]
    fn missing_positionals_keep_config() {
        let cli = Cli::parse_from(["tilecast-server", "7000"]);
        let mut config = ServerConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.network.video_port, 7000);
        assert_eq!(config.network.control_port, 9633);
        assert!(config.network.web_enabled);
    }
}
