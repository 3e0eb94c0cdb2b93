//! tilecast viewer entry point.
//!
//! ```text
//! tilecast-viewer 192.168.1.20                  Connect with default ports
//! tilecast-viewer 192.168.1.20 9632 9633 9634   Override video/control/audio ports
//! tilecast-viewer <server> --config <path>      Use custom config TOML
//! tilecast-viewer --gen-config                  Dump default config and exit
//! ```

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tilecast_core::platform::{DeviceSink, DeviceSource};
use tilecast_core::session::{AudioSink, AudioSource, ViewerSession};

use tilecast_viewer::commands::{self, Command};
use tilecast_viewer::config::{AudioConfig, ClientConfig, LoggingConfig};
use tilecast_viewer::snapshot::SnapshotWriter;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tilecast-viewer", about = "Tile-based remote screen viewer")]
struct Cli {
    /// Server host name or IP (overrides config).
    #[arg(required_unless_present = "gen_config")]
    server: Option<String>,

    /// Video port.
    video_port: Option<u16>,

    /// Control port.
    control_port: Option<u16>,

    /// Audio port.
    audio_port: Option<u16>,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tilecast-viewer.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut ClientConfig) {
        let net = &mut config.network;
        if let Some(server) = &self.server {
            net.server_address = server.clone();
        }
        if let Some(port) = self.video_port {
            net.video_port = port;
        }
        if let Some(port) = self.control_port {
            net.control_port = port;
        }
        if let Some(port) = self.audio_port {
            net.audio_port = port;
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

fn open_audio(audio: &AudioConfig) -> (Option<Box<dyn AudioSource>>, Option<Box<dyn AudioSink>>) {
    let microphone: Option<Box<dyn AudioSource>> = if audio.send_microphone {
        match DeviceSource::microphone() {
            Ok(mic) => Some(Box::new(mic)),
            Err(e) => {
                warn!("microphone disabled: {e}");
                None
            }
        }
    } else {
        None
    };
    let speaker: Option<Box<dyn AudioSink>> = if audio.play {
        match DeviceSink::speakers() {
            Ok(out) => Some(Box::new(out)),
            Err(e) => {
                warn!("audio playback disabled: {e}");
                None
            }
        }
    } else {
        None
    };
    (microphone, speaker)
}

/// Forward stdin lines from a plain thread so a pending read never
/// holds up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    cli.apply(&mut config);
    init_tracing(&config.logging)?;

    info!("tilecast-viewer v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Connect ──────────────────────────────────────────────

    let (microphone, speaker) = open_audio(&config.audio);
    let session = ViewerSession::connect(&config.to_viewer_config(), microphone, speaker).await?;
    let running = session.stop_handle();

    // ── 2. Snapshots ────────────────────────────────────────────

    let snapshots = if config.display.snapshot_path.is_empty() {
        None
    } else {
        let writer = SnapshotWriter::new(&config.display.snapshot_path, config.display.snapshot_quality);
        Some(tokio::spawn(writer.run(
            session.canvas(),
            config.snapshot_interval(),
            running.clone(),
        )))
    };

    // ── 3. Input relay ──────────────────────────────────────────

    eprintln!("{}", commands::HELP);
    let control = session.control();
    let mut lines = spawn_stdin_reader();
    let mut stdin_open = true;

    loop {
        let line = tokio::select! {
            _ = session.finished() => {
                info!("connection to server ended");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            line = lines.recv(), if stdin_open => line,
        };

        let line = match line {
            Some(Ok(line)) => line,
            None => {
                info!("stdin closed; input relay stopped");
                stdin_open = false;
                continue;
            }
            Some(Err(e)) => {
                warn!("stdin read failed: {e}");
                stdin_open = false;
                continue;
            }
        };

        match commands::parse(&line) {
            Ok(Some(Command::Send(event))) => {
                if let Err(e) = control.send(event).await {
                    error!("control channel closed: {e}");
                    break;
                }
            }
            Ok(Some(Command::Stats)) => {
                let stats = session.stats();
                let canvas = session.canvas();
                let (w, h) = {
                    let canvas = canvas.lock().unwrap_or_else(|p| p.into_inner());
                    (canvas.width(), canvas.height())
                };
                eprintln!(
                    "{w}x{h}: {} change sets, {} tiles applied, {} skipped, {} decode failures",
                    stats.change_sets, stats.tiles_applied, stats.tiles_skipped, stats.decode_failures
                );
            }
            Ok(Some(Command::Help)) => eprintln!("{}", commands::HELP),
            Ok(Some(Command::Quit)) => break,
            Ok(None) => {}
            Err(e) => eprintln!("{e}"),
        }
    }

    // ── 4. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    drop(control);
    session.shutdown().await;
    if let Some(task) = snapshots {
        let _ = task.await;
    }
    Ok(())
}
