//! Watcher desktop device daemon.
//!
//! Runs one device session against the configured server: microphone and
//! speaker through cpal (or a WAV file for capture), display output to the
//! log, servo commands to a serial device. Press Enter to start or stop a
//! recording; Ctrl-C exits.
//!
//! ## Runtime note
//!
//! The engine runs on its own thread. A multi-threaded Tokio runtime hosts
//! only the WebSocket connection task and the status logger.

mod collaborators;
mod settings;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use collaborators::{NullSerialLink, SerialServoLink, SessionReboot, TerminalDisplay};
use crossbeam_channel::{select, Receiver};
use settings::{default_settings_path, load_settings, DeviceSettings};
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use watcher_core::{
    audio::{list_input_devices, list_output_devices, CpalCapture, CpalPlayback, WavCapture},
    glue::Debouncer,
    CaptureDevice, Collaborators, SerialLink, TransportHandle, WatcherEngine, WsTransport,
};

/// Transport events buffered for the engine thread.
const TRANSPORT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "watcher", version, about = "Watcher voice device daemon")]
struct Cli {
    /// Settings file (default: $XDG_CONFIG_HOME/watcher/settings.json).
    #[arg(long, env = "WATCHER_SETTINGS")]
    settings: Option<PathBuf>,

    /// WebSocket server URL, overrides the settings file.
    #[arg(long, env = "WATCHER_SERVER_URL")]
    server_url: Option<String>,

    /// Serial device of the servo controller, overrides the settings file.
    #[arg(long, env = "WATCHER_SERIAL_PORT")]
    serial_port: Option<String>,

    /// Stream this 16-bit WAV file instead of the microphone.
    #[arg(long)]
    wav_input: Option<PathBuf>,

    /// Print the effective settings as JSON and exit.
    #[arg(long)]
    print_settings: bool,

    /// List audio devices and exit.
    #[arg(long)]
    list_devices: bool,
}

enum SessionEnd {
    Reboot,
    Shutdown,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("watcher=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    settings.apply_overrides(cli.server_url.clone(), cli.serial_port.clone());
    settings.normalize();

    if cli.print_settings {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }
    if cli.list_devices {
        for device in list_input_devices().iter().chain(list_output_devices().iter()) {
            println!("{}", serde_json::to_string(device)?);
        }
        return Ok(());
    }

    info!(
        settings = %settings_path.display(),
        server = %settings.server_url,
        "watcher starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("watcher-net")
        .build()
        .context("failed to build tokio runtime")?;

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            let _ = shutdown_tx.try_send(());
        }
    });

    let keys = spawn_keyboard_reader()?;

    loop {
        match run_session(
            &settings,
            cli.wav_input.as_deref(),
            runtime.handle(),
            &keys,
            &shutdown_rx,
        )? {
            SessionEnd::Reboot => info!("rebuilding device session"),
            SessionEnd::Shutdown => break,
        }
    }

    info!("watcher stopped");
    Ok(())
}

fn run_session(
    settings: &DeviceSettings,
    wav_input: Option<&Path>,
    runtime: &Handle,
    keys: &Receiver<()>,
    shutdown: &Receiver<()>,
) -> anyhow::Result<SessionEnd> {
    let config = settings.engine_config();

    let (event_tx, event_rx) = crossbeam_channel::bounded(TRANSPORT_EVENT_CAPACITY);
    let transport: TransportHandle = Arc::new(WsTransport::new(
        settings.ws_config(),
        runtime.clone(),
        event_tx,
    ));

    let capture: Box<dyn CaptureDevice> = match wav_input {
        Some(path) => Box::new(
            WavCapture::open(path, config.capture_sample_rate)
                .with_context(|| format!("cannot use {} as capture source", path.display()))?,
        ),
        None => Box::new(CpalCapture::new(
            settings.preferred_input_device.clone(),
            config.capture_sample_rate,
        )),
    };
    let playback = Box::new(CpalPlayback::new(
        settings.preferred_output_device.clone(),
        config.playback_sample_rate,
    ));
    let serial: Box<dyn SerialLink> = match settings.serial_port.as_deref() {
        Some(port) => match SerialServoLink::open(port, settings.serial_baud) {
            Ok(link) => Box::new(link),
            Err(e) => {
                warn!(error = %e, "servo disabled");
                Box::new(NullSerialLink)
            }
        },
        None => Box::new(NullSerialLink),
    };

    let (reboot_tx, reboot_rx) = crossbeam_channel::bounded::<()>(1);
    let engine = WatcherEngine::new(
        config,
        Collaborators {
            transport,
            transport_events: event_rx,
            capture,
            playback,
            display: Box::new(TerminalDisplay),
            serial,
            reboot: Arc::new(SessionReboot::new(reboot_tx)),
        },
    )?;

    let mut status = engine.subscribe_status();
    runtime.spawn(async move {
        while let Ok(event) = status.recv().await {
            info!(
                connection = ?event.connection,
                voice = ?event.voice,
                tts_playing = event.tts_playing,
                "device status"
            );
        }
    });

    engine.start()?;
    info!("press Enter to start or stop recording");

    let mut button = Debouncer::default();
    let mut keys = keys.clone();
    let mut stdin_closed = false;
    let end = loop {
        let outcome = select! {
            recv(keys) -> key => match key {
                Ok(()) => {
                    let pressed = !button.is_pressed();
                    if let Some(event) = button.sample(pressed, Instant::now()) {
                        if let Err(e) = engine.push_voice_event(event) {
                            warn!(error = %e, "voice event dropped");
                        }
                    }
                    None
                }
                Err(_) => {
                    stdin_closed = true;
                    None
                }
            },
            recv(reboot_rx) -> _ => Some(SessionEnd::Reboot),
            recv(shutdown) -> _ => Some(SessionEnd::Shutdown),
        };
        if let Some(end) = outcome {
            break end;
        }
        if stdin_closed {
            info!("stdin closed, keyboard control disabled");
            keys = crossbeam_channel::never();
            stdin_closed = false;
        }
    };

    let stats = engine.stats_snapshot();
    engine.stop();
    info!(
        frames_sent = stats.frames_sent,
        recordings = stats.recordings_completed,
        tts_sessions = stats.tts_sessions,
        messages = stats.messages_routed,
        inbound_dropped = stats.inbound_dropped,
        "session ended"
    );
    Ok(end)
}

/// One `()` per line read from stdin.
fn spawn_keyboard_reader() -> anyhow::Result<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("watcher-keys".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if line.is_err() || tx.send(()).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn keyboard reader")?;
    Ok(rx)
}
