use tapeloop::audio::{AudioCapture, AudioFormat};
use tapeloop::config::Config;
use tapeloop::engine::{CaptureEngine, PlaybackEngine};
use tapeloop::repl;
use tapeloop::services::{Player, PlayerHandle, Recorder, RecorderHandle};
use tapeloop::session::{Session, SessionHandle, SessionSnapshot};
use tapeloop::upload::{UploadSidecar, Uploader};

use anyhow::Result;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    tracing::info!("Starting tapeloop clip recorder daemon");

    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Without a microphone there is nothing to do
    let device = match AudioCapture::default_device_name() {
        Ok(name) => name,
        Err(e) => {
            tracing::error!(
                "No usable input device; recording is unavailable, exiting ({:#})",
                e
            );
            return Ok(());
        }
    };
    tracing::info!("Capturing from input device: {}", device);

    // Create LocalSet for !Send futures (needed for the Recorder, which holds
    // cpal::Stream, and the Player, which holds rodio::OutputStream)
    let local = tokio::task::LocalSet::new();

    local.run_until(async move { run_app(config).await }).await
}

async fn run_app(config: Config) -> Result<()> {
    let format = AudioFormat {
        sample_rate: config.sample_rate,
        channels: config.channels,
    };

    // Device status channels feeding the session loop
    let (capture_status_tx, capture_status_rx) = mpsc::channel(64);
    let (playback_status_tx, playback_status_rx) = mpsc::channel(64);

    // Recorder actor (spawn_local because it is !Send)
    let (audio_tx, audio_rx) = mpsc::channel(100);
    let (recorder_tx, recorder_rx) = mpsc::channel(10);
    let recorder = Recorder::new(format, recorder_rx, audio_rx, audio_tx, capture_status_tx);
    tokio::task::spawn_local(recorder.run());

    // Player actor (spawn_local for the same reason)
    let (player_tx, player_rx) = mpsc::channel(10);
    let player = Player::new(player_rx, playback_status_tx);
    tokio::task::spawn_local(player.run());

    // Session loop: the single owner of mode and all derived state
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
    let capture: Box<dyn CaptureEngine> = Box::new(RecorderHandle::new(recorder_tx));
    let playback: Box<dyn PlaybackEngine> = Box::new(PlayerHandle::new(player_tx));
    let session = Session::new(
        capture,
        playback,
        cmd_rx,
        capture_status_rx,
        playback_status_rx,
        snapshot_tx,
    );
    tokio::spawn(session.run());

    let handle = SessionHandle::new(cmd_tx, snapshot_rx);

    // Upload sidecar: samples the session on a fixed cadence while recording
    let sidecar = UploadSidecar::start(
        handle.watch(),
        Uploader::new(config.upload_url.clone()),
        Duration::from_millis(config.upload_interval_ms),
    );

    tracing::info!("Ready! Type 'help' for the command list");

    tokio::select! {
        result = repl::run(handle) => {
            if let Err(e) = result {
                tracing::error!("Console error: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
    }

    sidecar.stop().await;
    tracing::info!("tapeloop shutdown complete");
    Ok(())
}
