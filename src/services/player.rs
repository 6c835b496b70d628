use crate::engine::PlaybackEngine;
use crate::messages::{PlaybackParams, PlaybackStatus, PlayerCommand};
use anyhow::Result;
use async_trait::async_trait;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

const STATUS_TICK: Duration = Duration::from_millis(250);

/// One loaded clip with its output device.
///
/// The stream must be kept alive for the sink to produce sound; dropping the
/// whole struct releases the device. Mute is modeled as sink volume zero with
/// the logical volume retained here.
struct LoadedClip {
    _stream: OutputStream,
    sink: Sink,
    duration_ms: u64,
    volume: f32,
    muted: bool,
    correct_pitch: bool,
}

/// Drives clip playback
///
/// This service:
/// - Loads a finalized clip into a fresh output stream + sink, looping
/// - Maps transport commands onto the sink
/// - Emits PlaybackStatus ticks (applied values, not requested ones) on a
///   fixed cadence while a clip is loaded and after every command
///
/// Note: This service holds rodio::OutputStream which is !Send, so it must be
/// spawned on a LocalSet using tokio::task::spawn_local.
pub struct Player {
    cmd_rx: mpsc::Receiver<PlayerCommand>,
    status_tx: mpsc::Sender<PlaybackStatus>,
    loaded: Option<LoadedClip>,
}

impl Player {
    pub fn new(
        cmd_rx: mpsc::Receiver<PlayerCommand>,
        status_tx: mpsc::Sender<PlaybackStatus>,
    ) -> Self {
        Self {
            cmd_rx,
            status_tx,
            loaded: None,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(STATUS_TICK);
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },

                // Report position/flags while a clip is loaded
                _ = ticker.tick(), if self.loaded.is_some() => {
                    self.emit_status().await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: PlayerCommand) {
        match cmd {
            PlayerCommand::Load {
                path,
                params,
                reply,
            } => {
                // Release any prior clip and device before acquiring new ones
                self.loaded = None;
                let result = self.load(&path, params);
                let _ = reply.send(result);
            }
            PlayerCommand::Unload(reply) => {
                self.loaded = None;
                let _ = reply.send(());
            }
            PlayerCommand::Play => {
                if let Some(clip) = &self.loaded {
                    clip.sink.play();
                }
            }
            PlayerCommand::Pause => {
                if let Some(clip) = &self.loaded {
                    clip.sink.pause();
                }
            }
            PlayerCommand::Stop => {
                // rodio's Sink::stop empties the queue, so transport stop is
                // pause + rewind, keeping the clip loaded
                if let Some(clip) = &self.loaded {
                    clip.sink.pause();
                    if let Err(e) = clip.sink.try_seek(Duration::ZERO) {
                        tracing::warn!("Failed to rewind clip: {}", e);
                    }
                }
            }
            PlayerCommand::SeekTo {
                position_ms,
                resume,
            } => {
                if let Some(clip) = &self.loaded {
                    if let Err(e) = clip.sink.try_seek(Duration::from_millis(position_ms)) {
                        tracing::warn!("Failed to seek clip: {}", e);
                    }
                    if resume {
                        clip.sink.play();
                    }
                }
            }
            PlayerCommand::SetVolume(volume) => {
                if let Some(clip) = &mut self.loaded {
                    clip.volume = volume.clamp(0.0, 1.0);
                    if !clip.muted {
                        clip.sink.set_volume(clip.volume);
                    }
                }
            }
            PlayerCommand::SetMuted(muted) => {
                if let Some(clip) = &mut self.loaded {
                    clip.muted = muted;
                    clip.sink
                        .set_volume(if muted { 0.0 } else { clip.volume });
                }
            }
            PlayerCommand::SetRate {
                rate,
                correct_pitch,
            } => {
                if let Some(clip) = &mut self.loaded {
                    clip.sink.set_speed(rate);
                    clip.correct_pitch = correct_pitch;
                }
            }
        }

        // Confirm the applied values without waiting for the next tick
        self.emit_status().await;
    }

    fn load(&mut self, path: &Path, params: PlaybackParams) -> Result<u64> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| anyhow::anyhow!("Failed to open output stream: {}", e))?;
        let sink = Sink::connect_new(stream.mixer());

        let file = File::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open clip {:?}: {}", path, e))?;
        let decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| anyhow::anyhow!("Failed to decode clip {:?}: {}", path, e))?;
        let duration_ms = decoder
            .total_duration()
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        sink.pause();
        sink.set_volume(if params.muted { 0.0 } else { params.volume });
        sink.set_speed(params.rate);
        if params.looping {
            sink.append(decoder.repeat_infinite());
        } else {
            sink.append(decoder);
        }

        self.loaded = Some(LoadedClip {
            _stream: stream,
            sink,
            duration_ms,
            volume: params.volume,
            muted: params.muted,
            correct_pitch: params.correct_pitch,
        });

        tracing::info!("Clip loaded for playback ({} ms)", duration_ms);
        Ok(duration_ms)
    }

    async fn emit_status(&mut self) {
        let Some(clip) = self.loaded.as_ref() else {
            return;
        };

        if clip.sink.empty() {
            // A looping source never runs out; an empty sink means the
            // decoder gave up mid-clip. Terminal for this clip.
            self.loaded = None;
            let _ = self
                .status_tx
                .send(PlaybackStatus::Fault {
                    message: "playback source exhausted".to_string(),
                })
                .await;
            return;
        }

        let pos = clip.sink.get_pos().as_millis() as u64;
        let position_ms = if clip.duration_ms > 0 {
            // The looping source reports an ever-growing position
            pos % clip.duration_ms
        } else {
            pos
        };

        let status = PlaybackStatus::Tick {
            position_ms,
            duration_ms: clip.duration_ms,
            is_playing: !clip.sink.is_paused(),
            volume: clip.volume,
            muted: clip.muted,
            rate: clip.sink.speed(),
            correct_pitch: clip.correct_pitch,
        };
        let _ = self.status_tx.send(status).await;
    }
}

/// Handle for communicating with the Player
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerCommand>,
}

impl PlayerHandle {
    pub fn new(tx: mpsc::Sender<PlayerCommand>) -> Self {
        Self { tx }
    }

    async fn send(&self, cmd: PlayerCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send player command: {}", e))
    }
}

#[async_trait]
impl PlaybackEngine for PlayerHandle {
    async fn load(&mut self, path: &Path, params: PlaybackParams) -> Result<u64> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(PlayerCommand::Load {
            path: PathBuf::from(path),
            params,
            reply,
        })
        .await?;

        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive load response: {}", e))?
    }

    async fn unload(&mut self) -> Result<()> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(PlayerCommand::Unload(reply)).await?;
        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive unload response: {}", e))
    }

    async fn play(&mut self) -> Result<()> {
        self.send(PlayerCommand::Play).await
    }

    async fn pause(&mut self) -> Result<()> {
        self.send(PlayerCommand::Pause).await
    }

    async fn stop(&mut self) -> Result<()> {
        self.send(PlayerCommand::Stop).await
    }

    async fn seek_to(&mut self, position_ms: u64, resume: bool) -> Result<()> {
        self.send(PlayerCommand::SeekTo {
            position_ms,
            resume,
        })
        .await
    }

    async fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.send(PlayerCommand::SetVolume(volume)).await
    }

    async fn set_muted(&mut self, muted: bool) -> Result<()> {
        self.send(PlayerCommand::SetMuted(muted)).await
    }

    async fn set_rate(&mut self, rate: f32, correct_pitch: bool) -> Result<()> {
        self.send(PlayerCommand::SetRate {
            rate,
            correct_pitch,
        })
        .await
    }
}
