use crate::audio::{AudioCapture, AudioFormat, AudioSink, WavSink};
use crate::engine::CaptureEngine;
use crate::messages::{CaptureStatus, FinishedRecording, RecorderCommand, StopOutcome};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

/// Coordinates audio capture and encoding
///
/// This service:
/// - Manages AudioCapture lifecycle, one temp file and WAV sink per clip
/// - Receives audio chunks via channel and streams them to the sink
/// - Emits CaptureStatus (clip duration so far) after every written chunk
/// - Reports a device fault as a `finished` status so the owner can finalize
///
/// Note: This service holds cpal::Stream which is !Send, so it must be spawned
/// on a LocalSet using tokio::task::spawn_local.
pub struct Recorder {
    format: AudioFormat,
    cmd_rx: mpsc::Receiver<RecorderCommand>,
    audio_rx: mpsc::Receiver<Vec<f32>>,
    audio_tx: mpsc::Sender<Vec<f32>>,
    fault_rx: mpsc::UnboundedReceiver<String>,
    fault_tx: mpsc::UnboundedSender<String>,
    status_tx: mpsc::Sender<CaptureStatus>,
    sink: Option<Box<dyn AudioSink + Send>>,
    stream: Option<cpal::Stream>,
    temp_file: Option<NamedTempFile>,
    samples_written: u64,
    recording: bool,
}

impl Recorder {
    pub fn new(
        format: AudioFormat,
        cmd_rx: mpsc::Receiver<RecorderCommand>,
        audio_rx: mpsc::Receiver<Vec<f32>>,
        audio_tx: mpsc::Sender<Vec<f32>>,
        status_tx: mpsc::Sender<CaptureStatus>,
    ) -> Self {
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        Self {
            format,
            cmd_rx,
            audio_rx,
            audio_tx,
            fault_rx,
            fault_tx,
            status_tx,
            sink: None,
            stream: None,
            temp_file: None,
            samples_written: 0,
            recording: false,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                // Handle commands from the session
                Some(cmd) = self.cmd_rx.recv() => {
                    self.handle_command(cmd).await;
                }

                // Receive and process audio chunks (only when recording)
                Some(chunk) = self.audio_rx.recv(), if self.recording => {
                    self.write_chunk(chunk).await;
                }

                // A stream fault means the device stopped capturing on its own
                Some(message) = self.fault_rx.recv(), if self.recording => {
                    tracing::warn!("Capture stream fault: {}", message);
                    self.emit_status(true).await;
                }

                else => break,
            }
        }
    }

    async fn write_chunk(&mut self, chunk: Vec<f32>) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        let len = chunk.len() as u64;
        // Vec is moved to the sink, no copy
        if let Err(e) = sink.write_chunk(chunk) {
            tracing::error!("Failed to write audio chunk: {}", e);
            self.recording = false;
            return;
        }

        self.samples_written += len;
        self.emit_status(false).await;
    }

    async fn emit_status(&self, finished: bool) {
        let status = CaptureStatus {
            duration_ms: self.format.millis_for_samples(self.samples_written),
            finished,
        };
        let _ = self.status_tx.send(status).await;
    }

    async fn handle_command(&mut self, cmd: RecorderCommand) {
        match cmd {
            RecorderCommand::Start(reply) => {
                let _ = reply.send(self.start().await);
            }
            RecorderCommand::Stop(reply) => {
                let _ = reply.send(self.stop().await);
            }
        }
    }

    async fn start(&mut self) -> Result<PathBuf> {
        let temp_file = tempfile::Builder::new()
            .prefix("tapeloop-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| anyhow::anyhow!("Failed to create temp file: {}", e))?;

        let path = temp_file.path().to_path_buf();

        self.sink = Some(Box::new(WavSink::new(path.clone(), self.format)?));
        self.temp_file = Some(temp_file);
        self.samples_written = 0;

        let stream =
            match AudioCapture::start(self.format, self.audio_tx.clone(), self.fault_tx.clone()) {
                Ok(stream) => stream,
                Err(e) => {
                    // Leave nothing half-acquired for the next start
                    self.sink = None;
                    self.temp_file = None;
                    return Err(e);
                }
            };
        self.stream = Some(stream);
        self.recording = true;

        self.emit_status(false).await;
        tracing::info!("Recording started: {:?}", path);
        Ok(path)
    }

    async fn stop(&mut self) -> Result<StopOutcome> {
        self.recording = false;

        // Drop the stream to stop audio capture
        self.stream = None;

        // Drain any remaining audio chunks from the channel and write them to the sink
        if let Some(sink) = self.sink.as_mut() {
            while let Ok(chunk) = self.audio_rx.try_recv() {
                if let Err(e) = sink.write_chunk(chunk) {
                    tracing::error!("Failed to write audio chunk during drain: {}", e);
                    break;
                }
            }
        }

        // Replace audio channel with a fresh one for the next recording.
        // This drops the old receiver, which causes the bridge task's tx.send()
        // to fail and signals it to exit cleanly.
        let (new_audio_tx, new_audio_rx) = mpsc::channel(100);
        self.audio_tx = new_audio_tx;
        self.audio_rx = new_audio_rx;

        // Give the bridge task a moment to receive the Err from its send and exit
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| anyhow::anyhow!("Stop requested but no capture is active"))?;
        let temp_file = self
            .temp_file
            .take()
            .ok_or_else(|| anyhow::anyhow!("Temp file was not created"))?;

        let written = sink.finalize().await?;
        tracing::info!("Recording stopped, {} samples captured", written);

        if written == 0 {
            return Ok(StopOutcome::NoData);
        }

        let duration_ms = self.format.millis_for_samples(written);
        Ok(StopOutcome::Finished(FinishedRecording::new(
            temp_file,
            duration_ms,
        )))
    }
}

/// Handle for communicating with the Recorder
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<RecorderCommand>,
}

impl RecorderHandle {
    pub fn new(tx: mpsc::Sender<RecorderCommand>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl CaptureEngine for RecorderHandle {
    async fn begin(&mut self) -> Result<PathBuf> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.tx
            .send(RecorderCommand::Start(reply))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send start command: {}", e))?;

        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive start response: {}", e))?
    }

    async fn finish(&mut self) -> Result<StopOutcome> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.tx
            .send(RecorderCommand::Stop(reply))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send stop command: {}", e))?;

        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive stop response: {}", e))?
    }
}
