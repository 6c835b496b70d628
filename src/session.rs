use crate::engine::{CaptureEngine, PlaybackEngine};
use crate::messages::{
    CaptureStatus, FinishedRecording, PlaybackParams, PlaybackStatus, SessionCommand, StopOutcome,
};
use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};

/// The mutually exclusive operating state of the session. Holding the clip
/// inside the variant makes "both resources live" unrepresentable: the
/// recording arm carries the in-progress clip path, the playback arm owns the
/// finalized clip file.
enum Mode {
    Idle,
    Recording { path: PathBuf },
    Playback { clip: FinishedRecording },
}

/// Read-only view of the session, published on a watch channel after every
/// handled message. Surfaces render from this and nothing else.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub is_recording: bool,
    pub is_loading: bool,
    pub is_seeking: bool,
    pub recording_path: Option<PathBuf>,
    pub recording_duration_ms: Option<u64>,
    pub playback_allowed: bool,
    pub is_playing: bool,
    pub position_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub volume: f32,
    pub muted: bool,
    pub rate: f32,
    pub correct_pitch: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            is_recording: false,
            is_loading: false,
            is_seeking: false,
            recording_path: None,
            recording_duration_ms: None,
            playback_allowed: false,
            is_playing: false,
            position_ms: None,
            duration_ms: None,
            volume: 1.0,
            muted: false,
            rate: 1.0,
            correct_pitch: true,
        }
    }
}

impl SessionSnapshot {
    /// "MM:SS" for the clip recorded so far ("00:00" before the first status)
    pub fn recording_timestamp(&self) -> String {
        format_mmss(self.recording_duration_ms.unwrap_or(0))
    }

    /// "MM:SS / MM:SS" once position and duration are known, empty before
    pub fn playback_timestamp(&self) -> String {
        match (self.position_ms, self.duration_ms) {
            (Some(position), Some(duration)) if self.playback_allowed => {
                format!("{} / {}", format_mmss(position), format_mmss(duration))
            }
            _ => String::new(),
        }
    }

    /// Playback position as a fraction of the clip, for a seek control
    pub fn seek_fraction(&self) -> f64 {
        match (self.position_ms, self.duration_ms) {
            (Some(position), Some(duration)) if duration > 0 => {
                position as f64 / duration as f64
            }
            _ => 0.0,
        }
    }
}

/// Format milliseconds as "MM:SS", flooring partial seconds.
pub fn format_mmss(millis: u64) -> String {
    let total_seconds = millis / 1000;
    let seconds = total_seconds % 60;
    let minutes = total_seconds / 60;
    format!("{:02}:{:02}", minutes, seconds)
}

/// Owns session state and the two device engines; the single writer.
///
/// Runs as an event loop over user commands and device status messages,
/// handling exactly one at a time, so no two transitions can interleave and a
/// status message can never observe a half-switched mode.
pub struct Session {
    capture: Box<dyn CaptureEngine>,
    playback: Box<dyn PlaybackEngine>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    capture_rx: mpsc::Receiver<CaptureStatus>,
    playback_rx: mpsc::Receiver<PlaybackStatus>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    mode: Mode,
    is_loading: bool,
    is_seeking: bool,
    resume_after_seek: bool,
    recording_duration_ms: Option<u64>,
    position_ms: Option<u64>,
    duration_ms: Option<u64>,
    playback_allowed: bool,
    is_playing: bool,
    volume: f32,
    muted: bool,
    rate: f32,
    correct_pitch: bool,
}

impl Session {
    pub fn new(
        capture: Box<dyn CaptureEngine>,
        playback: Box<dyn PlaybackEngine>,
        cmd_rx: mpsc::Receiver<SessionCommand>,
        capture_rx: mpsc::Receiver<CaptureStatus>,
        playback_rx: mpsc::Receiver<PlaybackStatus>,
        snapshot_tx: watch::Sender<SessionSnapshot>,
    ) -> Self {
        Self {
            capture,
            playback,
            cmd_rx,
            capture_rx,
            playback_rx,
            snapshot_tx,
            mode: Mode::Idle,
            is_loading: false,
            is_seeking: false,
            resume_after_seek: false,
            recording_duration_ms: None,
            position_ms: None,
            duration_ms: None,
            playback_allowed: false,
            is_playing: false,
            volume: 1.0,
            muted: false,
            rate: 1.0,
            correct_pitch: true,
        }
    }

    pub async fn run(mut self) {
        self.publish();
        loop {
            tokio::select! {
                Some(cmd) = self.cmd_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                Some(status) = self.capture_rx.recv() => {
                    self.handle_capture_status(status).await;
                }
                Some(status) = self.playback_rx.recv() => {
                    self.handle_playback_status(status).await;
                }
                else => break,
            }
            self.publish();
        }
        tracing::debug!("Session loop finished");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::BeginRecording => self.begin_recording().await,
            SessionCommand::EndRecording => self.end_recording().await,
            SessionCommand::Play => self.play().await,
            SessionCommand::Pause => self.pause().await,
            SessionCommand::Stop => self.stop().await,
            SessionCommand::SetMuted(muted) => self.set_muted(muted).await,
            SessionCommand::SetVolume(volume) => self.set_volume(volume).await,
            SessionCommand::SetRate {
                rate,
                correct_pitch,
            } => self.set_rate(rate, correct_pitch).await,
            SessionCommand::SeekBegin => self.seek_begin().await,
            SessionCommand::SeekCommit(fraction) => self.seek_commit(fraction).await,
        }
    }

    /// Release any loaded clip and start a new recording.
    async fn begin_recording(&mut self) {
        if self.is_loading {
            tracing::debug!("Transition in progress, ignoring begin");
            return;
        }
        if matches!(self.mode, Mode::Recording { .. }) {
            tracing::debug!("Already recording, ignoring begin");
            return;
        }

        self.is_loading = true;
        self.publish();

        // Release the playback resource completely before touching the
        // microphone; the clip file is deleted when the handle drops.
        if let Mode::Playback { clip } = std::mem::replace(&mut self.mode, Mode::Idle) {
            if let Err(e) = self.playback.unload().await {
                tracing::warn!("Failed to release playback: {:#}", e);
            }
            drop(clip);
        }
        self.playback_allowed = false;
        self.is_playing = false;
        self.is_seeking = false;
        self.position_ms = None;
        self.duration_ms = None;

        match self.capture.begin().await {
            Ok(path) => {
                self.recording_duration_ms = Some(0);
                self.mode = Mode::Recording { path };
            }
            Err(e) => {
                tracing::error!("Failed to start recording: {:#}", e);
                self.mode = Mode::Idle;
            }
        }

        self.is_loading = false;
    }

    /// Stop the capture and, if it produced audio, load it for playback.
    async fn end_recording(&mut self) {
        if self.is_loading {
            tracing::debug!("Transition in progress, ignoring end");
            return;
        }
        if !matches!(self.mode, Mode::Recording { .. }) {
            tracing::debug!("No active recording, ignoring end");
            return;
        }

        self.is_loading = true;
        self.publish();
        self.mode = Mode::Idle;

        match self.capture.finish().await {
            Err(e) => {
                tracing::error!("Failed to stop capture: {:#}", e);
            }
            Ok(StopOutcome::NoData) => {
                tracing::info!("Stop was called too quickly, no audio was captured");
            }
            Ok(StopOutcome::Finished(clip)) => {
                let params = PlaybackParams {
                    looping: true,
                    volume: self.volume,
                    muted: self.muted,
                    rate: self.rate,
                    correct_pitch: self.correct_pitch,
                };
                match self.playback.load(clip.path(), params).await {
                    Ok(duration_ms) => {
                        self.duration_ms = Some(duration_ms);
                        self.position_ms = Some(0);
                        self.playback_allowed = true;
                        self.is_playing = false;
                        self.mode = Mode::Playback { clip };
                        tracing::info!("Recording ready for playback ({} ms)", duration_ms);
                    }
                    Err(e) => {
                        tracing::error!("Failed to load recording for playback: {:#}", e);
                    }
                }
            }
        }

        self.is_loading = false;
    }

    /// Capture report from the device. Ignored once the capture handle is
    /// gone; a report for a released handle must not touch state.
    async fn handle_capture_status(&mut self, status: CaptureStatus) {
        if !matches!(self.mode, Mode::Recording { .. }) {
            return;
        }

        self.recording_duration_ms = Some(status.duration_ms);

        // The device stopped capturing on its own; finalize as if the user
        // had pressed stop, unless a transition is already running.
        if status.finished && !self.is_loading {
            tracing::info!("Capture finished on its own, switching to playback");
            self.end_recording().await;
        }
    }

    /// Playback report from the device. Mirrors back the applied values so
    /// surfaces show what the device actually did, not what was requested.
    async fn handle_playback_status(&mut self, status: PlaybackStatus) {
        if !matches!(self.mode, Mode::Playback { .. }) {
            return;
        }

        match status {
            PlaybackStatus::Tick {
                position_ms,
                duration_ms,
                is_playing,
                volume,
                muted,
                rate,
                correct_pitch,
            } => {
                if duration_ms > 0 {
                    self.duration_ms = Some(duration_ms);
                }
                if !self.is_seeking {
                    let clamped = match self.duration_ms {
                        Some(duration) => position_ms.min(duration),
                        None => position_ms,
                    };
                    self.position_ms = Some(clamped);
                }
                self.is_playing = is_playing;
                self.volume = volume;
                self.muted = muted;
                self.rate = rate;
                self.correct_pitch = correct_pitch;
                self.playback_allowed = true;
            }
            PlaybackStatus::Fault { message } => {
                tracing::error!("Fatal playback fault: {}", message);
                self.is_loading = true;
                self.publish();
                if let Err(e) = self.playback.unload().await {
                    tracing::warn!("Failed to release faulted playback: {:#}", e);
                }
                self.mode = Mode::Idle;
                self.playback_allowed = false;
                self.is_playing = false;
                self.is_seeking = false;
                self.position_ms = None;
                self.duration_ms = None;
                self.is_loading = false;
            }
        }
    }

    async fn play(&mut self) {
        if !matches!(self.mode, Mode::Playback { .. }) {
            return;
        }
        if let Err(e) = self.playback.play().await {
            tracing::warn!("Failed to start playback: {:#}", e);
        } else {
            self.is_playing = true;
        }
    }

    async fn pause(&mut self) {
        if !matches!(self.mode, Mode::Playback { .. }) {
            return;
        }
        if let Err(e) = self.playback.pause().await {
            tracing::warn!("Failed to pause playback: {:#}", e);
        } else {
            self.is_playing = false;
        }
    }

    async fn stop(&mut self) {
        if !matches!(self.mode, Mode::Playback { .. }) {
            return;
        }
        if let Err(e) = self.playback.stop().await {
            tracing::warn!("Failed to stop playback: {:#}", e);
        } else {
            self.is_playing = false;
            self.position_ms = Some(0);
        }
    }

    async fn set_muted(&mut self, muted: bool) {
        if !matches!(self.mode, Mode::Playback { .. }) {
            return;
        }
        if let Err(e) = self.playback.set_muted(muted).await {
            tracing::warn!("Failed to set mute: {:#}", e);
        } else {
            self.muted = muted;
        }
    }

    async fn set_volume(&mut self, volume: f32) {
        if !matches!(self.mode, Mode::Playback { .. }) {
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        if let Err(e) = self.playback.set_volume(volume).await {
            tracing::warn!("Failed to set volume: {:#}", e);
        } else {
            self.volume = volume;
        }
    }

    async fn set_rate(&mut self, rate: f32, correct_pitch: bool) {
        if !matches!(self.mode, Mode::Playback { .. }) {
            return;
        }
        if rate <= 0.0 {
            return;
        }
        // Rate changes are best-effort; a backend that rejects them simply
        // never reflects the new value on a status tick.
        if self.playback.set_rate(rate, correct_pitch).await.is_ok() {
            self.rate = rate;
            self.correct_pitch = correct_pitch;
        }
    }

    /// First phase of a seek gesture: pause, remember whether to resume, and
    /// suppress status-driven position updates until the commit.
    async fn seek_begin(&mut self) {
        if !matches!(self.mode, Mode::Playback { .. }) || self.is_seeking {
            return;
        }
        self.is_seeking = true;
        self.resume_after_seek = self.is_playing;
        if let Err(e) = self.playback.pause().await {
            tracing::warn!("Failed to pause for seek: {:#}", e);
        }
        self.is_playing = false;
    }

    /// Second phase: move to `fraction` of the clip, resuming only if the
    /// clip was playing when the gesture started.
    async fn seek_commit(&mut self, fraction: f64) {
        if !matches!(self.mode, Mode::Playback { .. }) {
            return;
        }
        self.is_seeking = false;

        let duration = self.duration_ms.unwrap_or(0);
        let target_ms = (fraction.clamp(0.0, 1.0) * duration as f64) as u64;
        let resume = self.resume_after_seek;
        self.resume_after_seek = false;

        if let Err(e) = self.playback.seek_to(target_ms, resume).await {
            tracing::warn!("Failed to seek: {:#}", e);
            return;
        }
        self.position_ms = Some(target_ms);
        self.is_playing = resume;
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            is_recording: matches!(self.mode, Mode::Recording { .. }),
            is_loading: self.is_loading,
            is_seeking: self.is_seeking,
            recording_path: match &self.mode {
                Mode::Recording { path } => Some(path.clone()),
                _ => None,
            },
            recording_duration_ms: self.recording_duration_ms,
            playback_allowed: self.playback_allowed,
            is_playing: self.is_playing,
            position_ms: self.position_ms,
            duration_ms: self.duration_ms,
            volume: self.volume,
            muted: self.muted,
            rate: self.rate,
            correct_pitch: self.correct_pitch,
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

/// Handle for driving the session and observing its state
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn new(
        cmd_tx: mpsc::Sender<SessionCommand>,
        snapshot_rx: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self {
            cmd_tx,
            snapshot_rx,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    pub async fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send session command: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mmss() {
        assert_eq!(format_mmss(0), "00:00");
        assert_eq!(format_mmss(59_999), "00:59");
        assert_eq!(format_mmss(125_000), "02:05");
        assert_eq!(format_mmss(600_000), "10:00");
    }

    #[test]
    fn test_playback_timestamp() {
        let mut snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.playback_timestamp(), "");

        snapshot.playback_allowed = true;
        snapshot.position_ms = Some(5_000);
        snapshot.duration_ms = Some(125_000);
        assert_eq!(snapshot.playback_timestamp(), "00:05 / 02:05");
    }

    #[test]
    fn test_seek_fraction() {
        let mut snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.seek_fraction(), 0.0);

        snapshot.position_ms = Some(25_000);
        snapshot.duration_ms = Some(100_000);
        assert_eq!(snapshot.seek_fraction(), 0.25);

        snapshot.duration_ms = Some(0);
        assert_eq!(snapshot.seek_fraction(), 0.0);
    }
}
