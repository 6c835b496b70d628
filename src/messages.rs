use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::oneshot;

/// User-facing operations on the session, delivered one at a time to the
/// session loop. Surfaces send these; nothing else mutates session state.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    BeginRecording,
    EndRecording,
    Play,
    Pause,
    Stop,
    SetMuted(bool),
    SetVolume(f32),
    SetRate { rate: f32, correct_pitch: bool },
    SeekBegin,
    SeekCommit(f64),
}

/// Commands for the Recorder service
pub enum RecorderCommand {
    Start(oneshot::Sender<Result<PathBuf>>),
    Stop(oneshot::Sender<Result<StopOutcome>>),
}

/// Commands for the Player service
pub enum PlayerCommand {
    Load {
        path: PathBuf,
        params: PlaybackParams,
        reply: oneshot::Sender<Result<u64>>,
    },
    Unload(oneshot::Sender<()>),
    Play,
    Pause,
    Stop,
    SeekTo { position_ms: u64, resume: bool },
    SetVolume(f32),
    SetMuted(bool),
    SetRate { rate: f32, correct_pitch: bool },
}

/// Initial playback settings applied when a clip is loaded, snapshotted from
/// session state at the moment of the record-to-playback transition.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackParams {
    pub looping: bool,
    pub volume: f32,
    pub muted: bool,
    pub rate: f32,
    pub correct_pitch: bool,
}

/// Periodic capture report, emitted while a clip is being recorded.
///
/// `finished` means the capture device stopped on its own (fault or
/// interruption) and the clip should be finalized by the owner.
#[derive(Debug, Clone, Copy)]
pub struct CaptureStatus {
    pub duration_ms: u64,
    pub finished: bool,
}

/// Playback report, emitted on a fixed tick while a clip is loaded and after
/// every transport command. Values are what the device actually applied, not
/// what was requested.
#[derive(Debug, Clone)]
pub enum PlaybackStatus {
    Tick {
        position_ms: u64,
        duration_ms: u64,
        is_playing: bool,
        volume: f32,
        muted: bool,
        rate: f32,
        correct_pitch: bool,
    },
    Fault {
        message: String,
    },
}

/// Outcome of stopping a capture.
///
/// `NoData` is the expected stopped-too-quickly case: the device was stopped
/// before any audio reached the encoder. It is not an error.
pub enum StopOutcome {
    Finished(FinishedRecording),
    NoData,
}

/// A finalized clip. Owns the backing temp file, so dropping the handle
/// deletes the audio from disk.
pub struct FinishedRecording {
    file: NamedTempFile,
    pub duration_ms: u64,
}

impl FinishedRecording {
    pub fn new(file: NamedTempFile, duration_ms: u64) -> Self {
        Self { file, duration_ms }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
