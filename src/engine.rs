use crate::messages::{PlaybackParams, StopOutcome};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Device capture capability as seen by the session.
///
/// The real implementation is a handle to the recorder actor; tests inject
/// mocks. Both operations are transition edges and must fully complete (or
/// fail) before the session considers the resource acquired or released.
#[async_trait]
pub trait CaptureEngine: Send {
    /// Acquire the microphone and start capturing a new clip.
    /// Returns the path of the in-progress clip file.
    async fn begin(&mut self) -> Result<PathBuf>;

    /// Stop capturing and finalize the clip.
    async fn finish(&mut self) -> Result<StopOutcome>;
}

/// Device playback capability as seen by the session.
///
/// `load`/`unload` are transition edges with confirmed completion; the
/// transport operations are requests whose applied values come back on the
/// next status tick.
#[async_trait]
pub trait PlaybackEngine: Send {
    /// Load a clip and apply the initial params. Returns the clip duration
    /// in milliseconds. The clip starts paused.
    async fn load(&mut self, path: &Path, params: PlaybackParams) -> Result<u64>;

    /// Release the loaded clip and the output device entirely.
    async fn unload(&mut self) -> Result<()>;

    async fn play(&mut self) -> Result<()>;
    async fn pause(&mut self) -> Result<()>;

    /// Halt playback and rewind to the start, keeping the clip loaded.
    async fn stop(&mut self) -> Result<()>;

    /// Move to `position_ms`, resuming playback afterwards if `resume`.
    async fn seek_to(&mut self, position_ms: u64, resume: bool) -> Result<()>;

    async fn set_volume(&mut self, volume: f32) -> Result<()>;
    async fn set_muted(&mut self, muted: bool) -> Result<()>;
    async fn set_rate(&mut self, rate: f32, correct_pitch: bool) -> Result<()>;
}
