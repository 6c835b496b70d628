//! Drives the session loop with mock device engines and checks the
//! mode-switch invariants end to end.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use tapeloop::engine::{CaptureEngine, PlaybackEngine};
use tapeloop::messages::{
    CaptureStatus, FinishedRecording, PlaybackParams, PlaybackStatus, SessionCommand, StopOutcome,
};
use tapeloop::session::{Session, SessionHandle, SessionSnapshot};

/// Shared observation point for both mock engines.
#[derive(Clone, Default)]
struct Probe {
    calls: Arc<Mutex<Vec<String>>>,
    capture_live: Arc<AtomicBool>,
    playback_live: Arc<AtomicBool>,
    violations: Arc<AtomicUsize>,
}

impl Probe {
    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

#[derive(Clone, Copy)]
enum StopMode {
    Finished(u64),
    NoData,
}

struct MockCapture {
    probe: Probe,
    stop_mode: Arc<Mutex<StopMode>>,
    begin_delay: Duration,
}

#[async_trait]
impl CaptureEngine for MockCapture {
    async fn begin(&mut self) -> Result<PathBuf> {
        self.probe.log("capture.begin");
        if self.probe.playback_live.load(Ordering::SeqCst) {
            self.probe.violations.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(self.begin_delay).await;
        self.probe.capture_live.store(true, Ordering::SeqCst);
        Ok(PathBuf::from("/tmp/mock-clip.wav"))
    }

    async fn finish(&mut self) -> Result<StopOutcome> {
        self.probe.log("capture.finish");
        self.probe.capture_live.store(false, Ordering::SeqCst);
        match *self.stop_mode.lock().unwrap() {
            StopMode::NoData => Ok(StopOutcome::NoData),
            StopMode::Finished(duration_ms) => {
                let file = tempfile::Builder::new()
                    .prefix("tapeloop-test-")
                    .suffix(".wav")
                    .tempfile()?;
                Ok(StopOutcome::Finished(FinishedRecording::new(
                    file,
                    duration_ms,
                )))
            }
        }
    }
}

struct MockPlayback {
    probe: Probe,
    duration_ms: u64,
}

#[async_trait]
impl PlaybackEngine for MockPlayback {
    async fn load(&mut self, _path: &Path, params: PlaybackParams) -> Result<u64> {
        self.probe.log(format!(
            "playback.load looping={} volume={}",
            params.looping, params.volume
        ));
        if self.probe.capture_live.load(Ordering::SeqCst) {
            self.probe.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.probe.playback_live.store(true, Ordering::SeqCst);
        Ok(self.duration_ms)
    }

    async fn unload(&mut self) -> Result<()> {
        self.probe.log("playback.unload");
        self.probe.playback_live.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        self.probe.log("playback.play");
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        self.probe.log("playback.pause");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.probe.log("playback.stop");
        Ok(())
    }

    async fn seek_to(&mut self, position_ms: u64, resume: bool) -> Result<()> {
        self.probe
            .log(format!("playback.seek_to {} resume={}", position_ms, resume));
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.probe.log(format!("playback.set_volume {}", volume));
        Ok(())
    }

    async fn set_muted(&mut self, muted: bool) -> Result<()> {
        self.probe.log(format!("playback.set_muted {}", muted));
        Ok(())
    }

    async fn set_rate(&mut self, rate: f32, correct_pitch: bool) -> Result<()> {
        self.probe
            .log(format!("playback.set_rate {} pitch={}", rate, correct_pitch));
        Ok(())
    }
}

struct Harness {
    handle: SessionHandle,
    capture_status_tx: mpsc::Sender<CaptureStatus>,
    playback_status_tx: mpsc::Sender<PlaybackStatus>,
    probe: Probe,
    stop_mode: Arc<Mutex<StopMode>>,
}

fn spawn_session(begin_delay: Duration, clip_duration_ms: u64) -> Harness {
    let probe = Probe::default();
    let stop_mode = Arc::new(Mutex::new(StopMode::Finished(clip_duration_ms)));

    let capture = MockCapture {
        probe: probe.clone(),
        stop_mode: stop_mode.clone(),
        begin_delay,
    };
    let playback = MockPlayback {
        probe: probe.clone(),
        duration_ms: clip_duration_ms,
    };

    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (capture_status_tx, capture_status_rx) = mpsc::channel(64);
    let (playback_status_tx, playback_status_rx) = mpsc::channel(64);
    let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

    let session = Session::new(
        Box::new(capture),
        Box::new(playback),
        cmd_rx,
        capture_status_rx,
        playback_status_rx,
        snapshot_tx,
    );
    tokio::spawn(session.run());

    Harness {
        handle: SessionHandle::new(cmd_tx, snapshot_rx),
        capture_status_tx,
        playback_status_tx,
        probe,
        stop_mode,
    }
}

async fn wait_for<F>(handle: &SessionHandle, what: &str, pred: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let mut rx = handle.watch();
    tokio::time::timeout(Duration::from_secs(2), async move {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if pred(&snapshot) {
                return snapshot;
            }
            rx.changed().await.expect("session loop ended early");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

fn playing_tick(duration_ms: u64, is_playing: bool) -> PlaybackStatus {
    PlaybackStatus::Tick {
        position_ms: 0,
        duration_ms,
        is_playing,
        volume: 1.0,
        muted: false,
        rate: 1.0,
        correct_pitch: true,
    }
}

async fn record_and_finish(harness: &Harness) {
    harness
        .handle
        .send(SessionCommand::BeginRecording)
        .await
        .unwrap();
    wait_for(&harness.handle, "recording", |s| s.is_recording).await;
    harness
        .handle
        .send(SessionCommand::EndRecording)
        .await
        .unwrap();
    wait_for(&harness.handle, "playback ready", |s| s.playback_allowed).await;
}

#[tokio::test]
async fn capture_and_playback_are_never_live_together() {
    let harness = spawn_session(Duration::ZERO, 100_000);

    for _ in 0..3 {
        record_and_finish(&harness).await;
    }

    assert_eq!(harness.probe.violations.load(Ordering::SeqCst), 0);
    assert_eq!(harness.probe.count("capture.begin"), 3);
    assert_eq!(harness.probe.count("playback.load"), 3);
    // Every re-record after the first must release the loaded clip first
    assert_eq!(harness.probe.count("playback.unload"), 2);

    let calls = harness.probe.calls();
    let second_begin = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| *c == "capture.begin")
        .nth(1)
        .map(|(i, _)| i)
        .unwrap();
    let first_unload = calls.iter().position(|c| c == "playback.unload").unwrap();
    assert!(first_unload < second_begin, "release must precede acquire");
}

#[tokio::test]
async fn loading_brackets_the_transition_and_rejects_reentry() {
    let harness = spawn_session(Duration::from_millis(150), 100_000);

    harness
        .handle
        .send(SessionCommand::BeginRecording)
        .await
        .unwrap();
    wait_for(&harness.handle, "loading", |s| s.is_loading).await;

    // A second begin while the first transition is in flight must be ignored
    harness
        .handle
        .send(SessionCommand::BeginRecording)
        .await
        .unwrap();

    let snapshot = wait_for(&harness.handle, "recording", |s| {
        s.is_recording && !s.is_loading
    })
    .await;
    assert!(snapshot.recording_path.is_some());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.probe.count("capture.begin"), 1);
}

#[tokio::test]
async fn stopping_with_no_data_returns_to_idle() {
    let harness = spawn_session(Duration::ZERO, 100_000);
    *harness.stop_mode.lock().unwrap() = StopMode::NoData;

    harness
        .handle
        .send(SessionCommand::BeginRecording)
        .await
        .unwrap();
    wait_for(&harness.handle, "recording", |s| s.is_recording).await;

    harness
        .handle
        .send(SessionCommand::EndRecording)
        .await
        .unwrap();
    let snapshot = wait_for(&harness.handle, "idle", |s| {
        !s.is_recording && !s.is_loading
    })
    .await;

    assert!(!snapshot.playback_allowed);
    assert!(snapshot.recording_path.is_none());
    assert_eq!(harness.probe.count("playback.load"), 0);
}

#[tokio::test]
async fn device_finished_capture_triggers_the_stop_transition() {
    let harness = spawn_session(Duration::ZERO, 100_000);

    harness
        .handle
        .send(SessionCommand::BeginRecording)
        .await
        .unwrap();
    wait_for(&harness.handle, "recording", |s| s.is_recording).await;

    harness
        .capture_status_tx
        .send(CaptureStatus {
            duration_ms: 1_234,
            finished: true,
        })
        .await
        .unwrap();

    let snapshot = wait_for(&harness.handle, "playback ready", |s| s.playback_allowed).await;
    assert_eq!(snapshot.recording_duration_ms, Some(1_234));
    assert_eq!(harness.probe.count("capture.finish"), 1);
    assert_eq!(harness.probe.count("playback.load"), 1);
}

#[tokio::test]
async fn seek_commit_scales_the_fraction_and_resumes_only_if_playing() {
    let harness = spawn_session(Duration::ZERO, 100_000);
    record_and_finish(&harness).await;

    // Playing clip: the gesture pauses, then resumes from the target
    harness.handle.send(SessionCommand::Play).await.unwrap();
    harness
        .playback_status_tx
        .send(playing_tick(100_000, true))
        .await
        .unwrap();
    wait_for(&harness.handle, "playing", |s| s.is_playing).await;

    harness.handle.send(SessionCommand::SeekBegin).await.unwrap();
    wait_for(&harness.handle, "seeking", |s| s.is_seeking).await;
    harness
        .handle
        .send(SessionCommand::SeekCommit(0.5))
        .await
        .unwrap();
    let snapshot = wait_for(&harness.handle, "seek done", |s| !s.is_seeking).await;
    assert_eq!(snapshot.position_ms, Some(50_000));
    assert!(snapshot.is_playing);
    assert!(
        harness
            .probe
            .calls()
            .contains(&"playback.seek_to 50000 resume=true".to_string())
    );

    // Paused clip: the position moves but playback stays paused
    harness.handle.send(SessionCommand::Pause).await.unwrap();
    harness
        .playback_status_tx
        .send(playing_tick(100_000, false))
        .await
        .unwrap();
    wait_for(&harness.handle, "paused", |s| !s.is_playing).await;

    harness.handle.send(SessionCommand::SeekBegin).await.unwrap();
    harness
        .handle
        .send(SessionCommand::SeekCommit(0.25))
        .await
        .unwrap();
    let snapshot = wait_for(&harness.handle, "seek done", |s| {
        !s.is_seeking && s.position_ms == Some(25_000)
    })
    .await;
    assert!(!snapshot.is_playing);
    assert!(
        harness
            .probe
            .calls()
            .contains(&"playback.seek_to 25000 resume=false".to_string())
    );
}

#[tokio::test]
async fn status_ticks_are_authoritative_over_requested_values() {
    let harness = spawn_session(Duration::ZERO, 100_000);
    record_and_finish(&harness).await;

    harness
        .handle
        .send(SessionCommand::SetVolume(0.3))
        .await
        .unwrap();
    let snapshot = wait_for(&harness.handle, "optimistic volume", |s| {
        (s.volume - 0.3).abs() < f32::EPSILON
    })
    .await;
    assert!(!snapshot.muted);

    // The device reports what it actually applied; that wins
    harness
        .playback_status_tx
        .send(PlaybackStatus::Tick {
            position_ms: 10_000,
            duration_ms: 100_000,
            is_playing: false,
            volume: 0.25,
            muted: true,
            rate: 1.5,
            correct_pitch: false,
        })
        .await
        .unwrap();

    let snapshot = wait_for(&harness.handle, "mirrored status", |s| {
        (s.volume - 0.25).abs() < f32::EPSILON
    })
    .await;
    assert!(snapshot.muted);
    assert!((snapshot.rate - 1.5).abs() < f32::EPSILON);
    assert!(!snapshot.correct_pitch);
    assert_eq!(snapshot.position_ms, Some(10_000));
}

#[tokio::test]
async fn stale_status_for_a_released_handle_is_discarded() {
    let harness = spawn_session(Duration::ZERO, 100_000);
    record_and_finish(&harness).await;

    // A capture report arriving after the capture handle is gone
    harness
        .capture_status_tx
        .send(CaptureStatus {
            duration_ms: 999_999,
            finished: true,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = harness.handle.snapshot();
    assert!(snapshot.playback_allowed);
    assert_ne!(snapshot.recording_duration_ms, Some(999_999));
    // The stale `finished` must not re-run the stop transition
    assert_eq!(harness.probe.count("capture.finish"), 1);
}

#[tokio::test]
async fn playback_fault_is_terminal_for_the_clip() {
    let harness = spawn_session(Duration::ZERO, 100_000);
    record_and_finish(&harness).await;

    harness
        .playback_status_tx
        .send(PlaybackStatus::Fault {
            message: "decoder gave up".to_string(),
        })
        .await
        .unwrap();

    let snapshot = wait_for(&harness.handle, "fault handled", |s| !s.playback_allowed).await;
    assert_eq!(snapshot.position_ms, None);
    assert_eq!(snapshot.duration_ms, None);
    assert!(!snapshot.is_playing);
    assert_eq!(harness.probe.count("playback.unload"), 1);

    // Transport is a no-op without a clip
    harness.handle.send(SessionCommand::Play).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.probe.count("playback.play"), 0);
}
