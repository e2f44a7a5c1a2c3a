//! Capture loop.
//!
//! One dedicated thread owns the session: it grabs frames, writes them to the
//! cache and is the only writer of the sequence counter. Commands reach it over
//! a channel, and the wait between frames is a `recv_timeout` on that channel
//! so pause/stop/cancel are picked up within one frame interval.

use super::FrameSource;
use crate::cache;
use crate::error::CaptureError;
use chrono::Local;
use reviewrec_common::validation::validate_region;
use reviewrec_common::{CaptureRegion, CapturedFrame};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Parameters of one capture session.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Session cache directory; created on start.
    pub cache_dir: PathBuf,
    pub region: CaptureRegion,
    pub frame_rate: u32,
}

/// Notifications from a capture session.
#[derive(Debug)]
pub enum CaptureEvent {
    /// A frame was persisted.
    FrameCaptured { sequence: u32, path: PathBuf },
    /// The session stopped; the cache directory is ready for processing.
    Finished { cache_dir: PathBuf, frames: u32 },
    /// The session was cancelled and its cache discarded.
    Cancelled,
    /// The session could not continue.
    Failed(CaptureError),
}

impl CaptureEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CaptureEvent::FrameCaptured { .. })
    }
}

#[derive(Debug)]
enum Command {
    Pause,
    Resume(Option<CaptureRegion>),
    UpdateRegion(CaptureRegion),
    Stop,
    Cancel,
}

/// Cloneable handle that can only stop a session.
#[derive(Debug, Clone)]
pub struct StopHandle {
    commands: mpsc::Sender<Command>,
}

impl StopHandle {
    /// Ask the session to stop. Returns false if it has already ended.
    pub fn stop(&self) -> bool {
        self.commands.send(Command::Stop).is_ok()
    }
}

/// Handle to a running capture session.
pub struct CaptureHandle {
    commands: mpsc::Sender<Command>,
    frames: Arc<AtomicU32>,
    paused: Arc<AtomicBool>,
    cache_dir: PathBuf,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    fn send(&self, command: Command) -> Result<(), CaptureError> {
        self.commands
            .send(command)
            .map_err(|_| CaptureError::InvalidState("Capture session has already ended".into()))
    }

    /// Stop sampling until resumed. No cache writes happen while paused.
    pub fn pause(&self) -> Result<(), CaptureError> {
        self.paused.store(true, Ordering::SeqCst);
        self.send(Command::Pause)
    }

    /// Resume sampling, optionally with a new region.
    pub fn resume(&self, region: Option<CaptureRegion>) -> Result<(), CaptureError> {
        if let Some(region) = &region {
            validate_region(region).map_err(|e| CaptureError::InvalidRegion(e.to_string()))?;
        }
        self.paused.store(false, Ordering::SeqCst);
        self.send(Command::Resume(region))
    }

    /// Change the sampled region. Takes effect with the next frame.
    pub fn update_region(&self, region: CaptureRegion) -> Result<(), CaptureError> {
        validate_region(&region).map_err(|e| CaptureError::InvalidRegion(e.to_string()))?;
        self.send(Command::UpdateRegion(region))
    }

    /// End the session and hand the cache over for processing.
    pub fn stop(&self) -> Result<(), CaptureError> {
        self.send(Command::Stop)
    }

    /// End the session and discard its cache.
    pub fn cancel(&self) -> Result<(), CaptureError> {
        self.send(Command::Cancel)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            commands: self.commands.clone(),
        }
    }

    /// Frames persisted so far.
    pub fn frames_captured(&self) -> u32 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Wait for the capture thread to exit.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }
}

/// Start a capture session on its own thread.
///
/// Fails without capturing anything when the region is invalid or the cache
/// directory cannot be created. Otherwise `events` receives one
/// [`CaptureEvent::FrameCaptured`] per persisted frame followed by exactly one
/// terminal event.
pub fn start_capture(
    config: CaptureConfig,
    source: Box<dyn FrameSource>,
    events: UnboundedSender<CaptureEvent>,
) -> Result<CaptureHandle, CaptureError> {
    validate_region(&config.region).map_err(|e| CaptureError::InvalidRegion(e.to_string()))?;
    cache::create_folder(&config.cache_dir)?;

    let frame_rate = config.frame_rate.max(1);
    info!(
        "Starting capture of {}x{} at ({}, {}), {} fps into {:?}",
        config.region.width,
        config.region.height,
        config.region.x,
        config.region.y,
        frame_rate,
        config.cache_dir
    );

    let (tx, rx) = mpsc::channel();
    let frames = Arc::new(AtomicU32::new(0));
    let paused = Arc::new(AtomicBool::new(false));

    let session = CaptureSession {
        cache_dir: config.cache_dir.clone(),
        region: config.region,
        interval: Duration::from_secs_f64(1.0 / frame_rate as f64),
        source,
        commands: rx,
        events,
        frames: Arc::clone(&frames),
        sequence: 0,
    };

    let thread = std::thread::Builder::new()
        .name("capture".into())
        .spawn(move || session.run())
        .map_err(|e| CaptureError::FrameCaptureFailure(format!("Failed to spawn capture thread: {}", e)))?;

    Ok(CaptureHandle {
        commands: tx,
        frames,
        paused,
        cache_dir: config.cache_dir,
        thread: Some(thread),
    })
}

/// State owned by the capture thread.
struct CaptureSession {
    cache_dir: PathBuf,
    region: CaptureRegion,
    interval: Duration,
    source: Box<dyn FrameSource>,
    commands: mpsc::Receiver<Command>,
    events: UnboundedSender<CaptureEvent>,
    frames: Arc<AtomicU32>,
    /// Next sequence number; advanced only after a successful write.
    sequence: u32,
}

enum Step {
    Continue,
    Finish(CaptureEvent),
}

impl CaptureSession {
    fn run(mut self) {
        let mut paused = false;
        let mut next_due = Instant::now();

        let terminal = loop {
            let command = if paused {
                // Nothing to sample; block until told otherwise.
                self.commands.recv().ok()
            } else {
                let wait = next_due.saturating_duration_since(Instant::now());
                match self.commands.recv_timeout(wait) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => {
                        let started = Instant::now();
                        next_due = started + self.interval;
                        match self.capture_one() {
                            Step::Continue => continue,
                            Step::Finish(event) => break event,
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            };

            match command {
                Some(Command::Pause) => {
                    debug!("Capture paused at sequence {}", self.sequence);
                    paused = true;
                }
                Some(Command::Resume(region)) => {
                    if let Some(region) = region {
                        self.region = region;
                    }
                    if paused {
                        debug!("Capture resumed at sequence {}", self.sequence);
                        paused = false;
                        next_due = Instant::now();
                    }
                }
                Some(Command::UpdateRegion(region)) => {
                    debug!(
                        "Capture region now {}x{} at ({}, {})",
                        region.width, region.height, region.x, region.y
                    );
                    self.region = region;
                }
                Some(Command::Stop) | None => {
                    info!("Capture stopped after {} frame(s)", self.sequence);
                    break CaptureEvent::Finished {
                        cache_dir: self.cache_dir.clone(),
                        frames: self.sequence,
                    };
                }
                Some(Command::Cancel) => {
                    info!("Capture cancelled, discarding {:?}", self.cache_dir);
                    if let Err(e) = cache::clean_session(&self.cache_dir) {
                        warn!("Failed to discard session cache: {}", e);
                    }
                    break CaptureEvent::Cancelled;
                }
            }
        };

        let _ = self.events.send(terminal);
    }

    /// Grab and persist one frame. A failed frame is skipped without
    /// consuming a sequence number.
    fn capture_one(&mut self) -> Step {
        let (width, height, layout, data) = match self.source.grab(&self.region) {
            Ok(grabbed) => grabbed,
            Err(e) => {
                warn!("Skipping frame {}: {}", self.sequence, e);
                return Step::Continue;
            }
        };

        let frame = CapturedFrame {
            sequence: self.sequence,
            width,
            height,
            layout,
            data,
            captured_at: Local::now(),
        };

        match cache::write_frame(&self.cache_dir, &frame) {
            Ok(path) => {
                self.sequence += 1;
                self.frames.store(self.sequence, Ordering::SeqCst);
                let _ = self.events.send(CaptureEvent::FrameCaptured {
                    sequence: frame.sequence,
                    path,
                });
                Step::Continue
            }
            Err(e) if !self.cache_dir.is_dir() => {
                error!("Session cache disappeared: {}", e);
                Step::Finish(CaptureEvent::Failed(CaptureError::CacheUnavailable(
                    e.to_string(),
                )))
            }
            Err(e) => {
                warn!("Skipping frame {}: {}", self.sequence, e);
                Step::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::GrabbedPixels;
    use reviewrec_common::PixelLayout;
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn solid_source() -> Box<dyn FrameSource> {
        Box::new(|region: &CaptureRegion| -> Result<GrabbedPixels, CaptureError> {
            let len = CapturedFrame::expected_len(region.width, region.height);
            Ok((region.width, region.height, PixelLayout::Bgra, vec![128; len]))
        })
    }

    fn config(dir: &Path) -> CaptureConfig {
        CaptureConfig {
            cache_dir: dir.join("clip"),
            region: CaptureRegion::new(0, 0, 8, 6),
            frame_rate: 100,
        }
    }

    /// Drain events until the terminal one.
    fn collect(rx: &mut UnboundedReceiver<CaptureEvent>) -> (Vec<u32>, CaptureEvent) {
        let mut sequences = Vec::new();
        loop {
            match rx.blocking_recv().expect("capture thread dropped events") {
                CaptureEvent::FrameCaptured { sequence, .. } => sequences.push(sequence),
                terminal => return (sequences, terminal),
            }
        }
    }

    fn wait_for_frames(handle: &CaptureHandle, count: u32) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.frames_captured() < count {
            assert!(Instant::now() < deadline, "capture too slow");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_sequences_are_gapless_and_ordered() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let handle = start_capture(config(dir.path()), solid_source(), tx).unwrap();
        wait_for_frames(&handle, 5);
        handle.stop().unwrap();
        handle.join();

        let (sequences, terminal) = collect(&mut rx);
        let expected: Vec<u32> = (0..sequences.len() as u32).collect();
        assert_eq!(sequences, expected);

        match terminal {
            CaptureEvent::Finished { cache_dir, frames } => {
                assert_eq!(frames as usize, sequences.len());
                let on_disk: Vec<u32> = cache::collect_frames(&cache_dir)
                    .iter()
                    .filter_map(|p| cache::parse_sequence(p))
                    .collect();
                assert_eq!(on_disk, expected);
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn test_failed_grabs_do_not_leave_gaps() {
        let dir = TempDir::new().unwrap();
        let mut calls = 0u32;
        let flaky = move |region: &CaptureRegion| -> Result<GrabbedPixels, CaptureError> {
            calls += 1;
            if calls % 2 == 0 {
                return Err(CaptureError::FrameCaptureFailure("flaky".into()));
            }
            let len = CapturedFrame::expected_len(region.width, region.height);
            Ok((region.width, region.height, PixelLayout::Rgba, vec![1; len]))
        };
        let (tx, mut rx) = unbounded_channel();
        let handle = start_capture(config(dir.path()), Box::new(flaky), tx).unwrap();
        wait_for_frames(&handle, 4);
        handle.stop().unwrap();
        handle.join();

        let (sequences, _) = collect(&mut rx);
        let expected: Vec<u32> = (0..sequences.len() as u32).collect();
        assert_eq!(sequences, expected);
    }

    #[test]
    fn test_short_buffers_are_never_written() {
        let dir = TempDir::new().unwrap();
        let truncated = |region: &CaptureRegion| -> Result<GrabbedPixels, CaptureError> {
            Ok((region.width, region.height, PixelLayout::Rgba, vec![0; 3]))
        };
        let (tx, mut rx) = unbounded_channel();
        let handle = start_capture(config(dir.path()), Box::new(truncated), tx).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        handle.stop().unwrap();
        handle.join();

        let (sequences, terminal) = collect(&mut rx);
        assert!(sequences.is_empty());
        assert!(matches!(terminal, CaptureEvent::Finished { frames: 0, .. }));
        assert!(cache::collect_files(&dir.path().join("clip"), "part").is_empty());
    }

    #[test]
    fn test_pause_stops_writes() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let handle = start_capture(config(dir.path()), solid_source(), tx).unwrap();
        wait_for_frames(&handle, 2);
        handle.pause().unwrap();
        assert!(handle.is_paused());

        // Let an in-flight frame land, then the count must hold still.
        std::thread::sleep(Duration::from_millis(50));
        let at_pause = handle.frames_captured();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(handle.frames_captured(), at_pause);

        handle.resume(Some(CaptureRegion::new(0, 0, 4, 4))).unwrap();
        wait_for_frames(&handle, at_pause + 2);
        handle.stop().unwrap();
        handle.join();

        let (sequences, _) = collect(&mut rx);
        let expected: Vec<u32> = (0..sequences.len() as u32).collect();
        assert_eq!(sequences, expected);

        let last = cache::read_frame(&cache::entry_path(
            &dir.path().join("clip"),
            *sequences.last().unwrap(),
        ))
        .unwrap();
        assert_eq!((last.width, last.height), (4, 4));
    }

    #[test]
    fn test_cancel_discards_cache() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let handle = start_capture(config(dir.path()), solid_source(), tx).unwrap();
        wait_for_frames(&handle, 2);
        handle.cancel().unwrap();
        handle.join();

        let (_, terminal) = collect(&mut rx);
        assert!(matches!(terminal, CaptureEvent::Cancelled));
        assert!(!dir.path().join("clip").exists());
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn test_commands_after_end_are_rejected() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let handle = start_capture(config(dir.path()), solid_source(), tx).unwrap();
        handle.stop().unwrap();
        let _ = collect(&mut rx);
        // Thread has sent its terminal event and dropped the receiver.
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(handle.pause(), Err(CaptureError::InvalidState(_))));
    }

    #[test]
    fn test_stop_handle_stops_session() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let handle = start_capture(config(dir.path()), solid_source(), tx).unwrap();
        let stopper = handle.stop_handle();
        wait_for_frames(&handle, 1);
        assert!(stopper.stop());

        let (_, terminal) = collect(&mut rx);
        assert!(matches!(terminal, CaptureEvent::Finished { .. }));
        handle.join();
        assert!(!stopper.stop());
    }

    #[test]
    fn test_uncreatable_cache_fails_start() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let mut cfg = config(dir.path());
        cfg.cache_dir = blocker.join("clip");

        let (tx, mut rx) = unbounded_channel();
        let result = start_capture(cfg, solid_source(), tx);
        assert!(matches!(result, Err(CaptureError::CacheUnavailable(_))));
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn test_invalid_region_fails_start() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.region = CaptureRegion::new(0, 0, 0, 10);
        let (tx, _rx) = unbounded_channel();
        let result = start_capture(cfg, solid_source(), tx);
        assert!(matches!(result, Err(CaptureError::InvalidRegion(_))));
    }

    #[test]
    fn test_vanished_cache_fails_session() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("clip");
        let doomed = cache_dir.clone();
        let mut calls = 0u32;
        let source = move |region: &CaptureRegion| -> Result<GrabbedPixels, CaptureError> {
            calls += 1;
            if calls == 3 {
                let _ = fs::remove_dir_all(&doomed);
            }
            let len = CapturedFrame::expected_len(region.width, region.height);
            Ok((region.width, region.height, PixelLayout::Rgba, vec![0; len]))
        };
        let (tx, mut rx) = unbounded_channel();
        let handle = start_capture(config(dir.path()), Box::new(source), tx).unwrap();
        let (sequences, terminal) = collect(&mut rx);
        handle.join();

        assert_eq!(sequences, vec![0, 1]);
        assert!(matches!(
            terminal,
            CaptureEvent::Failed(CaptureError::CacheUnavailable(_))
        ));
    }
}
