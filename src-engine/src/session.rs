//! Recording session orchestration.
//!
//! The manager drives one session at a time through
//! `Idle -> Recording <-> Paused -> Idle -> Processing -> Idle`:
//! - capture into the per-clip cache directory
//! - duration tracking with automatic stop
//! - delivery-date resolution and review folder layout
//! - slate plus batch conversion of the cached frames
//!
//! Everything a front end needs to display arrives as [`SessionEvent`]s on a
//! broadcast channel.

use crate::cache;
use crate::calendar::{delivery_folder_name, resolve_delivery_date, DeliveryRules};
use crate::capture::{
    start_capture, CaptureConfig, CaptureEvent, CaptureHandle, FrameSource, RecordingTimer,
    TimerEvent,
};
use crate::error::{CaptureError, SessionError};
use crate::processing::{start_batch, BatchHandle, BatchReport, BatchRequest, ProcessingEvent};
use crate::slate::{self, SlateText};
use crate::transform::Canvas;
use chrono::NaiveDateTime;
use reviewrec_common::config::{review_root, Settings};
use reviewrec_common::validation::{sanitize_clip_name, validate_project_name, validate_region};
use reviewrec_common::{CaptureRegion, RecordingState};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// Events broadcast to subscribed front ends.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(RecordingState),
    /// A frame was persisted to the cache.
    FrameCaptured { sequence: u32, path: PathBuf },
    /// Elapsed recording time as `MM:SS`.
    Duration(String),
    /// The maximum duration was reached; the capture is being stopped.
    DurationLimitReached,
    CaptureFinished { cache_dir: PathBuf, frames: u32 },
    /// Fraction of the batch converted.
    Progress(f64),
    ProcessingFinished(BatchReport),
    /// Capture or processing was cancelled.
    Cancelled,
    Failed(String),
}

/// Result of a stopped capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureSummary {
    pub clip: String,
    pub project: String,
    pub cache_dir: PathBuf,
    pub frames: u32,
}

/// Where a batch writes and how it is numbered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingPlan {
    pub delivery_date: String,
    pub output_dir: PathBuf,
    pub prefix: PathBuf,
    /// Whether frame 0 is a slate.
    pub slate_written: bool,
    pub frames: usize,
}

/// State and event channel shared with forwarding threads.
struct Shared {
    state: Mutex<RecordingState>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn broadcast(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn state(&self) -> RecordingState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, new_state: RecordingState) {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            *state = new_state;
        }
        self.broadcast(SessionEvent::StateChanged(new_state));
    }
}

struct ActiveCapture {
    clip: String,
    project: String,
    capture: CaptureHandle,
    timer: RecordingTimer,
    forwarder: JoinHandle<Option<CaptureEvent>>,
}

impl ActiveCapture {
    /// Wait for the capture to end and return its terminal event.
    fn finish(mut self) -> Option<CaptureEvent> {
        self.timer.stop();
        self.capture.join();
        match self.forwarder.join() {
            Ok(terminal) => terminal,
            Err(_) => {
                error!("Capture event forwarder panicked");
                None
            }
        }
    }
}

struct ActiveBatch {
    batch: BatchHandle,
    forwarder: JoinHandle<()>,
}

/// Owns the recording lifecycle.
pub struct RecordingManager {
    settings: Settings,
    cache_root: PathBuf,
    output_root: Option<PathBuf>,
    user: String,
    shared: Arc<Shared>,
    capture: Mutex<Option<ActiveCapture>>,
    batch: Mutex<Option<ActiveBatch>>,
}

/// Login name of the current user, used as a review folder level.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .map(|name| name.replace(['/', '\\'], "_"))
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

impl RecordingManager {
    /// Create a manager using the platform cache root and configured review root.
    pub fn new(settings: Settings) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            settings,
            cache_root: cache::cache_root(),
            output_root: None,
            user: current_user(),
            shared: Arc::new(Shared {
                state: Mutex::new(RecordingState::Idle),
                event_tx,
            }),
            capture: Mutex::new(None),
            batch: Mutex::new(None),
        }
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    /// Write review folders here instead of the configured root.
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(root.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn state(&self) -> RecordingState {
        self.shared.state()
    }

    /// Frames persisted by the current capture.
    pub fn frames_captured(&self) -> u32 {
        self.lock_capture()
            .as_ref()
            .map(|active| active.capture.frames_captured())
            .unwrap_or(0)
    }

    fn lock_capture(&self) -> std::sync::MutexGuard<'_, Option<ActiveCapture>> {
        self.capture.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_batch(&self) -> std::sync::MutexGuard<'_, Option<ActiveBatch>> {
        self.batch.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start recording `region` into the cache directory for `clip`.
    ///
    /// Returns the session cache directory.
    pub fn start_recording(
        &self,
        clip: &str,
        project: &str,
        region: CaptureRegion,
        source: Box<dyn FrameSource>,
    ) -> Result<PathBuf, SessionError> {
        if self.state() != RecordingState::Idle {
            return Err(SessionError::InvalidState(format!(
                "Cannot start recording while {}",
                self.state().as_str()
            )));
        }
        let clip = sanitize_clip_name(clip)?;
        validate_project_name(project)?;
        validate_region(&region)?;

        let mut slot = self.lock_capture();
        if let Some(previous) = slot.take() {
            // Capture ended on its own and was never collected.
            previous.finish();
        }

        let cache_dir = cache::session_dir(&self.cache_root, &clip);
        if cache_dir.exists() {
            warn!("Discarding stale cache {:?}", cache_dir);
            if let Err(e) = cache::clean_session(&cache_dir) {
                warn!("Failed to discard stale cache: {}", e);
            }
        }

        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let capture = start_capture(
            CaptureConfig {
                cache_dir: cache_dir.clone(),
                region,
                frame_rate: self.settings.frame_rate(),
            },
            source,
            capture_tx,
        )
        .map_err(|e| {
            error!("Failed to start capture: {}", e);
            self.shared.broadcast(SessionEvent::Failed(e.to_string()));
            SessionError::Capture(e)
        })?;

        let limit = match self.settings.capture.max_duration_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let timer = RecordingTimer::start(limit, timer_tx);
        spawn_timer_forwarder(timer_rx, capture.stop_handle(), Arc::clone(&self.shared));
        let forwarder = spawn_capture_forwarder(capture_rx, Arc::clone(&self.shared));

        *slot = Some(ActiveCapture {
            clip: clip.clone(),
            project: project.to_string(),
            capture,
            timer,
            forwarder,
        });
        drop(slot);

        self.shared.set_state(RecordingState::Recording);
        info!("Recording started: clip {:?}, project {:?}", clip, project);
        Ok(cache_dir)
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        if self.state() != RecordingState::Recording {
            return Err(SessionError::InvalidState("Not currently recording".into()));
        }
        let slot = self.lock_capture();
        let active = slot
            .as_ref()
            .ok_or_else(|| SessionError::InvalidState("No active capture".into()))?;
        active.capture.pause()?;
        active.timer.pause();
        drop(slot);
        self.shared.set_state(RecordingState::Paused);
        Ok(())
    }

    /// Resume a paused recording, optionally at a moved or resized region.
    pub fn resume(&self, region: Option<CaptureRegion>) -> Result<(), SessionError> {
        if self.state() != RecordingState::Paused {
            return Err(SessionError::InvalidState("Recording is not paused".into()));
        }
        if let Some(region) = &region {
            validate_region(region)?;
        }
        let slot = self.lock_capture();
        let active = slot
            .as_ref()
            .ok_or_else(|| SessionError::InvalidState("No active capture".into()))?;
        active.capture.resume(region)?;
        active.timer.resume();
        drop(slot);
        self.shared.set_state(RecordingState::Recording);
        Ok(())
    }

    /// Move or resize the capture region.
    pub fn update_region(&self, region: CaptureRegion) -> Result<(), SessionError> {
        validate_region(&region)?;
        let slot = self.lock_capture();
        let active = slot
            .as_ref()
            .ok_or_else(|| SessionError::InvalidState("No active capture".into()))?;
        active.capture.update_region(region)?;
        Ok(())
    }

    /// Stop the capture and return what was recorded.
    ///
    /// Also collects a capture that already ended on its own (duration limit
    /// or failure).
    pub fn stop(&self) -> Result<CaptureSummary, SessionError> {
        let active = self
            .lock_capture()
            .take()
            .ok_or_else(|| SessionError::InvalidState("Not currently recording".into()))?;
        let (clip, project) = (active.clip.clone(), active.project.clone());

        if active.capture.stop().is_err() {
            info!("Capture had already ended");
        }

        match active.finish() {
            Some(CaptureEvent::Finished { cache_dir, frames }) => Ok(CaptureSummary {
                clip,
                project,
                cache_dir,
                frames,
            }),
            Some(CaptureEvent::Failed(e)) => Err(SessionError::Capture(e)),
            Some(CaptureEvent::Cancelled) => {
                Err(SessionError::InvalidState("Recording was cancelled".into()))
            }
            _ => {
                self.shared.set_state(RecordingState::Idle);
                Err(SessionError::Capture(CaptureError::FrameCaptureFailure(
                    "Capture ended without reporting".into(),
                )))
            }
        }
    }

    /// Cancel whatever is running. Capture caches are discarded.
    pub fn cancel(&self) -> Result<(), SessionError> {
        match self.state() {
            RecordingState::Recording | RecordingState::Paused => {
                let active = self
                    .lock_capture()
                    .take()
                    .ok_or_else(|| SessionError::InvalidState("No active capture".into()))?;
                if active.capture.cancel().is_err() {
                    info!("Capture had already ended");
                }
                active.finish();
                Ok(())
            }
            RecordingState::Processing => {
                let slot = self.lock_batch();
                match slot.as_ref() {
                    Some(active) => {
                        active.batch.cancel();
                        Ok(())
                    }
                    None => Err(SessionError::InvalidState("No active batch".into())),
                }
            }
            RecordingState::Idle => Err(SessionError::InvalidState("Nothing to cancel".into())),
        }
    }

    /// Review folder root for this manager.
    fn output_root(&self) -> Result<PathBuf, SessionError> {
        match &self.output_root {
            Some(root) => Ok(root.clone()),
            None => review_root(&self.settings).map_err(SessionError::Output),
        }
    }

    /// Start converting a cache directory into the review folder.
    ///
    /// Resolves the delivery date for `now`, creates
    /// `{root}/{date}/{user}/{clip}/`, writes the slate as frame 0 when one is
    /// configured and starts the batch. Progress and the terminal event arrive
    /// as [`SessionEvent`]s.
    pub fn process(
        &self,
        cache_dir: &Path,
        clip: &str,
        project: &str,
        now: NaiveDateTime,
    ) -> Result<ProcessingPlan, SessionError> {
        if self.state() != RecordingState::Idle {
            return Err(SessionError::InvalidState(format!(
                "Cannot process while {}",
                self.state().as_str()
            )));
        }
        let clip = sanitize_clip_name(clip)?;
        validate_project_name(project)?;

        let mut slot = self.lock_batch();
        if let Some(previous) = slot.take() {
            previous.batch.wait();
            let _ = previous.forwarder.join();
        }

        self.shared.set_state(RecordingState::Processing);
        let result = self.start_processing(cache_dir, &clip, project, now);
        match result {
            Ok((plan, active)) => {
                *slot = Some(active);
                Ok(plan)
            }
            Err(e) => {
                error!("Processing could not start: {}", e);
                self.shared.broadcast(SessionEvent::Failed(e.to_string()));
                self.shared.set_state(RecordingState::Idle);
                Err(e)
            }
        }
    }

    fn start_processing(
        &self,
        cache_dir: &Path,
        clip: &str,
        project: &str,
        now: NaiveDateTime,
    ) -> Result<(ProcessingPlan, ActiveBatch), SessionError> {
        let rules = DeliveryRules::from_settings(
            &self.settings.delivery,
            &self.settings.excluded_dates(),
        );
        let delivery = resolve_delivery_date(now, &rules)?;
        let delivery_date = delivery_folder_name(delivery);

        let output_dir = self
            .output_root()?
            .join(&delivery_date)
            .join(&self.user)
            .join(clip);
        fs::create_dir_all(&output_dir)
            .map_err(|e| SessionError::Output(format!("{:?}: {}", output_dir, e)))?;
        let prefix = output_dir.join(clip);
        info!("Delivering to {:?}", output_dir);

        let processing = &self.settings.processing;
        let canvas = Canvas::new(processing.canvas_width, processing.canvas_height);
        let slate_written = match processing.slate.as_deref().map(PathBuf::from) {
            Some(background) if background.is_file() => {
                let text = SlateText {
                    project: project.to_string(),
                    clip: clip.to_string(),
                    user: self.user.clone(),
                    date: delivery_date.clone(),
                };
                let font = slate::load_font(processing.slate_font.as_deref().map(Path::new));
                match slate::write_slate(&background, &prefix, 0, &text, font.as_ref(), canvas) {
                    Ok(_) => true,
                    Err(e) => {
                        warn!("Slate not written: {}", e);
                        false
                    }
                }
            }
            Some(background) => {
                warn!("Slate {:?} not found", background);
                false
            }
            None => false,
        };

        let entries = cache::collect_frames(cache_dir);
        let frames = entries.len();
        let request = BatchRequest {
            entries,
            start_sequence: u32::from(slate_written),
            destination_prefix: prefix.clone(),
            project_tag: project.to_string(),
            overlay: processing.overlay.as_deref().map(PathBuf::from),
            canvas,
            workers: processing.workers,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let batch = start_batch(request, tx)
            .map_err(|e| SessionError::Output(format!("Cannot start processing: {}", e)))?;

        let discard = cache_dir
            .starts_with(&self.cache_root)
            .then(|| cache_dir.to_path_buf());
        let forwarder = spawn_processing_forwarder(rx, discard, Arc::clone(&self.shared));

        Ok((
            ProcessingPlan {
                delivery_date,
                output_dir,
                prefix,
                slate_written,
                frames,
            },
            ActiveBatch { batch, forwarder },
        ))
    }

    /// Block until the running batch ends.
    pub fn wait_processing(&self) -> Option<BatchReport> {
        let active = self.lock_batch().take()?;
        let report = active.batch.wait();
        if active.forwarder.join().is_err() {
            error!("Processing event forwarder panicked");
        }
        Some(report)
    }
}

fn spawn_capture_forwarder(
    mut rx: mpsc::UnboundedReceiver<CaptureEvent>,
    shared: Arc<Shared>,
) -> JoinHandle<Option<CaptureEvent>> {
    std::thread::spawn(move || {
        while let Some(event) = rx.blocking_recv() {
            let forwarded = match &event {
                CaptureEvent::FrameCaptured { sequence, path } => {
                    shared.broadcast(SessionEvent::FrameCaptured {
                        sequence: *sequence,
                        path: path.clone(),
                    });
                    continue;
                }
                CaptureEvent::Finished { cache_dir, frames } => SessionEvent::CaptureFinished {
                    cache_dir: cache_dir.clone(),
                    frames: *frames,
                },
                CaptureEvent::Cancelled => SessionEvent::Cancelled,
                CaptureEvent::Failed(e) => SessionEvent::Failed(e.to_string()),
            };
            shared.set_state(RecordingState::Idle);
            shared.broadcast(forwarded);
            return Some(event);
        }
        None
    })
}

fn spawn_timer_forwarder(
    mut rx: mpsc::UnboundedReceiver<TimerEvent>,
    stopper: crate::capture::StopHandle,
    shared: Arc<Shared>,
) {
    std::thread::spawn(move || {
        while let Some(event) = rx.blocking_recv() {
            match event {
                TimerEvent::Elapsed(elapsed) => shared.broadcast(SessionEvent::Duration(elapsed)),
                TimerEvent::LimitReached => {
                    shared.broadcast(SessionEvent::DurationLimitReached);
                    stopper.stop();
                }
            }
        }
    });
}

fn spawn_processing_forwarder(
    mut rx: mpsc::UnboundedReceiver<ProcessingEvent>,
    discard: Option<PathBuf>,
    shared: Arc<Shared>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while let Some(event) = rx.blocking_recv() {
            let terminal = match event {
                ProcessingEvent::Progress(fraction) => {
                    shared.broadcast(SessionEvent::Progress(fraction));
                    continue;
                }
                ProcessingEvent::Finished(report) => {
                    if let Some(dir) = &discard {
                        if let Err(e) = cache::clean_session(dir) {
                            warn!("Failed to clean session cache: {}", e);
                        }
                    }
                    SessionEvent::ProcessingFinished(report)
                }
                // Cached frames stay so the clip can be processed again
                ProcessingEvent::Cancelled(_) => SessionEvent::Cancelled,
            };
            shared.set_state(RecordingState::Idle);
            shared.broadcast(terminal);
            return;
        }
    })
}
