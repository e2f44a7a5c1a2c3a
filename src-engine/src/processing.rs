//! Batch conversion of a session's cache entries.
//!
//! Jobs sit in a shared queue drained by a fixed set of worker threads.
//! Workers may finish out of order; each output file name already carries its
//! sequence number, so on-disk ordering does not depend on completion order.
//!
//! Every finished job (success or failure) sends one message to a single
//! aggregator thread. The aggregator owns the completion count, reports
//! progress after each message and delivers exactly one terminal event.

use crate::error::TransformError;
use crate::transform::{self, Canvas};
use image::RgbaImage;
use serde::Serialize;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// One cache entry to convert.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub output_sequence: u32,
    pub source: PathBuf,
    pub destination_prefix: PathBuf,
    pub project_tag: String,
    pub canvas: Canvas,
    pub overlay: Option<Arc<RgbaImage>>,
}

/// Everything needed to convert one capture session.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Cache entries in capture order.
    pub entries: Vec<PathBuf>,
    /// Output sequence number of the first entry.
    pub start_sequence: u32,
    pub destination_prefix: PathBuf,
    pub project_tag: String,
    pub overlay: Option<PathBuf>,
    pub canvas: Canvas,
    /// Worker pool size; `None` uses the available parallelism.
    pub workers: Option<usize>,
}

/// Outcome of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    /// Jobs that reported back, failed ones included.
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Notifications from a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingEvent {
    /// Fraction of jobs completed, in `[0.0, 1.0]`, never decreasing.
    Progress(f64),
    Finished(BatchReport),
    Cancelled(BatchReport),
}

impl ProcessingEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessingEvent::Progress(_))
    }
}

/// Converts one job. The default runner reads, transforms and writes the frame.
pub type JobRunner = Arc<dyn Fn(&ProcessingJob) -> Result<PathBuf, TransformError> + Send + Sync>;

fn default_runner() -> JobRunner {
    Arc::new(|job: &ProcessingJob| {
        transform::process_entry(
            &job.source,
            &job.destination_prefix,
            job.output_sequence,
            &job.project_tag,
            job.canvas,
            job.overlay.as_deref(),
        )
    })
}

enum Message {
    Done {
        sequence: u32,
        outcome: Result<PathBuf, TransformError>,
    },
    Cancel,
}

/// Resolve the worker pool size.
pub fn worker_count(configured: Option<usize>) -> usize {
    configured.filter(|n| *n > 0).unwrap_or_else(|| {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

/// Build one job per entry, numbered from `start_sequence` in input order.
pub fn build_jobs(request: &BatchRequest, overlay: Option<Arc<RgbaImage>>) -> Vec<ProcessingJob> {
    request
        .entries
        .iter()
        .zip(request.start_sequence..)
        .map(|(source, output_sequence)| ProcessingJob {
            output_sequence,
            source: source.clone(),
            destination_prefix: request.destination_prefix.clone(),
            project_tag: request.project_tag.clone(),
            canvas: request.canvas,
            overlay: overlay.clone(),
        })
        .collect()
}

/// Handle to a running batch.
pub struct BatchHandle {
    queue: Arc<Mutex<VecDeque<ProcessingJob>>>,
    active: Arc<AtomicBool>,
    completed: Arc<AtomicUsize>,
    total: usize,
    control: mpsc::Sender<Message>,
    workers: Vec<JoinHandle<()>>,
    aggregator: Option<JoinHandle<BatchReport>>,
}

impl BatchHandle {
    /// Drop queued jobs and stop reporting. Jobs already running finish.
    pub fn cancel(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            let dropped = {
                let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
                let n = queue.len();
                queue.clear();
                n
            };
            info!("Cancelling batch, {} queued job(s) dropped", dropped);
            let _ = self.control.send(Message::Cancel);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait for every worker and the aggregator to exit.
    pub fn wait(mut self) -> BatchReport {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Processing worker panicked");
            }
        }
        match self.aggregator.take().map(JoinHandle::join) {
            Some(Ok(report)) => report,
            _ => {
                error!("Processing aggregator panicked");
                BatchReport {
                    total: self.total,
                    completed: self.completed.load(Ordering::SeqCst),
                    failed: 0,
                    cancelled: !self.active.load(Ordering::SeqCst),
                }
            }
        }
    }
}

/// Start converting a batch.
///
/// Fails before any job runs if the overlay exists but cannot be decoded.
pub fn start_batch(
    request: BatchRequest,
    events: UnboundedSender<ProcessingEvent>,
) -> Result<BatchHandle, TransformError> {
    let overlay = match &request.overlay {
        Some(path) => transform::load_overlay(path)?.map(Arc::new),
        None => None,
    };
    let jobs = build_jobs(&request, overlay);
    Ok(start_jobs(jobs, worker_count(request.workers), default_runner(), events))
}

/// Run prepared jobs through `runner` on `workers` threads.
pub fn start_jobs(
    jobs: Vec<ProcessingJob>,
    workers: usize,
    runner: JobRunner,
    events: UnboundedSender<ProcessingEvent>,
) -> BatchHandle {
    let total = jobs.len();
    let worker_total = workers.max(1).min(total);
    info!("Processing {} frame(s) on {} worker(s)", total, worker_total);

    let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
    let active = Arc::new(AtomicBool::new(true));
    let completed = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let workers = (0..worker_total)
        .map(|index| {
            let queue = Arc::clone(&queue);
            let active = Arc::clone(&active);
            let runner = Arc::clone(&runner);
            let tx = tx.clone();
            thread::spawn(move || {
                run_worker(index, queue, active, runner, tx);
            })
        })
        .collect();

    let aggregator = {
        let active = Arc::clone(&active);
        let completed = Arc::clone(&completed);
        thread::spawn(move || aggregate(total, rx, active, completed, events))
    };

    BatchHandle {
        queue,
        active,
        completed,
        total,
        control: tx,
        workers,
        aggregator: Some(aggregator),
    }
}

fn run_worker(
    index: usize,
    queue: Arc<Mutex<VecDeque<ProcessingJob>>>,
    active: Arc<AtomicBool>,
    runner: JobRunner,
    tx: mpsc::Sender<Message>,
) {
    loop {
        if !active.load(Ordering::SeqCst) {
            break;
        }
        let job = {
            let mut queue = queue.lock().unwrap_or_else(|p| p.into_inner());
            queue.pop_front()
        };
        let Some(job) = job else {
            break;
        };

        debug!("Worker {} converting frame {}", index, job.output_sequence);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| runner(&job)))
            .unwrap_or_else(|payload| Err(TransformError::Panicked(panic_message(payload))));
        if tx
            .send(Message::Done {
                sequence: job.output_sequence,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }
    debug!("Worker {} exiting", index);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|msg| msg.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}

fn aggregate(
    total: usize,
    rx: mpsc::Receiver<Message>,
    active: Arc<AtomicBool>,
    completed: Arc<AtomicUsize>,
    events: UnboundedSender<ProcessingEvent>,
) -> BatchReport {
    let mut report = BatchReport {
        total,
        ..BatchReport::default()
    };

    while report.completed < total {
        match rx.recv() {
            Ok(Message::Done { sequence, outcome }) => {
                report.completed += 1;
                completed.store(report.completed, Ordering::SeqCst);
                if let Err(e) = outcome {
                    report.failed += 1;
                    warn!("Frame {} failed: {}", sequence, e);
                }
                if active.load(Ordering::SeqCst) {
                    let _ = events.send(ProcessingEvent::Progress(
                        report.completed as f64 / total as f64,
                    ));
                }
            }
            Ok(Message::Cancel) | Err(_) => {
                report.cancelled = true;
                info!(
                    "Batch cancelled after {} of {} frame(s)",
                    report.completed, total
                );
                let _ = events.send(ProcessingEvent::Cancelled(report));
                return report;
            }
        }
    }

    if !active.swap(false, Ordering::SeqCst) {
        // Cancelled while the last job was in flight
        report.cancelled = true;
        info!("Batch cancelled after its last frame");
        let _ = events.send(ProcessingEvent::Cancelled(report));
        return report;
    }
    if report.failed > 0 {
        warn!(
            "Processing finished: {} frame(s), {} failed",
            total, report.failed
        );
    } else {
        info!("Processing finished: {} frame(s)", total);
    }
    let _ = events.send(ProcessingEvent::Finished(report));
    report
}
