//! Recording duration timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Default tick period.
pub const TICK: Duration = Duration::from_millis(100);

/// Notifications from a [`RecordingTimer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// Elapsed recording time changed, formatted as `MM:SS`.
    Elapsed(String),
    /// The maximum duration was reached. Sent once, after which the timer exits.
    LimitReached,
}

/// Format a duration as `MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Tracks how long a session has been recording, excluding paused time.
pub struct RecordingTimer {
    paused: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RecordingTimer {
    /// Start ticking every 100 ms. `limit` of `None` never expires.
    pub fn start(limit: Option<Duration>, events: UnboundedSender<TimerEvent>) -> Self {
        Self::with_tick(TICK, limit, events)
    }

    pub fn with_tick(
        tick: Duration,
        limit: Option<Duration>,
        events: UnboundedSender<TimerEvent>,
    ) -> Self {
        let paused = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let paused_clone = Arc::clone(&paused);
        let stop_clone = Arc::clone(&stop_flag);

        let thread = std::thread::spawn(move || {
            let mut elapsed = Duration::ZERO;
            let mut last_tick = Instant::now();
            let mut shown = String::new();

            while !stop_clone.load(Ordering::Relaxed) {
                std::thread::sleep(tick);
                let now = Instant::now();
                if !paused_clone.load(Ordering::Relaxed) {
                    elapsed += now - last_tick;
                }
                last_tick = now;

                let formatted = format_elapsed(elapsed);
                if formatted != shown {
                    shown = formatted.clone();
                    if events.send(TimerEvent::Elapsed(formatted)).is_err() {
                        break;
                    }
                }

                if limit.is_some_and(|limit| elapsed >= limit) {
                    info!("Maximum recording duration reached at {}", shown);
                    let _ = events.send(TimerEvent::LimitReached);
                    break;
                }
            }
            debug!("Recording timer exited");
        });

        Self {
            paused,
            stop_flag,
            thread: Some(thread),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Stop the timer and wait for its thread.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for RecordingTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::ZERO), "00:00");
        assert_eq!(format_elapsed(Duration::from_millis(59_999)), "00:59");
        assert_eq!(format_elapsed(Duration::from_secs(61)), "01:01");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "02:05");
    }

    #[test]
    fn test_limit_reached_once() {
        let (tx, mut rx) = unbounded_channel();
        let mut timer =
            RecordingTimer::with_tick(Duration::from_millis(5), Some(Duration::from_millis(30)), tx);

        let mut events = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            events.push(event);
        }
        timer.stop();

        assert_eq!(events.first(), Some(&TimerEvent::Elapsed("00:00".to_string())));
        assert_eq!(events.last(), Some(&TimerEvent::LimitReached));
        assert_eq!(
            events.iter().filter(|e| **e == TimerEvent::LimitReached).count(),
            1
        );
    }

    #[test]
    fn test_paused_timer_does_not_expire() {
        let (tx, mut rx) = unbounded_channel();
        let mut timer =
            RecordingTimer::with_tick(Duration::from_millis(5), Some(Duration::from_millis(40)), tx);
        timer.pause();
        std::thread::sleep(Duration::from_millis(120));
        timer.stop();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(!events.contains(&TimerEvent::LimitReached));
    }
}
