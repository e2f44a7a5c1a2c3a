//! Command implementations for the CLI.

use crate::colors;
use crate::exit_codes::ExitCode;
use crate::{ProcessArgs, RecordArgs};
use chrono::{Local, NaiveDateTime};
use reviewrec_common::config::{self, Settings};
use reviewrec_common::{CaptureRegion, RecordingState};
use reviewrec_engine::cache;
use reviewrec_engine::calendar::{delivery_folder_name, resolve_delivery_date, DeliveryRules};
use reviewrec_engine::capture::FrameSource;
use reviewrec_engine::{CaptureError, RecordingManager, SessionError, SessionEvent};
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, info, warn};

/// Format accepted by `--at`.
const AT_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Load settings from `custom` or the platform settings file.
pub fn load(custom: Option<&Path>) -> Settings {
    match custom {
        Some(path) => config::load_settings_from(path),
        None => config::load_settings(),
    }
}

fn parse_at(value: Option<&str>) -> Result<NaiveDateTime, String> {
    match value {
        Some(text) => NaiveDateTime::parse_from_str(text.trim(), AT_FORMAT)
            .map_err(|e| format!("Invalid time {:?} (expected YYYY-MM-DDTHH:MM): {}", text, e)),
        None => Ok(Local::now().naive_local()),
    }
}

/// Exit code for an error raised while starting an operation.
fn exit_code_for(err: &SessionError) -> ExitCode {
    match err {
        SessionError::InvalidInput(_) => ExitCode::InvalidArguments,
        SessionError::Capture(_) => ExitCode::RecordingFailedToStart,
        SessionError::Resolution(_) => ExitCode::NoDeliveryDate,
        SessionError::Output(_) => ExitCode::ProcessingFailed,
        SessionError::InvalidState(_) => ExitCode::GeneralError,
    }
}

fn default_project(settings: &Settings) -> String {
    settings
        .project_list()
        .into_iter()
        .next()
        .unwrap_or_else(|| "testing".to_string())
}

/// Region from the command line, defaulting the size to the canvas.
fn region_from_args(args: &RecordArgs, settings: &Settings) -> CaptureRegion {
    CaptureRegion::new(
        args.x,
        args.y,
        args.width.unwrap_or(settings.processing.canvas_width),
        args.height.unwrap_or(settings.processing.canvas_height),
    )
}

#[cfg(feature = "screen-capture")]
fn screen_source() -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(reviewrec_engine::capture::ScreenSource::new()))
}

#[cfg(not(feature = "screen-capture"))]
fn screen_source() -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::Unsupported(
        "this build has no screen capture backend (rebuild with --features screen-capture)".into(),
    ))
}

fn print_error(msg: &str, quiet: bool) {
    if !quiet {
        eprintln!("{}", colors::error(msg));
    }
}

/// Record a region, then hand the cache to processing.
pub async fn record(args: RecordArgs, settings: Settings, json: bool, quiet: bool) -> ExitCode {
    let source = match screen_source() {
        Ok(source) => source,
        Err(e) => {
            print_error(&e.to_string(), quiet);
            return ExitCode::RecordingFailedToStart;
        }
    };

    let mut settings = settings;
    if let Some(secs) = args.duration {
        settings.capture.max_duration_secs = secs;
    }
    let region = region_from_args(&args, &settings);
    let project = args.project.clone().unwrap_or_else(|| default_project(&settings));

    let manager = RecordingManager::new(settings);
    let mut events = manager.subscribe();

    let cache_dir = match manager.start_recording(&args.clip, &project, region, source) {
        Ok(dir) => dir,
        Err(e) => {
            print_error(&format!("Failed to start recording: {}", e), quiet);
            return exit_code_for(&e);
        }
    };
    info!("Recording {:?} for {} into {:?}", args.clip, project, cache_dir);

    if json {
        println!(
            "{}",
            json!({
                "status": "recording",
                "cache_dir": cache_dir,
                "region": { "x": region.x, "y": region.y, "width": region.width, "height": region.height },
            })
        );
    } else if !quiet {
        println!(
            "{} {}x{} at ({}, {})",
            colors::recording("Recording"),
            colors::number(&region.width.to_string()),
            colors::number(&region.height.to_string()),
            region.x,
            region.y
        );
        println!(
            "{}",
            colors::dim("Enter p to pause/resume, s to stop, c to cancel. Ctrl+C stops.")
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                debug!("Interrupt received, stopping capture");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "p" => toggle_pause(&manager, json, quiet),
                    "s" => break,
                    "c" => {
                        if let Err(e) = tokio::task::block_in_place(|| manager.cancel()) {
                            warn!("Cancel failed: {}", e);
                        }
                        if json {
                            println!("{}", json!({ "status": "cancelled" }));
                        } else if !quiet {
                            println!("\n{}", colors::info("Recording cancelled, cache discarded."));
                        }
                        return ExitCode::UserCancelled;
                    }
                    "" => {}
                    other => {
                        if !quiet && !json {
                            eprintln!("{}", colors::warning(&format!("Unknown command {:?}", other)));
                        }
                    }
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
            event = events.recv() => match event {
                Ok(SessionEvent::Duration(elapsed)) => {
                    if !quiet && !json {
                        print!("\r{} {}", colors::recording("Recording:"), colors::elapsed_time(&elapsed));
                        std::io::stdout().flush().ok();
                    }
                }
                Ok(SessionEvent::DurationLimitReached) => {
                    if !quiet && !json {
                        println!("\n{}", colors::info("Duration limit reached. Stopping recording..."));
                    }
                }
                Ok(SessionEvent::CaptureFinished { .. }) | Ok(SessionEvent::Failed(_)) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} session events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let summary = match tokio::task::block_in_place(|| manager.stop()) {
        Ok(summary) => summary,
        Err(e) => {
            print_error(&format!("\nRecording failed: {}", e), quiet);
            return ExitCode::RecordingFailedDuringCapture;
        }
    };

    if !quiet && !json {
        println!(
            "\n{} {} frames in {}",
            colors::success("Captured"),
            colors::number(&summary.frames.to_string()),
            colors::path(&summary.cache_dir.display().to_string())
        );
    }

    if args.no_process {
        if json {
            println!("{}", json!({ "status": "captured", "summary": summary }));
        }
        return ExitCode::Success;
    }

    if summary.frames == 0 {
        if !quiet && !json {
            eprintln!("{}", colors::warning("No frames were captured, nothing to process."));
        }
        if let Err(e) = cache::clean_session(&summary.cache_dir) {
            warn!("Could not remove empty cache: {}", e);
        }
        return ExitCode::RecordingFailedDuringCapture;
    }

    deliver(
        &manager,
        &mut events,
        &summary.cache_dir,
        &summary.clip,
        &summary.project,
        Local::now().naive_local(),
        json,
        quiet,
    )
    .await
}

fn toggle_pause(manager: &RecordingManager, json: bool, quiet: bool) {
    let result = if manager.state() == RecordingState::Paused {
        manager.resume(None)
    } else {
        manager.pause()
    };
    match result {
        Ok(()) => {
            let state = manager.state();
            if json {
                println!("{}", json!({ "status": state.as_str() }));
            } else if !quiet {
                println!("\n{}", colors::state(state.as_str()));
            }
        }
        Err(e) => {
            if !quiet {
                eprintln!("\n{}", colors::warning(&e.to_string()));
            }
        }
    }
}

/// Convert a cache directory and report the outcome.
#[allow(clippy::too_many_arguments)]
async fn deliver(
    manager: &RecordingManager,
    events: &mut Receiver<SessionEvent>,
    cache_dir: &Path,
    clip: &str,
    project: &str,
    now: NaiveDateTime,
    json: bool,
    quiet: bool,
) -> ExitCode {
    let plan = match manager.process(cache_dir, clip, project, now) {
        Ok(plan) => plan,
        Err(e) => {
            print_error(&format!("Failed to start processing: {}", e), quiet);
            return exit_code_for(&e);
        }
    };

    if !quiet && !json {
        println!(
            "{} {} frames into {}",
            colors::info("Processing"),
            colors::number(&plan.frames.to_string()),
            colors::path(&plan.output_dir.display().to_string())
        );
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if let Err(e) = manager.cancel() {
                    debug!("Nothing to cancel: {}", e);
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Progress(fraction)) => {
                    if !quiet && !json {
                        print!("\r{}", colors::progress_bar(fraction));
                        std::io::stdout().flush().ok();
                    }
                }
                Ok(SessionEvent::ProcessingFinished(_)) | Ok(SessionEvent::Cancelled) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} session events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let Some(report) = tokio::task::block_in_place(|| manager.wait_processing()) else {
        print_error("Processing ended without a report", quiet);
        return ExitCode::ProcessingFailed;
    };

    let code = if report.cancelled {
        ExitCode::UserCancelled
    } else if report.failed > 0 {
        ExitCode::ProcessingFailed
    } else {
        ExitCode::Success
    };

    if json {
        let status = if report.cancelled { "cancelled" } else { "delivered" };
        println!("{}", json!({ "status": status, "plan": plan, "report": report }));
    } else if !quiet {
        println!();
        if report.cancelled {
            println!(
                "{}",
                colors::info(&format!(
                    "Processing cancelled after {} of {} frames.",
                    report.completed, report.total
                ))
            );
        } else {
            println!(
                "{} {} ({})",
                colors::success("Delivered to"),
                colors::path(&plan.output_dir.display().to_string()),
                colors::bold(&plan.delivery_date)
            );
            if report.failed > 0 {
                eprintln!(
                    "{}",
                    colors::warning(&format!("{} of {} frames failed", report.failed, report.total))
                );
            }
        }
    }
    code
}

/// Convert an existing cache directory.
pub async fn process(args: ProcessArgs, settings: Settings, json: bool, quiet: bool) -> ExitCode {
    let now = match parse_at(args.at.as_deref()) {
        Ok(now) => now,
        Err(e) => {
            print_error(&e, quiet);
            return ExitCode::InvalidArguments;
        }
    };
    if !args.cache_dir.is_dir() {
        print_error(
            &format!("Cache directory {} does not exist", args.cache_dir.display()),
            quiet,
        );
        return ExitCode::InvalidArguments;
    }

    let project = args.project.clone().unwrap_or_else(|| default_project(&settings));
    let manager = RecordingManager::new(settings);
    let mut events = manager.subscribe();
    deliver(
        &manager,
        &mut events,
        &args.cache_dir,
        &args.clip,
        &project,
        now,
        json,
        quiet,
    )
    .await
}

/// Print the delivery folder date for `at` (or now).
pub fn next_workday(at: Option<&str>, settings: &Settings, json: bool) -> ExitCode {
    let now = match parse_at(at) {
        Ok(now) => now,
        Err(e) => {
            eprintln!("{}", colors::error(&e));
            return ExitCode::InvalidArguments;
        }
    };

    let rules = DeliveryRules::from_settings(&settings.delivery, &settings.excluded_dates());
    match resolve_delivery_date(now, &rules) {
        Ok(day) => {
            let folder = delivery_folder_name(day);
            if json {
                println!(
                    "{}",
                    json!({
                        "date": folder,
                        "at": now.format(AT_FORMAT).to_string(),
                        "cutoff": rules.cutoff.format("%H:%M").to_string(),
                    })
                );
            } else {
                println!(
                    "{} {}",
                    colors::bold(&folder),
                    colors::dim(&format!(
                        "(recorded {}, cutoff {})",
                        now.format("%Y-%m-%d %H:%M"),
                        rules.cutoff.format("%H:%M")
                    ))
                );
            }
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{}", colors::error(&e.to_string()));
            ExitCode::NoDeliveryDate
        }
    }
}

/// Remove every session folder under the cache root.
pub fn clean_cache(json: bool, quiet: bool) -> ExitCode {
    let root = cache::cache_root();
    let removed = cache::clean_cache_folder(&root);
    if json {
        println!("{}", json!({ "removed": removed, "cache_root": root }));
    } else if !quiet {
        println!(
            "{} {} cached sessions from {}",
            colors::success("Removed"),
            colors::number(&removed.to_string()),
            colors::path(&root.display().to_string())
        );
    }
    ExitCode::Success
}

fn resolve_settings_path(custom: Option<&Path>) -> Result<PathBuf, String> {
    match custom {
        Some(path) => Ok(path.to_path_buf()),
        None => config::settings_path(),
    }
}

/// Print the effective settings as JSON.
pub fn config_show(settings: &Settings) -> ExitCode {
    match serde_json::to_string_pretty(settings) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{}", colors::error(&format!("Failed to serialize settings: {}", e)));
            ExitCode::ConfigError
        }
    }
}

pub fn config_path(custom: Option<&Path>, json: bool) -> ExitCode {
    match resolve_settings_path(custom) {
        Ok(path) => {
            if json {
                println!("{}", json!({ "path": path, "exists": path.exists() }));
            } else {
                println!("{}", colors::path(&path.display().to_string()));
            }
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{}", colors::error(&e));
            ExitCode::ConfigError
        }
    }
}

/// Write a default settings file.
pub fn config_init(custom: Option<&Path>, force: bool, json: bool, quiet: bool) -> ExitCode {
    let path = match resolve_settings_path(custom) {
        Ok(path) => path,
        Err(e) => {
            print_error(&e, quiet);
            return ExitCode::ConfigError;
        }
    };
    if path.exists() && !force {
        print_error(
            &format!("{} already exists (use --force to overwrite)", path.display()),
            quiet,
        );
        return ExitCode::ConfigError;
    }

    match config::save_settings_to(&Settings::default(), &path) {
        Ok(()) => {
            if json {
                println!("{}", json!({ "status": "written", "path": path }));
            } else if !quiet {
                println!(
                    "{} {}",
                    colors::success("Wrote default settings to"),
                    colors::path(&path.display().to_string())
                );
            }
            ExitCode::Success
        }
        Err(e) => {
            print_error(&e, quiet);
            ExitCode::ConfigError
        }
    }
}

/// Show version information.
pub fn version(json: bool) {
    let version = env!("CARGO_PKG_VERSION");
    if json {
        println!("{}", json!({ "version": version }));
    } else {
        println!("{} {}", colors::bold("reviewrec"), version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use reviewrec_engine::ResolutionError;

    fn record_args(width: Option<u32>, height: Option<u32>) -> RecordArgs {
        RecordArgs {
            clip: "shot".to_string(),
            project: None,
            x: 10,
            y: -20,
            width,
            height,
            duration: None,
            no_process: false,
        }
    }

    #[test]
    fn test_parse_at_explicit() {
        let at = parse_at(Some("2024-06-07T09:59")).unwrap();
        assert_eq!(
            at,
            NaiveDate::from_ymd_opt(2024, 6, 7)
                .unwrap()
                .and_hms_opt(9, 59, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_parse_at_rejects_other_formats() {
        assert!(parse_at(Some("2024-06-07 09:59")).is_err());
        assert!(parse_at(Some("tomorrow")).is_err());
    }

    #[test]
    fn test_parse_at_defaults_to_now() {
        let before = Local::now().naive_local();
        let at = parse_at(None).unwrap();
        assert!(at >= before - chrono::Duration::seconds(1));
    }

    #[test]
    fn test_region_defaults_to_canvas() {
        let settings = Settings::default();
        let region = region_from_args(&record_args(None, None), &settings);
        assert_eq!(region, CaptureRegion::new(10, -20, 1920, 1080));

        let region = region_from_args(&record_args(Some(640), Some(480)), &settings);
        assert_eq!((region.width, region.height), (640, 480));
    }

    #[test]
    fn test_default_project_is_first_configured() {
        let mut settings = Settings::default();
        assert_eq!(default_project(&settings), "testing");
        settings.projects.names = vec!["Atlas".to_string(), "Borealis".to_string()];
        assert_eq!(default_project(&settings), "Atlas");
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(
            exit_code_for(&SessionError::InvalidInput("bad".into())),
            ExitCode::InvalidArguments
        );
        assert_eq!(
            exit_code_for(&SessionError::Capture(CaptureError::Unsupported("x".into()))),
            ExitCode::RecordingFailedToStart
        );
        let resolution = ResolutionError {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            days_scanned: 60,
        };
        assert_eq!(
            exit_code_for(&SessionError::Resolution(resolution)),
            ExitCode::NoDeliveryDate
        );
    }

    #[test]
    fn test_config_init_writes_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        assert_eq!(config_init(Some(&path), false, false, true), ExitCode::Success);
        assert!(path.exists());
        let loaded = load(Some(&path));
        assert_eq!(loaded.delivery.cutoff, Settings::default().delivery.cutoff);

        assert_eq!(config_init(Some(&path), false, false, true), ExitCode::ConfigError);
        assert_eq!(config_init(Some(&path), true, false, true), ExitCode::Success);
    }

    #[test]
    fn test_next_workday_rejects_bad_time() {
        let settings = Settings::default();
        assert_eq!(
            next_workday(Some("not a time"), &settings, true),
            ExitCode::InvalidArguments
        );
        assert_eq!(
            next_workday(Some("2024-06-07T11:00"), &settings, true),
            ExitCode::Success
        );
    }

    #[tokio::test]
    async fn test_process_rejects_missing_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let args = ProcessArgs {
            cache_dir: dir.path().join("missing"),
            clip: "shot".to_string(),
            project: None,
            at: None,
        };
        assert_eq!(
            process(args, Settings::default(), true, true).await,
            ExitCode::InvalidArguments
        );
    }
}
