//! Review recorder command-line interface
//!
//! Records a screen region into the frame cache, converts the cache into a
//! slated review sequence and answers delivery-date questions, without the
//! windowed front end.

mod colors;
mod commands;
mod exit_codes;

use clap::{Parser, Subcommand};
use exit_codes::ExitCode;
use reviewrec_common::logging::{ensure_log_dir, LOG_FILE_PREFIX};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// reviewrec - Screen recording for review sequences
#[derive(Parser, Debug)]
#[command(name = "reviewrec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file to use instead of the platform default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record a screen region, then convert it for review
    Record(RecordArgs),
    /// Convert an existing frame cache for review
    Process(ProcessArgs),
    /// Show the delivery folder date for a recording made now (or at --at)
    NextWorkday {
        /// Point in time, YYYY-MM-DDTHH:MM
        #[arg(long)]
        at: Option<String>,
    },
    /// Remove every cached recording session
    CleanCache,
    /// Inspect or create the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Parser, Debug, Clone)]
pub struct RecordArgs {
    /// Clip name (letters, digits, space, '_' and '-')
    #[arg(short, long)]
    clip: String,

    /// Project tag embedded in every image (defaults to the first configured project)
    #[arg(short, long)]
    project: Option<String>,

    /// Region X coordinate (pixels)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    x: i32,

    /// Region Y coordinate (pixels)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    y: i32,

    /// Region width (pixels, defaults to the canvas width)
    #[arg(long)]
    width: Option<u32>,

    /// Region height (pixels, defaults to the canvas height)
    #[arg(long)]
    height: Option<u32>,

    /// Auto-stop after duration (seconds, 0 for no limit)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Keep the frame cache instead of converting it
    #[arg(long)]
    no_process: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ProcessArgs {
    /// Directory holding the cached frames
    cache_dir: PathBuf,

    /// Clip name used for the review folder and file names
    #[arg(short, long)]
    clip: String,

    /// Project tag embedded in every image
    #[arg(short, long)]
    project: Option<String>,

    /// Resolve the delivery date as if it were this time, YYYY-MM-DDTHH:MM
    #[arg(long)]
    at: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Print the settings file location
    Path,
    /// Write a settings file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Install stderr and daily-file logging. The guard must outlive the program.
fn init_logging(verbose: bool) -> Option<WorkerGuard> {
    let filter = |fallback: &str| {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
    };
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter(if verbose { "debug" } else { "warn" }));

    match ensure_log_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter(if verbose { "debug" } else { "info" }));
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry().with(stderr_layer).init();
            tracing::warn!("File logging disabled: {}", e);
            None
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", colors::error(&format!("Failed to create runtime: {}", e)));
            std::process::exit(ExitCode::GeneralError.as_i32());
        }
    };

    let exit_code = runtime.block_on(run(cli));
    tracing::debug!("Exiting: {}", exit_code);
    drop(runtime);
    drop(_log_guard);
    std::process::exit(exit_code.as_i32());
}

async fn run(cli: Cli) -> ExitCode {
    let settings = commands::load(cli.config.as_deref());
    match cli.command {
        Commands::Record(args) => commands::record(args, settings, cli.json, cli.quiet).await,
        Commands::Process(args) => commands::process(args, settings, cli.json, cli.quiet).await,
        Commands::NextWorkday { at } => commands::next_workday(at.as_deref(), &settings, cli.json),
        Commands::CleanCache => commands::clean_cache(cli.json, cli.quiet),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&settings),
            ConfigAction::Path => commands::config_path(cli.config.as_deref(), cli.json),
            ConfigAction::Init { force } => {
                commands::config_init(cli.config.as_deref(), force, cli.json, cli.quiet)
            }
        },
        Commands::Version => {
            commands::version(cli.json);
            ExitCode::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    /// Verify the CLI definition is valid
    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_record_defaults() {
        let cli = Cli::try_parse_from(["reviewrec", "record", "--clip", "shot a"]).unwrap();
        match cli.command {
            Commands::Record(args) => {
                assert_eq!(args.clip, "shot a");
                assert!(args.project.is_none());
                assert_eq!((args.x, args.y), (0, 0));
                assert!(args.width.is_none());
                assert!(args.duration.is_none());
                assert!(!args.no_process);
            }
            _ => panic!("Expected Record command"),
        }
    }

    #[test]
    fn parse_record_region() {
        let cli = Cli::try_parse_from([
            "reviewrec",
            "record",
            "-c",
            "shot",
            "-p",
            "Atlas",
            "--x",
            "-1920",
            "--y",
            "40",
            "--width",
            "800",
            "--height",
            "600",
            "-d",
            "60",
        ])
        .unwrap();
        match cli.command {
            Commands::Record(args) => {
                assert_eq!(args.project.as_deref(), Some("Atlas"));
                assert_eq!(args.x, -1920);
                assert_eq!(args.y, 40);
                assert_eq!(args.width, Some(800));
                assert_eq!(args.height, Some(600));
                assert_eq!(args.duration, Some(60));
            }
            _ => panic!("Expected Record command"),
        }
    }

    #[test]
    fn parse_record_requires_clip() {
        assert!(Cli::try_parse_from(["reviewrec", "record"]).is_err());
    }

    #[test]
    fn parse_process() {
        let cli = Cli::try_parse_from([
            "reviewrec",
            "process",
            "/tmp/cache/shot",
            "--clip",
            "shot",
            "--at",
            "2024-06-03T11:00",
        ])
        .unwrap();
        match cli.command {
            Commands::Process(args) => {
                assert_eq!(args.cache_dir, PathBuf::from("/tmp/cache/shot"));
                assert_eq!(args.at.as_deref(), Some("2024-06-03T11:00"));
            }
            _ => panic!("Expected Process command"),
        }
    }

    #[test]
    fn parse_next_workday() {
        let cli = Cli::try_parse_from(["reviewrec", "next-workday", "--at", "2024-06-07T11:00"])
            .unwrap();
        assert!(matches!(cli.command, Commands::NextWorkday { at: Some(_) }));
    }

    #[test]
    fn parse_config_actions() {
        let cli = Cli::try_parse_from(["reviewrec", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
        let cli = Cli::try_parse_from(["reviewrec", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "reviewrec",
            "clean-cache",
            "--json",
            "-q",
            "--config",
            "/tmp/settings.json",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/settings.json")));
    }

    #[test]
    fn parse_invalid_command() {
        assert!(Cli::try_parse_from(["reviewrec", "invalid"]).is_err());
    }

    #[test]
    fn parse_version() {
        let cli = Cli::try_parse_from(["reviewrec", "version"]).unwrap();
        assert!(matches!(cli.command, Commands::Version));
    }
}
