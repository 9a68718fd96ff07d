use std::env;
use std::io::Write;

use anyhow::anyhow;
use fern::Output;
use indicatif::{ProgressBar, WeakProgressBar};
use log::{error, info};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::cli::VerbosityLevel;

/// Progress bar of the running simulation, shared by all rank threads
static CURRENT_PROGRESS_BAR: Lazy<RwLock<Option<WeakProgressBar>>> =
    Lazy::new(|| RwLock::new(None));

/// Output stream that hides the progress bar while log lines are written to it
#[derive(Debug)]
pub struct ProgressAwareWriter<T: Write + Send>(T);

impl<T: Write + Send + 'static> ProgressAwareWriter<T> {
    pub fn new(pipe: T) -> Self {
        Self(pipe)
    }

    pub fn into_output(self) -> Output {
        let boxed: Box<dyn Write + Send + 'static> = Box::new(self);
        boxed.into()
    }
}

/// Runs `f`, suspending the current progress bar for its duration
fn with_suspended_progress<R>(f: impl FnOnce() -> R) -> R {
    match get_progress_bar() {
        Some(pb) => pb.suspend(f),
        None => f(),
    }
}

impl<T: Write + Send> Write for ProgressAwareWriter<T> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        with_suspended_progress(|| self.0.write(buf))
    }

    #[inline]
    fn flush(&mut self) -> std::io::Result<()> {
        with_suspended_progress(|| self.0.flush())
    }
}

/// Sets the reference to the current ProgressBar for the writer
pub(crate) fn set_progress_bar(pb: Option<WeakProgressBar>) {
    *CURRENT_PROGRESS_BAR.write() = pb;
}

/// Returns the Progressbar, if it exists, otherwise "None"
pub(crate) fn get_progress_bar() -> Option<ProgressBar> {
    CURRENT_PROGRESS_BAR.read().as_ref()?.upgrade()
}

/// Prints an anyhow error and its full error chain using the log::error macro
pub(crate) fn log_error(err: &anyhow::Error) {
    error!("Error occurred: {}", err);
    err.chain()
        .skip(1)
        .for_each(|cause| error!("  caused by: {}", cause));
}

/// Rank of the calling thread, rank threads are named `rank-{r}`
fn current_rank() -> Option<usize> {
    std::thread::current()
        .name()?
        .strip_prefix("rank-")?
        .parse()
        .ok()
}

fn thread_label() -> String {
    match current_rank() {
        Some(rank) => format!("rank {}", rank),
        None => "main".to_string(),
    }
}

/// Log level from the `RUST_LOG` environment variable, returns the unparsed value if it is unknown
fn log_filter_from_env() -> (log::LevelFilter, Option<String>) {
    let Some(log_level) = env::var_os("RUST_LOG") else {
        return (log::LevelFilter::Info, None);
    };

    let log_level = log_level.to_string_lossy().to_ascii_lowercase();
    match log_level.parse::<log::LevelFilter>() {
        Ok(filter) => (filter, None),
        Err(_) => (log::LevelFilter::Info, Some(log_level)),
    }
}

/// Initializes logging with fern
///
/// Quiet mode disables logging, otherwise the verbosity level takes precedence over the
/// `RUST_LOG` environment variable. If `log_rank` is set, rank threads other than the given one
/// only log warnings and errors.
pub(crate) fn initialize_logging(
    verbosity: VerbosityLevel,
    quiet_mode: bool,
    log_rank: Option<usize>,
) -> Result<(), anyhow::Error> {
    let mut unknown_log_filter_level = None;
    let log_filter_level = if quiet_mode {
        log::LevelFilter::Off
    } else {
        verbosity.into_filter().unwrap_or_else(|| {
            let (filter, unknown) = log_filter_from_env();
            unknown_log_filter_level = unknown;
            filter
        })
    };

    let verbose = !matches!(verbosity, VerbosityLevel::None);
    fern::Dispatch::new()
        .format(move |out, message, record| {
            if verbose {
                out.finish(format_args!(
                    "[{}][{}][{}][{}] {}",
                    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false),
                    thread_label(),
                    record.target(),
                    record.level(),
                    message
                ))
            } else {
                out.finish(format_args!(
                    "[{}][{}][{}] {}",
                    chrono::Local::now().format("%T%.3f"),
                    thread_label(),
                    record.level(),
                    message
                ))
            }
        })
        .level(log_filter_level)
        .filter(move |metadata| match (log_rank, current_rank()) {
            (Some(selected), Some(rank)) if rank != selected => {
                metadata.level() <= log::Level::Warn
            }
            _ => true,
        })
        .chain(ProgressAwareWriter::new(std::io::stdout()).into_output())
        .apply()
        .map_err(|e| anyhow!("Unable to apply logger configuration ({:?})", e))?;

    if let Some(filter_level) = unknown_log_filter_level {
        error!(
            "Unknown log filter level '{}' defined in 'RUST_LOG' env variable, using INFO instead.",
            filter_level
        );
    }

    Ok(())
}

/// Prints program name, version etc. and command line arguments to log
pub(crate) fn log_program_info() {
    info!(
        "{} v{} ({})",
        env::args()
            .next()
            .unwrap_or_else(|| "dropletgrid".to_string()),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_NAME")
    );

    let cmd_line = env::args().collect::<Vec<_>>().join(" ");
    info!("Called with command line: {}", cmd_line);
}
