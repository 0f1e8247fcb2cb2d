//! Process logging bootstrap for the task host runtime.
//!
//! # Responsibility
//! - Start one rolling file logger per process.
//! - Capture panics raised by hosted package code as structured log events.
//!
//! # Invariants
//! - Repeating `init_logging` with identical arguments is a no-op.
//! - A second initialization with another level or directory is rejected.
//! - Nothing in this module panics.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::fmt::{Display, Formatter};
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "taskhost";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 16 * 1024 * 1024;
const MAX_LOG_FILES: usize = 4;
const MAX_PANIC_MESSAGE_CHARS: usize = 200;

static ACTIVE_LOGGER: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    level: LevelFilter,
    dir: PathBuf,
    _handle: LoggerHandle,
}

/// Starts file logging at `level` under `log_dir`.
///
/// # Errors
/// - `level` is not one of trace|debug|info|warn|error.
/// - `log_dir` is blank, relative, or cannot be created.
/// - The logger backend refuses to start.
/// - Logging is already running with a different level or directory.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let level = level_filter(level)?;
    let dir = absolute_log_dir(log_dir)?;

    let active = ACTIVE_LOGGER.get_or_try_init(|| start_logger(level, &dir))?;
    if active.dir != dir {
        return Err(format!(
            "logging already initialized at `{}`; refusing to switch to `{}`",
            active.dir.display(),
            dir.display()
        ));
    }
    if active.level != level {
        return Err(format!(
            "logging already initialized with level `{}`; refusing to switch to `{}`",
            active.level, level
        ));
    }
    Ok(())
}

/// Returns `(level, log_dir)` of the running logger, if any.
pub fn logging_status() -> Option<(LevelFilter, PathBuf)> {
    ACTIVE_LOGGER
        .get()
        .map(|active| (active.level, active.dir.clone()))
}

/// Level used when the host does not pick one.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start_logger(level: LevelFilter, dir: &Path) -> Result<ActiveLogger, String> {
    std::fs::create_dir_all(dir)
        .map_err(|err| format!("failed to create log directory `{}`: {err}", dir.display()))?;

    let spec = level.as_str().to_ascii_lowercase();
    let handle = Logger::try_with_str(&spec)
        .map_err(|err| format!("invalid log level `{spec}`: {err}"))?
        .log_to_file(FileSpec::default().directory(dir).basename(LOG_FILE_BASENAME))
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))?;

    install_panic_hook_once();

    info!(
        "event=runtime_start module=core status=ok platform={} version={}",
        std::env::consts::OS,
        crate::core_version()
    );
    info!(
        "event=logging_init module=core status=ok level={} log_dir={}",
        spec,
        dir.display()
    );

    Ok(ActiveLogger {
        level,
        dir: dir.to_path_buf(),
        _handle: handle,
    })
}

/// Parses a level name through `log`, accepting `warning` for `warn`.
/// `off` is refused: a host that wants no logs skips `init_logging`.
fn level_filter(raw: &str) -> Result<LevelFilter, String> {
    let name = raw.trim();
    let name = if name.eq_ignore_ascii_case("warning") {
        "warn"
    } else {
        name
    };
    match name.parse::<LevelFilter>() {
        Ok(LevelFilter::Off) | Err(_) => Err(format!(
            "unsupported log level `{}`; expected trace|debug|info|warn|error",
            raw.trim()
        )),
        Ok(level) => Ok(level),
    }
}

fn absolute_log_dir(raw: &str) -> Result<PathBuf, String> {
    let dir = PathBuf::from(raw.trim());
    if dir.as_os_str().is_empty() {
        Err("log_dir cannot be empty".to_string())
    } else if dir.is_relative() {
        Err(format!("log_dir must be an absolute path, got `{}`", dir.display()))
    } else {
        Ok(dir)
    }
}

/// One captured panic, flattened to fit a single log line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PanicReport {
    thread: String,
    location: String,
    message: String,
}

impl PanicReport {
    fn capture(info: &PanicHookInfo<'_>) -> Self {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        Self::new(
            std::thread::current().name().unwrap_or("unnamed"),
            info.location()
                .map(|loc| format!("{}:{}", loc.file(), loc.line()))
                .as_deref()
                .unwrap_or("unknown"),
            message,
        )
    }

    fn new(thread: &str, location: &str, message: &str) -> Self {
        Self {
            thread: single_token(thread),
            location: single_token(location),
            message: one_line(message, MAX_PANIC_MESSAGE_CHARS),
        }
    }
}

impl Display for PanicReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "thread={} location={} payload={}",
            self.thread, self.location, self.message
        )
    }
}

fn install_panic_hook_once() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!(
            "event=panic_captured module=core status=error {}",
            PanicReport::capture(panic_info)
        );
        previous_hook(panic_info);
    }));
}

/// Collapses whitespace runs to single spaces and caps the length in chars.
fn one_line(value: &str, max_chars: usize) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &collapsed[..cut]),
        None => collapsed,
    }
}

/// Keeps `key=value` fields parseable: thread names may contain spaces.
fn single_token(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join("_")
}

#[cfg(test)]
mod tests {
    use super::{absolute_log_dir, init_logging, level_filter, logging_status, one_line, PanicReport};
    use log::LevelFilter;

    #[test]
    fn level_names_parse_through_log() {
        assert_eq!(level_filter("TRACE").expect("TRACE should parse"), LevelFilter::Trace);
        assert_eq!(level_filter(" warning ").expect("warning should parse"), LevelFilter::Warn);
        assert!(level_filter("verbose").is_err());
        assert!(level_filter("off").is_err());
    }

    #[test]
    fn log_dir_must_be_absolute() {
        assert!(absolute_log_dir("   ").is_err());
        let error = absolute_log_dir("logs/dev").expect_err("relative paths must be rejected");
        assert!(error.contains("absolute"));
    }

    #[test]
    fn panic_reports_fit_one_log_line() {
        let report = PanicReport::new(
            "package worker 3",
            "src/job.rs:12",
            "table\n\tlocked\r\nby other job",
        );
        assert_eq!(
            report.to_string(),
            "thread=package_worker_3 location=src/job.rs:12 payload=table locked by other job"
        );

        assert_eq!(one_line("ééééé", 3), "ééé...");
        assert_eq!(one_line("short", 10), "short");
    }

    #[test]
    fn init_logging_is_idempotent_and_rejects_conflicts() {
        let root = tempfile::tempdir().expect("scratch dir");
        let first = root.path().join("first");
        let second = root.path().join("second");
        let first_str = first.to_str().expect("utf-8 temp path").to_string();
        let second_str = second.to_str().expect("utf-8 temp path").to_string();

        init_logging("info", &first_str).expect("first init should succeed");
        init_logging("INFO", &first_str).expect("same config should be idempotent");

        let level_error =
            init_logging("debug", &first_str).expect_err("level conflict should fail");
        assert!(level_error.contains("refusing to switch"));

        let dir_error =
            init_logging("info", &second_str).expect_err("directory conflict should fail");
        assert!(dir_error.contains("refusing to switch"));

        let (level, dir) = logging_status().expect("logging should be active");
        assert_eq!(level, LevelFilter::Info);
        assert_eq!(dir, first);
    }
}
