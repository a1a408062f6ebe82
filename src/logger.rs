//! Session logger: backs the `log` facade with a single file in the OS data
//! directory.
//!
//! The file is **truncated (overwritten) at each launch**, so it only ever
//! contains output from the most-recent session.
//!
//! Log location (unless `--log-file` overrides it):
//!   Windows:  `%APPDATA%\MagicPen\magicpen.log`
//!   Linux:    `~/.local/share/MagicPen/magicpen.log`
//!   macOS:    `~/Library/Application Support/MagicPen/magicpen.log`
//!
//! Warnings and errors are mirrored to stderr; with `verbose` every record
//! is. stdout is left alone because `serve` speaks JSON lines on it.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

struct SessionLogger {
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
    verbose: bool,
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= max_level(self.verbose)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), &record.args().to_string());
        if let Some(mutex) = &self.file
            && let Ok(mut file) = mutex.lock()
        {
            let _ = writeln!(file, "{}", line);
        }
        if self.verbose || record.level() <= Level::Warn {
            eprintln!("{}", line);
        }
    }

    fn flush(&self) {
        if let Some(mutex) = &self.file
            && let Ok(mut file) = mutex.lock()
        {
            let _ = file.flush();
        }
    }
}

fn max_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Returns the path to the current session log file, if one was opened.
pub fn log_path() -> Option<&'static Path> {
    LOGGER.get().and_then(|l| l.path.as_deref())
}

/// Initialise the session logger. Only the first call has any effect.
///
/// * Creates (or truncates) the log file. Failing to open it is not fatal;
///   records then only reach stderr.
/// * Installs a panic hook that writes the panic message to the log before
///   propagating to the default handler.
pub fn init(path_override: Option<&Path>, verbose: bool) {
    let path = path_override
        .map(Path::to_path_buf)
        .unwrap_or_else(log_file_path);

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
    {
        Ok(f) => Some(f),
        Err(e) => {
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            None
        }
    };

    let logger = LOGGER.get_or_init(|| SessionLogger {
        path: file.as_ref().map(|_| path.clone()),
        file: file.map(Mutex::new),
        verbose,
    });
    if log::set_logger(logger).is_err() {
        return;
    }
    log::set_max_level(max_level(verbose));

    if let Some(p) = &logger.path {
        write_raw(&format!(
            "=== MagicPen session started {} ===",
            human_timestamp()
        ));
        write_raw(&format!("Log file: {}", p.display()));
        write_raw("");
    }

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_raw(&format_line_tag("PANIC", &info.to_string()));
        prev(info);
    }));
}

/// Write a line straight to the log file, bypassing level filtering.
fn write_raw(line: &str) {
    if let Some(logger) = LOGGER.get()
        && let Some(mutex) = &logger.file
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

fn format_line(level: Level, msg: &str) -> String {
    let tag = match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    };
    format_line_tag(tag, msg)
}

fn format_line_tag(tag: &str, msg: &str) -> String {
    format!("[{}] [{}] {}", timestamp(), tag, msg)
}

fn log_file_path() -> PathBuf {
    data_dir().join("MagicPen").join("magicpen.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

/// HH:MM:SS (UTC) within the current day.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs();
            let h = (secs % 86400) / 3600;
            let m = (secs % 3600) / 60;
            let s = secs % 60;
            format!("{:02}:{:02}:{:02}", h, m, s)
        }
        Err(_) => "??:??:??".to_string(),
    }
}

fn human_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("(unix {})", d.as_secs()),
        Err(_) => "(unknown time)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        let line = format_line(Level::Warn, "crop 3 skipped");
        // "[HH:MM:SS] [WARN] crop 3 skipped"
        assert_eq!(line.len(), "[00:00:00] [WARN] crop 3 skipped".len());
        assert!(line.starts_with('['));
        assert!(line.ends_with("] [WARN] crop 3 skipped"));
    }

    #[test]
    fn test_verbose_raises_level() {
        assert_eq!(max_level(false), LevelFilter::Info);
        assert_eq!(max_level(true), LevelFilter::Debug);
    }

    #[test]
    fn test_default_path_ends_in_app_folder() {
        let path = log_file_path();
        assert!(path.ends_with(Path::new("MagicPen").join("magicpen.log")));
    }
}
