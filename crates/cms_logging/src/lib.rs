//! Logging setup and home-directory resolution for the `cms` binary.
//!
//! Events go to two sinks: a size-rolled file under `$CMS_HOME/logs` that
//! always receives the full filter, and stderr, which only shows warnings
//! unless the binary runs verbose.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "CMS_HOME";

const HOME_DIR_NAME: &str = ".cms_admin";
const DEFAULT_LOG_FILTER: &str = "cms=info,cms_import=info,cms_db=info";

/// Logging configuration for a binary.
pub struct LogConfig<'a> {
    /// Log file stem; `cms` writes `logs/cms.log`
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let writer = LogFileWriter::open(&dir, config.app_name, RollPolicy::default())
        .with_context(|| format!("Failed to open log file for {}", config.app_name))?;

    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };
    let stderr_filter = if config.verbose {
        filter()
    } else {
        EnvFilter::new("warn")
    };

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(filter());
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(stderr_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install tracing subscriber")
}

/// Home directory: `$CMS_HOME`, or `~/.cms_admin`.
pub fn cms_home() -> Result<PathBuf> {
    match std::env::var(HOME_ENV) {
        Ok(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir)),
        _ => dirs::home_dir()
            .map(|home| home.join(HOME_DIR_NAME))
            .context("Could not determine home directory; set CMS_HOME"),
    }
}

/// Logs directory: `<home>/logs`
pub fn logs_dir() -> Result<PathBuf> {
    Ok(cms_home()?.join("logs"))
}

pub fn ensure_logs_dir() -> Result<PathBuf> {
    let dir = logs_dir()?;
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    Ok(dir)
}

/// When to roll the active file and how many generations to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RollPolicy {
    /// Active file plus numbered backups
    keep_files: usize,
    max_bytes: u64,
}

impl Default for RollPolicy {
    fn default() -> Self {
        Self {
            keep_files: 5,
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// `<dir>/<stem>.log` with backups `<stem>.log.1` (newest) .. `<stem>.log.N`.
struct RollingLog {
    active: PathBuf,
    policy: RollPolicy,
    file: Option<File>,
    written: u64,
}

impl RollingLog {
    fn open(dir: &Path, stem: &str, policy: RollPolicy) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut log = Self {
            active: dir.join(format!("{}.log", file_stem(stem))),
            policy: RollPolicy {
                keep_files: policy.keep_files.max(1),
                ..policy
            },
            file: None,
            written: 0,
        };
        log.reopen()?;
        if log.written > log.policy.max_bytes {
            log.roll()?;
        }
        Ok(log)
    }

    fn backup(&self, generation: usize) -> PathBuf {
        let mut name = self.active.clone().into_os_string();
        name.push(format!(".{}", generation));
        PathBuf::from(name)
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.active)?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn roll(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        let backups = self.policy.keep_files - 1;
        if backups == 0 {
            fs::remove_file(&self.active).or_else(ignore_missing)?;
        } else {
            fs::remove_file(self.backup(backups)).or_else(ignore_missing)?;
            for generation in (1..backups).rev() {
                fs::rename(self.backup(generation), self.backup(generation + 1))
                    .or_else(ignore_missing)?;
            }
            fs::rename(&self.active, self.backup(1)).or_else(ignore_missing)?;
        }

        self.reopen()
    }
}

fn ignore_missing(err: io::Error) -> io::Result<()> {
    if err.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(err)
    }
}

impl Write for RollingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.policy.max_bytes {
            self.roll()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Shared handle handed to `tracing_subscriber` as a `MakeWriter`.
#[derive(Clone)]
struct LogFileWriter(Arc<Mutex<RollingLog>>);

impl LogFileWriter {
    fn open(dir: &Path, stem: &str, policy: RollPolicy) -> io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(RollingLog::open(dir, stem, policy)?))))
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut RollingLog) -> io::Result<T>) -> io::Result<T> {
        let mut log = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        f(&mut log)
    }
}

impl<'a> MakeWriter<'a> for LogFileWriter {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_log(|log| log.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_log(|log| log.flush())
    }
}

/// Restrict a name to characters safe in a file name.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    if stem.is_empty() {
        "app".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small(keep_files: usize) -> RollPolicy {
        RollPolicy {
            keep_files,
            max_bytes: 16,
        }
    }

    #[test]
    fn rolls_and_keeps_generations() {
        let tmp = TempDir::new().unwrap();
        let mut log = RollingLog::open(tmp.path(), "cms", small(3)).unwrap();

        for _ in 0..4 {
            log.write_all(b"0123456789abcdef").unwrap();
        }
        log.flush().unwrap();

        assert!(tmp.path().join("cms.log").exists());
        assert!(tmp.path().join("cms.log.1").exists());
        assert!(tmp.path().join("cms.log.2").exists());
        assert!(!tmp.path().join("cms.log.3").exists());
        assert_eq!(fs::metadata(tmp.path().join("cms.log")).unwrap().len(), 16);
    }

    #[test]
    fn single_file_policy_truncates_on_roll() {
        let tmp = TempDir::new().unwrap();
        let mut log = RollingLog::open(tmp.path(), "cms", small(1)).unwrap();
        log.write_all(b"0123456789abcdef").unwrap();
        log.write_all(b"second").unwrap();
        log.flush().unwrap();

        assert!(!tmp.path().join("cms.log.1").exists());
        let contents = fs::read_to_string(tmp.path().join("cms.log")).unwrap();
        assert_eq!(contents, "second");
    }

    #[test]
    fn appends_to_existing_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("cms.log"), b"old\n").unwrap();

        let writer = LogFileWriter::open(tmp.path(), "cms", RollPolicy::default()).unwrap();
        let mut handle = writer.make_writer();
        handle.write_all(b"new\n").unwrap();
        handle.flush().unwrap();

        let contents = fs::read_to_string(tmp.path().join("cms.log")).unwrap();
        assert_eq!(contents, "old\nnew\n");
    }

    #[test]
    fn file_stem_replaces_path_characters() {
        assert_eq!(file_stem("cms/import v1"), "cms_import_v1");
        assert_eq!(file_stem("cms-cli_2"), "cms-cli_2");
        assert_eq!(file_stem(""), "app");
    }
}
