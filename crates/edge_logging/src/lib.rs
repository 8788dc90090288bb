//! Logging setup for the edge agent.
//!
//! One subscriber with two `fmt` layers: a size-rotated file under
//! `<base>/log/<name>.log` and stderr. `RUST_LOG` overrides the default filter.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str =
    "edge=info,edge_runtime=info,edge_manager=info,edge_control=info,edge_state_store=info";
pub const VERBOSE_LOG_FILTER: &str =
    "edge=debug,edge_runtime=debug,edge_manager=debug,edge_control=debug,edge_state_store=debug";
pub const DEFAULT_MAX_LOG_FILES: usize = 5;
pub const DEFAULT_MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration for the agent binary.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_dir: PathBuf,
    pub base_name: String,
    pub verbose: bool,
    /// Overrides the built-in default filter; `RUST_LOG` still wins.
    pub filter: Option<String>,
    pub max_files: usize,
    pub max_file_size: u64,
}

impl LogConfig {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            base_name: "edge".to_string(),
            verbose: false,
            filter: None,
            max_files: DEFAULT_MAX_LOG_FILES,
            max_file_size: DEFAULT_MAX_LOG_FILE_SIZE,
        }
    }
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig) -> Result<()> {
    fs::create_dir_all(&config.log_dir).with_context(|| {
        format!(
            "Failed to create logs directory: {}",
            config.log_dir.display()
        )
    })?;
    let file_writer = SharedRollingWriter::new(
        &config.log_dir,
        &config.base_name,
        config.max_files,
        config.max_file_size,
    )
    .context("Failed to initialize rolling log writer")?;

    let fallback = if config.verbose {
        VERBOSE_LOG_FILTER.to_string()
    } else {
        config
            .filter
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
    };
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&fallback));
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&fallback));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Size-rotated log file: `<name>.log`, then `<name>.log.1` … `<name>.log.N-1`.
struct RollingFileAppender {
    dir: PathBuf,
    base_name: String,
    max_files: usize,
    max_size: u64,
    file: Option<File>,
    current_size: u64,
}

impl RollingFileAppender {
    fn open(dir: &Path, base_name: &str, max_files: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut appender = Self {
            dir: dir.to_path_buf(),
            base_name: sanitize_name(base_name),
            max_files: max_files.max(1),
            max_size,
            file: None,
            current_size: 0,
        };
        appender.reopen()?;
        if appender.current_size > appender.max_size {
            appender.rotate()?;
        }
        Ok(appender)
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        self.current_size = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.base_name, index))
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        let keep = self.max_files.saturating_sub(1);
        if keep == 0 {
            fs::remove_file(self.current_path()).or_else(ignore_missing)?;
            return self.reopen();
        }

        fs::remove_file(self.rotated_path(keep)).or_else(ignore_missing)?;
        for idx in (1..keep).rev() {
            fs::rename(self.rotated_path(idx), self.rotated_path(idx + 1)).or_else(ignore_missing)?;
        }
        fs::rename(self.current_path(), self.rotated_path(1)).or_else(ignore_missing)?;
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

impl Write for RollingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size > 0 && self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let bytes = file.write(buf)?;
        self.current_size += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
struct SharedRollingWriter {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl SharedRollingWriter {
    fn new(dir: &Path, base_name: &str, max_files: usize, max_size: u64) -> Result<Self> {
        let appender = RollingFileAppender::open(dir, base_name, max_files, max_size)
            .with_context(|| format!("Failed to open log file for {}", base_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(appender)),
        })
    }
}

struct SharedRollingWriterGuard {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRollingWriter {
    type Writer = SharedRollingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedRollingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedRollingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotation_keeps_bounded_files() {
        let dir = TempDir::new().unwrap();
        let mut appender = RollingFileAppender::open(dir.path(), "edge", 3, 16).unwrap();
        for i in 0..10 {
            appender
                .write_all(format!("line {:02} ....\n", i).as_bytes())
                .unwrap();
        }
        appender.flush().unwrap();

        assert!(dir.path().join("edge.log").exists());
        assert!(dir.path().join("edge.log.1").exists());
        assert!(dir.path().join("edge.log.2").exists());
        assert!(!dir.path().join("edge.log.3").exists());

        let current = fs::read_to_string(dir.path().join("edge.log")).unwrap();
        assert_eq!(current, "line 09 ....\n");
        let previous = fs::read_to_string(dir.path().join("edge.log.1")).unwrap();
        assert_eq!(previous, "line 08 ....\n");
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        {
            let mut appender = RollingFileAppender::open(dir.path(), "edge", 2, 1024).unwrap();
            appender.write_all(b"first\n").unwrap();
        }
        let mut appender = RollingFileAppender::open(dir.path(), "edge", 2, 1024).unwrap();
        assert_eq!(appender.current_size, 6);
        appender.write_all(b"second\n").unwrap();
        let content = fs::read_to_string(dir.path().join("edge.log")).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("edge agent/1"), "edge_agent_1");
    }
}
