use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::dispatcher::{self, DefaultGuard};
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;

struct LogTimer;

impl FormatTime for LogTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

pub fn log_file_name() -> String {
    format!("update_test_{}.log", Local::now().format("%Y%m%d_%H%M%S"))
}

pub struct RunLog {
    path: PathBuf,
    dispatch: Option<Dispatch>,
    worker: Option<WorkerGuard>,
}

impl RunLog {
    pub fn open(log_dir: &Path, console: bool) -> Result<Self> {
        Self::open_with_level(log_dir, console, LevelFilter::INFO)
    }

    pub fn open_with_level(log_dir: &Path, console: bool, level: LevelFilter) -> Result<Self> {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
        let path = log_dir.join(log_file_name());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;

        let (writer, worker) = tracing_appender::non_blocking(file);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_timer(LogTimer)
            .with_writer(writer);
        let console_layer = console.then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_timer(LogTimer)
                .with_writer(std::io::stderr)
        });
        let subscriber = tracing_subscriber::registry()
            .with(level)
            .with(file_layer)
            .with(console_layer);

        Ok(Self {
            path,
            dispatch: Some(Dispatch::new(subscriber)),
            worker: Some(worker),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.dispatch.is_none()
    }

    pub fn enter(&self) -> Option<DefaultGuard> {
        self.dispatch.as_ref().map(dispatcher::set_default)
    }

    pub fn close(&mut self) {
        self.dispatch = None;
        self.worker = None;
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        self.close();
    }
}
