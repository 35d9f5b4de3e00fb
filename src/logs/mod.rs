use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Off,
    Stderr,
    File,
}

#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    pub target: LogTarget,
    pub verbose: bool,
}

pub fn logs_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/cisdash/logs")
}

pub fn log_file_name(prefix: &str, at: OffsetDateTime) -> String {
    let pid = std::process::id();
    let ts = at.unix_timestamp_nanos();
    format!("{prefix}-{pid}-{ts}.log")
}

pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "cisdash=debug" } else { "cisdash=info" }
}

pub fn init(opts: LogOptions, home_dir: &Path) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(opts.verbose)));

    match opts.target {
        LogTarget::Off => Ok(None),
        LogTarget::Stderr => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false),
                )
                .try_init();
            Ok(None)
        }
        LogTarget::File => {
            let dir = logs_dir(home_dir);
            std::fs::create_dir_all(&dir).with_context(|| {
                format!("ログディレクトリの作成に失敗しました: {}", dir.display())
            })?;
            let path = dir.join(log_file_name("ui", OffsetDateTime::now_utc()));
            let file = File::create(&path).with_context(|| {
                format!("ログファイルの作成に失敗しました: {}", path.display())
            })?;
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false),
                )
                .try_init();
            Ok(Some(path))
        }
    }
}

pub fn mask_home(path: &Path, home_dir: &Path) -> String {
    let Ok(stripped) = path.strip_prefix(home_dir) else {
        return path.display().to_string();
    };
    let stripped = stripped.display().to_string();
    if stripped.is_empty() {
        "~".to_string()
    } else {
        format!("~/{stripped}")
    }
}
