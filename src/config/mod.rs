use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{self, DEFAULT_REPORT_LIMIT};

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
pub const MAX_REPORT_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub backend: BackendConfig,
    pub reports: ReportsConfig,
    pub ui: UiConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendConfig {
    pub url: String,
    /// 0 disables the per-request timeout.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportsConfig {
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                url: DEFAULT_BACKEND_URL.to_string(),
                timeout_secs: 10,
            },
            reports: ReportsConfig {
                limit: DEFAULT_REPORT_LIMIT,
            },
            ui: UiConfig {
                color: true,
                max_table_rows: 50,
            },
            config_path: None,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    backend: Option<RawBackendConfig>,
    reports: Option<RawReportsConfig>,
    ui: Option<RawUiConfig>,
}

#[derive(Debug, Deserialize)]
struct RawBackendConfig {
    url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawReportsConfig {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/cisdash/config.toml")
}

/// Resolves the file to read: explicit path, then `CISDASH_CONFIG`, then the
/// default location under the home directory.
pub fn resolve_path(config_path: Option<&Path>, home_dir: &Path) -> PathBuf {
    if let Some(path) = config_path {
        return path.to_owned();
    }
    match std::env::var_os("CISDASH_CONFIG") {
        Some(v) if !v.is_empty() => PathBuf::from(v),
        _ => default_config_path(home_dir),
    }
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();
    let explicit = config_path.is_some();
    let path = resolve_path(config_path, home_dir);

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み取りに失敗しました: {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&s).context("設定ファイル(TOML)の解析に失敗しました")?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    } else if explicit {
        anyhow::bail!("設定ファイルが見つかりません: {}", path.display());
    }

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    validate(&cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(backend) = raw.backend {
        if let Some(url) = backend.url {
            cfg.backend.url = url;
        }
        if let Some(timeout_secs) = backend.timeout_secs {
            cfg.backend.timeout_secs = timeout_secs;
        }
    }

    if let Some(reports) = raw.reports {
        if let Some(limit) = reports.limit {
            cfg.reports.limit = limit;
        }
    }

    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }
}

fn apply_env_overrides<F>(cfg: &mut EffectiveConfig, var: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = var("CISDASH_BACKEND_URL") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.backend.url = v.to_string();
        }
    }
    if let Some(v) = var("CISDASH_BACKEND_TIMEOUT_SECS") {
        cfg.backend.timeout_secs = v
            .trim()
            .parse::<u64>()
            .with_context(|| "CISDASH_BACKEND_TIMEOUT_SECS")?;
    }
    if let Some(v) = var("CISDASH_REPORTS_LIMIT") {
        cfg.reports.limit = v
            .trim()
            .parse::<usize>()
            .with_context(|| "CISDASH_REPORTS_LIMIT")?;
    }
    if let Some(v) = var("CISDASH_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "CISDASH_UI_COLOR")?;
    }
    if let Some(v) = var("CISDASH_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "CISDASH_UI_MAX_TABLE_ROWS")?;
    }

    Ok(())
}

pub fn validate(cfg: &EffectiveConfig) -> Result<()> {
    api::parse_base_url(&cfg.backend.url).context("backend.url")?;
    validate_limit(cfg.reports.limit).context("reports.limit")?;
    Ok(())
}

pub fn validate_limit(limit: usize) -> Result<()> {
    if !(1..=MAX_REPORT_LIMIT).contains(&limit) {
        anyhow::bail!("件数は 1〜{MAX_REPORT_LIMIT} の範囲で指定してください: {limit}");
    }
    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "真偽値が不正です: {s}（true|false|1|0|yes|no|on|off を指定してください）"
        )),
    }
}
