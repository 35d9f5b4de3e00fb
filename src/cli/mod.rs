use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;

use crate::api::ClientOptions;
use crate::config::EffectiveConfig;
use crate::core::CheckStatus;
use crate::engine::{DashboardRequest, Engine, EngineOptions};
use crate::logs::{LogOptions, LogTarget};
use crate::ui::{CheckView, UiConfig};

#[derive(Debug, Parser)]
#[command(
    name = "cisdash",
    version,
    about = "ホストごとのCISコンプライアンス結果を取得し、スコアとチェック一覧を表示する"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// バックエンドのベースURL（例: http://127.0.0.1:8000）
    #[arg(long, global = true)]
    pub backend: Option<String>,
    /// リクエストごとのタイムアウト秒数（0 で無効）
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Hosts,
    Reports(ReportsArgs),
    Show(ShowArgs),
    Health,
    Ui(UiArgs),
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ReportsArgs {
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub report: Option<u64>,
    #[arg(long)]
    pub limit: Option<usize>,
    /// 表示するステータス（複数指定可）
    #[arg(long)]
    pub status: Vec<CheckStatus>,
    #[arg(long)]
    pub include_evidence: bool,
}

#[derive(Debug, Args)]
pub struct UiArgs {}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let stdin_is_tty = io::stdin().is_terminal();
    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::platform::effective_home_dir()?;

    let mut cfg =
        crate::config::load(cli.config.as_deref(), &home_dir).map_err(crate::exit::invalid_args_err)?;
    apply_flag_overrides(&mut cfg, &cli).map_err(crate::exit::invalid_args_err)?;

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;

    let ui_cfg = UiConfig {
        color,
        stdin_is_tty,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let is_ui_mode = matches!(&cli.command, Commands::Ui(_));
    if is_ui_mode {
        if cli.json {
            return Err(crate::exit::invalid_args("ui は --json と併用できません"));
        }
        if !(ui_cfg.stdin_is_tty && ui_cfg.stdout_is_tty) {
            return Err(crate::exit::invalid_args(
                "ui は TTY が必要です（stdin + stdout）",
            ));
        }
    }

    let log_target = if is_ui_mode {
        LogTarget::File
    } else if cli.verbose {
        LogTarget::Stderr
    } else {
        LogTarget::Off
    };
    let log_path = crate::logs::init(
        LogOptions {
            target: log_target,
            verbose: cli.verbose,
        },
        &home_dir,
    )?;
    tracing::debug!(backend = %cfg.backend.url, limit = cfg.reports.limit, "configuration loaded");

    match cli.command {
        Commands::Hosts => {
            let engine = engine(&cfg, &cli, &ui_cfg, cfg.reports.limit)?;
            let hosts = engine.hosts()?;
            if cli.json {
                write_json(&hosts)?;
            } else {
                crate::ui::print_hosts(&hosts, &ui_cfg);
            }
        }
        Commands::Reports(ref args) => {
            let limit = resolve_limit(args.limit, &cfg)?;
            let engine = engine(&cfg, &cli, &ui_cfg, limit)?;
            let listing = engine.reports(args.host.as_deref(), limit)?;
            if cli.json {
                write_json(&listing)?;
            } else {
                crate::ui::print_reports(&listing, &ui_cfg);
            }
        }
        Commands::Show(ref args) => {
            let limit = resolve_limit(args.limit, &cfg)?;
            let engine = engine(&cfg, &cli, &ui_cfg, limit)?;
            let mut snapshot = engine.dashboard(DashboardRequest {
                host: args.host.clone(),
                report: args.report,
            })?;
            let view = CheckView {
                statuses: args.status.clone(),
                include_evidence: args.include_evidence,
            };
            if cli.json {
                snapshot.checks.retain(|c| view.includes(c));
                if !view.include_evidence {
                    strip_evidence(&mut snapshot.checks);
                }
                write_json(&snapshot)?;
            } else {
                crate::ui::print_dashboard(&snapshot, &view, &ui_cfg);
            }
        }
        Commands::Health => {
            let engine = engine(&cfg, &cli, &ui_cfg, cfg.reports.limit)?;
            let health = engine.health()?;
            if cli.json {
                write_json(&health)?;
            } else {
                crate::ui::print_health(engine.base_url(), &health, &ui_cfg);
            }
        }
        Commands::Ui(_) => {
            let engine = engine(&cfg, &cli, &ui_cfg, cfg.reports.limit)?;
            let log_hint = log_path.map(|p| crate::logs::mask_home(&p, &home_dir));
            crate::tui::run(engine, ui_cfg.color, log_hint)?;
        }
        Commands::Completion(ref args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "cisdash", &mut out);
        }
        Commands::Config(ref args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: `cisdash config --show` を使用してください");
            }
        }
    }

    Ok(())
}

/// `--backend` and `--timeout` sit above env and file values.
fn apply_flag_overrides(cfg: &mut EffectiveConfig, cli: &Cli) -> Result<()> {
    if let Some(url) = cli.backend.as_deref() {
        cfg.backend.url = url.trim().to_string();
    }
    if let Some(timeout) = cli.timeout {
        cfg.backend.timeout_secs = timeout;
    }
    crate::config::validate(cfg)
}

fn resolve_limit(flag: Option<usize>, cfg: &EffectiveConfig) -> Result<usize> {
    let limit = flag.unwrap_or(cfg.reports.limit);
    crate::config::validate_limit(limit).map_err(crate::exit::invalid_args_err)?;
    Ok(limit)
}

fn engine(cfg: &EffectiveConfig, cli: &Cli, ui_cfg: &UiConfig, report_limit: usize) -> Result<Engine> {
    Engine::new(EngineOptions {
        client: ClientOptions {
            base_url: cfg.backend.url.clone(),
            timeout: cfg.backend.timeout(),
        },
        report_limit,
        show_progress: ui_cfg.stderr_is_tty && !cli.quiet && !cli.json,
    })
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn strip_evidence(checks: &mut [crate::core::CheckResult]) {
    for check in checks {
        check.evidence.clear();
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "未対応のシェルです: {other}（bash|zsh|fish を指定してください）"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_and_are_validated() {
        let cli = Cli::parse_from([
            "cisdash",
            "--backend",
            "http://flag:1234/",
            "--timeout",
            "0",
            "hosts",
        ]);
        let mut cfg = EffectiveConfig::default();
        apply_flag_overrides(&mut cfg, &cli).expect("valid");
        assert_eq!(cfg.backend.url, "http://flag:1234/");
        assert_eq!(cfg.backend.timeout(), None);

        let cli = Cli::parse_from(["cisdash", "--backend", "flag:1234", "hosts"]);
        let mut cfg = EffectiveConfig::default();
        assert!(apply_flag_overrides(&mut cfg, &cli).is_err());
    }

    #[test]
    fn show_accepts_repeated_status_filters() {
        let cli = Cli::parse_from([
            "cisdash", "show", "--host", "h1", "--status", "fail", "--status", "ERROR",
        ]);
        let Commands::Show(args) = cli.command else {
            panic!("expected show");
        };
        assert_eq!(args.host.as_deref(), Some("h1"));
        assert_eq!(args.status, vec![CheckStatus::Fail, CheckStatus::Error]);
    }

    #[test]
    fn show_rejects_unknown_status() {
        let res = Cli::try_parse_from(["cisdash", "show", "--status", "SKIPPED"]);
        assert!(res.is_err());
    }

    #[test]
    fn limit_must_be_in_range() {
        let cfg = EffectiveConfig::default();
        assert_eq!(resolve_limit(None, &cfg).expect("default"), 10);
        assert_eq!(resolve_limit(Some(100), &cfg).expect("max"), 100);
        let err = resolve_limit(Some(0), &cfg).expect_err("zero");
        assert_eq!(crate::exit::exit_code(&err), 2);
    }

    #[test]
    fn unsupported_shell_is_invalid_args() {
        assert_eq!(parse_shell(" ZSH ").expect("zsh"), clap_complete::Shell::Zsh);
        let err = parse_shell("powershell").expect_err("unsupported");
        assert_eq!(crate::exit::exit_code(&err), 2);
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
