use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::api::HealthStatus;
use crate::core::{CheckResult, CheckStatus, Host, ReportMeta, Severity};
use crate::engine::{DashboardSnapshot, HostReports};
use crate::exit::ExitCode;

const TITLE_MAX_CHARS: usize = 60;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdin_is_tty: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

/// Which checks `show` prints. Statistics always cover the whole report.
#[derive(Debug, Clone, Default)]
pub struct CheckView {
    pub statuses: Vec<CheckStatus>,
    pub include_evidence: bool,
}

impl CheckView {
    pub fn includes(&self, check: &CheckResult) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&check.status)
    }
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "エラー:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "原因:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "次に:");
    if crate::exit::exit_code(err) == ExitCode::BackendFailed.as_i32() {
        let _ = writeln!(
            stderr,
            "  - バックエンドの接続先は `--backend` または CISDASH_BACKEND_URL で指定できます"
        );
        let _ = writeln!(
            stderr,
            "  - 疎通確認には `cisdash health` を使用してください"
        );
    }
    let _ = writeln!(
        stderr,
        "  - 詳細を見るには `--verbose` を付けて再実行してください"
    );
    let _ = writeln!(
        stderr,
        "  - 利用可能なコマンド/オプションは `cisdash --help` を参照してください"
    );
}

pub fn print_hosts(hosts: &[Host], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    write_hosts(&mut out, hosts, cfg);
}

fn write_hosts(out: &mut dyn Write, hosts: &[Host], cfg: &UiConfig) {
    if hosts.is_empty() {
        let _ = writeln!(out, "ホストが登録されていません。");
        return;
    }

    let rows = hosts.len().min(cfg.max_table_rows.max(1));
    if hosts.len() > rows {
        let _ = writeln!(out, "ホスト（{rows}件表示 / 全{}件）:", hosts.len());
    } else {
        let _ = writeln!(out, "ホスト（{rows}件）:");
    }

    let label_id = "ホストID";
    let label_name = "ホスト名";
    let id_w = hosts
        .iter()
        .take(rows)
        .map(|h| visible_width_ansi(&h.host_id))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_id));
    let name_w = visible_width_ansi(label_name).max(8);

    let _ = writeln!(out, "{}  {}", pad_end_display(label_id, id_w), label_name);
    let _ = writeln!(out, "{}  {}", "-".repeat(id_w), "-".repeat(name_w));
    for host in hosts.iter().take(rows) {
        let _ = writeln!(
            out,
            "{}  {}",
            pad_end_display(&host.host_id, id_w),
            host.display_name()
        );
    }
}

pub fn print_reports(listing: &HostReports, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    write_reports(&mut out, listing, cfg);
}

fn write_reports(out: &mut dyn Write, listing: &HostReports, cfg: &UiConfig) {
    let _ = writeln!(
        out,
        "ホスト: {} ({})",
        listing.host.display_name(),
        listing.host.host_id
    );
    if listing.reports.is_empty() {
        let _ = writeln!(out, "レポートがありません。");
        return;
    }

    let _ = writeln!(out, "レポート（新しい順、{}件）:", listing.reports.len());
    let label_id = "ID";
    let label_created = "登録日時";
    let id_w = listing
        .reports
        .iter()
        .map(|r| r.id.to_string().len())
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_id));
    let created_w = listing
        .reports
        .iter()
        .map(|r| visible_width_ansi(&r.created_at))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_created));

    let _ = writeln!(
        out,
        "{}  {}  スキャン日時",
        pad_start_display(label_id, id_w),
        pad_end_display(label_created, created_w)
    );
    let _ = writeln!(
        out,
        "{}  {}  {}",
        "-".repeat(id_w),
        "-".repeat(created_w),
        "-".repeat(12)
    );
    for (i, report) in listing.reports.iter().enumerate() {
        let latest = if i == 0 {
            format_dim("（最新）", cfg.color)
        } else {
            String::new()
        };
        let _ = writeln!(
            out,
            "{}  {}  {}{}",
            pad_start_display(&report.id.to_string(), id_w),
            pad_end_display(&report.created_at, created_w),
            report.ts_utc.as_deref().unwrap_or("-"),
            latest
        );
    }
}

pub fn print_dashboard(snapshot: &DashboardSnapshot, view: &CheckView, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    write_dashboard(&mut out, snapshot, view, cfg);
}

fn write_dashboard(
    out: &mut dyn Write,
    snapshot: &DashboardSnapshot,
    view: &CheckView,
    cfg: &UiConfig,
) {
    let Some(host) = &snapshot.host else {
        let _ = writeln!(out, "ホストが登録されていません。（{}）", snapshot.backend);
        return;
    };
    let _ = writeln!(out, "ホスト: {} ({})", host.display_name(), host.host_id);

    let Some(report) = &snapshot.report else {
        let _ = writeln!(out, "レポートがありません。");
        return;
    };
    let _ = writeln!(out, "レポート: #{} {}", report.id, report_time(report));

    if let Some(info) = &snapshot.report_info {
        if let Some(facts) = &info.host {
            let os = [facts.os.as_str(), facts.os_version.as_str()]
                .iter()
                .filter(|s| !s.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join(" ");
            if !os.is_empty() {
                let _ = writeln!(out, "OS: {os}");
            }
            if !facts.kernel.is_empty() {
                let _ = writeln!(out, "カーネル: {}", facts.kernel);
            }
            if !facts.ip.is_empty() {
                let _ = writeln!(out, "IP: {}", facts.ip);
            }
        }
        if let Some(agent) = &info.agent {
            if !agent.name.is_empty() || !agent.version.is_empty() {
                let _ = writeln!(out, "エージェント: {} {}", agent.name, agent.version);
            }
        }
        if !info.packages.is_empty() {
            let _ = writeln!(out, "パッケージ: {}件", info.packages.len());
        }
    }

    let stats = &snapshot.statistics;
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "スコア: {}  （{} {}  {} {}  {} {}  合計 {}）",
        format_score(stats.score, cfg.color),
        format_status(CheckStatus::Pass, cfg.color),
        stats.pass,
        format_status(CheckStatus::Fail, cfg.color),
        stats.fail,
        format_status(CheckStatus::Error, cfg.color),
        stats.error,
        stats.total
    );
    if stats.fail > 0 {
        let parts: Vec<String> = snapshot
            .failing_by_severity
            .iter()
            .filter(|c| c.count > 0)
            .map(|c| format!("{} {}", format_severity(c.severity, cfg.color), c.count))
            .collect();
        let _ = writeln!(out, "FAIL の内訳: {}", parts.join("  "));
    }

    let checks: Vec<&CheckResult> = snapshot.checks.iter().filter(|c| view.includes(c)).collect();
    let _ = writeln!(out);
    if checks.is_empty() {
        if snapshot.checks.is_empty() {
            let _ = writeln!(out, "チェック結果がありません。");
        } else {
            let _ = writeln!(out, "条件に一致するチェックがありません。");
        }
        return;
    }

    let rows = checks.len().min(cfg.max_table_rows.max(1));
    if checks.len() > rows {
        let _ = writeln!(out, "チェック（{rows}件表示 / 全{}件）:", checks.len());
    } else {
        let _ = writeln!(out, "チェック（{rows}件表示）:");
    }
    write_checks_table(out, &checks[..rows], view.include_evidence, cfg.color);
    if checks.len() > rows {
        let _ = writeln!(out, "...（残り{}件）", checks.len() - rows);
    }
}

pub fn print_health(backend: &str, health: &HealthStatus, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "バックエンド: {backend}");
    let _ = writeln!(out, "状態: {}", health.status);
    if !health.time.is_empty() {
        let _ = writeln!(out, "時刻: {}", health.time);
    }
}

fn report_time(report: &ReportMeta) -> String {
    match report.ts_utc.as_deref() {
        Some(ts) if !ts.is_empty() => format!("{}（スキャン: {ts}）", report.created_at),
        _ => report.created_at.clone(),
    }
}

fn write_checks_table(
    out: &mut dyn Write,
    checks: &[&CheckResult],
    include_evidence: bool,
    color: bool,
) {
    let label_status = "結果";
    let label_severity = "重要度";
    let label_id = "チェックID";
    let label_title = "タイトル";

    let status_w = visible_width_ansi(label_status).max(5);
    let severity_w = visible_width_ansi(label_severity).max(6);
    let id_w = checks
        .iter()
        .map(|c| visible_width_ansi(&c.check_id))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_id));
    let title_w = visible_width_ansi(label_title).max(5);

    let _ = writeln!(
        out,
        "{}  {}  {}  {}",
        pad_end_display(label_status, status_w),
        pad_end_display(label_severity, severity_w),
        pad_end_display(label_id, id_w),
        label_title
    );
    let _ = writeln!(
        out,
        "{}  {}  {}  {}",
        "-".repeat(status_w),
        "-".repeat(severity_w),
        "-".repeat(id_w),
        "-".repeat(title_w)
    );

    for check in checks {
        let status = pad_end_ansi(&format_status(check.status, color), status_w);
        let severity = pad_end_ansi(&format_severity(check.severity, color), severity_w);
        let id = pad_end_display(&check.check_id, id_w);
        let _ = writeln!(
            out,
            "{status}  {severity}  {id}  {}",
            truncate_middle(&check.title, TITLE_MAX_CHARS)
        );
        if include_evidence && !check.evidence.trim().is_empty() {
            for line in check.evidence.trim().lines() {
                let _ = writeln!(out, "    > {line}");
            }
        }
    }
}

fn truncate_middle(s: &str, max_chars: usize) -> String {
    let len = s.chars().count();
    if len <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let left = keep / 2;
    let right = keep.saturating_sub(left);

    let prefix: String = s.chars().take(left).collect();
    let suffix: String = s
        .chars()
        .rev()
        .take(right)
        .collect::<String>()
        .chars()
        .rev()
        .collect();

    format!("{prefix}...{suffix}")
}

fn format_status(status: CheckStatus, color: bool) -> String {
    let s = status.as_str();
    if !color {
        return s.to_string();
    }

    let code = match status {
        CheckStatus::Pass => "32",
        CheckStatus::Fail => "31",
        CheckStatus::Error => "33",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn format_severity(severity: Severity, color: bool) -> String {
    let s = severity.as_str();
    if !color {
        return s.to_string();
    }

    let code = match severity {
        Severity::Low => "90",
        Severity::Medium => "33",
        Severity::High => "31",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn format_score(score: u8, color: bool) -> String {
    let s = format!("{score}%");
    if !color {
        return s;
    }
    let code = match score {
        80..=100 => "32",
        50..=79 => "33",
        _ => "31",
    };
    format!("\x1b[1;{code}m{s}\x1b[0m")
}

fn format_dim(s: &str, color: bool) -> String {
    if color {
        format!("\x1b[90m{s}\x1b[0m")
    } else {
        s.to_string()
    }
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_start_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{}{}", " ".repeat(width - w), s)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SeverityCount;
    use crate::stats::Statistics;

    fn cfg() -> UiConfig {
        UiConfig {
            color: false,
            stdin_is_tty: false,
            stdout_is_tty: false,
            stderr_is_tty: false,
            max_table_rows: 2,
            quiet: false,
            verbose: false,
        }
    }

    fn check(id: &str, status: CheckStatus, severity: Severity, evidence: &str) -> CheckResult {
        CheckResult {
            check_id: id.to_string(),
            title: format!("title {id}"),
            status,
            severity,
            evidence: evidence.to_string(),
        }
    }

    fn snapshot(checks: Vec<CheckResult>) -> DashboardSnapshot {
        let statistics = crate::stats::summarize(&checks);
        DashboardSnapshot {
            backend: "http://127.0.0.1:8000".to_string(),
            host: Some(Host {
                host_id: "h1".to_string(),
                hostname: "web1".to_string(),
            }),
            report: Some(ReportMeta {
                id: 42,
                created_at: "2024-05-01 10:00:00".to_string(),
                ts_utc: None,
            }),
            report_info: None,
            statistics,
            failing_by_severity: crate::stats::failing_by_severity(&checks)
                .into_iter()
                .map(|(severity, count)| SeverityCount { severity, count })
                .collect(),
            checks,
        }
    }

    fn render(snapshot: &DashboardSnapshot, view: &CheckView) -> String {
        let mut buf = Vec::new();
        write_dashboard(&mut buf, snapshot, view, &cfg());
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn dashboard_shows_score_breakdown_and_truncates_rows() {
        let snap = snapshot(vec![
            check("1.1", CheckStatus::Pass, Severity::Low, ""),
            check("1.2", CheckStatus::Fail, Severity::High, "PermitRootLogin yes"),
            check("1.3", CheckStatus::Fail, Severity::Low, ""),
        ]);
        let out = render(&snap, &CheckView::default());

        assert!(out.contains("ホスト: web1 (h1)"), "{out}");
        assert!(out.contains("レポート: #42"), "{out}");
        assert!(out.contains("スコア: 33%"), "{out}");
        assert!(out.contains("FAIL の内訳: HIGH 1  LOW 1"), "{out}");
        assert!(out.contains("チェック（2件表示 / 全3件）"), "{out}");
        assert!(out.contains("...（残り1件）"), "{out}");
        assert!(!out.contains("PermitRootLogin"), "{out}");
    }

    #[test]
    fn status_filter_and_evidence_apply_to_table_only() {
        let snap = snapshot(vec![
            check("1.1", CheckStatus::Pass, Severity::Low, ""),
            check("1.2", CheckStatus::Fail, Severity::High, "PermitRootLogin yes"),
        ]);
        let view = CheckView {
            statuses: vec![CheckStatus::Fail],
            include_evidence: true,
        };
        let out = render(&snap, &view);

        assert!(out.contains("スコア: 50%"), "{out}");
        assert!(out.contains("    > PermitRootLogin yes"), "{out}");
        assert!(!out.contains("title 1.1"), "{out}");
    }

    #[test]
    fn empty_report_says_so() {
        let snap = snapshot(Vec::new());
        assert_eq!(snap.statistics, Statistics::default());
        let out = render(&snap, &CheckView::default());
        assert!(out.contains("スコア: 0%"), "{out}");
        assert!(out.contains("チェック結果がありません。"), "{out}");
    }

    #[test]
    fn reports_table_marks_latest() {
        let listing = HostReports {
            host: Host {
                host_id: "h1".to_string(),
                hostname: String::new(),
            },
            reports: vec![
                ReportMeta {
                    id: 9,
                    created_at: "2024-05-02".to_string(),
                    ts_utc: Some("2024-05-02T00:00:00Z".to_string()),
                },
                ReportMeta {
                    id: 8,
                    created_at: "2024-05-01".to_string(),
                    ts_utc: None,
                },
            ],
        };
        let mut buf = Vec::new();
        write_reports(&mut buf, &listing, &cfg());
        let out = String::from_utf8(buf).expect("utf8");
        assert!(out.contains("ホスト: unknown-host (h1)"), "{out}");
        let latest = out.lines().find(|l| l.contains("2024-05-02T00:00:00Z")).expect("row");
        assert!(latest.ends_with("（最新）"), "{latest}");
    }

    #[test]
    fn widths_ignore_ansi_and_count_wide_chars() {
        assert_eq!(visible_width_ansi("\x1b[31mFAIL\x1b[0m"), 4);
        assert_eq!(visible_width_ansi("結果"), 4);
        assert_eq!(pad_end_ansi("\x1b[32mPASS\x1b[0m", 6).len(), "\x1b[32mPASS\x1b[0m".len() + 2);
        assert_eq!(truncate_middle("abcdefghij", 7), "ab...ij");
    }
}
