use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::api::{ClientOptions, ComplianceApi, HealthStatus, HttpClient};
use crate::core::{CheckResult, Host, ReportInfo, ReportMeta, Severity};
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::stats::{self, Statistics};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub client: ClientOptions,
    pub report_limit: usize,
    pub show_progress: bool,
}

/// Blocking façade for one-shot CLI commands. Owns the tokio runtime.
pub struct Engine {
    opts: EngineOptions,
    api: Arc<HttpClient>,
    runtime: Runtime,
}

#[derive(Debug, Clone, Default)]
pub struct DashboardRequest {
    pub host: Option<String>,
    pub report: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostReports {
    pub host: Host,
    pub reports: Vec<ReportMeta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeverityCount {
    pub severity: Severity,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub backend: String,
    pub host: Option<Host>,
    pub report: Option<ReportMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_info: Option<ReportInfo>,
    pub statistics: Statistics,
    pub failing_by_severity: Vec<SeverityCount>,
    pub checks: Vec<CheckResult>,
}

impl DashboardSnapshot {
    pub fn from_pipeline(backend: &str, pipeline: &Pipeline) -> Self {
        let state = pipeline.state();
        Self {
            backend: backend.to_string(),
            host: state.selected_host().cloned(),
            report: state.selected_report().cloned(),
            report_info: state.report_info.clone(),
            statistics: pipeline.statistics(),
            failing_by_severity: stats::failing_by_severity(&state.checks)
                .into_iter()
                .map(|(severity, count)| SeverityCount { severity, count })
                .collect(),
            checks: state.checks.clone(),
        }
    }
}

impl Engine {
    pub fn new(opts: EngineOptions) -> Result<Self> {
        let api = HttpClient::new(opts.client.clone()).map_err(crate::exit::invalid_args_err)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("非同期ランタイムの初期化に失敗しました")?;
        Ok(Self {
            opts,
            api: Arc::new(api),
            runtime,
        })
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url()
    }

    pub fn report_limit(&self) -> usize {
        self.opts.report_limit
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn api(&self) -> Arc<dyn ComplianceApi> {
        self.api.clone()
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::with_runtime(
            self.runtime.handle().clone(),
            self.api(),
            PipelineOptions {
                report_limit: self.opts.report_limit,
            },
        )
    }

    pub fn hosts(&self) -> Result<Vec<Host>> {
        let api = self.api.clone();
        self.with_progress("ホスト一覧を取得中...", || {
            self.runtime
                .block_on(api.list_hosts())
                .map_err(crate::exit::backend_err)
        })
    }

    pub fn reports(&self, host: Option<&str>, limit: usize) -> Result<HostReports> {
        let api = self.api.clone();
        self.with_progress("レポート一覧を取得中...", || {
            self.runtime.block_on(async {
                let hosts = api.list_hosts().await.map_err(crate::exit::backend_err)?;
                let host = pick_host(&hosts, host)?;
                let reports = api
                    .list_reports(&host.host_id, limit)
                    .await
                    .map_err(crate::exit::backend_err)?;
                Ok::<_, anyhow::Error>(HostReports { host, reports })
            })
        })
    }

    pub fn dashboard(&self, req: DashboardRequest) -> Result<DashboardSnapshot> {
        let mut pipeline = self.pipeline();
        let backend = self.base_url().to_string();
        let limit = self.opts.report_limit;
        self.with_progress("レポートを取得中...", || {
            self.runtime.block_on(async {
                // A failure on an auto-selected host or report is only fatal
                // when the caller is not about to move away from it.
                pipeline.start();
                pipeline.settle().await;

                if let Some(host_id) = req.host.as_deref() {
                    if pipeline.state().selected_host.as_deref() != Some(host_id) {
                        if !pipeline.select_host(host_id) {
                            fail_on_error(&pipeline)?;
                            return Err(crate::exit::invalid_args(format!(
                                "ホストが見つかりません: {host_id}"
                            )));
                        }
                        pipeline.settle().await;
                    }
                }

                if let Some(report_id) = req.report {
                    if pipeline.state().selected_report != Some(report_id) {
                        if !pipeline.select_report(report_id) {
                            fail_on_error(&pipeline)?;
                            return Err(crate::exit::invalid_args(format!(
                                "レポートが見つかりません: {report_id}（直近{limit}件から指定してください）"
                            )));
                        }
                        pipeline.settle().await;
                    }
                }

                fail_on_error(&pipeline)?;
                Ok::<_, anyhow::Error>(DashboardSnapshot::from_pipeline(&backend, &pipeline))
            })
        })
    }

    pub fn health(&self) -> Result<HealthStatus> {
        let api = self.api.clone();
        self.with_progress("ヘルスチェック中...", || {
            self.runtime
                .block_on(api.health())
                .map_err(crate::exit::backend_err)
        })
    }

    fn with_progress<T>(&self, message: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let progress_enabled = self.opts.show_progress && std::io::stderr().is_terminal();
        let pb = if progress_enabled {
            let pb = indicatif::ProgressBar::new_spinner();
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb.set_message(message);
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let out = f();

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        out
    }
}

fn fail_on_error(pipeline: &Pipeline) -> Result<()> {
    match &pipeline.state().error {
        Some(message) => Err(crate::exit::backend(message.clone())),
        None => Ok(()),
    }
}

fn pick_host(hosts: &[Host], wanted: Option<&str>) -> Result<Host> {
    match wanted {
        Some(id) => hosts
            .iter()
            .find(|h| h.host_id == id)
            .cloned()
            .ok_or_else(|| crate::exit::invalid_args(format!("ホストが見つかりません: {id}"))),
        None => hosts
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("ホストが登録されていません")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str) -> Host {
        Host {
            host_id: id.to_string(),
            hostname: String::new(),
        }
    }

    #[test]
    fn pick_host_defaults_to_first_and_rejects_unknown() {
        let hosts = vec![host("a"), host("b")];
        assert_eq!(pick_host(&hosts, None).expect("first").host_id, "a");
        assert_eq!(pick_host(&hosts, Some("b")).expect("b").host_id, "b");

        let err = pick_host(&hosts, Some("zz")).expect_err("unknown");
        assert_eq!(crate::exit::exit_code(&err), 2);

        let err = pick_host(&[], None).expect_err("empty");
        assert_eq!(crate::exit::exit_code(&err), 10);
    }

    #[test]
    fn engine_rejects_bad_backend_url_as_invalid_args() {
        let err = Engine::new(EngineOptions {
            client: ClientOptions {
                base_url: "localhost:8000".to_string(),
                timeout: None,
            },
            report_limit: 10,
            show_progress: false,
        })
        .err()
        .expect("bad url");
        assert_eq!(crate::exit::exit_code(&err), 2);
    }
}
