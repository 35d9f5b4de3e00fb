mod state;

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::api::{ApiError, ComplianceApi, DEFAULT_REPORT_LIMIT};
use crate::core::{Host, ReportDocument, ReportMeta};
use crate::stats::{self, Statistics};

pub use state::DashboardState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Hosts,
    Reports,
    Payload,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Hosts => "hosts",
            Stage::Reports => "reports",
            Stage::Payload => "payload",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Stage::Hosts => "ホスト一覧",
            Stage::Reports => "レポート一覧",
            Stage::Payload => "レポート",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Applied(Stage),
    Failed(Stage, String),
    Discarded(Stage),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub report_limit: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            report_limit: DEFAULT_REPORT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TicketKey {
    Unkeyed,
    Host(String),
    Report(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Ticket {
    stage: Stage,
    generation: u64,
    key: TicketKey,
}

enum Outcome {
    Hosts(Result<Vec<Host>, ApiError>),
    Reports(Result<Vec<ReportMeta>, ApiError>),
    Payload(Result<ReportDocument, ApiError>),
    Abandoned,
}

struct Completion {
    ticket: Ticket,
    outcome: Outcome,
}

/// Sends exactly one completion per ticket. Dropped unresolved (task panic or
/// runtime shutdown) it sends `Abandoned`, so `loading` always clears.
struct Resolver {
    ticket: Option<Ticket>,
    tx: mpsc::UnboundedSender<Completion>,
}

impl Resolver {
    fn resolve(mut self, outcome: Outcome) {
        if let Some(ticket) = self.ticket.take() {
            let _ = self.tx.send(Completion { ticket, outcome });
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            let _ = self.tx.send(Completion {
                ticket,
                outcome: Outcome::Abandoned,
            });
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Generations {
    hosts: u64,
    reports: u64,
    payload: u64,
}

pub struct Pipeline {
    api: Arc<dyn ComplianceApi>,
    options: PipelineOptions,
    state: DashboardState,
    generations: Generations,
    refresh_pending: bool,
    in_flight: usize,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
    runtime: Handle,
}

impl Pipeline {
    /// Must be called from within a tokio runtime; stage requests are spawned
    /// onto it.
    pub fn new(api: Arc<dyn ComplianceApi>, options: PipelineOptions) -> Self {
        Self::with_runtime(Handle::current(), api, options)
    }

    pub fn with_runtime(
        runtime: Handle,
        api: Arc<dyn ComplianceApi>,
        options: PipelineOptions,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            api,
            options,
            state: DashboardState::default(),
            generations: Generations::default(),
            refresh_pending: false,
            in_flight: 0,
            tx,
            rx,
            runtime,
        }
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    pub fn statistics(&self) -> Statistics {
        stats::summarize(&self.state.checks)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }

    pub fn start(&mut self) {
        self.run_hosts_stage();
    }

    /// Keeps the current host if it still exists; the report snaps to its latest.
    pub fn refresh(&mut self) {
        self.refresh_pending = self.state.selected_host.is_some();
        self.run_hosts_stage();
    }

    pub fn rebind(&mut self, api: Arc<dyn ComplianceApi>) {
        self.api = api;
        self.state = DashboardState::default();
        self.refresh_pending = false;
        self.generations.reports += 1;
        self.generations.payload += 1;
        self.run_hosts_stage();
    }

    /// `false` when already selected or unknown.
    pub fn select_host(&mut self, host_id: &str) -> bool {
        if !self.state.hosts.iter().any(|h| h.host_id == host_id) {
            tracing::warn!(host_id, "ignoring selection of unknown host");
            return false;
        }
        if !self.state.set_host(Some(host_id.to_string())) {
            return false;
        }
        self.run_reports_stage();
        true
    }

    /// `false` when already selected or unknown.
    pub fn select_report(&mut self, report_id: u64) -> bool {
        if !self.state.reports.iter().any(|r| r.id == report_id) {
            tracing::warn!(report_id, "ignoring selection of unknown report");
            return false;
        }
        if !self.state.set_report(Some(report_id)) {
            return false;
        }
        self.run_payload_stage();
        true
    }

    pub fn poll(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            events.push(self.apply(completion));
        }
        events
    }

    /// `None` once nothing is in flight.
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        if self.in_flight == 0 {
            return None;
        }
        let completion = self.rx.recv().await?;
        Some(self.apply(completion))
    }

    pub async fn settle(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    fn run_hosts_stage(&mut self) {
        self.generations.hosts += 1;
        self.state.error = None;
        let ticket = Ticket {
            stage: Stage::Hosts,
            generation: self.generations.hosts,
            key: TicketKey::Unkeyed,
        };
        self.spawn(ticket, |api| async move { Outcome::Hosts(api.list_hosts().await) });
    }

    fn run_reports_stage(&mut self) {
        // A new reports request supersedes any payload request in flight.
        self.generations.reports += 1;
        self.generations.payload += 1;
        self.state.reset_reports();

        let Some(host_id) = self.state.selected_host.clone() else {
            return;
        };
        self.state.error = None;
        let limit = self.options.report_limit;
        let ticket = Ticket {
            stage: Stage::Reports,
            generation: self.generations.reports,
            key: TicketKey::Host(host_id.clone()),
        };
        self.spawn(ticket, move |api| async move {
            Outcome::Reports(api.list_reports(&host_id, limit).await)
        });
    }

    fn run_payload_stage(&mut self) {
        self.generations.payload += 1;
        self.state.reset_checks();

        let Some(report_id) = self.state.selected_report else {
            return;
        };
        self.state.error = None;
        self.state.loading = true;
        let ticket = Ticket {
            stage: Stage::Payload,
            generation: self.generations.payload,
            key: TicketKey::Report(report_id),
        };
        self.spawn(ticket, move |api| async move {
            Outcome::Payload(api.get_report(report_id).await)
        });
    }

    fn spawn<F, Fut>(&mut self, ticket: Ticket, request: F)
    where
        F: FnOnce(Arc<dyn ComplianceApi>) -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        tracing::debug!(
            stage = ticket.stage.as_str(),
            generation = ticket.generation,
            key = ?ticket.key,
            "stage started"
        );
        let resolver = Resolver {
            ticket: Some(ticket),
            tx: self.tx.clone(),
        };
        let fut = request(Arc::clone(&self.api));
        self.in_flight += 1;
        self.runtime.spawn(async move {
            let outcome = fut.await;
            resolver.resolve(outcome);
        });
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        match (&ticket.stage, &ticket.key) {
            (Stage::Hosts, _) => ticket.generation == self.generations.hosts,
            (Stage::Reports, TicketKey::Host(host_id)) => {
                ticket.generation == self.generations.reports
                    && self.state.selected_host.as_deref() == Some(host_id.as_str())
            }
            (Stage::Payload, TicketKey::Report(report_id)) => {
                ticket.generation == self.generations.payload
                    && self.state.selected_report == Some(*report_id)
            }
            _ => false,
        }
    }

    fn apply(&mut self, completion: Completion) -> PipelineEvent {
        self.in_flight = self.in_flight.saturating_sub(1);
        let Completion { ticket, outcome } = completion;
        let stage = ticket.stage;

        if !self.is_current(&ticket) {
            tracing::debug!(
                stage = stage.as_str(),
                generation = ticket.generation,
                key = ?ticket.key,
                "discarding stale completion"
            );
            return PipelineEvent::Discarded(stage);
        }

        match outcome {
            Outcome::Hosts(Ok(hosts)) => {
                self.apply_hosts(hosts);
                PipelineEvent::Applied(stage)
            }
            Outcome::Reports(Ok(reports)) => {
                tracing::info!(count = reports.len(), "reports loaded");
                let latest = reports.first().map(|r| r.id);
                self.state.reports = reports;
                if let Some(report_id) = latest {
                    self.state.set_report(Some(report_id));
                    self.run_payload_stage();
                }
                PipelineEvent::Applied(stage)
            }
            Outcome::Payload(Ok(doc)) => {
                tracing::info!(checks = doc.payload.checks.len(), "report payload loaded");
                self.state.loading = false;
                self.state.checks = doc.payload.checks;
                self.state.report_info = Some(doc.info);
                PipelineEvent::Applied(stage)
            }
            Outcome::Hosts(Err(err)) => self.fail(stage, err.to_string()),
            Outcome::Reports(Err(err)) => self.fail(stage, err.to_string()),
            Outcome::Payload(Err(err)) => self.fail(stage, err.to_string()),
            Outcome::Abandoned => self.fail(stage, format!("{}の取得が中断されました", stage.label())),
        }
    }

    fn apply_hosts(&mut self, hosts: Vec<Host>) {
        tracing::info!(count = hosts.len(), "hosts loaded");
        let refresh = std::mem::take(&mut self.refresh_pending);
        let kept = self
            .state
            .selected_host
            .as_deref()
            .is_some_and(|id| hosts.iter().any(|h| h.host_id == id));
        let first = hosts.first().map(|h| h.host_id.clone());
        self.state.hosts = hosts;

        if kept {
            if refresh {
                self.run_reports_stage();
            }
            return;
        }
        if self.state.set_host(first) {
            self.run_reports_stage();
        }
    }

    fn fail(&mut self, stage: Stage, message: String) -> PipelineEvent {
        tracing::warn!(stage = stage.as_str(), error = %message, "stage failed");
        match stage {
            Stage::Hosts => self.refresh_pending = false,
            Stage::Reports => self.state.reset_reports(),
            Stage::Payload => self.state.reset_checks(),
        }
        self.state.error = Some(message.clone());
        PipelineEvent::Failed(stage, message)
    }
}
