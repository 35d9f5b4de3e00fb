use serde::Serialize;

use crate::core::{CheckResult, Host, ReportInfo, ReportMeta};

/// Selections hold identities (`host_id`, report `id`), not copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardState {
    pub hosts: Vec<Host>,
    pub selected_host: Option<String>,
    pub reports: Vec<ReportMeta>,
    pub selected_report: Option<u64>,
    pub checks: Vec<CheckResult>,
    pub report_info: Option<ReportInfo>,
    pub loading: bool,
    pub error: Option<String>,
}

impl DashboardState {
    pub fn selected_host(&self) -> Option<&Host> {
        let id = self.selected_host.as_deref()?;
        self.hosts.iter().find(|h| h.host_id == id)
    }

    pub fn selected_report(&self) -> Option<&ReportMeta> {
        let id = self.selected_report?;
        self.reports.iter().find(|r| r.id == id)
    }

    pub fn host_index(&self) -> Option<usize> {
        let id = self.selected_host.as_deref()?;
        self.hosts.iter().position(|h| h.host_id == id)
    }

    pub fn report_index(&self) -> Option<usize> {
        let id = self.selected_report?;
        self.reports.iter().position(|r| r.id == id)
    }

    /// Returns `true` when the identity actually changed.
    pub(crate) fn set_host(&mut self, host_id: Option<String>) -> bool {
        if self.selected_host == host_id {
            return false;
        }
        self.selected_host = host_id;
        true
    }

    /// Returns `true` when the identity actually changed.
    pub(crate) fn set_report(&mut self, report_id: Option<u64>) -> bool {
        if self.selected_report == report_id {
            return false;
        }
        self.selected_report = report_id;
        true
    }

    /// Drops everything that depends on the host selection.
    pub(crate) fn reset_reports(&mut self) {
        self.reports.clear();
        self.selected_report = None;
        self.reset_checks();
    }

    /// Drops everything that depends on the report selection.
    pub(crate) fn reset_checks(&mut self) {
        self.checks.clear();
        self.report_info = None;
        self.loading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CheckStatus, Severity};

    fn state() -> DashboardState {
        DashboardState {
            hosts: vec![
                Host {
                    host_id: "a".to_string(),
                    hostname: "alpha".to_string(),
                },
                Host {
                    host_id: "b".to_string(),
                    hostname: "beta".to_string(),
                },
            ],
            selected_host: Some("b".to_string()),
            reports: vec![ReportMeta {
                id: 9,
                created_at: "2024-01-02".to_string(),
                ts_utc: None,
            }],
            selected_report: Some(9),
            checks: vec![CheckResult {
                check_id: "1.1".to_string(),
                title: String::new(),
                status: CheckStatus::Pass,
                severity: Severity::Low,
                evidence: String::new(),
            }],
            report_info: Some(ReportInfo::default()),
            loading: true,
            error: None,
        }
    }

    #[test]
    fn lookups_follow_selected_identities() {
        let s = state();
        assert_eq!(s.selected_host().map(|h| h.hostname.as_str()), Some("beta"));
        assert_eq!(s.host_index(), Some(1));
        assert_eq!(s.selected_report().map(|r| r.id), Some(9));
        assert_eq!(s.report_index(), Some(0));
    }

    #[test]
    fn setting_same_identity_is_not_a_change() {
        let mut s = state();
        assert!(!s.set_host(Some("b".to_string())));
        assert!(s.set_host(Some("a".to_string())));
        assert!(!s.set_report(Some(9)));
        assert!(s.set_report(None));
    }

    #[test]
    fn reset_reports_clears_downstream() {
        let mut s = state();
        s.reset_reports();
        assert!(s.reports.is_empty());
        assert_eq!(s.selected_report, None);
        assert!(s.checks.is_empty());
        assert!(s.report_info.is_none());
        assert!(!s.loading);
        assert_eq!(s.hosts.len(), 2);
        assert_eq!(s.selected_host.as_deref(), Some("b"));
    }
}
