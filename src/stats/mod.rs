use serde::Serialize;

use crate::core::{CheckResult, CheckStatus, Severity};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
    pub total: usize,
    pub score: u8,
}

impl Statistics {
    pub fn count(&self, status: CheckStatus) -> usize {
        match status {
            CheckStatus::Pass => self.pass,
            CheckStatus::Fail => self.fail,
            CheckStatus::Error => self.error,
        }
    }
}

pub fn summarize(checks: &[CheckResult]) -> Statistics {
    let mut stats = Statistics {
        total: checks.len(),
        ..Statistics::default()
    };
    for check in checks {
        match check.status {
            CheckStatus::Pass => stats.pass += 1,
            CheckStatus::Fail => stats.fail += 1,
            CheckStatus::Error => stats.error += 1,
        }
    }
    stats.score = score(stats.pass, stats.total);
    stats
}

/// `round(100 * pass / max(total, 1))`, rounding halves up.
pub fn score(pass: usize, total: usize) -> u8 {
    let denom = total.max(1) as u64;
    let pass = (pass as u64).min(denom);
    ((200 * pass + denom) / (2 * denom)) as u8
}

pub fn failing_by_severity(checks: &[CheckResult]) -> [(Severity, usize); 3] {
    Severity::ALL.map(|severity| {
        let n = checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail && c.severity == severity)
            .count();
        (severity, n)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(id: &str, status: CheckStatus, severity: Severity) -> CheckResult {
        CheckResult {
            check_id: id.to_string(),
            title: id.to_string(),
            status,
            severity,
            evidence: String::new(),
        }
    }

    #[test]
    fn empty_list_scores_zero() {
        assert_eq!(
            summarize(&[]),
            Statistics {
                pass: 0,
                fail: 0,
                error: 0,
                total: 0,
                score: 0,
            }
        );
    }

    #[test]
    fn counts_each_status() {
        let checks = vec![
            check("1.1", CheckStatus::Pass, Severity::Low),
            check("1.2", CheckStatus::Fail, Severity::High),
            check("1.3", CheckStatus::Error, Severity::Medium),
            check("1.4", CheckStatus::Pass, Severity::High),
        ];
        let stats = summarize(&checks);
        assert_eq!(stats.pass, 2);
        assert_eq!(stats.fail, 1);
        assert_eq!(stats.error, 1);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.score, 50);
        assert_eq!(stats.count(CheckStatus::Error), 1);
    }

    #[test]
    fn score_rounds_half_up() {
        assert_eq!(score(1, 3), 33);
        assert_eq!(score(2, 3), 67);
        assert_eq!(score(1, 8), 13);
        assert_eq!(score(1, 200), 1);
        assert_eq!(score(0, 7), 0);
        assert_eq!(score(7, 7), 100);
    }

    #[test]
    fn totals_add_up_for_mixed_lists() {
        let statuses = [CheckStatus::Pass, CheckStatus::Fail, CheckStatus::Error];
        for len in 1..40usize {
            let checks: Vec<CheckResult> = (0..len)
                .map(|i| check(&format!("c{i}"), statuses[(i * 7 + len) % 3], Severity::Low))
                .collect();
            let stats = summarize(&checks);
            assert_eq!(stats.pass + stats.fail + stats.error, stats.total);
            assert!(stats.score <= 100);
            let expected = ((100.0 * stats.pass as f64) / stats.total as f64).round() as u8;
            assert_eq!(stats.score, expected, "len={len}");
        }
    }

    #[test]
    fn failing_by_severity_ignores_non_failures() {
        let checks = vec![
            check("a", CheckStatus::Fail, Severity::High),
            check("b", CheckStatus::Fail, Severity::High),
            check("c", CheckStatus::Pass, Severity::High),
            check("d", CheckStatus::Fail, Severity::Low),
            check("e", CheckStatus::Error, Severity::Medium),
        ];
        assert_eq!(
            failing_by_severity(&checks),
            [(Severity::High, 2), (Severity::Medium, 0), (Severity::Low, 1)]
        );
    }
}
