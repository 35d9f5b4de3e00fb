use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::null_as_empty;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    Error,
}

impl CheckStatus {
    pub const ALL: [CheckStatus; 3] = [CheckStatus::Pass, CheckStatus::Fail, CheckStatus::Error];

    pub const fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PASS" => Ok(CheckStatus::Pass),
            "FAIL" => Ok(CheckStatus::Fail),
            "ERROR" => Ok(CheckStatus::Error),
            _ => Err(format!(
                "ステータスが不正です: {s}（PASS|FAIL|ERROR を指定してください）"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::High, Severity::Medium, Severity::Low];

    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compliance rule evaluation as reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    pub status: CheckStatus,
    pub severity: Severity,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub evidence: String,
}

impl CheckResult {
    /// Case-insensitive substring match over id, title and evidence. An empty
    /// query matches everything.
    pub fn matches_text(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }
        let query = query.to_lowercase();
        [&self.check_id, &self.title, &self.evidence]
            .iter()
            .any(|field| field.to_lowercase().contains(&query))
    }
}
