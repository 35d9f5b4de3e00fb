use crate::core::{CheckResult, null_as_empty};
use serde::{Deserialize, Serialize};

/// One historical scan summary, as listed by `GET /reports/{host_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMeta {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_utc: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub checks: Vec<CheckResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMeta {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub version: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub build: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub schema_version: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ts_utc: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFacts {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub host_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub hostname: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub os: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub os_version: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub kernel: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub version: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub arch: String,
}

/// Metadata that accompanies a report payload: where and by what it was produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportInfo {
    pub id: Option<u64>,
    pub host_id: Option<String>,
    pub hostname: Option<String>,
    pub ts_utc: Option<String>,
    pub created_at: Option<String>,
    pub agent: Option<AgentMeta>,
    pub host: Option<HostFacts>,
    pub packages: Vec<PackageInfo>,
}

/// Full `GET /report/{id}` response, split into metadata and checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub info: ReportInfo,
    pub payload: ReportPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_text_fields_decode_as_empty() {
        let reports: Vec<ReportMeta> = serde_json::from_str(
            r#"[{"id":2,"created_at":"2024-05-02"},{"id":1,"created_at":null,"ts_utc":null}]"#,
        )
        .expect("decode reports");
        assert_eq!(reports[1].created_at, "");
        assert_eq!(reports[1].ts_utc, None);

        let facts: HostFacts =
            serde_json::from_str(r#"{"os":"Ubuntu","kernel":null,"ip":null}"#).expect("decode facts");
        assert_eq!(facts.os, "Ubuntu");
        assert_eq!(facts.kernel, "");
    }
}
