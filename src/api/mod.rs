use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::{
    AgentMeta, CheckResult, Host, HostFacts, PackageInfo, ReportDocument, ReportInfo, ReportMeta,
    ReportPayload,
};

pub const DEFAULT_REPORT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Hosts,
    Reports,
    Report,
    Health,
}

impl Endpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Endpoint::Hosts => "ホスト一覧",
            Endpoint::Reports => "レポート一覧",
            Endpoint::Report => "レポート",
            Endpoint::Health => "ヘルスチェック",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("{endpoint}の取得に失敗しました（通信エラー）: {message}")]
    Network { endpoint: Endpoint, message: String },
    #[error("{endpoint}の取得に失敗しました（HTTP {status}）")]
    HttpStatus { endpoint: Endpoint, status: u16 },
    #[error("{endpoint}の応答を解析できませんでした: {message}")]
    Decode { endpoint: Endpoint, message: String },
    #[error("{endpoint}のリクエストが不正です: {message}")]
    InvalidRequest { endpoint: Endpoint, message: String },
}

impl ApiError {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            ApiError::Network { endpoint, .. }
            | ApiError::HttpStatus { endpoint, .. }
            | ApiError::Decode { endpoint, .. }
            | ApiError::InvalidRequest { endpoint, .. } => *endpoint,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default, deserialize_with = "crate::core::null_as_empty")]
    pub time: String,
}

#[async_trait]
pub trait ComplianceApi: Send + Sync {
    async fn list_hosts(&self) -> Result<Vec<Host>, ApiError>;

    async fn list_reports(&self, host_id: &str, limit: usize)
    -> Result<Vec<ReportMeta>, ApiError>;

    async fn get_report(&self, report_id: u64) -> Result<ReportDocument, ApiError>;

    async fn get_report_payload(&self, report_id: u64) -> Result<ReportPayload, ApiError> {
        self.get_report(report_id).await.map(|doc| doc.payload)
    }

    async fn health(&self) -> Result<HealthStatus, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(opts: ClientOptions) -> Result<Self> {
        let base_url = parse_base_url(&opts.base_url)?;
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("cisdash/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = opts.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("HTTP クライアントの初期化に失敗しました")?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    fn endpoint_url(&self, endpoint: Endpoint, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidRequest {
                endpoint,
                message: format!("ベースURLにパスを追加できません: {}", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: Endpoint, url: Url) -> Result<T, ApiError> {
        let started = Instant::now();
        let response = self.http.get(url.clone()).send().await.map_err(|e| {
            tracing::debug!(%url, error = %e, "backend request failed");
            ApiError::Network {
                endpoint,
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        tracing::debug!(
            %url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "backend request"
        );
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                endpoint,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| ApiError::Network {
            endpoint,
            message: e.to_string(),
        })?;
        decode(endpoint, &body)
    }
}

#[async_trait]
impl ComplianceApi for HttpClient {
    async fn list_hosts(&self) -> Result<Vec<Host>, ApiError> {
        let url = self.endpoint_url(Endpoint::Hosts, &["hosts"])?;
        self.get_json(Endpoint::Hosts, url).await
    }

    async fn list_reports(
        &self,
        host_id: &str,
        limit: usize,
    ) -> Result<Vec<ReportMeta>, ApiError> {
        validate_reports_request(host_id, limit)?;
        let mut url = self.endpoint_url(Endpoint::Reports, &["reports", host_id])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.get_json(Endpoint::Reports, url).await
    }

    async fn get_report(&self, report_id: u64) -> Result<ReportDocument, ApiError> {
        validate_report_id(report_id)?;
        let id = report_id.to_string();
        let url = self.endpoint_url(Endpoint::Report, &["report", &id])?;
        let envelope: ReportEnvelope = self.get_json(Endpoint::Report, url).await?;
        Ok(envelope.into_document())
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        let url = self.endpoint_url(Endpoint::Health, &["health"])?;
        self.get_json(Endpoint::Health, url).await
    }
}

pub fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        anyhow::bail!("バックエンドのURLが空です");
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        anyhow::bail!("バックエンドのURLは http:// または https:// で始めてください: {trimmed}");
    }
    let url = Url::parse(trimmed)
        .with_context(|| format!("バックエンドのURLが不正です: {trimmed}"))?;
    if url.cannot_be_a_base() {
        anyhow::bail!("バックエンドのURLが不正です: {trimmed}");
    }
    Ok(url)
}

pub fn validate_reports_request(host_id: &str, limit: usize) -> Result<(), ApiError> {
    if host_id.trim().is_empty() {
        return Err(ApiError::InvalidRequest {
            endpoint: Endpoint::Reports,
            message: "host_id は空にできません".to_string(),
        });
    }
    if limit == 0 {
        return Err(ApiError::InvalidRequest {
            endpoint: Endpoint::Reports,
            message: "limit は 1 以上で指定してください".to_string(),
        });
    }
    Ok(())
}

pub fn validate_report_id(report_id: u64) -> Result<(), ApiError> {
    if report_id == 0 {
        return Err(ApiError::InvalidRequest {
            endpoint: Endpoint::Report,
            message: "report_id は正の整数で指定してください".to_string(),
        });
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(endpoint: Endpoint, body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::Decode {
        endpoint,
        message: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct ReportEnvelope {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    host_id: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    ts_utc: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    payload: Option<WirePayload>,
}

// Agents may emit `null` for empty slices, hence `Option<Vec<_>>`.
#[derive(Debug, Default, Deserialize)]
struct WirePayload {
    #[serde(default)]
    agent: Option<AgentMeta>,
    #[serde(default)]
    host: Option<HostFacts>,
    #[serde(default)]
    packages: Option<Vec<PackageInfo>>,
    #[serde(default)]
    cis_results: Option<Vec<CheckResult>>,
}

impl ReportEnvelope {
    fn into_document(self) -> ReportDocument {
        let payload = self.payload.unwrap_or_default();
        ReportDocument {
            info: ReportInfo {
                id: self.id,
                host_id: self.host_id,
                hostname: self.hostname,
                ts_utc: self.ts_utc,
                created_at: self.created_at,
                agent: payload.agent,
                host: payload.host,
                packages: payload.packages.unwrap_or_default(),
            },
            payload: ReportPayload {
                checks: payload.cis_results.unwrap_or_default(),
            },
        }
    }
}
