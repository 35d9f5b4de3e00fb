mod check;
mod host;
mod report;

pub use check::{CheckResult, CheckStatus, Severity};
pub use host::Host;
pub use report::{
    AgentMeta, HostFacts, PackageInfo, ReportDocument, ReportInfo, ReportMeta, ReportPayload,
};

// Agents and the backend send `null` for unknown text as often as they omit it.
pub(crate) fn null_as_empty<'de, D>(de: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}
