use serde::{Deserialize, Serialize};

use crate::core::null_as_empty;

const UNKNOWN_HOSTNAME: &str = "unknown-host";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub host_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub hostname: String,
}

impl Host {
    pub fn display_name(&self) -> &str {
        let name = self.hostname.trim();
        if name.is_empty() { UNKNOWN_HOSTNAME } else { name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_when_hostname_is_empty() {
        let host = Host {
            host_id: "h1".to_string(),
            hostname: "  ".to_string(),
        };
        assert_eq!(host.display_name(), "unknown-host");
    }

    #[test]
    fn missing_hostname_decodes_as_empty() {
        let host: Host = serde_json::from_str(r#"{"host_id":"h1"}"#).expect("decode host");
        assert_eq!(host.hostname, "");
        assert_eq!(host.display_name(), "unknown-host");
    }

    #[test]
    fn null_hostname_decodes_as_empty() {
        let hosts: Vec<Host> = serde_json::from_str(
            r#"[{"host_id":"h1","hostname":"web1"},{"host_id":"h2","hostname":null}]"#,
        )
        .expect("decode hosts");
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[1].hostname, "");
        assert_eq!(hosts[1].display_name(), "unknown-host");
    }
}
