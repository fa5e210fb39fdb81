//! The envelope shipped to the collection endpoint.

use crate::capture::{CapturedRequest, CapturedResponse};
use crate::collector::ErrorRecord;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// SDK name reported when none is configured.
pub const SDK_NAME: &str = "rust";

/// SDK version reported when none is configured.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

const SIGNATURE: &str = "Treblle Rust SDK";
const DEFAULT_SERVER_IP: &str = "127.0.0.1";
const DEFAULT_PROTOCOL: &str = "HTTP/1.1";

/// One unit of telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub api_key: String,
    pub project_id: String,
    pub version: String,
    pub sdk: String,
    pub data: PayloadData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadData {
    pub server: ServerInfo,
    pub language: LanguageInfo,
    pub request: CapturedRequest,
    pub response: CapturedResponse,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub ip: String,
    pub timezone: String,
    pub software: String,
    pub signature: String,
    pub protocol: String,
    pub os: OsInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub release: String,
    pub architecture: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub version: String,
}

impl ServerInfo {
    /// Inspect the host. `ip_list` is a comma-separated list of candidate
    /// addresses; the first IPv4 one wins.
    pub fn detect(ip_list: Option<&str>) -> Self {
        Self {
            ip: select_first_valid_ipv4(ip_list.unwrap_or_default()),
            timezone: timezone_offset(),
            software: format!("rust/{}", language_version()),
            signature: SIGNATURE.to_string(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            os: OsInfo::detect(),
        }
    }
}

impl OsInfo {
    pub fn detect() -> Self {
        let release = if cfg!(target_os = "linux") {
            sysinfo::System::kernel_version()
        } else {
            sysinfo::System::os_version()
        };
        Self {
            name: std::env::consts::OS.to_string(),
            release: release.unwrap_or_else(|| "unknown".to_string()),
            architecture: std::env::consts::ARCH.to_string(),
        }
    }
}

impl LanguageInfo {
    pub fn detect() -> Self {
        Self {
            name: "rust".to_string(),
            version: language_version().to_string(),
        }
    }
}

fn language_version() -> &'static str {
    match option_env!("CARGO_PKG_RUST_VERSION") {
        Some(v) if !v.is_empty() => v,
        _ => "unknown",
    }
}

/// Local UTC offset in whole hours, e.g. `UTC+2`.
fn timezone_offset() -> String {
    let seconds = chrono::Local::now().offset().local_minus_utc();
    format!("UTC{:+}", seconds / 3600)
}

/// First valid IPv4 address of a comma-separated list. Falls back to the
/// first entry when none is IPv4, and to `127.0.0.1` when the list is empty.
pub fn select_first_valid_ipv4(list: &str) -> String {
    let candidates: Vec<&str> = list
        .split(',')
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .collect();
    candidates
        .iter()
        .find(|ip| ip.parse::<Ipv4Addr>().is_ok())
        .or_else(|| candidates.first())
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| DEFAULT_SERVER_IP.to_string())
}

/// Assembles payloads from captured data. Host details are detected once.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    api_key: String,
    project_id: String,
    sdk_name: String,
    sdk_version: String,
    server: ServerInfo,
    language: LanguageInfo,
}

impl PayloadBuilder {
    pub fn new(
        api_key: impl Into<String>,
        project_id: impl Into<String>,
        sdk_name: impl Into<String>,
        sdk_version: impl Into<String>,
        server: ServerInfo,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            project_id: project_id.into(),
            sdk_name: sdk_name.into(),
            sdk_version: sdk_version.into(),
            server,
            language: LanguageInfo::detect(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    /// Payload for one request/response pair.
    pub fn build(&self, request: CapturedRequest, response: CapturedResponse) -> Payload {
        let mut server = self.server.clone();
        if !request.protocol.is_empty() {
            server.protocol = request.protocol.clone();
        }
        self.envelope(server, request, response, Vec::new())
    }

    /// Payload carrying a batch of application errors and no traffic.
    pub fn build_errors(&self, errors: Vec<ErrorRecord>) -> Payload {
        self.envelope(
            self.server.clone(),
            CapturedRequest::default(),
            CapturedResponse::default(),
            errors,
        )
    }

    fn envelope(
        &self,
        server: ServerInfo,
        request: CapturedRequest,
        response: CapturedResponse,
        errors: Vec<ErrorRecord>,
    ) -> Payload {
        Payload {
            api_key: self.api_key.clone(),
            project_id: self.project_id.clone(),
            version: self.sdk_version.clone(),
            sdk: self.sdk_name.clone(),
            data: PayloadData {
                server,
                language: self.language.clone(),
                request,
                response,
                errors,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ErrorKind;

    fn builder() -> PayloadBuilder {
        PayloadBuilder::new("key", "proj", SDK_NAME, SDK_VERSION, ServerInfo::detect(None))
    }

    #[test]
    fn test_select_first_valid_ipv4() {
        assert_eq!(select_first_valid_ipv4(""), "127.0.0.1");
        assert_eq!(select_first_valid_ipv4("::1, 10.1.2.3"), "10.1.2.3");
        assert_eq!(select_first_valid_ipv4("::1, fe80::1"), "::1");
        assert_eq!(select_first_valid_ipv4(" 192.168.0.4 "), "192.168.0.4");
    }

    #[test]
    fn test_server_info_defaults() {
        let server = ServerInfo::detect(None);
        assert_eq!(server.ip, "127.0.0.1");
        assert_eq!(server.signature, "Treblle Rust SDK");
        assert!(server.timezone.starts_with("UTC"));
        assert_eq!(server.os.name, std::env::consts::OS);
        assert!(!server.os.release.is_empty());
    }

    #[test]
    fn test_build_uses_request_protocol() {
        let request = CapturedRequest {
            protocol: "HTTP/2.0".into(),
            ..Default::default()
        };
        let payload = builder().build(request, CapturedResponse::default());
        assert_eq!(payload.data.server.protocol, "HTTP/2.0");
        assert_eq!(payload.api_key, "key");
        assert_eq!(payload.sdk, "rust");
    }

    #[test]
    fn test_wire_field_names() {
        let payload = builder().build(CapturedRequest::default(), CapturedResponse::default());
        let json = serde_json::to_value(&payload).unwrap();
        for key in ["api_key", "project_id", "version", "sdk", "data"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        for key in ["server", "language", "request", "response"] {
            assert!(json["data"].get(key).is_some(), "missing data.{key}");
        }
        assert!(json["data"].get("errors").is_none());
        assert_eq!(json["data"]["language"]["name"], "rust");
    }

    #[test]
    fn test_build_errors() {
        let record = crate::collector::ErrorRecord::new("boom", ErrorKind::ServerError, "jobs");
        let payload = builder().build_errors(vec![record]);
        assert_eq!(payload.data.errors.len(), 1);
        assert_eq!(payload.data.request, CapturedRequest::default());

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["data"]["errors"][0]["type"], "SERVER_ERROR");
    }
}
