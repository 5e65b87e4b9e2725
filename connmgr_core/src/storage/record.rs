use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-named connection entry.
///
/// On disk it is one value in the config map, e.g.
/// `{ "name":"gpu1", "host":"10.0.0.5", "port":22, "last_modified":"..." }`.
/// Fields written by older or richer versions of the tool (`type`,
/// `auth_method`, ...) land in `extra` and are written back untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ConnectionRecord {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            last_modified: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Names are used as file-name stems and registry keys, so they are
    /// restricted to non-empty ASCII alphanumerics.
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
    }
}
