//! Service configuration
//!
//! Configuration for update serving: which download domains are allowed
//! and which hosts honor forced downloads.

use serde::{Deserialize, Serialize};

/// Update-service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AusConfig {
    /// Domains update URLs may point at (default: empty, everything
    /// forbidden)
    #[serde(default = "default_whitelisted_domains")]
    pub whitelisted_domains: Vec<String>,

    /// URL prefixes that honor a `force=1` query argument (default: empty)
    #[serde(default = "default_special_force_hosts")]
    pub special_force_hosts: Vec<String>,
}

fn default_whitelisted_domains() -> Vec<String> {
    Vec::new()
}

fn default_special_force_hosts() -> Vec<String> {
    Vec::new()
}

impl Default for AusConfig {
    fn default() -> Self {
        Self {
            whitelisted_domains: default_whitelisted_domains(),
            special_force_hosts: default_special_force_hosts(),
        }
    }
}

impl AusConfig {
    /// Parse a config from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
