//! Configuration for signing, time stamping and trust-list maintenance.
//!
//! Everything deserializes from TOML:
//!
//! ```toml
//! [timestamp]
//! url = "https://freetsa.org/tsr"
//! required = false
//!
//! [trust]
//! lists = ["eutl12", "tl12"]
//! update_frequency_days = 7
//! store_path = "/var/lib/pdf-seal/trust.json"
//!
//! [signature]
//! digest_algorithm = "sha256"
//! sub_filter = "ETSI.CAdES.detached"
//! ```

use crate::error::{Error, Result};
use crate::signatures::{DigestAlgorithm, SignatureSubFilter, TimestampAuthority};
use crate::trust::PROTECTED_TRUST_LIST;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Feed URL of the EU trusted list distributed by Adobe.
pub const EUTL12_FEED_URL: &str = "https://trustlist.adobe.com/eutl12.acrobatsecuritysettings";

/// Feed URL of the Adobe Approved Trust List.
pub const TL12_FEED_URL: &str = "https://trustlist.adobe.com/tl12.acrobatsecuritysettings";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    /// Time-stamp authority; signing is not time-stamped when absent
    pub timestamp: Option<TimestampConfig>,
    /// Trust store and list refresh
    pub trust: TrustConfig,
    /// Defaults applied to new signatures
    pub signature: SignatureDefaults,
}

impl SealConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Set the time-stamp authority.
    pub fn with_timestamp(mut self, timestamp: TimestampConfig) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the trust configuration.
    pub fn with_trust(mut self, trust: TrustConfig) -> Self {
        self.trust = trust;
        self
    }

    /// Set the signature defaults.
    pub fn with_signature_defaults(mut self, signature: SignatureDefaults) -> Self {
        self.signature = signature;
        self
    }
}

/// RFC 3161 authority settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampConfig {
    /// Endpoint URL
    pub url: String,
    /// Basic auth user
    #[serde(default)]
    pub username: Option<String>,
    /// Basic auth password
    #[serde(default)]
    pub password: Option<String>,
    /// Requested policy OID
    #[serde(default)]
    pub policy_oid: Option<String>,
    /// Network deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Fail signing when the TSA cannot be reached
    #[serde(default)]
    pub required: bool,
}

fn default_timeout_secs() -> u64 {
    10
}

impl std::fmt::Debug for TimestampConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("policy_oid", &self.policy_oid)
            .field("timeout_secs", &self.timeout_secs)
            .field("required", &self.required)
            .finish()
    }
}

impl TimestampConfig {
    /// Optional TSA at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            policy_oid: None,
            timeout_secs: default_timeout_secs(),
            required: false,
        }
    }

    /// Make the timestamp mandatory.
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Authority description used by the signer.
    pub fn to_authority(&self) -> TimestampAuthority {
        let mut tsa = TimestampAuthority::new(self.url.clone())
            .required(self.required)
            .with_timeout(Duration::from_secs(self.timeout_secs));
        if let Some(user) = &self.username {
            tsa = tsa.with_credentials(user.clone(), self.password.clone().unwrap_or_default());
        }
        if let Some(oid) = &self.policy_oid {
            tsa = tsa.with_policy(oid.clone());
        }
        tsa
    }
}

/// Trust store location and refresh schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Feed names refreshed by the updater
    pub lists: Vec<String>,
    /// Minimum age of the oldest row before a refresh downloads again
    pub update_frequency_days: u32,
    /// List never removed by a clear
    pub protected_list: String,
    /// JSON file backing the store; in-memory when absent
    pub store_path: Option<PathBuf>,
    /// Feed name to download URL
    pub feeds: BTreeMap<String, String>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        let mut feeds = BTreeMap::new();
        feeds.insert("eutl12".to_string(), EUTL12_FEED_URL.to_string());
        feeds.insert("tl12".to_string(), TL12_FEED_URL.to_string());
        Self {
            lists: vec!["eutl12".to_string(), "tl12".to_string()],
            update_frequency_days: 7,
            protected_list: PROTECTED_TRUST_LIST.to_string(),
            store_path: None,
            feeds,
        }
    }
}

impl TrustConfig {
    /// Refresh only these lists.
    pub fn with_lists(mut self, lists: Vec<String>) -> Self {
        self.lists = lists;
        self
    }

    /// Persist the store at `path`.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Refresh period in days.
    pub fn with_update_frequency_days(mut self, days: u32) -> Self {
        self.update_frequency_days = days;
        self
    }

    /// Add or override a feed.
    pub fn with_feed(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.feeds.insert(name.into(), url.into());
        self
    }

    /// Refresh period.
    pub fn update_frequency(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.update_frequency_days))
    }
}

/// Defaults for new signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureDefaults {
    /// Digest algorithm
    pub digest_algorithm: DigestAlgorithm,
    /// Signature format
    pub sub_filter: SignatureSubFilter,
    /// Reserved CMS size in bytes; estimated when absent
    pub contents_size: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SealConfig::new();
        assert!(config.timestamp.is_none());
        assert_eq!(config.trust.update_frequency_days, 7);
        assert_eq!(config.trust.protected_list, PROTECTED_TRUST_LIST);
        assert_eq!(config.trust.feeds.get("tl12").map(String::as_str), Some(TL12_FEED_URL));
    }

    #[test]
    fn test_from_toml() {
        let config = SealConfig::from_toml_str(
            r#"
            [timestamp]
            url = "http://tsa.example/"
            username = "alice"
            password = "secret"
            required = true

            [trust]
            lists = ["tl12"]
            update_frequency_days = 3

            [signature]
            digest_algorithm = "sha384"
            sub_filter = "ETSI.CAdES.detached"
            "#,
        )
        .unwrap();

        let tsa = config.timestamp.as_ref().unwrap().to_authority();
        assert!(tsa.required);
        assert_eq!(tsa.timeout, Duration::from_secs(10));
        assert_eq!(tsa.credentials.unwrap().username, "alice");
        assert_eq!(config.trust.lists, vec!["tl12".to_string()]);
        assert_eq!(config.trust.feeds.len(), 2);
        assert_eq!(config.signature.digest_algorithm, DigestAlgorithm::Sha384);
        assert_eq!(config.signature.sub_filter, SignatureSubFilter::CadesDetached);
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(SealConfig::from_toml_str("trust = 3"), Err(Error::Config(_))));
    }
}
