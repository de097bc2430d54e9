//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::client_auth::{ClientAuthenticationMethod, RevocationPolicy};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    pub env_files: Vec<String>,
    /// Trust anchors for `tls_client_auth`
    pub trust: TrustConfig,
    /// Revocation checking. Absent means disabled.
    pub revocation: Option<RevocationConfig>,
    /// Lookup time budgets
    pub timeouts: TimeoutConfig,
    /// Registered mTLS clients
    pub clients: Vec<ClientConfig>,
}

/// Trust anchor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// PEM files holding CA certificates. Each file may be a bundle.
    pub ca_certificates: Vec<String>,
}

/// Revocation configuration.
///
/// `policy` has no default: enabling revocation requires choosing between
/// `fail_closed` and `fail_open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevocationConfig {
    /// Behaviour when revocation status is unknown
    pub policy: RevocationPolicy,
    /// PEM files holding CRLs
    #[serde(default)]
    pub crls: Vec<String>,
    /// Only check the leaf certificate against CRLs
    #[serde(default)]
    pub only_end_entity: bool,
}

/// Time budgets for the external lookups of an authentication attempt.
/// Exceeding one fails the attempt with `invalid_client`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Client registry lookup
    #[serde(with = "humantime_serde")]
    pub registry: Duration,
    /// Trust anchor lookup
    #[serde(with = "humantime_serde")]
    pub trust_store: Duration,
    /// Online revocation check
    #[serde(with = "humantime_serde")]
    pub revocation: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            registry: Duration::from_secs(2),
            trust_store: Duration::from_secs(2),
            revocation: Duration::from_secs(5),
        }
    }
}

/// A registered client, using RFC 8705 §2.1.2 client metadata names.
///
/// Exactly one of `tls_client_auth_subject_dn`, the `tls_client_auth_san_*`
/// members or `self_signed_certificates` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// OAuth2 client identifier
    pub client_id: String,
    /// Declared method; checked against the trust material when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<ClientAuthenticationMethod>,
    /// Expected subject DN (RFC 4514), `*` values are wildcards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client_auth_subject_dn: Option<String>,
    /// Expected dNSName SAN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client_auth_san_dns: Option<String>,
    /// Expected uniformResourceIdentifier SAN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client_auth_san_uri: Option<String>,
    /// Expected iPAddress SAN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client_auth_san_ip: Option<std::net::IpAddr>,
    /// Expected rfc822Name SAN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client_auth_san_email: Option<String>,
    /// Pinned self-signed certificates: PEM file paths or inline PEM
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub self_signed_certificates: Vec<String>,
    /// Embed the `cnf` thumbprint in access tokens issued to this client
    #[serde(default)]
    pub tls_client_certificate_bound_access_tokens: bool,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (MTLS_AUTH_ prefix)
        figment = figment.merge(Env::prefixed("MTLS_AUTH_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in file paths
        config.expand_env_vars()?;

        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialization cannot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a zero timeout, a revocation section
    /// without CRLs, or a blank `client_id`.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("registry", self.timeouts.registry),
            ("trust_store", self.timeouts.trust_store),
            ("revocation", self.timeouts.revocation),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(Error::Config(format!("timeouts.{name} must be non-zero")));
            }
        }
        if let Some(ref revocation) = self.revocation
            && revocation.crls.is_empty()
        {
            return Err(Error::Config(
                "revocation.crls must list at least one CRL file when revocation is enabled"
                    .into(),
            ));
        }
        if self.clients.iter().any(|c| c.client_id.trim().is_empty()) {
            return Err(Error::Config("client entry has an empty client_id".into()));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in file paths
    fn expand_env_vars(&mut self) -> Result<()> {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(format!("env pattern: {e}")))?;

        for path in &mut self.trust.ca_certificates {
            *path = Self::expand_string(&re, path);
        }
        if let Some(ref mut revocation) = self.revocation {
            for path in &mut revocation.crls {
                *path = Self::expand_string(&re, path);
            }
        }
        for client in &mut self.clients {
            for source in &mut client.self_signed_certificates {
                *source = Self::expand_string(&re, source);
            }
        }
        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Human-readable `Duration` serde ("250ms", "2s", "1m")
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string (e.g., "2s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();

        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
