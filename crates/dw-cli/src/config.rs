//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use dw_cluster::{Client, ClusterError};
use dw_core::{AllowanceSpec, DEFAULT_KNOWN_NAMESPACES, DEFAULT_THRESHOLD, EvaluatorConfig};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Repeat counts above this are pathological.
    pub threshold: i64,
    /// Namespaces that get their own verdict.
    pub known_namespaces: Vec<String>,
    /// Kubernetes API server of the cluster under test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<String>,
    /// Bearer token for the API server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    /// Tolerate etcd guard probe failures in proportion to the etcd revision.
    #[serde(default)]
    pub etcd_revision_allowance: bool,
    /// Known repeating events that are tolerated.
    #[serde(default)]
    pub allowances: Vec<AllowanceSpec>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("threshold", &self.threshold)
            .field("known_namespaces", &self.known_namespaces.len())
            .field("api_server", &self.api_server)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("etcd_revision_allowance", &self.etcd_revision_allowance)
            .field("allowances", &self.allowances.len())
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            known_namespaces: DEFAULT_KNOWN_NAMESPACES
                .iter()
                .map(ToString::to_string)
                .collect(),
            api_server: None,
            token: None,
            insecure_skip_tls_verify: false,
            etcd_revision_allowance: false,
            allowances: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (DW_*)
        figment = figment.merge(Env::prefixed("DW_"));

        figment.extract()
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            threshold: self.threshold,
            known_namespaces: self.known_namespaces.iter().cloned().collect(),
        }
    }

    /// Builds a client for the configured API server, if there is one.
    pub fn cluster_client(&self) -> Result<Option<Client>, ClusterError> {
        self.api_server
            .as_deref()
            .filter(|server| !server.trim().is_empty())
            .map(|server| Client::new(server, self.token.clone(), self.insecure_skip_tls_verify))
            .transpose()
    }
}

/// Returns the platform-specific config directory for dw.
///
/// On Linux: `~/.config/dw`
pub fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("dw"))
}
