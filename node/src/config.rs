use crate::error::NodeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use veriscore_core::lists::parse_hotkey_list;
use veriscore_core::{CallPolicy, CollaboratorPolicies, DomainLists, ScoringConfig, SubmitterConfig};

pub const DEFAULT_DASHBOARD_PORT: u16 = 8080;
pub const DEFAULT_ROUND_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SUBMIT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MIN_SUBMIT_INTERVAL_SECS: u64 = 1200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub lists: ListsSection,
    #[serde(default)]
    pub collaborators: CollaboratorsSection,
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub dashboard: DashboardSection,
    #[serde(default)]
    pub metrics: MetricsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,
    #[serde(default = "default_round_interval")]
    pub round_interval_secs: u64,
    #[serde(default)]
    pub validator_uid: Option<u16>,
    #[serde(default = "default_true")]
    pub keep_reports: bool,
}

fn default_data_dir() -> String {
    "/var/lib/veriscore".to_string()
}
fn default_spool_dir() -> String {
    "/var/lib/veriscore/rounds".to_string()
}
fn default_round_interval() -> u64 {
    DEFAULT_ROUND_INTERVAL_SECS
}
fn default_true() -> bool {
    true
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            spool_dir: default_spool_dir(),
            round_interval_secs: default_round_interval(),
            validator_uid: None,
            keep_reports: default_true(),
        }
    }
}

/// Curated lists. Entries from `file` (JSON, re-read every round) are merged
/// with the inline ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListsSection {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub approved: Vec<String>,
    #[serde(default)]
    pub search_engines: Vec<String>,
    #[serde(default)]
    pub banned_hotkeys: Vec<String>,
}

/// Comma separated hotkeys banned on top of the configured lists.
pub const BANNED_HOTKEYS_ENV: &str = "VERISCORE_BANNED_HOTKEYS";

impl ListsSection {
    pub fn load(&self) -> Result<DomainLists, NodeError> {
        self.load_with(std::env::var(BANNED_HOTKEYS_ENV).ok().as_deref())
    }

    fn load_with(&self, banned_from_env: Option<&str>) -> Result<DomainLists, NodeError> {
        let mut lists = DomainLists {
            blacklist: self.blacklist.clone(),
            approved: self.approved.clone(),
            search_engines: self.search_engines.clone(),
            banned_hotkeys: self.banned_hotkeys.clone(),
        };

        if let Some(file) = &self.file {
            let content = fs::read_to_string(file)
                .map_err(|e| NodeError::Config(format!("Failed to read lists file {}: {}", file, e)))?;
            let from_file: DomainLists = serde_json::from_str(&content)
                .map_err(|e| NodeError::Config(format!("Failed to parse lists file {}: {}", file, e)))?;

            lists.blacklist.extend(from_file.blacklist);
            lists.approved.extend(from_file.approved);
            lists.search_engines.extend(from_file.search_engines);
            lists.banned_hotkeys.extend(from_file.banned_hotkeys);
        }

        if let Some(raw) = banned_from_env {
            lists.banned_hotkeys.extend(parse_hotkey_list(raw));
        }

        Ok(lists)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorsSection {
    #[serde(default = "default_classifier_url")]
    pub classifier_url: String,
    #[serde(default = "default_detector_url")]
    pub detector_url: String,
    #[serde(default)]
    pub registry_url: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub policies: CollaboratorPolicies,
}

fn default_classifier_url() -> String {
    "http://127.0.0.1:8500".to_string()
}
fn default_detector_url() -> String {
    "http://127.0.0.1:8501".to_string()
}
fn default_user_agent() -> String {
    concat!("veriscore-node/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for CollaboratorsSection {
    fn default() -> Self {
        Self {
            classifier_url: default_classifier_url(),
            detector_url: default_detector_url(),
            registry_url: None,
            user_agent: default_user_agent(),
            policies: CollaboratorPolicies::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ledger_url")]
    pub url: String,
    #[serde(default)]
    pub subnet_id: u16,
    #[serde(default = "default_submit_interval")]
    pub submit_interval_secs: u64,
    #[serde(default = "default_min_submit_interval")]
    pub min_interval_secs: u64,
    #[serde(default)]
    pub retry: CallPolicy,
}

fn default_ledger_url() -> String {
    "http://127.0.0.1:9944".to_string()
}
fn default_submit_interval() -> u64 {
    DEFAULT_SUBMIT_INTERVAL_SECS
}
fn default_min_submit_interval() -> u64 {
    DEFAULT_MIN_SUBMIT_INTERVAL_SECS
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_ledger_url(),
            subnet_id: 0,
            submit_interval_secs: default_submit_interval(),
            min_interval_secs: default_min_submit_interval(),
            retry: CallPolicy::default(),
        }
    }
}

impl LedgerSection {
    pub fn submitter_config(&self) -> SubmitterConfig {
        SubmitterConfig {
            subnet_id: self.subnet_id,
            min_interval_secs: self.min_interval_secs,
            retry: self.retry.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dashboard_addr")]
    pub listen_addr: IpAddr,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

fn default_dashboard_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}
fn default_dashboard_port() -> u16 {
    DEFAULT_DASHBOARD_PORT
}

impl Default for DashboardSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            listen_addr: default_dashboard_addr(),
            port: default_dashboard_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,
}

fn default_metrics_endpoint() -> String {
    "/metrics".to_string()
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            endpoint: default_metrics_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> LogFormat {
    LogFormat::Text
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, NodeError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| NodeError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| NodeError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        self.scoring
            .validate()
            .map_err(|e| NodeError::Config(e.to_string()))?;
        self.collaborators
            .policies
            .validate()
            .map_err(|e| NodeError::Config(e.to_string()))?;
        self.ledger
            .retry
            .validate()
            .map_err(|e| NodeError::Config(format!("ledger: {}", e)))?;

        if self.node.round_interval_secs == 0 {
            return Err(NodeError::Config("round_interval_secs must be > 0".to_string()));
        }

        if self.ledger.submit_interval_secs == 0 {
            return Err(NodeError::Config("submit_interval_secs must be > 0".to_string()));
        }

        if self.node.validator_uid == Some(self.scoring.burn_uid) {
            return Err(NodeError::Config(
                "validator_uid must differ from the burn uid".to_string(),
            ));
        }

        for (name, url) in [
            ("classifier_url", Some(&self.collaborators.classifier_url)),
            ("detector_url", Some(&self.collaborators.detector_url)),
            ("registry_url", self.collaborators.registry_url.as_ref()),
            ("ledger.url", self.ledger.enabled.then_some(&self.ledger.url)),
        ] {
            if let Some(url) = url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(NodeError::Config(format!(
                        "{} must be an http(s) URL, got {:?}",
                        name, url
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self)
            .map_err(|e| NodeError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.node.data_dir)
    }

    pub fn spool_dir(&self) -> PathBuf {
        PathBuf::from(&self.node.spool_dir)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir().join("reports")
    }

    pub fn round_interval(&self) -> Duration {
        Duration::from_secs(self.node.round_interval_secs)
    }

    pub fn submit_interval(&self) -> Duration {
        Duration::from_secs(self.ledger.submit_interval_secs)
    }

    pub fn dashboard_socket(&self) -> SocketAddr {
        SocketAddr::new(self.dashboard.listen_addr, self.dashboard.port)
    }
}

pub fn generate_default<P: AsRef<Path>>(output: P) -> Result<(), NodeError> {
    let config = NodeConfig::default();
    let toml = config.to_toml()?;

    fs::write(output.as_ref(), toml)
        .map_err(|e| NodeError::Config(format!("Failed to write config: {}", e)))?;

    println!("Generated default config at: {}", output.as_ref().display());
    Ok(())
}
