//! Configuration loading for the agency.
//!
//! Settings come from built-in defaults, then an optional JSON file, then
//! environment variables. An agency started by the orchestrator usually has no
//! file at all and derives its identity from its hostname.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::BehaviorQueues;
use crate::client::RetryPolicy;
use crate::core::{InboundFailurePolicy, ReceiveScalingPolicy, RouterSettings, MAX_BATCH_SIZE};
use crate::error::{Error, Result};
use crate::protocol::{AgencyName, MasId};

/// Get the agency configuration directory.
pub fn get_config_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "fipa", "fipa-agency")
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    Ok(dirs.config_dir().to_path_buf())
}

/// Get the default settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("settings.json"))
}

/// Load settings from `path`, or from the default location if it exists, and apply
/// the process environment.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

/// Like [`load_settings`] with an explicit environment lookup.
pub fn load_settings_with(path: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    let mut settings = match path {
        Some(path) => read_settings(path)?,
        None => match get_settings_path() {
            Ok(default) if default.exists() => read_settings(&default)?,
            _ => Settings::default(),
        },
    };

    settings.apply_env(&env)?;
    if settings.agency.name.is_empty() {
        if let Some(hostname) = env("HOSTNAME") {
            settings.agency.derive_identity(&hostname);
        }
    }
    settings.validate()?;
    Ok(settings)
}

fn read_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Identity and listen address of this agency.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AgencySection {
    pub name: AgencyName,
    #[serde(rename = "masid")]
    pub mas_id: MasId,
    pub id: u32,
    pub host: String,
    pub port: u16,
}

impl Default for AgencySection {
    fn default() -> Self {
        Self {
            name: String::new(),
            mas_id: 0,
            id: 0,
            host: "0.0.0.0".to_string(),
            port: default_agency_port(),
        }
    }
}

fn default_agency_port() -> u16 {
    10000
}

impl AgencySection {
    /// Take name, MAS and agency id from a `mas-{mas}-im-{group}-agency-{id}` hostname.
    pub fn derive_identity(&mut self, hostname: &str) -> bool {
        let parts: Vec<&str> = hostname.split('-').collect();
        let (mas, id) = match parts.as_slice() {
            ["mas", mas, "im", _group, "agency", id] => match (mas.parse::<MasId>(), id.parse::<u32>()) {
                (Ok(mas), Ok(id)) => (mas, id),
                _ => return false,
            },
            _ => return false,
        };
        self.name = format!("{}.mas{}agencies", hostname, mas);
        self.mas_id = mas;
        self.id = id;
        true
    }
}

/// Placement registry of the orchestrator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RegistrySection {
    pub host: String,
    pub port: u16,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            host: "ams".to_string(),
            port: 9000,
        }
    }
}

/// Outbound HTTP to peers and the registry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TransportSection {
    /// Port peer agencies listen on
    pub peer_port: u16,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
    pub dns_retries: u32,
    pub batch_size: usize,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            peer_port: default_agency_port(),
            timeout_secs: 60,
            retry: RetryPolicy::default(),
            dns_retries: 5,
            batch_size: 100,
        }
    }
}

impl TransportSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct QueuesSection {
    pub mailbox_capacity: usize,
    pub link_capacity: usize,
    pub inbound_capacity: usize,
    pub behavior_inbox_capacity: usize,
    pub ctrl_capacity: usize,
}

impl Default for QueuesSection {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
            link_capacity: 1000,
            inbound_capacity: 1000,
            behavior_inbox_capacity: 1000,
            ctrl_capacity: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct RoutingSection {
    pub scaling: ReceiveScalingPolicy,
    pub on_inbound_failure: InboundFailurePolicy,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingSection {
    pub filter: String,
    /// Daily rolling log files go here; the platform data directory when unset
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info,fipa_agency=debug".to_string(),
            directory: None,
        }
    }
}

/// Agency settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub agency: AgencySection,

    #[serde(default)]
    pub registry: RegistrySection,

    #[serde(default)]
    pub transport: TransportSection,

    #[serde(default)]
    pub queues: QueuesSection,

    #[serde(default)]
    pub routing: RoutingSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{}: invalid value '{}'", key, value)))
}

impl Settings {
    /// Apply environment overrides.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(name) = env("AGENCY_NAME") {
            self.agency.name = name;
        }
        if let Some(mas) = env("AGENCY_MAS_ID") {
            self.agency.mas_id = parse_env("AGENCY_MAS_ID", &mas)?;
        }
        if let Some(port) = env("AGENCY_PORT") {
            self.agency.port = parse_env("AGENCY_PORT", &port)?;
        }
        if let Some(host) = env("REGISTRY_HOST") {
            self.registry.host = host;
        }
        if let Some(port) = env("REGISTRY_PORT") {
            self.registry.port = parse_env("REGISTRY_PORT", &port)?;
        }
        if let Some(filter) = env("AGENCY_LOG") {
            self.logging.filter = filter;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.agency.name.trim().is_empty() {
            return Err(Error::Config(
                "agency.name is empty and could not be derived from HOSTNAME".to_string(),
            ));
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.transport.batch_size) {
            return Err(Error::Config(format!(
                "transport.batch_size must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }
        let queues = [
            ("queues.mailbox_capacity", self.queues.mailbox_capacity),
            ("queues.link_capacity", self.queues.link_capacity),
            ("queues.inbound_capacity", self.queues.inbound_capacity),
            ("queues.behavior_inbox_capacity", self.queues.behavior_inbox_capacity),
            ("queues.ctrl_capacity", self.queues.ctrl_capacity),
        ];
        for (key, capacity) in queues {
            if capacity == 0 {
                return Err(Error::Config(format!("{} must be positive", key)));
            }
        }
        if self.routing.scaling.max_workers == 0 {
            return Err(Error::Config(
                "routing.scaling.max_workers must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            mailbox_capacity: self.queues.mailbox_capacity,
            inbound_capacity: self.queues.inbound_capacity,
            link_capacity: self.queues.link_capacity,
            batch_size: self.transport.batch_size,
            scaling: self.routing.scaling,
            on_inbound_failure: self.routing.on_inbound_failure,
        }
    }

    pub fn behavior_queues(&self) -> BehaviorQueues {
        BehaviorQueues {
            inbox_capacity: self.queues.behavior_inbox_capacity,
            ctrl_capacity: self.queues.ctrl_capacity,
        }
    }
}
