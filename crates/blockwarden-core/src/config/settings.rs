//! Application settings and TOML configuration parsing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::Scenario;
use crate::error::{Result, WardenError};

/// Top-level blockwarden configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Path to the SQLite block-record database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Response scenarios, keyed by scenario name.
    #[serde(default)]
    pub scenarios: HashMap<String, ScenarioConfig>,

    /// Remediation actioner settings.
    #[serde(default)]
    pub actioners: ActionerSettings,

    /// Notifier settings.
    #[serde(default)]
    pub notifier: NotifierSettings,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scenarios: HashMap::new(),
            actioners: ActionerSettings::default(),
            notifier: NotifierSettings::default(),
        }
    }
}

/// A single response scenario: which detection rule it matches and how
/// the trigger/remediation lifecycle behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Detection rule name that qualifies an event for this scenario.
    pub rule: String,

    /// Number of qualifying events required to fire.
    #[serde(default = "default_trigger_count")]
    pub trigger_count: i64,

    /// Seconds of inactivity after which the trigger count resets.
    #[serde(default = "default_trigger_window_secs")]
    pub trigger_window_secs: u64,

    /// Base cooldown in seconds before a block is reversed. Scaled by
    /// the IP's cumulative block count.
    #[serde(default = "default_unblock_after_secs")]
    pub unblock_after_secs: u64,

    /// Ordered actioner names to invoke when the scenario fires.
    #[serde(default)]
    pub actioners: Vec<String>,

    /// Human-confirmation prompt settings.
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl ScenarioConfig {
    /// Convert the serialized form into the engine's runtime scenario.
    pub fn to_scenario(&self) -> Scenario {
        Scenario {
            rule: self.rule.clone(),
            threshold: self.trigger_count,
            reset_window: Duration::from_secs(self.trigger_window_secs),
            base_cooldown: Duration::from_secs(self.unblock_after_secs),
            actioners: self.actioners.clone(),
            notify_enabled: self.notify.enabled,
            notify_timeout: Duration::from_secs(self.notify.timeout_secs),
        }
    }
}

/// Whether and how long to wait for a human choice before falling back
/// to automatic full remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

/// Filesystem locations and the distinguished blocking actioner name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionerSettings {
    /// Name of the distinguished blocking actioner (the only one whose
    /// effect is reversed when a cooldown elapses).
    #[serde(default = "default_blocking_actioner")]
    pub blocking: String,

    /// Directory holding one deny-rule file per blocked IP.
    #[serde(default = "default_firewall_rules_dir")]
    pub firewall_rules_dir: PathBuf,

    /// Directory for per-IP evidence notes.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    /// Directory for exported Sigma detection rules.
    #[serde(default = "default_sigma_export_dir")]
    pub sigma_export_dir: PathBuf,
}

impl Default for ActionerSettings {
    fn default() -> Self {
        Self {
            blocking: default_blocking_actioner(),
            firewall_rules_dir: default_firewall_rules_dir(),
            archive_dir: default_archive_dir(),
            sigma_export_dir: default_sigma_export_dir(),
        }
    }
}

/// Notifier settings. Only Slack is supported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierSettings {
    #[serde(default)]
    pub slack: SlackSettings,
}

/// Slack credentials and target channel for confirmation prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackSettings {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub channel: String,
    /// Slack API base URL. Overridable for testing.
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,
}

impl Default for SlackSettings {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            channel: String::new(),
            api_base: default_slack_api_base(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("blocks.db")
}

fn default_trigger_count() -> i64 {
    1
}

fn default_trigger_window_secs() -> u64 {
    600
}

fn default_unblock_after_secs() -> u64 {
    300
}

fn default_notify_timeout_secs() -> u64 {
    60
}

fn default_blocking_actioner() -> String {
    "firewall".to_string()
}

fn default_firewall_rules_dir() -> PathBuf {
    PathBuf::from("firewall-rules")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("archive")
}

fn default_sigma_export_dir() -> PathBuf {
    PathBuf::from("sigma-export")
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

impl WardenConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: WardenConfig =
            toml::from_str(&contents).map_err(|e| WardenError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Runtime scenarios derived from the configuration.
    pub fn scenarios(&self) -> HashMap<String, Scenario> {
        self.scenarios
            .iter()
            .map(|(name, sc)| (name.clone(), sc.to_scenario()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WardenConfig::default();
        assert_eq!(config.db_path, PathBuf::from("blocks.db"));
        assert!(config.scenarios.is_empty());
        assert_eq!(config.actioners.blocking, "firewall");
        assert_eq!(config.notifier.slack.api_base, "https://slack.com/api");
    }

    #[test]
    fn test_parses_full_config() {
        let toml_str = r##"
db_path = "/var/lib/blockwarden/blocks.db"

[scenarios.block_ip]
rule = "ssh_bruteforce"
trigger_count = 3
trigger_window_secs = 600
unblock_after_secs = 300
actioners = ["firewall", "archive", "sigma_export"]

[scenarios.block_ip.notify]
enabled = true
timeout_secs = 60

[actioners]
blocking = "firewall"
firewall_rules_dir = "/etc/blockwarden/rules"

[notifier.slack]
bot_token = "xoxb-test"
channel = "#incidents"
"##;
        let config: WardenConfig = toml::from_str(toml_str).unwrap();
        let sc = &config.scenarios["block_ip"];
        assert_eq!(sc.rule, "ssh_bruteforce");
        assert_eq!(sc.trigger_count, 3);
        assert_eq!(sc.actioners.len(), 3);
        assert!(sc.notify.enabled);
        assert_eq!(sc.notify.timeout_secs, 60);
        assert_eq!(config.notifier.slack.channel, "#incidents");

        let scenario = sc.to_scenario();
        assert_eq!(scenario.threshold, 3);
        assert_eq!(scenario.reset_window, Duration::from_secs(600));
        assert_eq!(scenario.base_cooldown, Duration::from_secs(300));
        assert_eq!(scenario.notify_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_scenario_field_defaults() {
        let toml_str = r#"
[scenarios.minimal]
rule = "some_rule"
"#;
        let config: WardenConfig = toml::from_str(toml_str).unwrap();
        let sc = &config.scenarios["minimal"];
        assert_eq!(sc.trigger_count, 1);
        assert_eq!(sc.trigger_window_secs, 600);
        assert_eq!(sc.unblock_after_secs, 300);
        assert!(!sc.notify.enabled);
    }
}
