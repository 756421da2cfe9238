//! The distinguished blocking actioner.
//!
//! Maintains a directory with one deny-rule file per blocked IP. Rule
//! files are named `block-<ip-with-dashes>` so an external exporter can
//! translate the directory into whatever firewall it fronts. Removing
//! the file reverses the block.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use super::Actioner;
use crate::error::Result;

pub struct FileFirewall {
    rules_dir: PathBuf,
}

impl FileFirewall {
    pub fn new(rules_dir: PathBuf) -> Self {
        Self { rules_dir }
    }

    fn rule_path(&self, ip: &str) -> PathBuf {
        self.rules_dir.join(rule_name(ip))
    }
}

/// Rule file name for an IP: `block-` plus the IP with separators
/// replaced by dashes, lowercased.
fn rule_name(ip: &str) -> String {
    format!("block-{}", ip.replace(['.', ':'], "-")).to_lowercase()
}

#[async_trait]
impl Actioner for FileFirewall {
    fn name(&self) -> &str {
        "firewall"
    }

    async fn apply(&self, ip: &str) -> Result<()> {
        std::fs::create_dir_all(&self.rules_dir)?;
        let path = self.rule_path(ip);
        std::fs::write(&path, format!("deny from {ip}/32 proto all\n"))?;
        info!(ip = %ip, rule = %rule_name(ip), "deny rule written");
        Ok(())
    }

    async fn reverse(&self, ip: &str) -> Result<()> {
        let path = self.rule_path(ip);
        std::fs::remove_file(&path)?;
        info!(ip = %ip, rule = %rule_name(ip), "deny rule removed");
        Ok(())
    }
}
