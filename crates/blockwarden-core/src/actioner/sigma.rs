//! Sigma rule export actioner.
//!
//! Renders a Sigma detection rule describing the offending IP and writes
//! it as YAML into the export directory, one file per remediation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::Actioner;
use crate::error::Result;

pub struct SigmaExportActioner {
    export_dir: PathBuf,
}

impl SigmaExportActioner {
    pub fn new(export_dir: PathBuf) -> Self {
        Self { export_dir }
    }
}

#[derive(Debug, Serialize)]
struct SigmaRule {
    title: String,
    id: String,
    description: String,
    level: String,
    logsource: LogSource,
    detection: Detection,
    fields: Vec<String>,
    falsepositives: Vec<String>,
}

#[derive(Debug, Serialize)]
struct LogSource {
    product: String,
    service: String,
}

#[derive(Debug, Serialize)]
struct Detection {
    selection: BTreeMap<String, String>,
    condition: String,
}

#[async_trait]
impl Actioner for SigmaExportActioner {
    fn name(&self) -> &str {
        "sigma_export"
    }

    async fn apply(&self, ip: &str) -> Result<()> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");

        let mut selection = BTreeMap::new();
        selection.insert(
            "rule".to_string(),
            "Detect Failed SSH Login Attempts".to_string(),
        );
        selection.insert("fd.rip".to_string(), ip.to_string());

        let rule = SigmaRule {
            title: format!("Detected Failed SSH Login Attempt for IP {ip}"),
            id: format!("event-{ip}-{stamp}"),
            description: "Detects failed SSH login attempts based on Falco event".to_string(),
            level: "medium".to_string(),
            logsource: LogSource {
                product: "falco".to_string(),
                service: "ssh".to_string(),
            },
            detection: Detection {
                selection,
                condition: "selection".to_string(),
            },
            fields: vec!["rule".to_string(), "fd.rip".to_string()],
            falsepositives: vec!["Legitimate SSH login attempts".to_string()],
        };

        let yaml = serde_yaml::to_string(&rule)?;
        std::fs::create_dir_all(&self.export_dir)?;
        let path = self.export_dir.join(format!("{ip}-{stamp}.yaml"));
        std::fs::write(&path, yaml)?;
        info!(ip = %ip, path = %path.display(), "sigma rule exported");
        Ok(())
    }
}
