//! Evidence archival actioner.
//!
//! Appends a timestamped note to a per-IP log file in the archive
//! directory whenever the IP is remediated.

use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::Actioner;
use crate::error::Result;

pub struct ArchiveActioner {
    archive_dir: PathBuf,
}

impl ArchiveActioner {
    pub fn new(archive_dir: PathBuf) -> Self {
        Self { archive_dir }
    }
}

#[async_trait]
impl Actioner for ArchiveActioner {
    fn name(&self) -> &str {
        "archive"
    }

    async fn apply(&self, ip: &str) -> Result<()> {
        std::fs::create_dir_all(&self.archive_dir)?;
        let path = self.archive_dir.join(format!("logs-{ip}.txt"));
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{} remediated {}", Utc::now().to_rfc3339(), ip)?;
        info!(ip = %ip, path = %path.display(), "evidence note archived");
        Ok(())
    }
}
