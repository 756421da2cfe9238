//! blockwarden daemon orchestration logic.
//!
//! The [`Daemon`] struct ties together the record store, the actioner
//! registry, the Slack notifier, and the remediation engine, and feeds
//! the engine from a JSON-lines event stream on stdin. How events are
//! produced upstream is not the daemon's concern; each line is an opaque
//! `(rule, ip)` pair routed to every scenario whose rule matches.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use blockwarden_core::actioner::{
    ActionerRegistry, ArchiveActioner, FileFirewall, SigmaExportActioner,
};
use blockwarden_core::config::WardenConfig;
use blockwarden_core::engine::{Engine, Event};
use blockwarden_core::notifier::SlackNotifier;
use blockwarden_core::store::{BlockRecord, RecordStore, SqliteStore};

/// The daemon that wires all blockwarden subsystems together.
pub struct Daemon {
    config: WardenConfig,
    engine: Engine,
    store: Arc<SqliteStore>,
}

impl Daemon {
    /// Create a new daemon from the given configuration.
    pub fn new(config: WardenConfig) -> Result<Self> {
        let store =
            Arc::new(SqliteStore::open(&config.db_path).context("opening record store")?);

        let mut registry = ActionerRegistry::new(&config.actioners.blocking);
        registry.insert(Arc::new(FileFirewall::new(
            config.actioners.firewall_rules_dir.clone(),
        )));
        registry.insert(Arc::new(ArchiveActioner::new(
            config.actioners.archive_dir.clone(),
        )));
        registry.insert(Arc::new(SigmaExportActioner::new(
            config.actioners.sigma_export_dir.clone(),
        )));

        let notifier = Arc::new(SlackNotifier::new(config.notifier.slack.clone()));

        let engine = Engine::new(
            config.scenarios(),
            store.clone() as Arc<dyn RecordStore>,
            registry,
            notifier,
        );

        Ok(Self {
            config,
            engine,
            store,
        })
    }

    /// Read JSON-lines events from stdin until EOF, routing each to the
    /// scenarios whose rule matches.
    pub async fn run(&self) -> Result<()> {
        info!(
            scenarios = self.config.scenarios.len(),
            "blockwarden daemon running, reading events from stdin"
        );

        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let event: Event = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "malformed event line dropped");
                    continue;
                }
            };
            if event.ip.is_empty() {
                warn!("event without ip dropped");
                continue;
            }
            self.route_event(&event).await;
        }

        info!("event stream closed, daemon exiting");
        Ok(())
    }

    /// Hand the event to every scenario whose rule matches.
    async fn route_event(&self, event: &Event) {
        let mut matched = false;
        for (name, scenario) in &self.config.scenarios {
            if scenario.rule == event.rule {
                matched = true;
                self.engine.handle_event(name, event).await;
            }
        }
        if !matched {
            warn!(rule = %event.rule, ip = %event.ip, "no scenario matches event rule");
        }
    }

    /// Manually lift the block for an IP.
    pub async fn unblock(&self, ip: &str) -> Result<()> {
        self.engine
            .manual_unblock(ip)
            .await
            .with_context(|| format!("unblocking {ip}"))
    }

    /// All block records, for status display.
    pub fn records(&self) -> Result<Vec<BlockRecord>> {
        self.store.list_all().context("listing block records")
    }
}
