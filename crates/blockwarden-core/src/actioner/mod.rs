//! Named remediation capabilities and their registry.
//!
//! An actioner applies one remediation effect for an IP. Exactly one
//! registered actioner is distinguished as the *blocking* actioner: it is
//! the only one whose effect is reversed when a cooldown elapses or a
//! manual unblock arrives.

pub mod archive;
pub mod firewall;
pub mod sigma;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Result, WardenError};

pub use archive::ArchiveActioner;
pub use firewall::FileFirewall;
pub use sigma::SigmaExportActioner;

/// Synthetic action name meaning "run every actioner in the scenario".
pub const ALL_ACTIONS: &str = "all";

/// A named remediation capability.
#[async_trait]
pub trait Actioner: Send + Sync {
    fn name(&self) -> &str;

    /// Apply the remediation effect for `ip`.
    async fn apply(&self, ip: &str) -> Result<()>;

    /// Reverse a previously applied effect. Only the distinguished
    /// blocking actioner supports this.
    async fn reverse(&self, ip: &str) -> Result<()> {
        let _ = ip;
        Err(WardenError::ReverseUnsupported(self.name().to_string()))
    }
}

/// Registry of actioners by name, with one distinguished blocking entry.
pub struct ActionerRegistry {
    actioners: HashMap<String, Arc<dyn Actioner>>,
    blocking: String,
}

impl ActionerRegistry {
    /// Create an empty registry with `blocking` as the distinguished
    /// blocking actioner name.
    pub fn new(blocking: impl Into<String>) -> Self {
        Self {
            actioners: HashMap::new(),
            blocking: blocking.into(),
        }
    }

    pub fn insert(&mut self, actioner: Arc<dyn Actioner>) {
        self.actioners
            .insert(actioner.name().to_string(), actioner);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Actioner>> {
        self.actioners.get(name)
    }

    pub fn blocking_name(&self) -> &str {
        &self.blocking
    }

    /// The distinguished blocking actioner, if registered.
    pub fn blocking(&self) -> Option<&Arc<dyn Actioner>> {
        self.actioners.get(&self.blocking)
    }
}
