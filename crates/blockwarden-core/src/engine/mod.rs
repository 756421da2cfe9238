//! The remediation state machine.
//!
//! One trigger episode runs `IDLE -> THRESHOLD_REACHED ->
//! {AWAITING_CONFIRMATION -> (CONFIRMED | TIMED_OUT_AUTO)} -> REMEDIATED
//! -> (REVERSED | OVERRIDDEN) -> IDLE`. The [`BlockRecord`] is the
//! authority for every decision: each path re-fetches it, mutates it, and
//! persists it, so concurrent timers stay consistent by re-checking the
//! record rather than by locking each other out.

mod timers;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::actioner::{ActionerRegistry, ALL_ACTIONS};
use crate::error::Result;
use crate::notifier::{Notify, PromptChoice, PromptHandle};
use crate::store::RecordStore;

use timers::TimerTable;

/// A raw security event: an offending IP tagged with the detection rule
/// that flagged it. The extra fields are observational and ride along
/// unprocessed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    pub ip: String,
    pub rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
}

/// Runtime form of a configured response scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Detection rule name a qualifying event must carry.
    pub rule: String,
    /// Trigger count at which the scenario fires (exact equality).
    pub threshold: i64,
    /// Idle gap after which an unblocked IP's trigger count resets.
    pub reset_window: Duration,
    /// Cooldown before reversal, scaled by the IP's prior block count.
    pub base_cooldown: Duration,
    /// Ordered actioner names to invoke.
    pub actioners: Vec<String>,
    /// Whether to ask a human before remediating.
    pub notify_enabled: bool,
    /// How long to wait for a human choice before running everything.
    pub notify_timeout: Duration,
}

/// Drives trigger aggregation, confirmation, dispatch, and scheduled
/// reversal. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Engine {
    scenarios: Arc<HashMap<String, Scenario>>,
    store: Arc<dyn RecordStore>,
    actioners: Arc<ActionerRegistry>,
    notifier: Arc<dyn Notify>,
    confirm_timers: Arc<TimerTable>,
    unblock_timers: Arc<TimerTable>,
}

impl Engine {
    pub fn new(
        scenarios: HashMap<String, Scenario>,
        store: Arc<dyn RecordStore>,
        actioners: ActionerRegistry,
        notifier: Arc<dyn Notify>,
    ) -> Self {
        Self {
            scenarios: Arc::new(scenarios),
            store,
            actioners: Arc::new(actioners),
            notifier,
            confirm_timers: Arc::new(TimerTable::default()),
            unblock_timers: Arc::new(TimerTable::default()),
        }
    }

    /// Feed one inbound event into the named scenario.
    ///
    /// Unknown scenarios and rule mismatches are logged and dropped;
    /// events are fire-and-forget, so nothing is surfaced to the source.
    pub async fn handle_event(&self, scenario_name: &str, event: &Event) {
        let Some(scenario) = self.scenarios.get(scenario_name) else {
            warn!(scenario = scenario_name, "event for unknown scenario dropped");
            return;
        };
        if event.rule != scenario.rule {
            debug!(
                ip = %event.ip,
                rule = %event.rule,
                scenario = scenario_name,
                "event rule does not match scenario rule, dropped"
            );
            return;
        }

        let mut record = match self.store.get_or_create(&event.ip) {
            Ok(record) => record,
            Err(e) => {
                warn!(ip = %event.ip, error = %e, "record store read failed, event dropped");
                return;
            }
        };

        let now = Utc::now().timestamp();

        // Reset window: only for unblocked IPs with a stale count.
        if !record.is_blocked()
            && record.trigger_count > 0
            && now - record.last_event_time > scenario.reset_window.as_secs() as i64
        {
            debug!(ip = %event.ip, "reset window elapsed, clearing trigger count");
            record.trigger_count = 0;
            record.action_taken = false;
        }

        // Re-entrancy guard: one remediation per episode.
        if record.action_taken {
            debug!(ip = %event.ip, "remediation already taken for this episode, skipping");
            return;
        }

        record.trigger_count += 1;
        record.last_event_time = now;

        let threshold = if scenario.threshold <= 0 {
            warn!(
                scenario = scenario_name,
                threshold = scenario.threshold,
                "non-positive trigger threshold, clamping to 1"
            );
            1
        } else {
            scenario.threshold
        };
        debug!(
            ip = %event.ip,
            count = record.trigger_count,
            threshold,
            "qualifying event recorded"
        );

        if let Err(e) = self.store.update(&record) {
            warn!(ip = %event.ip, error = %e, "failed to persist trigger state");
        }

        // Fire exactly once, when the count first reaches the threshold.
        // The re-entrancy guard keeps later events from re-firing.
        if record.trigger_count == threshold {
            info!(ip = %event.ip, scenario = scenario_name, "trigger threshold reached");
            self.execute_scenario(scenario_name, &event.ip).await;
        }
    }

    /// Run the scenario's confirmation-or-auto-remediate decision.
    async fn execute_scenario(&self, scenario_name: &str, ip: &str) {
        let Some(scenario) = self.scenarios.get(scenario_name) else {
            return;
        };

        if !scenario.notify_enabled {
            debug!(
                scenario = scenario_name,
                ip = %ip,
                "notifications disabled, applying full remediation"
            );
            self.dispatch(scenario_name, ALL_ACTIONS, ip).await;
            return;
        }

        let mut choices: Vec<PromptChoice> = scenario
            .actioners
            .iter()
            .map(|name| PromptChoice {
                label: name.clone(),
                value: name.clone(),
            })
            .collect();
        choices.push(PromptChoice {
            label: "Run every action".to_string(),
            value: ALL_ACTIONS.to_string(),
        });

        let text = format!("IP {ip} triggered scenario {scenario_name}");
        let handle = match self.notifier.send_prompt(&text, &choices).await {
            Ok(handle) => {
                info!(ip = %ip, handle = %handle.0, "confirmation prompt delivered");
                Some(handle)
            }
            Err(e) => {
                // The fallback timer still arms: remediation must not
                // depend on prompt delivery.
                warn!(ip = %ip, error = %e, "prompt delivery failed, automatic fallback still armed");
                None
            }
        };

        let timeout = scenario.notify_timeout;
        let (generation, cancelled) = self.confirm_timers.arm(ip);
        info!(
            ip = %ip,
            timeout_secs = timeout.as_secs(),
            "confirmation timer armed"
        );

        let engine = self.clone();
        let scenario_name = scenario_name.to_string();
        let ip = ip.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    engine.confirm_timers.complete(&ip, generation);
                    engine.on_confirmation_timeout(&scenario_name, &ip, handle).await;
                }
                _ = cancelled => {
                    debug!(ip = %ip, "confirmation timer cancelled");
                }
            }
        });
    }

    /// Automatic fallback when no human chose within the time box.
    async fn on_confirmation_timeout(
        &self,
        scenario_name: &str,
        ip: &str,
        handle: Option<PromptHandle>,
    ) {
        // Re-check the authoritative record: a choice may have landed
        // between the timer firing and this running.
        let record = match self.store.get_or_create(ip) {
            Ok(record) => record,
            Err(e) => {
                warn!(ip = %ip, error = %e, "record store read failed on confirmation timeout");
                return;
            }
        };
        if record.action_taken {
            debug!(ip = %ip, "action already taken before confirmation timeout");
            return;
        }

        info!(ip = %ip, "no choice within confirmation window, applying full remediation");
        self.dispatch(scenario_name, ALL_ACTIONS, ip).await;

        if let Some(handle) = handle {
            let text = format!("No response in time, automatically ran every action for IP {ip}");
            if let Err(e) = self.notifier.update_prompt(&handle, &text).await {
                warn!(ip = %ip, error = %e, "failed to update prompt after automatic remediation");
            }
        }
    }

    /// Apply a chosen action (or [`ALL_ACTIONS`]) for `ip`.
    ///
    /// This is the entry point for human choices arriving from a callback
    /// surface as well as the internal auto-remediation paths.
    pub async fn dispatch(&self, scenario_name: &str, action: &str, ip: &str) {
        let Some(scenario) = self.scenarios.get(scenario_name) else {
            warn!(scenario = scenario_name, "dispatch for unknown scenario dropped");
            return;
        };
        let mut record = match self.store.get_or_create(ip) {
            Ok(record) => record,
            Err(e) => {
                warn!(ip = %ip, error = %e, "record store read failed, dispatch dropped");
                return;
            }
        };

        // A late single-action choice after another path already
        // remediated must not double-apply.
        if record.is_blocked() && action != ALL_ACTIONS {
            info!(ip = %ip, action, "ip already remediated, skipping single action");
            return;
        }

        if action == ALL_ACTIONS {
            // Best-effort, not atomic: one failing actioner does not
            // stop the rest, and the episode is still marked remediated.
            for name in &scenario.actioners {
                let Some(actioner) = self.actioners.get(name) else {
                    warn!(actioner = %name, "configured actioner not registered, skipped");
                    continue;
                };
                info!(ip = %ip, actioner = %name, "applying actioner");
                if let Err(e) = actioner.apply(ip).await {
                    warn!(
                        ip = %ip,
                        actioner = %name,
                        error = %e,
                        "actioner failed, continuing with the rest"
                    );
                }
            }
        } else {
            let Some(actioner) = self.actioners.get(action) else {
                warn!(ip = %ip, action, "unknown action dropped");
                return;
            };
            info!(ip = %ip, actioner = action, "applying actioner");
            if let Err(e) = actioner.apply(ip).await {
                warn!(
                    ip = %ip,
                    actioner = action,
                    error = %e,
                    "actioner failed, leaving episode open for retry"
                );
                return;
            }
        }

        record.action_taken = true;

        if action == ALL_ACTIONS || action == self.actioners.blocking_name() {
            // Marking the record and cancelling the confirmation timer
            // act as a unit from the timer's perspective: the timer
            // re-checks action_taken before doing anything.
            if self.confirm_timers.cancel(ip) {
                debug!(ip = %ip, "confirmation timer cancelled by dispatch");
            }

            let multiplier = (record.block_count + 1) as u32;
            let cooldown = scenario.base_cooldown * multiplier;
            let now = Utc::now().timestamp();
            record.blocked_at = now;
            record.unblock_after = now + cooldown.as_secs() as i64;
            record.block_count += 1;
            info!(
                ip = %ip,
                cooldown_secs = cooldown.as_secs(),
                block_count = record.block_count,
                "ip blocked, reversal scheduled"
            );
            self.schedule_unblock(ip, cooldown);
        }

        if let Err(e) = self.store.update(&record) {
            warn!(ip = %ip, error = %e, "failed to persist block record after dispatch");
        }
    }

    /// Arm the cancellable reversal timer for `ip`, replacing any prior
    /// one.
    fn schedule_unblock(&self, ip: &str, cooldown: Duration) {
        let (generation, cancelled) = self.unblock_timers.arm(ip);
        let engine = self.clone();
        let ip = ip.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(cooldown) => {
                    engine.unblock_timers.complete(&ip, generation);
                    info!(ip = %ip, "cooldown elapsed, reversing block");
                    engine.reverse_block(&ip).await;
                }
                _ = cancelled => {
                    // The canceller owns any record changes.
                    debug!(ip = %ip, "reversal timer cancelled");
                }
            }
        });
    }

    /// Immediately lift the block for `ip`, cancelling both outstanding
    /// timers. No-op when the IP is not blocked.
    pub async fn manual_unblock(&self, ip: &str) -> Result<()> {
        let mut record = self.store.get_or_create(ip)?;
        if !record.is_blocked() {
            info!(ip = %ip, "ip is not blocked, nothing to do");
            return Ok(());
        }

        if self.confirm_timers.cancel(ip) {
            debug!(ip = %ip, "confirmation timer cancelled by manual unblock");
        }
        if self.unblock_timers.cancel(ip) {
            debug!(ip = %ip, "reversal timer cancelled by manual unblock");
        }

        if let Some(blocking) = self.actioners.blocking() {
            blocking.reverse(ip).await?;
        }

        record.blocked_at = 0;
        record.unblock_after = 0;
        record.trigger_count = 0;
        record.action_taken = false;
        self.store.update(&record)?;
        info!(ip = %ip, "ip manually unblocked");
        Ok(())
    }

    /// Reversal shared by natural cooldown expiry. `block_count` stays:
    /// escalation is cumulative across episodes.
    async fn reverse_block(&self, ip: &str) {
        match self.actioners.blocking() {
            Some(blocking) => {
                if let Err(e) = blocking.reverse(ip).await {
                    warn!(ip = %ip, error = %e, "failed to reverse block");
                }
            }
            None => warn!(
                actioner = self.actioners.blocking_name(),
                "blocking actioner not registered, cannot reverse"
            ),
        }

        let mut record = match self.store.get_or_create(ip) {
            Ok(record) => record,
            Err(e) => {
                warn!(ip = %ip, error = %e, "record store read failed after reversal");
                return;
            }
        };
        record.blocked_at = 0;
        record.unblock_after = 0;
        record.trigger_count = 0;
        record.action_taken = false;
        if let Err(e) = self.store.update(&record) {
            warn!(ip = %ip, error = %e, "failed to persist record after reversal");
        }
    }
}
