//! Tests for the remediation state machine: trigger aggregation,
//! confirmation timeout, dispatch, escalation, and timer cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::*;
use crate::actioner::{Actioner, ActionerRegistry};
use crate::error::{Result, WardenError};
use crate::notifier::{Notify, PromptChoice, PromptHandle};
use crate::store::{MemoryStore, RecordStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Actioner that records every apply/reverse call in a shared journal.
struct RecordingActioner {
    name: String,
    journal: Arc<Mutex<Vec<String>>>,
    fail_apply: bool,
}

#[async_trait]
impl Actioner for RecordingActioner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, ip: &str) -> Result<()> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("apply:{}:{}", self.name, ip));
        if self.fail_apply {
            return Err(WardenError::Config("induced apply failure".to_string()));
        }
        Ok(())
    }

    async fn reverse(&self, ip: &str) -> Result<()> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("reverse:{}:{}", self.name, ip));
        Ok(())
    }
}

#[derive(Default)]
struct MockNotifier {
    fail_send: bool,
    prompts: Mutex<Vec<(String, Vec<String>)>>,
    updates: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notify for MockNotifier {
    async fn send_prompt(&self, text: &str, choices: &[PromptChoice]) -> Result<PromptHandle> {
        if self.fail_send {
            return Err(WardenError::Notifier("induced send failure".to_string()));
        }
        let values = choices.iter().map(|c| c.value.clone()).collect();
        let mut prompts = self.prompts.lock().unwrap();
        prompts.push((text.to_string(), values));
        Ok(PromptHandle(format!("ts-{}", prompts.len())))
    }

    async fn update_prompt(&self, handle: &PromptHandle, text: &str) -> Result<()> {
        self.updates
            .lock()
            .unwrap()
            .push((handle.0.clone(), text.to_string()));
        Ok(())
    }
}

struct Harness {
    engine: Engine,
    store: Arc<MemoryStore>,
    journal: Arc<Mutex<Vec<String>>>,
    notifier: Arc<MockNotifier>,
}

impl Harness {
    fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn applies(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter(|entry| entry.starts_with("apply:"))
            .collect()
    }

    fn reversals(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter(|entry| entry.starts_with("reverse:"))
            .collect()
    }
}

const SCENARIO: &str = "block_ip";
const RULE: &str = "ssh_bruteforce";

fn scenario(threshold: i64, base_cooldown: Duration, notify_timeout: Option<Duration>) -> Scenario {
    Scenario {
        rule: RULE.to_string(),
        threshold,
        reset_window: Duration::from_secs(600),
        base_cooldown,
        actioners: vec![
            "firewall".to_string(),
            "archive".to_string(),
            "sigma_export".to_string(),
        ],
        notify_enabled: notify_timeout.is_some(),
        notify_timeout: notify_timeout.unwrap_or(Duration::from_secs(60)),
    }
}

fn build(scenario: Scenario) -> Harness {
    build_with(scenario, None, false)
}

fn build_with(scenario: Scenario, failing_actioner: Option<&str>, fail_send: bool) -> Harness {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ActionerRegistry::new("firewall");
    for name in &scenario.actioners {
        registry.insert(Arc::new(RecordingActioner {
            name: name.clone(),
            journal: journal.clone(),
            fail_apply: failing_actioner == Some(name.as_str()),
        }));
    }

    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(MockNotifier {
        fail_send,
        ..MockNotifier::default()
    });

    let mut scenarios = HashMap::new();
    scenarios.insert(SCENARIO.to_string(), scenario);

    let engine = Engine::new(scenarios, store.clone(), registry, notifier.clone());
    Harness {
        engine,
        store,
        journal,
        notifier,
    }
}

fn event(ip: &str) -> Event {
    Event {
        ip: ip.to_string(),
        rule: RULE.to_string(),
        ..Event::default()
    }
}

// ---------------------------------------------------------------------------
// Trigger aggregation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fires_exactly_at_threshold() {
    let h = build(scenario(3, Duration::from_secs(300), None));

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    assert!(h.applies().is_empty());

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    assert_eq!(h.applies().len(), 3);

    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert_eq!(record.trigger_count, 3);
    assert!(record.action_taken);
}

#[tokio::test]
async fn test_events_after_remediation_do_not_refire() {
    let h = build(scenario(2, Duration::from_secs(300), None));

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    assert_eq!(h.applies().len(), 3);

    // Further events land on the re-entrancy guard: no count increase,
    // no second dispatch.
    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    assert_eq!(h.applies().len(), 3);

    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert_eq!(record.trigger_count, 2);
}

#[tokio::test]
async fn test_unknown_scenario_and_rule_mismatch_dropped() {
    let h = build(scenario(1, Duration::from_secs(300), None));

    h.engine.handle_event("no_such_scenario", &event("10.0.0.5")).await;

    let mut wrong_rule = event("10.0.0.5");
    wrong_rule.rule = "different_rule".to_string();
    h.engine.handle_event(SCENARIO, &wrong_rule).await;

    assert!(h.applies().is_empty());
    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert_eq!(record.trigger_count, 0);
}

#[tokio::test]
async fn test_reset_window_clears_stale_count() {
    let h = build(scenario(3, Duration::from_secs(300), None));

    // Seed a stale, unblocked record: two triggers, last seen well
    // outside the 10-minute reset window.
    let mut record = h.store.get_or_create("10.0.0.5").unwrap();
    record.trigger_count = 2;
    record.last_event_time = Utc::now().timestamp() - 900;
    h.store.update(&record).unwrap();

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;

    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert_eq!(record.trigger_count, 1);
    assert!(h.applies().is_empty());
}

#[tokio::test]
async fn test_no_reset_while_blocked() {
    let h = build(scenario(99, Duration::from_secs(300), None));

    let mut record = h.store.get_or_create("10.0.0.5").unwrap();
    record.trigger_count = 2;
    record.last_event_time = Utc::now().timestamp() - 900;
    record.blocked_at = Utc::now().timestamp() - 900;
    h.store.update(&record).unwrap();

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;

    // Blocked records keep their count even past the reset window.
    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert_eq!(record.trigger_count, 3);
}

#[tokio::test]
async fn test_idempotent_once_action_taken() {
    let h = build(scenario(3, Duration::from_secs(300), None));

    let mut record = h.store.get_or_create("10.0.0.5").unwrap();
    record.trigger_count = 3;
    record.last_event_time = Utc::now().timestamp();
    record.action_taken = true;
    h.store.update(&record).unwrap();

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;

    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert_eq!(record.trigger_count, 3);
    assert!(h.applies().is_empty());
}

#[tokio::test]
async fn test_non_positive_threshold_clamps_to_one() {
    let h = build(scenario(0, Duration::from_secs(300), None));
    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    assert_eq!(h.applies().len(), 3);
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_end_to_end_immediate_remediation() {
    let h = build(scenario(1, Duration::from_secs(300), None));

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;

    // Every configured actioner ran once, in configured order, within
    // the same call.
    assert_eq!(
        h.applies(),
        vec![
            "apply:firewall:10.0.0.5",
            "apply:archive:10.0.0.5",
            "apply:sigma_export:10.0.0.5",
        ]
    );

    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert!(record.action_taken);
    assert!(record.blocked_at > 0);
    assert_eq!(record.block_count, 1);
    assert_eq!(record.unblock_after - record.blocked_at, 300);
}

#[tokio::test]
async fn test_escalation_law() {
    // base cooldown 5 minutes: successive blocks cool down for 5, 10,
    // 15 minutes (linear in the prior block count).
    let h = build(scenario(1, Duration::from_secs(300), None));

    for expected_cooldown in [300, 600, 900] {
        h.engine.dispatch(SCENARIO, "all", "10.0.0.5").await;
        let record = h.store.get_or_create("10.0.0.5").unwrap();
        assert_eq!(record.unblock_after - record.blocked_at, expected_cooldown);
        h.engine.manual_unblock("10.0.0.5").await.unwrap();
    }

    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert_eq!(record.block_count, 3);
    assert_eq!(h.reversals().len(), 3);
}

#[tokio::test]
async fn test_single_action_failure_leaves_episode_open() {
    let h = build_with(
        scenario(1, Duration::from_secs(300), None),
        Some("archive"),
        false,
    );

    h.engine.dispatch(SCENARIO, "archive", "10.0.0.5").await;

    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert!(!record.action_taken);
    assert!(!record.is_blocked());

    // A retry that succeeds (different action) still works.
    h.engine.dispatch(SCENARIO, "firewall", "10.0.0.5").await;
    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert!(record.action_taken);
    assert!(record.is_blocked());
}

#[tokio::test]
async fn test_all_isolates_actioner_failures() {
    let h = build_with(
        scenario(1, Duration::from_secs(300), None),
        Some("firewall"),
        false,
    );

    h.engine.dispatch(SCENARIO, "all", "10.0.0.5").await;

    // The failing first actioner did not stop the others, and the
    // episode is still marked remediated.
    assert_eq!(h.applies().len(), 3);
    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert!(record.action_taken);
    assert!(record.is_blocked());
}

#[tokio::test]
async fn test_late_single_action_after_block_is_noop() {
    let h = build(scenario(1, Duration::from_secs(300), None));

    h.engine.dispatch(SCENARIO, "all", "10.0.0.5").await;
    let before = h.applies().len();

    h.engine.dispatch(SCENARIO, "archive", "10.0.0.5").await;
    assert_eq!(h.applies().len(), before);
}

#[tokio::test]
async fn test_unknown_action_dropped() {
    let h = build(scenario(1, Duration::from_secs(300), None));
    h.engine.dispatch(SCENARIO, "nuke_from_orbit", "10.0.0.5").await;
    assert!(h.applies().is_empty());
    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert!(!record.action_taken);
}

#[tokio::test]
async fn test_single_blocking_action_arms_cooldown() {
    let h = build(scenario(1, Duration::from_secs(300), None));

    h.engine.dispatch(SCENARIO, "firewall", "10.0.0.5").await;

    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert!(record.is_blocked());
    assert_eq!(record.block_count, 1);
    assert_eq!(h.applies(), vec!["apply:firewall:10.0.0.5"]);
}

// ---------------------------------------------------------------------------
// Confirmation timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_confirmation_timeout_runs_everything_and_updates_prompt() {
    let h = build(scenario(
        1,
        Duration::from_secs(300),
        Some(Duration::from_millis(50)),
    ));

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;

    // Prompt went out with one choice per actioner plus "all"; nothing
    // has been applied yet.
    {
        let prompts = h.notifier.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].0.contains("10.0.0.5"));
        assert_eq!(
            prompts[0].1,
            vec!["firewall", "archive", "sigma_export", "all"]
        );
    }
    assert!(h.applies().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.applies().len(), 3);
    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert!(record.action_taken);
    assert!(record.is_blocked());

    let updates = h.notifier.updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "ts-1");
    assert!(updates[0].1.contains("automatically"));
}

#[tokio::test]
async fn test_human_choice_cancels_automatic_fallback() {
    let h = build(scenario(
        1,
        Duration::from_secs(300),
        Some(Duration::from_millis(150)),
    ));

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;

    // Human picks "all" well inside the time box.
    h.engine.dispatch(SCENARIO, "all", "10.0.0.5").await;
    assert_eq!(h.applies().len(), 3);

    tokio::time::sleep(Duration::from_millis(400)).await;

    // The automatic fallback never ran: no extra applies, no prompt
    // rewrite.
    assert_eq!(h.applies().len(), 3);
    assert!(h.notifier.updates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_notifier_failure_still_arms_fallback() {
    let h = build_with(
        scenario(1, Duration::from_secs(300), Some(Duration::from_millis(50))),
        None,
        true,
    );

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    assert!(h.notifier.prompts.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Remediation happened despite the failed prompt; with no handle
    // there is nothing to update.
    assert_eq!(h.applies().len(), 3);
    assert!(h.notifier.updates.lock().unwrap().is_empty());
    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert!(record.is_blocked());
}

// ---------------------------------------------------------------------------
// Unblock scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_natural_expiry_reverses_and_resets() {
    let h = build(scenario(1, Duration::from_millis(50), None));

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert!(record.is_blocked());

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.reversals(), vec!["reverse:firewall:10.0.0.5"]);
    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert_eq!(record.blocked_at, 0);
    assert_eq!(record.trigger_count, 0);
    assert!(!record.action_taken);
    // Escalation is cumulative: the block count survives reversal.
    assert_eq!(record.block_count, 1);
}

#[tokio::test]
async fn test_manual_unblock_wins_cancellation_race() {
    let h = build(scenario(1, Duration::from_millis(100), None));

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    h.engine.manual_unblock("10.0.0.5").await.unwrap();

    assert_eq!(h.reversals().len(), 1);
    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert_eq!(record.blocked_at, 0);

    // The background timer observed cancellation: no second reversal.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.reversals().len(), 1);
}

#[tokio::test]
async fn test_manual_unblock_noop_when_not_blocked() {
    let h = build(scenario(1, Duration::from_secs(300), None));
    h.engine.manual_unblock("10.0.0.5").await.unwrap();
    assert!(h.reversals().is_empty());
}

#[tokio::test]
async fn test_rearming_supersedes_prior_reversal_timer() {
    let h = build(scenario(1, Duration::from_millis(100), None));

    // Two "all" dispatches in a row: the second re-blocks and replaces
    // the first reversal timer.
    h.engine.dispatch(SCENARIO, "all", "10.0.0.5").await;
    h.engine.dispatch(SCENARIO, "all", "10.0.0.5").await;

    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert_eq!(record.block_count, 2);

    tokio::time::sleep(Duration::from_millis(500)).await;

    // Only the replacement fired; the superseded timer was cancelled.
    assert_eq!(h.reversals().len(), 1);
    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert_eq!(record.blocked_at, 0);
}

#[tokio::test]
async fn test_new_episode_after_reversal_can_fire_again() {
    let h = build(scenario(1, Duration::from_millis(50), None));

    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // After reversal the record is back to IDLE; a fresh event starts a
    // new episode with an escalated cooldown.
    h.engine.handle_event(SCENARIO, &event("10.0.0.5")).await;
    let record = h.store.get_or_create("10.0.0.5").unwrap();
    assert!(record.is_blocked());
    assert_eq!(record.block_count, 2);
    assert_eq!(h.applies().len(), 6);
}
