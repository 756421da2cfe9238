//! # blockwarden-core
//!
//! Core state machine for blockwarden -- an automated incident-remediation
//! engine. Security events tagged `(rule, ip)` accumulate a debounced
//! per-IP trigger count; at a scenario's threshold the engine either asks
//! a human which remediation to run (with an automatic full-remediation
//! fallback on timeout) or remediates immediately, then reverses the block
//! after a cooldown that escalates with repeat offenses.
//!
//! This crate defines the engine itself plus the capability seams it
//! drives: the record store, the actioner registry, and the notifier.

pub mod actioner;
pub mod config;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod store;
