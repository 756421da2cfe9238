//! Configuration loading and management.
//!
//! blockwarden configuration is stored in TOML format: the record store
//! path, the response scenarios, actioner settings, and Slack notifier
//! credentials.

pub mod settings;

pub use settings::WardenConfig;
