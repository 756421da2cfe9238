//! Interactive prompt delivery.
//!
//! The engine needs exactly two capabilities from a notification channel:
//! post a prompt with named choices, and later rewrite that prompt's text
//! (after a human choice or an automatic fallback).

pub mod slack;

use async_trait::async_trait;

use crate::error::Result;

pub use slack::SlackNotifier;

/// Opaque handle identifying a delivered prompt for later mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptHandle(pub String);

/// A single selectable choice attached to a prompt.
#[derive(Debug, Clone)]
pub struct PromptChoice {
    pub label: String,
    pub value: String,
}

#[async_trait]
pub trait Notify: Send + Sync {
    async fn send_prompt(&self, text: &str, choices: &[PromptChoice]) -> Result<PromptHandle>;
    async fn update_prompt(&self, handle: &PromptHandle, text: &str) -> Result<()>;
}
