//! Slack prompt delivery via `chat.postMessage` / `chat.update`.
//!
//! Choices are rendered as interactive attachment buttons; the message
//! timestamp (`ts`) Slack returns is the prompt handle used for updates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Notify, PromptChoice, PromptHandle};
use crate::config::settings::SlackSettings;
use crate::error::{Result, WardenError};

/// Callback id attached to prompts so the callback surface can recognize
/// remediation choices.
pub const CALLBACK_ID: &str = "block_ip_action";

pub struct SlackNotifier {
    client: reqwest::Client,
    settings: SlackSettings,
}

#[derive(Debug, Serialize)]
struct SlackAction {
    name: String,
    text: String,
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    text: String,
    callback_id: String,
    actions: Vec<SlackAction>,
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct UpdateMessage<'a> {
    channel: &'a str,
    ts: &'a str,
    text: &'a str,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(settings: SlackSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    async fn call<T: Serialize>(&self, method: &str, payload: &T) -> Result<SlackResponse> {
        let url = format!("{}/{}", self.settings.api_base, method);
        let response: SlackResponse = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.bot_token)
            .json(payload)
            .send()
            .await?
            .json()
            .await?;
        if !response.ok {
            let reason = response.error.unwrap_or_else(|| "unknown".to_string());
            return Err(WardenError::Notifier(format!("{method} failed: {reason}")));
        }
        Ok(response)
    }

    fn buttons(choices: &[PromptChoice]) -> Vec<SlackAction> {
        choices
            .iter()
            .map(|choice| SlackAction {
                name: choice.label.clone(),
                text: choice.label.clone(),
                kind: "button".to_string(),
                value: choice.value.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl Notify for SlackNotifier {
    async fn send_prompt(&self, text: &str, choices: &[PromptChoice]) -> Result<PromptHandle> {
        let payload = PostMessage {
            channel: &self.settings.channel,
            text,
            attachments: vec![SlackAttachment {
                text: "Choose an action:".to_string(),
                callback_id: CALLBACK_ID.to_string(),
                actions: Self::buttons(choices),
            }],
        };
        let response = self.call("chat.postMessage", &payload).await?;
        let ts = response
            .ts
            .ok_or_else(|| WardenError::Notifier("chat.postMessage returned no ts".to_string()))?;
        debug!(ts = %ts, "slack prompt delivered");
        Ok(PromptHandle(ts))
    }

    async fn update_prompt(&self, handle: &PromptHandle, text: &str) -> Result<()> {
        let payload = UpdateMessage {
            channel: &self.settings.channel,
            ts: &handle.0,
            text,
            // Clearing the attachments removes the buttons.
            attachments: Vec::new(),
        };
        self.call("chat.update", &payload).await?;
        debug!(ts = %handle.0, "slack prompt updated");
        Ok(())
    }
}
