//! Slack delivery: per-recipient posts through the Web API when a bot token
//! is configured, or the incoming webhook otherwise.

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::config::SlackPlatformConfig;

const CHAT_POST_MESSAGE: &str = "https://slack.com/api/chat.postMessage";

/// Transport seam so fan-out can be exercised without a Slack workspace.
#[async_trait]
pub trait SlackTransport: Send + Sync {
    async fn send_direct(
        &self,
        config: &SlackPlatformConfig,
        slack_id: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;
}

pub struct HttpSlackTransport {
    client: reqwest::Client,
}

impl HttpSlackTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .expect("failed to build Slack HTTP client"),
        }
    }
}

impl Default for HttpSlackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlackTransport for HttpSlackTransport {
    #[instrument(skip(self, config, payload))]
    async fn send_direct(
        &self,
        config: &SlackPlatformConfig,
        slack_id: &str,
        mut payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        let response = if !config.bot_token.is_empty() {
            payload["channel"] = serde_json::Value::String(slack_id.to_string());
            self.client
                .post(CHAT_POST_MESSAGE)
                .bearer_auth(&config.bot_token)
                .json(&payload)
                .send()
                .await?
        } else if !config.webhook_url.is_empty() {
            self.client.post(&config.webhook_url).json(&payload).send().await?
        } else {
            anyhow::bail!("slack platform has neither bot token nor webhook URL");
        };

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("slack delivery failed with status {status}");
        }

        // The Web API reports errors inside a 200 response.
        if !config.bot_token.is_empty() {
            let body: serde_json::Value = response.json().await?;
            if !body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
                let error = body
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error");
                anyhow::bail!("slack API error: {error}");
            }
        }

        debug!(slack_id, "slack message delivered");
        Ok(())
    }
}
