//! Notification platform configuration: loaded once at startup from the
//! store, invalidated and reloaded on explicit request.

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::config::EnvConfig;
use crate::storage::MonitorStore;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailPlatformConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub smtp_server: String,
    #[serde(default)]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub use_tls: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackPlatformConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub default_user: String,
}

#[derive(Debug, Clone, Default)]
pub struct PlatformConfigs {
    pub email: Option<EmailPlatformConfig>,
    pub slack: Option<SlackPlatformConfig>,
}

impl PlatformConfigs {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(email) = self.email.as_ref().filter(|c| c.enabled) {
            if email.smtp_server.is_empty() || email.smtp_port == 0 {
                anyhow::bail!("invalid email configuration: SMTP server and port are required");
            }
        }

        if let Some(slack) = self.slack.as_ref().filter(|c| c.enabled) {
            if slack.webhook_url.is_empty() && slack.bot_token.is_empty() {
                anyhow::bail!(
                    "invalid Slack configuration: either webhook URL or bot token is required"
                );
            }
        }

        Ok(())
    }
}

/// Caches the loaded platform configs; `invalidate` forces the next `get`
/// to reload from the store.
pub struct NotificationConfigManager {
    store: std::sync::Arc<dyn MonitorStore>,
    secrets: SecretOverrides,
    cached: RwLock<Option<PlatformConfigs>>,
}

/// Secret material sourced from the environment on top of stored configs.
#[derive(Debug, Clone, Default)]
pub struct SecretOverrides {
    pub smtp_password: Option<String>,
    pub slack_bot_token: Option<String>,
}

impl From<&EnvConfig> for SecretOverrides {
    fn from(env: &EnvConfig) -> Self {
        Self {
            smtp_password: env.smtp_password.clone(),
            slack_bot_token: env.slack_bot_token.clone(),
        }
    }
}

impl NotificationConfigManager {
    pub fn new(store: std::sync::Arc<dyn MonitorStore>, secrets: SecretOverrides) -> Self {
        Self {
            store,
            secrets,
            cached: RwLock::new(None),
        }
    }

    /// Current configs, loading from the store on first use.
    pub async fn get(&self) -> anyhow::Result<PlatformConfigs> {
        if let Some(configs) = self.cached.read().await.as_ref() {
            return Ok(configs.clone());
        }
        self.reload().await
    }

    /// Drop the cache; the next `get` reloads.
    pub async fn invalidate(&self) {
        info!("notification platform configuration invalidated");
        *self.cached.write().await = None;
    }

    #[instrument(skip(self))]
    pub async fn reload(&self) -> anyhow::Result<PlatformConfigs> {
        let rows = self.store.load_notification_platforms().await?;
        let mut configs = PlatformConfigs::default();

        // The platform is identified by a substring of the row name.
        for (name, raw) in rows {
            if name.contains("Email") {
                match serde_json::from_str::<EmailPlatformConfig>(&raw) {
                    Ok(mut email) => {
                        if let Some(password) = &self.secrets.smtp_password {
                            email.password = password.clone();
                        }
                        configs.email = Some(email);
                    }
                    Err(e) => warn!(row = %name, "could not parse email config: {e}"),
                }
            } else if name.contains("Slack") {
                match serde_json::from_str::<SlackPlatformConfig>(&raw) {
                    Ok(mut slack) => {
                        if let Some(token) = &self.secrets.slack_bot_token {
                            slack.bot_token = token.clone();
                        }
                        configs.slack = Some(slack);
                    }
                    Err(e) => warn!(row = %name, "could not parse slack config: {e}"),
                }
            } else {
                warn!(row = %name, "unknown notification platform row");
            }
        }

        configs.validate()?;
        *self.cached.write().await = Some(configs.clone());
        Ok(configs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn email_row(enabled: bool) -> (String, String) {
        (
            "Email Notifications".to_string(),
            serde_json::json!({
                "enabled": enabled,
                "name": "email",
                "smtp_server": "smtp.example.test",
                "smtp_port": 587,
                "username": "monitor",
                "password": "stored-secret",
                "from_address": "monitor@example.test",
                "use_tls": true
            })
            .to_string(),
        )
    }

    fn slack_row() -> (String, String) {
        (
            "Slack Workspace".to_string(),
            serde_json::json!({
                "enabled": true,
                "name": "slack",
                "webhook_url": "https://hooks.slack.example.test/T000/B000"
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn test_load_and_cache() {
        let store = Arc::new(MemoryStore::new());
        store.seed_platforms(vec![email_row(true), slack_row()]).await;

        let manager = NotificationConfigManager::new(store.clone(), SecretOverrides::default());
        let configs = manager.get().await.unwrap();

        assert!(configs.email.as_ref().unwrap().enabled);
        assert_eq!(configs.email.unwrap().smtp_port, 587);
        assert!(configs.slack.is_some());

        // Cached: changing the store has no effect until invalidation.
        store.seed_platforms(vec![]).await;
        assert!(manager.get().await.unwrap().email.is_some());

        manager.invalidate().await;
        assert!(manager.get().await.unwrap().email.is_none());
    }

    #[tokio::test]
    async fn test_env_secret_overrides() {
        let store = Arc::new(MemoryStore::new());
        store.seed_platforms(vec![email_row(true)]).await;

        let secrets = SecretOverrides {
            smtp_password: Some("env-secret".to_string()),
            slack_bot_token: None,
        };
        let manager = NotificationConfigManager::new(store, secrets);

        let configs = manager.get().await.unwrap();
        assert_eq!(configs.email.unwrap().password, "env-secret");
    }

    #[tokio::test]
    async fn test_enabled_email_without_server_fails_validation() {
        let store = Arc::new(MemoryStore::new());
        store
            .seed_platforms(vec![(
                "Email".to_string(),
                serde_json::json!({"enabled": true}).to_string(),
            )])
            .await;

        let manager = NotificationConfigManager::new(store, SecretOverrides::default());
        assert!(manager.get().await.is_err());
    }
}
