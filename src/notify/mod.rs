//! Notification dispatch: platform-grouped fan-out of alert events to
//! resolved recipients.
//!
//! Fan-out is concurrent across platforms and sequential within a platform,
//! preserving per-user ordering in the transports. The hub's notifier topic
//! always sees the event, whatever the transports do.

pub mod config;
pub mod email;
pub mod slack;
pub mod template;

use std::sync::Arc;

use tracing::{error, instrument, warn};

use crate::broadcast::Hub;
use crate::model::{AlertEvent, Recipient, RecipientBundle};
use crate::recipients::group_by_platform;

use crate::checkers::agent::AgentClient;
use config::NotificationConfigManager;
use email::{EmailTransport, SmtpEmailTransport};
use slack::{HttpSlackTransport, SlackTransport};
use template::{email_subject, render_email, render_process_table, render_slack, TemplateContext};

const DEFAULT_CONSOLE_URL: &str = "http://localhost:2345/console/";

pub struct Dispatcher {
    configs: Arc<NotificationConfigManager>,
    email: Arc<dyn EmailTransport>,
    slack: Arc<dyn SlackTransport>,
    hub: Arc<Hub>,
    agent: AgentClient,
    console_url: String,
}

impl Dispatcher {
    pub fn new(configs: Arc<NotificationConfigManager>, hub: Arc<Hub>) -> Self {
        Self::with_transports(
            configs,
            hub,
            Arc::new(SmtpEmailTransport),
            Arc::new(HttpSlackTransport::new()),
        )
    }

    pub fn with_transports(
        configs: Arc<NotificationConfigManager>,
        hub: Arc<Hub>,
        email: Arc<dyn EmailTransport>,
        slack: Arc<dyn SlackTransport>,
    ) -> Self {
        Self {
            configs,
            email,
            slack,
            hub,
            agent: AgentClient::new(),
            console_url: DEFAULT_CONSOLE_URL.to_string(),
        }
    }

    /// Deliver one event to one recipient bundle. Returns aggregate success:
    /// true iff zero per-recipient errors occurred across enabled platforms.
    #[instrument(skip(self, event, bundle), fields(service = %event.service_name))]
    pub async fn dispatch(&self, event: &AlertEvent, bundle: Option<&RecipientBundle>) -> bool {
        // Dashboards see the event even if every transport fails.
        self.hub.publish_alert(event);

        let Some(bundle) = bundle else {
            warn!(service = %event.service_name, "no recipients resolved, skipping fan-out");
            return true;
        };

        let configs = match self.configs.get().await {
            Ok(configs) => configs,
            Err(e) => {
                error!("notification platform configuration unavailable: {e:#}");
                return false;
            }
        };

        let groups = group_by_platform(bundle);
        let mut error_count = 0usize;

        let email_group: Vec<&Recipient> = groups
            .iter()
            .filter(|(platform, _)| platform.eq_ignore_ascii_case("email"))
            .flat_map(|(_, users)| users.iter().copied())
            .collect();
        let slack_group: Vec<&Recipient> = groups
            .iter()
            .filter(|(platform, _)| platform.eq_ignore_ascii_case("slack"))
            .flat_map(|(_, users)| users.iter().copied())
            .collect();

        for (platform, users) in &groups {
            if !platform.eq_ignore_ascii_case("email") && !platform.eq_ignore_ascii_case("slack") {
                error!(platform = %platform, recipients = users.len(), "unknown notification platform");
                error_count += 1;
            }
        }

        let email_errors = self.deliver_email(event, &email_group, configs.email.as_ref());
        let slack_errors = self.deliver_slack(event, &slack_group, configs.slack.as_ref());

        let (email_errors, slack_errors) = tokio::join!(email_errors, slack_errors);
        error_count += email_errors + slack_errors;

        error_count == 0
    }

    /// One rendered section per recipient, collated into a single envelope
    /// addressed to the whole batch. One transport error fails the platform
    /// for this event.
    async fn deliver_email(
        &self,
        event: &AlertEvent,
        recipients: &[&Recipient],
        config: Option<&config::EmailPlatformConfig>,
    ) -> usize {
        if recipients.is_empty() {
            return 0;
        }

        let Some(config) = config.filter(|c| c.enabled) else {
            warn!("email platform not enabled, skipping {} recipients", recipients.len());
            return 0;
        };

        let addresses: Vec<String> = recipients
            .iter()
            .filter(|r| !r.email.is_empty())
            .map(|r| r.email.clone())
            .collect();

        let mut body: String = recipients
            .iter()
            .map(|recipient| {
                let ctx = TemplateContext::for_recipient(event, &recipient.user_name, &self.console_url);
                render_email(&ctx)
            })
            .collect();

        // Agent-backed services get a snapshot of the heaviest processes,
        // pulled through the stateless agent query capability.
        if let Some(base_url) = &event.agent_api_base_url {
            match self.agent.fetch_resource_usage(base_url, 5).await {
                Ok(processes) => body.push_str(&render_process_table(&processes)),
                Err(e) => warn!("could not fetch process table for alert email: {e:?}"),
            }
        }

        match self
            .email
            .send_batch(config, &addresses, &email_subject(event), body)
            .await
        {
            Ok(()) => 0,
            Err(e) => {
                error!("email delivery failed for {}: {e:#}", event.service_name);
                1
            }
        }
    }

    /// Sequential per-recipient posts; an error for one recipient does not
    /// stop the others.
    async fn deliver_slack(
        &self,
        event: &AlertEvent,
        recipients: &[&Recipient],
        config: Option<&config::SlackPlatformConfig>,
    ) -> usize {
        if recipients.is_empty() {
            return 0;
        }

        let Some(config) = config.filter(|c| c.enabled) else {
            warn!("slack platform not enabled, skipping {} recipients", recipients.len());
            return 0;
        };

        let mut errors = 0;
        for recipient in recipients {
            if recipient.slack_id.is_empty() {
                warn!(user = %recipient.user_name, "recipient has no slack id");
                errors += 1;
                continue;
            }

            let ctx = TemplateContext::for_recipient(event, &recipient.user_name, &self.console_url);
            let payload = render_slack(&ctx);

            if let Err(e) = self.slack.send_direct(config, &recipient.slack_id, payload).await {
                error!(user = %recipient.user_name, "slack delivery failed: {e:#}");
                errors += 1;
            }
        }

        errors
    }
}
