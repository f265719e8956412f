//! Fixed template vocabulary for outgoing notifications.

use chrono::{DateTime, Utc};

use crate::model::{AlertEvent, AlertSeverity};

/// Values substituted into the alert templates.
pub struct TemplateContext<'a> {
    pub user_name: &'a str,
    pub service_name: &'a str,
    pub message: &'a str,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    pub action_url: &'a str,
}

impl<'a> TemplateContext<'a> {
    pub fn for_recipient(event: &'a AlertEvent, user_name: &'a str, action_url: &'a str) -> Self {
        Self {
            user_name,
            service_name: &event.service_name,
            message: &event.message,
            severity: event.severity,
            timestamp: event.timestamp,
            action_url,
        }
    }
}

pub fn email_subject(event: &AlertEvent) -> String {
    format!(
        "[{}] Service Alert: {}",
        event.severity.to_string().to_uppercase(),
        event.service_name
    )
}

/// One rendered email section per recipient; sections are collated into a
/// single envelope body by the dispatcher.
pub fn render_email(ctx: &TemplateContext<'_>) -> String {
    let accent = match ctx.severity {
        AlertSeverity::Warning => "#e67e22",
        AlertSeverity::Critical => "#e74c3c",
    };

    format!(
        concat!(
            "<div style=\"font-family: sans-serif; border-left: 4px solid {accent}; padding: 12px;\">",
            "<p>Hello {user},</p>",
            "<p>Service <strong>{service}</strong> requires attention.</p>",
            "<p>{message}</p>",
            "<p><small>{timestamp}</small></p>",
            "<p><a href=\"{action_url}\">Open the monitoring console</a></p>",
            "</div>"
        ),
        accent = accent,
        user = ctx.user_name,
        service = ctx.service_name,
        message = ctx.message,
        timestamp = ctx.timestamp.to_rfc3339(),
        action_url = ctx.action_url,
    )
}

/// Top-processes table appended to alert emails for agent-backed services.
pub fn render_process_table(processes: &[crate::checkers::agent::ProcessResourceUsage]) -> String {
    if processes.is_empty() {
        return String::new();
    }

    let rows: String = processes
        .iter()
        .map(|p| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{:.1}%</td><td>{:.1}%</td></tr>",
                p.name, p.pid, p.cpu_percent, p.memory_percent
            )
        })
        .collect();

    format!(
        concat!(
            "<table style=\"border-collapse: collapse; font-family: monospace;\">",
            "<tr><th>Process</th><th>PID</th><th>CPU</th><th>Memory</th></tr>",
            "{rows}",
            "</table>"
        ),
        rows = rows
    )
}

/// Slack block-kit payload for one recipient.
pub fn render_slack(ctx: &TemplateContext<'_>) -> serde_json::Value {
    let emoji = match ctx.severity {
        AlertSeverity::Warning => ":warning:",
        AlertSeverity::Critical => ":rotating_light:",
    };

    serde_json::json!({
        "text": format!("{emoji} {} alert for {}", ctx.severity, ctx.service_name),
        "blocks": [
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        "{emoji} *{}* — `{}`\n{}\n_{}_",
                        ctx.severity, ctx.service_name, ctx.message, ctx.timestamp.to_rfc3339()
                    )
                }
            },
            {
                "type": "actions",
                "elements": [{
                    "type": "button",
                    "text": {"type": "plain_text", "text": "Open console"},
                    "url": ctx.action_url
                }]
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceKind;
    use uuid::Uuid;

    fn event() -> AlertEvent {
        AlertEvent {
            system_monitor_id: Uuid::new_v4(),
            service_name: "api-prod".to_string(),
            device: DeviceKind::WebModule,
            message: "4 consecutive failures".to_string(),
            severity: AlertSeverity::Critical,
            timestamp: Utc::now(),
            agent_api_base_url: None,
        }
    }

    #[test]
    fn test_email_substitutions() {
        let event = event();
        let ctx = TemplateContext::for_recipient(&event, "alice", "https://console.example.test");
        let body = render_email(&ctx);

        assert!(body.contains("Hello alice"));
        assert!(body.contains("api-prod"));
        assert!(body.contains("4 consecutive failures"));
        assert!(body.contains("https://console.example.test"));
    }

    #[test]
    fn test_subject_carries_severity() {
        assert!(email_subject(&event()).contains("[CRITICAL]"));
    }

    #[test]
    fn test_slack_payload_shape() {
        let event = event();
        let ctx = TemplateContext::for_recipient(&event, "alice", "https://console.example.test");
        let payload = render_slack(&ctx);

        assert!(payload["text"].as_str().unwrap().contains("api-prod"));
        assert_eq!(payload["blocks"].as_array().unwrap().len(), 2);
    }
}
