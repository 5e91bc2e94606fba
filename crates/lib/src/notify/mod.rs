//! Notification dispatch: email, Slack, Teams, and generic webhooks.
//!
//! Channel enablement is decided per channel with form-level settings taking
//! priority over the plugin-level fallbacks. Sends run concurrently and are
//! best-effort: a failed channel (or a failed address within the email
//! channel) is logged and never blocks the others or the caller. At most one
//! attempt per channel per submission, no retry.

mod email;
mod webhook;

pub use email::{build_email_body, notification_subject, LogMailer, Mailer};
pub use webhook::{
    generic_payload, slack_payload, teams_payload, HttpWebhookSender, WebhookSender,
    ACCENT_COLOR,
};

use crate::config::NotifySettings;
use crate::forms::{FormDefinition, Submission};
use std::sync::Arc;

/// Fans a stored submission out to the enabled channels.
pub struct NotificationDispatcher {
    settings: NotifySettings,
    mailer: Arc<dyn Mailer>,
    webhooks: Arc<dyn WebhookSender>,
}

impl NotificationDispatcher {
    pub fn new(
        settings: NotifySettings,
        mailer: Arc<dyn Mailer>,
        webhooks: Arc<dyn WebhookSender>,
    ) -> Self {
        Self {
            settings,
            mailer,
            webhooks,
        }
    }

    /// Send all enabled notifications for a submission. Never fails; every
    /// channel error is logged here.
    pub async fn dispatch(&self, submission: &Submission, form: &FormDefinition) {
        let email = self.send_emails(submission, form);
        let slack = self.send_channel(
            "slack",
            resolve_channel_url(
                form.notifications.enable_slack,
                &form.notifications.slack_webhook_url,
                self.settings.enable_slack,
                &self.settings.slack_webhook_url,
            ),
            slack_payload(submission, form),
        );
        let teams = self.send_channel(
            "teams",
            resolve_channel_url(
                form.notifications.enable_teams,
                &form.notifications.teams_webhook_url,
                self.settings.enable_teams,
                &self.settings.teams_webhook_url,
            ),
            teams_payload(submission, form),
        );
        let generic = self.send_channel(
            "webhook",
            resolve_channel_url(
                form.notifications.enable_webhook,
                &form.notifications.webhook_url,
                self.settings.enable_webhooks,
                &self.settings.webhook_url,
            ),
            generic_payload(submission, form),
        );
        tokio::join!(email, slack, teams, generic);
    }

    /// Email channel: form-level recipients first, plugin-level fallback when
    /// the form list resolves empty. One independent send per address.
    async fn send_emails(&self, submission: &Submission, form: &FormDefinition) {
        if !form.notifications.enable_notifications && !self.settings.enable_email_notifications {
            return;
        }
        let mut recipients = if form.notifications.enable_notifications {
            form.notification_emails()
        } else {
            Vec::new()
        };
        if recipients.is_empty() {
            recipients = self.settings.notification_emails();
        }
        if recipients.is_empty() {
            log::debug!("no notification recipients for form \"{}\"", form.handle);
            return;
        }
        let subject = notification_subject(form);
        let body = build_email_body(form, submission);
        let sends = recipients.iter().map(|to| {
            let mailer = self.mailer.clone();
            let subject = subject.clone();
            let body = body.clone();
            async move {
                if let Err(e) = mailer.send(to, &subject, &body).await {
                    log::error!("failed to send notification email to {}: {}", to, e);
                }
            }
        });
        futures_util::future::join_all(sends).await;
    }

    async fn send_channel(
        &self,
        channel: &str,
        url: Option<String>,
        payload: serde_json::Value,
    ) {
        let Some(url) = url else {
            return;
        };
        if let Err(e) = self.webhooks.post_json(&url, &payload).await {
            log::error!("{} notification failed: {}", channel, e);
        }
    }
}

/// Channel URL precedence: the form URL when the form enables the channel
/// and its URL is non-empty; otherwise the plugin URL when the plugin
/// enables the channel. An empty resolved URL means skip. The plugin level
/// deliberately has no separate non-empty check beyond that final filter,
/// matching the documented behavior.
fn resolve_channel_url(
    form_enabled: bool,
    form_url: &str,
    plugin_enabled: bool,
    plugin_url: &str,
) -> Option<String> {
    let resolved = if form_enabled && !form_url.trim().is_empty() {
        form_url.trim()
    } else if plugin_enabled {
        plugin_url.trim()
    } else {
        ""
    };
    if resolved.is_empty() {
        None
    } else {
        Some(resolved.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingMailer {
        sent: Mutex<Vec<String>>,
        fail_for: Option<String>,
    }

    impl RecordingMailer {
        fn new(fail_for: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail_for: fail_for.map(str::to_string),
            })
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, _subject: &str, _html_body: &str) -> Result<(), String> {
            self.sent.lock().unwrap().push(to.to_string());
            if self.fail_for.as_deref() == Some(to) {
                return Err("simulated transport error".to_string());
            }
            Ok(())
        }
    }

    struct RecordingSender {
        posts: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl RecordingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                posts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl WebhookSender for RecordingSender {
        async fn post_json(&self, url: &str, payload: &serde_json::Value) -> Result<(), String> {
            self.posts
                .lock()
                .unwrap()
                .push((url.to_string(), payload.clone()));
            Ok(())
        }
    }

    fn fixture() -> (FormDefinition, Submission) {
        let form = FormDefinition {
            id: 1,
            name: "Contact".to_string(),
            handle: "contact".to_string(),
            success_message: None,
            notifications: Default::default(),
            questions: vec![],
        };
        let mut data = serde_json::Map::new();
        data.insert("name".to_string(), serde_json::json!("Alice"));
        let submission = Submission {
            id: 1,
            form_id: 1,
            data,
            user_agent: None,
            ip_address: None,
            created_at: chrono::Utc::now(),
        };
        (form, submission)
    }

    #[test]
    fn form_url_wins_when_enabled_and_non_empty() {
        assert_eq!(
            resolve_channel_url(true, "https://form.example", true, "https://plugin.example"),
            Some("https://form.example".to_string())
        );
    }

    #[test]
    fn empty_form_url_falls_through_to_plugin() {
        assert_eq!(
            resolve_channel_url(true, "", true, "https://plugin.example"),
            Some("https://plugin.example".to_string())
        );
        assert_eq!(resolve_channel_url(true, "", false, "https://plugin.example"), None);
    }

    #[test]
    fn disabled_everywhere_resolves_to_none() {
        assert_eq!(resolve_channel_url(false, "https://form.example", false, ""), None);
        assert_eq!(resolve_channel_url(true, "", true, ""), None);
    }

    #[tokio::test]
    async fn slack_falls_back_to_plugin_url_when_form_url_empty() {
        let (mut form, submission) = fixture();
        form.notifications.enable_slack = true;
        form.notifications.slack_webhook_url = String::new();
        let settings = NotifySettings {
            enable_slack: true,
            slack_webhook_url: "https://hooks.slack.example/T123".to_string(),
            enable_email_notifications: false,
            ..Default::default()
        };
        let sender = RecordingSender::new();
        let dispatcher = NotificationDispatcher::new(
            settings,
            RecordingMailer::new(None),
            sender.clone(),
        );
        dispatcher.dispatch(&submission, &form).await;
        let posts = sender.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "https://hooks.slack.example/T123");
        assert_eq!(posts[0].1["attachments"][0]["title"], "Contact");
    }

    #[tokio::test]
    async fn one_failed_address_does_not_block_the_others() {
        let (mut form, submission) = fixture();
        form.notifications.notification_emails =
            "a@example.com\nb@example.com, c@example.com".to_string();
        let mailer = RecordingMailer::new(Some("b@example.com"));
        let dispatcher = NotificationDispatcher::new(
            NotifySettings::default(),
            mailer.clone(),
            RecordingSender::new(),
        );
        dispatcher.dispatch(&submission, &form).await;
        let mut sent = mailer.sent.lock().unwrap().clone();
        sent.sort();
        assert_eq!(sent, vec!["a@example.com", "b@example.com", "c@example.com"]);
    }

    #[tokio::test]
    async fn form_disabled_email_falls_back_to_plugin_recipients() {
        let (mut form, submission) = fixture();
        form.notifications.enable_notifications = false;
        form.notifications.notification_emails = "ignored@example.com".to_string();
        let settings = NotifySettings {
            default_notification_email: "owner@example.com".to_string(),
            ..Default::default()
        };
        let mailer = RecordingMailer::new(None);
        let dispatcher = NotificationDispatcher::new(
            settings,
            mailer.clone(),
            RecordingSender::new(),
        );
        dispatcher.dispatch(&submission, &form).await;
        assert_eq!(*mailer.sent.lock().unwrap(), vec!["owner@example.com"]);
    }

    #[tokio::test]
    async fn all_channels_fire_independently() {
        let (mut form, submission) = fixture();
        form.notifications.enable_slack = true;
        form.notifications.slack_webhook_url = "https://slack.example".to_string();
        form.notifications.enable_teams = true;
        form.notifications.teams_webhook_url = "https://teams.example".to_string();
        form.notifications.enable_webhook = true;
        form.notifications.webhook_url = "https://hooks.example".to_string();
        form.notifications.enable_notifications = false;
        let settings = NotifySettings {
            enable_email_notifications: false,
            ..Default::default()
        };
        let sender = RecordingSender::new();
        let dispatcher = NotificationDispatcher::new(
            settings,
            RecordingMailer::new(None),
            sender.clone(),
        );
        dispatcher.dispatch(&submission, &form).await;
        let posts = sender.posts.lock().unwrap();
        let urls: Vec<&str> = posts.iter().map(|(u, _)| u.as_str()).collect();
        assert!(urls.contains(&"https://slack.example"));
        assert!(urls.contains(&"https://teams.example"));
        assert!(urls.contains(&"https://hooks.example"));
    }
}
