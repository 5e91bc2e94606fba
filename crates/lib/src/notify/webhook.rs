//! Webhook sending and channel payloads (Slack, Teams, generic).

use crate::forms::{answer_to_string, humanize_field_name, FormDefinition, Submission};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Attachment/theme color for Slack and Teams cards.
pub const ACCENT_COLOR: &str = "#584998";

/// Slack marks a field "short" (half-width) below this stringified length.
const SLACK_SHORT_FIELD_MAX: usize = 40;

/// Outbound webhook POST. Implementations own their timeouts; failures come
/// back as strings for the dispatcher to log.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn post_json(&self, url: &str, payload: &Value) -> Result<(), String>;
}

/// reqwest-backed sender: 10 s request timeout, 5 s connect timeout, JSON body.
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl Default for HttpWebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpWebhookSender {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("Talkform/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn post_json(&self, url: &str, payload: &Value) -> Result<(), String> {
        let res = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(format!("webhook request failed: {}", status));
        }
        Ok(())
    }
}

/// Slack incoming-webhook payload: one attachment with a field per answer.
pub fn slack_payload(submission: &Submission, form: &FormDefinition) -> Value {
    let fields: Vec<Value> = submission
        .data
        .iter()
        .map(|(key, value)| {
            let text = answer_to_string(value);
            json!({
                "title": humanize_field_name(key),
                "value": text,
                "short": text.len() < SLACK_SHORT_FIELD_MAX,
            })
        })
        .collect();

    json!({
        "text": "New Talkform Submission",
        "attachments": [
            {
                "color": ACCENT_COLOR,
                "title": form.name,
                "fields": fields,
                "footer": "Talkform",
                "ts": submission.created_at.timestamp(),
            }
        ]
    })
}

/// Teams MessageCard payload: one section with a fact per answer.
pub fn teams_payload(submission: &Submission, form: &FormDefinition) -> Value {
    let facts: Vec<Value> = submission
        .data
        .iter()
        .map(|(key, value)| {
            json!({
                "name": humanize_field_name(key),
                "value": answer_to_string(value),
            })
        })
        .collect();

    json!({
        "@type": "MessageCard",
        "@context": "https://schema.org/extensions",
        "summary": "New Talkform Submission",
        "themeColor": ACCENT_COLOR.trim_start_matches('#'),
        "title": "New Talkform Submission",
        "sections": [
            {
                "activityTitle": form.name,
                "activitySubtitle": submission
                    .created_at
                    .format("%B %-d, %Y %-I:%M %p")
                    .to_string(),
                "facts": facts,
            }
        ]
    })
}

/// Generic webhook payload: form identity plus the full submission.
pub fn generic_payload(submission: &Submission, form: &FormDefinition) -> Value {
    json!({
        "form": {
            "id": form.id,
            "name": form.name,
            "handle": form.handle,
        },
        "submission": {
            "id": submission.id,
            "data": submission.data,
            "dateCreated": submission.created_at.to_rfc3339(),
            "ipAddress": submission.ip_address,
            "userAgent": submission.user_agent,
        }
    })
}
