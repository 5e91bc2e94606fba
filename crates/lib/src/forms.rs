//! Form, question, and submission models.
//!
//! Forms hold an ordered list of questions; submissions hold the collected
//! answers keyed by field name. Structural fields (field type, field name,
//! required, sort order) are locale-independent; question content (text,
//! placeholder, skip text, options) may carry per-locale variants.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Question input kinds. `Textarea` collapses to a plain text input in the
/// conversational client; `Buttons` presents a fixed option set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Email,
    Tel,
    Textarea,
    Buttons,
    Date,
}

impl Default for FieldType {
    fn default() -> Self {
        FieldType::Text
    }
}

impl FieldType {
    /// True when the question is answered by picking an option rather than typing.
    pub fn is_buttons(&self) -> bool {
        matches!(self, FieldType::Buttons)
    }
}

/// A button option: either a plain string (label doubles as value) or an
/// explicit label/value pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ButtonOption {
    Plain(String),
    Labeled {
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
}

impl ButtonOption {
    pub fn label(&self) -> &str {
        match self {
            ButtonOption::Plain(s) => s,
            ButtonOption::Labeled { label, .. } => label,
        }
    }

    /// Stored value; falls back to the label when no explicit value is set.
    pub fn value(&self) -> &str {
        match self {
            ButtonOption::Plain(s) => s,
            ButtonOption::Labeled { label, value } => value.as_deref().unwrap_or(label),
        }
    }
}

/// Locale-dependent question content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionContent {
    pub question_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_text: Option<String>,
    /// Only meaningful for `buttons` questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<ButtonOption>>,
}

/// One step of a conversational form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDefinition {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub field_type: FieldType,
    pub field_name: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub sort_order: i32,
    /// Default-locale content.
    #[serde(flatten)]
    pub content: QuestionContent,
    /// Per-locale content overrides, keyed by locale id (e.g. "nl").
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub localized: BTreeMap<String, QuestionContent>,
}

fn default_required() -> bool {
    true
}

impl QuestionDefinition {
    /// Content for a locale, falling back to the default content.
    pub fn content_for(&self, locale: Option<&str>) -> &QuestionContent {
        locale
            .and_then(|l| self.localized.get(l))
            .unwrap_or(&self.content)
    }
}

/// Per-form notification settings. Form-level settings take priority over
/// the plugin-level fallbacks in [`crate::config::NotifySettings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormNotifications {
    /// Newline- or comma-separated recipient list.
    #[serde(default)]
    pub notification_emails: String,
    #[serde(default = "default_enable_notifications")]
    pub enable_notifications: bool,
    #[serde(default)]
    pub enable_slack: bool,
    #[serde(default)]
    pub slack_webhook_url: String,
    #[serde(default)]
    pub enable_teams: bool,
    #[serde(default)]
    pub teams_webhook_url: String,
    #[serde(default)]
    pub enable_webhook: bool,
    #[serde(default)]
    pub webhook_url: String,
}

fn default_enable_notifications() -> bool {
    true
}

impl Default for FormNotifications {
    fn default() -> Self {
        Self {
            notification_emails: String::new(),
            enable_notifications: true,
            enable_slack: false,
            slack_webhook_url: String::new(),
            enable_teams: false,
            teams_webhook_url: String::new(),
            enable_webhook: false,
            webhook_url: String::new(),
        }
    }
}

/// A conversational form: unique handle, questions ordered by sort order,
/// and notification config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDefinition {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_message: Option<String>,
    #[serde(default)]
    pub notifications: FormNotifications,
    #[serde(default)]
    pub questions: Vec<QuestionDefinition>,
}

impl FormDefinition {
    /// Recipient addresses from the form-level list: split on newlines, then
    /// commas; trimmed, empties dropped, duplicates removed (order kept).
    pub fn notification_emails(&self) -> Vec<String> {
        let mut emails: Vec<String> = Vec::new();
        for line in self.notifications.notification_emails.lines() {
            for part in line.split(',') {
                let email = part.trim();
                if !email.is_empty() && !emails.iter().any(|e| e == email) {
                    emails.push(email.to_string());
                }
            }
        }
        emails
    }
}

/// A stored submission. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: i64,
    pub form_id: i64,
    /// Answers keyed by field name, as received on the wire.
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Submission fields owned by the caller before the store assigns id and
/// creation time.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub form_id: i64,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Form handles: lowercase slug, `^[a-z][a-z0-9_-]*$`.
pub fn is_valid_handle(handle: &str) -> bool {
    let mut chars = handle.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Question field names: lowercase slug without dashes, `^[a-z][a-z0-9_]*$`.
pub fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Shape check for email answers: one `@` with something before it, a dot in
/// the domain, and no whitespace. A deliverability heuristic, not RFC 5321.
pub fn looks_like_email(value: &str) -> bool {
    if value.chars().any(|c| c.is_whitespace()) {
        return false;
    }
    let mut parts = value.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    let Some(domain) = parts.next() else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let mut labels = domain.split('.');
    domain.contains('.') && labels.all(|l| !l.is_empty())
}

/// Field name for display in notifications: first letter upper-cased,
/// underscores replaced with spaces ("phone_number" -> "Phone number").
pub fn humanize_field_name(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => spaced,
    }
}

/// Stringify an answer value for display: strings as-is, arrays joined with
/// ", ", everything else via its JSON rendering.
pub fn answer_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(answer_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
