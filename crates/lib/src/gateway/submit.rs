//! Submission pipeline: spam gate, field validation, persistence, fan-out.

use crate::forms::{answer_to_string, looks_like_email, FieldType, FormDefinition, NewSubmission};
use crate::gateway::protocol::SubmitResponse;
use crate::notify::NotificationDispatcher;
use crate::spam::SpamGate;
use crate::store::FormStore;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Accepts a raw submission payload and turns it into a structured outcome.
/// Every failure mode resolves to a `SubmitResponse`; nothing here panics or
/// propagates past the HTTP boundary.
pub struct SubmissionGateway {
    store: Arc<dyn FormStore>,
    spam: SpamGate,
    dispatcher: Arc<NotificationDispatcher>,
}

impl SubmissionGateway {
    pub fn new(
        store: Arc<dyn FormStore>,
        spam: SpamGate,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            spam,
            dispatcher,
        }
    }

    /// Process one submission end to end. The ordering is load-bearing:
    /// nothing is persisted until both the spam gate and field validation
    /// pass, and notifications never affect the response.
    pub async fn submit(
        &self,
        form_handle: &str,
        data: Map<String, Value>,
        ip: &str,
        user_agent: Option<&str>,
    ) -> SubmitResponse {
        let Some(form) = self.store.form_by_handle(form_handle, None).await else {
            return SubmitResponse::failure("Form not found");
        };

        let spam_check = self.spam.validate(&data, ip).await;
        if !spam_check.valid {
            let message = spam_check
                .error
                .unwrap_or_else(|| "Invalid submission detected.".to_string());
            log::warn!(
                "spam detected for form \"{}\" from IP {}: {}",
                form_handle,
                ip,
                message
            );
            return SubmitResponse::failure(message);
        }

        let errors = validate_submission(&form, &data);
        if !errors.is_empty() {
            return SubmitResponse::field_errors(errors);
        }

        let new = NewSubmission {
            form_id: form.id,
            data,
            user_agent: user_agent.map(str::to_string),
            ip_address: Some(ip.to_string()),
        };
        let submission = match self.store.save_submission(new).await {
            Ok(s) => s,
            Err(e) => {
                log::error!("could not save submission for form \"{}\": {}", form_handle, e);
                return SubmitResponse::failure("Could not save submission");
            }
        };
        log::info!(
            "submission {} saved for form \"{}\"",
            submission.id,
            form_handle
        );

        self.dispatcher.dispatch(&submission, &form).await;

        let message = form
            .success_message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Thank you for your submission!".to_string());
        SubmitResponse::ok(message, submission.id)
    }
}

/// Per-question validation: required answers present, email answers shaped
/// like email addresses. Empty optional answers skip every further check.
fn validate_submission(
    form: &FormDefinition,
    data: &Map<String, Value>,
) -> BTreeMap<String, String> {
    let mut errors = BTreeMap::new();
    for question in &form.questions {
        let value = data
            .get(&question.field_name)
            .map(answer_to_string)
            .unwrap_or_default();
        if question.required && value.is_empty() {
            errors.insert(
                question.field_name.clone(),
                "This field is required".to_string(),
            );
            continue;
        }
        if value.is_empty() {
            continue;
        }
        if question.field_type == FieldType::Email && !looks_like_email(&value) {
            errors.insert(
                question.field_name.clone(),
                "Please enter a valid email address".to_string(),
            );
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NotifySettings, SpamConfig};
    use crate::forms::{
        ButtonOption, FieldType, FormNotifications, QuestionContent, QuestionDefinition,
    };
    use crate::notify::{LogMailer, WebhookSender};
    use crate::spam::{MemoryRateLimiter, HONEYPOT_FIELD, TIMESTAMP_FIELD, TOKEN_FIELD};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingSender {
        posts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WebhookSender for RecordingSender {
        async fn post_json(&self, url: &str, _payload: &Value) -> Result<(), String> {
            self.posts.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    fn question(field_name: &str, field_type: FieldType, required: bool) -> QuestionDefinition {
        QuestionDefinition {
            id: 0,
            field_type,
            field_name: field_name.to_string(),
            required,
            sort_order: 0,
            content: QuestionContent {
                question_text: format!("Question about {}", field_name),
                options: if field_type.is_buttons() {
                    Some(vec![ButtonOption::Plain("Red".to_string())])
                } else {
                    None
                },
                ..Default::default()
            },
            localized: Default::default(),
        }
    }

    async fn gateway_with_form() -> (SubmissionGateway, Arc<MemoryStore>, Arc<RecordingSender>) {
        let store = Arc::new(MemoryStore::new());
        let mut form = FormDefinition {
            id: 0,
            name: "Contact".to_string(),
            handle: "contact".to_string(),
            success_message: None,
            notifications: FormNotifications::default(),
            questions: vec![
                {
                    let mut q = question("name", FieldType::Text, true);
                    q.sort_order = 0;
                    q
                },
                {
                    let mut q = question("email", FieldType::Email, false);
                    q.sort_order = 1;
                    q
                },
            ],
        };
        form.notifications.enable_webhook = true;
        form.notifications.webhook_url = "https://hooks.example/generic".to_string();
        form.notifications.enable_notifications = false;
        store.save_form(form).await.unwrap();

        let sender = Arc::new(RecordingSender {
            posts: Mutex::new(Vec::new()),
        });
        let settings = NotifySettings {
            enable_email_notifications: false,
            ..Default::default()
        };
        let dispatcher = Arc::new(NotificationDispatcher::new(
            settings,
            Arc::new(LogMailer),
            sender.clone(),
        ));
        let spam = SpamGate::new(SpamConfig::default(), Arc::new(MemoryRateLimiter::new()));
        (
            SubmissionGateway::new(store.clone(), spam, dispatcher),
            store,
            sender,
        )
    }

    fn valid_payload() -> Map<String, Value> {
        let opened_at = crate::spam::unix_now() - 10;
        let mut data = Map::new();
        data.insert("name".to_string(), json!("Alice"));
        data.insert("email".to_string(), json!("alice@example.com"));
        data.insert(HONEYPOT_FIELD.to_string(), json!(""));
        data.insert(TIMESTAMP_FIELD.to_string(), json!(opened_at));
        data.insert(
            TOKEN_FIELD.to_string(),
            json!("0123456789abcdef0123456789abcdef"),
        );
        data
    }

    #[tokio::test]
    async fn unknown_form_is_a_structured_failure() {
        let (gateway, _, _) = gateway_with_form().await;
        let response = gateway
            .submit("missing", valid_payload(), "1.2.3.4", None)
            .await;
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("Form not found"));
    }

    #[tokio::test]
    async fn spam_rejection_persists_nothing() {
        let (gateway, store, _) = gateway_with_form().await;
        let mut data = valid_payload();
        data.insert(HONEYPOT_FIELD.to_string(), json!("http://spam"));
        let response = gateway.submit("contact", data, "1.2.3.4", None).await;
        assert!(!response.success);
        assert_eq!(
            response.message.as_deref(),
            Some("Invalid submission detected.")
        );
        assert!(store.all_submissions().await.is_empty());
    }

    #[tokio::test]
    async fn missing_required_field_reports_per_field_error() {
        let (gateway, store, _) = gateway_with_form().await;
        let mut data = valid_payload();
        data.remove("name");
        let response = gateway.submit("contact", data, "1.2.3.4", None).await;
        assert!(!response.success);
        let errors = response.errors.unwrap();
        assert_eq!(
            errors.get("name").map(String::as_str),
            Some("This field is required")
        );
        assert!(store.all_submissions().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_email_reported_but_empty_optional_email_accepted() {
        let (gateway, _, _) = gateway_with_form().await;
        let mut data = valid_payload();
        data.insert("email".to_string(), json!("not-an-email"));
        let response = gateway.submit("contact", data, "1.2.3.4", None).await;
        let errors = response.errors.unwrap();
        assert_eq!(
            errors.get("email").map(String::as_str),
            Some("Please enter a valid email address")
        );

        let mut data = valid_payload();
        data.insert("email".to_string(), json!(""));
        let response = gateway.submit("contact", data, "1.2.3.4", None).await;
        assert!(response.success);
    }

    #[tokio::test]
    async fn success_persists_and_notifies_with_default_message() {
        let (gateway, store, sender) = gateway_with_form().await;
        let response = gateway
            .submit("contact", valid_payload(), "1.2.3.4", Some("TestAgent/1.0"))
            .await;
        assert!(response.success);
        assert_eq!(
            response.message.as_deref(),
            Some("Thank you for your submission!")
        );
        let id = response.submission_id.unwrap();
        let submission = store.submission_by_id(id).await.unwrap();
        assert_eq!(submission.data.get("name"), Some(&json!("Alice")));
        assert_eq!(submission.ip_address.as_deref(), Some("1.2.3.4"));
        assert_eq!(submission.user_agent.as_deref(), Some("TestAgent/1.0"));
        assert_eq!(
            *sender.posts.lock().unwrap(),
            vec!["https://hooks.example/generic"]
        );
    }

    #[tokio::test]
    async fn form_success_message_wins_over_default() {
        let (gateway, store, _) = gateway_with_form().await;
        let mut form = store.form_by_handle("contact", None).await.unwrap();
        form.success_message = Some("Cheers!".to_string());
        store.save_form(form).await.unwrap();
        let response = gateway
            .submit("contact", valid_payload(), "1.2.3.4", None)
            .await;
        assert_eq!(response.message.as_deref(), Some("Cheers!"));
    }

    #[tokio::test]
    async fn fourth_submission_from_one_ip_is_rate_limited() {
        let (gateway, _, _) = gateway_with_form().await;
        for _ in 0..3 {
            assert!(
                gateway
                    .submit("contact", valid_payload(), "9.9.9.9", None)
                    .await
                    .success
            );
        }
        let response = gateway
            .submit("contact", valid_payload(), "9.9.9.9", None)
            .await;
        assert_eq!(
            response.message.as_deref(),
            Some("Too many submissions. Please try again later.")
        );
    }
}
