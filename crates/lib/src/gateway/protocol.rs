//! Gateway wire types (submit request/response, public form shape).

use crate::forms::{ButtonOption, FieldType, FormDefinition, QuestionDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Submission POST body: `{ "formHandle", "data" }`. `data` carries the
/// answers keyed by field name plus the spam-protection fields (honeypot,
/// timestamp, token).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub form_handle: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Structured submission outcome. Always HTTP 200; `success` plus either a
/// message, a per-field error map, or the new submission id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<i64>,
}

impl SubmitResponse {
    pub fn ok(message: impl Into<String>, submission_id: i64) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            errors: None,
            submission_id: Some(submission_id),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            errors: None,
            submission_id: None,
        }
    }

    pub fn field_errors(errors: BTreeMap<String, String>) -> Self {
        Self {
            success: false,
            message: None,
            errors: Some(errors),
            submission_id: None,
        }
    }
}

/// Public view of a question: structure plus the content resolved for the
/// requested locale. What the conversational client needs, nothing more.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub field_type: FieldType,
    pub field_name: String,
    pub required: bool,
    pub question_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<ButtonOption>>,
}

impl PublicQuestion {
    pub fn from_definition(question: &QuestionDefinition, locale: Option<&str>) -> Self {
        let content = question.content_for(locale);
        Self {
            field_type: question.field_type,
            field_name: question.field_name.clone(),
            required: question.required,
            question_text: content.question_text.clone(),
            placeholder: content.placeholder.clone(),
            skip_text: content.skip_text.clone(),
            options: content.options.clone(),
        }
    }
}

/// Public view of a form, served at `GET /forms/:handle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicForm {
    pub handle: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_message: Option<String>,
    pub questions: Vec<PublicQuestion>,
}

impl PublicForm {
    pub fn from_definition(form: &FormDefinition, locale: Option<&str>) -> Self {
        Self {
            handle: form.handle.clone(),
            name: form.name.clone(),
            success_message: form.success_message.clone(),
            questions: form
                .questions
                .iter()
                .map(|q| PublicQuestion::from_definition(q, locale))
                .collect(),
        }
    }
}
