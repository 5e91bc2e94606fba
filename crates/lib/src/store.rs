//! Storage collaborator: the `FormStore` trait and the in-memory implementation.
//!
//! Persistence is external to the core; everything downstream (gateway,
//! dispatcher, CLI) talks to this trait. `MemoryStore` backs the server and
//! the tests, enforces model invariants before persisting, and can be seeded
//! from a JSON forms file.

use crate::forms::{
    is_valid_field_name, is_valid_handle, FormDefinition, NewSubmission, Submission,
};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Store failures. `Validation` carries per-field messages the caller can
/// surface directly.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("form not found")]
    NotFound,
    #[error("a form with handle \"{0}\" already exists")]
    DuplicateHandle(String),
    #[error("form validation failed")]
    Validation { errors: BTreeMap<String, String> },
}

/// External persistence contract for forms and submissions.
#[async_trait]
pub trait FormStore: Send + Sync {
    /// Form by handle, with question content resolved for `locale`.
    async fn form_by_handle(&self, handle: &str, locale: Option<&str>)
        -> Option<FormDefinition>;

    async fn form_by_id(&self, id: i64) -> Option<FormDefinition>;

    /// Validate and persist a form; returns the stored copy with ids assigned.
    async fn save_form(&self, form: FormDefinition) -> Result<FormDefinition, StoreError>;

    /// Persist a submission; the store assigns id and creation time. The
    /// submission is read-only afterwards.
    async fn save_submission(&self, new: NewSubmission) -> Result<Submission, StoreError>;

    async fn submission_by_id(&self, id: i64) -> Option<Submission>;

    /// Submissions for one form, newest first.
    async fn submissions_for_form(&self, form_id: i64) -> Vec<Submission>;

    /// All submissions across forms, newest first.
    async fn all_submissions(&self) -> Vec<Submission>;
}

/// Validate a form against the model invariants. Returns per-field errors
/// keyed the way the admin surface expects (handle, name, or the question's
/// field name).
fn validate_form(form: &FormDefinition) -> BTreeMap<String, String> {
    let mut errors = BTreeMap::new();
    if form.name.trim().is_empty() {
        errors.insert("name".to_string(), "Name is required".to_string());
    }
    if !is_valid_handle(&form.handle) {
        errors.insert(
            "handle".to_string(),
            "Handle must start with a lowercase letter and contain only lowercase letters, digits, underscores, and dashes".to_string(),
        );
    }
    let mut seen = Vec::new();
    for question in &form.questions {
        let field = &question.field_name;
        if !is_valid_field_name(field) {
            errors.insert(
                field.clone(),
                "Field name must start with a lowercase letter and contain only lowercase letters, digits, and underscores".to_string(),
            );
            continue;
        }
        if seen.contains(field) {
            errors.insert(field.clone(), "Field name must be unique within the form".to_string());
            continue;
        }
        seen.push(field.clone());
        if question.content.question_text.trim().is_empty() {
            errors.insert(field.clone(), "Question text is required".to_string());
        }
        let has_options = question
            .content
            .options
            .as_ref()
            .map(|o| !o.is_empty())
            .unwrap_or(false);
        if question.field_type.is_buttons() && !has_options {
            errors.insert(field.clone(), "Multiple choice questions need at least one option".to_string());
        }
        if !question.field_type.is_buttons() && question.content.options.is_some() {
            errors.insert(field.clone(), "Options are only allowed on multiple choice questions".to_string());
        }
    }
    errors
}

/// In-memory store: RwLock-guarded maps with monotonic id counters.
pub struct MemoryStore {
    forms: Arc<RwLock<HashMap<i64, FormDefinition>>>,
    submissions: Arc<RwLock<Vec<Submission>>>,
    next_form_id: AtomicI64,
    next_question_id: AtomicI64,
    next_submission_id: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            forms: Arc::new(RwLock::new(HashMap::new())),
            submissions: Arc::new(RwLock::new(Vec::new())),
            next_form_id: AtomicI64::new(1),
            next_question_id: AtomicI64::new(1),
            next_submission_id: AtomicI64::new(1),
        }
    }

    /// Save every form from a seed list; returns the number stored.
    pub async fn seed(&self, forms: Vec<FormDefinition>) -> anyhow::Result<usize> {
        let mut stored = 0;
        for form in forms {
            let handle = form.handle.clone();
            self.save_form(form)
                .await
                .with_context(|| format!("seeding form \"{}\"", handle))?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Resolve question content for a locale into the returned copy. The
    /// stored form keeps all locale variants; callers get one view.
    fn localize(mut form: FormDefinition, locale: Option<&str>) -> FormDefinition {
        if let Some(locale) = locale {
            for question in &mut form.questions {
                if let Some(content) = question.localized.get(locale) {
                    question.content = content.clone();
                }
                question.localized.clear();
            }
        }
        form
    }
}

#[async_trait]
impl FormStore for MemoryStore {
    async fn form_by_handle(&self, handle: &str, locale: Option<&str>)
        -> Option<FormDefinition> {
        let forms = self.forms.read().await;
        forms
            .values()
            .find(|f| f.handle == handle)
            .cloned()
            .map(|f| Self::localize(f, locale))
    }

    async fn form_by_id(&self, id: i64) -> Option<FormDefinition> {
        self.forms.read().await.get(&id).cloned()
    }

    async fn save_form(&self, mut form: FormDefinition) -> Result<FormDefinition, StoreError> {
        let errors = validate_form(&form);
        if !errors.is_empty() {
            return Err(StoreError::Validation { errors });
        }
        let mut forms = self.forms.write().await;
        let duplicate = forms
            .values()
            .any(|f| f.handle == form.handle && f.id != form.id);
        if duplicate {
            return Err(StoreError::DuplicateHandle(form.handle));
        }
        if form.id == 0 {
            form.id = self.next_form_id.fetch_add(1, Ordering::SeqCst);
        }
        form.questions.sort_by_key(|q| q.sort_order);
        for question in &mut form.questions {
            if question.id == 0 {
                question.id = self.next_question_id.fetch_add(1, Ordering::SeqCst);
            }
        }
        forms.insert(form.id, form.clone());
        Ok(form)
    }

    async fn save_submission(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        if self.forms.read().await.get(&new.form_id).is_none() {
            return Err(StoreError::NotFound);
        }
        let submission = Submission {
            id: self.next_submission_id.fetch_add(1, Ordering::SeqCst),
            form_id: new.form_id,
            data: new.data,
            user_agent: new.user_agent,
            ip_address: new.ip_address,
            created_at: chrono::Utc::now(),
        };
        self.submissions.write().await.push(submission.clone());
        Ok(submission)
    }

    async fn submission_by_id(&self, id: i64) -> Option<Submission> {
        self.submissions
            .read()
            .await
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    async fn submissions_for_form(&self, form_id: i64) -> Vec<Submission> {
        let mut out: Vec<Submission> = self
            .submissions
            .read()
            .await
            .iter()
            .filter(|s| s.form_id == form_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    async fn all_submissions(&self) -> Vec<Submission> {
        let mut out: Vec<Submission> = self.submissions.read().await.clone();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }
}

/// Load a forms seed file: a JSON array of form definitions.
pub fn load_forms_file(path: &Path) -> anyhow::Result<Vec<FormDefinition>> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading forms from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing forms from {}", path.display()))
}

/// CSV export for one form: `ID, Date`, then one column per question field
/// name, one row per submission (newest first).
pub async fn export_form_csv(store: &dyn FormStore, form_id: i64) -> Result<String, StoreError> {
    let form = store.form_by_id(form_id).await.ok_or(StoreError::NotFound)?;
    let mut out = String::new();
    let mut header: Vec<String> = vec!["ID".to_string(), "Date".to_string()];
    header.extend(form.questions.iter().map(|q| q.field_name.clone()));
    push_csv_row(&mut out, &header);
    for submission in store.submissions_for_form(form_id).await {
        let mut row = vec![
            submission.id.to_string(),
            submission.created_at.to_rfc3339(),
        ];
        for question in &form.questions {
            let value = submission
                .data
                .get(&question.field_name)
                .map(crate::forms::answer_to_string)
                .unwrap_or_default();
            row.push(value);
        }
        push_csv_row(&mut out, &row);
    }
    Ok(out)
}

/// CSV export across all forms: `ID, Form, Date, Data` with the answers as
/// compact JSON.
pub async fn export_all_csv(store: &dyn FormStore) -> String {
    let mut out = String::new();
    push_csv_row(
        &mut out,
        &[
            "ID".to_string(),
            "Form".to_string(),
            "Date".to_string(),
            "Data".to_string(),
        ],
    );
    for submission in store.all_submissions().await {
        let form_name = store
            .form_by_id(submission.form_id)
            .await
            .map(|f| f.name)
            .unwrap_or_else(|| submission.form_id.to_string());
        let data = serde_json::Value::Object(submission.data.clone()).to_string();
        push_csv_row(
            &mut out,
            &[
                submission.id.to_string(),
                form_name,
                submission.created_at.to_rfc3339(),
                data,
            ],
        );
    }
    out
}

fn push_csv_row(out: &mut String, fields: &[String]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains(',') || field.contains('"') || field.contains('\n') {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{FieldType, FormNotifications, QuestionContent, QuestionDefinition};

    fn form_with_questions(handle: &str, questions: Vec<QuestionDefinition>) -> FormDefinition {
        FormDefinition {
            id: 0,
            name: "Contact".to_string(),
            handle: handle.to_string(),
            success_message: None,
            notifications: FormNotifications::default(),
            questions,
        }
    }

    fn question(field_name: &str, field_type: FieldType, sort_order: i32) -> QuestionDefinition {
        QuestionDefinition {
            id: 0,
            field_type,
            field_name: field_name.to_string(),
            required: true,
            sort_order,
            content: QuestionContent {
                question_text: format!("Question about {}", field_name),
                options: if field_type.is_buttons() {
                    Some(vec![crate::forms::ButtonOption::Plain("Red".to_string())])
                } else {
                    None
                },
                ..Default::default()
            },
            localized: Default::default(),
        }
    }

    #[tokio::test]
    async fn save_assigns_ids_and_orders_questions() {
        let store = MemoryStore::new();
        let form = form_with_questions(
            "contact",
            vec![
                question("second", FieldType::Text, 2),
                question("first", FieldType::Text, 1),
            ],
        );
        let saved = store.save_form(form).await.unwrap();
        assert_eq!(saved.id, 1);
        assert_eq!(saved.questions[0].field_name, "first");
        assert!(saved.questions.iter().all(|q| q.id != 0));
    }

    #[tokio::test]
    async fn duplicate_handle_rejected() {
        let store = MemoryStore::new();
        store
            .save_form(form_with_questions("contact", vec![]))
            .await
            .unwrap();
        let err = store
            .save_form(form_with_questions("contact", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateHandle(h) if h == "contact"));
    }

    #[tokio::test]
    async fn updating_a_form_keeps_its_own_handle() {
        let store = MemoryStore::new();
        let saved = store
            .save_form(form_with_questions("contact", vec![]))
            .await
            .unwrap();
        let mut update = saved.clone();
        update.name = "Contact v2".to_string();
        let updated = store.save_form(update).await.unwrap();
        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.name, "Contact v2");
    }

    #[tokio::test]
    async fn invalid_handle_and_field_name_rejected() {
        let store = MemoryStore::new();
        let err = store
            .save_form(form_with_questions("Bad Handle", vec![]))
            .await
            .unwrap_err();
        let StoreError::Validation { errors } = err else {
            panic!("expected validation error");
        };
        assert!(errors.contains_key("handle"));

        let err = store
            .save_form(form_with_questions(
                "ok",
                vec![question("Bad-Name", FieldType::Text, 0)],
            ))
            .await
            .unwrap_err();
        let StoreError::Validation { errors } = err else {
            panic!("expected validation error");
        };
        assert!(errors.contains_key("Bad-Name"));
    }

    #[tokio::test]
    async fn duplicate_field_name_within_form_rejected() {
        let store = MemoryStore::new();
        let err = store
            .save_form(form_with_questions(
                "contact",
                vec![
                    question("name", FieldType::Text, 0),
                    question("name", FieldType::Text, 1),
                ],
            ))
            .await
            .unwrap_err();
        let StoreError::Validation { errors } = err else {
            panic!("expected validation error");
        };
        assert_eq!(
            errors.get("name").map(String::as_str),
            Some("Field name must be unique within the form")
        );
    }

    #[tokio::test]
    async fn buttons_require_options_and_text_fields_reject_them() {
        let store = MemoryStore::new();
        let mut q = question("color", FieldType::Buttons, 0);
        q.content.options = Some(vec![]);
        let err = store
            .save_form(form_with_questions("a", vec![q]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));

        let mut q = question("name", FieldType::Text, 0);
        q.content.options = Some(vec![crate::forms::ButtonOption::Plain("x".to_string())]);
        let err = store
            .save_form(form_with_questions("b", vec![q]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn submission_requires_existing_form() {
        let store = MemoryStore::new();
        let err = store
            .save_submission(NewSubmission {
                form_id: 99,
                data: serde_json::Map::new(),
                user_agent: None,
                ip_address: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn form_csv_has_question_columns_and_quotes_commas() {
        let store = MemoryStore::new();
        let form = store
            .save_form(form_with_questions(
                "contact",
                vec![
                    question("name", FieldType::Text, 0),
                    question("message", FieldType::Textarea, 1),
                ],
            ))
            .await
            .unwrap();
        let mut data = serde_json::Map::new();
        data.insert("name".to_string(), serde_json::json!("Alice"));
        data.insert("message".to_string(), serde_json::json!("Hello, \"world\""));
        store
            .save_submission(NewSubmission {
                form_id: form.id,
                data,
                user_agent: None,
                ip_address: None,
            })
            .await
            .unwrap();

        let csv = export_form_csv(&store, form.id).await.unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("ID,Date,name,message"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("1,"));
        assert!(row.ends_with(",Alice,\"Hello, \"\"world\"\"\""));
    }

    #[tokio::test]
    async fn global_csv_lists_form_name_and_json_data() {
        let store = MemoryStore::new();
        let form = store
            .save_form(form_with_questions(
                "contact",
                vec![question("name", FieldType::Text, 0)],
            ))
            .await
            .unwrap();
        let mut data = serde_json::Map::new();
        data.insert("name".to_string(), serde_json::json!("Alice"));
        store
            .save_submission(NewSubmission {
                form_id: form.id,
                data,
                user_agent: None,
                ip_address: None,
            })
            .await
            .unwrap();
        let csv = export_all_csv(&store).await;
        let row = csv.lines().nth(1).unwrap();
        assert!(row.contains("Contact"));
        assert!(row.contains("Alice"));
    }

    #[tokio::test]
    async fn locale_resolution_applies_overrides() {
        let store = MemoryStore::new();
        let mut q = question("name", FieldType::Text, 0);
        q.localized.insert(
            "nl".to_string(),
            QuestionContent {
                question_text: "Hoe heet je?".to_string(),
                ..Default::default()
            },
        );
        store
            .save_form(form_with_questions("contact", vec![q]))
            .await
            .unwrap();
        let form = store.form_by_handle("contact", Some("nl")).await.unwrap();
        assert_eq!(form.questions[0].content.question_text, "Hoe heet je?");
        let form = store.form_by_handle("contact", None).await.unwrap();
        assert_eq!(
            form.questions[0].content.question_text,
            "Question about name"
        );
    }
}
