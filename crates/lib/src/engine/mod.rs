//! Conversational flow engine.
//!
//! A single-owner state machine that walks a visitor through a form one
//! question at a time: typing affordances, input-type switching, skip logic
//! for optional questions, spam-token lifecycle, and the final submission.
//! Phases: Idle -> Opening -> AskingQuestion -> AwaitingInput -> Submitting
//! -> Completed/Failed -> Idle.
//!
//! The engine is host-agnostic: see [`host`] for the renderer, pacer, and
//! transport seams. All delays go through the pacer so tests run without
//! waiting.

mod host;

pub use host::{HttpTransport, NoopPacer, Pacer, Renderer, SubmitTransport, TokioPacer};

use crate::forms::{answer_to_string, looks_like_email, FieldType};
use crate::gateway::{PublicForm, PublicQuestion, SubmitRequest};
use crate::spam::{unix_now, HONEYPOT_FIELD, TIMESTAMP_FIELD, TOKEN_FIELD};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const OPENING_DELAY: Duration = Duration::from_millis(600);
const TYPING_DELAY: Duration = Duration::from_millis(1000);
const AFTER_QUESTION_DELAY: Duration = Duration::from_millis(400);
const STEP_DELAY: Duration = Duration::from_millis(600);
const COMPLETION_DELAY: Duration = Duration::from_millis(2000);

/// Fallback texts, overridable per form/question content.
pub const DEFAULT_SUCCESS_MESSAGE: &str = "Thank you for your submission!";
pub const DEFAULT_SKIP_TEXT: &str = "Skip this question";
const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again later.";
const NETWORK_ERROR_MESSAGE: &str = "An error occurred. Please try again later.";

/// Where the conversation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Opening,
    AskingQuestion,
    AwaitingInput,
    Submitting,
    Completed,
    Failed,
}

/// Ephemeral per-conversation state. Created on open, discarded on close or
/// completion; never persisted. The generation counter marks resets so a
/// submission result that lands after a close is ignored.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub phase: Phase,
    pub current_step: usize,
    pub answers: Map<String, Value>,
    pub spam_timestamp: u64,
    pub spam_token: String,
    pub is_processing: bool,
    pub generation: u64,
}

impl ConversationState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            current_step: 0,
            answers: Map::new(),
            spam_timestamp: 0,
            spam_token: String::new(),
            is_processing: false,
            generation: 0,
        }
    }
}

/// Why an input was rejected locally (no state transition happened).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRejection {
    /// The engine is not waiting for input.
    NotAwaitingInput,
    /// Required question, empty value.
    Required,
    /// Email question, value fails the shape check.
    InvalidEmail,
    /// Skip requested on a required question.
    NotSkippable,
}

/// What went wrong during submission, passed to the error callback.
#[derive(Debug, Clone)]
pub enum SubmitFailure {
    /// The server answered `success:false`.
    Application {
        message: Option<String>,
        errors: BTreeMap<String, String>,
    },
    /// The request itself failed.
    Network(String),
}

type CompleteCallback = Box<dyn Fn(&Map<String, Value>) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&SubmitFailure) + Send + Sync>;

/// The conversation engine. One instance per open conversation; drive it
/// with `open`, then `submit_input`/`choose_option`/`skip` while it awaits
/// input, and `close` to abandon.
pub struct ConversationEngine {
    form: PublicForm,
    renderer: Arc<dyn Renderer>,
    pacer: Arc<dyn Pacer>,
    transport: Arc<dyn SubmitTransport>,
    state: ConversationState,
    on_complete: Option<CompleteCallback>,
    on_error: Option<ErrorCallback>,
}

impl ConversationEngine {
    pub fn new(
        form: PublicForm,
        renderer: Arc<dyn Renderer>,
        pacer: Arc<dyn Pacer>,
        transport: Arc<dyn SubmitTransport>,
    ) -> Self {
        Self {
            form,
            renderer,
            pacer,
            transport,
            state: ConversationState::new(),
            on_complete: None,
            on_error: None,
        }
    }

    /// Called with the collected answers after a successful submission.
    pub fn on_complete(mut self, callback: CompleteCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    /// Called when submission fails (application-level or network).
    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn form(&self) -> &PublicForm {
        &self.form
    }

    /// The question the engine is currently waiting on, if any.
    pub fn current_question(&self) -> Option<&PublicQuestion> {
        if self.state.phase == Phase::AwaitingInput {
            self.form.questions.get(self.state.current_step)
        } else {
            None
        }
    }

    /// Start (or restart) the conversation: fresh state, fresh spam
    /// timestamp and token, then the first question.
    pub async fn open(&mut self) {
        self.reset();
        self.state.spam_timestamp = unix_now();
        self.state.spam_token = generate_spam_token();
        self.state.phase = Phase::Opening;
        self.pacer.pause(OPENING_DELAY).await;
        self.ask_question().await;
    }

    /// Abandon the conversation and discard its state. An in-flight
    /// submission is not canceled; its result is dropped by the generation
    /// check.
    pub fn close(&mut self) {
        self.reset();
    }

    /// Present the current question, or submit when past the last one.
    /// A call while a previous call is still processing is a no-op.
    pub async fn ask_question(&mut self) {
        if self.state.is_processing {
            return;
        }
        self.state.is_processing = true;
        self.state.phase = Phase::AskingQuestion;

        let Some(question) = self.form.questions.get(self.state.current_step).cloned() else {
            self.state.is_processing = false;
            self.submit_form().await;
            return;
        };

        self.renderer
            .show_progress(self.state.current_step + 1, self.form.questions.len())
            .await;
        self.renderer.show_typing().await;
        self.pacer.pause(TYPING_DELAY).await;
        let text = render_question_text(&question.question_text, &self.state.answers);
        self.renderer.show_question(&question, &text).await;
        self.pacer.pause(AFTER_QUESTION_DELAY).await;

        self.state.phase = Phase::AwaitingInput;
        self.state.is_processing = false;
    }

    /// Submit a typed answer for the current question. Local validation
    /// failures leave the state untouched so the host can re-prompt.
    pub async fn submit_input(&mut self, value: &str) -> Result<(), InputRejection> {
        let question = self.awaiting_question()?;
        let value = value.trim().to_string();
        if question.required && value.is_empty() {
            return Err(InputRejection::Required);
        }
        if question.field_type == FieldType::Email
            && !value.is_empty()
            && !looks_like_email(&value)
        {
            return Err(InputRejection::InvalidEmail);
        }
        let field_name = question.field_name.clone();
        if !value.is_empty() {
            self.renderer.show_reply(&value).await;
        }
        self.state.answers.insert(field_name, json!(value));
        self.advance().await;
        Ok(())
    }

    /// Pick a button option: the label is echoed, the value is recorded.
    pub async fn choose_option(&mut self, label: &str, value: &str) -> Result<(), InputRejection> {
        let question = self.awaiting_question()?;
        let field_name = question.field_name.clone();
        self.renderer.show_reply(label).await;
        self.state.answers.insert(field_name, json!(value));
        self.advance().await;
        Ok(())
    }

    /// Skip the current question. Only offered for optional questions;
    /// records the empty string and advances like a normal answer.
    pub async fn skip(&mut self) -> Result<(), InputRejection> {
        let question = self.awaiting_question()?;
        if question.required {
            return Err(InputRejection::NotSkippable);
        }
        let field_name = question.field_name.clone();
        let skip_text = question
            .skip_text
            .clone()
            .unwrap_or_else(|| DEFAULT_SKIP_TEXT.to_string());
        self.renderer.show_reply(&skip_text).await;
        self.state.answers.insert(field_name, json!(""));
        self.advance().await;
        Ok(())
    }

    fn awaiting_question(&self) -> Result<&PublicQuestion, InputRejection> {
        if self.state.phase != Phase::AwaitingInput {
            return Err(InputRejection::NotAwaitingInput);
        }
        self.form
            .questions
            .get(self.state.current_step)
            .ok_or(InputRejection::NotAwaitingInput)
    }

    async fn advance(&mut self) {
        self.state.phase = Phase::AskingQuestion;
        self.state.current_step += 1;
        self.pacer.pause(STEP_DELAY).await;
        self.ask_question().await;
    }

    /// Assemble the payload (answers plus honeypot, timestamp, token) and
    /// hand it to the transport.
    async fn submit_form(&mut self) {
        self.state.phase = Phase::Submitting;
        self.renderer.show_typing().await;
        self.pacer.pause(TYPING_DELAY).await;

        let answers = self.state.answers.clone();
        let mut data = answers.clone();
        data.insert(HONEYPOT_FIELD.to_string(), json!(""));
        data.insert(TIMESTAMP_FIELD.to_string(), json!(self.state.spam_timestamp));
        data.insert(TOKEN_FIELD.to_string(), json!(self.state.spam_token));
        let request = SubmitRequest {
            form_handle: self.form.handle.clone(),
            data,
        };

        let generation = self.state.generation;
        let result = self.transport.submit(&request).await;
        if self.state.generation != generation {
            // Conversation was closed while the request was in flight.
            return;
        }

        match result {
            Ok(response) if response.success => {
                let message = response
                    .message
                    .or_else(|| self.form.success_message.clone())
                    .unwrap_or_else(|| DEFAULT_SUCCESS_MESSAGE.to_string());
                self.renderer.show_message(&message).await;
                self.state.phase = Phase::Completed;
                if let Some(cb) = &self.on_complete {
                    cb(&answers);
                }
                self.pacer.pause(COMPLETION_DELAY).await;
                self.reset();
            }
            Ok(response) => {
                self.renderer.show_message(GENERIC_ERROR_MESSAGE).await;
                self.state.phase = Phase::Failed;
                if let Some(cb) = &self.on_error {
                    cb(&SubmitFailure::Application {
                        message: response.message,
                        errors: response.errors.unwrap_or_default(),
                    });
                }
            }
            Err(e) => {
                log::warn!("submit transport error: {}", e);
                self.renderer.show_message(NETWORK_ERROR_MESSAGE).await;
                self.state.phase = Phase::Failed;
                if let Some(cb) = &self.on_error {
                    cb(&SubmitFailure::Network(e));
                }
            }
        }
    }

    fn reset(&mut self) {
        let generation = self.state.generation + 1;
        self.state = ConversationState::new();
        self.state.generation = generation;
    }

    #[cfg(test)]
    fn state_mut(&mut self) -> &mut ConversationState {
        &mut self.state
    }
}

/// Fresh opaque client token: 16 cryptographically random bytes, hex-encoded
/// (32 alphanumeric chars, which satisfies the server-side shape check).
pub fn generate_spam_token() -> String {
    let mut bytes = [0u8; 16];
    if getrandom::getrandom(&mut bytes).is_err() {
        // getrandom only fails on exotic platforms; fall back to a UUID,
        // which is random enough for a bot heuristic.
        return uuid::Uuid::new_v4().simple().to_string();
    }
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Substitute `{field_name}` placeholders with collected answers, so later
/// questions can reference earlier ones ("Nice to meet you, {name}!").
/// Unknown placeholders are left as-is.
pub fn render_question_text(template: &str, answers: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        match answers.get(key) {
            Some(value) => out.push_str(&answer_to_string(value)),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}
