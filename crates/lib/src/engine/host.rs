//! Host seams for the conversation engine.
//!
//! The engine never touches a UI or the network directly: presentation goes
//! through `Renderer`, pacing through `Pacer`, and submission through
//! `SubmitTransport`. Tests swap in no-op/recording implementations so the
//! whole flow runs synchronously.

use crate::gateway::{SubmitRequest, SubmitResponse};
use async_trait::async_trait;
use std::time::Duration;

/// Presentation surface for the conversation. Implementations render a chat
/// UI (terminal, browser bridge); the engine only announces what to show.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// The "typing" affordance shown before the next bot message.
    async fn show_typing(&self);
    /// Present a question. `text` is the question text with `{field}`
    /// placeholders already substituted; the input affordance follows from
    /// the question's field type and `required` flag.
    async fn show_question(&self, question: &crate::gateway::PublicQuestion, text: &str);
    /// Echo the visitor's answer (or skip text) as their chat bubble.
    async fn show_reply(&self, text: &str);
    /// A plain bot message (success or error text).
    async fn show_message(&self, text: &str);
    /// Step progress, 1-based.
    async fn show_progress(&self, current: usize, total: usize);
}

/// Timed suspension between presentation steps.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, duration: Duration);
}

/// Real pacing via the tokio timer.
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Zero-delay pacing for tests.
pub struct NoopPacer;

#[async_trait]
impl Pacer for NoopPacer {
    async fn pause(&self, _duration: Duration) {}
}

/// Network boundary for the final submission. Errors are transport-level
/// (the server's application-level failures come back as a parsed
/// `SubmitResponse` with `success:false`).
#[async_trait]
pub trait SubmitTransport: Send + Sync {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, String>;
}

/// HTTP transport against a running gateway.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Fetch the public form definition the engine runs against.
    pub async fn fetch_form(
        &self,
        handle: &str,
        locale: Option<&str>,
    ) -> anyhow::Result<crate::gateway::PublicForm> {
        let mut request = self.client.get(self.url(&format!("/forms/{}", handle)));
        if let Some(locale) = locale {
            request = request.query(&[("locale", locale)]);
        }
        let res = request.send().await?;
        if !res.status().is_success() {
            anyhow::bail!("form \"{}\" not found ({})", handle, res.status());
        }
        Ok(res.json().await?)
    }
}

#[async_trait]
impl SubmitTransport for HttpTransport {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, String> {
        let res = self
            .client
            .post(self.url("/submit"))
            .json(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            return Err(format!("submit failed: {}", res.status()));
        }
        res.json().await.map_err(|e| e.to_string())
    }
}
