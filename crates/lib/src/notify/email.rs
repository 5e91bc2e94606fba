//! Email notifications: transport seam and HTML body building.
//!
//! The actual mail transport is an external collaborator; the library owns
//! the subject/body and calls whatever `Mailer` the host wires in.

use crate::forms::{answer_to_string, FormDefinition, Submission};
use async_trait::async_trait;

/// Outbound mail transport. One call per recipient; failures are reported
/// as strings so the dispatcher can log and move on.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), String>;
}

/// Default mailer when no transport is configured: logs the delivery and
/// reports success so the rest of the dispatch is unaffected.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), String> {
        log::info!("email notification (no mail transport configured): to={} subject={:?}", to, subject);
        Ok(())
    }
}

/// Subject line for a submission notification.
pub fn notification_subject(form: &FormDefinition) -> String {
    format!("New Talkform Submission: {}", form.name)
}

/// HTML body: form name, date, every question with its answer, then the
/// submission id and IP in the footer.
pub fn build_email_body(form: &FormDefinition, submission: &Submission) -> String {
    let mut html = String::from(
        "<html><body style=\"font-family: Arial, sans-serif; color: #333;\">",
    );
    html.push_str("<h2 style=\"color: #584998;\">New Submission</h2>");
    html.push_str(&format!(
        "<p><strong>Form:</strong> {}</p>",
        escape_html(&form.name)
    ));
    html.push_str(&format!(
        "<p><strong>Date:</strong> {}</p>",
        submission.created_at.format("%B %-d, %Y, %-I:%M %P")
    ));
    html.push_str("<hr style=\"border: none; border-top: 1px solid #ddd; margin: 20px 0;\">");

    html.push_str("<h3>Answers:</h3>");
    html.push_str("<table style=\"width: 100%; border-collapse: collapse;\">");
    for question in &form.questions {
        let value = submission
            .data
            .get(&question.field_name)
            .map(answer_to_string)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "(not answered)".to_string());
        html.push_str("<tr>");
        html.push_str(&format!(
            "<td style=\"padding: 10px; border-bottom: 1px solid #eee; font-weight: bold; width: 30%;\">{}</td>",
            escape_html(&question.content.question_text)
        ));
        html.push_str(&format!(
            "<td style=\"padding: 10px; border-bottom: 1px solid #eee;\">{}</td>",
            escape_html(&value)
        ));
        html.push_str("</tr>");
    }
    html.push_str("</table>");
    html.push_str("<hr style=\"border: none; border-top: 1px solid #ddd; margin: 20px 0;\">");
    html.push_str(&format!(
        "<p style=\"font-size: 12px; color: #999;\">Submission ID: {}</p>",
        submission.id
    ));
    html.push_str(&format!(
        "<p style=\"font-size: 12px; color: #999;\">IP Address: {}</p>",
        escape_html(submission.ip_address.as_deref().unwrap_or("Unknown"))
    ));
    html.push_str("</body></html>");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
