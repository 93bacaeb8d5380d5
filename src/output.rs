//! Rendering of dispatch outcomes to stdout/stderr.
//!
//! Successes go to stdout as a JSON envelope or human-readable text. Failures
//! always go to stderr as a single-line JSON envelope, whatever `--format`
//! says, so callers can parse errors without knowing the format they asked for.

use crate::credentials::{AuthReport, ProviderStatus};
use crate::dispatcher::{Answered, Dispatched, Outcome};
use crate::failure::Failure;
use crate::request::OutputFormat;
use crate::result::{Answer, NormalizedResult, SearchHit};
use serde_json::{json, Value};
use std::io::{self, Write};
use tracing::warn;

/// Bytes destined for each stream plus the process exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

pub fn error_envelope(failure: &Failure) -> Value {
    json!({
        "status": "error",
        "error": {
            "message": failure.message,
            "code": failure.code,
            "retryable": failure.retryable,
            "remediation": failure.remediation,
        }
    })
}

pub fn success_envelope(data: Value, metadata: Value) -> Value {
    json!({
        "status": "success",
        "data": data,
        "metadata": metadata,
    })
}

fn answered_envelope(answered: &Answered) -> Value {
    let request = &answered.request;
    match &answered.result {
        NormalizedResult::SearchResults(hits) => success_envelope(
            json!(hits),
            json!({ "count": hits.len(), "query": request.query() }),
        ),
        NormalizedResult::Answer(answer) => success_envelope(
            json!(answer),
            json!({
                "verb": request.verb(),
                "query": request.query(),
                "usage": answer.usage,
                "attempts": answered.attempts,
            }),
        ),
    }
}

fn auth_envelope(report: &AuthReport) -> Value {
    success_envelope(json!(report), json!({}))
}

fn search_text(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found.".to_string();
    }

    let mut out = format!("Found {} search results:\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!("\n{}. **{}**\n   URL: {}\n", i + 1, hit.title, hit.url));
        if !hit.snippet.is_empty() {
            out.push_str(&format!("   {}\n", hit.snippet));
        }
        if let Some(date) = &hit.date {
            out.push_str(&format!("   Date: {}\n", date));
        }
    }
    out.trim_end().to_string()
}

fn answer_text(answer: &Answer) -> String {
    let mut out = answer.response.clone();
    if !answer.citations.is_empty() {
        out.push_str("\n\nCitations:");
        for (i, url) in answer.citations.iter().enumerate() {
            out.push_str(&format!("\n[{}] {}", i + 1, url));
        }
    }
    out
}

fn provider_line(name: &str, status: &ProviderStatus) -> String {
    match status.token_source {
        Some(source) if status.authenticated => {
            format!("{}: authenticated ({})", name, source.as_str())
        }
        _ => format!("{}: not authenticated", name),
    }
}

fn auth_text(report: &AuthReport) -> String {
    let mut lines = vec![
        provider_line("perplexity", &report.providers.perplexity),
        provider_line("openrouter", &report.providers.openrouter),
    ];
    if let Some(remediation) = &report.remediation {
        lines.push(remediation.clone());
    }
    lines.join("\n")
}

fn success_body(format: OutputFormat, outcome: &Outcome) -> Option<String> {
    let text = match (outcome, format) {
        (Outcome::Help(text), _) => return Some(text.trim_end().to_string()),
        (Outcome::Failed(_), _) => return None,
        (Outcome::Answered(answered), OutputFormat::Json) => {
            answered_envelope(answered).to_string()
        }
        (Outcome::AuthStatus(report), OutputFormat::Json) => auth_envelope(report).to_string(),
        (Outcome::Answered(answered), OutputFormat::Text) => match &answered.result {
            NormalizedResult::SearchResults(hits) => search_text(hits),
            NormalizedResult::Answer(answer) => answer_text(answer),
        },
        (Outcome::AuthStatus(report), OutputFormat::Text) => auth_text(report),
    };
    Some(text)
}

fn failure_of(outcome: &Outcome) -> Option<Failure> {
    match outcome {
        Outcome::Failed(failure) => Some(failure.clone()),
        Outcome::AuthStatus(report) if !report.authenticated => Some(
            Failure::auth("No credentials found for either provider").with_remediation(
                report.remediation.clone().unwrap_or_else(|| {
                    "Set PERPLEXITY_API_KEY or OPENROUTER_API_KEY env var".to_string()
                }),
            ),
        ),
        _ => None,
    }
}

/// Renders into in-memory buffers.
pub fn render(dispatched: &Dispatched) -> Rendered {
    let stdout = success_body(dispatched.format, &dispatched.outcome)
        .map(|body| format!("{}\n", body))
        .unwrap_or_default();
    let stderr = failure_of(&dispatched.outcome)
        .map(|failure| format!("{}\n", error_envelope(&failure)))
        .unwrap_or_default();

    Rendered {
        stdout,
        stderr,
        exit_code: dispatched.exit_code(),
    }
}

fn write_stream<W: Write>(stream: &mut W, text: &str) -> io::Result<()> {
    stream.write_all(text.as_bytes())?;
    stream.flush()
}

/// Writes a rendered outcome to the given streams and returns the exit code.
///
/// A failed stdout write (closed pipe) does not stop the error envelope from
/// reaching stderr, and never changes the exit code.
pub fn render_to<O: Write, E: Write>(
    dispatched: &Dispatched,
    stdout: &mut O,
    stderr: &mut E,
) -> i32 {
    let rendered = render(dispatched);
    if let Err(e) = write_stream(stdout, &rendered.stdout) {
        warn!("Failed to write stdout: {}", e);
    }
    if let Err(e) = write_stream(stderr, &rendered.stderr) {
        warn!("Failed to write stderr: {}", e);
    }
    rendered.exit_code
}
