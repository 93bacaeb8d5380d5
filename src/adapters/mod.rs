//! Provider adapters: one request shape in, one result shape out.
//!
//! Each upstream gets an implementation of [`ProviderAdapter`]:
//!
//! - [`PerplexityAdapter`] talks to the Perplexity API directly and is the
//!   only one that can run raw web searches.
//! - [`OpenRouterAdapter`] relays the same Sonar models through OpenRouter.
//!
//! Both translate HTTP statuses and transport errors into classified
//! [`Failure`]s with the helpers in this module, so the classification rules
//! exist exactly once.

mod openrouter;
mod perplexity;

pub use openrouter::OpenRouterAdapter;
pub use perplexity::PerplexityAdapter;

use crate::credentials::ProviderCredential;
use crate::failure::Failure;
use crate::http_client::{HttpClient, HttpResponse, TransportError};
use crate::request::{Provider, Request, Verb};
use crate::result::NormalizedResult;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const ERROR_BODY_LIMIT: usize = 500;

/// Upstream model per (provider, verb). Search has no model.
const MODELS: [(Provider, Verb, &str); 6] = [
    (Provider::Perplexity, Verb::Ask, "sonar-pro"),
    (Provider::Perplexity, Verb::Research, "sonar-deep-research"),
    (Provider::Perplexity, Verb::Reason, "sonar-reasoning-pro"),
    (Provider::OpenRouter, Verb::Ask, "perplexity/sonar-pro"),
    (Provider::OpenRouter, Verb::Research, "perplexity/sonar-deep-research"),
    (Provider::OpenRouter, Verb::Reason, "perplexity/sonar-reasoning"),
];

pub fn model_for(provider: Provider, verb: Verb) -> Option<&'static str> {
    MODELS
        .iter()
        .find(|(p, v, _)| *p == provider && *v == verb)
        .map(|(_, _, model)| *model)
}

/// A provider that can serve normalized requests.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider this adapter talks to.
    fn provider(&self) -> Provider;

    /// Performs one upstream call.
    ///
    /// # Errors
    ///
    /// Returns a classified [`Failure`]; never a raw transport error.
    async fn issue_request(
        &self,
        request: &Request,
        credential: &ProviderCredential,
    ) -> Result<NormalizedResult, Failure>;
}

/// Maps a transport error to the taxonomy.
pub(crate) fn classify_transport(provider: Provider, err: TransportError) -> Failure {
    match err {
        TransportError::Timeout => Failure::timeout(format!("Request to {} timed out", provider))
            .with_remediation("Increase PERPLEXITY_TIMEOUT_MS or try again"),
        TransportError::Connect(detail) => {
            Failure::remote(format!("Connection error talking to {}: {}", provider, detail))
        }
        TransportError::Request(detail) => {
            Failure::remote(format!("Request to {} failed: {}", provider, detail))
        }
    }
}

/// Parses a `Retry-After` value given in seconds.
///
/// Negative, non-finite, and unrepresentably large values are ignored.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// `3s`, `0.5s`, `1.25s`: whole seconds print without a fraction.
fn format_wait(wait: Duration) -> String {
    format!("{}s", wait.as_secs_f64())
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

/// Maps a non-2xx status to the taxonomy.
pub(crate) fn check_status(provider: Provider, response: &HttpResponse) -> Result<(), Failure> {
    if response.is_success() {
        return Ok(());
    }

    let status = response.status;
    let failure = match status {
        401 | 403 => Failure::auth(format!(
            "Authentication failed: {} rejected the API key (HTTP {})",
            provider, status
        ))
        .with_remediation(format!("Check your {} value", provider.env_var())),
        429 => {
            let retry_after = response.retry_after.as_deref().and_then(parse_retry_after);
            match retry_after {
                Some(wait) => Failure::rate_limited(format!(
                    "Rate limited by {}. Retry after {}",
                    provider,
                    format_wait(wait)
                ))
                .with_remediation(format!("Retry after {}", format_wait(wait)))
                .with_retry_after(wait),
                None => Failure::rate_limited(format!("Rate limited by {}", provider))
                    .with_remediation("Wait a moment and try again"),
            }
        }
        500..=599 => Failure::remote(format!(
            "API error {}: {}",
            status,
            truncate(&response.body)
        )),
        _ => Failure::remote(format!(
            "API error {}: {}",
            status,
            truncate(&response.body)
        ))
        .with_retryable(false),
    };

    debug!(http_status = status, code = %failure.code, "Upstream returned an error status");
    Err(failure)
}

/// Posts `body` and classifies everything that is not a 2xx response.
pub(crate) async fn post_classified(
    http: &dyn HttpClient,
    provider: Provider,
    url: &str,
    headers: &[(&str, &str)],
    body: &Value,
) -> Result<HttpResponse, Failure> {
    info!("Calling {} at {}", provider, url);
    let response = http
        .post_json(url, headers, body)
        .await
        .map_err(|e| classify_transport(provider, e))?;
    check_status(provider, &response)?;
    Ok(response)
}

pub(crate) fn malformed(provider: Provider, detail: impl std::fmt::Display) -> Failure {
    Failure::remote(format!("Malformed response from {}: {}", provider, detail))
}

/// Chat-completions body shared by both providers.
pub(crate) fn chat_body(model: &str, request: &Request) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = request.system_prompt() {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": request.query()}));
    json!({"model": model, "messages": messages})
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletion {
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    pub citations: Option<Vec<String>>,
    pub search_results: Option<Vec<SearchResultRef>>,
    pub usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatMessage {
    pub content: Option<String>,
    pub annotations: Option<Vec<Annotation>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Annotation {
    #[serde(rename = "type")]
    pub kind: String,
    pub url_citation: Option<UrlCitation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UrlCitation {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResultRef {
    pub url: Option<String>,
}

impl ChatCompletion {
    /// Parses a chat-completions body and checks that it carries an answer.
    pub(crate) fn parse(provider: Provider, body: &str) -> Result<Self, Failure> {
        let completion: ChatCompletion =
            serde_json::from_str(body).map_err(|e| malformed(provider, e))?;
        match completion.content() {
            Some(content) if !content.trim().is_empty() => Ok(completion),
            Some(_) => Err(malformed(provider, "empty answer")),
            None => Err(malformed(provider, "missing choices[0].message.content")),
        }
    }

    pub(crate) fn content(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }

    pub(crate) fn annotation_urls(&self) -> Vec<String> {
        self.choices
            .first()
            .and_then(|choice| choice.message.annotations.as_ref())
            .map(|annotations| {
                annotations
                    .iter()
                    .filter(|a| a.kind == "url_citation")
                    .filter_map(|a| a.url_citation.as_ref().map(|c| c.url.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn search_result_urls(&self) -> Vec<String> {
        self.search_results
            .as_ref()
            .map(|results| results.iter().filter_map(|r| r.url.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// A captured outgoing request.
    #[derive(Debug, Clone)]
    pub struct SentRequest {
        pub url: String,
        pub headers: Vec<(String, String)>,
        pub body: Value,
    }

    /// Mock HTTP client that replays canned responses in order.
    pub struct MockHttpClient {
        responses: Mutex<Vec<Result<HttpResponse, TransportError>>>,
        pub sent: Mutex<Vec<SentRequest>>,
    }

    impl MockHttpClient {
        pub fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn ok(body: &str) -> Self {
            Self::new(vec![Ok(HttpResponse::new(200, body))])
        }

        pub fn last_sent(&self) -> SentRequest {
            self.sent.lock().unwrap().last().cloned().expect("no request sent")
        }

        pub fn header(&self, name: &str) -> Option<String> {
            self.last_sent()
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn post_json(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &Value,
        ) -> Result<HttpResponse, TransportError> {
            self.sent.lock().unwrap().push(SentRequest {
                url: url.to_string(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: body.clone(),
            });
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(TransportError::Request("no canned response left".to_string()));
            }
            responses.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::ErrorCode;

    #[test]
    fn test_model_table() {
        assert_eq!(model_for(Provider::Perplexity, Verb::Ask), Some("sonar-pro"));
        assert_eq!(model_for(Provider::Perplexity, Verb::Reason), Some("sonar-reasoning-pro"));
        assert_eq!(
            model_for(Provider::OpenRouter, Verb::Research),
            Some("perplexity/sonar-deep-research")
        );
        assert_eq!(
            model_for(Provider::OpenRouter, Verb::Reason),
            Some("perplexity/sonar-reasoning")
        );
        assert_eq!(model_for(Provider::Perplexity, Verb::Search), None);
    }

    // =========================================================================
    // Status classification
    // =========================================================================

    #[test]
    fn test_unauthorized_and_forbidden_are_auth() {
        for status in [401, 403] {
            let err =
                check_status(Provider::Perplexity, &HttpResponse::new(status, "nope")).unwrap_err();
            assert_eq!(err.code, ErrorCode::Auth);
            assert!(!err.retryable);
        }
    }

    #[test]
    fn test_rate_limited_surfaces_retry_after() {
        let response = HttpResponse::new(429, "").with_retry_after("12");
        let err = check_status(Provider::OpenRouter, &response).unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimited);
        assert!(err.retryable);
        assert_eq!(err.retry_after, Some(Duration::from_secs(12)));
        assert_eq!(err.remediation.as_deref(), Some("Retry after 12s"));
    }

    #[test]
    fn test_rate_limited_without_hint() {
        let err = check_status(Provider::Perplexity, &HttpResponse::new(429, "")).unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimited);
        assert!(err.retry_after.is_none());
    }

    #[test]
    fn test_server_errors_are_retryable_remote_errors() {
        let response = HttpResponse::new(503, "overloaded");
        let err = check_status(Provider::Perplexity, &response).unwrap_err();
        assert_eq!(err.code, ErrorCode::RemoteError);
        assert!(err.retryable);
        assert!(err.message.contains("503"));
        assert!(err.message.contains("overloaded"));
    }

    #[test]
    fn test_other_client_errors_not_retryable() {
        let response = HttpResponse::new(400, "bad model");
        let err = check_status(Provider::Perplexity, &response).unwrap_err();
        assert_eq!(err.code, ErrorCode::RemoteError);
        assert!(!err.retryable);
    }

    #[test]
    fn test_long_error_body_truncated() {
        let body = "x".repeat(2000);
        let err = check_status(Provider::Perplexity, &HttpResponse::new(500, body)).unwrap_err();
        assert!(err.message.len() < 600);
    }

    #[test]
    fn test_transport_classification() {
        assert_eq!(
            classify_transport(Provider::Perplexity, TransportError::Timeout).code,
            ErrorCode::Timeout
        );
        let err =
            classify_transport(Provider::OpenRouter, TransportError::Connect("refused".into()));
        assert_eq!(err.code, ErrorCode::RemoteError);
        assert!(err.retryable);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("inf"), None);
        assert_eq!(parse_retry_after("NaN"), None);
        assert_eq!(parse_retry_after("1e30"), None);
        assert_eq!(parse_retry_after("1e20"), None);
    }

    #[test]
    fn test_huge_retry_after_still_rate_limited() {
        let response = HttpResponse::new(429, "").with_retry_after("1e30");
        let err = check_status(Provider::Perplexity, &response).unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimited);
        assert!(err.retryable);
        assert!(err.retry_after.is_none());
    }

    #[test]
    fn test_fractional_retry_after_not_truncated() {
        let response = HttpResponse::new(429, "").with_retry_after("0.5");
        let err = check_status(Provider::Perplexity, &response).unwrap_err();
        assert_eq!(err.retry_after, Some(Duration::from_millis(500)));
        assert_eq!(err.remediation.as_deref(), Some("Retry after 0.5s"));
        assert!(err.message.ends_with("Retry after 0.5s"));
    }

    // =========================================================================
    // Chat completion parsing
    // =========================================================================

    #[test]
    fn test_malformed_json_is_remote_error() {
        let err = ChatCompletion::parse(Provider::Perplexity, "<html>oops</html>").unwrap_err();
        assert_eq!(err.code, ErrorCode::RemoteError);
        assert!(err.message.starts_with("Malformed response from perplexity"));
    }

    #[test]
    fn test_missing_content_is_remote_error() {
        let err = ChatCompletion::parse(Provider::OpenRouter, r#"{"choices": []}"#).unwrap_err();
        assert!(err.message.contains("missing choices[0].message.content"));
    }

    #[test]
    fn test_annotation_urls_keep_order() {
        let body = r#"{
            "choices": [{"message": {"content": "hi", "annotations": [
                {"type": "url_citation", "url_citation": {"url": "https://b.example"}},
                {"type": "file", "url_citation": null},
                {"type": "url_citation", "url_citation": {"url": "https://a.example"}}
            ]}}]
        }"#;
        let completion = ChatCompletion::parse(Provider::OpenRouter, body).unwrap();
        assert_eq!(
            completion.annotation_urls(),
            vec!["https://b.example".to_string(), "https://a.example".to_string()]
        );
    }
}
