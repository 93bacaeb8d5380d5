use super::{chat_body, model_for, post_classified, ChatCompletion, ProviderAdapter};
use crate::credentials::ProviderCredential;
use crate::failure::Failure;
use crate::http_client::HttpClient;
use crate::request::{ensure_supported, Provider, Request};
use crate::result::{Answer, NormalizedResult};
use async_trait::async_trait;
use std::sync::Arc;

const APP_TITLE: &str = "perplexity-cli";

/// Sonar models relayed through OpenRouter's chat-completions endpoint.
///
/// OpenRouter has no raw search endpoint, so `search` is refused here too,
/// before any request goes out.
pub struct OpenRouterAdapter {
    http: Arc<dyn HttpClient>,
    base_url: String,
}

impl OpenRouterAdapter {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenRouter
    }

    async fn issue_request(
        &self,
        request: &Request,
        credential: &ProviderCredential,
    ) -> Result<NormalizedResult, Failure> {
        ensure_supported(request.verb(), Provider::OpenRouter)?;
        let model = model_for(Provider::OpenRouter, request.verb())
            .ok_or_else(|| Failure::bad_args(format!("No model for {}", request.verb())))?;

        let auth = format!("Bearer {}", credential.secret);
        let url = format!("{}/chat/completions", self.base_url);
        let response = post_classified(
            self.http.as_ref(),
            Provider::OpenRouter,
            &url,
            &[
                ("Authorization", auth.as_str()),
                ("Accept", "application/json"),
                ("X-Title", APP_TITLE),
            ],
            &chat_body(model, request),
        )
        .await?;

        let completion = ChatCompletion::parse(Provider::OpenRouter, &response.body)?;
        // Perplexity's own citation list survives relaying for some models;
        // otherwise OpenRouter reports sources as url_citation annotations.
        let citations = match &completion.citations {
            Some(citations) => citations.clone(),
            None => completion.annotation_urls(),
        };

        Ok(NormalizedResult::Answer(Answer {
            response: completion.content().unwrap_or_default().to_string(),
            citations,
            model: completion.model.clone().unwrap_or_else(|| model.to_string()),
            provider: Provider::OpenRouter,
            usage: completion.usage,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::MockHttpClient;
    use crate::credentials::CredentialSource;
    use crate::failure::ErrorCode;
    use crate::http_client::HttpResponse;
    use crate::request::{RequestOptions, Verb};
    use std::time::Duration;

    fn credential() -> ProviderCredential {
        ProviderCredential {
            provider: Provider::OpenRouter,
            secret: "or-test".to_string(),
            source: CredentialSource::Keychain,
        }
    }

    fn adapter(http: Arc<MockHttpClient>) -> OpenRouterAdapter {
        OpenRouterAdapter::new(http, "https://openrouter.test/api/v1")
    }

    #[tokio::test]
    async fn test_research_request_shape() {
        let http = Arc::new(MockHttpClient::ok(
            r#"{"choices": [{"message": {"content": "findings"}}]}"#,
        ));
        let request = Request::new(Verb::Research, "topic", RequestOptions::default()).unwrap();

        let result = adapter(http.clone()).issue_request(&request, &credential()).await.unwrap();

        let sent = http.last_sent();
        assert_eq!(sent.url, "https://openrouter.test/api/v1/chat/completions");
        assert_eq!(sent.body["model"], "perplexity/sonar-deep-research");
        assert_eq!(http.header("authorization").as_deref(), Some("Bearer or-test"));
        assert_eq!(http.header("x-title").as_deref(), Some(APP_TITLE));

        let NormalizedResult::Answer(answer) = result else {
            panic!("expected an answer");
        };
        assert_eq!(answer.provider, Provider::OpenRouter);
        assert_eq!(answer.model, "perplexity/sonar-deep-research");
        assert!(answer.citations.is_empty());
    }

    #[tokio::test]
    async fn test_citations_from_annotations() {
        let http = Arc::new(MockHttpClient::ok(
            r#"{"model": "perplexity/sonar-pro", "choices": [{"message": {
                "content": "answer",
                "annotations": [
                    {"type": "url_citation", "url_citation": {"url": "https://one.example"}},
                    {"type": "url_citation", "url_citation": {"url": "https://two.example"}}
                ]}}]}"#,
        ));
        let request = Request::new(Verb::Ask, "q", RequestOptions::default()).unwrap();

        let result = adapter(http).issue_request(&request, &credential()).await.unwrap();

        let NormalizedResult::Answer(answer) = result else {
            panic!("expected an answer");
        };
        assert_eq!(answer.citations, vec!["https://one.example", "https://two.example"]);
    }

    #[tokio::test]
    async fn test_top_level_citations_preferred() {
        let http = Arc::new(MockHttpClient::ok(
            r#"{"choices": [{"message": {"content": "answer", "annotations": [
                    {"type": "url_citation", "url_citation": {"url": "https://annotation.example"}}
                ]}}],
                "citations": ["https://top.example"]}"#,
        ));
        let request = Request::new(Verb::Ask, "q", RequestOptions::default()).unwrap();

        let NormalizedResult::Answer(answer) =
            adapter(http).issue_request(&request, &credential()).await.unwrap()
        else {
            panic!("expected an answer");
        };
        assert_eq!(answer.citations, vec!["https://top.example"]);
    }

    #[tokio::test]
    async fn test_search_refused_without_network_call() {
        let http = Arc::new(MockHttpClient::ok("{}"));
        // A search request validated without an override still reaches this
        // adapter only if the caller skipped provider selection.
        let request = Request::new(Verb::Search, "q", RequestOptions::default()).unwrap();

        let err = adapter(http.clone()).issue_request(&request, &credential()).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::BadArgs);
        assert!(http.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_carries_hint() {
        let http = Arc::new(MockHttpClient::new(vec![Ok(
            HttpResponse::new(429, "{}").with_retry_after("2"),
        )]));
        let request = Request::new(Verb::Reason, "q", RequestOptions::default()).unwrap();

        let err = adapter(http).issue_request(&request, &credential()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimited);
        assert_eq!(err.retry_after, Some(Duration::from_secs(2)));
    }
}
