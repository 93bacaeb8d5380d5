use super::{chat_body, malformed, model_for, post_classified, ChatCompletion, ProviderAdapter};
use crate::credentials::ProviderCredential;
use crate::failure::Failure;
use crate::http_client::HttpClient;
use crate::request::{ensure_supported, Provider, Request, Verb};
use crate::result::{Answer, NormalizedResult, SearchHit};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    title: Option<String>,
    url: Option<String>,
    snippet: Option<String>,
    date: Option<String>,
}

impl From<RawHit> for SearchHit {
    fn from(hit: RawHit) -> Self {
        SearchHit {
            title: hit.title.unwrap_or_default(),
            url: hit.url.unwrap_or_default(),
            snippet: hit.snippet.unwrap_or_default(),
            date: hit.date.filter(|d| !d.is_empty()),
        }
    }
}

/// Direct access to the Perplexity API: `/search` and `/chat/completions`.
pub struct PerplexityAdapter {
    http: Arc<dyn HttpClient>,
    base_url: String,
}

impl PerplexityAdapter {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn search(&self, request: &Request, auth: &str) -> Result<NormalizedResult, Failure> {
        let mut body = json!({
            "query": request.query(),
            "max_results": request.max_results(),
            "max_tokens_per_page": request.max_tokens(),
        });
        if let Some(country) = request.country() {
            body["country"] = json!(country);
        }

        let url = format!("{}/search", self.base_url);
        let response = post_classified(
            self.http.as_ref(),
            Provider::Perplexity,
            &url,
            &[("Authorization", auth), ("Accept", "application/json")],
            &body,
        )
        .await?;

        let parsed: SearchResponse = serde_json::from_str(&response.body)
            .map_err(|e| malformed(Provider::Perplexity, e))?;
        info!("Search returned {} results", parsed.results.len());

        Ok(NormalizedResult::SearchResults(
            parsed.results.into_iter().map(SearchHit::from).collect(),
        ))
    }

    async fn chat(&self, request: &Request, auth: &str) -> Result<NormalizedResult, Failure> {
        let model = model_for(Provider::Perplexity, request.verb())
            .ok_or_else(|| Failure::bad_args(format!("No model for {}", request.verb())))?;

        let url = format!("{}/chat/completions", self.base_url);
        let response = post_classified(
            self.http.as_ref(),
            Provider::Perplexity,
            &url,
            &[("Authorization", auth), ("Accept", "application/json")],
            &chat_body(model, request),
        )
        .await?;

        let completion = ChatCompletion::parse(Provider::Perplexity, &response.body)?;
        // Older responses carry `citations`; newer ones only `search_results`.
        let citations = match &completion.citations {
            Some(citations) => citations.clone(),
            None => completion.search_result_urls(),
        };

        Ok(NormalizedResult::Answer(Answer {
            response: completion.content().unwrap_or_default().to_string(),
            citations,
            model: completion.model.clone().unwrap_or_else(|| model.to_string()),
            provider: Provider::Perplexity,
            usage: completion.usage,
        }))
    }
}

#[async_trait]
impl ProviderAdapter for PerplexityAdapter {
    fn provider(&self) -> Provider {
        Provider::Perplexity
    }

    async fn issue_request(
        &self,
        request: &Request,
        credential: &ProviderCredential,
    ) -> Result<NormalizedResult, Failure> {
        ensure_supported(request.verb(), Provider::Perplexity)?;
        let auth = format!("Bearer {}", credential.secret);

        match request.verb() {
            Verb::Search => self.search(request, &auth).await,
            Verb::Ask | Verb::Research | Verb::Reason => self.chat(request, &auth).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::MockHttpClient;
    use crate::credentials::CredentialSource;
    use crate::failure::ErrorCode;
    use crate::http_client::HttpResponse;
    use crate::request::RequestOptions;

    fn credential() -> ProviderCredential {
        ProviderCredential {
            provider: Provider::Perplexity,
            secret: "pplx-test".to_string(),
            source: CredentialSource::Environment,
        }
    }

    fn adapter(http: Arc<MockHttpClient>) -> PerplexityAdapter {
        PerplexityAdapter::new(http, "https://api.perplexity.test")
    }

    #[tokio::test]
    async fn test_search_request_shape() {
        let http = Arc::new(MockHttpClient::ok(r#"{"results": []}"#));
        let request = Request::new(
            Verb::Search,
            "rust",
            RequestOptions {
                max_results: Some(5),
                country: Some("us".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        adapter(http.clone()).issue_request(&request, &credential()).await.unwrap();

        let sent = http.last_sent();
        assert_eq!(sent.url, "https://api.perplexity.test/search");
        assert_eq!(
            sent.body,
            json!({"query": "rust", "max_results": 5, "max_tokens_per_page": 1024, "country": "US"})
        );
        assert_eq!(http.header("authorization").as_deref(), Some("Bearer pplx-test"));
    }

    #[tokio::test]
    async fn test_search_hits_normalized_in_order() {
        let http = Arc::new(MockHttpClient::ok(
            r#"{"results": [
                {"title": "Tokio", "url": "https://tokio.rs", "snippet": "runtime",
                 "date": "2024-01-01"},
                {"url": "https://docs.rs", "snippet": "docs"}
            ]}"#,
        ));
        let request = Request::new(Verb::Search, "rust", RequestOptions::default()).unwrap();

        let result = adapter(http).issue_request(&request, &credential()).await.unwrap();

        let NormalizedResult::SearchResults(hits) = result else {
            panic!("expected search results");
        };
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Tokio");
        assert_eq!(hits[0].date.as_deref(), Some("2024-01-01"));
        assert_eq!(hits[1].title, "");
        assert_eq!(hits[1].url, "https://docs.rs");
        assert!(hits[1].date.is_none());
    }

    #[tokio::test]
    async fn test_search_malformed_payload() {
        let http = Arc::new(MockHttpClient::ok("not json"));
        let request = Request::new(Verb::Search, "rust", RequestOptions::default()).unwrap();

        let err = adapter(http).issue_request(&request, &credential()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RemoteError);
    }

    #[tokio::test]
    async fn test_ask_uses_sonar_pro_and_system_prompt() {
        let http = Arc::new(MockHttpClient::ok(
            r#"{"model": "sonar-pro", "choices": [{"message": {"content": "Paris"}}],
                "citations": ["https://a.example", "https://b.example", "https://a.example"],
                "usage": {"total_tokens": 42}}"#,
        ));
        let request = Request::new(
            Verb::Ask,
            "capital of France?",
            RequestOptions {
                system_prompt: Some("be brief".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let result = adapter(http.clone()).issue_request(&request, &credential()).await.unwrap();

        let sent = http.last_sent();
        assert_eq!(sent.url, "https://api.perplexity.test/chat/completions");
        assert_eq!(sent.body["model"], "sonar-pro");
        assert_eq!(sent.body["messages"][0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(
            sent.body["messages"][1],
            json!({"role": "user", "content": "capital of France?"})
        );

        let NormalizedResult::Answer(answer) = result else {
            panic!("expected an answer");
        };
        assert_eq!(answer.response, "Paris");
        // Duplicates and order are kept as the provider sent them.
        assert_eq!(
            answer.citations,
            vec!["https://a.example", "https://b.example", "https://a.example"]
        );
        assert_eq!(answer.provider, Provider::Perplexity);
        assert_eq!(answer.usage, Some(json!({"total_tokens": 42})));
    }

    #[tokio::test]
    async fn test_citations_fall_back_to_search_results() {
        let http = Arc::new(MockHttpClient::ok(
            r#"{"choices": [{"message": {"content": "answer"}}],
                "search_results": [{"title": "x", "url": "https://x.example"}]}"#,
        ));
        let request = Request::new(Verb::Reason, "why", RequestOptions::default()).unwrap();

        let result = adapter(http.clone()).issue_request(&request, &credential()).await.unwrap();

        assert_eq!(http.last_sent().body["model"], "sonar-reasoning-pro");
        let NormalizedResult::Answer(answer) = result else {
            panic!("expected an answer");
        };
        assert_eq!(answer.citations, vec!["https://x.example"]);
        assert_eq!(answer.model, "sonar-reasoning-pro");
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_auth() {
        let http = Arc::new(MockHttpClient::new(vec![Ok(HttpResponse::new(401, "invalid key"))]));
        let request = Request::new(Verb::Ask, "hi", RequestOptions::default()).unwrap();

        let err = adapter(http).issue_request(&request, &credential()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Auth);
    }

    #[tokio::test]
    async fn test_transport_timeout_maps_to_timeout() {
        let http = Arc::new(MockHttpClient::new(vec![Err(
            crate::http_client::TransportError::Timeout,
        )]));
        let request = Request::new(Verb::Research, "deep", RequestOptions::default()).unwrap();

        let err = adapter(http).issue_request(&request, &credential()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert!(err.retryable);
    }
}
