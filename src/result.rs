//! Provider-agnostic result shapes returned by every adapter.

use crate::request::{Provider, Verb};
use serde::Serialize;

/// One raw web search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// A model-written answer for ask/research/reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub response: String,
    /// Citation URLs in the order the provider returned them.
    pub citations: Vec<String>,
    pub model: String,
    /// The provider that actually served the request.
    pub provider: Provider,
    /// Token accounting passed through from the provider, if any.
    #[serde(skip)]
    pub usage: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedResult {
    SearchResults(Vec<SearchHit>),
    Answer(Answer),
}

impl NormalizedResult {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizedResult::SearchResults(_) => "search_results",
            NormalizedResult::Answer(_) => "answer",
        }
    }

    /// Whether this variant is the one `verb` is expected to produce.
    pub fn matches_verb(&self, verb: Verb) -> bool {
        match self {
            NormalizedResult::SearchResults(_) => verb == Verb::Search,
            NormalizedResult::Answer(_) => verb.is_answer(),
        }
    }
}
