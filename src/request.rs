//! Normalized requests, the capability matrix, and argument validation.
//!
//! A [`Request`] can only be built through [`Request::new`], which validates
//! ranges, enums and verb/option compatibility. Anything that gets past it is
//! safe to hand to the credential resolver and the adapters.

use crate::failure::Failure;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub const MAX_RESULTS_RANGE: (i64, i64) = (1, 20);
pub const DEFAULT_MAX_RESULTS: u32 = 10;
pub const MAX_TOKENS_RANGE: (i64, i64) = (256, 2048);
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// The four operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Search,
    Ask,
    Research,
    Reason,
}

impl Verb {
    pub const ALL: [Verb; 4] = [Verb::Search, Verb::Ask, Verb::Research, Verb::Reason];

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Search => "search",
            Verb::Ask => "ask",
            Verb::Research => "research",
            Verb::Reason => "reason",
        }
    }

    /// Verbs answered by a chat model rather than the raw search endpoint.
    pub fn is_answer(self) -> bool {
        !matches!(self, Verb::Search)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = Failure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verb::ALL
            .into_iter()
            .find(|verb| verb.as_str() == s)
            .ok_or_else(|| Failure::bad_args(format!("Unknown command '{}'", s)))
    }
}

/// Upstream providers. Perplexity is the direct API, OpenRouter the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Perplexity,
    OpenRouter,
}

impl Provider {
    /// Resolution preference order when no provider is requested.
    pub const PREFERENCE: [Provider; 2] = [Provider::Perplexity, Provider::OpenRouter];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Perplexity => "perplexity",
            Provider::OpenRouter => "openrouter",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn env_var(self) -> &'static str {
        match self {
            Provider::Perplexity => "PERPLEXITY_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Failure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "perplexity" => Ok(Provider::Perplexity),
            "openrouter" => Ok(Provider::OpenRouter),
            other => Err(Failure::bad_args(format!(
                "Unknown provider '{}' (expected perplexity or openrouter)",
                other
            ))),
        }
    }
}

/// Which verbs each provider can serve. OpenRouter has no search endpoint.
const CAPABILITY_MATRIX: [(Verb, Provider, bool); 8] = [
    (Verb::Search, Provider::Perplexity, true),
    (Verb::Search, Provider::OpenRouter, false),
    (Verb::Ask, Provider::Perplexity, true),
    (Verb::Ask, Provider::OpenRouter, true),
    (Verb::Research, Provider::Perplexity, true),
    (Verb::Research, Provider::OpenRouter, true),
    (Verb::Reason, Provider::Perplexity, true),
    (Verb::Reason, Provider::OpenRouter, true),
];

/// Looks up the capability matrix.
pub fn supports(verb: Verb, provider: Provider) -> bool {
    CAPABILITY_MATRIX
        .iter()
        .any(|&(v, p, supported)| v == verb && p == provider && supported)
}

/// Fails with BAD_ARGS when `provider` cannot serve `verb`.
pub fn ensure_supported(verb: Verb, provider: Provider) -> Result<(), Failure> {
    if supports(verb, provider) {
        return Ok(());
    }
    Err(Failure::bad_args(format!(
        "The {} command is only available via the Perplexity API (not {})",
        verb,
        match provider {
            Provider::Perplexity => "Perplexity",
            Provider::OpenRouter => "OpenRouter",
        }
    ))
    .with_remediation("Use --provider perplexity or set PERPLEXITY_API_KEY"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for OutputFormat {
    type Err = Failure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "text" => Ok(OutputFormat::Text),
            other => Err(Failure::bad_args(format!(
                "Unknown format '{}' (expected json or text)",
                other
            ))),
        }
    }
}

/// Raw, unvalidated options as they come off the command line.
///
/// `None` means "not given"; defaults are applied by [`Request::new`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub max_results: Option<i64>,
    pub max_tokens: Option<i64>,
    pub country: Option<String>,
    pub system_prompt: Option<String>,
    pub strip_thinking: bool,
    pub format: OutputFormat,
    pub provider_override: Option<Provider>,
}

/// A validated, immutable request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    verb: Verb,
    query: String,
    max_results: u32,
    max_tokens: u32,
    country: Option<String>,
    system_prompt: Option<String>,
    strip_thinking: bool,
    format: OutputFormat,
    provider_override: Option<Provider>,
}

impl Request {
    /// Validates `options` against `verb` and builds the request.
    ///
    /// # Errors
    ///
    /// Returns a BAD_ARGS failure when the query is blank, a numeric option is
    /// out of range, the country code is malformed, an option does not apply
    /// to the verb, or the provider override cannot serve the verb.
    pub fn new(
        verb: Verb,
        query: impl Into<String>,
        options: RequestOptions,
    ) -> Result<Self, Failure> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(Failure::bad_args("Query must not be empty"));
        }

        if let Some(provider) = options.provider_override {
            ensure_supported(verb, provider)?;
        }

        if verb.is_answer() {
            for (flag, given) in [
                ("--max-results", options.max_results.is_some()),
                ("--max-tokens", options.max_tokens.is_some()),
                ("--country", options.country.is_some()),
            ] {
                if given {
                    return Err(Failure::bad_args(format!(
                        "{} is only valid for the search command",
                        flag
                    )));
                }
            }
        } else {
            if options.system_prompt.is_some() {
                return Err(Failure::bad_args("--system is not valid for the search command"));
            }
            if options.strip_thinking {
                return Err(Failure::bad_args(
                    "--strip-thinking is not valid for the search command",
                ));
            }
        }

        let max_results = match options.max_results {
            Some(value) => check_range("--max-results", value, MAX_RESULTS_RANGE)?,
            None => DEFAULT_MAX_RESULTS,
        };
        let max_tokens = match options.max_tokens {
            Some(value) => check_range("--max-tokens", value, MAX_TOKENS_RANGE)?,
            None => DEFAULT_MAX_TOKENS,
        };
        let country = options.country.as_deref().map(normalize_country).transpose()?;
        let system_prompt = options.system_prompt.filter(|s| !s.trim().is_empty());

        Ok(Self {
            verb,
            query,
            max_results,
            max_tokens,
            country,
            system_prompt,
            strip_thinking: options.strip_thinking,
            format: options.format,
            provider_override: options.provider_override,
        })
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn max_results(&self) -> u32 {
        self.max_results
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn strip_thinking(&self) -> bool {
        self.strip_thinking
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn provider_override(&self) -> Option<Provider> {
        self.provider_override
    }
}

fn check_range(flag: &str, value: i64, (min, max): (i64, i64)) -> Result<u32, Failure> {
    if value < min || value > max {
        return Err(Failure::bad_args(format!(
            "{} must be between {} and {} (got {})",
            flag, min, max, value
        )));
    }
    // In range, so it fits.
    Ok(value as u32)
}

fn normalize_country(code: &str) -> Result<String, Failure> {
    let code = code.trim();
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(Failure::bad_args(format!(
            "--country must be an ISO 3166-1 alpha-2 code such as US or GB (got '{}')",
            code
        ))
        .with_remediation("Pass a two-letter country code"))
    }
}
