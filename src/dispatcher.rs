use crate::{
    adapters::{OpenRouterAdapter, PerplexityAdapter, ProviderAdapter},
    cli::{self, Invocation},
    config::Config,
    credentials::{AuthReport, CredentialResolver},
    failure::{ErrorCode, Failure},
    http_client::{HttpClient, ReqwestHttpClient},
    request::{ensure_supported, OutputFormat, Provider, Request, Verb},
    resilience::{with_resilience, ResiliencePolicy},
    result::NormalizedResult,
    thinking,
};
use std::ffi::OsString;
use std::sync::Arc;
use tracing::{debug, info};

/// A finished query with the attempt count it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Answered {
    pub request: Request,
    pub result: NormalizedResult,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Help(String),
    Answered(Answered),
    AuthStatus(AuthReport),
    Failed(Failure),
}

/// Outcome of one invocation plus the format it should be rendered in.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub format: OutputFormat,
    pub outcome: Outcome,
}

impl Dispatched {
    pub fn failed(failure: Failure) -> Self {
        Self {
            format: OutputFormat::Json,
            outcome: Outcome::Failed(failure),
        }
    }

    pub fn help(text: String) -> Self {
        Self {
            format: OutputFormat::Text,
            outcome: Outcome::Help(text),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            Outcome::Help(_) | Outcome::Answered(_) => 0,
            Outcome::AuthStatus(report) if report.authenticated => 0,
            Outcome::AuthStatus(_) => i32::from(ErrorCode::Auth.code()),
            Outcome::Failed(failure) => failure.exit_code(),
        }
    }
}

/// Routes validated invocations to the right provider.
///
/// Holds one adapter per provider; which one runs is decided per request by
/// the credential resolver and the capability matrix.
pub struct Dispatcher {
    resolver: CredentialResolver,
    perplexity: Box<dyn ProviderAdapter>,
    openrouter: Box<dyn ProviderAdapter>,
    policy: ResiliencePolicy,
}

impl Dispatcher {
    /// Builds the production dispatcher: reqwest transport, real secret chain.
    pub fn new(config: &Config) -> Result<Self, Failure> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(config.timeout()).map_err(
            |e| {
                Failure::remote(format!("Failed to initialise HTTP client: {}", e))
                    .with_retryable(false)
            },
        )?);

        Ok(Self::with_components(
            CredentialResolver::from_config(config),
            Box::new(PerplexityAdapter::new(
                http.clone(),
                config.base_url(Provider::Perplexity),
            )),
            Box::new(OpenRouterAdapter::new(http, config.base_url(Provider::OpenRouter))),
            config.resilience_policy(),
        ))
    }

    /// Builds a dispatcher from injected parts (for testing).
    pub fn with_components(
        resolver: CredentialResolver,
        perplexity: Box<dyn ProviderAdapter>,
        openrouter: Box<dyn ProviderAdapter>,
        policy: ResiliencePolicy,
    ) -> Self {
        Self {
            resolver,
            perplexity,
            openrouter,
            policy,
        }
    }

    fn adapter(&self, provider: Provider) -> &dyn ProviderAdapter {
        match provider {
            Provider::Perplexity => self.perplexity.as_ref(),
            Provider::OpenRouter => self.openrouter.as_ref(),
        }
    }

    /// Parses argv and runs it. Argument errors never reach the resolver.
    pub async fn dispatch<I, T>(&self, argv: I) -> Dispatched
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match cli::parse_args(argv) {
            Ok(invocation) => self.execute(invocation).await,
            Err(failure) => Dispatched::failed(failure),
        }
    }

    pub async fn execute(&self, invocation: Invocation) -> Dispatched {
        let format = invocation.format();
        let outcome = match invocation {
            Invocation::Help(text) => Outcome::Help(text),
            Invocation::AuthStatus { .. } => Outcome::AuthStatus(self.resolver.status()),
            Invocation::Query(request) => match self.run_query(request).await {
                Ok(answered) => Outcome::Answered(answered),
                Err(failure) => Outcome::Failed(failure),
            },
        };
        Dispatched { format, outcome }
    }

    /// Resolves a provider, calls it under the resilience policy, and
    /// post-processes the answer.
    pub async fn run_query(&self, request: Request) -> Result<Answered, Failure> {
        let verb = request.verb();
        let wanted = match verb {
            Verb::Search => Some(Provider::Perplexity),
            _ => request.provider_override(),
        };
        let credential = self.resolver.resolve(wanted)?;
        ensure_supported(verb, credential.provider)?;

        let adapter = self.adapter(credential.provider);
        info!(
            "Dispatching {} via {} ({} credential)",
            verb,
            adapter.provider(),
            credential.source.as_str()
        );
        let attempted = with_resilience(&self.policy, |attempt| {
            debug!(attempt, "Issuing {} request to {}", verb, credential.provider);
            adapter.issue_request(&request, &credential)
        })
        .await?;

        let mut result = attempted.value;
        if !result.matches_verb(verb) {
            return Err(Failure::remote(format!(
                "{} returned {} for a {} request",
                credential.provider,
                result.kind(),
                verb
            )));
        }
        if request.strip_thinking() {
            if let NormalizedResult::Answer(answer) = &mut result {
                answer.response = thinking::strip_thinking(&answer.response);
            }
        }

        Ok(Answered {
            request,
            result,
            attempts: attempted.attempts,
        })
    }
}
