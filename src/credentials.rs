//! Credential resolution across environment, keychain and profile.
//!
//! The resolver never talks to the network and never validates a key; it
//! only answers "is there a non-blank secret for this provider, and where did
//! it come from". Lookup goes through the [`SecretSource`] trait so tests can
//! inject fixed secrets.

use crate::config::Config;
use crate::failure::Failure;
use crate::request::Provider;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

const KEYRING_SERVICE: &str = "perplexity";

/// Where a secret was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    Environment,
    Keychain,
    Profile,
}

impl CredentialSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialSource::Environment => "environment",
            CredentialSource::Keychain => "keychain",
            CredentialSource::Profile => "profile",
        }
    }
}

/// A resolved API key for one provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredential {
    pub provider: Provider,
    pub secret: String,
    pub source: CredentialSource,
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("provider", &self.provider)
            .field("secret", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Read-only access to stored secrets.
pub trait SecretSource: Send + Sync {
    /// Which kind of store this is.
    fn source(&self) -> CredentialSource;

    /// Returns the secret for `provider`, if one is stored and non-blank.
    fn get_secret(&self, provider: Provider) -> Option<String>;

    fn has_credential(&self, provider: Provider) -> bool {
        self.get_secret(provider).is_some()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Secrets from `PERPLEXITY_API_KEY` / `OPENROUTER_API_KEY`.
pub struct EnvironmentSecrets {
    vars: HashMap<Provider, String>,
}

impl EnvironmentSecrets {
    /// Snapshots the process environment.
    pub fn from_process_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Provider::PREFERENCE
            .into_iter()
            .filter_map(|provider| non_blank(lookup(provider.env_var())).map(|v| (provider, v)))
            .collect();
        Self { vars }
    }
}

impl SecretSource for EnvironmentSecrets {
    fn source(&self) -> CredentialSource {
        CredentialSource::Environment
    }

    fn get_secret(&self, provider: Provider) -> Option<String> {
        self.vars.get(&provider).cloned()
    }
}

/// Secrets stored in the OS keychain under service `perplexity`.
///
/// Any keychain error (no backend, locked store, missing entry) counts as
/// "no secret".
pub struct KeychainSecrets;

impl KeychainSecrets {
    fn user_for(provider: Provider) -> &'static str {
        match provider {
            Provider::Perplexity => "perplexity_api_key",
            Provider::OpenRouter => "openrouter_api_key",
        }
    }
}

impl SecretSource for KeychainSecrets {
    fn source(&self) -> CredentialSource {
        CredentialSource::Keychain
    }

    fn get_secret(&self, provider: Provider) -> Option<String> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, Self::user_for(provider));
        match entry.and_then(|e| e.get_password()) {
            Ok(secret) => non_blank(Some(secret)),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                debug!("Keychain lookup for {} failed: {}", provider, e);
                None
            }
        }
    }
}

/// Secrets written into `~/.perplexity/config.toml`.
pub struct ProfileSecrets {
    perplexity: Option<String>,
    openrouter: Option<String>,
}

impl ProfileSecrets {
    pub fn from_config(config: &Config) -> Self {
        Self {
            perplexity: non_blank(config.profile_key(Provider::Perplexity).map(str::to_string)),
            openrouter: non_blank(config.profile_key(Provider::OpenRouter).map(str::to_string)),
        }
    }
}

impl SecretSource for ProfileSecrets {
    fn source(&self) -> CredentialSource {
        CredentialSource::Profile
    }

    fn get_secret(&self, provider: Provider) -> Option<String> {
        match provider {
            Provider::Perplexity => self.perplexity.clone(),
            Provider::OpenRouter => self.openrouter.clone(),
        }
    }
}

/// Per-provider entry of the `auth status` report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_source: Option<CredentialSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatuses {
    pub perplexity: ProviderStatus,
    pub openrouter: ProviderStatus,
}

/// Result of checking both providers independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthReport {
    pub authenticated: bool,
    pub providers: ProviderStatuses,
    pub service: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

/// Walks an ordered chain of secret sources.
pub struct CredentialResolver {
    sources: Vec<Box<dyn SecretSource>>,
}

impl CredentialResolver {
    pub fn new(sources: Vec<Box<dyn SecretSource>>) -> Self {
        Self { sources }
    }

    /// Environment first, then keychain (unless disabled), then the config
    /// profile.
    pub fn from_config(config: &Config) -> Self {
        let mut sources: Vec<Box<dyn SecretSource>> =
            vec![Box::new(EnvironmentSecrets::from_process_env())];
        if config.use_keychain {
            sources.push(Box::new(KeychainSecrets));
        }
        sources.push(Box::new(ProfileSecrets::from_config(config)));
        Self::new(sources)
    }

    /// Kinds of store consulted, in lookup order.
    pub fn sources(&self) -> Vec<CredentialSource> {
        self.sources.iter().map(|source| source.source()).collect()
    }

    /// First credential found for `provider`, if any.
    pub fn credential_for(&self, provider: Provider) -> Option<ProviderCredential> {
        self.sources.iter().find_map(|source| {
            source.get_secret(provider).map(|secret| ProviderCredential {
                provider,
                secret,
                source: source.source(),
            })
        })
    }

    pub fn has_credential(&self, provider: Provider) -> bool {
        self.sources.iter().any(|source| source.has_credential(provider))
    }

    /// Picks the credential to use.
    ///
    /// With an explicit provider, that provider's credential or AUTH. Without
    /// one, Perplexity is preferred over OpenRouter.
    pub fn resolve(&self, explicit: Option<Provider>) -> Result<ProviderCredential, Failure> {
        if let Some(provider) = explicit {
            return self.credential_for(provider).ok_or_else(|| {
                Failure::auth(format!("{} not set", provider.env_var()))
                    .with_remediation(format!("Set {} env var", provider.env_var()))
            });
        }

        for provider in Provider::PREFERENCE {
            if let Some(credential) = self.credential_for(provider) {
                debug!("Using {} credential from {:?}", provider, credential.source);
                return Ok(credential);
            }
        }

        Err(Failure::auth("No credentials found for either provider")
            .with_remediation("Set PERPLEXITY_API_KEY or OPENROUTER_API_KEY env var"))
    }

    /// Checks both providers without failing.
    pub fn status(&self) -> AuthReport {
        let check = |provider| match self.credential_for(provider) {
            Some(credential) => ProviderStatus {
                authenticated: true,
                token_source: Some(credential.source),
            },
            None => ProviderStatus {
                authenticated: false,
                token_source: None,
            },
        };

        let perplexity = check(Provider::Perplexity);
        let openrouter = check(Provider::OpenRouter);
        let authenticated = perplexity.authenticated || openrouter.authenticated;

        AuthReport {
            authenticated,
            providers: ProviderStatuses { perplexity, openrouter },
            service: "perplexity",
            remediation: (!authenticated)
                .then(|| "Set PERPLEXITY_API_KEY or OPENROUTER_API_KEY env var".to_string()),
        }
    }
}
