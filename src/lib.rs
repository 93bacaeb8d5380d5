//! Perplexity CLI - web search and grounded answers from the command line.
//!
//! This library provides the core of the `perplexity` binary:
//!
//! - **Raw web search** via the Perplexity Search API
//! - **Grounded answers** (`ask`, `research`, `reason`) via Perplexity
//!   directly or relayed through OpenRouter
//! - **Retry and deadline handling** for slow or rate-limited upstreams
//! - **A uniform output contract**: one JSON success envelope on stdout,
//!   one JSON error envelope on stderr
//!
//! # Architecture
//!
//! - [`cli`] - Argument parsing into validated invocations
//! - [`request`] - Verbs, providers, and the capability matrix
//! - [`credentials`] - Secret lookup and provider resolution
//! - [`dispatcher`] - Routes invocations to a provider adapter
//! - [`adapters`] - Perplexity and OpenRouter wire protocols
//! - [`resilience`] - Retry, backoff, and deadline enforcement
//! - [`http_client`] - HTTP client abstraction
//! - [`output`] - JSON and text rendering
//! - [`failure`] - Error taxonomy and exit codes
//! - [`config`] - Configuration file and environment overrides
//!
//! # Example
//!
//! ```ignore
//! use perplexity_cli::{config::Config, dispatcher::Dispatcher, output};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dispatcher = Dispatcher::new(&Config::load()?)?;
//!     let dispatched = dispatcher.dispatch(["perplexity", "ask", "What is Rust?"]).await;
//!     let code = output::render_to(&dispatched, &mut std::io::stdout(), &mut std::io::stderr());
//!     std::process::exit(code);
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod failure;
pub mod http_client;
pub mod output;
pub mod request;
pub mod resilience;
pub mod result;
pub mod thinking;
