use perplexity_cli::cli::{self, Invocation};
use perplexity_cli::config::Config;
use perplexity_cli::dispatcher::{Dispatched, Dispatcher};
use perplexity_cli::failure::Failure;
use perplexity_cli::output;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Logs are opt-in via `RUST_LOG` and always go to stderr, keeping stdout
/// free for the JSON envelope.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run() -> Dispatched {
    // Parse first so --help and argument errors work even with a broken config.
    let invocation = match cli::parse_args(std::env::args_os()) {
        Ok(Invocation::Help(text)) => return Dispatched::help(text),
        Ok(invocation) => invocation,
        Err(failure) => return Dispatched::failed(failure),
    };

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            return Dispatched::failed(
                Failure::bad_args(format!("Invalid configuration: {:#}", e))
                    .with_remediation("Fix ~/.perplexity/config.toml or the PERPLEXITY_* env vars"),
            );
        }
    };
    debug!("Loaded config with timeout {}ms", config.timeout_ms);

    let dispatcher = match Dispatcher::new(&config) {
        Ok(dispatcher) => dispatcher,
        Err(failure) => return Dispatched::failed(failure),
    };
    dispatcher.execute(invocation).await
}

#[tokio::main]
async fn main() {
    init_logging();

    let dispatched = run().await;
    let code = output::render_to(&dispatched, &mut std::io::stdout(), &mut std::io::stderr());
    std::process::exit(code);
}
