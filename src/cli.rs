//! Command-line surface and argv parsing.
//!
//! Parsing never fails with clap's own exit path: every parse error becomes
//! a BAD_ARGS [`Failure`] so it is rendered as a JSON error envelope like any
//! other failure. Only `--help` and `--version` bypass the envelope.

use crate::failure::Failure;
use crate::request::{OutputFormat, Provider, Request, RequestOptions, Verb};
use clap::builder::PossibleValuesParser;
use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;

/// What the user asked for, fully validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Help or version text to print as-is.
    Help(String),
    Query(Request),
    AuthStatus { format: OutputFormat },
}

impl Invocation {
    pub fn format(&self) -> OutputFormat {
        match self {
            Invocation::Help(_) => OutputFormat::Text,
            Invocation::Query(request) => request.format(),
            Invocation::AuthStatus { format } => *format,
        }
    }
}

fn query_arg(help: &'static str) -> Arg {
    Arg::new("query").help(help).required(true)
}

fn format_arg() -> Arg {
    Arg::new("format")
        .long("format")
        .short('f')
        .help("Output format")
        .value_parser(PossibleValuesParser::new(["json", "text"]))
        .default_value("json")
}

fn provider_arg(help: &'static str) -> Arg {
    Arg::new("provider")
        .long("provider")
        .short('p')
        .help(help)
        .value_parser(PossibleValuesParser::new(["perplexity", "openrouter"]))
}

fn system_arg() -> Arg {
    Arg::new("system")
        .long("system")
        .short('s')
        .help("System prompt")
        .value_name("TEXT")
}

fn strip_thinking_arg() -> Arg {
    Arg::new("strip-thinking")
        .long("strip-thinking")
        .help("Remove <think> blocks from the response to save context tokens")
        .action(ArgAction::SetTrue)
}

const SEARCH_ABOUT: &str =
    "Web search via the Perplexity Search API. Returns raw results without AI synthesis";

const PROVIDER_HELP: &str = "API provider: perplexity or openrouter (auto-detected if omitted)";

pub fn build_cli() -> Command {
    Command::new("perplexity")
        .about("Web search, reasoning, and deep research via Perplexity AI")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("search")
                .about(SEARCH_ABOUT)
                .long_about(concat!(
                    "Web search via the Perplexity Search API. ",
                    "Returns raw results without AI synthesis.\n",
                    "Only available via the Perplexity API (not OpenRouter).",
                ))
                .arg(query_arg("Search query string"))
                .arg(
                    Arg::new("max-results")
                        .long("max-results")
                        .short('n')
                        .help("Number of results (1-20) [default: 10]")
                        .value_parser(clap::value_parser!(i64))
                        .allow_negative_numbers(true),
                )
                .arg(
                    Arg::new("max-tokens")
                        .long("max-tokens")
                        .help("Max tokens per page (256-2048) [default: 1024]")
                        .value_parser(clap::value_parser!(i64))
                        .allow_negative_numbers(true),
                )
                .arg(
                    Arg::new("country")
                        .long("country")
                        .short('c')
                        .help("ISO 3166-1 alpha-2 country code (e.g. US, GB)")
                        .value_name("CODE"),
                )
                .arg(provider_arg("API provider; search only works with perplexity"))
                .arg(format_arg()),
        )
        .subcommand(
            Command::new("ask")
                .about("Quick AI-answered question with web grounding via Sonar Pro")
                .arg(query_arg("Question to ask"))
                .arg(system_arg())
                .arg(provider_arg(PROVIDER_HELP))
                .arg(format_arg()),
        )
        .subcommand(
            Command::new("research")
                .about("Deep multi-source research via Sonar Deep Research (slow, thorough)")
                .arg(query_arg("Research topic or question"))
                .arg(system_arg())
                .arg(strip_thinking_arg())
                .arg(provider_arg(PROVIDER_HELP))
                .arg(format_arg()),
        )
        .subcommand(
            Command::new("reason")
                .about("Step-by-step reasoning with web grounding via Sonar Reasoning Pro")
                .arg(query_arg("Question requiring reasoning"))
                .arg(system_arg())
                .arg(strip_thinking_arg())
                .arg(provider_arg(PROVIDER_HELP))
                .arg(format_arg()),
        )
        .subcommand(
            Command::new("auth")
                .about("Authentication commands")
                .subcommand_required(true)
                .subcommand(
                    Command::new("status")
                        .about("Check which providers have credentials")
                        .arg(format_arg()),
                ),
        )
}

/// Parses and validates argv (including the program name).
///
/// # Errors
///
/// Returns BAD_ARGS for anything clap rejects and for any option that fails
/// request validation.
pub fn parse_args<I, T>(argv: I) -> Result<Invocation, Failure>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = match build_cli().try_get_matches_from(argv) {
        Ok(matches) => matches,
        Err(err) => return clap_error(err),
    };

    match matches.subcommand() {
        Some(("auth", auth)) => match auth.subcommand() {
            Some(("status", status)) => Ok(Invocation::AuthStatus {
                format: format_of(status)?,
            }),
            _ => Err(Failure::bad_args("Unknown auth subcommand")),
        },
        Some((name, sub)) => {
            let verb: Verb = name.parse()?;
            Ok(Invocation::Query(request_from(verb, sub)?))
        }
        None => Err(no_command()),
    }
}

fn request_from(verb: Verb, matches: &ArgMatches) -> Result<Request, Failure> {
    let query = matches
        .get_one::<String>("query")
        .cloned()
        .unwrap_or_default();

    let mut options = RequestOptions {
        format: format_of(matches)?,
        provider_override: matches
            .get_one::<String>("provider")
            .map(|p| p.parse::<Provider>())
            .transpose()?,
        ..Default::default()
    };

    if verb == Verb::Search {
        options.max_results = matches.get_one::<i64>("max-results").copied();
        options.max_tokens = matches.get_one::<i64>("max-tokens").copied();
        options.country = matches.get_one::<String>("country").cloned();
    } else {
        options.system_prompt = matches.get_one::<String>("system").cloned();
        options.strip_thinking = matches
            .try_get_one::<bool>("strip-thinking")
            .ok()
            .flatten()
            .copied()
            .unwrap_or(false);
    }

    Request::new(verb, query, options)
}

fn format_of(matches: &ArgMatches) -> Result<OutputFormat, Failure> {
    matches
        .get_one::<String>("format")
        .map(|f| f.parse::<OutputFormat>())
        .transpose()
        .map(Option::unwrap_or_default)
}

fn no_command() -> Failure {
    Failure::bad_args("No command given").with_remediation("Run perplexity --help for usage")
}

fn clap_error(err: clap::Error) -> Result<Invocation, Failure> {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            Ok(Invocation::Help(err.render().to_string()))
        }
        ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand | ErrorKind::MissingSubcommand => {
            Err(no_command())
        }
        _ => {
            let rendered = err.render().to_string();
            let message = rendered
                .lines()
                .next()
                .unwrap_or("Invalid arguments")
                .trim_start_matches("error: ")
                .to_string();
            Err(Failure::bad_args(message).with_remediation("Run perplexity --help for usage"))
        }
    }
}
