//! service-validator CLI - API handbook rules and contract checks against a live service

mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use service_validator_core::config::{self, ConfigFormat, WriteOutcome};
use service_validator_core::{
    DispatchError, DispatchOptions, Headers, LogStatus, Session, read_request_log,
};
use service_validator_runner::{
    AuthError, BasicAuth, FilterError, OperationFilter, Phase, ReplayFilter, Replayer, Runner,
    builtin_registry, fetch_bearer_token, fetch_document,
};

use output::{RenderOptions, progress_line, render_json, render_report};

const API_KEY_ENV: &str = "SERVICE_VALIDATOR_API_KEY";
const IAM_ENDPOINT_ENV: &str = "SERVICE_VALIDATOR_IAM_ENDPOINT";
const DEFAULT_REPLAY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "service-validator")]
#[command(about = "Run API handbook rules and contract checks against a live service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "terminal")]
    output: OutputFormat,

    /// Verbose diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the checks against a live service
    Run(Box<RunArgs>),

    /// Create a default config file
    Init {
        /// Overwrite an existing config file with the default config
        #[arg(short, long)]
        overwrite: bool,

        /// Write the config as JSON instead of YAML
        #[arg(short, long)]
        json: bool,
    },

    /// Replay requests from a saved request log
    Replay {
        /// Request log written by `run --store-request-log`
        request_log: PathBuf,

        /// ID of request to replay
        #[arg(long)]
        id: Option<u64>,

        /// Status (ERROR, FAILURE, SUCCESS) of requests to replay
        #[arg(long)]
        status: Option<String>,

        /// A regexp that filters requests by their request URI
        #[arg(long)]
        uri: Option<String>,

        /// A regexp that filters requests by their request method
        #[arg(long)]
        method: Option<String>,

        /// Header sent instead of the logged one (e.g. a fresh `Authorization`)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Export JSON Schema of the request log record
    Schema,
}

#[derive(Args)]
struct RunArgs {
    /// Path or URL of the OpenAPI document
    schema: String,

    /// Server user and password. Example: USER:PASSWORD
    #[arg(short, long)]
    auth: Option<String>,

    /// The base URL of the API (default: first server declared in the document)
    #[arg(short, long)]
    base_url: Option<String>,

    /// Comma-separated list of checks to run ("all" selects every native check)
    #[arg(short, long, value_delimiter = ',')]
    checks: Vec<String>,

    /// Custom header used in all requests. Example: "Authorization: Bearer 123"
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Filter operations by endpoint pattern
    #[arg(short = 'E', long = "endpoint")]
    endpoints: Vec<String>,

    /// Stop after the first endpoint with a failure or an error
    #[arg(short = 'x', long = "exitfirst")]
    exit_first: bool,

    /// Duration in milliseconds each individual case is not allowed to exceed
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    hypothesis_deadline: Option<u64>,

    /// Use seed 0 when no seed is given
    #[arg(long)]
    hypothesis_derandomize: bool,

    /// Maximum number of generated cases per endpoint
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    hypothesis_max_examples: u32,

    /// Comma-separated phases to run: explicit, generate
    #[arg(long, value_delimiter = ',', default_value = "explicit")]
    hypothesis_phases: Vec<Phase>,

    /// Seed for case generation
    #[arg(long)]
    hypothesis_seed: Option<u64>,

    /// Verbosity of the engine's diagnostics
    #[arg(long)]
    hypothesis_verbosity: Option<Verbosity>,

    /// Filter operations by HTTP method pattern
    #[arg(short = 'M', long = "method")]
    methods: Vec<String>,

    /// Do not send additional requests that target specific API behaviour
    #[arg(long)]
    no_additional_cases: bool,

    /// Timeout in milliseconds for network requests
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    request_timeout: Option<u64>,

    /// Show full error chains for exceptions
    #[arg(long)]
    show_exception_tracebacks: bool,

    /// Show statistical summary of failures
    #[arg(short, long)]
    statistics: bool,

    /// Store requests and responses into a JSON lines file
    #[arg(long)]
    store_request_log: Option<PathBuf>,

    /// Filter operations by tag pattern
    #[arg(short = 'T', long = "tag")]
    tags: Vec<String>,

    /// Send a bearer token obtained with the configured API key
    #[arg(short = 'B', long)]
    with_bearer: bool,

    /// API key exchanged for a bearer token
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Token endpoint for the API key exchange
    #[arg(long, env = IAM_ENDPOINT_ENV)]
    iam_endpoint: Option<String>,

    /// Number of endpoints tested concurrently
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    workers: u32,
}

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    Terminal,
    Json,
    Silent,
}

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    const fn level(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "warn",
            Self::Verbose => "info",
            Self::Debug => "debug",
        }
    }
}

/// Invalid combination of inputs; reported before anything is sent.
#[derive(Debug, thiserror::Error)]
enum UsageError {
    #[error("--with-bearer flag used but Authorization header provided with --header.")]
    BearerWithAuthorizationHeader,
    #[error("--with-bearer cannot be combined with --auth.")]
    BearerWithBasicAuth,
    #[error(
        "Must set {} and {} environment variables to use --with-bearer.",
        API_KEY_ENV,
        IAM_ENDPOINT_ENV
    )]
    MissingBearerCredentials,
    #[error("Invalid header '{0}': should be in a KEY:VALUE format")]
    MalformedHeader(String),
    #[error("Invalid base URL '{0}': must start with http:// or https://")]
    BaseUrl(String),
    #[error("Invalid status '{0}': expected ERROR, FAILURE or SUCCESS")]
    ReplayStatus(String),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) if e.downcast_ref::<UsageError>().is_some() => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(3)
        }
    }
}

fn init_tracing(cli: &Cli) {
    let level = match &cli.command {
        _ if cli.verbose => "debug",
        Commands::Run(args) => args.hypothesis_verbosity.map_or("warn", Verbosity::level),
        _ => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run(args) => run_checks(&args, cli.output),

        Commands::Init { overwrite, json } => {
            let format = if json {
                ConfigFormat::Json
            } else {
                ConfigFormat::Yaml
            };
            let path = PathBuf::from(format.file_name());
            let registry = builtin_registry()?;
            match config::write_default(&path, format, &registry, overwrite)? {
                WriteOutcome::Written => {
                    if cli.output != OutputFormat::Silent {
                        println!("Created {}", path.display());
                    }
                }
                WriteOutcome::AlreadyExists => {
                    println!(
                        "Config file already exists. Use -o or --overwrite to overwrite the config with default values."
                    );
                }
            }
            Ok(0)
        }

        Commands::Replay {
            request_log,
            id,
            status,
            uri,
            method,
            headers,
        } => replay(
            &request_log,
            id,
            status.as_deref(),
            uri.as_deref(),
            method.as_deref(),
            &headers,
            cli.output,
        ),

        Commands::Schema => {
            let schema = service_validator_core::generate_schema()?;
            println!("{schema}");
            Ok(0)
        }
    }
}

fn run_checks(args: &RunArgs, output: OutputFormat) -> Result<i32> {
    // Usage checks come first: nothing is loaded or sent on bad input.
    let mut headers = parse_headers(&args.headers)?;
    let basic = args
        .auth
        .as_deref()
        .map(str::parse::<BasicAuth>)
        .transpose()
        .map_err(UsageError::from)?;
    let bearer = if args.with_bearer {
        Some(bearer_credentials(args, &headers, basic.is_some())?)
    } else {
        None
    };
    if let Some(url) = &args.base_url {
        validate_base_url(url)?;
    }
    let filter = OperationFilter::new(&args.endpoints, &args.methods, &args.tags)
        .map_err(UsageError::from)?;

    let registry = builtin_registry()?;
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    let selection = config::resolve(&cwd, &registry)?;
    let options = DispatchOptions {
        checks: args.checks.clone(),
        no_additional_cases: args.no_additional_cases,
    };
    let session = Session::new(&registry, &selection, &options).map_err(UsageError::from)?;

    if let Some((endpoint, api_key)) = bearer {
        let token = fetch_bearer_token(&endpoint, &api_key)?;
        headers.set("Authorization", format!("Bearer {token}"));
    }

    let document = fetch_document(&args.schema)
        .with_context(|| format!("cannot load API document {}", args.schema))?;
    let runner = Runner::new(document, args.base_url.clone())?
        .with_headers(headers)
        .with_basic_auth(basic)
        .with_filter(filter)
        .with_phases(args.hypothesis_phases.clone())
        .with_max_examples(args.hypothesis_max_examples)
        .with_seed(args.hypothesis_seed)
        .with_derandomize(args.hypothesis_derandomize)
        .with_deadline(args.hypothesis_deadline.map(Duration::from_millis))
        .with_request_timeout(args.request_timeout.map(Duration::from_millis))
        .with_workers(usize::try_from(args.workers).unwrap_or(1))
        .with_exit_first(args.exit_first)
        .with_request_log(args.store_request_log.clone());

    let report = runner.run(&session, |result| {
        if output == OutputFormat::Terminal {
            println!("{}", progress_line(result));
        }
    })?;

    match output {
        OutputFormat::Terminal => {
            let options = RenderOptions {
                statistics: args.statistics,
                show_tracebacks: args.show_exception_tracebacks,
                request_log: report.request_log.as_deref(),
            };
            print!("{}", render_report(&report.summary, &options));
        }
        OutputFormat::Json => {
            let json = render_json(&report.summary, report.seed);
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Silent => {}
    }

    Ok(report.summary.exit_code)
}

/// API key and token endpoint for `--with-bearer`, after checking that
/// nothing else supplies credentials.
fn bearer_credentials(
    args: &RunArgs,
    headers: &Headers,
    has_basic: bool,
) -> Result<(String, String), UsageError> {
    if headers.contains("Authorization") {
        return Err(UsageError::BearerWithAuthorizationHeader);
    }
    if has_basic {
        return Err(UsageError::BearerWithBasicAuth);
    }
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
    match (non_empty(&args.iam_endpoint), non_empty(&args.api_key)) {
        (Some(endpoint), Some(api_key)) => Ok((endpoint, api_key)),
        _ => Err(UsageError::MissingBearerCredentials),
    }
}

/// Parse `NAME: value` pairs; later values for the same name win.
fn parse_headers(raw: &[String]) -> Result<Headers, UsageError> {
    let mut headers = Headers::new();
    for entry in raw {
        let Some((name, value)) = entry.split_once(':') else {
            return Err(UsageError::MalformedHeader(entry.clone()));
        };
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(UsageError::MalformedHeader(entry.clone()));
        }
        headers.set(name, value.trim());
    }
    Ok(headers)
}

fn validate_base_url(url: &str) -> Result<(), UsageError> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(UsageError::BaseUrl(url.to_string())),
    }
}

fn replay(
    path: &Path,
    id: Option<u64>,
    status: Option<&str>,
    uri: Option<&str>,
    method: Option<&str>,
    headers: &[String],
    output: OutputFormat,
) -> Result<i32> {
    let status = status
        .map(|s| LogStatus::parse(s).ok_or_else(|| UsageError::ReplayStatus(s.to_string())))
        .transpose()?;
    let filter = ReplayFilter::new(id, status, uri, method).map_err(UsageError::from)?;
    let overrides = parse_headers(headers)?;

    let records = read_request_log(path)
        .with_context(|| format!("cannot read request log {}", path.display()))?;
    let selected = filter.select(&records);
    tracing::info!(total = records.len(), selected = selected.len(), "replaying requests");

    let replayer = Replayer::new(overrides, DEFAULT_REPLAY_TIMEOUT)?;
    let mut outcomes = Vec::with_capacity(selected.len());
    for record in selected {
        let outcome = replayer.replay(record)?;
        if output == OutputFormat::Terminal {
            println!("{}. {} {}", outcome.id, outcome.method, outcome.uri);
            match outcome.old_status {
                Some(code) => println!("  Old status code: {code}"),
                None => println!("  Old status code: none"),
            }
            println!("  New status code: {}", outcome.new_status);
            println!();
        }
        outcomes.push(outcome);
    }

    if output == OutputFormat::Json {
        let json: Vec<serde_json::Value> = outcomes
            .iter()
            .map(|o| {
                serde_json::json!({
                    "id": o.id,
                    "method": o.method,
                    "uri": o.uri,
                    "old_status_code": o.old_status,
                    "new_status_code": o.new_status,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
    }
    Ok(0)
}
