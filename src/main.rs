use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ticket_relay::{
    auth::{AuthProvider, FileTokenStore, OAuth2Client},
    config::Config,
    error::{Error, Result},
    jira::{create_with_subtasks, IssueTracker, JiraClient, NewIssue},
    resource::ResourceClient,
    server::{self, AppState},
    summarize::Summarizer,
};

#[derive(Debug)]
pub struct Args {
    config_path: Option<PathBuf>,
    log_level: String,
    dry_run: bool,
    command: Option<Action>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Token,
    CreateIssue {
        issue: NewIssue,
        subtasks: Vec<String>,
        summarize: bool,
    },
    Summarize {
        text: String,
    },
    Fetch {
        url: Option<String>,
    },
    Serve {
        listen: Option<String>,
    },
}

pub async fn load_config_from_args(args: &Args) -> Result<Config> {
    if let Some(config_path) = &args.config_path {
        info!("Loading config from: {:?}", config_path);
        Config::load(config_path).await
    } else {
        info!("Loading config from default locations");
        Config::load_from_default_locations().await
    }
}

/// Token cache shared by every authorized call in this process.
pub fn build_auth(config: &Config) -> Result<Arc<OAuth2Client>> {
    let client = OAuth2Client::new(config.okta.oauth2_client_config())?;
    let client = match &config.okta.token_cache_path {
        Some(path) => {
            info!("Persisting OAuth2 tokens to {:?}", path);
            client.with_store(Arc::new(FileTokenStore::new(path)))
        }
        None => client,
    };
    Ok(Arc::new(client))
}

pub fn build_state(config: &Config) -> Result<AppState> {
    let auth: Arc<dyn AuthProvider> = build_auth(config)?;
    Ok(AppState {
        resources: ResourceClient::new(auth, Duration::from_secs(config.okta.timeout_seconds))?,
        tracker: Arc::new(JiraClient::new(config.jira.clone())?),
        summarizer: Arc::new(Summarizer::from_config(&config.gemini)?),
        resource_url: config.app.resource_url.clone(),
    })
}

pub async fn run_action(config: &Config, action: Action) -> Result<()> {
    match action {
        Action::Token => {
            let token = build_auth(config)?.get_token().await?;
            println!("{}", token);
        }
        Action::CreateIssue {
            mut issue,
            subtasks,
            summarize,
        } => {
            if summarize {
                issue.description = Summarizer::from_config(&config.gemini)?
                    .summarize(&issue.description)
                    .await?;
            }

            let tracker = JiraClient::new(config.jira.clone())?;
            if subtasks.is_empty() {
                match tracker.create_issue(&issue).await? {
                    Some(key) => println!("{}", key),
                    None => {
                        return Err(Error::ExternalCall("Issue was not created".to_string()));
                    }
                }
            } else {
                let pairs: Vec<(String, String)> =
                    subtasks.into_iter().map(|s| (s.clone(), s)).collect();
                let outcome = create_with_subtasks(&tracker, &issue, &pairs).await?;
                println!("{}", outcome.parent_key);
                for key in &outcome.created {
                    println!("  {}", key);
                }
                for summary in &outcome.failed {
                    warn!("Subtask not created: {}", summary);
                }
            }
        }
        Action::Summarize { text } => {
            let summary = Summarizer::from_config(&config.gemini)?.summarize(&text).await?;
            println!("{}", summary);
        }
        Action::Fetch { url } => {
            let url = url.or_else(|| config.app.resource_url.clone()).ok_or_else(|| {
                Error::Config("No URL given and no resource_url configured".to_string())
            })?;
            let auth: Arc<dyn AuthProvider> = build_auth(config)?;
            let client = ResourceClient::new(auth, Duration::from_secs(config.okta.timeout_seconds))?;
            let data = client.get_json(&url).await?;
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Action::Serve { listen } => {
            let addr = listen.unwrap_or_else(|| config.app.listen_addr.clone());
            server::serve(&addr, build_state(config)?).await?;
        }
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = load_config_from_args(&args).await?;

    if args.dry_run {
        info!("Configuration is valid. Dry run complete.");
        return Ok(());
    }

    let Some(action) = args.command else {
        return Err(Error::Validation(
            "No command given, see --help".to_string(),
        ));
    };

    run_action(&config, action).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = parse_args();

    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting ticket-relay v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn cli() -> Command {
    Command::new("ticket-relay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Okta-authenticated JIRA issue creation and summarization")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .default_value("info")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Validate configuration and exit")
                .global(true)
                .action(clap::ArgAction::SetTrue),
        )
        .subcommand(Command::new("token").about("Print a valid Okta access token"))
        .subcommand(
            Command::new("create-issue")
                .about("Create a JIRA issue")
                .arg(Arg::new("summary").long("summary").required(true).num_args(1))
                .arg(
                    Arg::new("description")
                        .long("description")
                        .required(true)
                        .num_args(1),
                )
                .arg(
                    Arg::new("type")
                        .long("type")
                        .default_value("Task")
                        .num_args(1),
                )
                .arg(Arg::new("parent").long("parent").num_args(1))
                .arg(
                    Arg::new("subtask")
                        .long("subtask")
                        .help("Create a subtask under the new issue (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    Arg::new("summarize")
                        .long("summarize")
                        .help("Summarize the description before filing")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("summarize")
                .about("Summarize text with the text-generation API")
                .arg(Arg::new("text").long("text").required(true).num_args(1)),
        )
        .subcommand(
            Command::new("fetch")
                .about("GET a protected resource with the cached bearer token")
                .arg(Arg::new("url").long("url").num_args(1)),
        )
        .subcommand(
            Command::new("serve")
                .about("Run the HTTP server")
                .arg(Arg::new("listen").long("listen").value_name("ADDR").num_args(1)),
        )
}

fn string_arg(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.get_one::<String>(id).cloned()
}

fn action_from_matches(matches: &ArgMatches) -> Option<Action> {
    match matches.subcommand()? {
        ("token", _) => Some(Action::Token),
        ("create-issue", sub) => {
            let mut issue = NewIssue::new(
                string_arg(sub, "summary").unwrap_or_default(),
                string_arg(sub, "description").unwrap_or_default(),
            )
            .with_issue_type(string_arg(sub, "type").unwrap_or_else(|| "Task".to_string()));
            issue.parent_key = string_arg(sub, "parent");

            Some(Action::CreateIssue {
                issue,
                subtasks: sub
                    .get_many::<String>("subtask")
                    .map(|values| values.cloned().collect())
                    .unwrap_or_default(),
                summarize: sub.get_flag("summarize"),
            })
        }
        ("summarize", sub) => Some(Action::Summarize {
            text: string_arg(sub, "text").unwrap_or_default(),
        }),
        ("fetch", sub) => Some(Action::Fetch {
            url: string_arg(sub, "url"),
        }),
        ("serve", sub) => Some(Action::Serve {
            listen: string_arg(sub, "listen"),
        }),
        _ => None,
    }
}

fn args_from_matches(matches: &ArgMatches) -> Args {
    Args {
        config_path: matches.get_one::<String>("config").map(PathBuf::from),
        log_level: string_arg(matches, "log-level").unwrap_or_else(|| "info".to_string()),
        dry_run: matches.get_flag("dry-run"),
        command: action_from_matches(matches),
    }
}

fn parse_args() -> Args {
    args_from_matches(&cli().get_matches())
}

fn parse_level(log_level: &str) -> Result<Level> {
    match log_level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(Error::Config(format!("Invalid log level: {}", log_level))),
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let level = parse_level(log_level)?;

    let directive = format!("ticket_relay={}", level)
        .parse()
        .map_err(|e| Error::Config(format!("Invalid log directive: {}", e)))?;
    let env_filter = EnvFilter::from_default_env().add_directive(directive);

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(env_filter)
        .init();

    Ok(())
}
