//! Insurance API command-line client
//!
//! Thin shell over `request_pipeline::ApiClient`:
//! 1. Loads the TOML config and restores the persisted session
//! 2. Builds the pipeline (loading, auth, retry) over an HTTP transport
//! 3. Runs one command and prints the JSON result on stdout
//!
//! Notifications and session-expiry messages go to stderr, as do logs.

mod config;
mod console;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use insure_auth::{TokenStore, now_millis};
use request_pipeline::{ApiClient, HttpTransport, Outcome};
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::console::{ConsoleNotifier, ConsoleSessionListener};

const USAGE: &str = "usage: insure [--config PATH] [--metrics] <command>

commands:
  login [EMAIL]      sign in (password from INSURE_PASSWORD or session.password_file)
  logout             forget the stored session
  status             show whether a session is stored and when it expires
  get PATH           GET an API path
  delete PATH        DELETE an API path
  post PATH JSON     POST a JSON body
  put PATH JSON      PUT a JSON body";

#[derive(Debug, PartialEq)]
enum Command {
    Login { email: Option<String> },
    Logout,
    Status,
    Get(String),
    Delete(String),
    Post(String, Value),
    Put(String, Value),
}

#[derive(Debug, PartialEq)]
struct Args {
    config: Option<String>,
    metrics: bool,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut config = None;
    let mut metrics = false;
    let mut rest = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                config = Some(path.clone());
            }
            "--metrics" => metrics = true,
            "-h" | "--help" => bail!("{USAGE}"),
            _ => rest.push(arg.as_str()),
        }
    }

    let body = |raw: Option<&&str>| -> Result<Value> {
        let raw = raw.context("missing JSON body")?;
        serde_json::from_str(raw).with_context(|| format!("body is not valid JSON: {raw}"))
    };

    let command = match rest.as_slice() {
        ["login"] => Command::Login { email: None },
        ["login", email] => Command::Login {
            email: Some(email.to_string()),
        },
        ["logout"] => Command::Logout,
        ["status"] => Command::Status,
        ["get", path] => Command::Get(path.to_string()),
        ["delete", path] => Command::Delete(path.to_string()),
        ["post", path, json @ ..] if json.len() <= 1 => {
            Command::Post(path.to_string(), body(json.first())?)
        }
        ["put", path, json @ ..] if json.len() <= 1 => {
            Command::Put(path.to_string(), body(json.first())?)
        }
        [] => bail!("no command given\n\n{USAGE}"),
        other => bail!("unrecognized command: {}\n\n{USAGE}", other.join(" ")),
    };

    Ok(Args {
        config,
        metrics,
        command,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays pure JSON
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let prometheus = metrics::install_recorder()?;

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&argv)?;

    let config_path = Config::resolve_path(args.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        path = %config_path.display(),
        base_url = %config.api.base_url,
        timeout_ms = config.api.pipeline.timeout_ms,
        retry_attempts = config.api.pipeline.retry_attempts,
        "configuration loaded"
    );

    let store = TokenStore::load(config.session.token_file.clone())
        .await
        .with_context(|| {
            format!(
                "failed to restore session from {}",
                config.session.token_file.display()
            )
        })?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("insure-cli/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let client = ApiClient::builder(Arc::new(HttpTransport::with_client(
        http,
        config.api.base_url.clone(),
    )))
    .config(config.api.pipeline.clone())
    .token_store(Arc::new(store))
    .notifier(Arc::new(ConsoleNotifier))
    .session_listener(Arc::new(ConsoleSessionListener))
    .build()
    .await;

    let result = run(&client, &config, args.command).await;

    if args.metrics {
        eprintln!("{}", prometheus.render());
    }
    result
}

async fn run(client: &ApiClient, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Login { email } => {
            let email = email
                .or_else(|| config.session.email.clone())
                .context("no email given and session.email is not set")?;
            let password = config
                .session
                .password
                .as_ref()
                .context("no password: set INSURE_PASSWORD or session.password_file")?;

            let session = match client.login(&email, password.expose()).await {
                Ok(session) => session,
                Err(error) => {
                    print_json(&error)?;
                    return Err(error).context("login failed");
                }
            };
            print_json(&json!({
                "signedIn": true,
                "user": session.user,
                "expiresAt": session.token.expires_at,
            }))
        }
        Command::Logout => {
            client.logout().await.context("failed to clear session")?;
            print_json(&json!({ "signedIn": false }))
        }
        Command::Status => {
            let now = now_millis();
            let status = match client.token_store().get().await {
                Some(token) => json!({
                    "signedIn": true,
                    "expiresAt": token.expires_at,
                    "expiresInSecs": token.expires_in(now).as_secs(),
                    "expired": token.is_expired(now),
                }),
                None => json!({ "signedIn": false }),
            };
            print_json(&status)
        }
        Command::Get(path) => print_outcome(client.get(&path).await),
        Command::Delete(path) => print_outcome(client.delete(&path).await),
        Command::Post(path, body) => print_outcome(client.post(&path, body).await),
        Command::Put(path, body) => print_outcome(client.put(&path, body).await),
    }
}

fn print_outcome(outcome: Outcome) -> Result<()> {
    match outcome {
        Ok(response) => print_json(&response.body),
        Err(error) => {
            print_json(&error)?;
            Err(error).context("request failed")
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    println!("{text}");
    Ok(())
}
