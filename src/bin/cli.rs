//! AgentOps CLI
//!
//! Operator command line for a running bridge: health, sessions, history,
//! agent discovery and nudges.

use agentops_bridge::proxy_client::{ProxyClient, ProxyConfig};
use agentops_bridge::{Result, VERSION};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use console::style;
use secrecy::SecretString;
use serde_json::Value;

#[derive(Parser)]
#[command(
    name = "agentops",
    author = "AgentOps Contributors",
    version = VERSION,
    about = "AgentOps - operator console for the agent gateway bridge",
    long_about = None
)]
struct Cli {
    /// Bridge base URL
    #[arg(long, env = "PROXY_BASE_URL", global = true, default_value = "http://127.0.0.1:8787")]
    base_url: String,

    /// Shared bridge secret
    #[arg(long, env = "PROXY_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Edge Basic-auth user
    #[arg(long, env = "PROXY_BASIC_AUTH_USER", global = true)]
    basic_user: Option<String>,

    /// Edge Basic-auth password
    #[arg(long, env = "PROXY_BASIC_AUTH_PASS", global = true, hide_env_values = true)]
    basic_pass: Option<String>,

    /// Print raw JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the bridge is up
    Health,

    /// List gateway sessions
    Sessions,

    /// Show chat history for a session
    History {
        /// Session key, e.g. agent:friday:main
        session_key: String,
    },

    /// List agents discovered from session keys
    Agents,

    /// Send an operator message into a session
    Nudge {
        /// Session key, e.g. agent:friday:main
        session_key: String,
        /// Message to inject
        message: String,
    },
}

#[tokio::main]
async fn main() {
    // Load .env before clap reads env-backed flags
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", style("✗").red(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let client = build_client(&cli)?;
    let raw = cli.json;

    match cli.command {
        Commands::Health => {
            let health = client.health().await?;
            if raw {
                print_json(&health);
            } else {
                println!("{} Bridge at {} is up", style("✓").green(), style(&cli.base_url).cyan());
            }
        }
        Commands::Sessions => {
            let sessions = client.sessions().await?;
            if raw {
                print_json(&sessions);
            } else {
                print_sessions(&sessions);
            }
        }
        Commands::History { session_key } => {
            print_json(&client.history(&session_key).await?);
        }
        Commands::Agents => {
            let agents = client.agents().await?;
            if raw {
                print_json(&serde_json::to_value(&agents)?);
            } else if agents.agents.is_empty() {
                println!("{}", style("No agents found").dim());
            } else {
                println!("{}", style("Agents").bold());
                for agent in &agents.agents {
                    println!("  {} {}", style("•").cyan(), agent.name);
                }
            }
        }
        Commands::Nudge {
            session_key,
            message,
        } => {
            let result = client.nudge(&session_key, &message).await?;
            if raw {
                print_json(&result);
            } else {
                println!("{} Nudged {}", style("✓").green(), style(&session_key).cyan());
            }
        }
    }

    Ok(())
}

fn build_client(cli: &Cli) -> Result<ProxyClient> {
    let token = cli
        .token
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| agentops_bridge::Error::Config("PROXY_TOKEN is required".to_string()))?;

    let mut config = ProxyConfig::new(cli.base_url.clone(), SecretString::from(token));
    if let (Some(user), Some(pass)) = (&cli.basic_user, &cli.basic_pass) {
        config = config.with_basic_auth(user.clone(), SecretString::from(pass.clone()));
    }
    ProxyClient::new(config)
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}

fn print_sessions(payload: &Value) {
    let list = payload.get("sessions").unwrap_or(payload);
    let Some(sessions) = list.as_array() else {
        print_json(payload);
        return;
    };

    if sessions.is_empty() {
        println!("{}", style("No sessions").dim());
        return;
    }

    println!("{} ({})", style("Sessions").bold(), sessions.len());
    for session in sessions {
        let key = ["sessionKey", "key", "id"]
            .iter()
            .find_map(|field| session.get(*field).and_then(Value::as_str))
            .unwrap_or("?");
        let updated = session
            .get("updatedAt")
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default();
        println!("  {} {}  {}", style("•").cyan(), key, style(updated).dim());
    }
}
