use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;

use cine_rag::{
    dispatch, prepare_config, EnvSecretStore, FileSecretStore, RagConfig, Route, RouteContext,
    RouteResponse, SecretStore,
};

#[derive(Parser)]
#[command(name = "cine-rag")]
#[command(about = "Run one movie-recommendation route on a JSON event", long_about = None)]
#[command(version)]
struct Cli {
    /// Route to run (routing, standard_search, semantic_search, similar,
    /// specific, sorting, open, chat, action_group, agent_semantic)
    route: String,

    /// Event file; reads stdin when omitted
    #[arg(short, long)]
    event: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, env = "CINE_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// JSON file of secrets; environment variables are used otherwise
    #[arg(long, env = "CINE_RAG_SECRETS")]
    secrets: Option<PathBuf>,

    /// Pretty-print the response
    #[arg(long)]
    pretty: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<RagConfig> {
    let path = path.cloned().unwrap_or_else(RagConfig::default_path);
    let mut config = if path.exists() {
        RagConfig::from_file(&path)?
    } else {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        RagConfig::default()
    };
    config.apply_env();
    Ok(config)
}

fn read_event(path: Option<&PathBuf>) -> Result<serde_json::Value> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read event from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("Event is not valid JSON")
}

async fn run(cli: &Cli) -> Result<serde_json::Value> {
    let route: Route = cli.route.parse()?;
    let event = read_event(cli.event.as_ref())?;
    let config = load_config(cli.config.as_ref())?;

    let secrets: Box<dyn SecretStore> = match &cli.secrets {
        Some(path) => Box::new(FileSecretStore::new(path)),
        None => Box::new(EnvSecretStore),
    };

    // configuration problems still answer in the route's response shape
    let ctx = prepare_config(route, &event, config, secrets.as_ref())
        .await
        .and_then(RouteContext::from_config);
    let ctx = match ctx {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(route = %route, error = %e, "Route setup failed");
            return Ok(serde_json::to_value(RouteResponse::failure(&e))?);
        }
    };

    Ok(dispatch(&ctx, route, event).await)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let response = run(&cli).await?;

    let output = if cli.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{}", output);
    Ok(())
}
