use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docql::docql_core::expr::QueryExpr;
use docql::docql_core::Model;
use docql::{CancellationToken, DqlConfig, InMemoryStore, Parameters, QueryEngine};

#[derive(Parser, Debug)]
#[command(name = "docql")]
#[command(about = "docql - typed queries over a document store", long_about = None)]
struct Cli {
    /// Directory holding docql.toml and .env
    #[arg(long, global = true, default_value = ".")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a query against fixture data and print the result
    Run(QueryArgs),

    /// Print the translated query and execution plan without running it
    Explain(QueryArgs),
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Model description (JSON)
    #[arg(long)]
    model: PathBuf,

    /// Query pipeline (JSON)
    #[arg(long)]
    query: PathBuf,

    /// Fixture documents (JSON, `{"collection/path": {"id": {...}}}`)
    #[arg(long)]
    data: Option<PathBuf>,

    /// Query parameter, `name=<json>`; non-JSON values bind as strings
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = DqlConfig::load(&cli.config)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Run(args) => run(config, args, false).await,
        Command::Explain(args) => run(config, args, true).await,
    }
}

async fn run(config: DqlConfig, args: QueryArgs, explain_only: bool) -> anyhow::Result<()> {
    let model: Model = read_json(&args.model)?;
    let query: QueryExpr = read_json(&args.query)?;

    let store = match &args.data {
        Some(path) => InMemoryStore::from_fixture_file(path)?,
        None => InMemoryStore::new(),
    };
    let engine = QueryEngine::new(Arc::new(store), Arc::new(model), config);
    let parameters: Parameters = args.params.into_iter().collect();

    let compiled = engine.compile(&query)?;
    if explain_only {
        let explain = engine.explain(&compiled, &parameters)?;
        println!("{}", serde_json::to_string_pretty(&explain)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling query");
            on_interrupt.cancel();
        }
    });

    let output = engine.execute(&compiled, &parameters, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&output.to_json())?);

    let stats = engine.plan_cache_stats();
    tracing::debug!(
        "Plan cache: {} entries, {:.1}% hit rate, {} evictions",
        stats.entries,
        stats.hit_rate(),
        stats.evictions
    );
    Ok(())
}
