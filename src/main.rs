use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use voltree::cli::{Cli, Command};
use voltree::commands::{self, Node};
use voltree::config::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(out) => {
            if !out.is_empty() {
                println!("{}", out.trim_end());
            }
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<String> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let config =
        Config::load(&config_path).with_context(|| format!("loading {}", config_path.display()))?;

    // Config-only commands never touch the node data dir.
    match &cli.command {
        Command::Version => return Ok(commands::version()),
        Command::Setup { url, token } => {
            return Ok(commands::setup(&config_path, url, token)?)
        }
        Command::Config { url, token } => {
            return Ok(commands::config_cmd(&config_path, url.as_deref(), token.as_deref())?)
        }
        _ => {}
    }

    let data_dir = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => config.resolved_data_dir()?,
    };
    let node = Node::open(&data_dir)
        .await
        .with_context(|| format!("opening node at {}", data_dir.display()))?;

    let out = match cli.command {
        Command::Init {
            name,
            attrs,
            description,
        } => commands::init(&node, &name, attrs.as_deref(), description.as_deref()).await,
        Command::Create {
            volumeset,
            name,
            attrs,
        } => commands::create(&node, &volumeset, name.as_deref(), attrs.as_deref()).await,
        Command::Clone { object, name } => {
            commands::clone(&node, &object, name.as_deref()).await
        }
        Command::Snapshot {
            volume,
            name,
            branch,
            new_branch,
            attrs,
            description,
        } => {
            commands::snapshot(
                &node,
                &volume,
                name.as_deref(),
                branch.as_deref(),
                new_branch,
                attrs.as_deref(),
                description.as_deref(),
            )
            .await
        }
        Command::Update {
            object,
            name,
            attrs,
            description,
        } => {
            commands::update(
                &node,
                &object,
                name.as_deref(),
                attrs.as_deref(),
                description.as_deref(),
            )
            .await
        }
        Command::Remove { object } => commands::remove(&node, &object).await,
        Command::List { object, all } => commands::list(&node, object.as_deref(), all).await,
        Command::Sync { volumeset, all: _ } => {
            commands::sync(&node, &config, volumeset.as_deref()).await
        }
        Command::Fetch { volumeset, all: _ } => {
            commands::fetch(&node, &config, volumeset.as_deref()).await
        }
        Command::Push { object } => commands::push(&node, &config, &object).await,
        Command::Pull { object } => commands::pull(&node, &config, &object).await,
        Command::Info => commands::info(&node, &config).await,
        Command::Diagnostics { out } => commands::diagnostics(&node, &config, &out).await,
        Command::Version | Command::Setup { .. } | Command::Config { .. } => unreachable!(),
    }?;
    Ok(out)
}
