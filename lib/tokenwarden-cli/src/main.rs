#![allow(missing_docs, clippy::print_stdout)]
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tokenwarden_core::{GrantStrategy, TokenAcquirer, TokenConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "appsettings.json";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let CliArgs { config, strategy } = CliArgs::parse().context("parsing arguments")?;

    let mut token_config = load_config(&config).await?;
    if let Some(strategy) = strategy {
        token_config = token_config.with_strategy(strategy);
    }
    info!(config = %config.display(), strategy = %token_config.strategy(), "acquiring token");

    let acquirer = TokenAcquirer::new(token_config)?;
    let token = acquirer.get_token_with_retries().await;
    if token.is_empty() {
        bail!("no token could be acquired, see the log for each attempt");
    }

    println!("{token}");
    Ok(())
}

async fn load_config(path: &Path) -> Result<TokenConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading configuration {}", path.display()))?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext, "yml" | "yaml"));

    let config = if is_yaml {
        TokenConfig::from_yaml(&content)
    } else {
        TokenConfig::from_json(&content)
    };
    config.with_context(|| format!("parsing configuration {}", path.display()))
}

#[derive(Debug)]
struct CliArgs {
    config: PathBuf,
    strategy: Option<GrantStrategy>,
}

impl CliArgs {
    fn parse() -> Result<Self> {
        let mut pargs = pico_args::Arguments::from_env();

        let config = pargs
            .opt_value_from_str(["-c", "--config"])
            .context("parsing config argument")?;

        let strategy = pargs
            .opt_value_from_str(["-s", "--strategy"])
            .context("parsing strategy argument")?;

        let result = Self {
            config: config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)),
            strategy,
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            warn!(?remaining, "ignoring unused arguments");
        }
        Ok(result)
    }
}
