use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::{
    chain::{ChainReader, RpcChainReader},
    error::{Error, Result},
    shutdown::ShutdownManager,
    store::{DocumentStore, ScanDirection, elastic::ElasticStore},
    sync::pipeline::Pipeline,
};

mod chain;
mod error;
mod shutdown;
mod store;
mod sync;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let config = Config::new(&args.config)?;
    init_tracing(&config.log)?;

    let chain = Arc::new(RpcChainReader::new(Url::parse(&config.chain.rpc_url)?));
    let store = Arc::new(ElasticStore::new(
        Url::parse(&config.store.endpoint)?,
        Some(config.store.username.clone()).filter(|u| !u.is_empty()),
        Some(config.store.password.clone()).filter(|p| !p.is_empty()),
    ));

    match args.command {
        Command::Run(_) => run(config, chain, store).await,
        Command::Status => status(chain, store).await,
    }
}

async fn run(config: Config, chain: Arc<RpcChainReader>, store: Arc<ElasticStore>) -> Result<()> {
    info!(
        chain = %config.chain.rpc_url,
        store = %config.store.endpoint,
        "starting chainscribe",
    );

    let pipeline = Pipeline::new(config.sync, chain, store)?;

    let cancel = CancellationToken::new();
    let mut shutdown = ShutdownManager::new();
    let mut pipeline_task = tokio::spawn(pipeline.start(cancel.clone()));

    tokio::select! {
        _ = shutdown.recv() => {
            info!("shutting down...");
            cancel.cancel();
            join_pipeline(&mut pipeline_task).await?;
        }
        finished = &mut pipeline_task => {
            finished.map_err(|err| Error::Custom(format!("pipeline task failed: {err}")))??;
        }
    }

    info!("shutdown complete");
    Ok(())
}

async fn join_pipeline(task: &mut tokio::task::JoinHandle<Result<()>>) -> Result<()> {
    task.await
        .map_err(|err| Error::Custom(format!("pipeline task failed: {err}")))?
}

async fn status(chain: Arc<RpcChainReader>, store: Arc<ElasticStore>) -> Result<()> {
    let head = chain.block_number().await?;
    let forward = store.last_indexed_block(ScanDirection::Forward).await?;
    let backward = store.last_indexed_block(ScanDirection::Backward).await?;

    println!("chain head:             {head}");
    println!("last forward indexed:   {forward}");
    println!("last backward indexed:  {backward}");
    println!("head lag:               {}", head.saturating_sub(forward));

    Ok(())
}

fn init_tracing(log: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(log.level.as_deref().unwrap_or("info"))
        .map_err(|err| Error::Custom(format!("invalid log level: {err}")))?;

    match log.format.unwrap_or_default() {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
    Ok(())
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the ingestion pipeline
    Run(Args),
    /// Show the chain head and both persisted scan cursors
    Status,
}

#[derive(Debug, clap::Args)]
pub struct Args {}

#[derive(Debug, Parser)]
#[clap(name = "chainscribe")]
#[clap(bin_name = "chainscribe")]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to a configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: sync::Config,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChainConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
}

fn default_rpc_url() -> String {
    "http://localhost:8545".into()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_store_endpoint() -> String {
    "http://127.0.0.1:9200".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_store_endpoint(),
            username: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LogConfig {
    /// Log level or filter directive, defaults to "info"
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Deserialize, Debug, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Config {
    pub fn new(config_path: &Option<PathBuf>) -> Result<Self> {
        let mut s = config::Config::builder();

        s = s.add_source(config::File::with_name("chainscribe.toml").required(false));

        if let Some(explicit) = config_path.as_ref().and_then(|x| x.to_str()) {
            s = s.add_source(config::File::with_name(explicit).required(true));
        }

        s = s.add_source(config::Environment::with_prefix("CHAINSCRIBE").separator("_"));

        Ok(s.build()?.try_deserialize()?)
    }
}
