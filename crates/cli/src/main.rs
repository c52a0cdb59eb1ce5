//! Operator CLI for vaultline.

use anyhow::{Context, Result, bail};
use base64::Engine;
use clap::{Args, Parser, Subcommand, ValueEnum};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vaultline_core::config::AppConfig;
use vaultline_core::{
    NetworkConstraint, TaskKey, TransferDirection, TransferTask, split_into_blocks,
};
use vaultline_crypto::{BlockFile, DefaultCryptoProvider, SessionKey, answer_challenge};
use vaultline_transfer::{ObserverRegistry, PipelineManager};

#[derive(Parser)]
#[command(name = "vaultline")]
#[command(about = "Encrypted block transfer engine")]
#[command(version)]
struct Cli {
    /// Config file path (TOML); VAULTLINE_* environment variables override it
    #[arg(long, short, global = true, env = "VAULTLINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a file into bounded block files
    Split {
        /// File to split
        input: PathBuf,
        /// Directory the block files are written to
        #[arg(long)]
        out_dir: PathBuf,
        /// Maximum block size in bytes (default: transfer.block_size)
        #[arg(long)]
        block_size: Option<u64>,
    },
    /// Answer a verification challenge for encrypted block files
    Prove {
        /// Verification code, base64
        #[arg(long)]
        code: String,
        /// Content session key the blocks were encrypted with, base64
        #[arg(long, env = "VAULTLINE_CONTENT_KEY", hide_env_values = true)]
        content_key: String,
        /// Encrypted block files
        #[arg(value_name = "BLOCK", required = true)]
        blocks: Vec<PathBuf>,
    },
    /// Inspect and manage the transfer queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List a user's transfers in claim order
    List {
        #[arg(long)]
        user: String,
        /// Print JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Add a transfer to the queue
    Enqueue {
        #[command(flatten)]
        key: TaskKeyArgs,
        #[arg(long, value_enum)]
        direction: DirectionArg,
        /// Source file (upload) or destination file (download)
        #[arg(long)]
        path: PathBuf,
        /// Lower runs first
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,
        /// Only run on unmetered networks
        #[arg(long, default_value_t = false)]
        unmetered_only: bool,
    },
    /// Cancel a transfer in any state and remove it
    Cancel {
        #[command(flatten)]
        key: TaskKeyArgs,
    },
    /// Delete a user's finished transfers
    Purge {
        #[arg(long)]
        user: String,
    },
    /// Return transfers left running by a crashed process to the queue
    Requeue,
}

#[derive(Args)]
struct TaskKeyArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    volume: String,
    #[arg(long)]
    share: String,
    #[arg(long)]
    link: String,
    #[arg(long)]
    revision: String,
}

impl TaskKeyArgs {
    fn to_key(&self) -> TaskKey {
        TaskKey::new(
            &self.user,
            &self.volume,
            &self.share,
            &self.link,
            &self.revision,
        )
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Upload,
    Download,
}

impl From<DirectionArg> for TransferDirection {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Upload => TransferDirection::Upload,
            DirectionArg::Download => TransferDirection::Download,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Split {
            input,
            out_dir,
            block_size,
        } => {
            handle_split(
                &input,
                &out_dir,
                block_size.unwrap_or(config.transfer.block_size),
            )
            .await
        }
        Commands::Prove {
            code,
            content_key,
            blocks,
        } => handle_prove(&code, &content_key, blocks).await,
        Commands::Queue { command } => handle_queue_command(command, &config).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Load configuration from an optional TOML file merged with `VAULTLINE_` environment variables.
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if let Some(path) = path {
        if !path.exists() {
            bail!("config file {} does not exist", path.display());
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("VAULTLINE_").split("__"));

    let config: AppConfig = figment
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn handle_split(input: &Path, out_dir: &Path, block_size: u64) -> Result<()> {
    let source = input.to_path_buf();
    let dest = out_dir.to_path_buf();
    let blocks = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&dest)
            .with_context(|| format!("failed to create {}", dest.display()))?;
        let file = std::fs::File::open(&source)
            .with_context(|| format!("failed to open {}", source.display()))?;
        Ok(split_into_blocks(
            std::io::BufReader::new(file),
            dest,
            block_size,
        )?)
    })
    .await??;

    for block in &blocks {
        let size = std::fs::metadata(block)?.len();
        println!("{size:>10}  {}", block.display());
    }
    tracing::info!(
        input = %input.display(),
        blocks = blocks.len(),
        block_size,
        "Split file"
    );
    Ok(())
}

async fn handle_prove(code: &str, content_key: &str, blocks: Vec<PathBuf>) -> Result<()> {
    let code = base64::engine::general_purpose::STANDARD
        .decode(code.trim())
        .context("verification code is not valid base64")?;
    let content_key =
        SessionKey::from_base64(content_key.trim()).context("invalid content key")?;

    let files: Vec<BlockFile> = blocks.iter().map(BlockFile::new).collect();
    let tokens = answer_challenge(Arc::new(DefaultCryptoProvider), content_key, &code, files)
        .await
        .context("failed to answer verification challenge")?;

    for block in &blocks {
        if let Some(token) = tokens.get(block) {
            println!("{}  {}", token.to_base64(), block.display());
        }
    }
    Ok(())
}

async fn open_pipeline(config: &AppConfig) -> Result<PipelineManager> {
    let store = vaultline_transfer::from_config(&config.store)
        .await
        .with_context(|| format!("failed to open queue at {}", config.store.path.display()))?;
    Ok(PipelineManager::new(
        store,
        config.transfer.clone(),
        Arc::new(ObserverRegistry::new()),
    ))
}

async fn handle_queue_command(command: QueueCommands, config: &AppConfig) -> Result<()> {
    let pipeline = open_pipeline(config).await?;

    match command {
        QueueCommands::List { user, json } => {
            let tasks = pipeline.list_transfers(&user).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                print_tasks(&tasks);
            }
        }
        QueueCommands::Enqueue {
            key,
            direction,
            path,
            priority,
            unmetered_only,
        } => {
            let constraint = if unmetered_only {
                NetworkConstraint::UnmeteredOnly
            } else {
                NetworkConstraint::Any
            };
            let task = TransferTask::new(key.to_key(), direction.into(), path)
                .with_priority(priority)
                .with_network_constraint(constraint);
            let key = task.key.clone();
            pipeline
                .enqueue_transfer(task)
                .await
                .with_context(|| format!("failed to enqueue {key}"))?;
            println!("Enqueued {key}");
        }
        QueueCommands::Cancel { key } => {
            let key = key.to_key();
            if pipeline.cancel_transfer(&key).await? {
                println!("Cancelled {key}");
            } else {
                bail!("no transfer {key} in the queue");
            }
        }
        QueueCommands::Purge { user } => {
            let purged = pipeline.purge_done(&user).await?;
            println!("Purged {purged} finished transfer(s)");
        }
        QueueCommands::Requeue => {
            let requeued = pipeline.recover().await?;
            println!("Requeued {requeued} interrupted transfer(s)");
        }
    }
    Ok(())
}

fn print_tasks(tasks: &[TransferTask]) {
    if tasks.is_empty() {
        println!("No transfers");
        return;
    }

    println!(
        "{:<17} {:<9} {:>8} {:>7}  {:<30} PATH",
        "STATE", "DIRECTION", "PRIORITY", "RETRIES", "LINK/REVISION"
    );
    for task in tasks {
        println!(
            "{:<17} {:<9} {:>8} {:>7}  {:<30} {}",
            task.state.as_str(),
            task.direction.as_str(),
            task.priority,
            task.retry_count,
            format!("{}/{}", task.key.link_id, task.key.revision_id),
            task.local_path.display()
        );
        if let Some(error) = &task.last_error {
            println!("{:<17} last error: {error}", "");
        }
    }
}
