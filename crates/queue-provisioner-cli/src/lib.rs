//! # Queue Provisioner CLI
//!
//! Command-line access to a provisioned queue client.
//!
//! This module provides CLI commands for:
//! - Sending messages through the buffered client
//! - Receiving (and optionally deleting) messages
//! - Validating and showing the resolved configuration
//!
//! Every command that touches a queue builds the client through the same
//! registry and provisioner a long-running service would use, and shuts the
//! registry down before returning.

use clap::{Parser, Subcommand};
use futures::future::join_all;
use queue_provisioner::providers::InMemoryClientFactory;
use queue_provisioner::{
    ComponentRegistry, ConfigurationError, CredentialsConfig, OutboundMessage, ProvisionerConfig,
    QueueError, QueueName, QueueServiceClient, ReceiveOptions, RegistryError,
    SqsClientProvisioner,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue Provisioner CLI - send and receive through a managed queue client
#[derive(Parser, Debug)]
#[command(name = "queue-provisioner")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send and receive messages through a provisioned, buffered queue client")]
pub struct Cli {
    /// Configuration file path (yaml, json or toml)
    #[arg(short, long, global = true, env = "QUEUE_PROVISIONER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level or filter directive
    #[arg(short, long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Use the in-memory backend instead of AWS
    #[arg(long, global = true)]
    pub in_memory: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send messages to a queue
    Send {
        /// Queue name
        #[arg(short, long)]
        queue: String,

        /// Message body
        #[arg(short, long)]
        body: String,

        /// Number of copies to send
        #[arg(long, default_value = "1")]
        count: usize,

        /// Message group for FIFO queues
        #[arg(long)]
        group_id: Option<String>,
    },

    /// Receive messages from a queue
    Receive {
        /// Queue name
        #[arg(short, long)]
        queue: String,

        /// Maximum number of messages, 1-10
        #[arg(short, long, default_value = "1")]
        max: u32,

        /// Long-poll wait in seconds, up to 20
        #[arg(short, long)]
        wait_seconds: Option<u64>,

        /// Delete messages after printing them
        #[arg(short, long)]
        delete: bool,
    },

    /// Validate and show the resolved configuration
    Config {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Provisioning error: {0}")]
    Provisioning(#[from] RegistryError),

    #[error("Queue operation failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    #[error("Output formatting failed: {message}")]
    Output { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Logging { .. } => 1,
            Self::Provisioning(_) => 2,
            Self::Queue(_) => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Output { .. } | Self::Io(_) => 5,
        }
    }

    fn invalid(arg: &str, message: impl ToString) -> Self {
        Self::InvalidArgument {
            arg: arg.to_string(),
            message: message.to_string(),
        }
    }
}

// ============================================================================
// Entry Points
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(&cli.log_level, cli.json_logs)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(cli, &mut out).await
}

/// Run a parsed command, writing results to `out`.
pub async fn execute(cli: Cli, out: &mut dyn Write) -> Result<(), CliError> {
    let config = ProvisionerConfig::load(cli.config.as_deref())?;

    if let Commands::Config { format } = cli.command {
        return write_config(&config, format, out);
    }

    let registry = ComponentRegistry::new();
    let result = run_queue_command(&registry, &config, &cli, out).await;
    registry.shutdown().await;
    result
}

/// Initialize tracing to stderr
pub fn initialize_logging(level: &str, json: bool) -> Result<(), CliError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| CliError::invalid("log-level", e))?;
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn run_queue_command(
    registry: &ComponentRegistry,
    config: &ProvisionerConfig,
    cli: &Cli,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    config.register_collaborators(registry)?;

    let mut provisioner = SqsClientProvisioner::from_config(config);
    if cli.in_memory {
        provisioner = provisioner.with_factory(InMemoryClientFactory::new());
    }
    provisioner.register(registry)?;

    let client = registry.require::<dyn QueueServiceClient>().await?;
    debug!(backend = client.backend(), region = ?client.region(), "Client ready");

    match &cli.command {
        Commands::Send {
            queue,
            body,
            count,
            group_id,
        } => execute_send_command(client.as_ref(), queue, body, *count, group_id.as_deref(), out).await,
        Commands::Receive {
            queue,
            max,
            wait_seconds,
            delete,
        } => execute_receive_command(client.as_ref(), queue, *max, *wait_seconds, *delete, out).await,
        Commands::Config { .. } => Ok(()),
    }
}

fn parse_queue(queue: &str) -> Result<QueueName, CliError> {
    QueueName::new(queue).map_err(|e| CliError::invalid("queue", e))
}

async fn execute_send_command(
    client: &dyn QueueServiceClient,
    queue: &str,
    body: &str,
    count: usize,
    group_id: Option<&str>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let queue = parse_queue(queue)?;
    if count == 0 {
        return Err(CliError::invalid("count", "must be at least 1"));
    }
    if queue.is_fifo() && group_id.is_none() {
        return Err(CliError::invalid("group-id", "required for FIFO queues"));
    }

    let url = client.get_queue_url(queue.as_str()).await?;
    let sends = (0..count).map(|_| {
        let mut message = OutboundMessage::new(body);
        if let Some(group_id) = group_id {
            message = message.with_group_id(group_id);
        }
        client.send_message(&url, message)
    });

    let mut failures = Vec::new();
    for result in join_all(sends).await {
        match result {
            Ok(receipt) => writeln!(out, "Sent message {}", receipt.message_id)?,
            Err(error) => failures.push(error),
        }
    }

    info!(queue = %queue, sent = count - failures.len(), "Send command finished");
    match failures.into_iter().next() {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

async fn execute_receive_command(
    client: &dyn QueueServiceClient,
    queue: &str,
    max: u32,
    wait_seconds: Option<u64>,
    delete: bool,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let queue = parse_queue(queue)?;
    let mut options = ReceiveOptions::default().with_max_messages(max);
    if let Some(seconds) = wait_seconds {
        options = options.with_wait_time(Duration::from_secs(seconds));
    }
    options
        .validate()
        .map_err(|e| CliError::invalid("max/wait-seconds", e))?;

    let url = client.get_queue_url(queue.as_str()).await?;
    let messages = client.receive_messages(&url, options).await?;

    if messages.is_empty() {
        writeln!(out, "No messages")?;
        return Ok(());
    }

    for message in &messages {
        writeln!(
            out,
            "{}\t{}\t{}",
            message.message_id, message.receive_count, message.body
        )?;
    }

    if delete {
        let deletes = messages
            .iter()
            .map(|message| client.delete_message(&url, &message.receipt_handle));
        for result in join_all(deletes).await {
            result?;
        }
        writeln!(out, "Deleted {} message(s)", messages.len())?;
    }

    Ok(())
}

fn write_config(
    config: &ProvisionerConfig,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(config).map_err(|e| CliError::Output {
                message: e.to_string(),
            })?;
            writeln!(out, "{}", json)?;
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(config).map_err(|e| CliError::Output {
                message: e.to_string(),
            })?;
            write!(out, "{}", yaml)?;
        }
        OutputFormat::Text => {
            writeln!(
                out,
                "region: {}",
                config.region.as_deref().unwrap_or("<default chain>")
            )?;
            let credentials = match &config.credentials {
                None => "<default chain>".to_string(),
                Some(CredentialsConfig::Static { access_key_id, .. }) => {
                    format!("static ({})", access_key_id)
                }
                Some(CredentialsConfig::Profile { profile_name }) => {
                    format!("profile ({})", profile_name)
                }
                Some(CredentialsConfig::Environment) => "environment".to_string(),
            };
            writeln!(out, "credentials: {}", credentials)?;
            match &config.network {
                None => writeln!(out, "network: <sdk defaults>")?,
                Some(network) => writeln!(out, "network: {:?}", network)?,
            }
            let buffer = &config.buffer;
            writeln!(out, "buffer.max_batch_size: {}", buffer.max_batch_size)?;
            writeln!(out, "buffer.max_batch_size_bytes: {}", buffer.max_batch_size_bytes)?;
            writeln!(out, "buffer.max_batch_open_ms: {}", buffer.max_batch_open_ms)?;
            writeln!(
                out,
                "buffer.max_inflight_outbound_batches: {}",
                buffer.max_inflight_outbound_batches
            )?;
        }
    }
    Ok(())
}
