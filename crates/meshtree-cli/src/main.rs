//! Command-line interface for the meshtree bridge.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meshtree_core::prelude::*;
use meshtree_core::ControlRouter;
use meshtree_mqtt::MqttTransport;
use meshtree_storage::{RedbObjectStore, RedbStoreConfig};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Mirror a mesh-network gateway's MQTT events into a persistent object tree.
#[derive(Parser, Debug)]
#[command(name = "meshtree")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file.
    #[arg(short, long, global = true, default_value = "meshtree.toml")]
    config: PathBuf,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge until interrupted. Lines of `path=value` on stdin are
    /// written back to the gateway.
    Run,
    /// Write one value back to the gateway and exit.
    Set {
        /// Leaf path, e.g. `nodeID_004.Binary Switch.targetValue`.
        path: String,
        /// JSON value; anything that is not JSON is sent as a string.
        value: String,
    },
    /// Print stored objects below a path prefix.
    Tree {
        /// Path prefix.
        #[arg(default_value = "")]
        prefix: String,
        /// Include current values.
        #[arg(long)]
        values: bool,
    },
    /// Validate the configuration and print it.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Run => run(&args.config).await,
        Command::Set { path, value } => set(&args.config, &path, &value).await,
        Command::Tree { prefix, values } => tree(&args.config, &prefix, values).await,
        Command::CheckConfig => check_config(&args.config),
    }
}

fn init_tracing(verbose: bool) {
    let json_logging = std::env::var("MESHTREE_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "meshtree={level},meshtree_core={level},meshtree_storage={level},meshtree_mqtt={level}"
        ))
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

/// File settings (when the file exists) plus environment overrides.
fn load_config(path: &Path) -> Result<BridgeConfig> {
    let mut config = if path.exists() {
        BridgeConfig::load(path)?
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        BridgeConfig::default()
    };
    config.apply_env()?;
    Ok(config)
}

fn open_store(config: &BridgeConfig) -> Result<RedbObjectStore> {
    let path = &config.storage.path;
    RedbObjectStore::new(RedbStoreConfig::new(path))
        .with_context(|| format!("failed to open object store at {}", path.display()))
}

fn config_banner(config: &BridgeConfig) -> String {
    let credentials = if config.mqtt.has_credentials() {
        format!("as {}", config.mqtt.username.as_deref().unwrap_or_default())
    } else {
        "anonymous".to_string()
    };
    format!(
        "broker {}:{} ({}), base topic '{}', gateway '{}', store {}, removed nodes: {:?}",
        config.mqtt.host,
        config.mqtt.port,
        credentials,
        config.mqtt.base_topic,
        config.gateway_name,
        config.storage.path.display(),
        config.engine.removed_node_policy,
    )
}

/// Split a console line of the form `path=value`.
fn parse_assignment(line: &str) -> Option<(TreePath, Value)> {
    let (path, raw) = line.split_once('=')?;
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    Some((TreePath::from(path), parse_value(raw.trim())))
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;
    info!("{}", config_banner(&config));

    let store: Arc<dyn ObjectStore> = Arc::new(open_store(&config)?);
    let subscriptions = SubscriptionRegistry::new();
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(subscriptions.clone()),
        config.engine.clone(),
    );
    let queue = MessageQueue::spawn(dispatcher, config.queue_capacity);
    let transport = MqttTransport::connect(&config.mqtt, &config.gateway_name, Some(queue.handle()))?;
    let router = ControlRouter::new(store).with_subscriptions(subscriptions);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_assignment(&line) {
                    Some((path, value)) => match router.route(&path, value).await {
                        Ok(message) => {
                            if let Err(e) = transport.publish(&message).await {
                                warn!(path = %path, error = %e, "Failed to publish write-back");
                            }
                        }
                        Err(e) => warn!(path = %path, error = %e, "Write-back rejected"),
                    },
                    None => warn!(line = %line, "Expected path=value"),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Failed to read console input");
                    stdin_open = false;
                }
            },
        }
    }

    let dispatcher = queue.shutdown().await?;
    info!(cached = dispatcher.cache().len(), "Message queue drained");
    if let Err(e) = transport.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    }
    Ok(())
}

async fn set(config_path: &Path, path: &str, raw: &str) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;

    let store: Arc<dyn ObjectStore> = Arc::new(open_store(&config)?);
    let router = ControlRouter::new(store);
    let message = router.route(&TreePath::from(path), parse_value(raw)).await?;

    let transport = MqttTransport::connect(&config.mqtt, &config.gateway_name, None)?;
    transport.publish(&message).await?;
    transport.disconnect().await?;
    println!("{} <- {}", message.topic, message.payload);
    Ok(())
}

async fn tree(config_path: &Path, prefix: &str, with_values: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;

    let objects = store.list_objects(prefix).await?;
    for (path, obj) in &objects {
        let role = obj.common.role.as_ref().map(|r| r.as_str()).unwrap_or("-");
        let kind = format!("{:?}", obj.kind).to_lowercase();
        let mut line = format!("{:<60} {:<8} {}", path.as_str(), kind, role);
        if obj.common.write {
            line.push_str(" rw");
        }
        if with_values {
            if let Some(stored) = store.read_value(path).await? {
                line.push_str(&format!(" = {}", stored.val));
            }
        }
        println!("{}", line);
    }
    println!("{} objects", objects.len());
    Ok(())
}

fn check_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;
    println!("{}", config_banner(&config));
    Ok(())
}
