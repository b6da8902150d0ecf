use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use parley_core::{
    AnthropicConnector, ConnectorSet, EventSink, InboundEvent, OpenAiConnector, OutboundEvent,
    Router,
};
use parley_gateway::{GatewayServer, KeyStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::ParleyConfig;

#[derive(Parser)]
#[command(name = "parley")]
#[command(version)]
#[command(about = "Parley - route a conversation between two AI agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket and HTTP gateway
    Start,

    /// Send a one-shot message to one agent and print the replies
    Ask {
        /// Agent to address (gpt or claude)
        #[arg(short, long, default_value = "gpt")]
        agent: String,

        /// The message to send
        message: String,
    },

    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            init_logging(cli.debug, "info");
            cmd_init().await
        }
        Commands::Config => cmd_config(&cli.config, cli.debug).await,
        Commands::Start => cmd_start(&cli.config, cli.debug).await,
        Commands::Ask { agent, message } => cmd_ask(&cli.config, cli.debug, &agent, &message).await,
    }
}

/// `--debug` wins, then `RUST_LOG`, then the configured level
fn init_logging(debug: bool, level: &str) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: &Option<PathBuf>, debug: bool) -> Result<ParleyConfig> {
    let cfg = ParleyConfig::load(path)?;
    init_logging(debug, &cfg.logging.level);
    Ok(cfg)
}

fn build_connectors(cfg: &ParleyConfig) -> Result<(ConnectorSet, KeyStatus)> {
    let openai_cfg = &cfg.providers.openai;
    let openai = OpenAiConnector::new(
        Some(openai_cfg.api_key.clone()),
        openai_cfg.model.clone(),
        openai_cfg.base_url.clone(),
    )?;

    let anthropic_cfg = &cfg.providers.anthropic;
    let anthropic = AnthropicConnector::new(
        Some(anthropic_cfg.api_key.clone()),
        anthropic_cfg.model.clone(),
        anthropic_cfg.base_url.clone(),
    )?;

    let keys = KeyStatus {
        openai: openai.has_key(),
        anthropic: anthropic.has_key(),
    };
    if !keys.openai {
        warn!("OPENAI_API_KEY is not set; calls to gpt will fail");
    }
    if !keys.anthropic {
        warn!("ANTHROPIC_API_KEY is not set; calls to claude will fail");
    }

    info!(
        "Connectors: gpt -> {} ({}), claude -> {} ({})",
        openai.model(),
        openai_cfg.base_url,
        anthropic.model(),
        anthropic_cfg.base_url
    );

    let connectors = ConnectorSet::new()
        .with(Arc::new(openai))
        .with(Arc::new(anthropic));
    Ok((connectors, keys))
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        tokio::fs::write(&config_path, config::DEFAULT_CONFIG).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("Parley initialized at {}", config_dir.display());
    println!(
        "Export OPENAI_API_KEY and ANTHROPIC_API_KEY, or edit {}.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>, debug: bool) -> Result<()> {
    let cfg = load_config(config_path, debug)?;
    let shown = toml::to_string_pretty(&cfg.masked()).context("Failed to render config")?;
    println!("{}", shown);
    Ok(())
}

async fn cmd_start(config_path: &Option<PathBuf>, debug: bool) -> Result<()> {
    let cfg = load_config(config_path, debug)?;
    let bind = cfg.bind_addr()?;
    let (connectors, keys) = build_connectors(&cfg)?;

    let router = Arc::new(Router::new(cfg.router.clone(), connectors));
    let server = GatewayServer::new(bind, router, keys);

    info!("Starting parley on {}", bind);
    server
        .run(async {
            if signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down...");
            }
        })
        .await?;

    println!("Parley stopped.");
    Ok(())
}

/// Prints agent replies and notices as they are published
struct StdoutSink;

#[async_trait]
impl EventSink for StdoutSink {
    async fn publish(&self, event: OutboundEvent) {
        match event {
            OutboundEvent::AgentResponse { sender, text, .. } => {
                println!("[{}] {}\n", sender, text);
            }
            OutboundEvent::SystemNotice { text } => println!("* {}\n", text),
            OutboundEvent::Error { text } => eprintln!("Error: {}", text),
            _ => {}
        }
    }
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    debug: bool,
    agent: &str,
    message: &str,
) -> Result<()> {
    let cfg = load_config(config_path, debug)?;
    let (connectors, _) = build_connectors(&cfg)?;
    let router = Router::new(cfg.router.clone(), connectors);

    let event = InboundEvent::HumanMessage {
        target: agent.to_string(),
        thread: "cli".to_string(),
        text: message.to_string(),
        call_id: None,
    };
    router.process(event, &StdoutSink).await;
    Ok(())
}
