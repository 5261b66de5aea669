mod api;
mod executor;
mod fetch;
mod gateway;
mod markers;
#[cfg(test)]
mod testing;
mod webhook;

use clap::{Parser, Subcommand};
use std::io::Read;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zapflow_core::{config, shellexpand, traits::Provider, traits::Transport};
use zapflow_memory::Store;
use zapflow_providers::{gemini::GeminiProvider, openai::OpenAiProvider};

#[derive(Parser)]
#[command(
    name = "zapflow",
    version,
    about = "zapflow: WhatsApp automation with inline model commands"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway, dispatcher, and API server.
    Start,
    /// Show configuration, provider availability, and pending schedules.
    Status,
    /// Print the commands found in a model response (reads stdin when no text is given).
    Extract {
        #[arg(trailing_var_arg = true)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let cfg = config::load(&cli.config)?;
            let _guard = init_logging(&cfg)?;

            let provider = build_provider(&cfg)?;
            if !provider.is_available().await {
                tracing::warn!("provider '{}' did not answer the availability check", provider.name());
            }

            let transport = Arc::new(webhook::WebhookTransport::from_config(&cfg.transport));
            if !transport.is_connected().await {
                tracing::warn!("transport.webhook_url is empty; replies and schedules will not be delivered");
            }

            let store = Store::new(&cfg.memory, &cfg.zapflow.instance_id).await?;
            println!("{} starting (instance {})...", cfg.zapflow.name, cfg.zapflow.instance_id);

            let gw = gateway::Gateway::new(
                cfg,
                provider,
                Arc::new(store.clone()),
                Arc::new(store),
                transport,
            )
            .with_fetcher(Arc::new(fetch::HttpFetcher::new()));
            Arc::new(gw).run().await?;
        }
        Commands::Status => {
            let cfg = config::load(&cli.config)?;
            init_console_logging();
            println!("zapflow status\n");
            println!("Config: {}", cli.config);
            println!("Instance: {}", cfg.zapflow.instance_id);
            println!("Database: {}", shellexpand(&cfg.memory.db_path));
            println!();

            match build_provider(&cfg) {
                Ok(provider) => {
                    let available = provider.is_available().await;
                    println!(
                        "  provider {}: {}",
                        provider.name(),
                        if available { "available" } else { "unavailable" }
                    );
                }
                Err(e) => println!("  provider: {e}"),
            }
            println!(
                "  transport: {}",
                if cfg.transport.webhook_url.trim().is_empty() {
                    "not configured"
                } else {
                    "webhook"
                }
            );
            println!(
                "  api: {}",
                if cfg.api.enabled {
                    format!("{}:{}", cfg.api.host, cfg.api.port)
                } else {
                    "disabled".to_string()
                }
            );

            let store = Store::new(&cfg.memory, &cfg.zapflow.instance_id).await?;
            let (individual, group) = store.pending_counts().await?;
            println!("  pending schedules: {individual} individual, {group} group");
        }
        Commands::Extract { text } => {
            let input = if text.is_empty() {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                text.join(" ")
            };
            let extraction = markers::extract(&input);
            println!("{}", serde_json::to_string_pretty(&extraction)?);
        }
    }

    Ok(())
}

/// Console plus a daily rolling file under `{data_dir}/logs`.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// whole process.
fn init_logging(cfg: &config::Config) -> anyhow::Result<WorkerGuard> {
    let log_dir = std::path::PathBuf::from(shellexpand(&cfg.zapflow.data_dir)).join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "zapflow.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.zapflow.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .try_init()?;
    Ok(guard)
}

fn init_console_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
}

/// Build the configured provider.
fn build_provider(cfg: &config::Config) -> anyhow::Result<Arc<dyn Provider>> {
    match cfg.provider.default.as_str() {
        "openai" => {
            let oc = cfg
                .provider
                .openai
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("provider.openai section missing in config"))?;
            Ok(Arc::new(OpenAiProvider::from_config(
                oc.base_url.clone(),
                oc.api_key.clone(),
                oc.model.clone(),
            )))
        }
        "gemini" => {
            let gc = cfg
                .provider
                .gemini
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("provider.gemini section missing in config"))?;
            Ok(Arc::new(GeminiProvider::from_config(
                gc.api_key.clone(),
                gc.model.clone(),
            )))
        }
        other => anyhow::bail!("unsupported provider: {other}"),
    }
}
