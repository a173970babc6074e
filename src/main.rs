//! image-recognition entry point.
//!
//! Connects to a Zipper broker as the `image-recognition` stream function
//! and classifies every image it receives with the configured model module.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use image_recognition_common::NodeConfig;
use image_recognition_core::EngineAdapter;
use image_recognition_host::StandardImports;
use image_recognition_stream::{NodeState, StreamFunction, shutdown_signal};

/// Image classification stream function.
#[derive(Parser)]
#[command(name = "image-recognition")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "IMAGE_RECOGNITION_CONFIG")]
    config: Option<PathBuf>,

    /// Zipper address in host:port form
    #[arg(long, env = "ZIPPER_ADDR")]
    zipper_addr: Option<String>,

    /// Path to the model module
    #[arg(short, long)]
    module: Option<PathBuf>,

    /// Stream function name
    #[arg(short, long)]
    name: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Arguments passed to the guest as its argv
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    guest_args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,image_recognition=debug".into());

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
    }
}

/// Load the configuration file (if any) and apply command line overrides.
fn load_config(cli: Cli) -> anyhow::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => NodeConfig::default(),
    };

    if let Some(addr) = cli.zipper_addr {
        config.zipper.addr = addr;
    }
    if let Some(module) = cli.module {
        config.engine.module_path = module;
    }
    if let Some(name) = cli.name {
        config.zipper.function_name = name;
    }
    if !cli.guest_args.is_empty() {
        config.wasi.args = cli.guest_args;
    }

    Ok(config)
}

/// Serve the Zipper connection until shutdown.
///
/// Returns the number of messages handled. Any startup failure, including
/// an unreachable Zipper, is returned as an error and becomes a non-zero
/// exit status in `main`.
async fn run(config: NodeConfig) -> anyhow::Result<u64> {
    let imports = StandardImports::default();
    info!(
        backend = imports.backend_name(),
        "Inference backend selected"
    );

    let adapter = EngineAdapter::from_node_config(&config, Arc::new(imports));
    let state = NodeState::new(Arc::new(adapter), config.zipper.ack_status);

    let mut sfn = StreamFunction::from_config(&config.zipper);
    sfn.set_handler(state)
        .context("Failed to register stream handler")?;

    let connection = sfn
        .connect()
        .await
        .with_context(|| format!("Failed to connect to zipper at {}", config.zipper.addr))?;

    Ok(connection.serve(shutdown_signal()).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting image-recognition");

    let config = load_config(cli)?;

    info!(
        zipper = %config.zipper.addr,
        name = %config.zipper.function_name,
        module = %config.engine.module_path.display(),
        observe = format_args!("{:#04x}", config.zipper.observe_data_key),
        "Configuration loaded"
    );

    let handled = run(config).await?;

    info!(handled, "Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "image-recognition",
            "--zipper-addr",
            "zipper:9000",
            "--module",
            "food.wasm",
            "--",
            "--top",
            "3",
        ]);

        let config = load_config(cli).unwrap();
        assert_eq!(config.zipper.addr, "zipper:9000");
        assert_eq!(config.engine.module_path, PathBuf::from("food.wasm"));
        assert_eq!(config.wasi.args, vec!["--top", "3"]);
        assert_eq!(config.zipper.function_name, "image-recognition");
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["image-recognition"]);
        assert_eq!(cli.log_format, LogFormat::Text);

        let config = load_config(cli).unwrap();
        assert_eq!(config.zipper.observe_data_key, 0x10);
        assert_eq!(config.zipper.ack_status, 0x11);
    }

    #[test]
    fn test_missing_config_file() {
        let cli = Cli::parse_from(["image-recognition", "--config", "/no/such/node.toml"]);
        assert!(load_config(cli).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_zipper_fails_run() {
        // Reserve a port, then free it so nothing listens there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut config = NodeConfig::default();
        config.zipper.addr = addr.clone();
        config.zipper.connect_timeout_ms = 1000;

        let err = run(config).await.unwrap_err();
        assert!(err.to_string().contains(&addr));
    }
}
