// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use clap::Parser;
use rustfs_kms_plugin::{KmsService, PluginConfig, RequestContext, StatusResponse, VaultProvider};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Open the Vault KMS provider with a plugin config and run one Status check
#[derive(Parser, Debug)]
#[command(name = "rustfs-kms-probe", version, about)]
struct Cli {
    /// Path to the provider JSON config file
    #[arg(long = "configfile", env = "KMS_PLUGIN_CONFIG")]
    config_file: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Deadline for the whole check, in seconds
    #[arg(long = "timeout", default_value_t = 60)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.debug) {
        eprintln!("{e:#}");
        return ExitCode::from(2);
    }

    match check_status(&cli).await {
        Ok(status) => {
            match serde_json::to_string_pretty(&status) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("Failed to render status: {}", e),
            }
            if status.is_healthy() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            error!("KMS provider check failed: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn check_status(cli: &Cli) -> Result<StatusResponse> {
    info!("Starting rustfs-kms-probe v{}", env!("CARGO_PKG_VERSION"));

    let config = PluginConfig::from_file(&cli.config_file)
        .with_context(|| format!("Failed to load config {}", cli.config_file.display()))?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight Vault calls");
            on_signal.cancel();
        }
    });

    let ctx = RequestContext::with_cancellation(shutdown).with_timeout(Duration::from_secs(cli.timeout_secs));
    let provider = VaultProvider::open(&ctx, &config)
        .await
        .context("Failed to open Vault KMS provider")?;

    let status = provider.status(&ctx).await.context("Status call failed")?;
    info!(healthz = %status.healthz, key_id = %status.key_id, "status");
    Ok(status)
}

fn init_tracing(debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Failed to create log filter")?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set global tracing subscriber")?;
    Ok(())
}
