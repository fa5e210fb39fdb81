//! Debug command printing the resolved SDK configuration

use anyhow::{Context, Result};
use clap::Args;
use console::{style, Emoji};
use std::path::PathBuf;
use treblle_core::environment::{current_environment, is_ignored};
use treblle_core::{mask_secret, TreblleConfig};

#[derive(Args, Debug)]
pub struct DebugArgs {
    /// Load variables from this file instead of `.env`
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,
}

static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "- ");
static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");

const DEFAULT_ENDPOINT_LABEL: &str = "Default Treblle API endpoints (load balanced)";

pub async fn debug(args: DebugArgs) -> Result<()> {
    match &args.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
        }
        None => {
            // A missing .env is fine.
            let _ = dotenvy::dotenv();
        }
    }

    let config = TreblleConfig::new("", "").with_env_overrides();
    let environment = current_environment();

    println!("{}", style("=== Treblle Rust SDK Debug Information ===").bold());
    println!();
    for (label, value) in report(&config, environment.as_deref()) {
        println!("{} {:<24} {}", INFO, style(label).bold(), value);
    }

    if config.api_key().is_empty() || config.project_id().is_empty() {
        println!();
        println!(
            "{} {}",
            WARN,
            style("TREBLLE_API_KEY and TREBLLE_PROJECT_ID must both be set").yellow()
        );
    }

    Ok(())
}

/// Label/value rows shown by `treblle debug`.
pub(crate) fn report(config: &TreblleConfig, environment: Option<&str>) -> Vec<(&'static str, String)> {
    let (sdk_name, sdk_version) = config.sdk();
    let delivery = config.delivery_settings();
    let batch = config.batch_settings();
    let ignored = is_ignored(environment, config.ignored());

    let mut rows = vec![
        ("SDK Name:", sdk_name.to_string()),
        ("SDK Version:", sdk_version.to_string()),
        ("Project ID:", mask_secret(config.project_id())),
        ("API Key:", mask_secret(config.api_key())),
        (
            "Configured Treblle URL:",
            config
                .configured_endpoint()
                .unwrap_or(DEFAULT_ENDPOINT_LABEL)
                .to_string(),
        ),
        ("Ignored Environments:", format!("{:?}", config.ignored())),
        (
            "Current Environment:",
            match environment {
                Some(env) if ignored => format!("{env} (ignored, capture disabled)"),
                Some(env) => env.to_string(),
                None => "Not Set".to_string(),
            },
        ),
        ("Masking:", on_off(config.is_masking_enabled())),
        ("Debug Logging:", on_off(config.is_debug())),
        ("Async Delivery:", on_off(delivery.async_enabled)),
        ("Max Concurrency:", delivery.max_concurrency.to_string()),
        ("Shutdown Timeout:", format!("{:?}", delivery.shutdown_timeout)),
        ("Batch Errors:", on_off(batch.enabled)),
    ];
    if batch.enabled {
        rows.push(("Batch Size:", batch.batch_size.to_string()));
        rows.push(("Flush Interval:", format!("{:?}", batch.flush_interval)));
    }
    rows
}

fn on_off(enabled: bool) -> String {
    if enabled { "enabled" } else { "disabled" }.to_string()
}
