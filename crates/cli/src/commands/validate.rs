//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::NotifierConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    broker: String,
    enabled: bool,
    max_retry_attempts: u32,
    queue_high_water: usize,
    queue_low_water: usize,
    worker_count: usize,
    batch_size: usize,
    broker_pool_size: usize,
    path_prefixes: Vec<String>,
}

impl From<&NotifierConfig> for ConfigSummary {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            broker: config.broker_addr(),
            enabled: config.enabled,
            max_retry_attempts: config.max_retry_attempts,
            queue_high_water: config.queue_high_water,
            queue_low_water: config.low_water(),
            worker_count: config.worker_count,
            batch_size: config.batch_size,
            broker_pool_size: config.broker_pool_size,
            path_prefixes: config.path_prefixes.clone(),
        }
    }
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary::from(&config)),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &NotifierConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if !config.enabled {
        warnings.push("enabled = false - requests will not produce any jobs".to_string());
    }
    if config.path_prefixes.is_empty() {
        warnings.push("path_prefixes is empty - every path is in scope".to_string());
    }
    if config.broker_pool_size > config.worker_count * config.batch_size {
        warnings.push(format!(
            "broker_pool_size ({}) exceeds worker_count * batch_size ({}) - extra connections are never used",
            config.broker_pool_size,
            config.worker_count * config.batch_size
        ));
    }
    if config.shutdown_timeout_ms < config.submit_timeout_ms {
        warnings.push(
            "shutdown_timeout_ms < submit_timeout_ms - an in-flight submit may not finish during shutdown"
                .to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Broker: {}", summary.broker);
            println!("  Enabled: {}", summary.enabled);
            println!(
                "  Workers: {} (batch {})",
                summary.worker_count, summary.batch_size
            );
            println!(
                "  Queue water marks: high {} / low {}",
                summary.queue_high_water, summary.queue_low_water
            );
            println!("  Max attempts: {}", summary.max_retry_attempts);
            println!("  Connection pool: {}", summary.broker_pool_size);
            if !summary.path_prefixes.is_empty() {
                println!("  Path prefixes: {}", summary.path_prefixes.join(", "));
            }
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
