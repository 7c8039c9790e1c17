//! Config command - View and manage MedSync configuration
//!
//! Provides the `medsync config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Sets individual values via dot-notation keys
//! 3. Validates the configuration file and reports errors

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::json;
use tracing::info;

use medsync_core::config::Config;

use crate::context::CliContext;
use crate::output::{get_formatter, OutputFormat};

/// Shown instead of the bearer token
const REDACTED: &str = "<redacted>";

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Set a configuration value and save the file
    Set {
        /// Configuration key (e.g. "sync.pull_interval_secs")
        key: String,
        /// New value
        value: String,
    },
    /// Validate the configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CliContext, format: OutputFormat) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(ctx, format),
            ConfigCommand::Set { key, value } => execute_set(ctx, key, value, format),
            ConfigCommand::Validate => execute_validate(ctx, format),
        }
    }
}

fn redacted(config: &Config) -> Config {
    let mut config = config.clone();
    if config.server.access_token.is_some() {
        config.server.access_token = Some(REDACTED.to_string());
    }
    config
}

fn execute_show(ctx: &CliContext, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let config = redacted(&ctx.config);

    info!(config_path = %ctx.config_path.display(), "Showing configuration");

    if format.is_json() {
        let value =
            serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&value);
        return Ok(());
    }

    let source = if ctx.config_path.exists() {
        ctx.config_path.display().to_string()
    } else {
        format!("defaults, {} not found", ctx.config_path.display())
    };
    formatter.success(&format!("Configuration ({})", source));
    formatter.info("");
    for line in config.to_yaml()?.lines() {
        formatter.info(line);
    }
    Ok(())
}

fn execute_set(ctx: &CliContext, key: &str, value: &str, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let mut config = ctx.config.clone();

    info!(key = %key, "Setting configuration value");

    if let Err(e) = apply_config_value(&mut config, key, value) {
        if format.is_json() {
            formatter.print_json(&json!({
                "success": false,
                "key": key,
                "error": e.to_string(),
            }));
        } else {
            formatter.error(&format!("Failed to set '{}': {}", key, e));
            formatter.info("");
            formatter.info("Supported keys:");
            for (name, help) in SUPPORTED_KEYS {
                formatter.info(&format!("  {:<36} - {}", name, help));
            }
        }
        return Ok(());
    }

    let errors = config.validate();
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        if format.is_json() {
            formatter.print_json(&json!({
                "success": false,
                "key": key,
                "errors": messages,
            }));
        } else {
            formatter.error(&format!("Invalid value for '{}': {}", key, messages.join("; ")));
        }
        return Ok(());
    }

    if let Some(parent) = ctx.config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
    }
    std::fs::write(&ctx.config_path, config.to_yaml()?)
        .context("Failed to write configuration file")?;

    if format.is_json() {
        formatter.print_json(&json!({
            "success": true,
            "key": key,
            "config_path": ctx.config_path.display().to_string(),
        }));
    } else {
        formatter.success(&format!("Set {}", key));
        formatter.info(&format!("Saved to {}", ctx.config_path.display()));
    }
    Ok(())
}

fn execute_validate(ctx: &CliContext, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let path = &ctx.config_path;

    if !path.exists() {
        if format.is_json() {
            formatter.print_json(&json!({
                "valid": true,
                "config_path": path.display().to_string(),
                "errors": [],
                "defaults": true,
            }));
        } else {
            formatter.info(&format!("Configuration file not found at {}", path.display()));
            formatter.info("Using the built-in defaults. Run 'medsync config set <key> <value>' to create one.");
        }
        return Ok(());
    }

    let config = match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            if format.is_json() {
                formatter.print_json(&json!({
                    "valid": false,
                    "config_path": path.display().to_string(),
                    "errors": [format!("{:#}", e)],
                }));
            } else {
                formatter.error(&format!("{:#}", e));
            }
            return Ok(());
        }
    };

    info!(config_path = %path.display(), "Validating configuration");
    let errors = config.validate();

    if format.is_json() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        formatter.print_json(&json!({
            "valid": errors.is_empty(),
            "config_path": path.display().to_string(),
            "errors": messages,
        }));
    } else if errors.is_empty() {
        formatter.success("Configuration is valid");
        formatter.info(&format!("File: {}", path.display()));
    } else {
        formatter.error(&format!(
            "Configuration has {} error{}:",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" }
        ));
        formatter.info(&format!("File: {}", path.display()));
        formatter.info("");
        for error in &errors {
            formatter.info(&format!("  {} - {}", error.field, error.message));
        }
    }
    Ok(())
}

const SUPPORTED_KEYS: &[(&str, &str)] = &[
    ("server.base_url", "REST API root"),
    ("server.access_token", "Bearer token, 'none' to clear"),
    ("server.request_timeout_secs", "Per-request timeout"),
    ("server.health_path", "Reachability probe path"),
    ("connectivity.probe_timeout_secs", "Probe time budget"),
    ("connectivity.probe_retry_secs", "Delay before re-probing"),
    ("connectivity.settle_delay_secs", "Wait after coming online"),
    ("sync.pull_interval_secs", "Seconds between periodic pulls"),
    ("sync.backoff_base_secs", "First retry delay"),
    ("sync.backoff_max_secs", "Retry delay cap"),
    ("retention.max_attempts", "Attempts before an item is dropped"),
    ("retention.max_age_hours", "Age before an item is dropped"),
    ("storage.database", "SQLite file path"),
    ("logging.level", "trace|debug|info|warn|error"),
    ("logging.json", "true|false"),
];

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("Expected a non-negative integer for {}", key))
}

/// Applies a dot-notation key/value pair to a [`Config`]
fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        // --- server ---
        "server.base_url" => config.server.base_url = value.trim_end_matches('/').to_string(),
        "server.access_token" => {
            config.server.access_token = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.to_string())
            };
        }
        "server.request_timeout_secs" => {
            config.server.request_timeout_secs = parse_number(key, value)?
        }
        "server.health_path" => config.server.health_path = value.to_string(),

        // --- connectivity ---
        "connectivity.probe_timeout_secs" => {
            config.connectivity.probe_timeout_secs = parse_number(key, value)?
        }
        "connectivity.probe_retry_secs" => {
            config.connectivity.probe_retry_secs = parse_number(key, value)?
        }
        "connectivity.settle_delay_secs" => {
            config.connectivity.settle_delay_secs = parse_number(key, value)?
        }

        // --- sync ---
        "sync.pull_interval_secs" => config.sync.pull_interval_secs = parse_number(key, value)?,
        "sync.backoff_base_secs" => config.sync.backoff_base_secs = parse_number(key, value)?,
        "sync.backoff_max_secs" => config.sync.backoff_max_secs = parse_number(key, value)?,

        // --- retention ---
        "retention.max_attempts" => config.retention.max_attempts = parse_number(key, value)?,
        "retention.max_age_hours" => config.retention.max_age_hours = parse_number(key, value)?,

        // --- storage ---
        "storage.database" => config.storage.database = PathBuf::from(value),

        // --- logging ---
        "logging.level" => config.logging.level = value.to_string(),
        "logging.json" => {
            config.logging.json = value
                .parse::<bool>()
                .context("Expected true or false for logging.json")?
        }

        _ => anyhow::bail!("Unknown configuration key: '{}'", key),
    }
    Ok(())
}
