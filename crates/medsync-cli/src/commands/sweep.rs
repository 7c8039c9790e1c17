//! Sweep command - Drop queue items that can no longer succeed
//!
//! Removes items past the retry limit, older than the retention window or
//! rejected by the server. The same sweep runs when `medsync run` starts.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use crate::context::CliContext;
use crate::output::{get_formatter, plural, OutputFormat};

#[derive(Debug, Args)]
pub struct SweepCommand {}

impl SweepCommand {
    pub async fn execute(&self, ctx: &CliContext, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let engine = ctx.open().await?;

        let removed = engine.orchestrator.sweep().await?;
        let remaining = engine.store.queue_len().await?;

        if format.is_json() {
            formatter.print_json(&json!({
                "removed": removed,
                "remaining": remaining,
                "max_attempts": ctx.config.retention.max_attempts,
                "max_age_hours": ctx.config.retention.max_age_hours,
            }));
        } else if removed == 0 {
            formatter.success("Nothing to sweep");
            formatter.info(&format!("Queue: {}", plural(remaining, "item")));
        } else {
            formatter.success(&format!("Removed {}", plural(removed, "queue item")));
            formatter.info(&format!(
                "Limits: {} attempts, {} h",
                ctx.config.retention.max_attempts, ctx.config.retention.max_age_hours
            ));
            formatter.info(&format!("Queue: {}", plural(remaining, "item")));
        }
        Ok(())
    }
}
