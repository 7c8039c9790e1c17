//! Sync command - Push queued mutations and pull server changes
//!
//! Runs one cycle of the sync orchestrator. Conflicts found by the push
//! only live as long as this process, so `--resolve` settles them before
//! the command exits and pushes client resolutions right away.

use anyhow::Result;
use clap::Args;
use serde_json::{json, Value};
use tracing::info;

use medsync_core::domain::{Resolution, SyncConflict, SyncReport};
use medsync_sync::orchestrator::SyncOutcome;

use crate::context::{CliContext, Engine};
use crate::output::{
    format_duration_ms, get_formatter, plural, report_json, OutputFormat, OutputFormatter,
};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Only fetch server changes; leave the queue untouched
    #[arg(long)]
    pub pull_only: bool,

    /// Settle conflicts found by this sync (server or client)
    #[arg(long, value_name = "SIDE", conflicts_with = "pull_only")]
    pub resolve: Option<Resolution>,
}

impl SyncCommand {
    pub async fn execute(&self, ctx: &CliContext, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let engine = ctx.open().await?;

        let outcome = if self.pull_only {
            engine.orchestrator.pull_only().await?
        } else {
            engine.orchestrator.full_sync().await?
        };

        let report = match outcome {
            SyncOutcome::Completed(report) => report,
            SyncOutcome::Offline => {
                formatter.error(&format!(
                    "Server unreachable at {}; changes stay queued",
                    ctx.config.server.base_url
                ));
                return Ok(());
            }
            SyncOutcome::AlreadyRunning => {
                formatter.warn("A sync is already running");
                return Ok(());
            }
        };

        let conflicts = engine.ledger.snapshot().await;
        let mut resolved = 0;
        let mut follow_up = None;
        if let Some(resolution) = self.resolve {
            if !conflicts.is_empty() {
                resolved = engine.ledger.resolve_all(resolution).await?;
                info!(resolved, %resolution, "Conflicts resolved from the command line");
                if resolution == Resolution::Client {
                    follow_up = self.push_resolutions(&engine).await?;
                }
            }
        }
        let open = engine.ledger.snapshot().await;

        if format.is_json() {
            let mut value = json!({
                "report": report_json(&report),
                "conflicts": open.iter().map(conflict_json).collect::<Vec<Value>>(),
                "resolved": resolved,
            });
            if let Some(report) = &follow_up {
                value["follow_up"] = report_json(report);
            }
            formatter.print_json(&value);
        } else {
            display_report(&report, &*formatter);
            if resolved > 0 {
                formatter.success(&format!("Resolved {}", plural(resolved as u64, "conflict")));
            }
            if let Some(report) = &follow_up {
                formatter.info("Pushed client resolutions:");
                display_report(report, &*formatter);
            }
            display_conflicts(&open, &*formatter);
        }
        Ok(())
    }

    async fn push_resolutions(&self, engine: &Engine) -> Result<Option<SyncReport>> {
        match engine.orchestrator.full_sync().await? {
            SyncOutcome::Completed(report) => Ok(Some(report)),
            _ => Ok(None),
        }
    }
}

fn conflict_json(conflict: &SyncConflict) -> Value {
    json!({
        "id": conflict.id().to_string(),
        "entity": conflict.entity().name(),
        "record_id": conflict.record_id().as_str(),
        "temp_id": conflict.temp_id().map(|id| id.as_str()),
        "fields": conflict.fields(),
        "local": conflict.local(),
        "remote": conflict.remote(),
        "detected_at": conflict.detected_at().to_rfc3339(),
    })
}

fn display_report(report: &SyncReport, formatter: &dyn OutputFormatter) {
    let duration = report
        .duration_ms()
        .map(format_duration_ms)
        .unwrap_or_else(|| "-".to_string());
    formatter.success(&format!("Sync completed in {}", duration));

    if let Some(push) = &report.push {
        formatter.info(&format!(
            "Pushed:    {} ok, {} conflicted, {} failed, {} deferred, {} skipped",
            push.success, push.conflicts, push.errors, push.deferred, push.skipped
        ));
    }
    if let Some(pull) = &report.pull {
        formatter.info(&format!(
            "Pulled:    {} applied, {} removed, {} kept (pending locally)",
            pull.applied, pull.purged, pull.kept_pending
        ));
    }
    if let Some(error) = &report.pull_error {
        formatter.warn(&format!("Pull failed: {}", error));
    }
    formatter.info(&format!("Remaining: {} queued", plural(report.remaining, "item")));
}

fn display_conflicts(conflicts: &[SyncConflict], formatter: &dyn OutputFormatter) {
    if conflicts.is_empty() {
        return;
    }
    formatter.warn(&format!(
        "{} need a decision:",
        plural(conflicts.len() as u64, "conflict")
    ));
    for conflict in conflicts {
        formatter.info(&format!(
            "{} {}  fields: {}",
            conflict.entity(),
            conflict.record_id(),
            conflict.fields().join(", ")
        ));
        for field in conflict.fields() {
            let local = conflict.local().get(field).cloned().unwrap_or(Value::Null);
            let remote = conflict.remote().get(field).cloned().unwrap_or(Value::Null);
            formatter.info(&format!("    {}: local={} server={}", field, local, remote));
        }
    }
    formatter.info("Re-run with --resolve server or --resolve client to settle them");
}
