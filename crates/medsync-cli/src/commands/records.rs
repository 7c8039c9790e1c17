//! Record commands - create, update, delete, list and show clinic records
//!
//! Every mutation goes through the mutation gateway: online it hits the
//! server directly, offline (or with `--offline`) it lands in the local store
//! and the sync queue.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{json, Value};
use tracing::info;

use medsync_core::domain::record::into_record_data;
use medsync_core::domain::{EntityKind, LocalRecord, RecordData, RecordId};
use medsync_core::ports::DeleteOutcome;
use medsync_sync::SyncError;

use crate::context::CliContext;
use crate::output::{get_formatter, record_json, record_line, OutputFormat, OutputFormatter};

/// Parses a JSON object given on the command line
fn parse_payload(raw: &str) -> Result<RecordData> {
    let value: Value = serde_json::from_str(raw).context("Payload is not valid JSON")?;
    into_record_data(value).context("Payload must be a JSON object")
}

/// Prints gateway refusals; other errors propagate
fn report_refusal(err: SyncError, formatter: &dyn OutputFormatter) -> Result<()> {
    match err {
        SyncError::NotFound { .. } | SyncError::Rejected { .. } => {
            formatter.error(&err.to_string());
            Ok(())
        }
        other => Err(other.into()),
    }
}

fn print_record(
    record: &LocalRecord,
    verb: &str,
    format: OutputFormat,
    formatter: &dyn OutputFormatter,
) {
    if format.is_json() {
        formatter.print_json(&record_json(record));
        return;
    }
    if record.is_pending() {
        formatter.success(&format!("{} {} {} (queued for sync)", verb, record.entity, record.id));
    } else {
        formatter.success(&format!("{} {} {}", verb, record.entity, record.id));
    }
    formatter.info(&record_line(record));
}

// ============================================================================
// create
// ============================================================================

#[derive(Debug, Args)]
pub struct CreateCommand {
    /// Entity kind (patient, consultation, medicament, vaccination, rendez_vous)
    pub entity: EntityKind,
    /// Record fields as a JSON object
    pub payload: String,
}

impl CreateCommand {
    pub async fn execute(&self, ctx: &CliContext, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let payload = parse_payload(&self.payload)?;
        let engine = ctx.open().await?;

        info!(entity = %self.entity, "Creating record");
        match engine.gateway.create(self.entity, payload).await {
            Ok(record) => print_record(&record, "Created", format, &*formatter),
            Err(e) => report_refusal(e, &*formatter)?,
        }
        Ok(())
    }
}

// ============================================================================
// update
// ============================================================================

#[derive(Debug, Args)]
pub struct UpdateCommand {
    pub entity: EntityKind,
    /// Server id or temp id of the record
    pub id: RecordId,
    /// Fields to change as a JSON object
    pub patch: String,
}

impl UpdateCommand {
    pub async fn execute(&self, ctx: &CliContext, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let patch = parse_payload(&self.patch)?;
        let engine = ctx.open().await?;

        info!(entity = %self.entity, id = %self.id, "Updating record");
        match engine.gateway.update(self.entity, &self.id, patch).await {
            Ok(record) => print_record(&record, "Updated", format, &*formatter),
            Err(e) => report_refusal(e, &*formatter)?,
        }
        Ok(())
    }
}

// ============================================================================
// delete
// ============================================================================

#[derive(Debug, Args)]
pub struct DeleteCommand {
    pub entity: EntityKind,
    pub id: RecordId,
}

impl DeleteCommand {
    pub async fn execute(&self, ctx: &CliContext, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let engine = ctx.open().await?;

        info!(entity = %self.entity, id = %self.id, "Deleting record");
        let outcome = match engine.gateway.delete(self.entity, &self.id).await {
            Ok(outcome) => outcome,
            Err(e) => return report_refusal(e, &*formatter),
        };

        if format.is_json() {
            formatter.print_json(&json!({
                "entity": self.entity.name(),
                "id": self.id.as_str(),
                "queued": outcome == DeleteOutcome::SoftDeleted,
            }));
        } else {
            match outcome {
                DeleteOutcome::Purged => {
                    formatter.success(&format!("Deleted {} {}", self.entity, self.id))
                }
                DeleteOutcome::SoftDeleted => formatter.success(&format!(
                    "Deleted {} {} locally (queued for sync)",
                    self.entity, self.id
                )),
            }
        }
        Ok(())
    }
}

// ============================================================================
// list / show
// ============================================================================

#[derive(Debug, Args)]
pub struct ListCommand {
    pub entity: EntityKind,
}

impl ListCommand {
    pub async fn execute(&self, ctx: &CliContext, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let engine = ctx.open().await?;
        let records = engine.gateway.list(self.entity).await?;

        if format.is_json() {
            let items: Vec<Value> = records.iter().map(record_json).collect();
            formatter.print_json(&json!({
                "entity": self.entity.name(),
                "count": records.len(),
                "records": items,
            }));
            return Ok(());
        }

        if records.is_empty() {
            formatter.info(&format!("No {} records", self.entity));
            return Ok(());
        }
        let pending = records.iter().filter(|r| r.is_pending()).count();
        formatter.success(&format!(
            "{} {} record{} ({} pending)",
            records.len(),
            self.entity,
            if records.len() == 1 { "" } else { "s" },
            pending
        ));
        for record in &records {
            formatter.info(&record_line(record));
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct ShowCommand {
    pub entity: EntityKind,
    pub id: RecordId,
}

impl ShowCommand {
    pub async fn execute(&self, ctx: &CliContext, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let engine = ctx.open().await?;

        match engine.gateway.get(self.entity, &self.id).await? {
            Some(record) if format.is_json() => formatter.print_json(&record_json(&record)),
            Some(record) => {
                formatter.success(&format!("{} {}", record.entity, record.id));
                if let Some(temp_id) = &record.temp_id {
                    formatter.info(&format!("Temp id:       {}", temp_id));
                }
                formatter.info(&format!("Sync status:   {}", record.sync_status));
                formatter.info(&format!("Deleted:       {}", record.is_deleted));
                formatter.info(&format!(
                    "Last modified: {}",
                    record.last_modified.format("%Y-%m-%d %H:%M:%S UTC")
                ));
                let pretty = serde_json::to_string_pretty(&record.data)
                    .context("Failed to render record data")?;
                for line in pretty.lines() {
                    formatter.info(line);
                }
            }
            None => formatter.error(&format!("{} {} not found locally", self.entity, self.id)),
        }
        Ok(())
    }
}
