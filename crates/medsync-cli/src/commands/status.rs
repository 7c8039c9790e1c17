//! Status command - Show connectivity, queue and last pull
//!
//! Provides the `medsync status` CLI command which reports:
//! 1. Whether the server is reachable right now
//! 2. Queue length broken down by entity kind and operation
//! 3. Items that failed, were rejected or wait for a parent create
//! 4. When the last successful pull happened

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde_json::json;

use medsync_core::domain::record::temp_references;
use medsync_core::domain::{EntityKind, Operation, SyncQueueItem};

use crate::context::CliContext;
use crate::output::{get_formatter, plural, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// List every queued item
    #[arg(long)]
    pub items: bool,
}

/// Queue counts for one entity kind
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct QueueBreakdown {
    create: u64,
    update: u64,
    delete: u64,
    failing: u64,
    rejected: u64,
    waiting_for_parent: u64,
}

impl QueueBreakdown {
    fn total(&self) -> u64 {
        self.create + self.update + self.delete
    }
}

fn summarize(items: &[SyncQueueItem]) -> BTreeMap<EntityKind, QueueBreakdown> {
    let mut summary: BTreeMap<EntityKind, QueueBreakdown> = BTreeMap::new();
    for item in items {
        let entry = summary.entry(item.entity).or_default();
        match item.operation {
            Operation::Create => entry.create += 1,
            Operation::Update => entry.update += 1,
            Operation::Delete => entry.delete += 1,
        }
        if item.rejected {
            entry.rejected += 1;
        } else if item.attempts > 0 {
            entry.failing += 1;
        }
        let waiting = item
            .data
            .as_ref()
            .map(|data| !temp_references(item.entity, data).is_empty())
            .unwrap_or(false);
        if waiting && item.operation != Operation::Delete {
            entry.waiting_for_parent += 1;
        }
    }
    summary
}

fn format_last_pull(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last) = last else {
        return "never".to_string();
    };
    let minutes = (now - last).num_minutes();
    let ago = if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{} min ago", minutes)
    } else if minutes < 60 * 24 {
        format!("{} h ago", minutes / 60)
    } else {
        format!("{} days ago", minutes / (60 * 24))
    };
    format!("{} ({})", last.format("%Y-%m-%d %H:%M:%S UTC"), ago)
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CliContext, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let engine = ctx.open().await?;

        let online = engine.connectivity.is_online();
        let items = engine.store.queue_items(None).await?;
        let last_pull = engine.store.last_sync_timestamp().await?;
        let summary = summarize(&items);

        if format.is_json() {
            let per_entity: serde_json::Map<String, serde_json::Value> = summary
                .iter()
                .map(|(entity, b)| {
                    (
                        entity.name().to_string(),
                        json!({
                            "create": b.create,
                            "update": b.update,
                            "delete": b.delete,
                            "failing": b.failing,
                            "rejected": b.rejected,
                            "waiting_for_parent": b.waiting_for_parent,
                        }),
                    )
                })
                .collect();
            let mut value = json!({
                "online": online,
                "forced_offline": ctx.offline,
                "server": ctx.config.server.base_url,
                "queue_length": items.len(),
                "queue": per_entity,
                "last_sync_timestamp": last_pull.map(|t| t.to_rfc3339()),
                "database": ctx.config.storage.database.display().to_string(),
            });
            if self.items {
                value["items"] = serde_json::to_value(&items)?;
            }
            formatter.print_json(&value);
            return Ok(());
        }

        let connection = match (online, ctx.offline) {
            (true, _) => "online",
            (false, true) => "offline (forced)",
            (false, false) => "offline (server unreachable)",
        };
        formatter.success("MedSync status");
        formatter.info(&format!("Server:    {} - {}", ctx.config.server.base_url, connection));
        formatter.info(&format!("Database:  {}", ctx.config.storage.database.display()));
        formatter.info(&format!("Last pull: {}", format_last_pull(last_pull, Utc::now())));
        formatter.info(&format!("Queue:     {}", plural(items.len() as u64, "item")));

        for (entity, b) in &summary {
            let mut line = format!(
                "  {:<13} {:>3}  ({} create, {} update, {} delete)",
                entity.name(),
                b.total(),
                b.create,
                b.update,
                b.delete
            );
            if b.failing > 0 {
                line.push_str(&format!(", {} retrying", b.failing));
            }
            if b.waiting_for_parent > 0 {
                line.push_str(&format!(", {} waiting for parent", b.waiting_for_parent));
            }
            formatter.info(&line);
            if b.rejected > 0 {
                formatter.warn(&format!(
                    "{} {} rejected by the server; they are dropped by the next sweep",
                    plural(b.rejected, "item"),
                    entity
                ));
            }
        }

        if self.items {
            for item in &items {
                let mut line = format!(
                    "#{} {} {} {} (attempts: {})",
                    item.id, item.operation, item.entity, item.entity_id, item.attempts
                );
                if let Some(error) = &item.last_error {
                    line.push_str(&format!(" - {}", error));
                }
                formatter.info(&line);
            }
        }
        Ok(())
    }
}
