//! Run command - Keep the engine running in the foreground
//!
//! Starts the connectivity monitor and the orchestrator loop, then prints
//! one line per sync cycle until Ctrl+C or SIGTERM. On Unix, SIGUSR1 plays
//! the role of the app returning to the foreground and triggers a pull.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use medsync_core::ports::IConnectivity;
use medsync_sync::connectivity::InterfaceEvent;
use medsync_sync::orchestrator::{SyncEvent, SyncOrchestrator};

use crate::context::CliContext;
use crate::output::{get_formatter, plural, report_json, OutputFormat, OutputFormatter};

/// Buffered interface events; older ones are superseded anyway
const EVENT_BUFFER: usize = 8;

#[derive(Debug, Args)]
pub struct RunCommand {}

impl RunCommand {
    pub async fn execute(&self, ctx: &CliContext, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let engine = ctx.open().await?;
        let cancel = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        tasks.push(tokio::spawn(shutdown_signal(cancel.clone())));

        if let Some(monitor) = &engine.monitor {
            let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
            tasks.push(Arc::clone(monitor).spawn(events_rx, cancel.clone()));
            tasks.push(tokio::spawn(reprobe_while_offline(
                events_tx,
                Arc::clone(&engine.connectivity),
                ctx.config.connectivity.probe_retry(),
                cancel.clone(),
            )));
        }

        #[cfg(unix)]
        tasks.push(tokio::spawn(foreground_signal(
            Arc::clone(&engine.orchestrator),
            cancel.clone(),
        )));

        tasks.push(tokio::spawn(report_events(
            engine.orchestrator.subscribe(),
            format,
            cancel.clone(),
        )));

        if !format.is_json() {
            let state = if engine.connectivity.is_online() {
                "online"
            } else {
                "offline"
            };
            formatter.success(&format!(
                "MedSync running against {} ({}), Ctrl+C to stop",
                ctx.config.server.base_url, state
            ));
        }

        engine.orchestrator.run(cancel.clone()).await;
        cancel.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "Background task ended abnormally");
            }
        }

        let remaining = engine.store.queue_len().await?;
        if format.is_json() {
            formatter.print_json(&json!({"stopped": true, "remaining": remaining}));
        } else {
            formatter.success(&format!("Stopped, {} queued", plural(remaining, "item")));
        }
        Ok(())
    }
}

/// Feeds `Up` events to the monitor while the server is unreachable
///
/// Without platform network callbacks this is the only way back online.
async fn reprobe_while_offline(
    events: mpsc::Sender<InterfaceEvent>,
    connectivity: Arc<dyn IConnectivity>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut timer = tokio::time::interval(every);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    timer.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {
                if connectivity.is_online() {
                    continue;
                }
                debug!("Still offline, probing again");
                if events.send(InterfaceEvent::Up).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn report_events(
    mut events: broadcast::Receiver<SyncEvent>,
    format: OutputFormat,
    cancel: CancellationToken,
) {
    let formatter = get_formatter(format);
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => print_event(&event, format, &*formatter),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Missed sync events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &SyncEvent, format: OutputFormat, formatter: &dyn OutputFormatter) {
    match event {
        SyncEvent::CycleCompleted(report) if format.is_json() => {
            formatter.print_json(&json!({"event": "cycle_completed", "report": report_json(report)}));
        }
        SyncEvent::CycleCompleted(report) => {
            let pushed = report.push.map(|s| s.success).unwrap_or(0);
            let pulled = report.pull.map(|s| s.applied).unwrap_or(0);
            formatter.info(&format!(
                "[{}] pushed {}, pulled {}, {} queued",
                chrono::Local::now().format("%H:%M:%S"),
                pushed,
                pulled,
                report.remaining
            ));
            if let Some(error) = &report.pull_error {
                formatter.warn(&format!("Pull failed: {}", error));
            }
        }
        SyncEvent::ConflictsDetected(open) if format.is_json() => {
            formatter.print_json(&json!({"event": "conflicts_detected", "open": open}));
        }
        SyncEvent::ConflictsDetected(open) => {
            formatter.warn(&format!(
                "{} open; run `medsync sync --resolve server|client` to settle",
                plural(*open as u64, "conflict")
            ));
        }
    }
}

#[cfg(unix)]
async fn foreground_signal(orchestrator: Arc<SyncOrchestrator>, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = match signal(SignalKind::user_defined1()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGUSR1 handler");
            return;
        }
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = usr1.recv() => {
                if received.is_none() {
                    break;
                }
                info!("Received SIGUSR1, pulling");
                orchestrator.notify_foreground();
            }
        }
    }
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = token.cancelled() => return,
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }

    token.cancel();
}
