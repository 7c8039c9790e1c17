//! Engine wiring shared by the commands
//!
//! Opens the database, builds the REST adapter and connectivity signal, and
//! assembles the gateway, ledger and orchestrator on top of them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use medsync_api::RestRemoteApi;
use medsync_cache::{pool::DatabasePool, SqliteLocalStore};
use medsync_core::config::Config;
use medsync_core::ports::{IConnectivity, ILocalStore, IRemoteApi};
use medsync_sync::{
    connectivity::{ConnectivityMonitor, ManualConnectivity},
    gateway::MutationGateway,
    ledger::ConflictLedger,
    orchestrator::SyncOrchestrator,
};

/// Settings resolved from the global flags
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config_path: PathBuf,
    pub config: Config,
    /// Never contact the server
    pub offline: bool,
}

impl CliContext {
    /// Loads the configuration
    ///
    /// An explicit `--config` path must exist and parse; the default path
    /// falls back to built-in defaults.
    pub fn load(config_path: Option<PathBuf>, offline: bool) -> Result<Self> {
        let (config_path, config) = match config_path {
            Some(path) => {
                let config = Config::load(&path)?;
                (path, config)
            }
            None => {
                let path = Config::default_path();
                let config = Config::load_or_default(&path);
                (path, config)
            }
        };
        Ok(Self {
            config_path,
            config,
            offline,
        })
    }

    /// Builds the engine, probing the server once unless offline
    pub async fn open(&self) -> Result<Engine> {
        let errors = self.config.validate();
        if !errors.is_empty() {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::bail!(
                "Invalid configuration ({}): {}",
                self.config_path.display(),
                messages.join("; ")
            );
        }

        let db_path = &self.config.storage.database;
        let pool = DatabasePool::new(db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        let store: Arc<dyn ILocalStore> = Arc::new(SqliteLocalStore::new(pool.pool().clone()));

        let remote: Arc<dyn IRemoteApi> = Arc::new(
            RestRemoteApi::from_config(&self.config).context("Failed to build REST client")?,
        );

        let (connectivity, monitor): (Arc<dyn IConnectivity>, _) = if self.offline {
            debug!("Forced offline mode");
            (Arc::new(ManualConnectivity::new(false)) as Arc<dyn IConnectivity>, None)
        } else {
            let monitor = Arc::new(ConnectivityMonitor::new(
                Arc::clone(&remote),
                &self.config.connectivity,
            ));
            let online = monitor.check_now().await;
            info!(online, base_url = %self.config.server.base_url, "Initial probe");
            (monitor.clone() as Arc<dyn IConnectivity>, Some(monitor))
        };

        let ledger = Arc::new(ConflictLedger::new(Arc::clone(&store)));
        let gateway = MutationGateway::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&connectivity),
        );
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&store),
            remote,
            Arc::clone(&connectivity),
            Arc::clone(&ledger),
            &self.config,
        ));

        Ok(Engine {
            store,
            connectivity,
            monitor,
            ledger,
            gateway,
            orchestrator,
        })
    }
}

/// Fully wired sync engine
pub struct Engine {
    pub store: Arc<dyn ILocalStore>,
    pub connectivity: Arc<dyn IConnectivity>,
    /// Absent in forced offline mode
    pub monitor: Option<Arc<ConnectivityMonitor>>,
    pub ledger: Arc<ConflictLedger>,
    pub gateway: MutationGateway,
    pub orchestrator: Arc<SyncOrchestrator>,
}
