//! Startup wiring for one engine home.
//!
//! `Engine::open` loads the config, makes sure the `var/` tree exists and
//! runs recovery before the coordinator is handed out, so no new transaction
//! can begin while interrupted ones are still pending.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::coordinator::Coordinator;
use crate::io::config::{EngineConfig, load_config};
use crate::io::layout::HomeLayout;
use crate::io::txn::TxnManager;
use crate::recovery::{RecoveryDriver, RecoveryResult};

pub struct Engine {
    layout: HomeLayout,
    config: EngineConfig,
    manager: TxnManager,
    coordinator: Arc<Coordinator>,
    recovery: RecoveryResult,
    cancel: CancellationToken,
}

impl Engine {
    /// Open `home`, recover interrupted transactions and build the coordinator.
    ///
    /// Failed or corrupt transactions do not stop startup; they are reported
    /// in [`Engine::recovery`].
    pub fn open(home: impl Into<PathBuf>, cancel: CancellationToken) -> Result<Self> {
        let layout = HomeLayout::new(home);
        let config = load_config(&layout.config_path)?;
        layout
            .ensure_dirs()
            .with_context(|| format!("prepare {}", layout.var_dir.display()))?;

        let manager = TxnManager::new(&layout.txn_dir);
        let recovery = RecoveryDriver::new(manager.clone(), &layout.home)
            .recover_all(&cancel)
            .context("recover interrupted transactions")?;
        report(&recovery);

        let coordinator = Coordinator::new(manager.clone(), layout.clone(), cancel.clone())
            .context("read persisted state version")?;
        info!(home = %layout.home.display(), "engine open");

        Ok(Self {
            layout,
            config,
            manager,
            coordinator: Arc::new(coordinator),
            recovery,
            cancel,
        })
    }

    /// Run recovery again and re-sync the coordinator with disk.
    ///
    /// Needed after a save failed past its intent marker: the coordinator
    /// refuses further saves until this has run.
    pub fn recover(&mut self) -> Result<&RecoveryResult> {
        let recovery = RecoveryDriver::new(self.manager.clone(), &self.layout.home)
            .recover_all(&self.cancel)
            .context("recover interrupted transactions")?;
        report(&recovery);
        if recovery.failed_count == 0 && !recovery.interrupted {
            self.coordinator
                .resync()
                .context("read persisted state version")?;
        }
        self.recovery = recovery;
        Ok(&self.recovery)
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Outcome of the most recent recovery pass.
    pub fn recovery(&self) -> &RecoveryResult {
        &self.recovery
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> &HomeLayout {
        &self.layout
    }

    pub fn home(&self) -> &Path {
        self.layout.home()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

fn report(recovery: &RecoveryResult) {
    if !recovery.is_clean() {
        warn!(
            failed = recovery.failed_count,
            corrupt = recovery.corrupt.len(),
            "recovery left transactions behind"
        );
    }
    if recovery.interrupted {
        warn!("recovery interrupted by cancellation");
    }
}
