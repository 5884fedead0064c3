//! Workflow registry and the manager that drives each workflow in its own loop.
//!
//! Workflows share nothing but the [`Coordinator`](crate::coordinator::Coordinator)
//! they write through. One pass is a synchronous [`Workflow::run`] call on the
//! blocking pool; between passes the loop sleeps for the configured idle
//! interval or until cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::io::config::WorkflowConfig;

/// A unit of agent work that reads state, acts, and saves through the coordinator.
pub trait Workflow: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Run one pass. Returning a version conflict asks for a retry on the
    /// next pass; any other error counts toward the failure limit.
    fn run(&self, cancel: &CancellationToken, config: &WorkflowConfig) -> Result<()>;
}

/// Workflows keyed by name.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<String, Arc<dyn Workflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a workflow. Names must be unique.
    pub fn register(&mut self, workflow: Arc<dyn Workflow>) -> Result<()> {
        let name = workflow.name().to_string();
        if name.trim().is_empty() {
            bail!("workflow name must not be empty");
        }
        if self.workflows.contains_key(&name) {
            bail!("workflow {name:?} is already registered");
        }
        debug!(workflow = %name, "workflow registered");
        self.workflows.insert(name, workflow);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Workflow>> {
        self.workflows.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    fn enabled(&self) -> impl Iterator<Item = &Arc<dyn Workflow>> {
        self.workflows.values().filter(|workflow| workflow.is_enabled())
    }
}

/// Why a workflow loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExitReason {
    Cancelled,
    TooManyFailures { last_error: String },
}

/// Summary of one workflow loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowExit {
    pub name: String,
    pub runs: u64,
    pub retries: u64,
    pub failures: u64,
    pub reason: ExitReason,
}

pub struct WorkflowManager {
    registry: WorkflowRegistry,
    config: WorkflowConfig,
}

impl WorkflowManager {
    pub fn new(registry: WorkflowRegistry, config: WorkflowConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Drive every enabled workflow until `cancel` fires or each one gives up.
    ///
    /// Exits are returned sorted by workflow name.
    pub async fn run(&self, cancel: CancellationToken) -> Vec<WorkflowExit> {
        let mut tasks = JoinSet::new();
        for workflow in self.registry.enabled() {
            tasks.spawn(drive(
                Arc::clone(workflow),
                self.config.clone(),
                cancel.clone(),
            ));
        }
        info!(workflows = tasks.len(), "workflow manager started");

        let mut exits = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(exit) => exits.push(exit),
                Err(err) => warn!(error = %err, "workflow task aborted"),
            }
        }
        exits.sort_by(|a, b| a.name.cmp(&b.name));
        exits
    }
}

async fn drive(
    workflow: Arc<dyn Workflow>,
    config: WorkflowConfig,
    cancel: CancellationToken,
) -> WorkflowExit {
    let mut exit = WorkflowExit {
        name: workflow.name().to_string(),
        runs: 0,
        retries: 0,
        failures: 0,
        reason: ExitReason::Cancelled,
    };
    let mut consecutive = 0u32;

    while !cancel.is_cancelled() {
        let pass = {
            let workflow = Arc::clone(&workflow);
            let cancel = cancel.clone();
            let config = config.clone();
            tokio::task::spawn_blocking(move || workflow.run(&cancel, &config)).await
        };
        if cancel.is_cancelled() {
            break;
        }

        let failure = match pass {
            Ok(Ok(())) => {
                exit.runs += 1;
                consecutive = 0;
                None
            }
            Ok(Err(err)) if is_version_conflict(&err) => {
                exit.retries += 1;
                debug!(workflow = %exit.name, error = %err, "version conflict, retrying");
                None
            }
            Ok(Err(err)) => Some(format!("{err:#}")),
            Err(join_err) => Some(format!("workflow pass panicked: {join_err}")),
        };

        if let Some(message) = failure {
            exit.failures += 1;
            consecutive += 1;
            warn!(
                workflow = %exit.name,
                consecutive,
                error = %message,
                "workflow pass failed"
            );
            if consecutive >= config.max_consecutive_failures {
                exit.reason = ExitReason::TooManyFailures {
                    last_error: message,
                };
                break;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.idle_interval()) => {}
        }
    }

    info!(
        workflow = %exit.name,
        runs = exit.runs,
        retries = exit.retries,
        failures = exit.failures,
        "workflow loop stopped"
    );
    exit
}

fn is_version_conflict(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<Error>()
            .is_some_and(Error::is_version_conflict)
    })
}
