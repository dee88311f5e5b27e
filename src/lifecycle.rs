//! Lifecycle Controller: drives a run from creation through plan and apply,
//! retrying whole attempts when the service reports the run as errored.

use chrono::Local;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::context::RunContext;
use crate::errors::RunError;
use crate::poller::RunPoller;
use crate::tfe::{RemoteClient, Run, RunCreateOptions, RunStatus, Workspace};

const PLAN_TERMINAL: &[RunStatus] = &[
    RunStatus::Planned,
    RunStatus::PlannedAndFinished,
    RunStatus::Errored,
    RunStatus::CostEstimated,
    RunStatus::PolicyChecked,
    RunStatus::PolicySoftFailed,
];

const PLAN_PROGRESS: &[RunStatus] = &[
    RunStatus::Pending,
    RunStatus::PlanQueued,
    RunStatus::Planning,
    RunStatus::CostEstimating,
    RunStatus::PolicyChecking,
];

const APPLY_STARTED: &[RunStatus] = &[
    RunStatus::Confirmed,
    RunStatus::ApplyQueued,
    RunStatus::Applying,
];

const APPLY_TERMINAL: &[RunStatus] = &[RunStatus::Applied, RunStatus::Errored];

/// Whether and how failed attempts are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Where the identifier of the most recently created run is kept.
///
/// This is the only state that survives an invocation, so `store` is called
/// the moment a run is created.
pub trait RunIdStore: Send {
    fn current(&self) -> Option<String>;
    fn store(&mut self, id: Option<&str>) -> anyhow::Result<()>;
}

/// Identifier store that lives only as long as the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    id: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }
}

impl RunIdStore for MemoryStore {
    fn current(&self) -> Option<String> {
        self.id.clone()
    }

    fn store(&mut self, id: Option<&str>) -> anyhow::Result<()> {
        self.id = id.map(str::to_string);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Plan,
    Apply,
}

/// How a single attempt ended when it did not fail outright.
enum Attempt {
    Done(Run),
    Errored(Run, Phase),
}

pub struct LifecycleController<S: RunIdStore> {
    client: Arc<dyn RemoteClient>,
    poller: RunPoller,
    organization: String,
    workspace: String,
    store: S,
}

impl<S: RunIdStore> LifecycleController<S> {
    pub fn new(
        client: Arc<dyn RemoteClient>,
        poller: RunPoller,
        organization: impl Into<String>,
        workspace: impl Into<String>,
        store: S,
    ) -> Self {
        Self {
            client,
            poller,
            organization: organization.into(),
            workspace: workspace.into(),
            store,
        }
    }

    /// Identifier of the run this controller last recorded.
    pub fn run_id(&self) -> Option<String> {
        self.store.current()
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Create a run and drive it to a finished state.
    ///
    /// Runs that the service reports as errored are abandoned and, when the
    /// policy allows, recreated from scratch after a backoff. Every other
    /// failure is returned as is.
    pub async fn run(
        &mut self,
        ctx: &RunContext,
        destroy: bool,
        manual_confirm: bool,
        policy: &RetryPolicy,
    ) -> Result<Run, RunError> {
        let mut attempt: u32 = 1;
        loop {
            if attempt > 1 {
                let delay = policy.backoff.delay(attempt);
                debug!(attempt, ?delay, "backing off before retrying");
                ctx.sleep(delay)
                    .await
                    .map_err(|reason| RunError::interrupted(reason, None))?;
            }

            if attempt > policy.max_attempts {
                return Err(RunError::RetryBudgetExhausted {
                    max_attempts: policy.max_attempts,
                });
            }

            match self.attempt(ctx, destroy, manual_confirm).await? {
                Attempt::Done(run) => return Ok(run),
                Attempt::Errored(run, phase) => {
                    if !destroy {
                        self.record(None)?;
                    }
                    if !policy.enabled {
                        return Err(match phase {
                            Phase::Plan => RunError::PlanErrored { run_id: run.id },
                            Phase::Apply => RunError::ApplyErrored { run_id: run.id },
                        });
                    }
                    warn!(run_id = %run.id, attempt, "run errored, retrying");
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(
        &mut self,
        ctx: &RunContext,
        destroy: bool,
        manual_confirm: bool,
    ) -> Result<Attempt, RunError> {
        let mut workspace = self
            .client
            .read_workspace(&self.organization, &self.workspace)
            .await
            .map_err(|e| RunError::client("retrieve workspace", e))?;
        if workspace.organization.is_empty() {
            workspace.organization = self.organization.clone();
        }

        let run = self
            .client
            .create_run(RunCreateOptions {
                workspace_id: workspace.id.clone(),
                is_destroy: destroy,
                auto_apply: false,
                message: stamp(),
            })
            .await
            .map_err(|e| RunError::client("create run", e))?;

        if !destroy {
            self.record(Some(&run.id))?;
        }
        info!(run_id = %run.id, destroy, "run created");

        let run = self
            .wait(ctx, run, &workspace, true, PLAN_TERMINAL, PLAN_PROGRESS)
            .await?;

        if run.status == RunStatus::Errored {
            return Ok(Attempt::Errored(run, Phase::Plan));
        }

        if !run.has_changes || run.status == RunStatus::PlannedAndFinished {
            info!(run_id = %run.id, "plan finished, no changes");
            return Ok(Attempt::Done(run));
        }

        let mut run = run;
        if run.status == RunStatus::PolicySoftFailed {
            info!(run_id = %run.id, "policy check soft-failed, waiting for manual override");
            let current = [run.status.clone()];
            run = self
                .wait(ctx, run, &workspace, true, &[RunStatus::PolicyOverride], &current)
                .await?;
        }

        if !destroy && manual_confirm {
            info!(run_id = %run.id, "plan complete, waiting for manual confirm");
            let current = [run.status.clone()];
            run = self
                .wait(ctx, run, &workspace, true, APPLY_STARTED, &current)
                .await?;
        } else {
            info!(run_id = %run.id, "plan complete, confirming apply");
            self.client
                .apply_run(&run.id, &stamp())
                .await
                .map_err(|e| RunError::client("apply run", e))?;
        }

        let run = self
            .wait(ctx, run, &workspace, false, APPLY_TERMINAL, APPLY_STARTED)
            .await?;

        match run.status {
            RunStatus::Errored => Ok(Attempt::Errored(run, Phase::Apply)),
            RunStatus::Applied => {
                info!(run_id = %run.id, "run applied");
                Ok(Attempt::Done(run))
            }
            _ => Err(RunError::UnexpectedState {
                run_id: run.id,
                status: run.status,
            }),
        }
    }

    async fn wait(
        &self,
        ctx: &RunContext,
        run: Run,
        workspace: &Workspace,
        plan_phase: bool,
        terminal: &[RunStatus],
        progress: &[RunStatus],
    ) -> Result<Run, RunError> {
        self.poller
            .wait_for_run(ctx, run, workspace, plan_phase, terminal, progress)
            .await
    }

    /// Check that a previously recorded run still exists.
    ///
    /// A run the service no longer knows about yields `None`. The stored
    /// identifier is cleared only when it names that run.
    pub async fn read(&mut self, run_id: &str) -> Result<Option<Run>, RunError> {
        match self.client.read_run(run_id).await {
            Ok(run) => Ok(Some(run)),
            Err(e) if e.is_not_found() => {
                if self.store.current().as_deref() == Some(run_id) {
                    info!(run_id, "run no longer exists, clearing identifier");
                    self.record(None)?;
                } else {
                    debug!(run_id, "run no longer exists");
                }
                Ok(None)
            }
            Err(e) => Err(RunError::client("read run", e)),
        }
    }

    /// Forget the stored identifier.
    pub fn clear(&mut self) -> Result<(), RunError> {
        self.record(None)
    }

    fn record(&mut self, id: Option<&str>) -> Result<(), RunError> {
        self.store.store(id).map_err(RunError::State)
    }
}

fn stamp() -> String {
    format!(
        "multispace on {}",
        Local::now().format("%a %b %-d %H:%M:%S %Z %Y")
    )
}
