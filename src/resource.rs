//! The upward surface: create, destroy, read and update a run resource.
//!
//! Each operation hands back [`Diagnostics`] instead of an error so callers
//! can render warnings and errors uniformly.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::context::RunContext;
use crate::errors::{Diagnostic, Diagnostics, RunError};
use crate::lifecycle::{LifecycleController, RetryPolicy, RunIdStore};
use crate::poller::{PollConfig, RunPoller};
use crate::tfe::{RemoteClient, Run};

/// Default bound on a create or destroy invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Everything the caller configures about a run resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub organization: String,
    pub workspace: String,
    pub manual_confirm: bool,
    pub retry: RetryPolicy,
    pub poll: PollConfig,
    pub create_timeout: Duration,
    pub delete_timeout: Duration,
    /// Reject `update` instead of treating it as a no-op.
    pub strict_update: bool,
}

impl RunSettings {
    pub fn new(organization: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            workspace: workspace.into(),
            manual_confirm: false,
            retry: RetryPolicy::default(),
            poll: PollConfig::default(),
            create_timeout: DEFAULT_TIMEOUT,
            delete_timeout: DEFAULT_TIMEOUT,
            strict_update: false,
        }
    }
}

/// Result of [`RunResource::create`].
#[derive(Debug, Default)]
pub struct CreateOutcome {
    pub run_id: Option<String>,
    pub run: Option<Run>,
    pub diagnostics: Diagnostics,
}

/// Result of [`RunResource::read`].
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// `None` when the run no longer exists.
    pub run: Option<Run>,
    pub diagnostics: Diagnostics,
}

pub struct RunResource<S: RunIdStore> {
    controller: LifecycleController<S>,
    settings: RunSettings,
}

impl<S: RunIdStore> RunResource<S> {
    pub fn new(client: Arc<dyn RemoteClient>, settings: RunSettings, store: S) -> Self {
        let poller = RunPoller::new(client.clone(), settings.poll);
        let controller = LifecycleController::new(
            client,
            poller,
            settings.organization.clone(),
            settings.workspace.clone(),
            store,
        );
        Self {
            controller,
            settings,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Identifier currently held for this resource.
    pub fn run_id(&self) -> Option<String> {
        self.controller.run_id()
    }

    pub fn into_store(self) -> S {
        self.controller.into_store()
    }

    /// Queue a run and drive it to completion.
    ///
    /// The identifier is reported even on failure when the controller kept
    /// it, so the caller can inspect the run later.
    pub async fn create(&mut self, ctx: &RunContext) -> CreateOutcome {
        let ctx = ctx.clone().with_timeout(self.settings.create_timeout);
        let result = self
            .controller
            .run(&ctx, false, self.settings.manual_confirm, &self.settings.retry)
            .await;

        let run_id = self.controller.run_id();
        match result {
            Ok(run) => {
                info!(run_id = %run.id, status = %run.status, "create finished");
                CreateOutcome {
                    run_id,
                    run: Some(run),
                    diagnostics: Diagnostics::new(),
                }
            }
            Err(err) => CreateOutcome {
                run_id,
                run: None,
                diagnostics: Diagnostics::from(err),
            },
        }
    }

    /// Queue a destroy run. The stored identifier is cleared once it succeeds.
    pub async fn destroy(&mut self, ctx: &RunContext) -> Diagnostics {
        let ctx = ctx.clone().with_timeout(self.settings.delete_timeout);
        let result = self
            .controller
            .run(&ctx, true, false, &self.settings.retry)
            .await;

        match result {
            Ok(run) => {
                info!(run_id = %run.id, status = %run.status, "destroy finished");
                match self.controller.clear() {
                    Ok(()) => Diagnostics::new(),
                    Err(err) => Diagnostics::from(err),
                }
            }
            Err(err) => Diagnostics::from(err),
        }
    }

    /// Refresh a previously created run.
    pub async fn read(&mut self, run_id: &str) -> ReadOutcome {
        match self.controller.read(run_id).await {
            Ok(run) => ReadOutcome {
                run,
                diagnostics: Diagnostics::new(),
            },
            Err(err) => ReadOutcome {
                run: None,
                diagnostics: Diagnostics::from(err),
            },
        }
    }

    pub fn update(&self) -> Diagnostics {
        update(&self.settings)
    }
}

/// Runs cannot change after creation, so there is nothing to reconcile.
/// Strict settings reject the request instead.
pub fn update(settings: &RunSettings) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    if settings.strict_update {
        diagnostics.push(Diagnostic::from(&RunError::UpdateNotSupported));
    }
    diagnostics
}
