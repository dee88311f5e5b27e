//! Scripted in-memory stand-in for the remote run service.
//!
//! Each `create_run` call consumes the next [`RunScript`]. Reads of a run walk
//! through its scripted statuses one per call and then stay on the last one.
//! Calling `apply_run` switches the run onto its `after_apply` statuses when
//! any were scripted.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::errors::ClientError;
use crate::tfe::client::RemoteClient;
use crate::tfe::models::{
    Capacity, Page, Pagination, QueuedRun, Run, RunCreateOptions, RunStatus, Workspace,
};

/// Error a fake call should fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    NotFound,
    Status(u16),
}

impl FakeFailure {
    fn to_error(self) -> ClientError {
        match self {
            FakeFailure::NotFound => ClientError::NotFound,
            FakeFailure::Status(status) => ClientError::Status {
                status,
                body: "injected failure".to_string(),
            },
        }
    }
}

/// The timeline of one created run.
#[derive(Debug, Clone, Default)]
pub struct RunScript {
    pub statuses: Vec<RunStatus>,
    pub after_apply: Vec<RunStatus>,
    pub has_changes: bool,
    pub confirmable: bool,
}

impl RunScript {
    pub fn new(statuses: impl IntoIterator<Item = RunStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_changes(mut self) -> Self {
        self.has_changes = true;
        self
    }

    pub fn confirmable(mut self) -> Self {
        self.confirmable = true;
        self
    }

    pub fn then_apply(mut self, statuses: impl IntoIterator<Item = RunStatus>) -> Self {
        self.after_apply = statuses.into_iter().collect();
        self
    }
}

#[derive(Debug)]
struct ScriptedRun {
    run: Run,
    pending: VecDeque<RunStatus>,
    after_apply: Vec<RunStatus>,
}

#[derive(Debug, Default)]
struct FakeState {
    workspace: Option<Workspace>,
    scripts: VecDeque<RunScript>,
    runs: HashMap<String, ScriptedRun>,
    created: Vec<RunCreateOptions>,
    applied: Vec<String>,
    run_reads: usize,
    workspace_reads: usize,
    workspace_runs: Vec<Run>,
    page_size: usize,
    queue: Vec<QueuedRun>,
    capacity: Capacity,
    missing_runs: HashSet<String>,
    read_run_failure: Option<FakeFailure>,
    read_workspace_failure: Option<FakeFailure>,
    list_runs_failure: Option<FakeFailure>,
}

#[derive(Debug, Default)]
pub struct FakeClient {
    state: Mutex<FakeState>,
}

impl FakeClient {
    /// A fake serving `workspace`, with no runs scripted yet.
    pub fn new(workspace: Workspace) -> Self {
        let state = FakeState {
            workspace: Some(workspace),
            page_size: 20,
            ..FakeState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Workspace `ws-1` named `app` in organization `acme`.
    pub fn with_default_workspace() -> Self {
        Self::new(Workspace {
            id: "ws-1".into(),
            name: "app".into(),
            organization: "acme".into(),
            locked: false,
            current_run: None,
        })
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_script(&self, script: RunScript) -> &Self {
        self.state().scripts.push_back(script);
        self
    }

    pub fn set_workspace(&self, workspace: Workspace) {
        self.state().workspace = Some(workspace);
    }

    /// Register a run that exists without having been created through the fake.
    pub fn insert_run(&self, run: Run) {
        let scripted = ScriptedRun {
            pending: VecDeque::new(),
            after_apply: Vec::new(),
            run: run.clone(),
        };
        self.state().runs.insert(run.id.clone(), scripted);
    }

    pub fn set_workspace_runs(&self, runs: Vec<Run>, page_size: usize) {
        let mut state = self.state();
        state.workspace_runs = runs;
        state.page_size = page_size.max(1);
    }

    pub fn set_queue(&self, queue: Vec<QueuedRun>, capacity: Capacity) {
        let mut state = self.state();
        state.queue = queue;
        state.capacity = capacity;
    }

    pub fn mark_missing(&self, run_id: &str) {
        self.state().missing_runs.insert(run_id.to_string());
    }

    pub fn fail_read_run(&self, failure: Option<FakeFailure>) {
        self.state().read_run_failure = failure;
    }

    pub fn fail_read_workspace(&self, failure: Option<FakeFailure>) {
        self.state().read_workspace_failure = failure;
    }

    pub fn fail_list_runs(&self, failure: Option<FakeFailure>) {
        self.state().list_runs_failure = failure;
    }

    pub fn create_calls(&self) -> usize {
        self.state().created.len()
    }

    pub fn created(&self) -> Vec<RunCreateOptions> {
        self.state().created.clone()
    }

    pub fn apply_calls(&self) -> Vec<String> {
        self.state().applied.clone()
    }

    pub fn run_reads(&self) -> usize {
        self.state().run_reads
    }

    pub fn workspace_reads(&self) -> usize {
        self.state().workspace_reads
    }

    fn workspace(state: &FakeState) -> Result<Workspace, ClientError> {
        if let Some(failure) = state.read_workspace_failure {
            return Err(failure.to_error());
        }
        state.workspace.clone().ok_or(ClientError::NotFound)
    }

    fn page<T: Clone>(items: &[T], page: u32, page_size: usize) -> Page<T> {
        let total_pages = items.len().div_ceil(page_size).max(1) as u32;
        let current_page = page.max(1);
        let start = (current_page as usize - 1) * page_size;
        let items = items.iter().skip(start).take(page_size).cloned().collect();
        Page {
            items,
            pagination: Pagination {
                current_page,
                next_page: (current_page < total_pages).then_some(current_page + 1),
                total_pages,
            },
        }
    }
}

#[async_trait]
impl RemoteClient for FakeClient {
    async fn read_workspace(
        &self,
        organization: &str,
        name: &str,
    ) -> Result<Workspace, ClientError> {
        let mut state = self.state();
        state.workspace_reads += 1;
        let workspace = Self::workspace(&state)?;
        let org_matches =
            workspace.organization.is_empty() || workspace.organization == organization;
        if !org_matches || workspace.name != name {
            return Err(ClientError::NotFound);
        }
        Ok(workspace)
    }

    async fn read_workspace_by_id(&self, workspace_id: &str) -> Result<Workspace, ClientError> {
        let mut state = self.state();
        state.workspace_reads += 1;
        let workspace = Self::workspace(&state)?;
        if workspace.id != workspace_id {
            return Err(ClientError::NotFound);
        }
        Ok(workspace)
    }

    async fn create_run(&self, options: RunCreateOptions) -> Result<Run, ClientError> {
        let mut state = self.state();
        state.created.push(options.clone());
        let id = format!("run-{}", state.created.len());
        let script = state.scripts.pop_front().unwrap_or_default();

        let mut run = Run::new(id.clone(), RunStatus::Pending);
        run.is_destroy = options.is_destroy;
        run.message = Some(options.message);
        run.has_changes = script.has_changes;
        run.actions.is_confirmable = script.confirmable;

        let scripted = ScriptedRun {
            run: run.clone(),
            pending: script.statuses.into_iter().collect(),
            after_apply: script.after_apply,
        };
        state.runs.insert(id, scripted);
        Ok(run)
    }

    async fn read_run(&self, run_id: &str) -> Result<Run, ClientError> {
        let mut state = self.state();
        state.run_reads += 1;
        if let Some(failure) = state.read_run_failure {
            return Err(failure.to_error());
        }
        if state.missing_runs.contains(run_id) {
            return Err(ClientError::NotFound);
        }
        let scripted = state.runs.get_mut(run_id).ok_or(ClientError::NotFound)?;
        if let Some(next) = scripted.pending.pop_front() {
            scripted.run.status = next;
        }
        Ok(scripted.run.clone())
    }

    async fn apply_run(&self, run_id: &str, _comment: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        state.applied.push(run_id.to_string());
        let scripted = state.runs.get_mut(run_id).ok_or(ClientError::NotFound)?;
        if !scripted.after_apply.is_empty() {
            scripted.pending = std::mem::take(&mut scripted.after_apply).into();
        }
        Ok(())
    }

    async fn list_runs(&self, workspace_id: &str, page: u32) -> Result<Page<Run>, ClientError> {
        let state = self.state();
        if let Some(failure) = state.list_runs_failure {
            return Err(failure.to_error());
        }
        if state.workspace.as_ref().map(|w| w.id.as_str()) != Some(workspace_id) {
            return Err(ClientError::NotFound);
        }
        Ok(Self::page(&state.workspace_runs, page, state.page_size))
    }

    async fn run_queue(
        &self,
        organization: &str,
        page: u32,
    ) -> Result<Page<QueuedRun>, ClientError> {
        if organization.is_empty() {
            return Err(ClientError::NotFound);
        }
        let state = self.state();
        Ok(Self::page(&state.queue, page, state.page_size))
    }

    async fn capacity(&self, organization: &str) -> Result<Capacity, ClientError> {
        if organization.is_empty() {
            return Err(ClientError::NotFound);
        }
        Ok(self.state().capacity)
    }
}
