//! Snapshots of remote runs, workspaces and queues.
//!
//! These are the shapes the orchestrator reasons about. They are decoded from
//! the API's JSON:API documents in [`super::client`] and never written back.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a remote run.
///
/// Statuses the service may add later decode into [`RunStatus::Unknown`]
/// instead of failing, so a new status can never crash the poller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Pending,
    Fetching,
    FetchingCompleted,
    PrePlanRunning,
    PrePlanCompleted,
    Queuing,
    PlanQueued,
    Planning,
    Planned,
    PlannedAndFinished,
    PlannedAndSaved,
    CostEstimating,
    CostEstimated,
    PolicyChecking,
    PolicyChecked,
    PolicyOverride,
    PolicySoftFailed,
    PostPlanRunning,
    PostPlanCompleted,
    Confirmed,
    ApplyQueued,
    Applying,
    Applied,
    Discarded,
    Errored,
    Canceled,
    ForceCanceled,
    Unknown(String),
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Fetching => "fetching",
            RunStatus::FetchingCompleted => "fetching_completed",
            RunStatus::PrePlanRunning => "pre_plan_running",
            RunStatus::PrePlanCompleted => "pre_plan_completed",
            RunStatus::Queuing => "queuing",
            RunStatus::PlanQueued => "plan_queued",
            RunStatus::Planning => "planning",
            RunStatus::Planned => "planned",
            RunStatus::PlannedAndFinished => "planned_and_finished",
            RunStatus::PlannedAndSaved => "planned_and_saved",
            RunStatus::CostEstimating => "cost_estimating",
            RunStatus::CostEstimated => "cost_estimated",
            RunStatus::PolicyChecking => "policy_checking",
            RunStatus::PolicyChecked => "policy_checked",
            RunStatus::PolicyOverride => "policy_override",
            RunStatus::PolicySoftFailed => "policy_soft_failed",
            RunStatus::PostPlanRunning => "post_plan_running",
            RunStatus::PostPlanCompleted => "post_plan_completed",
            RunStatus::Confirmed => "confirmed",
            RunStatus::ApplyQueued => "apply_queued",
            RunStatus::Applying => "applying",
            RunStatus::Applied => "applied",
            RunStatus::Discarded => "discarded",
            RunStatus::Errored => "errored",
            RunStatus::Canceled => "canceled",
            RunStatus::ForceCanceled => "force_canceled",
            RunStatus::Unknown(raw) => raw,
        }
    }

    /// Finished runs that no longer hold a place in any queue.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            RunStatus::Applied
                | RunStatus::Canceled
                | RunStatus::ForceCanceled
                | RunStatus::Discarded
                | RunStatus::Errored
        )
    }
}

impl From<&str> for RunStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "pending" => RunStatus::Pending,
            "fetching" => RunStatus::Fetching,
            "fetching_completed" => RunStatus::FetchingCompleted,
            "pre_plan_running" => RunStatus::PrePlanRunning,
            "pre_plan_completed" => RunStatus::PrePlanCompleted,
            "queuing" => RunStatus::Queuing,
            "plan_queued" => RunStatus::PlanQueued,
            "planning" => RunStatus::Planning,
            "planned" => RunStatus::Planned,
            "planned_and_finished" => RunStatus::PlannedAndFinished,
            "planned_and_saved" => RunStatus::PlannedAndSaved,
            "cost_estimating" => RunStatus::CostEstimating,
            "cost_estimated" => RunStatus::CostEstimated,
            "policy_checking" => RunStatus::PolicyChecking,
            "policy_checked" => RunStatus::PolicyChecked,
            "policy_override" => RunStatus::PolicyOverride,
            "policy_soft_failed" => RunStatus::PolicySoftFailed,
            "post_plan_running" => RunStatus::PostPlanRunning,
            "post_plan_completed" => RunStatus::PostPlanCompleted,
            "confirmed" => RunStatus::Confirmed,
            "apply_queued" => RunStatus::ApplyQueued,
            "applying" => RunStatus::Applying,
            "applied" => RunStatus::Applied,
            "discarded" => RunStatus::Discarded,
            "errored" => RunStatus::Errored,
            "canceled" => RunStatus::Canceled,
            "force_canceled" => RunStatus::ForceCanceled,
            other => RunStatus::Unknown(other.to_string()),
        }
    }
}

impl From<String> for RunStatus {
    fn from(raw: String) -> Self {
        RunStatus::from(raw.as_str())
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions the service currently allows on a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunActions {
    pub is_confirmable: bool,
    pub is_cancelable: bool,
    pub is_discardable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    pub has_changes: bool,
    pub is_destroy: bool,
    pub message: Option<String>,
    pub actions: RunActions,
}

impl Run {
    /// A freshly created run as the service first reports it.
    pub fn new(id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            id: id.into(),
            status,
            has_changes: false,
            is_destroy: false,
            message: None,
            actions: RunActions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub organization: String,
    pub locked: bool,
    /// Run the service is actively executing for this workspace.
    pub current_run: Option<String>,
}

/// Page position reported alongside list responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: u32,
    pub next_page: Option<u32>,
    pub total_pages: u32,
}

impl Pagination {
    pub fn single() -> Self {
        Self {
            current_page: 1,
            next_page: None,
            total_pages: 1,
        }
    }

    /// The page to request next, if any remain.
    pub fn next(&self) -> Option<u32> {
        if self.current_page >= self.total_pages {
            return None;
        }
        Some(self.next_page.unwrap_or(self.current_page + 1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// An entry of the organization-wide run queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRun {
    pub id: String,
    pub status: RunStatus,
    pub position_in_queue: u32,
}

/// Concurrency the organization is currently using.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub pending: u32,
    pub running: u32,
}

/// Parameters for queueing a new run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCreateOptions {
    pub workspace_id: String,
    pub is_destroy: bool,
    pub auto_apply: bool,
    pub message: String,
}
