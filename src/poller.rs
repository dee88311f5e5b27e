//! Run poller: waits for a remote run to reach a status of interest.
//!
//! Between reads the poller backs off exponentially. On the first iteration,
//! and then at most once per progress interval, it refreshes the workspace
//! and estimates how many runs are ahead of ours, purely for logging.
//!
//! The loop has no iteration cap. A long apply must not be cut short, so
//! callers bound the wait with the deadline on their [`RunContext`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::backoff::Backoff;
use crate::context::RunContext;
use crate::errors::RunError;
use crate::tfe::{RemoteClient, Run, RunStatus, Workspace};

/// Progress statuses assumed when a caller passes none.
pub const DEFAULT_PROGRESS: &[RunStatus] = &[RunStatus::Pending, RunStatus::Confirmed];

/// Elapsed time in progress messages is reported in steps of this size.
const ELAPSED_GRANULARITY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub backoff: Backoff,
    /// Minimum wall time between queue estimates.
    pub progress_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            backoff: Backoff::poll(),
            progress_interval: Duration::from_secs(30),
        }
    }
}

/// What is holding our run back, as far as the service lets us tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEstimate {
    /// The workspace is locked by hand and its current run is still pending.
    ManualLock,
    /// Runs ahead of ours in the workspace queue.
    Workspace(u32),
    /// Queued runs ahead of ours organization-wide, net of running capacity.
    Organization(i64),
    /// Nothing ahead; the run should start shortly.
    Starting,
}

impl fmt::Display for QueueEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueEstimate::ManualLock => {
                write!(f, "Waiting for the manually locked workspace to be unlocked...")
            }
            QueueEstimate::Workspace(n) => {
                write!(f, "Waiting for {} run(s) to finish before being queued...", n)
            }
            QueueEstimate::Organization(n) => {
                write!(f, "Waiting for {} queued run(s) to finish before starting...", n)
            }
            QueueEstimate::Starting => write!(f, "Waiting for the run to start..."),
        }
    }
}

pub struct RunPoller {
    client: Arc<dyn RemoteClient>,
    config: PollConfig,
}

impl RunPoller {
    pub fn new(client: Arc<dyn RemoteClient>, config: PollConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll `run` until its status is in `terminal`, or it leaves `progress`
    /// while the service flags it confirmable.
    ///
    /// `plan_phase` controls whether already-planned runs count as ahead of
    /// ours in the workspace queue. A cancelled or expired wait returns the
    /// last snapshot read inside the error.
    pub async fn wait_for_run(
        &self,
        ctx: &RunContext,
        run: Run,
        workspace: &Workspace,
        plan_phase: bool,
        terminal: &[RunStatus],
        progress: &[RunStatus],
    ) -> Result<Run, RunError> {
        let progress = if progress.is_empty() {
            DEFAULT_PROGRESS
        } else {
            progress
        };

        let started = Instant::now();
        let mut updated = started;
        let mut run = run;
        let mut workspace_id = workspace.id.clone();
        let mut organization = workspace.organization.clone();
        let mut iteration: u32 = 0;

        loop {
            if let Err(reason) = ctx.sleep(self.config.backoff.delay(iteration)).await {
                return Err(RunError::interrupted(reason, Some(run)));
            }

            run = self
                .client
                .read_run(&run.id)
                .await
                .map_err(|e| RunError::client("retrieve run", e))?;

            if terminal.contains(&run.status) {
                debug!(run_id = %run.id, status = %run.status, "reached terminal state");
                return Ok(run);
            }

            if !progress.contains(&run.status) {
                if run.actions.is_confirmable {
                    debug!(run_id = %run.id, status = %run.status, "non-progressive is-confirmable state, exiting");
                    return Ok(run);
                }
                debug!(run_id = %run.id, status = %run.status, "non-progressive state, waiting");
            }

            let now = Instant::now();
            if iteration == 0 || now.duration_since(updated) > self.config.progress_interval {
                updated = now;
                let mut workspace = self
                    .client
                    .read_workspace_by_id(&workspace_id)
                    .await
                    .map_err(|e| RunError::client("retrieve workspace", e))?;
                // A refresh without the organization relationship keeps the known one.
                if workspace.organization.is_empty() {
                    workspace.organization = organization.clone();
                }
                workspace_id = workspace.id.clone();
                organization = workspace.organization.clone();

                let estimate = self.estimate_queue(&run, &workspace, plan_phase).await?;
                let elapsed = (iteration > 0).then(|| truncate(now.duration_since(started)));
                report(&run, estimate, elapsed);
            }

            iteration = iteration.saturating_add(1);
        }
    }

    /// Estimate what stands between `run` and execution.
    pub async fn estimate_queue(
        &self,
        run: &Run,
        workspace: &Workspace,
        plan_phase: bool,
    ) -> Result<QueueEstimate, RunError> {
        let current = workspace.current_run.as_deref();
        let we_are_current = current == Some(run.id.as_str());

        if workspace.locked
            && let Some(current_id) = current
            && !we_are_current
        {
            let current_run = self
                .client
                .read_run(current_id)
                .await
                .map_err(|e| RunError::client("retrieve current run", e))?;
            if current_run.status == RunStatus::Pending {
                return Ok(QueueEstimate::ManualLock);
            }
        }

        if !we_are_current {
            let position = self.workspace_position(run, workspace, plan_phase).await?;
            if position > 0 {
                return Ok(QueueEstimate::Workspace(position));
            }
        }

        let position = self.organization_position(run, &workspace.organization).await?;
        if position > 0 {
            let capacity = self
                .client
                .capacity(&workspace.organization)
                .await
                .map_err(|e| RunError::client("retrieve capacity", e))?;
            return Ok(QueueEstimate::Organization(
                i64::from(position) - i64::from(capacity.running),
            ));
        }

        Ok(QueueEstimate::Starting)
    }

    /// Count unfinished runs listed after ours, up to the workspace's current run.
    async fn workspace_position(
        &self,
        run: &Run,
        workspace: &Workspace,
        plan_phase: bool,
    ) -> Result<u32, RunError> {
        let mut found = false;
        let mut position = 0;
        let mut page = 1;

        'pages: loop {
            let list = self
                .client
                .list_runs(&workspace.id, page)
                .await
                .map_err(|e| RunError::client("retrieve run list", e))?;

            for item in &list.items {
                if !found {
                    found = item.id == run.id;
                    continue;
                }

                if item.status.is_final() || (plan_phase && item.status == RunStatus::Planned) {
                    continue;
                }

                position += 1;

                if workspace.current_run.as_deref() == Some(item.id.as_str()) {
                    break 'pages;
                }
            }

            match list.pagination.next() {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(position)
    }

    async fn organization_position(&self, run: &Run, organization: &str) -> Result<u32, RunError> {
        let mut page = 1;
        loop {
            let queue = self
                .client
                .run_queue(organization, page)
                .await
                .map_err(|e| RunError::client("retrieve queue", e))?;

            if let Some(item) = queue.items.iter().find(|item| item.id == run.id) {
                return Ok(item.position_in_queue);
            }

            match queue.pagination.next() {
                Some(next) => page = next,
                None => return Ok(0),
            }
        }
    }
}

fn truncate(elapsed: Duration) -> Duration {
    let step = ELAPSED_GRANULARITY.as_secs();
    Duration::from_secs(elapsed.as_secs() / step * step)
}

fn report(run: &Run, estimate: QueueEstimate, elapsed: Option<Duration>) {
    let elapsed = elapsed
        .map(|e| format!(" ({}s elapsed)", e.as_secs()))
        .unwrap_or_default();
    match estimate {
        QueueEstimate::Starting => debug!(run_id = %run.id, "{}{}", estimate, elapsed),
        _ => info!(run_id = %run.id, "{}{}", estimate, elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tfe::fake::{FakeClient, FakeFailure, RunScript};
    use crate::tfe::{Capacity, QueuedRun, RunCreateOptions};
    use tokio_util::sync::CancellationToken;

    fn fast_config() -> PollConfig {
        PollConfig {
            backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(2)),
            progress_interval: Duration::from_secs(30),
        }
    }

    fn poller(fake: &Arc<FakeClient>) -> RunPoller {
        RunPoller::new(fake.clone(), fast_config())
    }

    async fn created_run(fake: &FakeClient, script: RunScript) -> Run {
        fake.push_script(script);
        fake.create_run(RunCreateOptions {
            workspace_id: "ws-1".into(),
            is_destroy: false,
            auto_apply: false,
            message: "test".into(),
        })
        .await
        .unwrap()
    }

    fn workspace() -> Workspace {
        Workspace {
            id: "ws-1".into(),
            name: "app".into(),
            organization: "acme".into(),
            locked: false,
            current_run: None,
        }
    }

    fn listed(id: &str, status: RunStatus) -> Run {
        Run::new(id, status)
    }

    #[tokio::test]
    async fn test_returns_on_terminal_status() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        let run = created_run(
            &fake,
            RunScript::new([RunStatus::PlanQueued, RunStatus::Planning, RunStatus::Planned]),
        )
        .await;

        let result = poller(&fake)
            .wait_for_run(
                &RunContext::new(),
                run,
                &workspace(),
                true,
                &[RunStatus::Planned],
                &[RunStatus::Pending, RunStatus::PlanQueued, RunStatus::Planning],
            )
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Planned);
        assert_eq!(fake.run_reads(), 3);
    }

    #[tokio::test]
    async fn test_confirmable_unexpected_status_returns() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        let run = created_run(
            &fake,
            RunScript::new([RunStatus::Unknown("post_plan_awaiting".into())]).confirmable(),
        )
        .await;

        let result = poller(&fake)
            .wait_for_run(
                &RunContext::new(),
                run,
                &workspace(),
                true,
                &[RunStatus::Planned],
                &[RunStatus::Planning],
            )
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Unknown("post_plan_awaiting".into()));
    }

    #[tokio::test]
    async fn test_unexpected_status_without_confirmable_keeps_waiting() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        let run = created_run(
            &fake,
            RunScript::new([
                RunStatus::Unknown("post_plan_running".into()),
                RunStatus::Unknown("post_plan_running".into()),
                RunStatus::Planned,
            ]),
        )
        .await;

        let result = poller(&fake)
            .wait_for_run(
                &RunContext::new(),
                run,
                &workspace(),
                true,
                &[RunStatus::Planned],
                &[RunStatus::Planning],
            )
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Planned);
        assert_eq!(fake.run_reads(), 3);
    }

    #[tokio::test]
    async fn test_empty_progress_defaults_to_pending_and_confirmed() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        let run = created_run(
            &fake,
            RunScript::new([RunStatus::Confirmed, RunStatus::Applied]),
        )
        .await;

        let result = poller(&fake)
            .wait_for_run(
                &RunContext::new(),
                run,
                &workspace(),
                false,
                &[RunStatus::Applied],
                &[],
            )
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Applied);
    }

    #[tokio::test]
    async fn test_read_failure_is_fatal() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        let run = created_run(&fake, RunScript::new([RunStatus::Planning])).await;
        fake.fail_read_run(Some(FakeFailure::Status(500)));

        let err = poller(&fake)
            .wait_for_run(
                &RunContext::new(),
                run,
                &workspace(),
                true,
                &[RunStatus::Planned],
                &[RunStatus::Planning],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Client { op: "retrieve run", .. }));
        assert!(!err.is_cancellation());
    }

    #[tokio::test]
    async fn test_workspace_refresh_failure_is_fatal() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        let run = created_run(&fake, RunScript::new([RunStatus::Planning])).await;
        fake.fail_read_workspace(Some(FakeFailure::Status(403)));

        let err = poller(&fake)
            .wait_for_run(
                &RunContext::new(),
                run,
                &workspace(),
                true,
                &[RunStatus::Planned],
                &[RunStatus::Planning],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Client { op: "retrieve workspace", .. }));
    }

    #[tokio::test]
    async fn test_cancellation_returns_last_snapshot() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        let run = created_run(&fake, RunScript::new([RunStatus::Planning])).await;
        let before = run.clone();

        let token = CancellationToken::new();
        let ctx = RunContext::new().with_cancel(token.clone());
        let slow = RunPoller::new(
            fake.clone(),
            PollConfig {
                backoff: Backoff::new(Duration::from_secs(60), Duration::from_secs(60)),
                progress_interval: Duration::from_secs(30),
            },
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let err = slow
            .wait_for_run(
                &ctx,
                run,
                &workspace(),
                true,
                &[RunStatus::Planned],
                &[RunStatus::Planning],
            )
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(err, RunError::Cancelled { .. }));
        assert_eq!(err.last_known_run(), Some(&before));
        assert_eq!(fake.run_reads(), 0);
    }

    fn planning_then_planned(iterations: usize) -> RunScript {
        let mut statuses = vec![RunStatus::Planning; iterations];
        statuses.push(RunStatus::Planned);
        RunScript::new(statuses)
    }

    #[tokio::test]
    async fn test_queue_estimate_is_throttled_by_progress_interval() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        let run = created_run(&fake, planning_then_planned(20)).await;

        let result = poller(&fake)
            .wait_for_run(
                &RunContext::new(),
                run,
                &workspace(),
                true,
                &[RunStatus::Planned],
                &[RunStatus::Planning],
            )
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Planned);
        assert_eq!(fake.run_reads(), 21);
        assert_eq!(fake.workspace_reads(), 1);
    }

    #[tokio::test]
    async fn test_queue_estimate_repeats_after_interval() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        let run = created_run(&fake, planning_then_planned(5)).await;
        let eager = RunPoller::new(
            fake.clone(),
            PollConfig {
                backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(2)),
                progress_interval: Duration::ZERO,
            },
        );

        eager
            .wait_for_run(
                &RunContext::new(),
                run,
                &workspace(),
                true,
                &[RunStatus::Planned],
                &[RunStatus::Planning],
            )
            .await
            .unwrap();

        // Every non-terminal read is followed by a refresh.
        assert_eq!(fake.run_reads(), 6);
        assert_eq!(fake.workspace_reads(), 5);
    }

    #[tokio::test]
    async fn test_refresh_without_organization_keeps_known_one() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        let mut bare = workspace();
        bare.organization = String::new();
        fake.set_workspace(bare);
        fake.set_queue(
            vec![QueuedRun {
                id: "run-1".into(),
                status: RunStatus::PlanQueued,
                position_in_queue: 2,
            }],
            Capacity::default(),
        );
        let run = created_run(&fake, planning_then_planned(2)).await;

        let result = poller(&fake)
            .wait_for_run(
                &RunContext::new(),
                run,
                &workspace(),
                true,
                &[RunStatus::Planned],
                &[RunStatus::Planning],
            )
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Planned);
        assert_eq!(fake.workspace_reads(), 1);
    }

    #[tokio::test]
    async fn test_estimate_reports_manual_lock() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        fake.insert_run(listed("run-lock", RunStatus::Pending));
        let ours = listed("run-ours", RunStatus::Pending);
        let mut ws = workspace();
        ws.locked = true;
        ws.current_run = Some("run-lock".into());

        let estimate = poller(&fake).estimate_queue(&ours, &ws, true).await.unwrap();
        assert_eq!(estimate, QueueEstimate::ManualLock);
    }

    #[tokio::test]
    async fn test_estimate_counts_workspace_queue_across_pages() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        fake.set_workspace_runs(
            vec![
                listed("run-newer", RunStatus::Pending),
                listed("run-ours", RunStatus::Pending),
                listed("run-a", RunStatus::Pending),
                listed("run-done", RunStatus::Applied),
                listed("run-b", RunStatus::Planned),
                listed("run-current", RunStatus::Applying),
                listed("run-older", RunStatus::Pending),
            ],
            2,
        );
        let ours = listed("run-ours", RunStatus::Pending);
        let mut ws = workspace();
        ws.current_run = Some("run-current".into());

        let planning = poller(&fake).estimate_queue(&ours, &ws, true).await.unwrap();
        assert_eq!(planning, QueueEstimate::Workspace(2));

        let applying = poller(&fake).estimate_queue(&ours, &ws, false).await.unwrap();
        assert_eq!(applying, QueueEstimate::Workspace(3));
    }

    #[tokio::test]
    async fn test_estimate_falls_back_to_organization_queue() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        fake.set_workspace_runs(vec![listed("run-ours", RunStatus::PlanQueued)], 20);
        fake.set_queue(
            vec![
                QueuedRun {
                    id: "run-x".into(),
                    status: RunStatus::Planning,
                    position_in_queue: 0,
                },
                QueuedRun {
                    id: "run-ours".into(),
                    status: RunStatus::PlanQueued,
                    position_in_queue: 5,
                },
            ],
            Capacity {
                pending: 4,
                running: 2,
            },
        );
        let ours = listed("run-ours", RunStatus::PlanQueued);
        let mut ws = workspace();
        ws.current_run = Some("run-ours".into());

        let estimate = poller(&fake).estimate_queue(&ours, &ws, true).await.unwrap();
        assert_eq!(estimate, QueueEstimate::Organization(3));
    }

    #[tokio::test]
    async fn test_estimate_starting_when_nothing_ahead() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        let ours = listed("run-ours", RunStatus::PlanQueued);
        let estimate = poller(&fake)
            .estimate_queue(&ours, &workspace(), true)
            .await
            .unwrap();
        assert_eq!(estimate, QueueEstimate::Starting);
    }

    #[tokio::test]
    async fn test_estimate_surfaces_list_failure() {
        let fake = Arc::new(FakeClient::with_default_workspace());
        fake.fail_list_runs(Some(FakeFailure::Status(403)));
        let ours = listed("run-ours", RunStatus::PlanQueued);
        let err = poller(&fake)
            .estimate_queue(&ours, &workspace(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Client { op: "retrieve run list", .. }));
    }

    #[test]
    fn test_elapsed_truncates_to_thirty_seconds() {
        assert_eq!(truncate(Duration::from_secs(89)), Duration::from_secs(60));
        assert_eq!(truncate(Duration::from_secs(29)), Duration::ZERO);
    }

    #[test]
    fn test_estimate_messages() {
        assert_eq!(
            QueueEstimate::Workspace(2).to_string(),
            "Waiting for 2 run(s) to finish before being queued..."
        );
        assert_eq!(
            QueueEstimate::Organization(1).to_string(),
            "Waiting for 1 queued run(s) to finish before starting..."
        );
    }
}
