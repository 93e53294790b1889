// ── Project aggregate ──
//
// One generation request and the jobs it fans out into. The registry owns
// every mutation; applications get a cloneable read handle with events,
// derived progress, and `wait_for_completion`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::debug;

use supernet_api::{EventBus, RawProjectStatus};

use super::job::{Job, JobData, JobDelta, JobField, JobStatus};
use super::{ErrorData, ProjectParams};
use crate::entity::{EntityData, MutableEntity};
use crate::error::CoreError;
use crate::schedule::ScheduledTask;
use crate::stream::ProjectStream;

const PROJECT_EVENT_CAPACITY: usize = 256;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProjectStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Canceled,
}

impl ProjectStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Queued => 1,
            Self::Processing => 2,
            Self::Completed | Self::Failed | Self::Canceled => 3,
        }
    }

    /// Local status for a REST project status. `None` for unknown ones.
    pub fn from_raw(raw: RawProjectStatus) -> Option<Self> {
        Some(match raw {
            RawProjectStatus::Pending => Self::Pending,
            RawProjectStatus::Active => Self::Queued,
            RawProjectStatus::Assigned | RawProjectStatus::Progress => Self::Processing,
            RawProjectStatus::Completed => Self::Completed,
            RawProjectStatus::Errored => Self::Failed,
            RawProjectStatus::Cancelled => Self::Canceled,
            RawProjectStatus::Unknown => return None,
        })
    }
}

// ── Data ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectData {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub params: ProjectParams,
    /// `-1` until the server reports a queue position.
    pub queue_position: i64,
    pub status: ProjectStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorData>,
}

/// Project data with every job, for persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializedProject {
    #[serde(flatten)]
    pub project: ProjectData,
    pub jobs: Vec<JobData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectField {
    Params,
    QueuePosition,
    Status,
    Error,
    Jobs,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectDelta {
    pub params: Option<ProjectParams>,
    pub queue_position: Option<i64>,
    pub status: Option<ProjectStatus>,
    pub error: Option<ErrorData>,
}

impl ProjectDelta {
    pub fn status(status: ProjectStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn failed(error: ErrorData) -> Self {
        Self {
            status: Some(ProjectStatus::Failed),
            error: Some(error),
            ..Self::default()
        }
    }
}

impl EntityData for ProjectData {
    type Field = ProjectField;
    type Delta = ProjectDelta;

    /// Status and error freeze once terminal. Before that, status moves
    /// forward only; any terminal status may be entered from any other.
    fn apply(&mut self, delta: ProjectDelta) -> Vec<ProjectField> {
        let mut changed = Vec::new();

        if let Some(params) = delta.params.filter(|p| *p != self.params) {
            self.params = params;
            changed.push(ProjectField::Params);
        }
        if let Some(pos) = delta.queue_position.filter(|p| *p != self.queue_position) {
            self.queue_position = pos;
            changed.push(ProjectField::QueuePosition);
        }
        if self.status.is_terminal() {
            return changed;
        }
        if let Some(status) = delta.status {
            if status != self.status && status.rank() >= self.status.rank() {
                self.status = status;
                changed.push(ProjectField::Status);
            }
        }
        if delta.error.is_some() && delta.error != self.error {
            self.error = delta.error;
            changed.push(ProjectField::Error);
        }
        changed
    }
}

// ── Events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ProjectEvent {
    Updated(Vec<ProjectField>),
    /// Rounded progress percentage; emitted only when it changes.
    Progress(u8),
    JobStarted(Job),
    JobCompleted(Job),
    JobFailed(Job),
    Completed(Vec<String>),
    Failed(ErrorData),
    Canceled,
}

/// How a project ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    /// Result URLs of completed jobs.
    Completed(Vec<String>),
    Failed(ErrorData),
    Canceled,
}

// ── Handle ───────────────────────────────────────────────────────────

/// Handle to a project. Cheaply cloneable via `Arc<ProjectInner>`; stays
/// valid after the registry drops the project from its active set.
#[derive(Debug, Clone)]
pub struct Project {
    inner: Arc<ProjectInner>,
}

#[derive(Debug)]
struct ProjectInner {
    id: String,
    entity: MutableEntity<ProjectData>,
    /// Append-only.
    jobs: RwLock<Vec<Job>>,
    events: EventBus<ProjectEvent>,
    last_progress: Mutex<Option<u8>>,
    outcome: watch::Sender<Option<ProjectOutcome>>,
    timer: Mutex<Option<ScheduledTask>>,
    failed_syncs: AtomicU32,
}

impl Project {
    pub(crate) fn new(params: ProjectParams) -> Self {
        let id = uuid::Uuid::new_v4().to_string().to_uppercase();
        let data = ProjectData {
            id: id.clone(),
            created_at: Utc::now(),
            params,
            queue_position: -1,
            status: ProjectStatus::Pending,
            error: None,
        };
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(ProjectInner {
                id,
                entity: MutableEntity::new(data),
                jobs: RwLock::new(Vec::new()),
                events: EventBus::new(PROJECT_EVENT_CAPACITY),
                last_progress: Mutex::new(None),
                outcome,
                timer: Mutex::new(None),
                failed_syncs: AtomicU32::new(0),
            }),
        }
    }

    // ── Read accessors ───────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn status(&self) -> ProjectStatus {
        self.inner.entity.read(|d| d.status)
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn params(&self) -> ProjectParams {
        self.inner.entity.read(|d| d.params.clone())
    }

    pub fn queue_position(&self) -> i64 {
        self.inner.entity.read(|d| d.queue_position)
    }

    pub fn error(&self) -> Option<ErrorData> {
        self.inner.entity.read(|d| d.error.clone())
    }

    pub fn data(&self) -> ProjectData {
        self.inner.entity.snapshot()
    }

    /// Jobs in the order workers picked them up.
    pub fn jobs(&self) -> Vec<Job> {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn job(&self, id: &str) -> Option<Job> {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|j| j.has_id(id))
            .cloned()
    }

    /// Result URLs of every job that produced one.
    pub fn result_urls(&self) -> Vec<String> {
        self.jobs().iter().filter_map(Job::result_url).collect()
    }

    /// Percentage of steps done across all expected jobs, `0..=100`.
    ///
    /// Workers may run fewer steps than requested, so the first job's
    /// step count is preferred over the requested one.
    pub fn progress(&self) -> u8 {
        let jobs = self.jobs();
        let (requested_steps, job_count) = self
            .inner
            .entity
            .read(|d| (d.params.steps, d.params.number_of_images));
        let steps_per_job = jobs.first().map_or(requested_steps, Job::step_count);
        let total = u64::from(steps_per_job) * u64::from(job_count);
        if total == 0 {
            return 0;
        }
        let done: u64 = jobs.iter().map(|j| u64::from(j.step())).sum();
        // round(100 * done / total) in integers
        let pct = (200 * done + total) / (2 * total);
        u8::try_from(pct.min(100)).unwrap_or(100)
    }

    pub fn to_serialized(&self) -> SerializedProject {
        SerializedProject {
            project: self.data(),
            jobs: self.jobs().iter().map(Job::data).collect(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot stream of the project's own fields.
    pub fn watch(&self) -> watch::Receiver<ProjectData> {
        self.inner.entity.watch()
    }

    pub fn stream(&self) -> ProjectStream {
        ProjectStream::new(self.watch())
    }

    pub fn outcome(&self) -> Option<ProjectOutcome> {
        self.inner.outcome.borrow().clone()
    }

    /// Wait until the project ends. Resolves at once if it already has.
    ///
    /// A `completed` status resolves with whatever result URLs are known,
    /// even if some jobs never reported back.
    pub async fn wait_for_completion(&self) -> Result<Vec<String>, CoreError> {
        let mut outcome_rx = self.inner.outcome.subscribe();
        let mut data_rx = self.watch();

        let outcome = tokio::select! {
            biased;
            outcome = outcome_rx.wait_for(Option::is_some) => outcome
                .map_err(|_| CoreError::Internal("project outcome channel closed".into()))?
                .clone(),
            data = data_rx.wait_for(|d| d.status == ProjectStatus::Completed) => {
                if data.is_err() {
                    return Err(CoreError::Internal("project state channel closed".into()));
                }
                Some(ProjectOutcome::Completed(self.result_urls()))
            }
        };

        match outcome {
            Some(ProjectOutcome::Completed(urls)) => Ok(urls),
            Some(ProjectOutcome::Failed(error)) => Err(CoreError::ProjectFailed(error)),
            Some(ProjectOutcome::Canceled) => Err(CoreError::ProjectCanceled {
                id: self.inner.id.clone(),
            }),
            None => Err(CoreError::Internal("project outcome missing".into())),
        }
    }

    // ── Registry-side mutation ───────────────────────────────────────

    pub(crate) fn last_updated(&self) -> Instant {
        self.inner.entity.last_updated()
    }

    pub(crate) fn update(&self, delta: ProjectDelta) -> Vec<ProjectField> {
        let changed = self.inner.entity.update(delta);
        self.after_update(&changed);
        changed
    }

    #[cfg(test)]
    pub(crate) fn add_job(&self, data: JobData) -> Job {
        let id = data.id.clone();
        self.job_or_insert(&id, || data)
    }

    /// The job with `id`, created from `make` when the project has none.
    /// Lookup and insert happen under one lock so concurrent routes agree.
    pub(crate) fn job_or_insert(&self, id: &str, make: impl FnOnce() -> JobData) -> Job {
        let job = {
            let mut jobs = self
                .inner
                .jobs
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = jobs.iter().find(|j| j.has_id(id)) {
                return existing.clone();
            }
            let job = Job::new(make());
            jobs.push(job.clone());
            job
        };
        debug!(project_id = %self.inner.id, job_id = %job.id(), "job added");

        self.inner.entity.touch();
        self.inner.events.emit(ProjectEvent::JobStarted(job.clone()));
        self.after_update(&[ProjectField::Jobs]);
        job
    }

    pub(crate) fn update_job(&self, job: &Job, delta: JobDelta) -> Vec<JobField> {
        let changed = job.update(delta);
        if changed.is_empty() {
            return changed;
        }

        self.inner.entity.touch();
        if changed.contains(&JobField::Status) {
            match job.status() {
                JobStatus::Completed => {
                    self.inner.events.emit(ProjectEvent::JobCompleted(job.clone()));
                }
                JobStatus::Failed => {
                    self.inner.events.emit(ProjectEvent::JobFailed(job.clone()));
                }
                JobStatus::Pending
                | JobStatus::Initiating
                | JobStatus::Processing
                | JobStatus::Canceled => {}
            }
        }
        self.after_update(&[ProjectField::Jobs]);
        changed
    }

    /// Cancel every unfinished job, then the project itself.
    pub(crate) fn force_cancel(&self) {
        for job in self.jobs().iter().filter(|j| !j.is_finished()) {
            self.update_job(
                job,
                JobDelta {
                    status: Some(JobStatus::Canceled),
                    user_canceled: Some(true),
                    ..JobDelta::default()
                },
            );
        }
        self.update(ProjectDelta::status(ProjectStatus::Canceled));
    }

    /// Give up on a project the server stopped reporting on.
    pub(crate) fn force_timeout(&self) {
        for job in self.jobs().iter().filter(|j| !j.is_finished()) {
            self.update_job(job, JobDelta::failed(ErrorData::new(0, "Job timed out")));
        }
        self.update(ProjectDelta::failed(ErrorData::new(
            0,
            "Project timed out. Please try again or contact support.",
        )));
    }

    pub(crate) fn arm_timer(&self, task: ScheduledTask) {
        if self.is_finished() {
            return;
        }
        *self.inner.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Stop the timeout timer. Later calls are no-ops.
    pub(crate) fn disarm_timer(&self) {
        let task = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.cancel();
            debug!(project_id = %self.inner.id, "timeout timer disarmed");
        }
    }

    #[cfg(test)]
    pub(crate) fn is_timer_armed(&self) -> bool {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Count a failed REST pull. Returns the consecutive failure count.
    pub(crate) fn record_failed_sync(&self) -> u32 {
        self.inner.failed_syncs.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset_failed_syncs(&self) {
        self.inner.failed_syncs.store(0, Ordering::SeqCst);
    }

    // ── Derived events ───────────────────────────────────────────────

    fn after_update(&self, fields: &[ProjectField]) {
        if fields.is_empty() {
            return;
        }
        self.inner.events.emit(ProjectEvent::Updated(fields.to_vec()));

        let progress = self.progress();
        let emit_progress = {
            let mut last = self
                .inner
                .last_progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let fresh = *last != Some(progress);
            *last = Some(progress);
            fresh
        };
        if emit_progress {
            self.inner.events.emit(ProjectEvent::Progress(progress));
        }

        let status = self.status();
        if status.is_terminal() {
            self.disarm_timer();
        }
        if fields.contains(&ProjectField::Status) || fields.contains(&ProjectField::Jobs) {
            self.settle(status);
        }
    }

    /// Publish the outcome once the project has really ended.
    fn settle(&self, status: ProjectStatus) {
        let outcome = match status {
            ProjectStatus::Completed => {
                let jobs = self.jobs();
                let expected = self.inner.entity.read(|d| d.params.number_of_images);
                let all_started = jobs.len() >= usize::try_from(expected).unwrap_or(usize::MAX);
                let all_done = jobs.iter().all(Job::is_finished);
                (all_started && all_done).then(|| ProjectOutcome::Completed(self.result_urls()))
            }
            ProjectStatus::Failed => Some(ProjectOutcome::Failed(
                self.error()
                    .unwrap_or_else(|| ErrorData::new(0, "Project failed")),
            )),
            ProjectStatus::Canceled => Some(ProjectOutcome::Canceled),
            ProjectStatus::Pending | ProjectStatus::Queued | ProjectStatus::Processing => None,
        };
        let Some(outcome) = outcome else {
            return;
        };

        let event = match &outcome {
            ProjectOutcome::Completed(urls) => ProjectEvent::Completed(urls.clone()),
            ProjectOutcome::Failed(error) => ProjectEvent::Failed(error.clone()),
            ProjectOutcome::Canceled => ProjectEvent::Canceled,
        };
        let fresh = self.inner.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
        if fresh {
            debug!(project_id = %self.inner.id, %status, "project settled");
            self.inner.events.emit(event);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    fn project(images: u32) -> Project {
        let mut params = ProjectParams::new("model", "a cat");
        params.number_of_images = images;
        Project::new(params)
    }

    fn drain(rx: &mut broadcast::Receiver<ProjectEvent>) -> Vec<ProjectEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn progress_events(events: &[ProjectEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                ProjectEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn id_is_uppercase_uuid() {
        let p = project(1);
        assert_eq!(p.id(), p.id().to_uppercase());
        assert_eq!(p.id().len(), 36);
        assert_eq!(p.queue_position(), -1);
    }

    #[test]
    fn terminal_status_is_final() {
        let p = project(1);
        p.update(ProjectDelta::failed(ErrorData::new(1, "boom")));
        assert!(p.update(ProjectDelta::status(ProjectStatus::Completed)).is_empty());
        assert!(p.update(ProjectDelta::failed(ErrorData::new(2, "again"))).is_empty());
        assert_eq!(p.status(), ProjectStatus::Failed);
        assert_eq!(p.error().unwrap().code, 1);
    }

    #[test]
    fn status_does_not_regress() {
        let p = project(1);
        p.update(ProjectDelta::status(ProjectStatus::Processing));
        p.update(ProjectDelta::status(ProjectStatus::Queued));
        assert_eq!(p.status(), ProjectStatus::Processing);
    }

    #[test]
    fn progress_is_edge_triggered() {
        let p = project(2);
        let mut rx = p.subscribe();
        let a = p.add_job(JobData::pending("A", p.id(), 20));
        let b = p.add_job(JobData::pending("B", p.id(), 20));

        for (job, step) in [(&a, 5), (&b, 3), (&a, 5), (&b, 3), (&a, 20), (&b, 20)] {
            p.update_job(
                job,
                JobDelta {
                    step: Some(step),
                    ..JobDelta::default()
                },
            );
        }

        // 0/40, 5/40, 8/40, 23/40, 40/40; repeats change nothing
        assert_eq!(progress_events(&drain(&mut rx)), vec![0, 13, 20, 58, 100]);
        assert_eq!(p.progress(), 100);
    }

    #[test]
    fn progress_is_clamped() {
        let p = project(1);
        let job = p.add_job(JobData::pending("A", p.id(), 10));
        p.update_job(
            &job,
            JobDelta {
                step: Some(50),
                ..JobDelta::default()
            },
        );
        assert_eq!(p.progress(), 100);
    }

    #[test]
    fn completion_waits_for_all_jobs() {
        let p = project(2);
        let a = p.add_job(JobData::pending("A", p.id(), 20));
        p.update(ProjectDelta::status(ProjectStatus::Completed));
        assert!(p.outcome().is_none());

        let done = |url: &str| JobDelta {
            status: Some(JobStatus::Completed),
            step: Some(20),
            result_url: Some(url.into()),
            ..JobDelta::default()
        };
        p.update_job(&a, done("https://cdn/a.png"));
        assert!(p.outcome().is_none());

        let b = p.add_job(JobData::pending("B", p.id(), 20));
        p.update_job(&b, done("https://cdn/b.png"));
        assert_eq!(
            p.outcome(),
            Some(ProjectOutcome::Completed(vec![
                "https://cdn/a.png".into(),
                "https://cdn/b.png".into()
            ]))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completed_status_resolves_despite_unfinished_job() {
        let p = project(2);
        let a = p.add_job(JobData::pending("A", p.id(), 20));
        p.add_job(JobData::pending("B", p.id(), 20));
        p.update_job(
            &a,
            JobDelta {
                status: Some(JobStatus::Completed),
                result_url: Some("https://cdn/a.png".into()),
                ..JobDelta::default()
            },
        );

        let waiter = {
            let p = p.clone();
            tokio::spawn(async move { p.wait_for_completion().await })
        };
        tokio::task::yield_now().await;
        // B's result never arrives.
        p.update(ProjectDelta::status(ProjectStatus::Completed));

        let urls = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter stuck on a completed project")
            .unwrap()
            .unwrap();
        assert_eq!(urls, vec!["https://cdn/a.png".to_owned()]);
        assert!(p.outcome().is_none());

        // Already completed: resolves without waiting.
        let again = tokio::time::timeout(Duration::from_secs(1), p.wait_for_completion())
            .await
            .expect("completed project did not resolve at once")
            .unwrap();
        assert_eq!(again, urls);
    }

    #[tokio::test]
    async fn wait_for_completion_resolves_immediately_when_settled() {
        let p = project(1);
        p.update(ProjectDelta::failed(ErrorData::new(7, "nope")));
        let err = p.wait_for_completion().await.unwrap_err();
        assert!(matches!(err, CoreError::ProjectFailed(ref e) if e.code == 7));
    }

    #[tokio::test]
    async fn wait_for_completion_reports_cancellation() {
        let p = project(1);
        let waiter = {
            let p = p.clone();
            tokio::spawn(async move { p.wait_for_completion().await })
        };
        tokio::task::yield_now().await;
        p.force_cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(CoreError::ProjectCanceled { .. })));
    }

    #[test]
    fn force_timeout_fails_unfinished_jobs() {
        let p = project(2);
        let a = p.add_job(JobData::pending("A", p.id(), 20));
        let b = p.add_job(JobData::pending("B", p.id(), 20));
        p.update_job(&a, JobDelta::status(JobStatus::Completed));

        p.force_timeout();

        assert_eq!(a.status(), JobStatus::Completed);
        assert_eq!(b.status(), JobStatus::Failed);
        assert_eq!(b.error().unwrap().message, "Job timed out");
        assert_eq!(p.status(), ProjectStatus::Failed);
        assert_eq!(
            p.error().unwrap().message,
            "Project timed out. Please try again or contact support."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_entry_disarms_timer_once() {
        let p = project(1);
        p.arm_timer(ScheduledTask::interval(Duration::from_secs(60), || async {}));
        assert!(p.is_timer_armed());

        p.update(ProjectDelta::status(ProjectStatus::Canceled));
        assert!(!p.is_timer_armed());

        // Re-arming a finished project is refused.
        p.arm_timer(ScheduledTask::interval(Duration::from_secs(60), || async {}));
        assert!(!p.is_timer_armed());
    }

    #[tokio::test]
    async fn stream_follows_status_changes() {
        let p = project(1);
        let mut stream = p.stream();
        assert_eq!(stream.current().status, ProjectStatus::Pending);

        p.update(ProjectDelta {
            status: Some(ProjectStatus::Queued),
            queue_position: Some(4),
            ..ProjectDelta::default()
        });

        let snap = stream.changed().await.unwrap();
        assert_eq!(snap.status, ProjectStatus::Queued);
        assert_eq!(stream.current().queue_position, 4);
        assert_eq!(stream.latest(), snap);
    }

    #[test]
    fn serialized_project_flattens_data_and_jobs() {
        let p = project(1);
        p.add_job(JobData::pending("A", p.id(), 20));
        let json = serde_json::to_value(p.to_serialized()).unwrap();
        assert_eq!(json["id"], p.id());
        assert_eq!(json["status"], "pending");
        assert_eq!(json["queuePosition"], -1);
        assert_eq!(json["jobs"][0]["id"], "A");
    }

    #[test]
    fn raw_status_translation() {
        assert_eq!(
            ProjectStatus::from_raw(RawProjectStatus::Active),
            Some(ProjectStatus::Queued)
        );
        assert_eq!(
            ProjectStatus::from_raw(RawProjectStatus::Errored),
            Some(ProjectStatus::Failed)
        );
        assert_eq!(ProjectStatus::from_raw(RawProjectStatus::Unknown), None);
    }
}
