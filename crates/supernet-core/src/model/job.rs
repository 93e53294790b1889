// ── Job unit ──
//
// One work unit (one output image) of a project. Jobs are created and
// mutated by the registry only; applications hold read handles.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use supernet_api::{EventBus, RawJob, WorkerJobStatus};

use super::ErrorData;
use crate::entity::{EntityData, MutableEntity};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Initiating,
    Processing,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Position in the forward-only lifecycle. Terminal states share a rank.
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Initiating => 1,
            Self::Processing => 2,
            Self::Completed | Self::Failed | Self::Canceled => 3,
        }
    }

    /// Status implied by a REST worker-job record. `None` for statuses
    /// this client does not know.
    pub fn from_worker(status: WorkerJobStatus, reason: Option<&str>) -> Option<Self> {
        let canceled = reason == Some("artistCanceled");
        Some(match status {
            WorkerJobStatus::Created | WorkerJobStatus::Queued | WorkerJobStatus::Assigned => {
                Self::Pending
            }
            WorkerJobStatus::InitiatingModel => Self::Initiating,
            WorkerJobStatus::JobStarted | WorkerJobStatus::JobProgress => Self::Processing,
            WorkerJobStatus::JobCompleted | WorkerJobStatus::JobError if canceled => {
                Self::Canceled
            }
            WorkerJobStatus::JobCompleted => Self::Completed,
            WorkerJobStatus::JobError => Self::Failed,
            WorkerJobStatus::Unknown => return None,
        })
    }
}

// ── Data ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    pub id: String,
    pub project_id: String,
    pub status: JobStatus,
    pub step: u32,
    pub step_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(rename = "isNSFW", skip_serializing_if = "Option::is_none")]
    pub is_nsfw: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_canceled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorData>,
    /// Per-job prompt when the project used dynamic prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub positive_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_index: Option<u32>,
}

impl JobData {
    /// A job first seen through a push event.
    pub fn pending(id: impl Into<String>, project_id: impl Into<String>, step_count: u32) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            status: JobStatus::Pending,
            step: 0,
            step_count,
            worker_name: None,
            seed: None,
            result_url: None,
            preview_url: None,
            is_nsfw: None,
            user_canceled: None,
            error: None,
            positive_prompt: None,
            negative_prompt: None,
            job_index: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobField {
    Status,
    Step,
    StepCount,
    WorkerName,
    Seed,
    ResultUrl,
    PreviewUrl,
    IsNsfw,
    UserCanceled,
    Error,
    Prompts,
}

/// Partial job update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobDelta {
    pub status: Option<JobStatus>,
    pub step: Option<u32>,
    pub step_count: Option<u32>,
    pub worker_name: Option<String>,
    pub seed: Option<u64>,
    pub result_url: Option<String>,
    pub preview_url: Option<String>,
    pub is_nsfw: Option<bool>,
    pub user_canceled: Option<bool>,
    pub error: Option<ErrorData>,
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub job_index: Option<u32>,
}

impl JobDelta {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn failed(error: ErrorData) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error),
            ..Self::default()
        }
    }

    /// Field-by-field view of a REST worker-job record.
    pub fn from_raw(raw: &RawJob) -> Self {
        let status = JobStatus::from_worker(raw.status, raw.reason.as_deref());
        let error = (status == Some(JobStatus::Failed)).then(|| {
            let reason = raw.reason.clone().unwrap_or_else(|| "jobError".into());
            ErrorData::from_server(
                &supernet_api::wire::RawErrorCode::Named(reason.clone()),
                reason,
            )
        });
        Self {
            status,
            step: Some(raw.performed_steps),
            worker_name: raw.worker.name.clone(),
            seed: raw.seed_used,
            is_nsfw: Some(raw.triggered_nsfw_filter),
            user_canceled: (status == Some(JobStatus::Canceled)).then_some(true),
            error,
            ..Self::default()
        }
    }
}

fn set<T: PartialEq>(slot: &mut T, value: T, field: JobField, changed: &mut Vec<JobField>) {
    if *slot != value {
        *slot = value;
        changed.push(field);
    }
}

impl EntityData for JobData {
    type Field = JobField;
    type Delta = JobDelta;

    /// A terminal job never changes. Otherwise status only moves forward
    /// and `step` only grows.
    fn apply(&mut self, delta: JobDelta) -> Vec<JobField> {
        let mut changed = Vec::new();
        if self.status.is_terminal() {
            return changed;
        }

        if let Some(status) = delta.status {
            if status.rank() >= self.status.rank() {
                set(&mut self.status, status, JobField::Status, &mut changed);
            }
        }
        if let Some(step) = delta.step {
            let step = self.step.max(step);
            set(&mut self.step, step, JobField::Step, &mut changed);
        }
        if let Some(count) = delta.step_count {
            set(&mut self.step_count, count, JobField::StepCount, &mut changed);
        }
        if delta.worker_name.is_some() {
            set(&mut self.worker_name, delta.worker_name, JobField::WorkerName, &mut changed);
        }
        if delta.seed.is_some() {
            set(&mut self.seed, delta.seed, JobField::Seed, &mut changed);
        }
        if delta.result_url.is_some() {
            set(&mut self.result_url, delta.result_url, JobField::ResultUrl, &mut changed);
        }
        if delta.preview_url.is_some() {
            set(&mut self.preview_url, delta.preview_url, JobField::PreviewUrl, &mut changed);
        }
        if delta.is_nsfw.is_some() {
            set(&mut self.is_nsfw, delta.is_nsfw, JobField::IsNsfw, &mut changed);
        }
        if delta.user_canceled.is_some() {
            set(&mut self.user_canceled, delta.user_canceled, JobField::UserCanceled, &mut changed);
        }
        if delta.error.is_some() {
            set(&mut self.error, delta.error, JobField::Error, &mut changed);
        }

        // Prompts and index arrive together and are reported as one field.
        let mut prompts = Vec::new();
        if delta.positive_prompt.is_some() {
            set(&mut self.positive_prompt, delta.positive_prompt, JobField::Prompts, &mut prompts);
        }
        if delta.negative_prompt.is_some() {
            set(&mut self.negative_prompt, delta.negative_prompt, JobField::Prompts, &mut prompts);
        }
        if delta.job_index.is_some() {
            set(&mut self.job_index, delta.job_index, JobField::Prompts, &mut prompts);
        }
        if !prompts.is_empty() {
            changed.push(JobField::Prompts);
        }
        changed
    }
}

// ── Handle ───────────────────────────────────────────────────────────

/// Notifications for a single job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Updated(Vec<JobField>),
    Completed { result_url: Option<String> },
    Failed(ErrorData),
    Canceled,
}

/// Read handle to a job. Cheaply cloneable via `Arc<JobInner>`.
#[derive(Debug, Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

#[derive(Debug)]
struct JobInner {
    entity: MutableEntity<JobData>,
    events: EventBus<JobEvent>,
}

impl Job {
    pub(crate) fn new(data: JobData) -> Self {
        Self {
            inner: Arc::new(JobInner {
                entity: MutableEntity::new(data),
                events: EventBus::new(64),
            }),
        }
    }

    pub fn id(&self) -> String {
        self.inner.entity.read(|d| d.id.clone())
    }

    pub fn status(&self) -> JobStatus {
        self.inner.entity.read(|d| d.status)
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn step(&self) -> u32 {
        self.inner.entity.read(|d| d.step)
    }

    pub fn step_count(&self) -> u32 {
        self.inner.entity.read(|d| d.step_count)
    }

    pub fn result_url(&self) -> Option<String> {
        self.inner.entity.read(|d| d.result_url.clone())
    }

    pub fn preview_url(&self) -> Option<String> {
        self.inner.entity.read(|d| d.preview_url.clone())
    }

    pub fn error(&self) -> Option<ErrorData> {
        self.inner.entity.read(|d| d.error.clone())
    }

    pub fn data(&self) -> JobData {
        self.inner.entity.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn has_id(&self, id: &str) -> bool {
        self.inner.entity.read(|d| d.id == id)
    }

    /// Apply an update and announce it. Returns the changed fields.
    pub(crate) fn update(&self, delta: JobDelta) -> Vec<JobField> {
        let changed = self.inner.entity.update(delta);
        if changed.is_empty() {
            return changed;
        }

        self.inner.events.emit(JobEvent::Updated(changed.clone()));
        if changed.contains(&JobField::Status) {
            let data = self.inner.entity.snapshot();
            match data.status {
                JobStatus::Completed => {
                    self.inner.events.emit(JobEvent::Completed {
                        result_url: data.result_url,
                    });
                }
                JobStatus::Failed => {
                    let error = data
                        .error
                        .unwrap_or_else(|| ErrorData::new(0, "Job failed"));
                    self.inner.events.emit(JobEvent::Failed(error));
                }
                JobStatus::Canceled => {
                    self.inner.events.emit(JobEvent::Canceled);
                }
                JobStatus::Pending | JobStatus::Initiating | JobStatus::Processing => {}
            }
        }
        changed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(JobData::pending("J1", "P1", 20))
    }

    #[test]
    fn step_is_running_max() {
        let job = job();
        for step in [5, 3, 9, 7] {
            job.update(JobDelta {
                step: Some(step),
                ..JobDelta::default()
            });
        }
        assert_eq!(job.step(), 9);

        let stale = job.update(JobDelta {
            step: Some(4),
            ..JobDelta::default()
        });
        assert!(stale.is_empty(), "lower step reported a change: {stale:?}");
    }

    #[test]
    fn status_never_moves_backward() {
        let job = job();
        job.update(JobDelta::status(JobStatus::Processing));
        let changed = job.update(JobDelta::status(JobStatus::Initiating));
        assert!(changed.is_empty());
        assert_eq!(job.status(), JobStatus::Processing);
    }

    #[test]
    fn terminal_job_is_frozen() {
        let job = job();
        let mut rx = job.subscribe();
        job.update(JobDelta {
            status: Some(JobStatus::Completed),
            step: Some(20),
            result_url: Some("https://cdn/a.png".into()),
            ..JobDelta::default()
        });
        assert!(matches!(rx.try_recv().unwrap(), JobEvent::Updated(_)));
        assert_eq!(
            rx.try_recv().unwrap(),
            JobEvent::Completed {
                result_url: Some("https://cdn/a.png".into())
            }
        );

        let changed = job.update(JobDelta::failed(ErrorData::new(1, "late")));
        assert!(changed.is_empty());
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.error().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn worker_status_translation() {
        assert_eq!(
            JobStatus::from_worker(WorkerJobStatus::JobProgress, None),
            Some(JobStatus::Processing)
        );
        assert_eq!(
            JobStatus::from_worker(WorkerJobStatus::JobError, Some("artistCanceled")),
            Some(JobStatus::Canceled)
        );
        assert_eq!(
            JobStatus::from_worker(WorkerJobStatus::JobCompleted, Some("jobCompleted")),
            Some(JobStatus::Completed)
        );
        assert_eq!(JobStatus::from_worker(WorkerJobStatus::Unknown, None), None);
    }

    #[test]
    fn serialized_job_uses_wire_names() {
        let mut data = JobData::pending("J1", "P1", 20);
        data.is_nsfw = Some(false);
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["projectId"], "P1");
        assert_eq!(json["stepCount"], 20);
        assert_eq!(json["isNSFW"], false);
        assert_eq!(json["status"], "pending");
    }
}
