// ── Project registry ──
//
// Owns the active project set. Push events from the session are routed
// here in arrival order on a single dispatch task; REST recovery, URL
// lookups, and uploads run on their own tasks and funnel back through the
// same `Project` update primitives.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_core::Stream;
use tokio::sync::{broadcast, watch};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use supernet_api::wire::{
    JobErrorData, JobProgressData, JobResultData, JobStateData, WorkerAssignment,
};
use supernet_api::{
    ClientMessage, EventBus, ImageUrlParams, ImageUrlType, JobCancelMessage, RawJob, RawProject,
    ServerEvent,
};

use crate::cache::TtlCache;
use crate::config::Timings;
use crate::error::CoreError;
use crate::model::{
    AvailableModel, ErrorData, ImageInput, JobData, JobDelta, JobStatus, Project, ProjectDelta,
    ProjectParams, ProjectStatus,
};
use crate::request::build_job_request;
use crate::schedule::ScheduledTask;
use crate::session::{ProjectBackend, SessionEvent};
use crate::stream::lossy_stream;

const REGISTRY_EVENT_CAPACITY: usize = 1024;

// ── Routed events ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectUpdate {
    Queued { queue_position: i64 },
    Completed,
    Error(ErrorData),
}

/// Worker details carried by `initiating` and `started`. Prompts are only
/// present when the project used dynamic prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub worker_name: String,
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub job_index: Option<u32>,
}

impl From<&WorkerAssignment> for WorkerInfo {
    fn from(a: &WorkerAssignment) -> Self {
        Self {
            worker_name: a.worker_name.clone(),
            positive_prompt: a.positive_prompt.clone(),
            negative_prompt: a.negative_prompt.clone(),
            job_index: a.job_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Initiating(WorkerInfo),
    Started(WorkerInfo),
    Progress { step: u32, step_count: u32 },
    Preview { url: String },
    Completed {
        steps: u32,
        seed: Option<u64>,
        /// Withheld when the NSFW filter fired or the user canceled.
        result_url: Option<String>,
        is_nsfw: bool,
        user_canceled: bool,
    },
    Error(ErrorData),
}

impl JobUpdate {
    fn into_delta(self) -> JobDelta {
        match self {
            Self::Initiating(w) => worker_delta(JobStatus::Initiating, w),
            Self::Started(w) => worker_delta(JobStatus::Processing, w),
            Self::Progress { step, step_count } => JobDelta {
                status: Some(JobStatus::Processing),
                step: Some(step),
                step_count: Some(step_count),
                ..JobDelta::default()
            },
            Self::Preview { url } => JobDelta {
                preview_url: Some(url),
                ..JobDelta::default()
            },
            Self::Completed {
                steps,
                seed,
                result_url,
                is_nsfw,
                user_canceled,
            } => JobDelta {
                status: Some(if user_canceled {
                    JobStatus::Canceled
                } else {
                    JobStatus::Completed
                }),
                step: Some(steps),
                seed,
                result_url,
                is_nsfw: Some(is_nsfw),
                user_canceled: Some(user_canceled),
                ..JobDelta::default()
            },
            Self::Error(error) => JobDelta::failed(error),
        }
    }

    /// Whether this update means a worker is busy on the project.
    fn marks_processing(&self) -> bool {
        matches!(self, Self::Progress { .. })
    }
}

fn worker_delta(status: JobStatus, w: WorkerInfo) -> JobDelta {
    JobDelta {
        status: Some(status),
        worker_name: Some(w.worker_name),
        positive_prompt: w.positive_prompt,
        negative_prompt: w.negative_prompt,
        job_index: w.job_index,
        ..JobDelta::default()
    }
}

/// Everything the registry announces, whether or not the project is
/// tracked locally.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Project {
        project_id: String,
        update: ProjectUpdate,
    },
    Job {
        project_id: String,
        job_id: String,
        update: JobUpdate,
    },
    AvailableModels(Arc<Vec<AvailableModel>>),
}

// ── Registry ─────────────────────────────────────────────────────────

/// Cheaply cloneable handle to the active project set.
#[derive(Clone)]
pub struct ProjectRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    backend: Arc<dyn ProjectBackend>,
    timings: Timings,
    projects: DashMap<String, Project>,
    gc_tasks: DashMap<String, ScheduledTask>,
    models: watch::Sender<Arc<Vec<AvailableModel>>>,
    url_cache: TtlCache<ImageUrlParams, String>,
    events: EventBus<RegistryEvent>,
    cancel: CancellationToken,
    _sweeper: ScheduledTask,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ProjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectRegistry")
            .field("active", &self.inner.projects.len())
            .field("cached_urls", &self.inner.url_cache.len())
            .finish_non_exhaustive()
    }
}

impl ProjectRegistry {
    /// Start routing the backend's events. Must be called inside a Tokio
    /// runtime.
    pub fn new(backend: Arc<dyn ProjectBackend>, timings: Timings) -> Self {
        let rx = backend.subscribe();
        let url_cache = TtlCache::new(timings.url_cache_ttl);
        let sweeper = url_cache.spawn_sweeper(timings.cache_sweep_interval);
        let (models, _) = watch::channel(Arc::new(Vec::new()));
        let cancel = CancellationToken::new();

        let inner = Arc::new(RegistryInner {
            backend,
            timings,
            projects: DashMap::new(),
            gc_tasks: DashMap::new(),
            models,
            url_cache,
            events: EventBus::new(REGISTRY_EVENT_CAPACITY),
            cancel: cancel.clone(),
            _sweeper: sweeper,
        });
        tokio::spawn(dispatch(Arc::downgrade(&inner), cancel, rx));
        Self { inner }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    /// [`subscribe`](Self::subscribe) as a `Stream`; lag gaps are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = RegistryEvent> + Send + Unpin + use<> {
        lossy_stream(self.subscribe())
    }

    /// A tracked project. Finished projects drop out after the GC delay.
    pub fn project(&self, id: &str) -> Option<Project> {
        self.inner.project(id)
    }

    pub fn projects(&self) -> Vec<Project> {
        self.inner
            .projects
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn available_models(&self) -> Arc<Vec<AvailableModel>> {
        self.inner.models.borrow().clone()
    }

    /// Resolve once the network has announced at least one model.
    pub async fn wait_for_models(
        &self,
        timeout: Duration,
    ) -> Result<Arc<Vec<AvailableModel>>, CoreError> {
        let mut rx = self.inner.models.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|m| !m.is_empty())).await {
            Ok(Ok(models)) => Ok(models.clone()),
            Ok(Err(_)) => Err(CoreError::Internal("model channel closed".into())),
            Err(_) => Err(CoreError::Timeout {
                what: "available models".into(),
            }),
        }
    }

    /// Upload inputs, register the project, then send the request.
    pub async fn create(&self, params: ProjectParams) -> Result<Project, CoreError> {
        let project = Project::new(params.clone());
        let id = project.id().to_owned();
        let request = build_job_request(&id, &params)?;

        if let Some(ImageInput::Bytes(body)) = &params.starting_image {
            self.inner
                .upload(&id, ImageUrlType::StartingImage, body.clone(), "guide image")
                .await?;
        }
        if let Some(ImageInput::Bytes(body)) =
            params.control_net.as_ref().and_then(|cn| cn.image.as_ref())
        {
            self.inner
                .upload(&id, ImageUrlType::CnImage, body.clone(), "ControlNet image")
                .await?;
        }

        // Registered before the send so an immediate reply finds it.
        self.inner.projects.insert(id.clone(), project.clone());
        self.inner.arm_timeout(&project);

        if let Err(e) = self.inner.backend.send(ClientMessage::JobRequest(request)).await {
            warn!(project_id = %id, error = %e, "job request failed");
            self.inner.projects.remove(&id);
            project.disarm_timer();
            return Err(e);
        }
        info!(project_id = %id, model = %params.model_id, images = params.number_of_images, "project created");
        Ok(project)
    }

    /// Cancel locally at once, then tell the server.
    ///
    /// Events for the project that arrive afterwards are ignored.
    pub async fn cancel(&self, id: &str) -> Result<(), CoreError> {
        let Some((_, project)) = self.inner.projects.remove(id) else {
            return Err(CoreError::ProjectNotFound { id: id.to_owned() });
        };
        self.inner.gc_tasks.remove(id);
        project.force_cancel();
        info!(project_id = %id, "project canceled");

        self.inner
            .backend
            .send(ClientMessage::JobError(JobCancelMessage::artist_canceled(id)))
            .await
    }

    /// Pull a project's state over REST and merge it in.
    pub async fn sync_project(&self, id: &str) -> Result<(), CoreError> {
        let project = self
            .project(id)
            .ok_or_else(|| CoreError::ProjectNotFound { id: id.to_owned() })?;
        self.inner.sync(&project).await
    }

    /// Stop routing and drop every timer. Project handles stay readable.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        for entry in &self.inner.projects {
            entry.value().disarm_timer();
        }
        self.inner.gc_tasks.clear();
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────

async fn dispatch(
    inner: Weak<RegistryInner>,
    cancel: CancellationToken,
    mut rx: broadcast::Receiver<SessionEvent>,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Ok(event) => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.on_session_event(event);
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "registry lagged behind session events"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("registry dispatch stopped");
}

impl RegistryInner {
    fn project(&self, id: &str) -> Option<Project> {
        self.projects.get(id).map(|e| e.value().clone())
    }

    fn on_session_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Message(msg) => self.on_server_event(&msg),
            SessionEvent::Disconnected { code, reason } => {
                warn!(?code, %reason, active = self.projects.len(), "failing active projects");
                self.set_models(Vec::new());
                let projects: Vec<Project> =
                    self.projects.iter().map(|e| e.value().clone()).collect();
                for project in projects {
                    project.update(ProjectDelta::failed(ErrorData::new(0, "Server disconnected")));
                    self.after_update(&project);
                }
            }
            SessionEvent::CredentialsUpdated { .. } => {
                debug!("credentials changed; clearing URL cache");
                self.url_cache.clear();
            }
            SessionEvent::Connected { network } => {
                debug!(%network, "session connected");
            }
        }
    }

    fn on_server_event(self: &Arc<Self>, event: &ServerEvent) {
        match event {
            ServerEvent::JobState(state) => self.on_job_state(state),
            ServerEvent::JobProgress(progress) => self.on_job_progress(progress),
            ServerEvent::JobResult(result) => self.on_job_result(result.clone()),
            ServerEvent::JobError(error) => self.on_job_error(error),
            ServerEvent::SwarmModels(models) => self.on_swarm_models(models),
            ServerEvent::ChangeNetwork(data) => {
                debug!(network = %data.network, "network changed; clearing models");
                self.set_models(Vec::new());
            }
            ServerEvent::ArtistCancelConfirmation(c) => {
                debug!(project_id = %c.job_id, did_cancel = c.did_cancel, "cancel confirmed");
            }
            ServerEvent::ToastMessage(t) => {
                info!(kind = %t.kind, message = %t.message, "server notice");
            }
            other => trace!(kind = other.kind(), "push event ignored by registry"),
        }
    }

    // ── Translation ──────────────────────────────────────────────────

    fn on_job_state(self: &Arc<Self>, state: &JobStateData) {
        match state {
            JobStateData::Queued {
                job_id,
                queue_position,
            } => self.route_project(
                job_id,
                ProjectUpdate::Queued {
                    queue_position: *queue_position,
                },
            ),
            JobStateData::JobCompleted { job_id } => {
                self.route_project(job_id, ProjectUpdate::Completed);
            }
            JobStateData::InitiatingModel(a) => {
                self.route_job(&a.job_id, &a.img_id, JobUpdate::Initiating(a.into()));
            }
            JobStateData::JobStarted(a) => {
                self.route_job(&a.job_id, &a.img_id, JobUpdate::Started(a.into()));
            }
        }
    }

    fn on_job_progress(self: &Arc<Self>, data: &JobProgressData) {
        self.route_job(
            &data.job_id,
            &data.img_id,
            JobUpdate::Progress {
                step: data.step,
                step_count: data.step_count,
            },
        );
        if !data.has_image {
            return;
        }

        let inner = Arc::clone(self);
        let (project_id, job_id) = (data.job_id.clone(), data.img_id.clone());
        tokio::spawn(async move {
            match inner.image_url(&project_id, &job_id, ImageUrlType::Preview).await {
                Ok(url) => inner.route_job(&project_id, &job_id, JobUpdate::Preview { url }),
                Err(e) => warn!(%project_id, %job_id, error = %e, "preview URL lookup failed"),
            }
        });
    }

    /// Result URLs need a REST round trip, so results are finished off
    /// the dispatch path.
    fn on_job_result(self: &Arc<Self>, data: JobResultData) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let disable_filter = inner
                .project(&data.job_id)
                .is_none_or(|p| p.params().disable_nsfw_filter);
            let passes_nsfw = !data.triggered_nsfw_filter || disable_filter;

            let result_url = if passes_nsfw && !data.user_canceled {
                match inner
                    .image_url(&data.job_id, &data.img_id, ImageUrlType::Complete)
                    .await
                {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!(project_id = %data.job_id, job_id = %data.img_id, error = %e, "result URL lookup failed");
                        None
                    }
                }
            } else {
                None
            };

            inner.route_job(
                &data.job_id,
                &data.img_id,
                JobUpdate::Completed {
                    steps: data.performed_step_count,
                    seed: data.last_seed,
                    result_url,
                    is_nsfw: data.triggered_nsfw_filter,
                    user_canceled: data.user_canceled,
                },
            );
        });
    }

    fn on_job_error(self: &Arc<Self>, data: &JobErrorData) {
        let error = ErrorData::from_server(&data.error, data.error_message.clone());
        match &data.img_id {
            None => self.route_project(&data.job_id, ProjectUpdate::Error(error)),
            Some(img_id) => self.route_job(&data.job_id, img_id, JobUpdate::Error(error)),
        }
    }

    fn on_swarm_models(&self, models: &BTreeMap<String, u32>) {
        let list = models
            .iter()
            .map(|(id, count)| AvailableModel::new(id.clone(), *count))
            .collect();
        self.set_models(list);
    }

    fn set_models(&self, models: Vec<AvailableModel>) {
        let models = Arc::new(models);
        debug!(count = models.len(), "available models updated");
        self.models.send_replace(Arc::clone(&models));
        self.events.emit(RegistryEvent::AvailableModels(models));
    }

    // ── Routing ──────────────────────────────────────────────────────

    fn route_project(self: &Arc<Self>, project_id: &str, update: ProjectUpdate) {
        self.events.emit(RegistryEvent::Project {
            project_id: project_id.to_owned(),
            update: update.clone(),
        });
        let Some(project) = self.project(project_id) else {
            debug!(project_id, "event for untracked project dropped");
            return;
        };

        let delta = match update {
            ProjectUpdate::Queued { queue_position } => ProjectDelta {
                status: Some(ProjectStatus::Queued),
                queue_position: Some(queue_position),
                ..ProjectDelta::default()
            },
            ProjectUpdate::Completed => ProjectDelta::status(ProjectStatus::Completed),
            ProjectUpdate::Error(error) => ProjectDelta::failed(error),
        };
        project.update(delta);
        self.after_update(&project);
    }

    fn route_job(self: &Arc<Self>, project_id: &str, job_id: &str, update: JobUpdate) {
        self.events.emit(RegistryEvent::Job {
            project_id: project_id.to_owned(),
            job_id: job_id.to_owned(),
            update: update.clone(),
        });
        let Some(project) = self.project(project_id) else {
            debug!(project_id, job_id, "job event for untracked project dropped");
            return;
        };

        let step_count = project.params().steps;
        let job = project.job_or_insert(job_id, || {
            JobData::pending(job_id, project_id, step_count)
        });
        let processing = update.marks_processing();
        project.update_job(&job, update.into_delta());
        if processing {
            project.update(ProjectDelta::status(ProjectStatus::Processing));
        }
        self.after_update(&project);
    }

    /// Schedule the final sync and removal once a project has ended.
    fn after_update(self: &Arc<Self>, project: &Project) {
        if !project.is_finished() {
            return;
        }
        let id = project.id().to_owned();
        if self.gc_tasks.contains_key(&id) || !self.projects.contains_key(&id) {
            return;
        }

        let weak = Arc::downgrade(self);
        let gc_id = id.clone();
        let task = ScheduledTask::after(self.timings.gc_delay, move || async move {
            if let Some(inner) = weak.upgrade() {
                inner.projects.remove_if(&gc_id, |_, p| p.is_finished());
                inner.gc_tasks.remove(&gc_id);
                debug!(project_id = %gc_id, "finished project released");
            }
        });
        self.gc_tasks.insert(id, task);

        let inner = Arc::clone(self);
        let finished = project.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.sync(&finished).await {
                debug!(project_id = %finished.id(), error = %e, "final sync failed");
            }
        });
    }

    // ── Timeout recovery ─────────────────────────────────────────────

    fn arm_timeout(self: &Arc<Self>, project: &Project) {
        let weak = Arc::downgrade(self);
        let tracked = project.clone();
        let period = self.timings.project_timeout;
        let task = ScheduledTask::interval(period, move || {
            let weak = weak.clone();
            let project = tracked.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.check_timeout(&project, period).await;
                }
            }
        });
        project.arm_timer(task);
    }

    async fn check_timeout(self: &Arc<Self>, project: &Project, window: Duration) {
        if project.is_finished() || project.last_updated().elapsed() < window {
            return;
        }
        debug!(project_id = %project.id(), "no updates; pulling project state");

        match self.sync(project).await {
            Ok(()) => project.reset_failed_syncs(),
            Err(e) => {
                let failures = project.record_failed_sync();
                warn!(project_id = %project.id(), failures, error = %e, "project sync failed");
                if failures >= self.timings.max_failed_syncs {
                    warn!(project_id = %project.id(), "giving up on project");
                    project.force_timeout();
                    self.after_update(project);
                }
            }
        }
    }

    /// Merge a REST snapshot into the local project.
    async fn sync(self: &Arc<Self>, project: &Project) -> Result<(), CoreError> {
        let raw = self.backend.fetch_project(project.id()).await?;
        let params = project.params();

        for (job_id, raw_job) in raw_jobs(&raw) {
            // Unknown jobs start pending so the snapshot goes through the
            // normal update path, result URL included.
            let job = project.job_or_insert(&job_id, || {
                JobData::pending(&job_id, project.id(), raw.step_count)
            });
            let mut delta = JobDelta::from_raw(raw_job);

            let completed = delta.status == Some(JobStatus::Completed);
            let passes_nsfw = !raw_job.triggered_nsfw_filter || params.disable_nsfw_filter;
            if completed && passes_nsfw && job.result_url().is_none() {
                match self
                    .image_url(project.id(), &job_id, ImageUrlType::Complete)
                    .await
                {
                    Ok(url) => delta.result_url = Some(url),
                    Err(e) => debug!(%job_id, error = %e, "result URL unavailable during sync"),
                }
            }
            project.update_job(&job, delta);
        }

        let mut synced = params;
        synced.number_of_images = raw.image_count;
        synced.steps = raw.step_count;
        synced.number_of_previews = Some(raw.preview_count);
        project.update(ProjectDelta {
            params: Some(synced),
            status: ProjectStatus::from_raw(raw.status),
            ..ProjectDelta::default()
        });
        debug!(project_id = %project.id(), status = %project.status(), "project synced");
        self.after_update(project);
        Ok(())
    }

    // ── URLs ─────────────────────────────────────────────────────────

    async fn image_url(
        &self,
        project_id: &str,
        job_id: &str,
        kind: ImageUrlType,
    ) -> Result<String, CoreError> {
        let params = ImageUrlParams {
            image_id: job_id.to_owned(),
            job_id: project_id.to_owned(),
            kind,
        };
        if let Some(url) = self.url_cache.get(&params) {
            return Ok(url);
        }
        let url = self.backend.download_url(&params).await?;
        self.url_cache.insert(params, url.clone());
        Ok(url)
    }

    async fn upload(
        &self,
        project_id: &str,
        kind: ImageUrlType,
        body: bytes::Bytes,
        what: &str,
    ) -> Result<(), CoreError> {
        let params = ImageUrlParams {
            image_id: uuid::Uuid::new_v4().to_string().to_uppercase(),
            job_id: project_id.to_owned(),
            kind,
        };
        debug!(project_id, %kind, bytes = body.len(), "uploading {what}");
        self.backend.upload_image(&params, body, what).await
    }
}

/// Worker jobs keyed by image id. Completed records win over live ones.
fn raw_jobs(raw: &RawProject) -> BTreeMap<String, &RawJob> {
    raw.worker_jobs
        .iter()
        .chain(&raw.completed_worker_jobs)
        .map(|job| {
            let id = job.img_id.as_ref().map_or_else(
                || uuid::Uuid::new_v4().to_string().to_uppercase(),
                |id| id.to_uppercase(),
            );
            (id, job)
        })
        .collect()
}
