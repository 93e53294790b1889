// REST payload types.
//
// Only the fields the client reconciles against are modeled; everything
// else the server sends is ignored.

use serde::{Deserialize, Serialize};

// ── Projects ─────────────────────────────────────────────────────────

/// Project status as reported by `GET /v1/projects/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RawProjectStatus {
    Pending,
    Active,
    Assigned,
    Progress,
    Errored,
    Completed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// Server-side snapshot of a project.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProject {
    pub id: String,
    pub image_count: u32,
    pub step_count: u32,
    #[serde(default)]
    pub preview_count: u32,
    pub status: RawProjectStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub worker_jobs: Vec<RawJob>,
    #[serde(default)]
    pub completed_worker_jobs: Vec<RawJob>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectResponse {
    pub project: RawProject,
}

// ── Worker jobs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum WorkerJobStatus {
    Created,
    Queued,
    Assigned,
    InitiatingModel,
    JobStarted,
    JobProgress,
    JobCompleted,
    JobError,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawWorker {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Server-side snapshot of one work unit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawJob {
    pub id: String,
    #[serde(rename = "imgID", default)]
    pub img_id: Option<String>,
    #[serde(default)]
    pub worker: RawWorker,
    pub status: WorkerJobStatus,
    /// `artistCanceled`, `jobCompleted`, `workerDisconnected`, ...
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub performed_steps: u32,
    #[serde(rename = "triggeredNSFWFilter", default)]
    pub triggered_nsfw_filter: bool,
    #[serde(default)]
    pub seed_used: Option<u64>,
}

// ── Image URLs ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ImageUrlType {
    Preview,
    Complete,
    StartingImage,
    CnImage,
}

/// Query for a presigned upload or download URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageUrlParams {
    pub image_id: String,
    pub job_id: String,
    pub kind: ImageUrlType,
}

impl ImageUrlParams {
    pub(crate) fn query(&self) -> [(&'static str, String); 3] {
        [
            ("imageId", self.image_id.clone()),
            ("jobId", self.job_id.clone()),
            ("type", self.kind.to_string()),
        ]
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadUrlResponse {
    pub upload_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DownloadUrlResponse {
    pub download_url: String,
}
