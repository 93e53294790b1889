// ── Domain model ──
//
// Projects, jobs, their request parameters, and failure data.

pub mod error_data;
pub mod job;
pub mod params;
pub mod project;

pub use error_data::{ErrorData, map_error_code};
pub use job::{Job, JobData, JobDelta, JobEvent, JobField, JobStatus};
pub use params::{
    AvailableModel, ControlNetMode, ControlNetName, ControlNetParams, ImageInput, ProjectParams,
    TokenType,
};
pub use project::{
    Project, ProjectData, ProjectDelta, ProjectEvent, ProjectField, ProjectOutcome,
    ProjectStatus, SerializedProject,
};
