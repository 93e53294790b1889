//! Project and job tracking for Supernet clients.
//!
//! Sits on top of `supernet-api` and turns the raw push stream into
//! per-project state:
//!
//! - **[`Session`]**: transport facade. Installs credentials, opens the
//!   socket, and applies the reconnect policy: transient drops are retried
//!   against a small budget, close codes `4000..=4999` end the session and
//!   surface a single [`SessionEvent::Disconnected`].
//!
//! - **[`ProjectRegistry`]**: owns the active project set. Routes push
//!   events in arrival order, recovers silent projects over REST, releases
//!   finished ones after a grace period, and cancels locally first.
//!
//! - **[`Project`] / [`Job`]**: shared read handles with monotonic state
//!   machines, edge-triggered progress, and
//!   [`wait_for_completion`](Project::wait_for_completion).
//!
//! - **Building blocks**: [`MutableEntity`](entity::MutableEntity),
//!   [`TtlCache`](cache::TtlCache), and
//!   [`ScheduledTask`](schedule::ScheduledTask).
//!
//! - **Streams**: [`ProjectStream`] snapshots and a lag-tolerant
//!   registry event [`Stream`](futures_core::Stream).

pub mod cache;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod model;
pub mod registry;
pub mod request;
pub mod schedule;
pub mod session;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::SupernetClient;
pub use config::{ClientConfig, Network, Timings, TlsMode};
pub use error::CoreError;
pub use registry::{JobUpdate, ProjectRegistry, ProjectUpdate, RegistryEvent, WorkerInfo};
pub use session::{ProjectBackend, Session, SessionEvent};
pub use stream::{ProjectStream, ProjectWatchStream};

pub use model::{
    AvailableModel, ControlNetMode, ControlNetName, ControlNetParams, ErrorData, ImageInput, Job,
    JobData, JobEvent, JobStatus, Project, ProjectData, ProjectEvent, ProjectOutcome,
    ProjectParams, ProjectStatus, SerializedProject, TokenType,
};

pub use supernet_api::Tokens;
