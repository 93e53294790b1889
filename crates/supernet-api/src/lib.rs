// supernet-api: transport layer for the Supernet job-dispatch service
//
// Credentials, REST, and the push socket. Everything above the wire
// (projects, jobs, reconnection policy) lives in supernet-core.

pub mod auth;
pub mod bus;
pub mod error;
pub mod rest;
pub mod socket;
pub mod transport;
pub mod types;
pub mod wire;

pub use auth::{CredentialEvent, CredentialManager, Tokens};
pub use bus::EventBus;
pub use error::{Error, RenewalError};
pub use rest::RestClient;
pub use socket::{ConnectionManager, SocketConfig, SocketEvent, SocketState};
pub use transport::{TlsMode, TransportConfig};
pub use types::{ImageUrlParams, ImageUrlType, RawJob, RawProject, RawProjectStatus, WorkerJobStatus};
pub use wire::{ClientMessage, JobCancelMessage, Network, ServerEvent};
