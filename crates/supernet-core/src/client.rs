// ── Client facade ──
//
// One session plus the registry that tracks its projects. Most
// applications only need this type.

use std::sync::Arc;

use supernet_api::{Network, Tokens};

use crate::config::ClientConfig;
use crate::error::CoreError;
use crate::model::{Project, ProjectParams};
use crate::registry::ProjectRegistry;
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct SupernetClient {
    session: Session,
    projects: ProjectRegistry,
}

impl SupernetClient {
    /// Build the client. Must be called inside a Tokio runtime; nothing
    /// connects until [`authenticate`](Self::authenticate).
    pub fn new(config: ClientConfig) -> Result<Self, CoreError> {
        let session = Session::new(config)?;
        let projects =
            ProjectRegistry::new(Arc::new(session.clone()), session.config().timings.clone());
        Ok(Self { session, projects })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn projects(&self) -> &ProjectRegistry {
        &self.projects
    }

    pub async fn authenticate(&self, tokens: Tokens) -> Result<(), CoreError> {
        self.session.authenticate(tokens).await
    }

    pub async fn logout(&self) {
        self.session.remove_auth().await;
    }

    pub async fn switch_network(&self, network: Network) -> Result<Network, CoreError> {
        self.session.switch_network(network).await
    }

    /// Shorthand for [`ProjectRegistry::create`].
    pub async fn create_project(&self, params: ProjectParams) -> Result<Project, CoreError> {
        self.projects.create(params).await
    }

    pub async fn shutdown(&self) {
        self.projects.shutdown();
        self.session.shutdown().await;
    }
}
