//! Render backends and the dispatcher that routes requests between them.

mod local;
mod mermaid;
mod remote;
mod syntax;
mod validate;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use metrics::counter;
use tracing::debug;

use super::types::{Dialect, RenderError, RenderRequest};

pub use local::{LocalBackend, LocalRenderer};
pub use mermaid::MermaidCliRenderer;
pub use remote::{
    DEFAULT_REMOTE_BASE_URL, DEFAULT_REMOTE_MAX_RETRIES, DEFAULT_REMOTE_RETRY_DELAY,
    DEFAULT_REMOTE_TIMEOUT, RemoteBackend, RemoteSettings,
};
pub use validate::{ArtifactValidator, MermaidErrorImageValidator, RemoteBodyValidator};

const METRIC_BACKEND_INVOCATIONS: &str = "ritratto_render_backend_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Local,
    Remote,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A renderer the dispatcher can route to. Implementations return the
/// artifact text or a [`RenderError`]; success-shaped failures must already
/// have been converted by the backend's validator.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError>;
}

/// Routes the designated local dialect in-process and everything else to the
/// remote service.
#[derive(Clone)]
pub struct BackendDispatcher {
    local_dialect: Dialect,
    local: Arc<dyn RenderBackend>,
    remote: Arc<dyn RenderBackend>,
}

impl BackendDispatcher {
    pub fn new(
        local_dialect: Dialect,
        local: Arc<dyn RenderBackend>,
        remote: Arc<dyn RenderBackend>,
    ) -> Self {
        Self {
            local_dialect,
            local,
            remote,
        }
    }

    pub fn local_dialect(&self) -> Dialect {
        self.local_dialect
    }

    pub fn route(&self, dialect: Dialect) -> &Arc<dyn RenderBackend> {
        if dialect == self.local_dialect {
            &self.local
        } else {
            &self.remote
        }
    }

    pub async fn dispatch(&self, request: &RenderRequest) -> Result<String, RenderError> {
        if request.is_blank() {
            return Err(RenderError::syntax("diagram source is empty"));
        }

        let backend = self.route(request.dialect);
        counter!(METRIC_BACKEND_INVOCATIONS, "backend" => backend.kind().as_str()).increment(1);
        debug!(
            op = "dispatcher::dispatch",
            backend = %backend.kind(),
            dialect = %request.dialect,
            source_bytes = request.source.len(),
            "Dispatching render request"
        );
        backend.render(request).await
    }
}
