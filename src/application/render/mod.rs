//! Live diagram preview rendering.
//!
//! Edits to a `(source, dialect, theme)` triple flow through a debounce gate
//! into the [`RenderCoordinator`], which serves repeats from a bounded FIFO
//! cache, admits at most one backend run at a time and reports every outcome
//! to a [`RenderConsumer`]. Mermaid renders locally through the Mermaid CLI;
//! every other dialect goes to a Kroki-compatible HTTP service.

pub mod backend;
mod cache;
mod coordinator;
mod fingerprint;
mod publish;
mod retry;
mod runtime;
mod types;

pub use backend::{
    BackendDispatcher, BackendKind, LocalBackend, LocalRenderer, MermaidCliRenderer,
    RemoteBackend, RemoteSettings, RenderBackend,
};
pub use cache::{DEFAULT_CACHE_CAPACITY, RenderCache};
pub use coordinator::{
    CoordinatorClosed, CoordinatorHandle, CoordinatorSettings, DEFAULT_DEBOUNCE, Edit,
    RenderCoordinator, StalePolicy,
};
pub use fingerprint::Fingerprint;
pub use publish::{NoopConsumer, PipelineState, PreviewSnapshot, RenderConsumer};
pub use retry::{DEFAULT_MANUAL_RETRY_COOLDOWN, ManualRetryController, RetryThrottled};
pub use runtime::RunTrigger;
pub use types::{
    Dialect, OutputFormat, RenderError, RenderOutcome, RenderRequest, Theme, UnknownVariant,
};
