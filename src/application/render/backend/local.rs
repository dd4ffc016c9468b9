use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::application::render::types::{RenderError, RenderRequest, Theme};

use super::syntax::check_mermaid_syntax;
use super::validate::{ArtifactValidator, MermaidErrorImageValidator};
use super::{BackendKind, RenderBackend};

/// In-process renderer for the local dialect. Implementations fail by
/// returning an error, but may also hand back an error image that only the
/// validator recognises.
#[async_trait]
pub trait LocalRenderer: Send + Sync {
    async fn render(&self, source: &str, theme: Theme) -> Result<String, RenderError>;
}

type SyntaxCheck = fn(&str) -> Result<(), RenderError>;

/// Local backend: validate, render, then scan the output for soft failures.
pub struct LocalBackend {
    renderer: Arc<dyn LocalRenderer>,
    validator: Arc<dyn ArtifactValidator>,
    syntax_check: SyntaxCheck,
}

impl LocalBackend {
    /// Mermaid-flavoured backend: Mermaid syntax check and error-image scan.
    pub fn mermaid(renderer: Arc<dyn LocalRenderer>) -> Self {
        Self {
            renderer,
            validator: Arc::new(MermaidErrorImageValidator),
            syntax_check: check_mermaid_syntax,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn ArtifactValidator>) -> Self {
        self.validator = validator;
        self
    }
}

#[async_trait]
impl RenderBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
        let started_at = Instant::now();

        (self.syntax_check)(&request.source)?;

        let artifact = self
            .renderer
            .render(&request.source, request.theme)
            .await?;

        if let Err(err) = self.validator.validate(&artifact) {
            warn!(
                op = "local_backend::render",
                result = "soft_failure",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                dialect = %request.dialect,
                error = %err,
                "Local renderer returned an error image"
            );
            return Err(err);
        }

        debug!(
            op = "local_backend::render",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            artifact_bytes = artifact.len(),
            "Local render completed"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::application::render::types::Dialect;

    struct CannedRenderer {
        response: Result<String, RenderError>,
        calls: Mutex<Vec<(String, Theme)>>,
    }

    impl CannedRenderer {
        fn new(response: Result<String, RenderError>) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, Theme)> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl LocalRenderer for CannedRenderer {
        async fn render(&self, source: &str, theme: Theme) -> Result<String, RenderError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((source.to_string(), theme));
            self.response.clone()
        }
    }

    fn request(source: &str) -> RenderRequest {
        RenderRequest::new(source, Dialect::Mermaid, Theme::Forest)
    }

    #[tokio::test]
    async fn valid_source_is_rendered_with_theme() {
        let renderer = CannedRenderer::new(Ok("<svg>ok</svg>".to_string()));
        let backend = LocalBackend::mermaid(renderer.clone());

        let svg = backend
            .render(&request("graph TD\n A-->B"))
            .await
            .expect("rendered");
        assert_eq!(svg, "<svg>ok</svg>");
        assert_eq!(
            renderer.calls(),
            vec![("graph TD\n A-->B".to_string(), Theme::Forest)]
        );
    }

    #[tokio::test]
    async fn hard_syntax_error_skips_renderer() {
        let renderer = CannedRenderer::new(Ok("<svg/>".to_string()));
        let backend = LocalBackend::mermaid(renderer.clone());

        let err = backend
            .render(&request("A-->B\n  B-->C"))
            .await
            .expect_err("syntax error");
        assert!(matches!(err, RenderError::Syntax { .. }));
        assert!(renderer.calls().is_empty());
    }

    #[tokio::test]
    async fn error_image_is_converted_into_soft_failure() {
        let renderer = CannedRenderer::new(Ok(
            r#"<svg><text class="error-text">Syntax error in text</text></svg>"#.to_string(),
        ));
        let backend = LocalBackend::mermaid(renderer);

        let err = backend
            .render(&request("graph TD\n A-->"))
            .await
            .expect_err("soft failure");
        assert_eq!(err, RenderError::soft_failure("Syntax error in text"));
    }

    #[tokio::test]
    async fn renderer_errors_propagate_verbatim() {
        let renderer = CannedRenderer::new(Err(RenderError::renderer("mmdc crashed")));
        let backend = LocalBackend::mermaid(renderer);

        let err = backend
            .render(&request("graph TD\n A-->B"))
            .await
            .expect_err("renderer error");
        assert_eq!(err, RenderError::renderer("mmdc crashed"));
    }

    #[tokio::test]
    async fn custom_validator_replaces_error_image_scan() {
        struct RejectAll;
        impl ArtifactValidator for RejectAll {
            fn validate(&self, _artifact: &str) -> Result<(), RenderError> {
                Err(RenderError::soft_failure("rejected"))
            }
        }

        let renderer = CannedRenderer::new(Ok("<svg>fine</svg>".to_string()));
        let backend = LocalBackend::mermaid(renderer).with_validator(Arc::new(RejectAll));
        let err = backend
            .render(&request("graph TD\n A-->B"))
            .await
            .expect_err("custom validator");
        assert_eq!(err, RenderError::soft_failure("rejected"));
    }
}
