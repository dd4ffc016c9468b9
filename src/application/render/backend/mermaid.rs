use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::PathBuf,
    process::{Command, Stdio},
    time::Instant,
};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::render::types::{RenderError, Theme};

use super::local::LocalRenderer;

#[derive(Debug, Error)]
pub(crate) enum MermaidCliError {
    #[error("failed to write temporary file: {0}")]
    Io(io::Error),
    #[error("mermaid CLI invocation failed (exit {exit_code:?}): {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("mermaid CLI unavailable: {0}")]
    NotFound(io::Error),
    #[error("failed to read rendered SVG: {0}")]
    Read(io::Error),
    #[error("mermaid CLI worker stopped: {0}")]
    Join(String),
}

impl From<MermaidCliError> for RenderError {
    fn from(err: MermaidCliError) -> Self {
        RenderError::renderer(err.to_string())
    }
}

/// Renders Mermaid through the `mmdc` executable on a blocking worker thread.
#[derive(Debug, Clone)]
pub struct MermaidCliRenderer {
    cli_path: PathBuf,
}

impl MermaidCliRenderer {
    pub fn new(cli_path: impl Into<PathBuf>) -> Self {
        Self {
            cli_path: cli_path.into(),
        }
    }

    fn render_blocking(&self, source: &str, theme: Theme) -> Result<String, MermaidCliError> {
        let started_at = Instant::now();

        let mut input_file = NamedTempFile::new().map_err(MermaidCliError::Io)?;
        input_file
            .write_all(source.as_bytes())
            .map_err(MermaidCliError::Io)?;
        input_file.flush().map_err(MermaidCliError::Io)?;

        let output_file = tempfile::Builder::new()
            .suffix(".svg")
            .tempfile()
            .map_err(MermaidCliError::Io)?;
        let output_path = output_file.path().to_path_buf();

        let output = Command::new(&self.cli_path)
            .arg("--input")
            .arg(input_file.path())
            .arg("--output")
            .arg(&output_path)
            .arg("--outputFormat")
            .arg("svg")
            .arg("--theme")
            .arg(theme.as_str())
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                warn!(
                    target = "application::render::mermaid",
                    op = "mermaid::render",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn_cli",
                    error = %err,
                    "Failed to spawn Mermaid CLI"
                );
                if err.kind() == ErrorKind::NotFound {
                    MermaidCliError::NotFound(err)
                } else {
                    MermaidCliError::Io(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                target = "application::render::mermaid",
                op = "mermaid::render",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "mermaid_cli",
                stderr = %stderr,
                "Mermaid CLI invocation failed"
            );
            return Err(MermaidCliError::Cli { exit_code, stderr });
        }

        let svg = fs::read_to_string(&output_path).map_err(MermaidCliError::Read)?;

        debug!(
            target = "application::render::mermaid",
            op = "mermaid::render",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            theme = %theme,
            svg_bytes = svg.len(),
            "Mermaid diagram rendered via CLI"
        );

        Ok(svg)
    }
}

#[async_trait]
impl LocalRenderer for MermaidCliRenderer {
    async fn render(&self, source: &str, theme: Theme) -> Result<String, RenderError> {
        let renderer = self.clone();
        let source = source.to_string();
        tokio::task::spawn_blocking(move || renderer.render_blocking(&source, theme))
            .await
            .map_err(|err| MermaidCliError::Join(err.to_string()))?
            .map_err(RenderError::from)
    }
}
