use std::{fmt, str::FromStr};

use thiserror::Error;

/// Diagram languages understood by the preview surface.
///
/// Exactly one dialect is rendered in-process (see
/// [`BackendDispatcher`](super::BackendDispatcher)); every other dialect is
/// forwarded to the remote service using [`Dialect::as_str`] as the path
/// segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    #[default]
    Mermaid,
    PlantUml,
    C4PlantUml,
    Graphviz,
    D2,
    Ditaa,
    Erd,
    Nomnoml,
    Pikchr,
    Svgbob,
    Structurizr,
    Dbml,
    Bpmn,
    Excalidraw,
    WaveDrom,
    Vega,
    VegaLite,
    BlockDiag,
    SeqDiag,
}

impl Dialect {
    pub const ALL: [Dialect; 19] = [
        Dialect::Mermaid,
        Dialect::PlantUml,
        Dialect::C4PlantUml,
        Dialect::Graphviz,
        Dialect::D2,
        Dialect::Ditaa,
        Dialect::Erd,
        Dialect::Nomnoml,
        Dialect::Pikchr,
        Dialect::Svgbob,
        Dialect::Structurizr,
        Dialect::Dbml,
        Dialect::Bpmn,
        Dialect::Excalidraw,
        Dialect::WaveDrom,
        Dialect::Vega,
        Dialect::VegaLite,
        Dialect::BlockDiag,
        Dialect::SeqDiag,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Mermaid => "mermaid",
            Dialect::PlantUml => "plantuml",
            Dialect::C4PlantUml => "c4plantuml",
            Dialect::Graphviz => "graphviz",
            Dialect::D2 => "d2",
            Dialect::Ditaa => "ditaa",
            Dialect::Erd => "erd",
            Dialect::Nomnoml => "nomnoml",
            Dialect::Pikchr => "pikchr",
            Dialect::Svgbob => "svgbob",
            Dialect::Structurizr => "structurizr",
            Dialect::Dbml => "dbml",
            Dialect::Bpmn => "bpmn",
            Dialect::Excalidraw => "excalidraw",
            Dialect::WaveDrom => "wavedrom",
            Dialect::Vega => "vega",
            Dialect::VegaLite => "vegalite",
            Dialect::BlockDiag => "blockdiag",
            Dialect::SeqDiag => "seqdiag",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let needle = value.trim().to_ascii_lowercase();
        let alias = match needle.as_str() {
            "dot" => Some(Dialect::Graphviz),
            "puml" => Some(Dialect::PlantUml),
            "vega-lite" => Some(Dialect::VegaLite),
            _ => None,
        };
        alias
            .or_else(|| {
                Dialect::ALL
                    .into_iter()
                    .find(|dialect| dialect.as_str() == needle)
            })
            .ok_or_else(|| UnknownVariant::new("dialect", value))
    }
}

/// Visual theme. Only the local renderer consumes it, but it is always part of
/// the fingerprint so a theme switch never serves a stale artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Theme {
    #[default]
    Default,
    Dark,
    Forest,
    Neutral,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Default => "default",
            Theme::Dark => "dark",
            Theme::Forest => "forest",
            Theme::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" | "light" => Ok(Theme::Default),
            "dark" => Ok(Theme::Dark),
            "forest" => Ok(Theme::Forest),
            "neutral" => Ok(Theme::Neutral),
            _ => Err(UnknownVariant::new("theme", value)),
        }
    }
}

/// Artifact format requested from the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    #[default]
    Svg,
    Png,
    Pdf,
    Txt,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Png => "png",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Txt => "txt",
        }
    }

    /// Media type sent in the `Accept` header.
    pub fn media_type(self) -> &'static str {
        match self {
            OutputFormat::Svg => "image/svg+xml",
            OutputFormat::Png => "image/png",
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Txt => "text/plain",
        }
    }

    /// Binary formats travel through the pipeline as base64 text.
    pub fn is_binary(self) -> bool {
        matches!(self, OutputFormat::Png | OutputFormat::Pdf)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(OutputFormat::Svg),
            "png" => Ok(OutputFormat::Png),
            "pdf" => Ok(OutputFormat::Pdf),
            "txt" | "text" => Ok(OutputFormat::Txt),
            _ => Err(UnknownVariant::new("output format", value)),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Immutable snapshot of what the preview should show. Identity is its field
/// values; a new request is built on every relevant edit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderRequest {
    pub source: String,
    pub dialect: Dialect,
    pub theme: Theme,
}

impl RenderRequest {
    pub fn new(source: impl Into<String>, dialect: Dialect, theme: Theme) -> Self {
        Self {
            source: source.into(),
            dialect,
            theme,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    pub fn is_blank(&self) -> bool {
        self.source.trim().is_empty()
    }
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self::new(String::new(), Dialect::default(), Theme::default())
    }
}

/// Result of one completed pipeline run. Exactly one side is populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    pub artifact: Option<String>,
    pub error: Option<String>,
}

impl RenderOutcome {
    pub fn artifact(artifact: impl Into<String>) -> Self {
        Self {
            artifact: Some(artifact.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            artifact: None,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.artifact.is_some()
    }
}

/// Failures surfaced by the render pipeline. Every message carries enough
/// detail to tell the kinds apart without reading logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("syntax error: {message}")]
    Syntax { message: String },
    #[error("diagram renderer reported an error: {message}")]
    SoftFailure { message: String },
    #[error("render service returned HTTP {status} after {attempts} attempt(s): {body}")]
    Http {
        status: u16,
        body: String,
        attempts: u32,
    },
    #[error("render service did not respond within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("could not reach render service after {attempts} attempt(s): {message}")]
    Transport { message: String, attempts: u32 },
    #[error("local renderer failed: {message}")]
    Renderer { message: String },
    #[error("invalid render request: {message}")]
    Request { message: String },
    #[error("render task aborted: {reason}")]
    Aborted { reason: String },
}

impl RenderError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }

    pub fn soft_failure(message: impl Into<String>) -> Self {
        Self::SoftFailure {
            message: message.into(),
        }
    }

    pub fn renderer(message: impl Into<String>) -> Self {
        Self::Renderer {
            message: message.into(),
        }
    }

    /// Only HTTP and transport failures consume the remote retry budget.
    /// Timeouts are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http { .. } | Self::Transport { .. })
    }

    /// Stable short code used in log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "syntax",
            Self::SoftFailure { .. } => "soft_failure",
            Self::Http { .. } => "http",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::Renderer { .. } => "renderer",
            Self::Request { .. } => "request",
            Self::Aborted { .. } => "aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_parses_names_and_aliases() {
        assert_eq!("Mermaid".parse::<Dialect>(), Ok(Dialect::Mermaid));
        assert_eq!("dot".parse::<Dialect>(), Ok(Dialect::Graphviz));
        assert_eq!("vega-lite".parse::<Dialect>(), Ok(Dialect::VegaLite));
        assert!("visio".parse::<Dialect>().is_err());

        for dialect in Dialect::ALL {
            assert_eq!(dialect.as_str().parse::<Dialect>(), Ok(dialect));
        }
    }

    #[test]
    fn theme_parses_light_as_default() {
        assert_eq!("light".parse::<Theme>(), Ok(Theme::Default));
        assert_eq!(" DARK ".parse::<Theme>(), Ok(Theme::Dark));
        let err = "sepia".parse::<Theme>().expect_err("unknown theme");
        assert_eq!(err.to_string(), "unknown theme `sepia`");
    }

    #[test]
    fn error_messages_distinguish_kinds() {
        let http = RenderError::Http {
            status: 500,
            body: "syntax error".to_string(),
            attempts: 3,
        };
        assert!(http.to_string().contains("500"));
        assert!(http.to_string().contains("syntax error"));

        let timeout = RenderError::Timeout { timeout_ms: 10_000 };
        assert!(timeout.to_string().contains("10000ms"));

        assert!(http.is_retryable());
        assert!(!timeout.is_retryable());
        assert!(!RenderError::syntax("x").is_retryable());
    }

    #[test]
    fn outcome_populates_exactly_one_side() {
        let ok = RenderOutcome::artifact("<svg/>");
        assert!(ok.is_success());
        assert!(ok.error.is_none());

        let failed = RenderOutcome::error("boom");
        assert!(!failed.is_success());
        assert!(failed.artifact.is_none());
    }
}
