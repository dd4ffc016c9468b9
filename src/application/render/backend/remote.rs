use std::{
    error::Error as StdError,
    io::Write,
    num::NonZeroU32,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE},
};
use flate2::{Compression, write::ZlibEncoder};
use metrics::counter;
use reqwest::{Client, Url, header::ACCEPT};
use tracing::{debug, info, warn};

use crate::application::render::types::{Dialect, OutputFormat, RenderError, RenderRequest};

use super::validate::{ArtifactValidator, RemoteBodyValidator};
use super::{BackendKind, RenderBackend};

pub const DEFAULT_REMOTE_BASE_URL: &str = "https://kroki.io";
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_REMOTE_MAX_RETRIES: u32 = 3;
pub const DEFAULT_REMOTE_RETRY_DELAY: Duration = Duration::from_millis(1_000);

const METRIC_REMOTE_RETRY: &str = "ritratto_render_remote_retry_total";
const METRIC_REMOTE_TIMEOUT: &str = "ritratto_render_remote_timeout_total";

/// Connection and retry policy for the remote render service.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: Url,
    pub format: OutputFormat,
    /// Hard limit for a single attempt, including reading the body.
    pub timeout: Duration,
    /// Total attempts allowed for HTTP and transport failures.
    pub max_retries: NonZeroU32,
    pub retry_delay: Duration,
}

impl RemoteSettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            format: OutputFormat::default(),
            timeout: DEFAULT_REMOTE_TIMEOUT,
            max_retries: NonZeroU32::new(DEFAULT_REMOTE_MAX_RETRIES).unwrap_or(NonZeroU32::MIN),
            retry_delay: DEFAULT_REMOTE_RETRY_DELAY,
        }
    }
}

impl From<&crate::config::RemoteRenderSettings> for RemoteSettings {
    fn from(settings: &crate::config::RemoteRenderSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            format: settings.format,
            timeout: settings.timeout,
            max_retries: settings.max_retries,
            retry_delay: settings.retry_delay,
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug)]
enum AttemptFailure {
    Timeout,
    Status { status: u16, body: String },
    Transport(String),
}

impl AttemptFailure {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(error_chain(&err))
        }
    }

    fn into_error(self, attempts: u32, timeout: Duration) -> RenderError {
        match self {
            Self::Timeout => RenderError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            Self::Status { status, body } => RenderError::Http {
                status,
                body,
                attempts,
            },
            Self::Transport(message) => RenderError::Transport { message, attempts },
        }
    }
}

/// Remote backend for every non-local dialect, speaking the Kroki GET API.
pub struct RemoteBackend {
    client: Client,
    settings: RemoteSettings,
    validator: Arc<dyn ArtifactValidator>,
}

impl RemoteBackend {
    pub fn new(settings: RemoteSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(Self::user_agent()).build()?;
        let validator = Arc::new(RemoteBodyValidator::new(settings.format));
        Ok(Self {
            client,
            settings,
            validator,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("ritratto/", env!("CARGO_PKG_VERSION"))
    }

    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }

    /// `{base}/{dialect}/{format}/{deflate+base64url(source)}`
    pub fn request_url(&self, dialect: Dialect, source: &str) -> Result<Url, RenderError> {
        let encoded = encode_source(source)?;
        let mut url = self.settings.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RenderError::Request {
                message: format!(
                    "base URL `{}` cannot carry a path",
                    self.settings.base_url
                ),
            })?
            .pop_if_empty()
            .extend([dialect.as_str(), self.settings.format.as_str(), encoded.as_str()]);
        Ok(url)
    }

    async fn attempt(&self, url: &Url) -> Result<String, AttemptFailure> {
        let exchange = async {
            let response = self
                .client
                .get(url.clone())
                .header(ACCEPT, self.settings.format.media_type())
                .send()
                .await
                .map_err(AttemptFailure::from_reqwest)?;
            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(AttemptFailure::from_reqwest)?;

            if !status.is_success() {
                return Err(AttemptFailure::Status {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&bytes).trim().to_string(),
                });
            }

            Ok(if self.settings.format.is_binary() {
                STANDARD.encode(&bytes)
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            })
        };

        match tokio::time::timeout(self.settings.timeout, exchange).await {
            Ok(result) => result,
            Err(_elapsed) => Err(AttemptFailure::Timeout),
        }
    }
}

#[async_trait]
impl RenderBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
        let started_at = Instant::now();
        let url = self.request_url(request.dialect, &request.source)?;
        let mut budget = self.settings.max_retries.get();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            debug!(
                op = "remote_backend::attempt",
                dialect = %request.dialect,
                attempt = attempts,
                "Requesting remote render"
            );

            let err = match self.attempt(&url).await {
                Ok(body) => {
                    self.validator.validate(&body)?;
                    info!(
                        op = "remote_backend::render",
                        result = "ok",
                        dialect = %request.dialect,
                        attempts,
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        artifact_bytes = body.len(),
                        "Remote render completed"
                    );
                    return Ok(body);
                }
                Err(failure) => failure.into_error(attempts, self.settings.timeout),
            };

            if !err.is_retryable() {
                if matches!(err, RenderError::Timeout { .. }) {
                    counter!(METRIC_REMOTE_TIMEOUT).increment(1);
                }
                warn!(
                    op = "remote_backend::render",
                    result = "error",
                    error_code = err.code(),
                    dialect = %request.dialect,
                    attempts,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Remote render failed; not retrying"
                );
                return Err(err);
            }

            budget -= 1;
            if budget == 0 {
                warn!(
                    op = "remote_backend::render",
                    result = "error",
                    error_code = err.code(),
                    dialect = %request.dialect,
                    attempts,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Remote render failed; retry budget exhausted"
                );
                return Err(err);
            }

            counter!(METRIC_REMOTE_RETRY).increment(1);
            info!(
                op = "remote_backend::render",
                result = "retry",
                error_code = err.code(),
                dialect = %request.dialect,
                attempts,
                remaining = budget,
                delay_ms = self.settings.retry_delay.as_millis() as u64,
                "Remote render failed; retrying"
            );
            tokio::time::sleep(self.settings.retry_delay).await;
        }
    }
}

fn encode_source(source: &str) -> Result<String, RenderError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(source.as_bytes())
        .and_then(|()| encoder.finish())
        .map(|compressed| URL_SAFE.encode(compressed))
        .map_err(|err| RenderError::Request {
            message: format!("failed to encode diagram source: {err}"),
        })
}

fn error_chain(error: &dyn StdError) -> String {
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(inner) = current {
        messages.push(inner.to_string());
        current = inner.source();
    }
    messages.join(": ")
}
