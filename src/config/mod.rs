//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::render::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_DEBOUNCE, DEFAULT_MANUAL_RETRY_COOLDOWN, Dialect,
    OutputFormat, StalePolicy, Theme,
    backend::{
        DEFAULT_REMOTE_BASE_URL, DEFAULT_REMOTE_MAX_RETRIES, DEFAULT_REMOTE_RETRY_DELAY,
        DEFAULT_REMOTE_TIMEOUT,
    },
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "ritratto";
const ENV_PREFIX: &str = "RITRATTO";
const DEFAULT_WATCH_POLL_MS: u64 = 250;
const DEFAULT_MERMAID_CLI_PATH: &str = "mmdc";

/// Command-line arguments for the Ritratto binary.
#[derive(Debug, Parser)]
#[command(name = "ritratto", version, about = "Live diagram preview renderer")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RITRATTO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render a diagram file once and write the artifact.
    Render(RenderArgs),
    /// Re-render a diagram file every time it changes.
    Watch(WatchArgs),
}

#[derive(Debug, Args, Clone)]
pub struct DiagramArgs {
    /// Diagram source file.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Diagram dialect; defaults to `render.local_dialect`.
    #[arg(long, value_name = "DIALECT")]
    pub dialect: Option<Dialect>,

    /// Rendering theme; defaults to `render.default_theme`.
    #[arg(long, value_name = "THEME")]
    pub theme: Option<Theme>,

    /// Write the artifact here instead of stdout.
    #[arg(long, short = 'o', value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub diagram: DiagramArgs,

    #[command(flatten)]
    pub overrides: RenderOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub diagram: DiagramArgs,

    /// How often to check the file for changes.
    #[arg(long = "poll-ms", value_name = "MILLIS", default_value_t = DEFAULT_WATCH_POLL_MS)]
    pub poll_ms: u64,

    #[command(flatten)]
    pub overrides: RenderOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the debounce window.
    #[arg(long = "debounce-ms", value_name = "MILLIS")]
    pub debounce_ms: Option<u64>,

    /// Override the remote renderer base URL.
    #[arg(long = "remote-url", value_name = "URL")]
    pub remote_url: Option<String>,

    /// Override the per-attempt remote timeout.
    #[arg(long = "remote-timeout-ms", value_name = "MILLIS")]
    pub remote_timeout_ms: Option<u64>,

    /// Override the total number of remote attempts.
    #[arg(long = "remote-max-retries", value_name = "COUNT")]
    pub remote_max_retries: Option<u64>,

    /// Override the Mermaid CLI executable path used for local rendering.
    #[arg(long = "mermaid-cli-path", value_name = "PATH")]
    pub mermaid_cli_path: Option<PathBuf>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub debounce: Duration,
    pub cache_capacity: NonZeroUsize,
    pub manual_retry_cooldown: Duration,
    pub stale_results: StalePolicy,
    pub local_dialect: Dialect,
    pub default_theme: Theme,
    pub mermaid_cli_path: PathBuf,
    pub remote: RemoteRenderSettings,
}

#[derive(Debug, Clone)]
pub struct RemoteRenderSettings {
    pub base_url: Url,
    pub format: OutputFormat,
    pub timeout: Duration,
    pub max_retries: NonZeroU32,
    pub retry_delay: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Render(args) => raw.apply_overrides(&args.overrides),
        Command::Watch(args) => raw.apply_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render: RawRenderSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(debounce) = overrides.debounce_ms {
            self.render.debounce_ms = Some(debounce);
        }
        if let Some(url) = overrides.remote_url.as_ref() {
            self.render.remote.base_url = Some(url.clone());
        }
        if let Some(timeout) = overrides.remote_timeout_ms {
            self.render.remote.timeout_ms = Some(timeout);
        }
        if let Some(max) = overrides.remote_max_retries {
            self.render.remote.max_retries = Some(max);
        }
        if let Some(path) = overrides.mermaid_cli_path.as_ref() {
            self.render.mermaid_cli_path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, render } = raw;

        let logging = build_logging_settings(logging)?;
        let render = build_render_settings(render)?;

        Ok(Self { logging, render })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let RawRenderSettings {
        debounce_ms,
        cache_capacity,
        manual_retry_cooldown_ms,
        stale_results,
        local_dialect,
        default_theme,
        mermaid_cli_path,
        remote,
    } = render;

    let debounce = debounce_ms.map_or(Ok(DEFAULT_DEBOUNCE), |ms| {
        positive_millis(ms, "render.debounce_ms")
    })?;

    let capacity_value = cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY as u64);
    let cache_capacity = usize::try_from(capacity_value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid(
                "render.cache_capacity",
                "must be greater than zero and fit in usize",
            )
        })?;

    let manual_retry_cooldown = manual_retry_cooldown_ms
        .map_or(DEFAULT_MANUAL_RETRY_COOLDOWN, Duration::from_millis);

    let stale_results = parse_or_default(stale_results, "render.stale_results")?;
    let local_dialect = parse_or_default(local_dialect, "render.local_dialect")?;
    let default_theme = parse_or_default(default_theme, "render.default_theme")?;

    let mermaid_cli_path =
        mermaid_cli_path.unwrap_or_else(|| PathBuf::from(DEFAULT_MERMAID_CLI_PATH));
    if mermaid_cli_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.mermaid_cli_path",
            "path must not be empty",
        ));
    }

    Ok(RenderSettings {
        debounce,
        cache_capacity,
        manual_retry_cooldown,
        stale_results,
        local_dialect,
        default_theme,
        mermaid_cli_path,
        remote: build_remote_settings(remote)?,
    })
}

fn build_remote_settings(remote: RawRemoteSettings) -> Result<RemoteRenderSettings, LoadError> {
    let base_url_value = remote
        .base_url
        .unwrap_or_else(|| DEFAULT_REMOTE_BASE_URL.to_string());
    let base_url = Url::parse(base_url_value.trim()).map_err(|err| {
        LoadError::invalid(
            "render.remote.base_url",
            format!("invalid url `{base_url_value}`: {err}"),
        )
    })?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "render.remote.base_url",
            format!("unsupported scheme `{}`", base_url.scheme()),
        ));
    }

    let format = parse_or_default(remote.format, "render.remote.format")?;
    let timeout = remote.timeout_ms.map_or(Ok(DEFAULT_REMOTE_TIMEOUT), |ms| {
        positive_millis(ms, "render.remote.timeout_ms")
    })?;
    let max_retries = non_zero_u32(
        remote
            .max_retries
            .unwrap_or(u64::from(DEFAULT_REMOTE_MAX_RETRIES)),
        "render.remote.max_retries",
    )?;
    let retry_delay = remote
        .retry_delay_ms
        .map_or(DEFAULT_REMOTE_RETRY_DELAY, Duration::from_millis);

    Ok(RemoteRenderSettings {
        base_url,
        format,
        timeout,
        max_retries,
        retry_delay,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    debounce_ms: Option<u64>,
    cache_capacity: Option<u64>,
    manual_retry_cooldown_ms: Option<u64>,
    stale_results: Option<String>,
    local_dialect: Option<String>,
    default_theme: Option<String>,
    mermaid_cli_path: Option<PathBuf>,
    remote: RawRemoteSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRemoteSettings {
    base_url: Option<String>,
    format: Option<String>,
    timeout_ms: Option<u64>,
    max_retries: Option<u64>,
    retry_delay_ms: Option<u64>,
}

fn parse_or_default<T>(value: Option<String>, key: &'static str) -> Result<T, LoadError>
where
    T: FromStr + Default,
    T::Err: std::fmt::Display,
{
    match value {
        Some(value) => value
            .parse()
            .map_err(|err: T::Err| LoadError::invalid(key, err.to_string())),
        None => Ok(T::default()),
    }
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
