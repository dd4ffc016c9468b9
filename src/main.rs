use std::{
    path::Path,
    process,
    sync::Arc,
    time::Duration,
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ritratto::{
    application::{
        error::AppError,
        render::{
            BackendDispatcher, BackendKind, CoordinatorHandle, CoordinatorSettings, Dialect,
            LocalBackend, MermaidCliRenderer, NoopConsumer, PreviewSnapshot, RemoteBackend,
            RemoteSettings, RenderCoordinator, RenderOutcome, RenderRequest,
        },
    },
    config::{self, DiagramArgs, RenderArgs, RenderSettings, WatchArgs},
    infra::{error::InfraError, telemetry},
};
use serde_json::json;
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let dispatcher = build_dispatcher(&settings.render)?;

    match cli_args.command {
        config::Command::Render(args) => run_render(&settings.render, dispatcher, args).await,
        config::Command::Watch(args) => run_watch(&settings.render, dispatcher, args).await,
    }
}

fn build_dispatcher(render: &RenderSettings) -> Result<BackendDispatcher, AppError> {
    if render.local_dialect != Dialect::Mermaid {
        return Err(AppError::validation(format!(
            "no local renderer for `{}`; only mermaid renders locally",
            render.local_dialect
        )));
    }

    let local = LocalBackend::mermaid(Arc::new(MermaidCliRenderer::new(
        render.mermaid_cli_path.clone(),
    )));
    let remote =
        RemoteBackend::new(RemoteSettings::from(&render.remote)).map_err(InfraError::from)?;

    info!(
        target = "ritratto::bootstrap",
        local_dialect = %render.local_dialect,
        mermaid_cli = %render.mermaid_cli_path.display(),
        remote = %render.remote.base_url,
        remote_format = %render.remote.format,
        "Render backends configured"
    );

    Ok(BackendDispatcher::new(
        render.local_dialect,
        Arc::new(local),
        Arc::new(remote),
    ))
}

async fn run_render(
    render: &RenderSettings,
    dispatcher: BackendDispatcher,
    args: RenderArgs,
) -> Result<(), AppError> {
    let source = tokio::fs::read_to_string(&args.diagram.file).await?;
    let request = request_template(render, &args.diagram).with_source(source);
    let binary = produces_binary(render, &dispatcher, request.dialect);

    let handle = spawn_coordinator(render, dispatcher);
    let mut snapshots = handle.subscribe();
    handle.edit(request)?;

    let outcome = next_outcome(&mut snapshots).await;
    handle.shutdown().await;

    match outcome {
        Some(RenderOutcome {
            artifact: Some(artifact),
            ..
        }) => write_artifact(args.diagram.output.as_deref(), &artifact, binary).await,
        Some(RenderOutcome {
            error: Some(message),
            ..
        }) => Err(AppError::render(message)),
        _ => Err(AppError::unexpected(
            "render coordinator stopped before publishing a result",
        )),
    }
}

async fn run_watch(
    render: &RenderSettings,
    dispatcher: BackendDispatcher,
    args: WatchArgs,
) -> Result<(), AppError> {
    if args.poll_ms == 0 {
        return Err(AppError::validation("--poll-ms must be greater than zero"));
    }

    let template = request_template(render, &args.diagram);
    let binary = produces_binary(render, &dispatcher, template.dialect);
    let file = args.diagram.file.clone();
    let output = args.diagram.output.clone();

    let handle = spawn_coordinator(render, dispatcher);
    let mut snapshots = handle.subscribe();

    let mut ticker = tokio::time::interval(Duration::from_millis(args.poll_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    info!(
        target = "ritratto::watch",
        file = %file.display(),
        dialect = %template.dialect,
        poll_ms = args.poll_ms,
        "Watching diagram source"
    );

    let mut last_source: Option<String> = None;
    let mut published = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                poll_source(&handle, &template, &file, &mut last_source).await?;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.published > published {
                    published = snapshot.published;
                    report_snapshot(&snapshot, output.as_deref(), binary).await?;
                }
            }
            result = &mut interrupt => {
                if let Err(err) = result {
                    warn!(target = "ritratto::watch", error = %err, "Failed to listen for Ctrl-C");
                }
                info!(target = "ritratto::watch", "Interrupted; shutting down");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn spawn_coordinator(render: &RenderSettings, dispatcher: BackendDispatcher) -> CoordinatorHandle {
    RenderCoordinator::spawn(
        CoordinatorSettings::from(render),
        dispatcher,
        Arc::new(NoopConsumer),
    )
}

/// Dialect comes from `--dialect`, then the file extension, then the
/// configured local dialect.
fn request_template(render: &RenderSettings, diagram: &DiagramArgs) -> RenderRequest {
    let dialect = diagram
        .dialect
        .or_else(|| {
            diagram
                .file
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(|ext| ext.parse().ok())
        })
        .unwrap_or(render.local_dialect);
    let theme = diagram.theme.unwrap_or(render.default_theme);
    RenderRequest::new(String::new(), dialect, theme)
}

fn produces_binary(render: &RenderSettings, dispatcher: &BackendDispatcher, dialect: Dialect) -> bool {
    dispatcher.route(dialect).kind() == BackendKind::Remote && render.remote.format.is_binary()
}

async fn next_outcome(snapshots: &mut watch::Receiver<PreviewSnapshot>) -> Option<RenderOutcome> {
    loop {
        if snapshots.changed().await.is_err() {
            return snapshots.borrow().outcome.clone();
        }
        if let Some(outcome) = snapshots.borrow_and_update().outcome.clone() {
            return Some(outcome);
        }
    }
}

async fn poll_source(
    handle: &CoordinatorHandle,
    template: &RenderRequest,
    file: &Path,
    last_source: &mut Option<String>,
) -> Result<(), AppError> {
    match tokio::fs::read_to_string(file).await {
        Ok(source) => {
            if last_source.as_deref() != Some(source.as_str()) {
                handle.edit(template.clone().with_source(source.as_str()))?;
                *last_source = Some(source);
            }
            Ok(())
        }
        Err(err) => {
            warn!(
                target = "ritratto::watch",
                file = %file.display(),
                error = %err,
                "Failed to read diagram source"
            );
            Ok(())
        }
    }
}

async fn report_snapshot(
    snapshot: &PreviewSnapshot,
    output: Option<&Path>,
    binary: bool,
) -> Result<(), AppError> {
    let Some(outcome) = snapshot.outcome.as_ref() else {
        return Ok(());
    };

    if let (Some(artifact), Some(path)) = (outcome.artifact.as_deref(), output) {
        write_artifact(Some(path), artifact, binary).await?;
    }

    let status = json!({
        "published": snapshot.published,
        "ok": outcome.is_success(),
        "bytes": outcome.artifact.as_ref().map(String::len),
        "error": outcome.error,
    });
    println!("{status}");
    Ok(())
}

async fn write_artifact(path: Option<&Path>, artifact: &str, binary: bool) -> Result<(), AppError> {
    let bytes = if binary {
        STANDARD
            .decode(artifact)
            .map_err(|err| AppError::unexpected(format!("artifact is not valid base64: {err}")))?
    } else {
        artifact.as_bytes().to_vec()
    };

    match path {
        Some(path) => {
            tokio::fs::write(path, &bytes).await?;
            info!(
                target = "ritratto::output",
                path = %path.display(),
                bytes = bytes.len(),
                "Artifact written"
            );
        }
        None => {
            use tokio::io::AsyncWriteExt;

            let mut stdout = tokio::io::stdout();
            stdout.write_all(&bytes).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}
