//! Web server entrypoints live here.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch};
use uuid::Uuid;

use crate::pipeline::{run_correction_job, JobIntake, PipelineContext};
use crate::services::jobs::{CorrectionJob, CorrectionJobStatus};
use crate::services::storage::CorrectionRecord;

const HEALTHZ_PATH: &str = "/v1/healthz";
const CORRECTIONS_PATH: &str = "/v1/corrections";
const CORRECTION_STATUS_PATH: &str = "/v1/corrections/{job_id}";
const HEALTHZ_STATUS: &str = "ok";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub type AppState = Arc<PipelineContext>;

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    processing_jobs: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct JobAccepted {
    job_id: String,
    status: &'static str,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct JobStatusResponse {
    #[serde(flatten)]
    job: CorrectionJob,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<CorrectionRecord>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ShutdownEvent {
    Pending,
    CtrlC,
    SigTerm,
    ListenerFailed,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listen address may not be empty")]
    EmptyListenAddr,
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to determine local address: {source}")]
    LocalAddr {
        #[source]
        source: std::io::Error,
    },
    #[error("axum server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

pub fn build_api_router(state: AppState) -> Router {
    debug_assert!(HEALTHZ_PATH.starts_with("/v1/"));
    debug_assert!(CORRECTION_STATUS_PATH.starts_with(CORRECTIONS_PATH));

    Router::new()
        .route(HEALTHZ_PATH, get(healthz))
        .route(CORRECTIONS_PATH, post(submit_correction))
        .route(CORRECTION_STATUS_PATH, get(correction_status))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub async fn serve(state: AppState) -> Result<(), ServerError> {
    debug_assert!(state.config.server.listen_addr.len() <= 128);
    debug_assert!(!state.config.server.listen_addr.contains('\n'));

    let listen_addr = parse_listen_addr(&state.config.server.listen_addr)?;

    let listener = bind_listener(listen_addr).await?;

    let local_addr = listener
        .local_addr()
        .map_err(|source| ServerError::LocalAddr { source })?;
    tracing::info!(%local_addr, "plume server listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownEvent::Pending);

    let shutdown_future = broadcast_shutdown(shutdown_tx);

    let app = build_api_router(state);

    let mut server_future = Box::pin(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_future)
            .await
    });

    let drain_rx = shutdown_rx.clone();
    let mut drain_timeout = Box::pin(drain_timeout_future(drain_rx));

    tokio::select! {
        result = server_future.as_mut() => {
            if let Err(source) = result {
                return Err(ServerError::Serve { source });
            }
        }
        _ = drain_timeout.as_mut() => {
            // Timeout elapsed; dropping the server future forces termination.
        }
    }

    let final_event = *shutdown_rx.borrow();
    if final_event == ShutdownEvent::Pending {
        tracing::info!("server stopped without external shutdown signal");
    } else {
        tracing::info!(?final_event, "server shutdown complete");
    }

    Ok(())
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    debug_assert_eq!(HEALTHZ_STATUS, "ok");

    let processing_jobs = state
        .jobs
        .count_by_status(CorrectionJobStatus::Processing)
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to count processing jobs");
            0
        });

    Json(HealthzResponse {
        status: HEALTHZ_STATUS,
        processing_jobs,
    })
}

/// Accepts a DOCX upload, registers the job, and spawns the pipeline in the
/// background. The response carries the job id for status polling.
async fn submit_correction(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Response {
    let mut upload: Option<(String, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return bad_request(format!("malformed multipart body: {err}"));
            }
        };

        if field.name() != Some("file") {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        if content_type.as_deref() != Some(DOCX_MIME) {
            return bad_request(format!(
                "unsupported content type; expected {DOCX_MIME}"
            ));
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "document.docx".to_string());
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => {
                return bad_request(format!("failed to read upload: {err}"));
            }
        };
        upload = Some((filename, bytes));
        break;
    }

    let Some((filename, bytes)) = upload else {
        return bad_request("missing multipart field `file`".to_string());
    };
    if bytes.is_empty() {
        return bad_request("uploaded file is empty".to_string());
    }

    let job_id = Uuid::new_v4().to_string();
    let job = CorrectionJob::new(&job_id, &filename, bytes.len() as u64);
    if let Err(err) = state.jobs.insert(&job) {
        tracing::error!(job_id = %job_id, error = %err, "failed to register job");
        return internal_error("failed to register job");
    }

    let intake = JobIntake {
        job_id: job_id.clone(),
        filename,
        uploaded_at: Utc::now(),
        bytes,
    };
    tokio::spawn(run_correction_job(Arc::clone(&state), intake));

    tracing::info!(job_id = %job_id, file_size = job.file_size, "correction job accepted");
    let accepted = JobAccepted {
        job_id,
        status: "started",
        message: "document accepted; poll the status endpoint for progress",
    };
    (StatusCode::ACCEPTED, Json(accepted)).into_response()
}

async fn correction_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    let job = match state.jobs.get(&job_id) {
        Ok(Some(job)) => job,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: format!("job `{job_id}` not found"),
                }),
            )
                .into_response();
        }
        Err(err) => {
            tracing::error!(job_id = %job_id, error = %err, "failed to load job");
            return internal_error("failed to load job");
        }
    };

    // The full record is attached only once the run has finished.
    let result = if job.status == CorrectionJobStatus::Completed {
        state.results.get(&job_id).unwrap_or_else(|err| {
            tracing::error!(job_id = %job_id, error = %err, "failed to load correction record");
            None
        })
    } else {
        None
    };

    let response = JobStatusResponse { job, result };
    (StatusCode::OK, Json(response)).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: message })).into_response()
}

fn internal_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

async fn wait_for_shutdown() -> ShutdownEvent {
    debug_assert!(DRAIN_TIMEOUT >= Duration::from_secs(1));

    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownEvent::CtrlC,
            Err(error) => {
                tracing::warn!(%error, "failed to capture Ctrl+C signal");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => match term.recv().await {
                Some(_) => ShutdownEvent::SigTerm,
                None => ShutdownEvent::ListenerFailed,
            },
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending();

    tokio::select! {
        event = ctrl_c => event,
        event = sigterm => event,
    }
}

fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    debug_assert!(addr.len() <= 128);
    debug_assert!(!addr.contains('\n'));

    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(ServerError::EmptyListenAddr);
    }

    trimmed
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: trimmed.to_string(),
            source,
        })
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    debug_assert!(addr.port() > 0);

    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: addr.to_string(),
            source,
        })
}

fn broadcast_shutdown(
    sender: watch::Sender<ShutdownEvent>,
) -> impl Future<Output = ()> + Send + 'static {
    debug_assert!(!sender.is_closed());
    async move {
        let event = wait_for_shutdown().await;
        debug_assert!(event != ShutdownEvent::Pending);
        if let Err(error) = sender.send(event) {
            tracing::warn!(?event, %error, "failed to broadcast shutdown event");
        }
    }
}

fn drain_timeout_future(
    mut receiver: watch::Receiver<ShutdownEvent>,
) -> impl Future<Output = ()> + Send + 'static {
    debug_assert!(DRAIN_TIMEOUT.as_secs() >= 1);
    async move {
        if receiver.changed().await.is_ok() {
            let event = *receiver.borrow_and_update();
            debug_assert!(event != ShutdownEvent::Pending);
            tracing::info!(?event, "shutdown signal received; draining connections");
            tokio::time::sleep(DRAIN_TIMEOUT).await;
            tracing::warn!(
                ?event,
                seconds = DRAIN_TIMEOUT.as_secs(),
                "graceful shutdown timed out; continuing shutdown"
            );
        }
    }
}
