//! HTTP intake over the [`api`](crate::runtime::api) functions.
//!
//! Routes:
//! - `POST /tasks/` submits a task spec and answers `201` with its id
//! - `GET /tasks/{id}` returns the stored spec and its latest status

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ManagerConfig;
use crate::core::error::{StoreError, SubmitError};
use crate::core::model::{TaskId, TaskSpec};
use crate::core::store::{StoreBackend, TaskStore};
use crate::runtime::api;

/// Errors returned by intake handlers, rendered as a JSON error body.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The path segment is not a task id.
    #[error("failed to build id from {id} : {reason}")]
    InvalidId {
        /// Raw path segment.
        id: String,
        /// Parser failure.
        reason: String,
    },
    /// Submission refused or failed.
    #[error(transparent)]
    Submit(#[from] SubmitError),
    /// Lookup failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::InvalidId { .. } => (StatusCode::BAD_REQUEST, "INVALID_ID"),
            Self::Submit(SubmitError::QueueFull { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL")
            }
            Self::Submit(SubmitError::Store(e)) | Self::Store(e) => match e {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                StoreError::Duplicate(_) => (StatusCode::CONFLICT, "DUPLICATE"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            },
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "intake request failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "intake request refused");
        }

        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

struct IntakeState<B: StoreBackend> {
    store: Arc<TaskStore<B>>,
    config: ManagerConfig,
}

/// Build the intake router over `store`, enforcing `config.task_queue_size`.
pub fn router<B: StoreBackend>(store: Arc<TaskStore<B>>, config: ManagerConfig) -> Router {
    let state = Arc::new(IntakeState { store, config });
    Router::new()
        .route("/tasks", post(create_task::<B>))
        .route("/tasks/", post(create_task::<B>))
        .route("/tasks/{id}", get(task_status::<B>))
        .with_state(state)
}

/// Serve `app` on `listener` until `cancel` fires, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http intake listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

/// POST /tasks/
async fn create_task<B: StoreBackend>(
    State(state): State<Arc<IntakeState<B>>>,
    Json(spec): Json<TaskSpec>,
) -> Result<impl IntoResponse, ApiError> {
    debug!(image = %spec.image, init = %spec.init, "submitting task");
    let submitted = api::submit_task(&state.store, &state.config, spec).await?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

/// GET /tasks/{id}
async fn task_status<B: StoreBackend>(
    State(state): State<Arc<IntakeState<B>>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: TaskId = raw.parse().map_err(|e: uuid::Error| ApiError::InvalidId {
        id: raw.clone(),
        reason: e.to_string(),
    })?;
    let response = api::get_task_status(&state.store, &id).await?;
    Ok(Json(response))
}
