//! `/task/` endpoints: create, cancel, delete, and archive fetch.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::io::ReaderStream;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use telem_core::task::DATE_FORMAT;
use telem_core::{SubmitError, Task, TaskStatus, TaskStore};

use crate::error::ServerError;
use crate::state::AppState;

/// Create response: the assigned task identity, nothing else.
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskCreated {
    #[serde(rename = "UUID")]
    pub uuid: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UuidQuery {
    pub uuid: Option<Uuid>,
}

/// Create a new task.
///
/// The request may carry Command, Shell, File, FileModifiedSeconds, and
/// Expiration; everything the service assigns itself (identity, status,
/// progress) is rejected. The caller blocks on the admission rendezvous for
/// up to three supervisor cycles; on timeout the tentative record is removed
/// and 429 returned.
#[utoipa::path(
    post,
    path = "/task/",
    tag = "task",
    request_body = Value,
    responses(
        (status = 201, description = "Task created", body = TaskCreated),
        (status = 400, description = "Invalid fields supplied"),
        (status = 429, description = "Admission timed out"),
        (status = 500, description = "Store failure"),
    )
)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(mut task): Json<Task>,
) -> Result<Response, ServerError> {
    if task.cancel.is_some()
        || task.status.is_some()
        || task.uuid.is_some()
        || task.process_command.is_some()
        || task.process_shell.is_some()
        || task.process_zip.is_some()
        || task.process_error.is_some()
    {
        return Err(ServerError::BadRequest(
            "create accepts only Command, Shell, File, FileModifiedSeconds, and Expiration".into(),
        ));
    }

    let expiration = match task.expiration.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => {
            let parsed = NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
                .map_err(|e| ServerError::BadRequest(format!("invalid Expiration: {e}")))?;
            let parsed = Utc.from_utc_datetime(&parsed);
            if parsed < Utc::now() {
                return Err(ServerError::BadRequest("Expiration is in the past".into()));
            }
            parsed
        }
        None => Utc::now() + state.service.config().default_expiration,
    };
    task.expiration = Some(expiration.format(DATE_FORMAT).to_string());

    let id = Uuid::new_v4();
    task.uuid = Some(id);
    task.status = Some(TaskStatus::Accepted);

    let persistent_dir = &state.config.persistent_dir;
    task.substitute_include_dir(persistent_dir);
    tokio::fs::create_dir_all(task.include_dir(persistent_dir))
        .await
        .map_err(|e| ServerError::Internal(format!("creating task directory: {e}")))?;

    let key = task.key();
    state.store.put(&key, &task).await?;

    if let Err(e) = state.service.submit(key.clone()).await {
        // Compensate: the task never ran, so the tentative record and
        // directory go away with the rejection.
        let _ = state.store.delete(&key).await;
        let _ = tokio::fs::remove_dir_all(task.dir(persistent_dir)).await;
        return Err(match e {
            SubmitError::CapacityExceeded => ServerError::CapacityExceeded,
            SubmitError::Shutdown => ServerError::Internal("task service unavailable".into()),
        });
    }

    info!(task = %key, "task created");
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/status/{key}"))],
        Json(TaskCreated { uuid: id }),
    )
        .into_response())
}

/// Cancel a task. Valid only with `Cancel: true`, a UUID, and no other
/// fields; tasks cannot be un-canceled.
#[utoipa::path(
    put,
    path = "/task/",
    tag = "task",
    request_body = Value,
    responses(
        (status = 202, description = "Cancellation accepted"),
        (status = 400, description = "Invalid cancel request"),
        (status = 500, description = "Store failure"),
    )
)]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Json(task): Json<Task>,
) -> Result<StatusCode, ServerError> {
    let well_formed = task.cancel == Some(true)
        && task.uuid.is_some_and(|u| !u.is_nil())
        && task.expiration.is_none()
        && task.command.is_none()
        && task.shell.is_none()
        && task.file.is_none()
        && task.file_modified_seconds.is_none()
        && task.status.is_none()
        && task.process_command.is_none()
        && task.process_shell.is_none()
        && task.process_zip.is_none()
        && task.process_error.is_none();
    if !well_formed {
        return Err(ServerError::BadRequest(
            "cancel requires Cancel=true and a UUID, nothing else".into(),
        ));
    }

    let key = task.key();
    let Some(mut stored) = state.store.get(&key).await? else {
        return Err(ServerError::BadRequest(format!("unknown task {key}")));
    };
    if stored.uuid.is_none() || stored.status.is_none() {
        return Err(ServerError::BadRequest(format!("task {key} is not runnable")));
    }

    stored.status = Some(TaskStatus::Canceling);
    state.store.put(&key, &stored).await?;
    state.service.request_cancel(&key);

    info!(task = %key, "cancel requested");
    Ok(StatusCode::ACCEPTED)
}

/// Delete a terminal task: its record and its on-disk directory.
#[utoipa::path(
    delete,
    path = "/task/",
    tag = "task",
    responses(
        (status = 204, description = "Task deleted"),
        (status = 400, description = "Missing uuid or task not terminal"),
        (status = 500, description = "Store or filesystem failure"),
    )
)]
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UuidQuery>,
) -> Result<StatusCode, ServerError> {
    let id = query
        .uuid
        .ok_or_else(|| ServerError::BadRequest("uuid query parameter required".into()))?;
    let key = id.to_string();

    let Some(task) = state.store.get(&key).await? else {
        return Err(ServerError::BadRequest(format!("unknown task {key}")));
    };
    match task.status {
        Some(status) if status.is_terminal() => {}
        _ => {
            return Err(ServerError::BadRequest(format!(
                "task {key} is not in a terminal status"
            )))
        }
    }

    let dir = task.dir(&state.config.persistent_dir);
    if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(ServerError::Internal(format!(
                "removing task directory {}: {e}",
                dir.display()
            )));
        }
    }
    state.store.delete(&key).await?;

    info!(task = %key, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Stream the task's archive.
#[utoipa::path(
    get,
    path = "/task/",
    tag = "task",
    responses(
        (status = 200, description = "Archive stream", content_type = "application/x-gzip"),
        (status = 400, description = "Missing uuid, unknown task, or no archive"),
        (status = 500, description = "Store failure"),
    )
)]
pub async fn fetch_archive(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UuidQuery>,
) -> Result<Response, ServerError> {
    let id = query
        .uuid
        .ok_or_else(|| ServerError::BadRequest("uuid query parameter required".into()))?;
    let key = id.to_string();

    let Some(task) = state.store.get(&key).await? else {
        return Err(ServerError::BadRequest(format!("unknown task {key}")));
    };
    if task.uuid.is_none() || task.status.is_none() {
        return Err(ServerError::BadRequest(format!("task {key} has no archive")));
    }

    let zip_path = task.zip_path(&state.config.persistent_dir);
    let file = tokio::fs::File::open(&zip_path)
        .await
        .map_err(|e| ServerError::BadRequest(format!("archive not available: {e}")))?;
    let filename = zip_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{key}.zip"));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/x-gzip".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
