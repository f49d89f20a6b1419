//! `/status/` endpoint: poll task records.

use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::Json;
use serde_json::Value;

use telem_core::{Task, TaskStore};

use crate::error::ServerError;
use crate::state::AppState;

/// List every stored task, or only those matching repeated `?uuid=` filters.
#[utoipa::path(
    get,
    path = "/status/",
    tag = "status",
    responses(
        (status = 200, description = "Task records", body = Value),
        (status = 500, description = "Store failure"),
    )
)]
pub async fn list(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<Task>>, ServerError> {
    // `?uuid=` may repeat; collect every occurrence.
    let filter: Vec<String> = query
        .as_deref()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .filter(|(k, _)| k == "uuid")
                .map(|(_, v)| v.into_owned())
                .collect()
        })
        .unwrap_or_default();

    let mut tasks = Vec::new();
    for key in state.store.keys().await? {
        if !filter.is_empty() && !filter.contains(&key) {
            continue;
        }
        if let Some(task) = state.store.get(&key).await? {
            tasks.push(task);
        }
    }
    Ok(Json(tasks))
}
