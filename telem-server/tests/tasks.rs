//! Integration tests driving the full HTTP surface against a real engine
//! with a shortened supervisor cycle.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use telem_core::task::DATE_FORMAT;
use telem_core::{SqliteTaskStore, Task, TaskService, TaskStatus, TaskStore};
use telem_server::{routes, AppState, Config};

struct TestServer {
    state: Arc<AppState>,
    _tmp: TempDir,
}

impl TestServer {
    fn router(&self) -> Router {
        routes::build(Arc::clone(&self.state))
    }

    async fn request(&self, method: &str, uri: &str, body: Option<serde_json::Value>) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response")
    }

    async fn wait_for_status(&self, key: &str, want: TaskStatus, timeout: Duration) -> Task {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(task) = self.state.store.get(key).await.expect("store read") {
                if task.status == Some(want) {
                    return task;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {key} did not reach {want} within {timeout:?}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn test_server() -> TestServer {
    let tmp = tempfile::tempdir().expect("tempdir");
    let cfg = Config {
        bind_address: "127.0.0.1:0".into(),
        persistent_dir: tmp.path().to_path_buf(),
        log_level: "info".into(),
        log_json: false,
        enable_swagger: false,
        max_tasks: 50,
        cycle_ms: 50,
    };
    let core = Arc::new(cfg.core());
    let store = Arc::new(SqliteTaskStore::open(&core.db_path()).await.expect("store"));
    let service = TaskService::start(Arc::clone(&store), core)
        .await
        .expect("service");
    TestServer {
        state: Arc::new(AppState {
            config: Arc::new(cfg),
            store,
            service,
        }),
        _tmp: tmp,
    }
}

async fn body_bytes(response: Response<Body>) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
}

async fn create_task(server: &TestServer, body: serde_json::Value) -> String {
    let response = server.request("POST", "/task/", Some(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let bytes = body_bytes(response).await;
    let created: serde_json::Value = serde_json::from_slice(&bytes).expect("create body");
    created["UUID"].as_str().expect("UUID in response").to_owned()
}

#[tokio::test]
async fn post_completes_with_default_expiration() {
    let server = test_server().await;

    let response = server
        .request("POST", "/task/", Some(serde_json::json!({ "Shell": ["ls"] })))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("Location header")
        .to_owned();
    let bytes = body_bytes(response).await;
    let created: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let key = created["UUID"].as_str().expect("UUID").to_owned();
    assert_eq!(location, format!("/status/{key}"));

    let task = server
        .wait_for_status(&key, TaskStatus::Completed, Duration::from_secs(5))
        .await;
    assert_eq!(task.process_shell, Some(vec!["ls".into()]));

    // Expiration defaulted to now + 24h, within a generous tolerance.
    let expiration = task.expiration_instant().expect("expiration");
    let expected = Utc::now() + chrono::TimeDelta::hours(24);
    assert!(
        (expiration - expected).abs() < chrono::TimeDelta::seconds(20),
        "unexpected default expiration: {expiration}"
    );
}

#[tokio::test]
async fn cancel_after_completion_marks_canceled() {
    let server = test_server().await;
    let key = create_task(&server, serde_json::json!({ "Shell": ["ls -alt"] })).await;
    server
        .wait_for_status(&key, TaskStatus::Completed, Duration::from_secs(5))
        .await;

    let response = server
        .request(
            "PUT",
            "/task/",
            Some(serde_json::json!({ "Cancel": true, "UUID": key })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    server
        .wait_for_status(&key, TaskStatus::Canceled, Duration::from_secs(5))
        .await;
}

#[tokio::test]
async fn status_lists_all_and_filters_by_uuid() {
    let server = test_server().await;
    let mut keys = Vec::new();
    for _ in 0..4 {
        keys.push(create_task(&server, serde_json::json!({})).await);
    }

    let response = server.request("GET", "/status/", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let tasks: Vec<Task> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(tasks.len(), 4);

    let uri = format!("/status/?uuid={}&uuid={}", keys[0], keys[1]);
    let response = server.request("GET", &uri, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let tasks: Vec<Task> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(tasks.len(), 2);
    for task in &tasks {
        assert!(keys[..2].contains(&task.key()));
    }
}

#[tokio::test]
async fn post_with_assigned_fields_is_rejected() {
    let server = test_server().await;
    for body in [
        serde_json::json!({ "UUID": Uuid::new_v4() }),
        serde_json::json!({ "Status": 0 }),
        serde_json::json!({ "Cancel": true }),
        serde_json::json!({ "ProcessCommand": ["nothing"] }),
        serde_json::json!({ "ProcessError": ["nothing"] }),
        serde_json::json!({ "ProcessShell": ["nothing"] }),
        serde_json::json!({ "ProcessZip": ["nothing"] }),
    ] {
        let response = server.request("POST", "/task/", Some(body.clone())).await;
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "accepted invalid create body {body}"
        );
    }
}

#[tokio::test]
async fn post_with_past_expiration_is_rejected() {
    let server = test_server().await;
    let response = server
        .request(
            "POST",
            "/task/",
            Some(serde_json::json!({ "Expiration": "2001-01-01 00:00:00" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn put_requires_exactly_cancel_and_uuid() {
    let server = test_server().await;
    let key = create_task(&server, serde_json::json!({})).await;

    for body in [
        serde_json::json!({ "Cancel": false, "UUID": key }),
        serde_json::json!({ "UUID": key }),
        serde_json::json!({ "Cancel": true }),
        serde_json::json!({ "Cancel": true, "UUID": key, "Shell": ["ls"] }),
        serde_json::json!({ "Cancel": true, "UUID": key, "Status": 0 }),
    ] {
        let response = server.request("PUT", "/task/", Some(body.clone())).await;
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "accepted invalid cancel body {body}"
        );
    }
}

#[tokio::test]
async fn delete_requires_terminal_status() {
    let server = test_server().await;
    let key = create_task(&server, serde_json::json!({})).await;
    let mut task = server
        .wait_for_status(&key, TaskStatus::Completed, Duration::from_secs(5))
        .await;

    // Flip back to Running: deletion must refuse non-terminal records.
    task.status = Some(TaskStatus::Running);
    server.state.store.put(&key, &task).await.unwrap();
    let response = server.request("DELETE", &format!("/task/?uuid={key}"), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    task.status = Some(TaskStatus::Completed);
    server.state.store.put(&key, &task).await.unwrap();
    let response = server.request("DELETE", &format!("/task/?uuid={key}"), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(server.state.store.get(&key).await.unwrap().is_none());
    assert!(!task.dir(&server.state.config.persistent_dir).exists());
}

#[tokio::test]
async fn delete_unknown_task_is_rejected() {
    let server = test_server().await;
    let response = server
        .request("DELETE", &format!("/task/?uuid={}", Uuid::new_v4()), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = server.request("DELETE", "/task/", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn round_trip_archive_contains_step_outputs_and_files() {
    let server = test_server().await;
    let host_file = server._tmp.path().join("host-report.txt");
    std::fs::write(&host_file, b"collected").unwrap();

    let key = create_task(
        &server,
        serde_json::json!({
            "Shell": ["ls -alt", "echo hello > {TASK_DIR_INCLUDE}/hello.txt"],
            "File": [host_file.display().to_string()],
        }),
    )
    .await;

    // Poll over HTTP the way a client would.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let response = server.request("GET", &format!("/status/?uuid={key}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let tasks: Vec<Task> = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(tasks.len(), 1);
        if tasks[0].status == Some(TaskStatus::Completed) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "task never completed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let response = server.request("GET", &format!("/task/?uuid={key}"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/x-gzip")
    );
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .expect("Content-Disposition")
        .to_owned();
    assert!(disposition.contains(&format!("{key}.zip")));

    let bytes = body_bytes(response).await;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).expect("zip");
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_owned())
        .collect();

    assert!(names.contains(&"ls_-alt.stdout.txt".to_owned()), "{names:?}");
    assert!(names.contains(&"ls_-alt.stderr.txt".to_owned()), "{names:?}");
    assert!(names.contains(&"include/hello.txt".to_owned()), "{names:?}");
    assert!(names.contains(&"host-report.txt".to_owned()), "{names:?}");
}

#[tokio::test]
async fn expiration_round_trips_through_create() {
    let server = test_server().await;
    let expiration = (Utc::now() + chrono::TimeDelta::hours(48))
        .format(DATE_FORMAT)
        .to_string();
    let key = create_task(
        &server,
        serde_json::json!({ "Shell": ["ls"], "Expiration": expiration }),
    )
    .await;

    let task = server
        .wait_for_status(&key, TaskStatus::Completed, Duration::from_secs(5))
        .await;
    assert_eq!(task.expiration, Some(expiration));
}
