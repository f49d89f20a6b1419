//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - `/` text banner
//! - `/task/` create / cancel / delete / archive fetch
//! - `/status/` task record polling
//! - optional Swagger UI (disable with `TELEM_ENABLE_SWAGGER=false`)
//! - per-request trace-ID middleware

pub mod root;
pub mod status;
pub mod task;

use std::sync::Arc;

use axum::routing::get;
use axum::{middleware, Router};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::trace;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        root::banner,
        status::list,
        task::create,
        task::cancel,
        task::remove,
        task::fetch_archive,
    ),
    components(schemas(task::TaskCreated))
)]
struct ApiDoc;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/", get(root::banner))
        .route("/status/", get(status::list))
        .route(
            "/task/",
            get(task::fetch_archive)
                .post(task::create)
                .put(task::cancel)
                .delete(task::remove),
        );

    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));
    }

    app.layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}
