// HTTP surface
//
// Two routes, both forwarded untouched to the "workflow-agent" coordinator.
// Anything else, wrong methods included, gets the JSON 404.

pub mod common;
pub mod workflows;

use std::sync::Arc;

use axum::response::Response;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::agent::CoordinatorNamespace;

pub use common::ErrorResponse;

#[derive(Clone)]
pub struct AppState {
    pub agents: Arc<CoordinatorNamespace>,
}

impl AppState {
    pub fn new(agents: CoordinatorNamespace) -> Self {
        Self {
            agents: Arc::new(agents),
        }
    }
}

pub(crate) async fn not_found() -> Response {
    ErrorResponse::not_found()
}

/// Workflow routes under `prefix` (may be empty), with tracing and the 404 fallback
pub fn router(state: AppState, prefix: &str) -> Router {
    mount(workflows::routes(state), prefix)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
}

/// Nest `routes` under `prefix`; an empty prefix mounts them at the root
pub fn mount<S>(routes: Router<S>, prefix: &str) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    match prefix {
        "" => routes,
        prefix => Router::new().nest(prefix, routes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    async fn status_of(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    fn ping() -> Router {
        Router::new().route("/ping", get(|| async { "pong" }))
    }

    #[tokio::test]
    async fn test_mount_without_prefix() {
        assert_eq!(status_of(mount(ping(), ""), "/ping").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_mount_with_prefix() {
        let app = mount(ping(), "/waypoint");
        assert_eq!(status_of(app.clone(), "/waypoint/ping").await, StatusCode::OK);
        assert_eq!(status_of(app, "/ping").await, StatusCode::NOT_FOUND);
    }
}
