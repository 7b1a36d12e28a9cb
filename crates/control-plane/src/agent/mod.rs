// Addressable coordinators
//
// A coordinator is a named, long-lived object that receives raw HTTP
// requests. Callers never construct one directly: they ask the namespace to
// locate it by name, which creates it on first use and returns the same
// instance for every later lookup of that name.

mod workflow_agent;

pub use workflow_agent::{WorkflowAgent, WORKFLOW_AGENT_NAME};

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use dashmap::DashMap;
use waypoint_durable::BindingError;

/// Errors a coordinator does not recover from
///
/// These surface to the caller as a bare 500.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("failed to read request body: {0}")]
    Body(#[from] axum::Error),

    #[error("malformed request body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("workflow engine error: {0}")]
    Engine(#[from] BindingError),
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error = %self, "Coordinator request failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

/// A named object that handles raw requests
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    async fn on_request(&self, request: Request<Body>) -> Result<Response<Body>, CoordinatorError>;
}

type Factory = Arc<dyn Fn(&str) -> Arc<dyn Coordinator> + Send + Sync>;

/// All coordinators of one kind, keyed by name
pub struct CoordinatorNamespace {
    factory: Factory,
    instances: DashMap<String, Arc<dyn Coordinator>>,
}

impl CoordinatorNamespace {
    pub fn new<C: Coordinator>(factory: impl Fn(&str) -> C + Send + Sync + 'static) -> Self {
        Self {
            factory: Arc::new(move |name: &str| Arc::new(factory(name)) as Arc<dyn Coordinator>),
            instances: DashMap::new(),
        }
    }

    /// Resolve a coordinator by name, creating it on first use
    pub fn locate(&self, name: &str) -> CoordinatorHandle {
        let coordinator = self
            .instances
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(%name, "creating coordinator");
                (self.factory)(name)
            })
            .clone();

        CoordinatorHandle {
            name: name.to_string(),
            coordinator,
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// A located coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    name: String,
    coordinator: Arc<dyn Coordinator>,
}

impl CoordinatorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand a request to the coordinator unchanged
    pub async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, CoordinatorError> {
        tracing::debug!(
            coordinator = %self.name,
            method = %request.method(),
            path = %request.uri().path(),
            "forwarding request"
        );
        self.coordinator.on_request(request).await
    }

    /// Whether both handles point at the same instance
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.coordinator, &other.coordinator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        name: String,
    }

    #[async_trait]
    impl Coordinator for Echo {
        async fn on_request(
            &self,
            request: Request<Body>,
        ) -> Result<Response<Body>, CoordinatorError> {
            let body = format!("{} {}", self.name, request.uri().path());
            Ok(Response::new(Body::from(body)))
        }
    }

    #[tokio::test]
    async fn test_locate_reuses_instance() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let namespace = CoordinatorNamespace::new(move |name| {
            counter.fetch_add(1, Ordering::SeqCst);
            Echo {
                name: name.to_string(),
            }
        });

        let a = namespace.locate("alpha");
        let b = namespace.locate("alpha");
        let c = namespace.locate("beta");

        assert!(a.same_instance(&b));
        assert!(!a.same_instance(&c));
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(namespace.len(), 2);
    }

    #[tokio::test]
    async fn test_forward_passes_request_through() {
        use http_body_util::BodyExt;

        let namespace = CoordinatorNamespace::new(|name| Echo {
            name: name.to_string(),
        });
        let handle = namespace.locate("alpha");
        assert_eq!(handle.name(), "alpha");

        let response = handle
            .forward(Request::builder().uri("/some/path").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"alpha /some/path");
    }

    #[test]
    fn test_error_is_bare_500() {
        let error = CoordinatorError::Engine(BindingError::InstanceNotFound("x".to_string()));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
