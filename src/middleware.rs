use crate::error::{ThrottlerError, ThrottlerResult};
use crate::options::ThrottleOptions;
use crate::throttler::Throttler;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

/// Throttling middleware.
///
/// Cloning the layer shares the same counters and notifier, so one layer
/// applied to several routers throttles them together.
///
/// Rejected requests get a `429 Too Many Requests` plain-text response and
/// never reach the inner service. If the key cannot be resolved, or the
/// store fails, the check is abandoned and the request goes through.
#[derive(Clone)]
pub struct ThrottleLayer {
    throttler: Arc<Throttler>,
}

impl ThrottleLayer {
    /// Must be called from within a Tokio runtime.
    pub fn new(options: ThrottleOptions) -> ThrottlerResult<Self> {
        Ok(Self {
            throttler: Arc::new(Throttler::new(options)?),
        })
    }

    pub fn throttler(&self) -> &Arc<Throttler> {
        &self.throttler
    }

    /// Flush pending log events and stop the background notifier.
    pub async fn shutdown(&self) {
        self.throttler.shutdown().await;
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = ThrottleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService {
            inner,
            throttler: self.throttler.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ThrottleService<S> {
    inner: S,
    throttler: Arc<Throttler>,
}

impl<S> Service<Request> for ThrottleService<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Response: IntoResponse,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // The clone may not be ready; keep the instance that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let throttler = self.throttler.clone();

        // Resolve before going async: the request body is not `Sync`.
        let key = if throttler.is_bypassed() {
            None
        } else {
            match throttler.resolve_key(&request) {
                Ok(key) => Some(key),
                Err(err) => {
                    warn!(error = %err, "Could not resolve throttling key, admitting request");
                    None
                }
            }
        };

        Box::pin(async move {
            if let Some(key) = key {
                match throttler.check_key(&key).await {
                    Ok(()) => {}
                    Err(err @ ThrottlerError::LimitReached(_)) => return Ok(err.into_response()),
                    Err(err) => {
                        warn!(key = %key, error = %err, "Throttle check failed, admitting request");
                    }
                }
            }

            inner.call(request).await.map(IntoResponse::into_response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LIMIT_REACHED_MESSAGE;
    use crate::limit::Threshold;
    use crate::store::DEFAULT_TTL;
    use crate::throttler::tests::{SpyLogger, SpyStore};
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{self, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn app(layer: &ThrottleLayer) -> Router {
        Router::new()
            .route("/", get(|| async { "hello" }))
            .layer(layer.clone())
    }

    fn request_from(addr: &str) -> Request {
        let addr: SocketAddr = addr.parse().unwrap();
        http::Request::builder()
            .uri("/")
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap()
    }

    async fn status_of(app: &Router, request: Request) -> StatusCode {
        app.clone().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_unlimited_returns_200() {
        let layer = ThrottleLayer::new(ThrottleOptions::unlimited().with_verbose(false)).unwrap();
        let app = app(&layer);

        for _ in 0..10 {
            assert_eq!(status_of(&app, request_from("127.0.0.1:4000")).await, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_unlimited_skips_resolution_and_store() {
        let store = Arc::new(SpyStore::new(DEFAULT_TTL));
        let layer = ThrottleLayer::new(ThrottleOptions::unlimited().with_store(store.clone())).unwrap();
        let app = app(&layer);

        // No remote address at all: the fast path never looks.
        let request = http::Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(status_of(&app, request).await, StatusCode::OK);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_second_request_returns_429() {
        let layer = ThrottleLayer::new(ThrottleOptions::new(1u64).with_verbose(false)).unwrap();
        let app = app(&layer);

        assert_eq!(status_of(&app, request_from("127.0.0.1:4000")).await, StatusCode::OK);

        let response = app.clone().oneshot(request_from("127.0.0.1:4001")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], LIMIT_REACHED_MESSAGE.as_bytes());
    }

    #[tokio::test]
    async fn test_only_first_of_many_is_admitted() {
        let layer = ThrottleLayer::new(ThrottleOptions::new(1u64).with_verbose(false)).unwrap();
        let app = app(&layer);

        for n in 1..=6 {
            let expected = if n == 1 { StatusCode::OK } else { StatusCode::TOO_MANY_REQUESTS };
            assert_eq!(status_of(&app, request_from("10.0.0.1:80")).await, expected);
        }
        // Other clients have their own counter.
        assert_eq!(status_of(&app, request_from("10.0.0.2:80")).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_message_is_response_body() {
        let layer = ThrottleLayer::new(
            ThrottleOptions::new(1u64)
                .with_verbose(false)
                .with_limit_reached_message("Too many requests, try later"),
        )
        .unwrap();
        let app = app(&layer);

        let _ = app.clone().oneshot(request_from("10.0.0.1:80")).await.unwrap();
        let response = app.clone().oneshot(request_from("10.0.0.1:80")).await.unwrap();

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Too many requests, try later");
    }

    #[tokio::test]
    async fn test_verbose_false_never_logs() {
        let logger = Arc::new(SpyLogger::default());
        let layer = ThrottleLayer::new(
            ThrottleOptions::new(1u64)
                .with_verbose(false)
                .with_logger(logger.clone()),
        )
        .unwrap();
        let app = app(&layer);

        for _ in 0..3 {
            let _ = status_of(&app, request_from("10.0.0.1:80")).await;
        }
        layer.shutdown().await;

        assert!(logger.messages().is_empty());
    }

    #[tokio::test]
    async fn test_verbose_logs_throttled_key_once() {
        let logger = Arc::new(SpyLogger::default());
        let layer = ThrottleLayer::new(
            ThrottleOptions::new(1u64)
                .with_verbose(true)
                .with_logger(logger.clone()),
        )
        .unwrap();
        let app = app(&layer);

        assert_eq!(status_of(&app, request_from("10.0.0.7:80")).await, StatusCode::OK);
        assert_eq!(
            status_of(&app, request_from("10.0.0.7:80")).await,
            StatusCode::TOO_MANY_REQUESTS
        );
        layer.shutdown().await;

        let messages = logger.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("10.0.0.7"));
    }

    #[tokio::test]
    async fn test_range_override_unlimited() {
        let layer = ThrottleLayer::new(
            ThrottleOptions::new(1u64)
                .with_verbose(false)
                .with_range_override("127.0.0.1/24".parse().unwrap(), Threshold::Unlimited),
        )
        .unwrap();
        let app = app(&layer);

        for _ in 0..10 {
            assert_eq!(status_of(&app, request_from("127.0.0.1:80")).await, StatusCode::OK);
        }
    }

    // Resolver failures admit the request while exhausted limits reject it.
    // The asymmetry is intentional.
    #[tokio::test]
    async fn test_unresolvable_request_is_admitted() {
        let store = Arc::new(SpyStore::new(DEFAULT_TTL));
        let layer = ThrottleLayer::new(
            ThrottleOptions::new(0u64)
                .with_verbose(false)
                .with_store(store.clone()),
        )
        .unwrap();
        let app = app(&layer);

        for _ in 0..3 {
            let request = http::Request::builder().uri("/").body(Body::empty()).unwrap();
            assert_eq!(status_of(&app, request).await, StatusCode::OK);
        }
        assert_eq!(store.calls(), 0);
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl crate::store::CounterStore for FailingStore {
        async fn increment(&self, _key: &str, _delta: i64) -> ThrottlerResult<i64> {
            Err(ThrottlerError::Store("backend unavailable".into()))
        }

        async fn add_item(&self, _key: &str, _value: i64) -> ThrottlerResult<()> {
            Err(ThrottlerError::Store("backend unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_admits_request() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = hits.clone();
        let layer = ThrottleLayer::new(
            ThrottleOptions::new(0u64)
                .with_verbose(false)
                .with_store(Arc::new(FailingStore)),
        )
        .unwrap();
        let app = Router::new()
            .route(
                "/",
                get(move || {
                    let counted = counted.clone();
                    async move {
                        counted.fetch_add(1, Ordering::SeqCst);
                        "hello"
                    }
                }),
            )
            .layer(layer.clone());

        for _ in 0..3 {
            let response = app.clone().oneshot(request_from("10.0.0.1:80")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], b"hello");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_custom_resolver() {
        let layer = ThrottleLayer::new(
            ThrottleOptions::new(1u64)
                .with_verbose(false)
                .with_key_resolver(|request: &Request| -> ThrottlerResult<String> {
                    request
                        .headers()
                        .get("x-api-key")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                        .ok_or_else(|| ThrottlerError::MalformedAddress("no api key".into()))
                }),
        )
        .unwrap();
        let app = app(&layer);

        let keyed = |key: &'static str| {
            http::Request::builder()
                .uri("/")
                .header("x-api-key", key)
                .body(Body::empty())
                .unwrap()
        };

        assert_eq!(status_of(&app, keyed("alice")).await, StatusCode::OK);
        assert_eq!(status_of(&app, keyed("alice")).await, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_of(&app, keyed("bob")).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cloned_layers_share_counters() {
        let layer = ThrottleLayer::new(ThrottleOptions::new(1u64).with_verbose(false)).unwrap();
        let first = app(&layer);
        let second = app(&layer);

        assert_eq!(status_of(&first, request_from("10.0.0.1:80")).await, StatusCode::OK);
        assert_eq!(
            status_of(&second, request_from("10.0.0.1:80")).await,
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
