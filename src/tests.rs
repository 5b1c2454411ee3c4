#[cfg(test)]
mod integration_tests {
    use crate::cache::{CacheTtl, MemoryCacheStore, SystemClock};
    use crate::testing::{writing_encoder, FakeEngine, FAKE_WEBP, PNG_1X1};
    use crate::{
        build_router, AppState, BearerAuth, CacheStore, CaptureService, CaptureSettings,
        ConcurrencyGate, Config, EngineHandle, Metrics, X_CACHE,
    };
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use axum::Router;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        engine: Arc<FakeEngine>,
        handle: EngineHandle,
        _dir: tempfile::TempDir,
    }

    impl TestApp {
        async fn new(token: Option<&str>, ready: bool) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = Config {
                storage_dir: dir.path().to_path_buf(),
                ..Default::default()
            };

            let engine = Arc::new(FakeEngine::new());
            let handle = EngineHandle::new();
            if ready {
                handle.mark_ready(engine.clone()).await;
            }

            let cache: Arc<dyn CacheStore> =
                Arc::new(MemoryCacheStore::new(CacheTtl::from_days(30), Arc::new(SystemClock)));
            let service = CaptureService::new(
                handle.clone(),
                cache,
                Arc::new(writing_encoder()),
                ConcurrencyGate::new(2),
                CaptureSettings::from_config(&config),
                Metrics::noop(),
            );
            let state = AppState {
                service,
                prometheus: None,
            };

            Self {
                router: build_router(state, BearerAuth::new(token)),
                engine,
                handle,
                _dir: dir,
            }
        }

        async fn get(&self, uri: &str) -> Response {
            self.send(Request::get(uri).body(Body::empty()).unwrap()).await
        }

        async fn send(&self, request: Request<Body>) -> Response {
            self.router.clone().oneshot(request).await.unwrap()
        }
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_cold_capture_then_cache_hit() {
        let app = TestApp::new(None, true).await;

        let response = app.get("/capture?url=example.com&format=png").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()[X_CACHE], "MISS");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], PNG_1X1);

        let response = app.get("/capture?url=http://example.com/&format=still").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CACHE], "HIT");
        assert_eq!(app.engine.stats().opens(), 1);
    }

    #[tokio::test]
    async fn test_format_defaults_to_still() {
        let app = TestApp::new(None, true).await;
        let response = app.get("/capture?url=example.com").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    }

    #[tokio::test(start_paused = true)]
    async fn test_animated_capture() {
        let app = TestApp::new(None, true).await;

        let response = app.get("/capture?url=example.com&format=webp&length=2").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], FAKE_WEBP);
        assert_eq!(app.engine.stats().frames(), 8);
    }

    #[tokio::test]
    async fn test_nocache_forces_render() {
        let app = TestApp::new(None, true).await;
        app.get("/capture?url=example.com").await;

        let response = app.get("/capture?url=example.com&nocache").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CACHE], "MISS");
        assert_eq!(app.engine.stats().opens(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_length_is_rejected_before_render() {
        let app = TestApp::new(None, true).await;

        let response = app.get("/capture?url=example.com&format=webp&length=6").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "`length` must be integer 1-5.");
        assert_eq!(app.engine.stats().opens(), 0);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let app = TestApp::new(None, true).await;

        for uri in [
            "/capture",
            "/capture?format=png",
            "/capture?url=example.com&format=gif",
            "/capture?url=example.com&format=webp",
            "/capture?url=not%20a%20url",
        ] {
            let response = app.get(uri).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert!(json_body(response).await["error"].is_string());
        }
        assert_eq!(app.engine.stats().opens(), 0);
    }

    #[tokio::test]
    async fn test_not_ready_returns_503() {
        let app = TestApp::new(None, false).await;

        let response = app.get("/capture?url=example.com").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app.get("/capture?url=example.com&format=webp&length=6").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app.get("/healthz").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["status"], "starting");
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let app = TestApp::new(None, true).await;

        for uri in ["/healthz", "/health"] {
            let response = app.get(uri).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["status"], "ready");
            assert_eq!(body["max_concurrent_captures"], 2);
        }

        assert!(app.handle.begin_shutdown().await.is_some());
        let response = app.get("/health").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["status"], "shutting_down");
    }

    #[tokio::test]
    async fn test_bearer_auth() {
        let app = TestApp::new(Some("s3cret"), true).await;

        let response = app.get("/capture?url=example.com").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Missing Authorization header");

        let request = Request::get("/capture?url=example.com")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.send(request).await.status(), StatusCode::FORBIDDEN);
        assert_eq!(app.engine.stats().opens(), 0);

        let request = Request::get("/capture?url=example.com")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.send(request).await.status(), StatusCode::OK);

        // Health stays public.
        assert_eq!(app.get("/healthz").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_disabled_is_404() {
        let app = TestApp::new(None, true).await;
        assert_eq!(app.get("/metrics").await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_request_and_key_agree_across_spellings() {
        use crate::{derive_key, CaptureFormat, CaptureRequest};

        let a = assert_ok!(CaptureRequest::new("Example.com", CaptureFormat::Still, None, false));
        let b = assert_ok!(CaptureRequest::new(
            "http://example.com:80/",
            CaptureFormat::Still,
            Some(4),
            true
        ));
        assert_eq!(
            derive_key(a.url(), a.format(), a.sequence_length()),
            derive_key(b.url(), b.format(), b.sequence_length())
        );
        assert_err!(CaptureRequest::new("example.com", CaptureFormat::Animated, Some(0), false));
    }
}
