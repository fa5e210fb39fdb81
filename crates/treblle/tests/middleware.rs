use bytes::Bytes;
use futures_util::FutureExt;
use http::{Request, Response, StatusCode};
use http_body::Frame;
use http_body_util::{BodyExt, Full};
use serde_json::json;
use serial_test::serial;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tower::{service_fn, Layer, ServiceBuilder, ServiceExt};
use treblle::environment::ENVIRONMENT_VARIABLES;
use treblle::prelude::*;
use treblle::Payload;
use treblle_testing::{MockCollector, RecordingTransport, RequestMatcher};

type Body = Full<Bytes>;

fn clear_env() {
    for name in ENVIRONMENT_VARIABLES {
        std::env::remove_var(name);
    }
}

fn client(config: TreblleConfig) -> (Treblle, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::new());
    let treblle = Treblle::with_transport(config, transport.clone()).unwrap();
    (treblle, transport)
}

async fn single_payload(treblle: &Treblle, transport: &RecordingTransport) -> Payload {
    assert!(treblle.processor().drain(Duration::from_secs(5)).await);
    let mut payloads = transport.payloads();
    assert_eq!(payloads.len(), 1, "expected exactly one payload");
    payloads.remove(0)
}

async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn echo(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let body = req.into_body().collect().await.unwrap().to_bytes();
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("content-type", "application/json")
        .header("x-handler", "echo")
        .body(Body::from(body))
        .unwrap())
}

#[tokio::test]
#[serial]
async fn test_request_body_reaches_handler_and_response_is_untouched() {
    clear_env();
    let (treblle, transport) = client(TreblleConfig::new("key", "proj"));
    let svc = TreblleLayer::new(treblle.clone()).layer(service_fn(echo));

    let raw = r#"{"email":"a@b.c","password":"hunter2","nested":{"card_number":"4111"}}"#;
    let req = Request::post("http://api.test/users?page=2")
        .header("content-type", "application/json")
        .body(Body::from(raw))
        .unwrap();
    let response = svc.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["x-handler"], "echo");
    assert_eq!(body_bytes(response).await, raw.as_bytes());

    let payload = single_payload(&treblle, &transport).await;
    let request = &payload.data.request;
    assert_eq!(request.method, "POST");
    assert_eq!(request.url, "http://api.test/users?page=2");
    assert_eq!(request.route_path, "/users");
    assert_eq!(
        request.body,
        Some(json!({
            "email": "a@b.c",
            "password": "*********",
            "nested": {"card_number": "*********"}
        }))
    );
    assert_eq!(payload.data.response.code, 201);
    assert_eq!(payload.data.response.body["password"], "*********");
    assert_eq!(payload.data.response.size, raw.len());
    assert!(payload.data.response.errors.is_empty());
}

#[tokio::test]
#[serial]
async fn test_sensitive_headers_and_query_masked() {
    clear_env();
    let (treblle, transport) = client(TreblleConfig::new("key", "proj"));
    let svc = TreblleLayer::new(treblle.clone()).layer(service_fn(echo));

    let req = Request::get("http://api.test/login?password=secret&user=bob")
        .header("authorization", "Bearer abc.def")
        .header("x-secret", "k-123")
        .body(Body::default())
        .unwrap();
    svc.oneshot(req).await.unwrap();

    let payload = single_payload(&treblle, &transport).await;
    let request = &payload.data.request;
    assert_eq!(request.headers["authorization"], "Bearer *********");
    assert_eq!(request.headers["x-secret"], "*********");
    assert_eq!(
        request.query,
        Some(json!({"password": "*********", "user": "bob"}))
    );
    assert!(!request.url.contains("secret"));
    assert!(request.url.ends_with("user=bob"));
    assert_eq!(request.body, None);
}

#[tokio::test]
#[serial]
async fn test_non_json_request_body_recorded_as_validation_error() {
    clear_env();
    let (treblle, transport) = client(TreblleConfig::new("key", "proj"));
    let svc = TreblleLayer::new(treblle.clone()).layer(service_fn(echo));

    let req = Request::post("/upload")
        .header("content-type", "text/plain")
        .body(Body::from("plain text"))
        .unwrap();
    let response = svc.oneshot(req).await.unwrap();
    assert_eq!(body_bytes(response).await, "plain text");

    let payload = single_payload(&treblle, &transport).await;
    assert_eq!(payload.data.request.body, Some(json!({})));
    let errors = &payload.data.response.errors;
    assert_eq!(errors.len(), 2, "request and response body errors: {errors:?}");
    assert_eq!(errors[0].kind, ErrorKind::ValidationError);
    assert_eq!(errors[0].source, "request_body");
}

#[tokio::test]
#[serial]
async fn test_oversize_response_replaced_in_payload_only() {
    clear_env();
    let (treblle, transport) = client(TreblleConfig::new("key", "proj").max_payload_size(16));
    let big = "x".repeat(64);
    let body = big.clone();
    let svc = TreblleLayer::new(treblle.clone()).layer(service_fn(move |_req: Request<Body>| {
        let body = body.clone();
        async move { Ok::<_, Infallible>(Response::new(Body::from(body))) }
    }));

    let response = svc.oneshot(Request::get("/big").body(Body::default()).unwrap()).await.unwrap();
    assert_eq!(body_bytes(response).await, big.as_bytes());

    let payload = single_payload(&treblle, &transport).await;
    let response = &payload.data.response;
    assert_eq!(response.body, json!({}));
    assert_eq!(response.size, 0);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].kind, ErrorKind::ServerError);
    assert!(response.errors[0].message.contains("64 bytes"));
}

#[tokio::test]
#[serial]
async fn test_handler_panic_is_contained_as_500() {
    clear_env();
    let (treblle, transport) = client(TreblleConfig::new("key", "proj"));
    let svc = TreblleLayer::new(treblle.clone()).layer(service_fn(|_req: Request<Body>| async {
        if true {
            panic!("handler exploded");
        }
        Ok::<Response<Body>, Infallible>(Response::new(Body::default()))
    }));

    let fut = svc.oneshot(Request::get("/boom").body(Body::default()).unwrap());
    let response = AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .expect("panic escaped the middleware")
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_bytes(response).await.is_empty());

    let payload = single_payload(&treblle, &transport).await;
    assert_eq!(payload.data.response.code, 500);
    let errors = &payload.data.response.errors;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::UnhandledException);
    assert_eq!(errors[0].message, "panic recovered: handler exploded");
}

/// Response body that either yields its bytes once or fails on first poll.
enum FlakyBody {
    Data(Option<Bytes>),
    Broken,
}

impl From<Bytes> for FlakyBody {
    fn from(bytes: Bytes) -> Self {
        Self::Data(Some(bytes))
    }
}

impl http_body::Body for FlakyBody {
    type Data = Bytes;
    type Error = &'static str;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        match self.get_mut() {
            Self::Data(bytes) => Poll::Ready(bytes.take().map(|b| Ok(Frame::data(b)))),
            Self::Broken => Poll::Ready(Some(Err("connection reset"))),
        }
    }
}

#[tokio::test]
#[serial]
async fn test_response_body_failure_keeps_status_and_records_error() {
    clear_env();
    let (treblle, transport) = client(TreblleConfig::new("key", "proj"));
    let svc = TreblleLayer::new(treblle.clone()).layer(service_fn(|_req: Request<Body>| async {
        Ok::<_, Infallible>(
            Response::builder()
                .status(StatusCode::ACCEPTED)
                .header("x-handler", "flaky")
                .body(FlakyBody::Broken)
                .unwrap(),
        )
    }));

    let response = svc
        .oneshot(Request::get("/stream").body(Body::default()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers()["x-handler"], "flaky");
    let forwarded = response.into_body().collect().await.unwrap().to_bytes();
    assert!(forwarded.is_empty());

    let payload = single_payload(&treblle, &transport).await;
    assert_eq!(payload.data.response.code, 202);
    let errors = &payload.data.response.errors;
    assert!(errors
        .iter()
        .any(|e| e.kind == ErrorKind::ServerError && e.source == "response_body"));
}

#[tokio::test]
#[serial]
async fn test_inner_error_is_propagated() {
    clear_env();
    let (treblle, transport) = client(TreblleConfig::new("key", "proj"));
    let svc = TreblleLayer::new(treblle.clone()).layer(service_fn(|_req: Request<Body>| async {
        Err::<Response<Body>, &'static str>("backend down")
    }));

    let err = svc
        .oneshot(Request::get("/fail").body(Body::default()).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err, "backend down");

    let payload = single_payload(&treblle, &transport).await;
    assert_eq!(payload.data.response.code, 500);
    assert_eq!(payload.data.response.errors[0].kind, ErrorKind::ServerError);
}

#[tokio::test]
#[serial]
async fn test_ignored_environment_passes_through() {
    clear_env();
    std::env::set_var("APP_ENV", "local");
    let (treblle, transport) = client(TreblleConfig::new("key", "proj"));
    clear_env();

    let svc = TreblleLayer::new(treblle.clone()).layer(service_fn(echo));
    let response = svc
        .oneshot(Request::post("/x").body(Body::from("not json")).unwrap())
        .await
        .unwrap();
    assert_eq!(body_bytes(response).await, "not json");

    assert!(treblle.processor().drain(Duration::from_secs(1)).await);
    assert!(transport.is_empty());
    assert_eq!(transport.attempts(), 0);
}

#[tokio::test]
#[serial]
async fn test_route_pattern_layer_groups_requests() {
    clear_env();
    let (treblle, transport) = client(TreblleConfig::new("key", "proj"));
    let svc = ServiceBuilder::new()
        .layer(RoutePatternLayer::new("/users/:id/posts/{post_id:[0-9]+}"))
        .layer(TreblleLayer::new(treblle.clone()))
        .service(service_fn(echo));

    svc.oneshot(Request::get("/users/42/posts/7").body(Body::default()).unwrap())
        .await
        .unwrap();

    let payload = single_payload(&treblle, &transport).await;
    assert_eq!(payload.data.request.route_path, "/users/{id}/posts/{post_id}");
}

#[tokio::test]
#[serial]
async fn test_raw_path_normalized_without_pattern() {
    clear_env();
    let (treblle, transport) = client(TreblleConfig::new("key", "proj"));
    let svc = TreblleLayer::new(treblle.clone()).layer(service_fn(echo));

    svc.oneshot(
        Request::get("/orders/123e4567-e89b-12d3-a456-426614174000/items/9")
            .body(Body::default())
            .unwrap(),
    )
    .await
    .unwrap();

    let payload = single_payload(&treblle, &transport).await;
    assert_eq!(payload.data.request.route_path, "/orders/{uuid}/items/{id}");
}

#[tokio::test]
#[serial]
async fn test_delivery_filter_skips_errors() {
    clear_env();
    let config = TreblleConfig::new("key", "proj").delivery_filter(DeliveryFilter::SuccessOnly);
    let (treblle, transport) = client(config);
    let svc = TreblleLayer::new(treblle.clone()).layer(service_fn(|_req: Request<Body>| async {
        Ok::<_, Infallible>(
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::default())
                .unwrap(),
        )
    }));

    let response = svc
        .oneshot(Request::get("/missing").body(Body::default()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert!(treblle.processor().drain(Duration::from_secs(1)).await);
    assert!(transport.is_empty());
}

#[tokio::test]
#[serial]
async fn test_end_to_end_against_mock_collector() {
    clear_env();
    let collector = MockCollector::start().await.unwrap();
    collector
        .expect(
            RequestMatcher::new()
                .api_key("live-key")
                .field("/project_id", "proj")
                .field("/data/request/route_path", "/users/{id}")
                .body_contains("*********"),
        )
        .once();

    let treblle = Treblle::new(
        TreblleConfig::new("live-key", "proj").endpoint(collector.base_url()),
    )
    .unwrap();
    let svc = TreblleLayer::new(treblle.clone()).layer(service_fn(echo));

    let req = Request::put("/users/5")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"password":"p"}"#))
        .unwrap();
    svc.oneshot(req).await.unwrap();

    assert!(collector.wait_for_requests(1, Duration::from_secs(5)).await);
    assert!(treblle.shutdown().await);
    collector.verify();
}
