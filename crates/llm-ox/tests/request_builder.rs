use std::time::Duration;

use llm_ox::{
    AuthMethod, ChunkDecoder, Endpoint, GenerateOptions, Message, RequestBuilder, RequestConfig,
    RequestContext, RequestError, RetryPolicy, StreamState,
    hooks::{Hook, RequestHookContext},
    error::HookError,
};
use serde::Deserialize;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

#[derive(Debug, Deserialize, PartialEq)]
struct Echo {
    ok: bool,
}

#[derive(Deserialize)]
struct Piece {
    text: String,
    #[serde(default)]
    last: bool,
}

struct PieceDecoder;

impl ChunkDecoder for PieceDecoder {
    type Chunk = Piece;

    fn decode(&mut self, chunk: Piece, state: &mut StreamState) -> Result<(), RequestError> {
        state.text(0, &chunk.text);
        if chunk.last {
            state.finish(None);
        }
        Ok(())
    }
}

fn builder(server: &MockServer) -> RequestBuilder {
    RequestBuilder::new(
        reqwest::Client::new(),
        RequestConfig::new(server.uri())
            .with_auth(AuthMethod::Bearer("sk-test".into()))
            .with_header("x-extra", "1"),
    )
}

fn options() -> GenerateOptions {
    GenerateOptions::builder()
        .messages(vec![Message::user(["hi"])])
        .build()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(3)
        .base_wait(Duration::from_millis(1))
        .max_wait(Duration::from_millis(5))
        .build()
}

#[tokio::test]
async fn rate_limited_request_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/echo"))
        .respond_with(ResponseTemplate::new(429).set_body_json(
            json!({"error": {"type": "rate_limit_error", "message": "slow down"}}),
        ))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/echo"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("x-extra", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let echo: Echo = builder(&server)
        .request_json(
            &RequestContext::new(),
            &fast_retry(),
            "test",
            &Endpoint::new("v1/echo"),
            json!({"model": "m"}),
            &options(),
        )
        .await
        .unwrap();
    assert_eq!(echo, Echo { ok: true });
}

#[tokio::test]
async fn bad_request_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": {"message": "bad model", "type": "invalid_request_error"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = builder(&server)
        .request_json::<Echo>(
            &RequestContext::new(),
            &fast_retry(),
            "test",
            &Endpoint::new("v1/echo"),
            json!({}),
            &options(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert!(err.to_string().contains("bad model"));
}

#[tokio::test]
async fn provider_options_reach_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "m", "seed": 42})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let mut opts = options();
    opts.provider_options.insert("seed".into(), json!(42));
    opts.request_headers.push(("x-trace".into(), "abc".into()));

    let echo: Echo = builder(&server)
        .request_json(
            &RequestContext::new(),
            &RetryPolicy::none(),
            "test",
            &Endpoint::new("v1/echo"),
            json!({"model": "m"}),
            &opts,
        )
        .await
        .unwrap();
    assert!(echo.ok);
}

#[tokio::test]
async fn stream_open_sends_sse_headers_and_fails_early_on_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("accept", "text/event-stream"))
        .and(header("cache-control", "no-cache"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({"error": {"message": "overloaded"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = builder(&server)
        .request_stream(
            &RequestContext::new(),
            "test",
            &Endpoint::new("v1/stream"),
            json!({}),
            &options(),
            PieceDecoder,
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn stream_yields_prefilled_text() {
    let server = MockServer::start().await;
    let body = "data: {\"text\":\"world\"}\n\ndata: {\"text\":\"!\",\"last\":true}\n\ndata: [DONE]\n\n";
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let mut opts = options();
    opts.prefill = Some("Hello ".into());

    let response = builder(&server)
        .request_stream(
            &RequestContext::new(),
            "test",
            &Endpoint::new("v1/stream"),
            json!({}),
            &opts,
            PieceDecoder,
        )
        .await
        .unwrap()
        .accumulate()
        .await
        .unwrap();
    assert_eq!(response.text(), "Hello world!");
}

struct Deny;

impl Hook for Deny {
    fn before_request(&self, ctx: &RequestHookContext<'_>) -> Result<(), HookError> {
        assert!(!ctx.body.is_empty());
        Err("blocked".into())
    }
}

#[tokio::test]
async fn before_request_hook_aborts_without_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(0)
        .mount(&server)
        .await;

    let mut opts = options();
    opts.hooks = opts.hooks.clone().with(Deny);

    let err = builder(&server)
        .request_json::<Echo>(
            &RequestContext::new(),
            &RetryPolicy::none(),
            "test",
            &Endpoint::new("v1/echo"),
            json!({}),
            &opts,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Hook(_)));
}
