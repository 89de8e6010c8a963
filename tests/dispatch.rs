//! End-to-end dispatch through `Router::call`: routing, middleware, handler
//! invocation, rendering.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};
use trellis::middleware::{Halt, cors, from_fn};
use trellis::{
    Api, Context, Operation, Page, Payload, Request, Resource, ResourceError, Response, Router,
    Serializer, health,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Implements `read_one` only.
struct Foo {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Resource for Foo {
    type Item = Json;

    fn name(&self) -> &str { "foo" }

    async fn read_one(&self, _ctx: &Context, id: &str, version: &str) -> Result<Json, ResourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match id {
            "42" => Ok(json!({"id": id, "version": version})),
            _ => Err(ResourceError::not_found(format!("foo {id}"))),
        }
    }
}

fn foo() -> (Foo, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (Foo { calls: Arc::clone(&calls) }, calls)
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
struct Note {
    #[serde(default)]
    id: u32,
    text: String,
}

/// Full CRUD over a sorted map, cursor = id to resume after.
#[derive(Default)]
struct Notes {
    store: Mutex<BTreeMap<u32, Note>>,
    seen_limits: Mutex<Vec<usize>>,
}

impl Notes {
    fn seeded(n: u32) -> Self {
        let notes = Self::default();
        for id in 1..=n {
            notes.store.lock().insert(id, Note { id, text: format!("note {id}") });
        }
        notes
    }
}

fn parse_id(id: &str) -> Result<u32, ResourceError> {
    id.parse().map_err(|_| ResourceError::bad_request(format!("invalid id `{id}`")))
}

#[async_trait]
impl Resource for Notes {
    type Item = Note;

    fn name(&self) -> &str { "notes" }

    fn authorize(&self, req: &Request) -> Result<(), ResourceError> {
        match req.header("x-api-key") {
            Some("letmein") => Ok(()),
            _ => Err(ResourceError::unauthorized("missing api key")),
        }
    }

    async fn create(&self, ctx: &Context, payload: Payload<Note>, _version: &str) -> Result<Note, ResourceError> {
        let mut note = payload.decode()?;
        let mut store = self.store.lock();
        note.id = store.keys().next_back().map_or(1, |last| last + 1);
        store.insert(note.id, note.clone());
        let id = note.id.to_string();
        if let Ok(location) = ctx.build_url("notes", Operation::ReadOne, &[("id", id.as_str())]) {
            ctx.add_message(format!("created {location}"));
        }
        Ok(note)
    }

    async fn read_one(&self, _ctx: &Context, id: &str, _version: &str) -> Result<Note, ResourceError> {
        let id = parse_id(id)?;
        self.store.lock().get(&id).cloned().ok_or_else(|| ResourceError::not_found(format!("note {id}")))
    }

    async fn read_list(
        &self,
        _ctx: &Context,
        limit: usize,
        cursor: &str,
        _version: &str,
    ) -> Result<Page<Note>, ResourceError> {
        self.seen_limits.lock().push(limit);
        let after = if cursor.is_empty() { 0 } else { parse_id(cursor)? };
        let store = self.store.lock();
        let mut rest = store.range(after + 1..).map(|(_, n)| n.clone());
        let items: Vec<Note> = rest.by_ref().take(limit).collect();
        let next = rest.next().and(items.last()).map(|last| last.id.to_string());
        Ok(match next {
            Some(cursor) => Page::with_next(items, cursor),
            None => Page::last(items),
        })
    }

    async fn update(
        &self,
        _ctx: &Context,
        id: &str,
        payload: Payload<Note>,
        _version: &str,
    ) -> Result<Note, ResourceError> {
        let id = parse_id(id)?;
        let mut note = payload.decode()?;
        note.id = id;
        let mut store = self.store.lock();
        let slot = store.get_mut(&id).ok_or_else(|| ResourceError::not_found(format!("note {id}")))?;
        *slot = note.clone();
        Ok(note)
    }

    async fn delete(&self, _ctx: &Context, id: &str, _version: &str) -> Result<Note, ResourceError> {
        let id = parse_id(id)?;
        self.store.lock().remove(&id).ok_or_else(|| ResourceError::not_found(format!("note {id}")))
    }
}

fn request(method: Method, uri: &str, body: &str) -> http::Request<Bytes> {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "api.test")
        .header("x-api-key", "letmein")
        .body(Bytes::copy_from_slice(body.as_bytes()))
        .unwrap()
}

fn get(uri: &str) -> http::Request<Bytes> {
    request(Method::GET, uri, "")
}

fn envelope(res: &Response) -> Json {
    serde_json::from_slice(res.body()).unwrap()
}

// ── Handler with a single operation ───────────────────────────────────────────

#[tokio::test]
async fn implemented_read_returns_200_with_resource() {
    let (foo, calls) = foo();
    let router = Api::new().resource(foo).into_router();

    let res = router.call(get("/api/v1/foo/42")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.headers()[http::header::CONTENT_TYPE], "application/json");
    assert_eq!(
        envelope(&res),
        json!({"status": 200, "messages": [], "result": {"id": "42", "version": "1"}}),
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unimplemented_create_is_405() {
    let (foo, _) = foo();
    let router = Api::new().resource(foo).into_router();

    let res = router.call(request(Method::POST, "/api/v1/foo", r#"{"x":1}"#)).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(envelope(&res), json!({"status": 405, "messages": ["method not allowed"]}));

    let res = router.call(request(Method::POST, "/api/v1/foo", "")).await;
    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn handler_error_maps_to_status_and_message() {
    let (foo, _) = foo();
    let router = Api::new().resource(foo).into_router();

    let res = router.call(get("/api/v1/foo/7")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(envelope(&res), json!({"status": 404, "messages": ["not found: foo 7"]}));
}

#[tokio::test]
async fn path_without_version_prefix_is_404() {
    let (foo, calls) = foo();
    let router = Api::new().resource(foo).into_router();

    let res = router.call(get("/api/1/foo/42")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    assert!(res.body().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ── Middleware ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cors_preflight_never_reaches_the_handler() {
    let (foo, calls) = foo();
    let router = Api::new().middleware(cors()).resource(foo).into_router();

    for uri in ["/api/v1/foo", "/api/v1/foo/42"] {
        let res = router.call(request(Method::OPTIONS, uri, "")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.headers()[http::header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(res.body().is_empty());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cors_headers_survive_to_the_rendered_response() {
    let (foo, _) = foo();
    let router = Api::new().middleware(cors()).resource(foo).into_router();

    let res = router.call(get("/api/v1/foo/42")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.headers()[http::header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn middleware_halt_writes_status_and_body() {
    let (foo, calls) = foo();
    let router = Api::new()
        .middleware(from_fn(|_req, _res| {
            Some(Halt::new(StatusCode::SERVICE_UNAVAILABLE).with_body("maintenance"))
        }))
        .resource(foo)
        .into_router();

    let res = router.call(get("/api/v1/foo/42")).await;
    assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.body().as_ref(), b"maintenance");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unauthorized_request_stops_before_the_handler() {
    let router = Api::new().resource(Notes::seeded(3)).into_router();
    let req = http::Request::get("/api/v1/notes/1").body(Bytes::new()).unwrap();

    let res = router.call(req).await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.body().as_ref(), b"unauthorized: missing api key");
}

#[tokio::test]
async fn health_routes_skip_the_auth_gate() {
    let router = Api::new()
        .resource(Notes::seeded(1))
        .route(Method::GET, "/healthz", health::liveness)
        .into_router();

    let res = router.call(http::Request::get("/healthz").body(Bytes::new()).unwrap()).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.body().as_ref(), b"ok");
}

#[tokio::test]
async fn user_middleware_runs_before_the_auth_gate() {
    let order = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&order);
    let router = Api::new()
        .middleware(from_fn(move |_req, _res| {
            seen.fetch_add(1, Ordering::SeqCst);
            None
        }))
        .resource(Notes::seeded(1))
        .into_router();

    let req = http::Request::get("/api/v1/notes/1").body(Bytes::new()).unwrap();
    assert_eq!(router.call(req).await.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(order.load(Ordering::SeqCst), 1);
}

// ── Content negotiation ───────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_format_is_not_implemented() {
    let (foo, calls) = foo();
    let api = Api::new().resource(foo);
    assert_eq!(api.serializers().available_formats(), ["json"]);
    let router = api.into_router();

    let res = router.call(get("/api/v1/foo/42?format=xml")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_ACCEPTABLE);
    assert_eq!(envelope(&res), json!({"status": 406, "messages": ["format not implemented: xml"]}));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

struct Csv;

impl Serializer for Csv {
    fn content_type(&self) -> &'static str { "text/csv" }

    fn serialize(&self, ctx: &Context) -> Result<Bytes, ResourceError> {
        let rows: Vec<String> = match ctx.result() {
            Some(Json::Array(items)) => items.iter().map(|n| format!("{},{}", n["id"], n["text"])).collect(),
            _ => Vec::new(),
        };
        Ok(Bytes::from(rows.join("\n")))
    }

    fn deserialize(&self, _body: &[u8]) -> Result<Json, ResourceError> {
        Err(ResourceError::bad_request("csv payloads are not accepted"))
    }
}

#[tokio::test]
async fn serializer_registered_after_build_applies_to_requests() {
    let api = Api::new().resource(Notes::seeded(2));
    let registry = api.serializers();
    let router = api.into_router();

    let res = router.call(get("/api/v1/notes?format=csv")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_ACCEPTABLE);

    registry.register("csv", Csv);
    let res = router.call(get("/api/v1/notes?format=csv")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.headers()[http::header::CONTENT_TYPE], "text/csv");
    assert_eq!(res.body().as_ref(), b"1,\"note 1\"\n2,\"note 2\"");

    let res = router.call(request(Method::POST, "/api/v1/notes?format=csv", "3,x")).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
}

// ── CRUD and pagination ───────────────────────────────────────────────────────

#[tokio::test]
async fn create_returns_201_with_location_message() {
    let router = Api::new().resource(Notes::seeded(2)).into_router();

    let res = router.call(request(Method::POST, "/api/v3/notes", r#"{"text":"hello"}"#)).await;
    assert_eq!(res.status_code(), StatusCode::CREATED);
    assert_eq!(
        envelope(&res),
        json!({"status": 201, "messages": ["created /api/v3/notes/3"], "result": {"id": 3, "text": "hello"}}),
    );
}

#[tokio::test]
async fn malformed_payload_is_400() {
    let router = Api::new().resource(Notes::seeded(0)).into_router();

    let res = router.call(request(Method::POST, "/api/v1/notes", "{not json")).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    let res = router.call(request(Method::PUT, "/api/v1/notes/1", r#"{"id":1}"#)).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_and_delete() {
    let router = Api::new().resource(Notes::seeded(1)).into_router();

    let res = router.call(request(Method::PUT, "/api/v1/notes/1", r#"{"text":"edited"}"#)).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(envelope(&res)["result"], json!({"id": 1, "text": "edited"}));

    let res = router.call(request(Method::DELETE, "/api/v1/notes/1", "")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(envelope(&res)["result"]["text"], "edited");

    let res = router.call(get("/api/v1/notes/1")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_pages_with_next_link() {
    let router = Api::new().resource(Notes::seeded(5)).into_router();

    let res = router.call(get("/api/v1/notes?limit=2&format=json")).await;
    let body = envelope(&res);
    assert_eq!(body["result"], json!([{"id": 1, "text": "note 1"}, {"id": 2, "text": "note 2"}]));
    assert_eq!(body["next"], "http://api.test/api/v1/notes?limit=2&format=json&next=2");

    let res = router.call(get("/api/v1/notes?limit=2&format=json&next=4")).await;
    let body = envelope(&res);
    assert_eq!(body["result"], json!([{"id": 5, "text": "note 5"}]));
    assert!(body.get("next").is_none());
}

#[tokio::test]
async fn non_numeric_limit_falls_back_to_default() {
    let notes = Arc::new(Notes::seeded(1));
    let router = Api::new().resource(Shared(Arc::clone(&notes))).into_router();

    router.call(get("/api/v1/notes?limit=abc")).await;
    router.call(get("/api/v1/notes?limit=25")).await;
    router.call(get("/api/v1/notes")).await;
    assert_eq!(*notes.seen_limits.lock(), [100, 25, 100]);
}

#[tokio::test]
async fn read_one_ignores_inbound_cursor() {
    let router = Api::new().resource(Notes::seeded(1)).into_router();

    let body = envelope(&router.call(get("/api/v1/notes/1?next=9")).await);
    assert!(body.get("next").is_none());
}

/// Lets a test keep a handle on the handler after registration.
struct Shared(Arc<Notes>);

#[async_trait]
impl Resource for Shared {
    type Item = Note;

    fn name(&self) -> &str { self.0.name() }

    async fn read_list(
        &self,
        ctx: &Context,
        limit: usize,
        cursor: &str,
        version: &str,
    ) -> Result<Page<Note>, ResourceError> {
        self.0.read_list(ctx, limit, cursor, version).await
    }
}

// ── Registration ──────────────────────────────────────────────────────────────

struct Nameless;

impl Resource for Nameless {
    type Item = ();
    fn name(&self) -> &str { "" }
}

#[test]
#[should_panic(expected = "empty name")]
fn empty_resource_name_fails_at_registration() {
    let _ = Api::new().resource(Nameless);
}

#[tokio::test]
async fn custom_uri_overrides_default() {
    struct Legacy;

    #[async_trait]
    impl Resource for Legacy {
        type Item = String;

        fn name(&self) -> &str { "legacy" }

        fn uri(&self, op: Operation) -> Option<String> {
            (op == Operation::ReadOne).then(|| "/old/v{version}/thing/{id}".to_owned())
        }

        async fn read_one(&self, ctx: &Context, id: &str, _version: &str) -> Result<String, ResourceError> {
            ctx.build_url("legacy", Operation::ReadOne, &[("id", id)]).map_err(|e| ResourceError::internal(e.to_string()))
        }
    }

    let router: Router = Api::new().resource(Legacy).into();
    let res = router.call(get("/old/v2/thing/abc")).await;
    assert_eq!(envelope(&res)["result"], "/old/v2/thing/abc");
    assert_eq!(router.call(get("/api/v2/legacy/abc")).await.status_code(), StatusCode::NOT_FOUND);
}
