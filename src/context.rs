//! Per-request context.
//!
//! A [`Context`] is an immutable, chainable value store scoped to one request.
//! Deriving a context with [`Context::with_value`] pushes one frame onto a
//! persistent linked list: the new context sees the new binding, every older
//! handle keeps seeing exactly what it saw before.
//!
//! ```text
//! seed (path vars + query)  ←  frame(status)  ←  frame(result)  ←  frame(cursor)
//!                                  ↑                                    ↑
//!                              older ctx                            newest ctx
//! ```
//!
//! Lookup walks frames newest-first, then the seed map: O(depth). Frames are
//! shared through `Arc`, so deriving never copies earlier bindings.
//!
//! The request itself, the route table and the message list are shared by
//! every context in a chain. Messages are the one mutable channel: they are
//! append-only and visible from every handle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use parking_lot::Mutex;
use url::Url;

use crate::error::{ResourceError, UrlError};
use crate::request::Request;
use crate::resource::Operation;
use crate::router::{RouteTable, expand};

/// Format used when the request does not ask for one.
pub const DEFAULT_FORMAT: &str = "json";

/// Page size used when the request does not ask for one, or asks for garbage.
pub const DEFAULT_LIMIT: usize = 100;

/// Query key carrying the pagination cursor, inbound and in `next` links.
pub const CURSOR_QUERY_KEY: &str = "next";

// ── Keys and values ───────────────────────────────────────────────────────────

/// A context key.
///
/// Path and query parameters live under [`Key::Var`]. The remaining variants
/// are reserved for dispatch state and cannot collide with request input.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Key {
    Var(String),
    Status,
    Error,
    Result,
    Cursor,
}

impl From<&str> for Key {
    fn from(name: &str) -> Self { Self::Var(name.to_owned()) }
}

impl From<String> for Key {
    fn from(name: String) -> Self { Self::Var(name) }
}

/// A context value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Text(String),
    Status(StatusCode),
    Error(ResourceError),
    /// A result payload as a format-neutral serde tree.
    Data(Arc<serde_json::Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Self::Text(s) }
}

impl From<StatusCode> for Value {
    fn from(s: StatusCode) -> Self { Self::Status(s) }
}

impl From<ResourceError> for Value {
    fn from(e: ResourceError) -> Self { Self::Error(e) }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self { Self::Data(Arc::new(v)) }
}

// ── Context ───────────────────────────────────────────────────────────────────

struct Frame {
    key: Key,
    value: Value,
    parent: Option<Arc<Frame>>,
}

/// State shared by every context derived from the same request.
struct Shared {
    request: Option<Request>,
    routes: Arc<RouteTable>,
    seed: HashMap<Key, Value>,
    messages: Mutex<Vec<String>>,
}

/// Immutable per-request state: parameters, dispatch outcome, messages.
///
/// Cloning is two `Arc` increments.
#[derive(Clone)]
pub struct Context {
    shared: Arc<Shared>,
    head: Option<Arc<Frame>>,
}

impl Context {
    /// Build the root context for a routed request.
    ///
    /// Query parameters are seeded first (first occurrence wins), then path
    /// variables, which take precedence. The `next` query parameter seeds the
    /// cursor.
    pub(crate) fn new(request: Request, routes: Arc<RouteTable>) -> Self {
        let mut seed = HashMap::new();
        for (k, v) in request.query_pairs() {
            let key = if k == CURSOR_QUERY_KEY { Key::Cursor } else { Key::Var(k) };
            seed.entry(key).or_insert(Value::Text(v));
        }
        for (k, v) in request.params() {
            seed.insert(Key::Var(k.clone()), Value::Text(v.clone()));
        }
        Self::from_parts(Some(request), routes, seed)
    }

    fn from_parts(request: Option<Request>, routes: Arc<RouteTable>, seed: HashMap<Key, Value>) -> Self {
        let shared = Shared { request, routes, seed, messages: Mutex::new(Vec::new()) };
        Self { shared: Arc::new(shared), head: None }
    }

    // ── Generic lookup ────────────────────────────────────────────────────────

    /// Newest binding for `key` in this chain.
    pub fn value(&self, key: impl Into<Key>) -> Option<&Value> {
        let key = key.into();
        let mut frame = self.head.as_deref();
        while let Some(f) = frame {
            if f.key == key {
                return Some(&f.value);
            }
            frame = f.parent.as_deref();
        }
        self.shared.seed.get(&key)
    }

    pub fn value_with_default(&self, key: impl Into<Key>, default: impl Into<Value>) -> Value {
        self.value(key).cloned().unwrap_or_else(|| default.into())
    }

    fn text_or<'a>(&'a self, key: Key, default: &'a str) -> &'a str {
        self.value(key).and_then(Value::as_str).unwrap_or(default)
    }

    /// A new context with one more binding. `self` is left untouched.
    pub fn with_value(&self, key: impl Into<Key>, value: impl Into<Value>) -> Context {
        let frame = Frame { key: key.into(), value: value.into(), parent: self.head.clone() };
        Self { shared: Arc::clone(&self.shared), head: Some(Arc::new(frame)) }
    }

    pub fn with_status(&self, status: StatusCode) -> Context {
        self.with_value(Key::Status, status)
    }

    pub fn with_error(&self, error: ResourceError) -> Context {
        self.with_value(Key::Error, error)
    }

    pub fn with_result(&self, result: serde_json::Value) -> Context {
        self.with_value(Key::Result, result)
    }

    pub fn with_cursor(&self, cursor: impl Into<String>) -> Context {
        self.with_value(Key::Cursor, cursor.into())
    }

    // ── Typed accessors ───────────────────────────────────────────────────────

    /// Negotiated response format, `"json"` unless `?format=` says otherwise.
    pub fn response_format(&self) -> &str {
        self.text_or(Key::from("format"), DEFAULT_FORMAT)
    }

    pub fn resource_id(&self) -> &str {
        self.text_or(Key::from("id"), "")
    }

    pub fn version(&self) -> &str {
        self.text_or(Key::from("version"), "")
    }

    pub fn cursor(&self) -> &str {
        self.text_or(Key::Cursor, "")
    }

    /// Recorded status, `200 OK` when none.
    pub fn status(&self) -> StatusCode {
        match self.value(Key::Status) {
            Some(Value::Status(s)) => *s,
            _ => StatusCode::OK,
        }
    }

    pub fn error(&self) -> Option<&ResourceError> {
        match self.value(Key::Error) {
            Some(Value::Error(e)) => Some(e),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match self.value(Key::Result) {
            Some(Value::Data(v)) => Some(v),
            _ => None,
        }
    }

    /// Requested page size. Anything that does not parse as an unsigned
    /// integer reads as [`DEFAULT_LIMIT`].
    pub fn limit(&self) -> usize {
        self.value(Key::from("limit"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LIMIT)
    }

    // ── Request ───────────────────────────────────────────────────────────────

    pub fn request(&self) -> Option<&Request> {
        self.shared.request.as_ref()
    }

    /// Raw request body; empty for a context without a request.
    pub fn body(&self) -> &[u8] {
        self.request().map(|r| &r.body()[..]).unwrap_or_default()
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    pub fn add_message(&self, message: impl Into<String>) {
        self.shared.messages.lock().push(message.into());
    }

    /// Stored messages, plus the current error's text when one is set.
    pub fn messages(&self) -> Vec<String> {
        let mut out = self.shared.messages.lock().clone();
        if let Some(err) = self.error() {
            out.push(err.to_string());
        }
        out
    }

    // ── URLs ──────────────────────────────────────────────────────────────────

    /// Absolute URL of the next page: the current request URL with the cursor
    /// under `next`, other query parameters kept in order.
    pub fn next_url(&self) -> Result<Url, UrlError> {
        let cursor = self.cursor();
        if cursor.is_empty() {
            return Err(UrlError::NoCursor);
        }
        let req = self.request().ok_or(UrlError::NoRequest)?;

        let scheme = req
            .header("x-forwarded-proto")
            .or_else(|| req.uri().scheme_str())
            .unwrap_or("http");
        let host = req
            .uri()
            .authority()
            .map(|a| a.as_str())
            .or_else(|| req.header("host"))
            .filter(|host| !host.is_empty())
            .ok_or(UrlError::NoHost)?;

        let mut url = Url::parse(&format!("{scheme}://{host}{}", req.path()))?;
        let kept = req.query_pairs().into_iter().filter(|(k, _)| k != CURSOR_QUERY_KEY);
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(CURSOR_QUERY_KEY, cursor);
        Ok(url)
    }

    /// Path of the route registered as `{resource}:{op}`, filled from `vars`
    /// and this context's version.
    pub fn build_url(
        &self,
        resource: &str,
        op: Operation,
        vars: &[(&str, &str)],
    ) -> Result<String, UrlError> {
        let name = format!("{resource}:{op}");
        let template = self
            .shared
            .routes
            .template(&name)
            .ok_or_else(|| UrlError::UnknownRoute(name.clone()))?;
        expand(template, |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_owned())
                .or_else(|| (key == "version" && !self.version().is_empty()).then(|| self.version().to_owned()))
        })
    }
}

impl Default for Context {
    /// A detached context: no request, no routes.
    fn default() -> Self {
        Self::from_parts(None, Arc::default(), HashMap::new())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("status", &self.status())
            .field("format", &self.response_format())
            .field("cursor", &self.cursor())
            .field("error", &self.error())
            .finish_non_exhaustive()
    }
}
