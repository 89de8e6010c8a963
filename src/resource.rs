//! The resource handler contract.
//!
//! A domain type implements [`Resource`] for one kind of resource. Every
//! CRUD operation has a default that fails with
//! [`ResourceError::MethodNotAllowed`], so a handler overrides only what it
//! supports:
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use trellis::{Context, Resource, ResourceError};
//!
//! struct Clock;
//!
//! #[async_trait]
//! impl Resource for Clock {
//!     type Item = u64;
//!
//!     fn name(&self) -> &str { "clock" }
//!
//!     async fn read_one(&self, _ctx: &Context, _id: &str, _version: &str) -> Result<u64, ResourceError> {
//!         Ok(1_700_000_000)
//!     }
//! }
//! ```
//!
//! [`Proxy`] wraps a handler and guarantees every operation has a routable
//! URI, falling back to `/api/v{version}/{name}` for collection operations
//! and `/api/v{version}/{name}/{id}` for item operations.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::Context;
use crate::error::ResourceError;
use crate::request::Request;
use crate::serializer::Serializer;

// ── Operation ─────────────────────────────────────────────────────────────────

/// The five CRUD operations a resource can expose.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    Create,
    ReadOne,
    ReadList,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Create,
        Operation::ReadOne,
        Operation::ReadList,
        Operation::Update,
        Operation::Delete,
    ];

    /// Route-name suffix: routes are named `{resource}:{op}`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create   => "create",
            Self::ReadOne  => "read",
            Self::ReadList => "list",
            Self::Update   => "update",
            Self::Delete   => "delete",
        }
    }

    pub fn method(self) -> Method {
        match self {
            Self::Create   => Method::POST,
            Self::ReadOne  => Method::GET,
            Self::ReadList => Method::GET,
            Self::Update   => Method::PUT,
            Self::Delete   => Method::DELETE,
        }
    }

    /// Whether the operation addresses a single resource by id.
    pub fn targets_item(self) -> bool {
        matches!(self, Self::ReadOne | Self::Update | Self::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Page ──────────────────────────────────────────────────────────────────────

/// One page of a list result.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque cursor for the following page, `None` on the last page.
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }

    pub fn with_next(items: Vec<T>, cursor: impl Into<String>) -> Self {
        Self { items, next: Some(cursor.into()) }
    }
}

// ── Payload ───────────────────────────────────────────────────────────────────

/// A request body not yet decoded.
///
/// Decoding uses the codec negotiated for the request. A body that does not
/// decode into `T` is [`ResourceError::BadRequest`], so `payload.decode()?`
/// renders as `400`. Because decoding is up to the operation, a handler that
/// does not implement `create` still answers `405` whatever the body holds.
pub struct Payload<T> {
    body: Bytes,
    codec: Arc<dyn Serializer>,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Payload<T> {
    pub(crate) fn new(body: Bytes, codec: Arc<dyn Serializer>) -> Self {
        Self { body, codec, _item: PhantomData }
    }

    pub fn raw(&self) -> &Bytes {
        &self.body
    }

    pub fn decode(self) -> Result<T, ResourceError> {
        let tree = self.codec.deserialize(&self.body)?;
        serde_json::from_value(tree).map_err(|e| ResourceError::bad_request(e.to_string()))
    }
}

// ── Resource ──────────────────────────────────────────────────────────────────

/// Domain-side implementation of CRUD for one resource type.
///
/// Handlers receive the request [`Context`] by reference and return their
/// outcome by value; they never write to the context's dispatch state.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// What the operations accept and return.
    type Item: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Resource name used in default URIs and route names. Must not be empty.
    fn name(&self) -> &str;

    /// URI override for `op`. `None` (or an empty string) selects the default.
    fn uri(&self, _op: Operation) -> Option<String> {
        None
    }

    /// Authorization predicate, run as the last middleware before any
    /// operation. Rejections render as `401` with the error text as body.
    fn authorize(&self, _req: &Request) -> Result<(), ResourceError> {
        Ok(())
    }

    async fn create(
        &self,
        _ctx: &Context,
        _payload: Payload<Self::Item>,
        _version: &str,
    ) -> Result<Self::Item, ResourceError> {
        Err(ResourceError::MethodNotAllowed)
    }

    async fn read_one(&self, _ctx: &Context, _id: &str, _version: &str) -> Result<Self::Item, ResourceError> {
        Err(ResourceError::MethodNotAllowed)
    }

    /// At most `limit` items starting at `cursor` (empty for the first page).
    async fn read_list(
        &self,
        _ctx: &Context,
        _limit: usize,
        _cursor: &str,
        _version: &str,
    ) -> Result<Page<Self::Item>, ResourceError> {
        Err(ResourceError::MethodNotAllowed)
    }

    async fn update(
        &self,
        _ctx: &Context,
        _id: &str,
        _payload: Payload<Self::Item>,
        _version: &str,
    ) -> Result<Self::Item, ResourceError> {
        Err(ResourceError::MethodNotAllowed)
    }

    async fn delete(&self, _ctx: &Context, _id: &str, _version: &str) -> Result<Self::Item, ResourceError> {
        Err(ResourceError::MethodNotAllowed)
    }
}

// ── Proxy ─────────────────────────────────────────────────────────────────────

/// Default URI template for `op` on resource `name`.
pub fn default_uri(name: &str, op: Operation) -> String {
    if op.targets_item() {
        format!("/api/v{{version}}/{name}/{{id}}")
    } else {
        format!("/api/v{{version}}/{name}")
    }
}

/// Wraps a [`Resource`], filling in the URIs the handler leaves blank.
pub struct Proxy<R> {
    inner: R,
    name: String,
}

impl<R: Resource> Proxy<R> {
    /// # Panics
    ///
    /// Panics if the handler's name is empty. This is a configuration error
    /// and surfaces at registration, not at the first request.
    pub fn new(inner: R) -> Self {
        let name = inner.name().to_owned();
        if name.is_empty() {
            panic!("resource handler `{}` has an empty name", std::any::type_name::<R>());
        }
        Self { inner, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handler's override for `op`, else [`default_uri`].
    pub fn uri(&self, op: Operation) -> String {
        self.inner
            .uri(op)
            .filter(|uri| !uri.is_empty())
            .unwrap_or_else(|| default_uri(&self.name, op))
    }

    async fn run(
        &self,
        op: Operation,
        ctx: &Context,
        codec: Arc<dyn Serializer>,
    ) -> Result<Outcome, ResourceError> {
        let version = ctx.version();
        let id = ctx.resource_id();
        let outcome = match op {
            Operation::Create => {
                let payload = Payload::new(body(ctx), codec);
                let item = self.inner.create(ctx, payload, version).await?;
                Outcome { status: StatusCode::CREATED, ..Outcome::ok(encode(&item)?) }
            }
            Operation::ReadOne => {
                let item = self.inner.read_one(ctx, id, version).await?;
                Outcome::ok(encode(&item)?)
            }
            Operation::ReadList => {
                let page = self.inner.read_list(ctx, ctx.limit(), ctx.cursor(), version).await?;
                let cursor = page.next.unwrap_or_default();
                Outcome { cursor, ..Outcome::ok(encode(&page.items)?) }
            }
            Operation::Update => {
                let payload = Payload::new(body(ctx), codec);
                let item = self.inner.update(ctx, id, payload, version).await?;
                Outcome::ok(encode(&item)?)
            }
            Operation::Delete => {
                let item = self.inner.delete(ctx, id, version).await?;
                Outcome::ok(encode(&item)?)
            }
        };
        Ok(outcome)
    }
}

/// What a successful operation records in the context.
struct Outcome {
    status: StatusCode,
    result: serde_json::Value,
    cursor: String,
}

impl Outcome {
    fn ok(result: serde_json::Value) -> Self {
        Self { status: StatusCode::OK, result, cursor: String::new() }
    }
}

fn body(ctx: &Context) -> Bytes {
    ctx.request().map(|r| r.body().clone()).unwrap_or_default()
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, ResourceError> {
    Ok(serde_json::to_value(value)?)
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// Object-safe view of a [`Proxy`], as the dispatch engine holds it.
#[async_trait]
pub(crate) trait Endpoint: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn uri(&self, op: Operation) -> String;

    fn authorize(&self, req: &Request) -> Result<(), ResourceError>;

    /// Run `op` and record its outcome in a context derived from `ctx`.
    async fn invoke(&self, op: Operation, ctx: Context, codec: Arc<dyn Serializer>) -> Context;
}

#[async_trait]
impl<R: Resource> Endpoint for Proxy<R> {
    fn name(&self) -> &str {
        Proxy::name(self)
    }

    fn uri(&self, op: Operation) -> String {
        Proxy::uri(self, op)
    }

    fn authorize(&self, req: &Request) -> Result<(), ResourceError> {
        self.inner.authorize(req)
    }

    async fn invoke(&self, op: Operation, ctx: Context, codec: Arc<dyn Serializer>) -> Context {
        match self.run(op, &ctx, codec).await {
            Ok(out) => ctx.with_status(out.status).with_result(out.result).with_cursor(out.cursor),
            Err(err) => ctx.with_status(err.status()).with_error(err).with_cursor(""),
        }
    }
}
