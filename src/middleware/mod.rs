//! Middleware layer.
//!
//! Middleware sees every request before the resource handler and may either
//! let it through (`None`) or end it on the spot with a [`Halt`]. It also
//! gets the in-flight [`Response`], so it can add headers that survive to the
//! final response whichever way the request ends.
//!
//! Stages run in registration order. For resource routes the authorization
//! gate built from [`Resource::authorize`](crate::Resource::authorize) is
//! always appended last, immediately before the handler.
//!
//! Built-in middleware:
//! - [`cors()`]: CORS headers, answers preflight `OPTIONS` with `200`
//! - [`trace()`]: one `info` event per request with method and path

mod cors;
mod trace;

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;

use crate::request::Request;
use crate::resource::Endpoint;
use crate::response::{Response, TEXT};

pub use cors::{Cors, cors};
pub use trace::{Trace, trace};

/// Terminating outcome of a middleware stage.
#[derive(Clone, Debug, PartialEq)]
pub struct Halt {
    status: StatusCode,
    body: Option<Bytes>,
}

impl Halt {
    pub fn new(status: StatusCode) -> Self {
        Self { status, body: None }
    }

    /// Attach a raw body, sent as `text/plain`.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn body(&self) -> Option<&Bytes> { self.body.as_ref() }

    pub(crate) fn apply(self, res: &mut Response) {
        res.set_status(self.status);
        if let Some(body) = self.body {
            res.set_body(TEXT, body);
        }
    }
}

/// A request interceptor.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: &Request, res: &mut Response) -> Option<Halt>;
}

/// Middleware from a closure.
///
/// ```rust
/// use http::StatusCode;
/// use trellis::middleware::{Halt, from_fn};
///
/// let maintenance = from_fn(|_req, _res| Some(Halt::new(StatusCode::SERVICE_UNAVAILABLE)));
/// ```
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: Fn(&Request, &mut Response) -> Option<Halt> + Send + Sync + 'static,
{
    FromFn(f)
}

pub struct FromFn<F>(F);

impl<F> Middleware for FromFn<F>
where
    F: Fn(&Request, &mut Response) -> Option<Halt> + Send + Sync + 'static,
{
    fn handle(&self, req: &Request, res: &mut Response) -> Option<Halt> {
        (self.0)(req, res)
    }
}

pub(crate) type BoxedMiddleware = Arc<dyn Middleware>;

/// An ordered middleware chain.
#[derive(Clone, Default)]
pub(crate) struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl Pipeline {
    pub(crate) fn push(&mut self, stage: BoxedMiddleware) {
        self.stages.push(stage);
    }

    /// This chain with the authorization gate for `endpoint` appended.
    pub(crate) fn gated(&self, endpoint: Arc<dyn Endpoint>) -> Pipeline {
        let mut gated = self.clone();
        gated.push(Arc::new(Authorize(endpoint)));
        gated
    }

    /// Run every stage in order; the first halt wins and stops the chain.
    pub(crate) fn run(&self, req: &Request, res: &mut Response) -> Option<Halt> {
        self.stages.iter().find_map(|stage| stage.handle(req, res))
    }
}

/// The authorization gate: `401` with the rejection text as body.
struct Authorize(Arc<dyn Endpoint>);

impl Middleware for Authorize {
    fn handle(&self, req: &Request, _res: &mut Response) -> Option<Halt> {
        let err = self.0.authorize(req).err()?;
        tracing::debug!(resource = self.0.name(), %err, "authorization rejected");
        Some(Halt::new(StatusCode::UNAUTHORIZED).with_body(err.to_string()))
    }
}
