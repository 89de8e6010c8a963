//! The dispatch engine.
//!
//! [`Api`] collects resource handlers, middleware and serializers, then
//! turns them into a [`Router`]. For every resource it registers one route
//! per [`Operation`], named `{resource}:{op}`, plus an `OPTIONS` route per
//! distinct path so middleware can answer preflights.
//!
//! Per request, a resource route:
//!
//! 1. runs the middleware pipeline (user stages, then the authorization
//!    gate); a halt is written out as-is and the handler never runs,
//! 2. builds the root [`Context`] from the routed request,
//! 3. resolves the codec for the negotiated format; an unknown format skips
//!    the handler and records `FormatNotImplemented`,
//! 4. invokes the operation and records result, cursor or error with the
//!    matching status,
//! 5. renders the final context through the codec.
//!
//! Handler panics are not caught here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use tracing::{debug, info, warn};

use crate::context::{Context, DEFAULT_FORMAT};
use crate::error::ResourceError;
use crate::handler::Handler;
use crate::middleware::{Middleware, Pipeline};
use crate::request::Request;
use crate::resource::{Endpoint, Operation, Proxy, Resource};
use crate::response::{Response, TEXT};
use crate::router::{RouteTable, Router};
use crate::serializer::{Serializer, SerializerRegistry};

// ── Api ───────────────────────────────────────────────────────────────────────

/// Builder for a resource API.
///
/// ```rust,no_run
/// # use trellis::{Api, Resource};
/// # struct Notes;
/// # impl Resource for Notes { type Item = (); fn name(&self) -> &str { "notes" } }
/// use http::Method;
/// use trellis::{Server, health, middleware};
///
/// # async fn run() -> Result<(), trellis::Error> {
/// let api = Api::new()
///     .middleware(middleware::trace())
///     .middleware(middleware::cors())
///     .resource(Notes)
///     .route(Method::GET, "/healthz", health::liveness);
///
/// Server::bind("0.0.0.0:3000").serve(api).await
/// # }
/// ```
pub struct Api {
    pipeline: Pipeline,
    serializers: Arc<SerializerRegistry>,
    resources: Vec<Arc<dyn Endpoint>>,
    router: Router,
}

impl Api {
    pub fn new() -> Self {
        Self {
            pipeline: Pipeline::default(),
            serializers: Arc::new(SerializerRegistry::default()),
            resources: Vec::new(),
            router: Router::new(),
        }
    }

    /// Append a middleware stage. Stages run in the order they are added.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.pipeline.push(Arc::new(middleware));
        self
    }

    /// Register a codec under `format`, replacing any previous one.
    pub fn serializer(self, format: impl Into<String>, serializer: impl Serializer) -> Self {
        self.serializers.register(format, serializer);
        self
    }

    /// The shared codec registry. Changes apply to requests already being
    /// served.
    pub fn serializers(&self) -> Arc<SerializerRegistry> {
        Arc::clone(&self.serializers)
    }

    /// Register a resource handler. A handler registered earlier under the
    /// same name is replaced.
    ///
    /// # Panics
    ///
    /// Panics if the handler's name is empty.
    pub fn resource<R: Resource>(mut self, handler: R) -> Self {
        let endpoint: Arc<dyn Endpoint> = Arc::new(Proxy::new(handler));
        let name = endpoint.name().to_owned();
        match self.resources.iter().position(|e| e.name() == name) {
            Some(idx) => {
                warn!(resource = %name, "resource registered twice, replacing earlier handler");
                self.resources[idx] = endpoint;
            }
            None => {
                info!(resource = %name, "resource registered");
                self.resources.push(endpoint);
            }
        }
        self
    }

    /// Register a plain route that bypasses the resource machinery.
    pub fn route(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.router = std::mem::take(&mut self.router).on(method, path, handler);
        self
    }

    /// Build the router.
    ///
    /// # Panics
    ///
    /// Panics if two routes collide on method and path under different names.
    pub fn into_router(self) -> Router {
        let mut table = RouteTable::default();
        for endpoint in &self.resources {
            for op in Operation::ALL {
                table.insert(route_name(endpoint.as_ref(), op), endpoint.uri(op));
            }
        }
        let engine = Arc::new(Engine { serializers: self.serializers, routes: Arc::new(table) });

        let mut router = self.router;
        for endpoint in self.resources {
            let pipeline = Arc::new(self.pipeline.gated(Arc::clone(&endpoint)));
            let bind = |name: String, op: Option<Operation>| Binding {
                name,
                op,
                endpoint: Arc::clone(&endpoint),
                pipeline: Arc::clone(&pipeline),
                engine: Arc::clone(&engine),
            };

            let mut paths: Vec<String> = Vec::new();
            for op in Operation::ALL {
                let uri = endpoint.uri(op);
                let name = route_name(endpoint.as_ref(), op);
                router = router.route(name.clone(), op.method(), &uri, bind(name, Some(op)).into_handler());
                if !paths.contains(&uri) {
                    paths.push(uri);
                }
            }
            for uri in paths {
                let name = format!("{}:options", endpoint.name());
                router = router.on(Method::OPTIONS, &uri, bind(name, None).into_handler());
            }
            debug!(resource = endpoint.name(), "resource mounted");
        }
        router
    }
}

impl Default for Api {
    fn default() -> Self { Self::new() }
}

impl From<Api> for Router {
    fn from(api: Api) -> Self { api.into_router() }
}

fn route_name(endpoint: &dyn Endpoint, op: Operation) -> String {
    format!("{}:{op}", endpoint.name())
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// State shared by every resource route of one [`Api`].
struct Engine {
    serializers: Arc<SerializerRegistry>,
    routes: Arc<RouteTable>,
}

impl Engine {
    /// Write `ctx` into `res` with the negotiated codec.
    ///
    /// Falls back to the `json` codec when the format is unknown, and to
    /// plain text when that is missing too.
    fn render(&self, mut ctx: Context, res: &mut Response) {
        let codec = match self.serializers.resolve(ctx.response_format()) {
            Ok(codec) => Some(codec),
            Err(err) => {
                warn!(format = ctx.response_format(), "format not implemented, falling back to {DEFAULT_FORMAT}");
                if ctx.error().is_none() {
                    ctx = ctx.with_status(err.status()).with_error(err);
                }
                self.serializers.resolve(DEFAULT_FORMAT).ok()
            }
        };

        res.set_status(ctx.status());
        let Some(codec) = codec else {
            res.set_body(TEXT, ctx.messages().join("\n"));
            return;
        };
        match codec.serialize(&ctx) {
            Ok(body) => res.set_body(codec.content_type(), body),
            Err(err) => {
                warn!(%err, "serialization failed");
                res.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                res.set_body(TEXT, err.to_string());
            }
        }
    }
}

/// One registered resource route.
struct Binding {
    name: String,
    /// `None` for the `OPTIONS` route, which only runs the pipeline.
    op: Option<Operation>,
    endpoint: Arc<dyn Endpoint>,
    pipeline: Arc<Pipeline>,
    engine: Arc<Engine>,
}

impl Binding {
    fn into_handler(self) -> impl Handler {
        let binding = Arc::new(self);
        move |req: Request| {
            let binding = Arc::clone(&binding);
            async move { binding.dispatch(req).await }
        }
    }

    async fn dispatch(&self, req: Request) -> Response {
        let started = Instant::now();
        let mut res = Response::default();

        if let Some(halt) = self.pipeline.run(&req, &mut res) {
            debug!(route = %self.name, status = halt.status().as_u16(), "halted by middleware");
            halt.apply(&mut res);
            return res;
        }

        let ctx = Context::new(req, Arc::clone(&self.engine.routes));
        let ctx = match self.op {
            None => {
                let err = ResourceError::MethodNotAllowed;
                ctx.with_status(err.status()).with_error(err)
            }
            Some(op) => match self.engine.serializers.resolve(ctx.response_format()) {
                Ok(codec) => self.endpoint.invoke(op, ctx, codec).await,
                Err(err) => ctx.with_status(err.status()).with_error(err),
            },
        };

        self.engine.render(ctx, &mut res);
        debug!(
            route = %self.name,
            status = res.status_code().as_u16(),
            elapsed_us = micros(started.elapsed()),
            "dispatched",
        );
        res
    }
}

/// Whole microseconds, saturating at `u64::MAX`.
fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;

    struct Foo;

    #[async_trait]
    impl Resource for Foo {
        type Item = String;

        fn name(&self) -> &str { "foo" }

        async fn read_one(&self, _ctx: &Context, id: &str, _version: &str) -> Result<String, ResourceError> {
            Ok(format!("foo {id}"))
        }
    }

    struct Bar;

    #[async_trait]
    impl Resource for Bar {
        type Item = String;

        fn name(&self) -> &str { "foo" }

        async fn read_one(&self, _ctx: &Context, _id: &str, _version: &str) -> Result<String, ResourceError> {
            Ok("bar".into())
        }
    }

    fn get(uri: &str) -> http::Request<Bytes> {
        http::Request::get(uri).body(Bytes::new()).unwrap()
    }

    fn body(res: &Response) -> serde_json::Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    #[test]
    fn registers_five_named_routes_and_preflights() {
        let router = Api::new().resource(Foo).into_router();
        let names: Vec<&str> = router.names().collect();
        for op in Operation::ALL {
            assert!(names.contains(&format!("foo:{op}").as_str()));
        }
        assert!(names.contains(&"OPTIONS /api/v{version}/foo"));
        assert!(names.contains(&"OPTIONS /api/v{version}/foo/{id}"));
    }

    #[tokio::test]
    async fn later_registration_wins() {
        let router = Api::new().resource(Foo).resource(Bar).into_router();
        let res = router.call(get("/api/v1/foo/1")).await;
        assert_eq!(body(&res)["result"], "bar");
    }

    #[tokio::test]
    async fn unhandled_preflight_is_405() {
        let router = Api::new().resource(Foo).into_router();
        let req = http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/foo")
            .body(Bytes::new())
            .unwrap();
        let res = router.call(req).await;
        assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn elapsed_micros_saturate() {
        assert_eq!(micros(Duration::from_millis(3)), 3_000);
        assert_eq!(micros(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn missing_json_falls_back_to_plain_text() {
        let api = Api::new().resource(Foo);
        api.serializers().unregister("json");
        let router = api.into_router();

        let res = router.call(get("/api/v1/foo/1")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(res.headers()[http::header::CONTENT_TYPE], TEXT);
        assert_eq!(res.body().as_ref(), b"format not implemented: json");
    }
}
