//! Health-check handlers.
//!
//! | Probe | Usual path | Answers |
//! |---|---|---|
//! | [`liveness`] | `/healthz` | Is the process up? A failure means restart it. |
//! | [`readiness`] | `/readyz` | Should it get traffic? A failure means route around it. |
//!
//! Mount them as plain routes next to the resource API. They bypass the
//! resource middleware pipeline, so an authorization predicate never blocks
//! a probe:
//!
//! ```rust,no_run
//! use http::Method;
//! use trellis::{Api, health};
//!
//! let api = Api::new()
//!     .route(Method::GET, "/healthz", health::liveness)
//!     .route(Method::GET, "/readyz", health::readiness);
//! ```

use crate::{Request, Response};

/// Liveness probe: `200 ok` whenever the process can answer HTTP.
///
/// It checks nothing else. A liveness probe that depends on a database turns
/// a database outage into a restart loop.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

/// Readiness probe: `200 ready`.
///
/// Replace it with your own handler when readiness depends on downstream
/// services:
///
/// ```rust,no_run
/// use trellis::{Request, Response};
///
/// async fn readiness(_req: Request) -> Response {
///     if store_is_reachable().await {
///         Response::text("ready")
///     } else {
///         Response::status(http::StatusCode::SERVICE_UNAVAILABLE)
///     }
/// }
///
/// async fn store_is_reachable() -> bool { true }
/// ```
pub async fn readiness(_req: Request) -> Response {
    Response::text("ready")
}
