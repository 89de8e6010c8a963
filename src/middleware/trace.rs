//! Request logging.

use tracing::info;

use super::{Halt, Middleware};
use crate::request::Request;
use crate::response::Response;

/// Emits one `info` event per request, before the handler runs.
///
/// Completion (status, latency) is logged by the dispatch engine at `debug`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

pub fn trace() -> Trace {
    Trace
}

impl Middleware for Trace {
    fn handle(&self, req: &Request, _res: &mut Response) -> Option<Halt> {
        info!(method = %req.method(), path = req.path(), "request");
        None
    }
}
