//! CORS headers and preflight handling.

use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use http::{HeaderValue, Method, StatusCode};

use super::{Halt, Middleware};
use crate::request::Request;
use crate::response::Response;

/// Adds `access-control-allow-*` headers to every response and answers
/// `OPTIONS` with `200` before the handler is reached.
#[derive(Clone, Debug)]
pub struct Cors {
    origin: HeaderValue,
    methods: HeaderValue,
    headers: HeaderValue,
}

/// Permissive CORS: any origin, the CRUD methods, `content-type` and
/// `authorization` headers.
pub fn cors() -> Cors {
    Cors::default()
}

impl Cors {
    pub fn allow_origin(mut self, origin: HeaderValue) -> Self {
        self.origin = origin;
        self
    }

    pub fn allow_methods(mut self, methods: HeaderValue) -> Self {
        self.methods = methods;
        self
    }

    pub fn allow_headers(mut self, headers: HeaderValue) -> Self {
        self.headers = headers;
        self
    }
}

impl Default for Cors {
    fn default() -> Self {
        Self {
            origin: HeaderValue::from_static("*"),
            methods: HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
            headers: HeaderValue::from_static("content-type, authorization"),
        }
    }
}

impl Middleware for Cors {
    fn handle(&self, req: &Request, res: &mut Response) -> Option<Halt> {
        let headers = res.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, self.origin.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, self.methods.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, self.headers.clone());

        (req.method() == Method::OPTIONS).then(|| Halt::new(StatusCode::OK))
    }
}
