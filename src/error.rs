//! Error types.
//!
//! Three families, split by where they surface:
//!
//! - [`ResourceError`] is what resource handlers return. The dispatch engine
//!   records it in the [`Context`](crate::Context) and renders it; it never
//!   escapes past a route.
//! - [`UrlError`] comes out of URL derivation on the context
//!   ([`Context::next_url`](crate::Context::next_url),
//!   [`Context::build_url`](crate::Context::build_url)).
//! - [`Error`] is the transport layer: binding a port, accepting connections.

use http::StatusCode;
use thiserror::Error;

/// Failure outcome of a resource operation.
///
/// Each variant maps onto one HTTP status via [`ResourceError::status`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ResourceError {
    /// The operation could not locate the resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// The handler does not implement this operation.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// The authorization predicate rejected the request.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed input, e.g. a payload the codec cannot decode.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No serializer is registered for the requested format.
    #[error("format not implemented: {0}")]
    FormatNotImplemented(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ResourceError {
    pub fn not_found(msg: impl Into<String>) -> Self { Self::NotFound(msg.into()) }
    pub fn unauthorized(msg: impl Into<String>) -> Self { Self::Unauthorized(msg.into()) }
    pub fn bad_request(msg: impl Into<String>) -> Self { Self::BadRequest(msg.into()) }
    pub fn internal(msg: impl Into<String>) -> Self { Self::Internal(msg.into()) }

    /// The HTTP status this error renders with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_)             => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed        => StatusCode::METHOD_NOT_ALLOWED,
            Self::Unauthorized(_)         => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_)           => StatusCode::BAD_REQUEST,
            Self::FormatNotImplemented(_) => StatusCode::NOT_ACCEPTABLE,
            Self::Internal(_)             => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for ResourceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Failure to derive a URL from a [`Context`](crate::Context).
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("no cursor set on this context")]
    NoCursor,

    #[error("context carries no request")]
    NoRequest,

    #[error("request names no host")]
    NoHost,

    #[error("no route named `{0}`")]
    UnknownRoute(String),

    #[error("route variable `{0}` has no value")]
    MissingVariable(String),

    #[error("invalid url: {0}")]
    Parse(#[from] url::ParseError),
}

/// The error type returned by [`Server::serve`](crate::Server::serve).
///
/// Application-level errors are rendered as HTTP responses, not returned as
/// `Error`s. This type surfaces infrastructure failures only.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address: {0}")]
    Addr(#[from] std::net::AddrParseError),
}
