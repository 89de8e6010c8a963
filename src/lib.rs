//! # trellis
//!
//! Resource-oriented CRUD over HTTP.
//!
//! You describe a resource once, as a [`Resource`] implementation; trellis
//! maps its five operations onto verbs and URLs, runs your middleware in
//! front of them, and renders whatever they return through a negotiated
//! codec.
//!
//! | Operation | Method | Default URL |
//! |---|---|---|
//! | create | `POST` | `/api/v{version}/{name}` |
//! | read | `GET` | `/api/v{version}/{name}/{id}` |
//! | list | `GET` | `/api/v{version}/{name}` |
//! | update | `PUT` | `/api/v{version}/{name}/{id}` |
//! | delete | `DELETE` | `/api/v{version}/{name}/{id}` |
//!
//! Every operation receives an immutable per-request [`Context`] carrying
//! path and query parameters (`format`, `limit`, `next`). The engine records
//! the outcome in a derived context and hands it to the [`Serializer`]
//! registered for the requested format.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use trellis::{Api, Context, Page, Resource, ResourceError, Server};
//!
//! #[derive(Serialize, Deserialize)]
//! struct User { id: String, name: String }
//!
//! struct Users;
//!
//! #[async_trait]
//! impl Resource for Users {
//!     type Item = User;
//!
//!     fn name(&self) -> &str { "users" }
//!
//!     async fn read_one(&self, _ctx: &Context, id: &str, _version: &str) -> Result<User, ResourceError> {
//!         Ok(User { id: id.to_owned(), name: "alice".into() })
//!     }
//!
//!     async fn read_list(&self, ctx: &Context, limit: usize, _cursor: &str, _version: &str)
//!         -> Result<Page<User>, ResourceError>
//!     {
//!         ctx.add_message(format!("showing at most {limit}"));
//!         Ok(Page::last(vec![]))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), trellis::Error> {
//!     Server::bind("0.0.0.0:3000").serve(Api::new().resource(Users)).await
//! }
//! ```

mod context;
mod dispatch;
mod error;
mod handler;
mod request;
mod resource;
mod response;
mod router;
mod serializer;
mod server;

pub mod health;
pub mod middleware;

pub use context::{CURSOR_QUERY_KEY, Context, DEFAULT_FORMAT, DEFAULT_LIMIT, Key, Value};
pub use dispatch::Api;
pub use error::{Error, ResourceError, UrlError};
pub use handler::Handler;
pub use request::Request;
pub use resource::{Operation, Page, Payload, Proxy, Resource, default_uri};
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{RouteTable, Router};
pub use serializer::{Json, Serializer, SerializerRegistry};
pub use server::Server;
