//! Response codecs and the registry that negotiates between them.
//!
//! A [`Serializer`] renders a finished [`Context`] into response bytes and
//! decodes request payloads for the same format. The
//! [`SerializerRegistry`] maps format names (the `?format=` query value) to
//! codecs. It starts out holding [`Json`] under `"json"` and can be changed
//! while requests are in flight.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::context::{Context, DEFAULT_FORMAT};
use crate::error::ResourceError;
use crate::response::JSON;

/// A codec bound to one format name.
pub trait Serializer: Send + Sync + 'static {
    /// `content-type` of the bytes [`serialize`](Serializer::serialize) returns.
    fn content_type(&self) -> &'static str;

    /// Render status, messages, result and cursor of `ctx`.
    fn serialize(&self, ctx: &Context) -> Result<Bytes, ResourceError>;

    /// Parse a request body into a serde tree.
    fn deserialize(&self, body: &[u8]) -> Result<serde_json::Value, ResourceError>;
}

// ── JSON ──────────────────────────────────────────────────────────────────────

/// The JSON envelope codec.
///
/// ```json
/// {"status": 200, "messages": [], "result": {"id": 1}, "next": "http://…?next=abc"}
/// ```
///
/// `result` and `next` are left out when an error is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct Json;

#[derive(Serialize)]
struct Envelope<'a> {
    status: u16,
    messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next: Option<String>,
}

impl Serializer for Json {
    fn content_type(&self) -> &'static str {
        JSON
    }

    fn serialize(&self, ctx: &Context) -> Result<Bytes, ResourceError> {
        let failed = ctx.error().is_some();
        let envelope = Envelope {
            status: ctx.status().as_u16(),
            messages: ctx.messages(),
            result: ctx.result().filter(|_| !failed),
            next: ctx.next_url().ok().filter(|_| !failed).map(String::from),
        };
        Ok(Bytes::from(serde_json::to_vec(&envelope)?))
    }

    fn deserialize(&self, body: &[u8]) -> Result<serde_json::Value, ResourceError> {
        serde_json::from_slice(body).map_err(|e| ResourceError::bad_request(e.to_string()))
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Format name → codec, behind one reader/writer lock.
pub struct SerializerRegistry {
    formats: RwLock<HashMap<String, Arc<dyn Serializer>>>,
}

impl SerializerRegistry {
    /// A registry with no formats at all.
    pub fn empty() -> Self {
        Self { formats: RwLock::new(HashMap::new()) }
    }

    /// Add or replace the codec for `format`.
    pub fn register(&self, format: impl Into<String>, serializer: impl Serializer) {
        let format = format.into();
        debug!(%format, "serializer registered");
        self.formats.write().insert(format, Arc::new(serializer));
    }

    /// Remove `format`. Absent formats are ignored.
    pub fn unregister(&self, format: &str) {
        if self.formats.write().remove(format).is_some() {
            debug!(%format, "serializer removed");
        }
    }

    /// Registered format names, sorted.
    pub fn available_formats(&self) -> Vec<String> {
        let mut names: Vec<String> = self.formats.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn resolve(&self, format: &str) -> Result<Arc<dyn Serializer>, ResourceError> {
        self.formats
            .read()
            .get(format)
            .cloned()
            .ok_or_else(|| ResourceError::FormatNotImplemented(format.to_owned()))
    }
}

impl Default for SerializerRegistry {
    /// A registry holding [`Json`] under `"json"`.
    fn default() -> Self {
        let registry = Self::empty();
        registry.register(DEFAULT_FORMAT, Json);
        registry
    }
}
