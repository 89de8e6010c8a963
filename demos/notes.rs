//! In-memory notes API.
//!
//! Run with:
//!   RUST_LOG=info,trellis=debug cargo run --example notes
//!
//! Try:
//!   curl -H 'x-api-key: demo' -X POST localhost:3000/api/v1/notes -d '{"text":"hi"}'
//!   curl -H 'x-api-key: demo' 'localhost:3000/api/v1/notes?limit=2'
//!   curl -H 'x-api-key: demo' localhost:3000/api/v1/notes/1
//!   curl -H 'x-api-key: demo' -X PUT localhost:3000/api/v1/notes/1 -d '{"text":"edited"}'
//!   curl -H 'x-api-key: demo' -X DELETE localhost:3000/api/v1/notes/1
//!   curl -X OPTIONS -i localhost:3000/api/v1/notes
//!   curl localhost:3000/healthz

use std::collections::BTreeMap;

use async_trait::async_trait;
use http::Method;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use trellis::{Api, Context, Page, Payload, Request, Resource, ResourceError, Server, health, middleware};

#[derive(Clone, Deserialize, Serialize)]
struct Note {
    #[serde(default)]
    id: u64,
    text: String,
}

struct Notes {
    api_key: String,
    store: RwLock<BTreeMap<u64, Note>>,
}

impl Notes {
    fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), store: RwLock::new(BTreeMap::new()) }
    }

    fn parse_id(id: &str) -> Result<u64, ResourceError> {
        id.parse().map_err(|_| ResourceError::bad_request(format!("`{id}` is not a note id")))
    }
}

#[async_trait]
impl Resource for Notes {
    type Item = Note;

    fn name(&self) -> &str { "notes" }

    fn authorize(&self, req: &Request) -> Result<(), ResourceError> {
        if req.header("x-api-key") == Some(self.api_key.as_str()) {
            Ok(())
        } else {
            Err(ResourceError::unauthorized("x-api-key header missing or wrong"))
        }
    }

    async fn create(&self, ctx: &Context, payload: Payload<Note>, _version: &str) -> Result<Note, ResourceError> {
        let mut note = payload.decode()?;
        {
            let mut store = self.store.write();
            note.id = store.keys().next_back().map_or(1, |last| last + 1);
            store.insert(note.id, note.clone());
        }
        let id = note.id.to_string();
        if let Ok(location) = ctx.build_url("notes", trellis::Operation::ReadOne, &[("id", id.as_str())]) {
            ctx.add_message(format!("created {location}"));
        }
        Ok(note)
    }

    async fn read_one(&self, _ctx: &Context, id: &str, _version: &str) -> Result<Note, ResourceError> {
        let id = Self::parse_id(id)?;
        self.store.read().get(&id).cloned().ok_or_else(|| ResourceError::not_found(format!("note {id}")))
    }

    async fn read_list(
        &self,
        _ctx: &Context,
        limit: usize,
        cursor: &str,
        _version: &str,
    ) -> Result<Page<Note>, ResourceError> {
        let after = if cursor.is_empty() { 0 } else { Self::parse_id(cursor)? };
        let store = self.store.read();
        let mut rest = store.range(after + 1..).map(|(_, note)| note.clone());
        let items: Vec<Note> = rest.by_ref().take(limit).collect();
        let next = rest.next().and(items.last()).map(|last| last.id.to_string());
        Ok(match next {
            Some(cursor) => Page::with_next(items, cursor),
            None => Page::last(items),
        })
    }

    async fn update(
        &self,
        _ctx: &Context,
        id: &str,
        payload: Payload<Note>,
        _version: &str,
    ) -> Result<Note, ResourceError> {
        let id = Self::parse_id(id)?;
        let mut note = payload.decode()?;
        note.id = id;
        let mut store = self.store.write();
        let slot = store.get_mut(&id).ok_or_else(|| ResourceError::not_found(format!("note {id}")))?;
        *slot = note.clone();
        Ok(note)
    }

    async fn delete(&self, _ctx: &Context, id: &str, _version: &str) -> Result<Note, ResourceError> {
        let id = Self::parse_id(id)?;
        self.store.write().remove(&id).ok_or_else(|| ResourceError::not_found(format!("note {id}")))
    }
}

#[tokio::main]
async fn main() -> Result<(), trellis::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = std::env::var("TRELLIS_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_owned());

    let api = Api::new()
        .middleware(middleware::trace())
        .middleware(middleware::cors())
        .resource(Notes::new("demo"))
        .route(Method::GET, "/healthz", health::liveness)
        .route(Method::GET, "/readyz", health::readiness);

    Server::bind(addr).serve(api).await
}
