//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup via [`matchit`]. On top
//! of plain matching the router adds two things:
//!
//! - **Named routes.** Every route has a name. Registering a name twice
//!   replaces the earlier route; two *different* names on the same method and
//!   path is a configuration error and panics.
//! - **Prefixed segments.** A segment such as `v{version}` matches `v1`,
//!   `v2`, ... and yields `version = "1"`. The literal prefix is required on
//!   the inbound path. `{name:regex}` constraint text is accepted and ignored.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::error::UrlError;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::response::Response;

// ── Templates ─────────────────────────────────────────────────────────────────

/// One `/`-separated piece of a route template.
#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Literal(String),
    Var { prefix: String, name: String },
}

/// Split on `/`, except inside `{...}` where a constraint may contain one.
fn split_segments(template: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in template.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                segments.push(&template[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&template[start..]);
    segments
}

fn parse_template(template: &str) -> Vec<Segment> {
    split_segments(template)
        .into_iter()
        .map(|seg| {
            let Some(open) = seg.find('{') else {
                return Segment::Literal(seg.to_owned());
            };
            let inner = seg[open + 1..]
                .strip_suffix('}')
                .unwrap_or_else(|| panic!("invalid route `{template}`: text after `}}` in `{seg}`"));
            let name = inner.split(':').next().unwrap_or(inner);
            Segment::Var { prefix: seg[..open].to_owned(), name: name.to_owned() }
        })
        .collect()
}

/// Fill a route template with variable values.
///
/// Every `{name}` in `template` must resolve through `lookup`.
pub(crate) fn expand(
    template: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, UrlError> {
    let mut out = Vec::new();
    for seg in parse_template(template) {
        match seg {
            Segment::Literal(s) => out.push(s),
            Segment::Var { prefix, name } => {
                let key = name.trim_start_matches('*');
                let value = lookup(key).ok_or_else(|| UrlError::MissingVariable(key.to_owned()))?;
                out.push(format!("{prefix}{value}"));
            }
        }
    }
    Ok(out.join("/"))
}

/// Route name → URL template, for reverse routing out of a
/// [`Context`](crate::Context).
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    templates: HashMap<String, String>,
}

impl RouteTable {
    pub(crate) fn insert(&mut self, name: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(name.into(), template.into());
    }

    pub fn template(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

struct Entry {
    name: String,
    method: Method,
    template: String,
    /// Template rewritten to matchit syntax.
    pattern: String,
    /// Path variables whose segment carries a literal prefix.
    prefixes: HashMap<String, String>,
    handler: BoxedHandler,
}

impl Entry {
    fn new(name: String, method: Method, template: &str, handler: BoxedHandler) -> Self {
        let mut prefixes = HashMap::new();
        let pattern = parse_template(template)
            .into_iter()
            .map(|seg| match seg {
                Segment::Literal(s) => s,
                Segment::Var { prefix, name } => {
                    if !prefix.is_empty() {
                        prefixes.insert(name.clone(), prefix);
                    }
                    format!("{{{name}}}")
                }
            })
            .collect::<Vec<_>>()
            .join("/");
        Self { name, method, template: template.to_owned(), pattern, prefixes, handler }
    }
}

/// The application router.
///
/// Usually built for you by [`Api`](crate::Api); plain routes can be added
/// with [`Router::on`] as well.
#[derive(Default)]
pub struct Router {
    entries: Vec<Entry>,
    names: HashMap<String, usize>,
    trees: HashMap<Method, MatchitRouter<usize>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an anonymous route, named `"{METHOD} {path}"`.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        let name = format!("{method} {path}");
        self.route(name, method, path, handler)
    }

    /// Register a named route. A route already registered under `name` is
    /// replaced.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid pattern or collides with a route
    /// registered under another name.
    pub fn route(
        mut self,
        name: impl Into<String>,
        method: Method,
        path: &str,
        handler: impl Handler,
    ) -> Self {
        let entry = Entry::new(name.into(), method, path, handler.into_boxed_handler());
        match self.names.get(&entry.name) {
            Some(&idx) => {
                self.entries[idx] = entry;
                self.rebuild();
            }
            None => {
                let idx = self.entries.len();
                Self::insert(&mut self.trees, &entry, idx);
                self.names.insert(entry.name.clone(), idx);
                self.entries.push(entry);
            }
        }
        self
    }

    /// Names of every registered route, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    fn rebuild(&mut self) {
        let mut trees = HashMap::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            Self::insert(&mut trees, entry, idx);
        }
        self.trees = trees;
    }

    fn insert(trees: &mut HashMap<Method, MatchitRouter<usize>>, entry: &Entry, idx: usize) {
        trees
            .entry(entry.method.clone())
            .or_default()
            .insert(entry.pattern.clone(), idx)
            .unwrap_or_else(|e| panic!("invalid route `{}` ({}): {e}", entry.template, entry.name));
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.trees.get(method)?;
        let matched = tree.at(path).ok()?;
        let entry = &self.entries[*matched.value];
        let mut params = HashMap::new();
        for (key, value) in matched.params.iter() {
            let value = match entry.prefixes.get(key) {
                Some(prefix) => value.strip_prefix(prefix.as_str()).filter(|v| !v.is_empty())?,
                None => value,
            };
            params.insert(key.to_owned(), value.to_owned());
        }
        Some((Arc::clone(&entry.handler), params))
    }

    /// Route and run one buffered request. Unmatched requests get `404`.
    pub async fn call(&self, req: http::Request<Bytes>) -> Response {
        let (parts, body) = req.into_parts();
        match self.lookup(&parts.method, parts.uri.path()) {
            Some((handler, params)) => handler.call(Request::new(parts, body, params)).await,
            None => Response::status(StatusCode::NOT_FOUND),
        }
    }
}
