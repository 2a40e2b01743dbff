//! Segment routing — map one path segment to a child handler.
//!
//! A [`Router`] owns a registry from segment name to child [`Handler`]. On
//! dispatch it reads the segment at the current cursor, looks it up by exact
//! string equality, and forwards the request to the matching child with the
//! cursor advanced by one. Routers nest to arbitrary depth; the terminal
//! handler at the bottom of the tree produces the real response.
//!
//! Every miss — uninitialized registry, cursor past the end of the path,
//! unregistered segment — answers `404 Not Found` with an empty body. A miss
//! is indistinguishable in type from a hit, so dispatch failure composes
//! transparently through any nesting depth.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::handler::{Handler, HandlerResult};
use crate::http::{Request, Response, StatusCode};

/// A router dispatching on one path segment per level.
///
/// The registry is created lazily on the first [`register`](Self::register);
/// an uninitialized registry and an empty one both answer 404. Children are
/// held behind [`Arc`] so the same handler instance may be registered under
/// several names or several routers.
///
/// Registration is expected to finish before traffic begins; `handle` never
/// mutates router state, but concurrent mutation against concurrent dispatch
/// must be synchronized externally.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use edgekv::router::Router;
/// use edgekv::store::MemoryStore;
/// use edgekv::table::{Origins, StoreTable};
///
/// let table = StoreTable::new(Arc::new(MemoryStore::new()), Origins::Any);
///
/// let mut inner = Router::new();
/// inner.register("kv", Arc::new(table));
///
/// let mut root = Router::new();
/// root.register("api", Arc::new(inner));
/// // GET /api/kv/some-key now reaches the table with "some-key" as the key.
/// ```
#[derive(Default)]
pub struct Router {
    children: Option<HashMap<String, Arc<dyn Handler>>>,
}

impl Router {
    /// Creates a router with an uninitialized registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the child registered under `name`.
    ///
    /// The registry is created on first use. Returns `&mut Self` so
    /// registrations chain.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> &mut Self {
        self.children
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), handler);
        self
    }

    /// Removes the child registered under `name`.
    ///
    /// Returns `true` if a child was present. A no-op returning `false` when
    /// the registry was never initialized.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.children
            .as_mut()
            .is_some_and(|children| children.remove(name).is_some())
    }

    /// Empties the registry. A no-op when it was never initialized.
    pub fn clear_all(&mut self) {
        if let Some(children) = self.children.as_mut() {
            children.clear();
        }
    }

    /// Returns the number of registered children.
    pub fn len(&self) -> usize {
        self.children.as_ref().map_or(0, HashMap::len)
    }

    /// Returns `true` if no children are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn not_found() -> Response {
        Response::new(StatusCode::NotFound)
    }
}

#[async_trait]
impl Handler for Router {
    /// Forwards `req` to the child registered under the segment at `cursor`.
    ///
    /// The child receives `cursor + 1` and the same segment slice; its result
    /// is returned unchanged. Any miss answers 404 with an empty body.
    async fn handle(&self, req: &Request, cursor: usize, segments: &[String]) -> HandlerResult {
        let Some(children) = self.children.as_ref() else {
            return Ok(Self::not_found());
        };

        let Some(segment) = segments.get(cursor) else {
            return Ok(Self::not_found());
        };

        let Some(child) = children.get(segment) else {
            debug!(segment = %segment, cursor, "no child registered for segment");
            return Ok(Self::not_found());
        };

        child.handle(req, cursor + 1, segments).await
    }
}
