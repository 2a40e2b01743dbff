//! The handler capability — anything that can answer a `(request, cursor,
//! segments)` triple.
//!
//! Dispatch descends a tree of [`Handler`]s: a [`crate::router::Router`]
//! consumes one path segment per level and forwards to the child registered
//! under it, while a [`crate::table::StoreTable`] terminates the descent and
//! answers from the key-value store. Path segmentation happens exactly once
//! per request — in [`path_segments`], called by the entry point — and the
//! resulting slice is threaded by reference through the whole recursion.

use async_trait::async_trait;
use percent_encoding::percent_decode_str;

use crate::http::{Request, Response};
use crate::store::StoreError;

/// Result of dispatching a request to a [`Handler`].
///
/// Route misses, forbidden origins, bad content types, and the like are all
/// `Ok` responses with the appropriate status; the `Err` arm is reserved for
/// store backend failures, which propagate to the entry point untranslated.
pub type HandlerResult = Result<Response, StoreError>;

/// A component capable of producing a response for a request at a given
/// position in its path.
///
/// `cursor` indexes into `segments` and marks the segment this handler must
/// consume. Routers advance it by exactly one per level; terminal handlers
/// read it as their key. Implementations must never recompute segmentation —
/// the slice they receive was produced once by the entry point.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Produces a response for `req`, consuming the segment at `cursor`.
    async fn handle(&self, req: &Request, cursor: usize, segments: &[String]) -> HandlerResult;

    /// Entry point: computes the path segments once and starts dispatch at
    /// cursor 0. Any handler can be a root.
    async fn dispatch(&self, req: &Request) -> HandlerResult {
        let segments = path_segments(req);
        self.handle(req, 0, &segments).await
    }
}

/// Splits a request's percent-decoded path into segments.
///
/// The leading `/` is stripped before splitting so that cursor 0 aligns with
/// the first real path component; interior and trailing empty segments are
/// kept as-is. Invalid percent escapes decode lossily rather than failing the
/// request.
///
/// # Examples
///
/// ```
/// use edgekv::handler::path_segments;
/// use edgekv::http::Request;
///
/// let raw = b"GET /kv/hello%20world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (req, _) = Request::parse(raw).unwrap();
/// assert_eq!(path_segments(&req), vec!["kv", "hello world"]);
/// ```
pub fn path_segments(req: &Request) -> Vec<String> {
    let decoded = percent_decode_str(req.path()).decode_utf8_lossy();
    let path = decoded.strip_prefix('/').unwrap_or(&decoded);
    path.split('/').map(str::to_owned).collect()
}
