//! # edgekv
//!
//! Segment-routed HTTP access to an edge key-value store.
//!
//! An incoming request's path is percent-decoded and split into segments
//! exactly once; a tree of [`router::Router`]s consumes one segment per level
//! until a [`table::StoreTable`] serves the remaining segment as a store key.
//! Route misses are plain `404` responses, so dispatch failure composes
//! through any nesting depth without special cases.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use edgekv::router::Router;
//! use edgekv::server::Server;
//! use edgekv::store::MemoryStore;
//! use edgekv::table::{Origins, StoreTable};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let table = StoreTable::new(store, Origins::Any);
//!
//!     let mut root = Router::new();
//!     root.register("kv", Arc::new(table));
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     println!("Listening on http://127.0.0.1:8080");
//!     server.serve(Arc::new(root)).await?;
//!     Ok(())
//! }
//! ```

pub mod handler;
pub mod http;
pub mod router;
pub mod server;
pub mod store;
pub mod table;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use handler::{Handler, HandlerResult};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
pub use store::{MemoryStore, PutOptions, Store, StoreError, StoredEntry};
pub use table::{Origins, StoreTable};
