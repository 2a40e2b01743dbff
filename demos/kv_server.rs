//! Runnable demo: an in-memory key-value store behind a two-level router.
//!
//! ```text
//! GET  /api/kv/<key>          read a value
//! POST /api/kv/<key>          store a value (form field `value`)
//! ```
//!
//! Try it:
//!
//! ```text
//! curl -X POST -d 'value=hello' http://127.0.0.1:8080/api/kv/greeting
//! curl http://127.0.0.1:8080/api/kv/greeting
//! ```

use std::sync::Arc;

use edgekv::router::Router;
use edgekv::server::Server;
use edgekv::store::MemoryStore;
use edgekv::table::{Origins, StoreTable};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgekv=debug".into()),
        )
        .init();

    let store = Arc::new(MemoryStore::new());

    // A wide-open table and one gated to a single origin, both over the same
    // store.
    let open = StoreTable::new(store.clone(), Origins::Any);
    let gated = StoreTable::new(store, Origins::allow_list(["https://app.example"]));

    let mut api = Router::new();
    api.register("kv", Arc::new(open))
        .register("private", Arc::new(gated));

    let mut root = Router::new();
    root.register("api", Arc::new(api));

    let server = Server::bind("127.0.0.1:8080").await?;
    println!("Listening on http://{}", server.local_addr());
    server.serve(Arc::new(root)).await?;
    Ok(())
}
