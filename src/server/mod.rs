//! Async TCP front end using Tokio.
//!
//! Accepts connections, parses HTTP/1.1 requests, and dispatches each one
//! into a root [`Handler`] tree. This is the single place where a request's
//! path is decoded and split into segments; the handler tree only ever sees
//! the precomputed slice. Supports HTTP/1.1 persistent connections
//! (keep-alive) out of the box.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::handler::{Handler, path_segments};
use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// TCP server driving a handler tree.
///
/// Binds to an address and feeds every parsed request into the root
/// [`Handler`] — typically a [`crate::router::Router`] with store tables at
/// the leaves, though a bare table works just as well.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use edgekv::router::Router;
/// use edgekv::server::Server;
/// use edgekv::store::MemoryStore;
/// use edgekv::table::{Origins, StoreTable};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let table = StoreTable::new(Arc::new(MemoryStore::new()), Origins::Any);
///     let mut root = Router::new();
///     root.register("kv", Arc::new(table));
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.serve(Arc::new(root)).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests into `root`.
    ///
    /// Each connection runs in its own Tokio task; the root handler is shared
    /// across all of them. A [`crate::store::StoreError`] propagating out of
    /// dispatch is logged and answered with `500 Internal Server Error`;
    /// nothing below the entry point translates store failures.
    ///
    /// This method runs until the process is terminated or an unrecoverable
    /// listener error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn serve(self, root: Arc<dyn Handler>) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "edgekv listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let root = Arc::clone(&root);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, root).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    root: Arc<dyn Handler>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Serve everything already buffered before awaiting the socket: a
        // pipelining client may deliver several requests in one read and may
        // half-close as soon as the last one is on the wire.
        let parsed = loop {
            match Request::parse(&buf) {
                Ok((request, body_offset)) => {
                    let total_needed = body_offset + request.content_length().unwrap_or(0);
                    if buf.len() >= total_needed {
                        break Some((request, total_needed));
                    }
                    // Headers are in; the body is still in flight.
                }
                Err(RequestError::Incomplete) => {}
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "bad request — sending 400");
                    let response = Response::new(StatusCode::BadRequest).keep_alive(false);
                    stream.write_all(&response.into_bytes()).await?;
                    return Ok(());
                }
            }

            // Guard against excessively large requests.
            if buf.len() > MAX_REQUEST_SIZE {
                warn!(peer = %peer_addr, "request too large — sending 413");
                let response = Response::new(StatusCode::PayloadTooLarge).keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                return Ok(());
            }

            if stream.read_buf(&mut buf).await? == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break None;
            }
        };

        let Some((request, total_needed)) = parsed else {
            break;
        };

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        // The one place segmentation happens; the tree below reuses it.
        let segments = path_segments(&request);
        let response = match root.handle(&request, 0, &segments).await {
            Ok(response) => response,
            Err(e) => {
                error!(peer = %peer_addr, error = %e, "store failure during dispatch");
                Response::new(StatusCode::InternalServerError)
            }
        };

        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close — shutting down");
            break;
        }
    }

    Ok(())
}
