//! Origin checking and the default response header base.
//!
//! Every response a store table emits is built on three security headers;
//! CORS and content-type headers are merged on top of them, never in their
//! place.

use crate::http::{Headers, Request};

/// Preflight results may be cached for one day.
pub const CACHE_MAX_AGE: &str = "86400";

/// Which request origins are permitted cross-origin access.
///
/// Immutable per table instance, supplied at construction.
#[derive(Debug, Clone)]
pub enum Origins {
    /// Allow every origin; responses carry `Access-Control-Allow-Origin: *`.
    Any,
    /// Allow exactly the listed origin strings.
    AllowList(Vec<String>),
}

impl Origins {
    /// Builds an allow-list policy from anything yielding origin strings.
    pub fn allow_list<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AllowList(origins.into_iter().map(Into::into).collect())
    }
}

/// The security headers every emitted response starts from.
pub fn default_headers() -> Headers {
    Headers::from([
        ("X-Content-Type-Options", "nosniff"),
        ("X-Frame-Options", "deny"),
        ("Content-Security-Policy", "default-src 'none'"),
    ])
}

/// Evaluates the origin policy against the request's `Origin` header.
///
/// On success returns the header base to build the response on: the default
/// security headers plus `Access-Control-Allow-Origin` (and `Vary: Origin`
/// when a specific origin is echoed back). `None` means forbidden; the caller
/// answers `403` immediately without reading anything else from the request.
/// Continuation is the `Some` arm itself — there is no status value to
/// range-check after the fact.
pub fn check_origin(req: &Request, policy: &Origins) -> Option<Headers> {
    let allowed = match policy {
        Origins::Any => {
            let mut headers = default_headers();
            headers.insert("Access-Control-Allow-Origin", "*");
            return Some(headers);
        }
        Origins::AllowList(allowed) => allowed,
    };

    let origin = req.headers().get("origin")?;

    if allowed.iter().any(|o| o == origin) {
        let mut headers = default_headers();
        headers.insert("Access-Control-Allow-Origin", origin);
        headers.insert("Vary", "Origin");
        Some(headers)
    } else {
        None
    }
}
