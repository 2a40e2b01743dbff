//! The store table — terminal handler backed by a key-value store.
//!
//! A [`StoreTable`] sits at the bottom of a router tree and serves the
//! segment at its cursor as a store key: GET reads the value back with its
//! persisted content type, POST accepts a form submission and writes it,
//! OPTIONS answers the CORS preflight, and everything else is
//! `405 Method Not Allowed`. Every method runs behind the same preamble: the
//! table's origin policy is evaluated first, and a failed check answers
//! `403 Forbidden` before any method semantics are touched.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::handler::{Handler, HandlerResult};
use crate::http::{Headers, Method, Request, Response, StatusCode};
use crate::store::{PutOptions, Store};

pub mod cors;
pub mod form;

pub use cors::Origins;

use cors::CACHE_MAX_AGE;
use form::{Form, Part, PartValue, MULTIPART, URLENCODED};

const TEXT_PLAIN: &str = "text/plain";
const OCTET_STREAM: &str = "application/octet-stream";

/// Terminal handler exposing CORS-gated read/write access to a [`Store`].
///
/// The origin policy is fixed at construction. The store is shared behind an
/// [`Arc`]; several tables may front different corners of the same store.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use edgekv::store::MemoryStore;
/// use edgekv::table::{Origins, StoreTable};
///
/// let store = Arc::new(MemoryStore::new());
/// let public = StoreTable::new(store.clone(), Origins::Any);
/// let gated = StoreTable::new(store, Origins::allow_list(["https://app.example"]));
/// ```
pub struct StoreTable {
    store: Arc<dyn Store>,
    origins: Origins,
}

impl StoreTable {
    /// Creates a table over `store` gated by `origins`.
    pub fn new(store: Arc<dyn Store>, origins: Origins) -> Self {
        Self { store, origins }
    }

    /// GET: read the value for `key` and serve it under its stored type.
    ///
    /// Absence is the store's concern — an absent key reads back as an empty
    /// body with the generic type, still status 200.
    async fn get(&self, key: &str, mut headers: Headers) -> HandlerResult {
        let entry = self.store.get(key).await?;
        headers.set(
            "Content-Type",
            entry.metadata.as_deref().unwrap_or(OCTET_STREAM),
        );
        Ok(Response::with_headers(StatusCode::Ok, headers).body_bytes(entry.value.to_vec()))
    }

    /// POST: parse the form body and write the submitted value under `key`.
    async fn post(&self, req: &Request, key: &str, mut headers: Headers) -> HandlerResult {
        let content_type = req.headers().get("content-type").unwrap_or("");
        let media = form::media_type(content_type);
        if !media.eq_ignore_ascii_case(URLENCODED) && !media.eq_ignore_ascii_case(MULTIPART) {
            headers.insert("Accept", URLENCODED);
            headers.insert("Accept", MULTIPART);
            return Ok(Response::with_headers(
                StatusCode::UnsupportedMediaType,
                headers,
            ));
        }

        let form = match Form::parse(content_type, req.body()) {
            Ok(form) => form,
            Err(err) => {
                debug!(error = %err, "rejecting unparsable form body");
                return Ok(Response::with_headers(StatusCode::BadRequest, headers));
            }
        };

        let Some(value_part) = form.first("value") else {
            return Ok(Response::with_headers(StatusCode::BadRequest, headers));
        };

        let (value, media_type) = select_value(value_part, &form);

        let expiration = form
            .first_text("expiration")
            .and_then(|s| s.trim().parse::<u64>().ok());

        let opts = PutOptions {
            metadata: Some(media_type),
            expiration,
        };

        debug!(key, size = value.len(), "storing value");
        self.store.put(key, value, opts).await?;

        Ok(Response::with_headers(StatusCode::Ok, headers))
    }

    /// OPTIONS: advertise the allowed methods, one header entry per method,
    /// and the preflight cache lifetime.
    fn options(mut headers: Headers) -> Response {
        for method in ["GET", "POST", "OPTIONS"] {
            headers.insert("Access-Control-Allow-Methods", method);
        }
        headers.insert("Access-Control-Max-Age", CACHE_MAX_AGE);
        Response::with_headers(StatusCode::Ok, headers)
    }
}

/// Picks the value to store from a form submission.
///
/// When the `value` field is plain text, all parts are scanned in submission
/// order: a file part whose decoded text equals the field wins — its bytes
/// and declared media type are stored instead of the text — and a text part
/// equal to the field stops the scan with the text winning. First match
/// short-circuits; with no match the text is stored as `text/plain`. A
/// file-valued `value` field is stored directly under its declared type.
fn select_value(value_part: &Part, form: &Form) -> (Bytes, String) {
    let text = match &value_part.value {
        PartValue::File {
            content_type,
            bytes,
        } => return (bytes.clone(), content_type.clone()),
        PartValue::Text(text) => text,
    };

    for part in form.parts() {
        match &part.value {
            PartValue::File {
                content_type,
                bytes,
            } => {
                if part.text() == *text {
                    return (bytes.clone(), content_type.clone());
                }
            }
            PartValue::Text(other) => {
                if other == text {
                    break;
                }
            }
        }
    }

    (Bytes::from(text.clone()), TEXT_PLAIN.to_owned())
}

#[async_trait]
impl Handler for StoreTable {
    /// Serves `segments[cursor]` as the store key after the origin preamble.
    async fn handle(&self, req: &Request, cursor: usize, segments: &[String]) -> HandlerResult {
        let Some(headers) = cors::check_origin(req, &self.origins) else {
            return Ok(Response::with_headers(
                StatusCode::Forbidden,
                cors::default_headers(),
            ));
        };

        let key = segments
            .get(cursor)
            .map(String::as_str)
            .filter(|k| !k.is_empty());

        match req.method() {
            Method::Get => match key {
                Some(key) => self.get(key, headers).await,
                None => Ok(Response::with_headers(StatusCode::BadRequest, headers)),
            },
            Method::Post => match key {
                Some(key) => self.post(req, key, headers).await,
                None => Ok(Response::with_headers(StatusCode::BadRequest, headers)),
            },
            Method::Options => Ok(Self::options(headers)),
            _ => Ok(Response::with_headers(
                StatusCode::MethodNotAllowed,
                headers,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError, StoredEntry};
    use tokio::sync::Mutex;

    fn parse_request(raw: &str) -> Request {
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    fn get_request(path: &str, origin: Option<&str>) -> Request {
        let origin_line = origin
            .map(|o| format!("Origin: {o}\r\n"))
            .unwrap_or_default();
        parse_request(&format!(
            "GET {path} HTTP/1.1\r\nHost: localhost\r\n{origin_line}\r\n"
        ))
    }

    fn post_request(path: &str, content_type: &str, body: &str) -> Request {
        parse_request(&format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ))
    }

    fn method_request(method: &str, path: &str) -> Request {
        parse_request(&format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"
        ))
    }

    fn segs(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn open_table() -> (Arc<MemoryStore>, StoreTable) {
        let store = Arc::new(MemoryStore::new());
        let table = StoreTable::new(store.clone(), Origins::Any);
        (store, table)
    }

    /// Store double that records the options of the last put.
    #[derive(Default)]
    struct RecordingStore {
        last_put: Mutex<Option<(String, Bytes, PutOptions)>>,
    }

    #[async_trait]
    impl Store for RecordingStore {
        async fn get(&self, _key: &str) -> Result<StoredEntry, StoreError> {
            Ok(StoredEntry::default())
        }

        async fn put(&self, key: &str, value: Bytes, opts: PutOptions) -> Result<(), StoreError> {
            *self.last_put.lock().await = Some((key.to_owned(), value, opts));
            Ok(())
        }
    }

    // ── Origin preamble ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn wildcard_policy_allows_any_origin() {
        let (_, table) = open_table();
        let req = get_request("/key", Some("https://anywhere.example"));
        let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("access-control-allow-origin"), Some("*"));
    }

    #[tokio::test]
    async fn allow_list_echoes_origin_and_varies() {
        let store = Arc::new(MemoryStore::new());
        let table = StoreTable::new(store, Origins::allow_list(["https://x"]));
        let req = get_request("/key", Some("https://x"));
        let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(
            res.headers().get("access-control-allow-origin"),
            Some("https://x")
        );
        assert_eq!(res.headers().get("vary"), Some("Origin"));
    }

    #[tokio::test]
    async fn allow_list_rejects_unlisted_origin() {
        let store = Arc::new(MemoryStore::new());
        let table = StoreTable::new(store, Origins::allow_list(["https://x"]));
        let req = get_request("/key", Some("https://y"));
        let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::Forbidden);
        assert!(res.body_ref().is_empty());
        assert!(!res.headers().contains("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn allow_list_rejects_missing_origin() {
        let store = Arc::new(MemoryStore::new());
        let table = StoreTable::new(store, Origins::allow_list(["https://x"]));
        let req = get_request("/key", None);
        let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::Forbidden);
    }

    #[tokio::test]
    async fn security_headers_on_every_response() {
        let (_, table) = open_table();
        let req = get_request("/key", None);
        let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
        assert_eq!(
            res.headers().get("x-content-type-options"),
            Some("nosniff")
        );
        assert_eq!(res.headers().get("x-frame-options"), Some("deny"));
        assert_eq!(
            res.headers().get("content-security-policy"),
            Some("default-src 'none'")
        );
    }

    // ── Key derivation ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn get_without_key_segment_is_bad_request() {
        let (_, table) = open_table();
        let req = get_request("/", None);
        let res = table.handle(&req, 5, &segs(&["key"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn get_with_empty_key_segment_is_bad_request() {
        let (_, table) = open_table();
        let req = get_request("/kv/", None);
        let res = table.handle(&req, 1, &segs(&["kv", ""])).await.unwrap();
        assert_eq!(res.status(), StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn key_is_the_segment_at_cursor() {
        let (store, table) = open_table();
        store
            .put(
                "greeting",
                Bytes::from_static(b"hi"),
                PutOptions {
                    metadata: Some("text/plain".to_owned()),
                    expiration: None,
                },
            )
            .await
            .unwrap();

        let req = get_request("/api/kv/greeting", None);
        let res = table
            .handle(&req, 2, &segs(&["api", "kv", "greeting"]))
            .await
            .unwrap();
        assert_eq!(res.body_ref(), b"hi");
    }

    // ── GET ───────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn get_serves_stored_value_and_type() {
        let (store, table) = open_table();
        store
            .put(
                "pic",
                Bytes::from_static(&[1, 2, 3]),
                PutOptions {
                    metadata: Some("image/png".to_owned()),
                    expiration: None,
                },
            )
            .await
            .unwrap();

        let req = get_request("/pic", None);
        let res = table.handle(&req, 0, &segs(&["pic"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("content-type"), Some("image/png"));
        assert_eq!(res.body_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn get_missing_key_is_empty_200_octet_stream() {
        let (_, table) = open_table();
        let req = get_request("/nothing", None);
        let res = table.handle(&req, 0, &segs(&["nothing"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
        assert!(res.body_ref().is_empty());
        assert_eq!(
            res.headers().get("content-type"),
            Some("application/octet-stream")
        );
    }

    // ── POST ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn post_unsupported_content_type_is_415_with_accepts() {
        let (_, table) = open_table();
        let req = post_request("/key", "text/plain", "value=hello");
        let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::UnsupportedMediaType);
        let accepts: Vec<_> = res.headers().get_all("accept").collect();
        assert_eq!(accepts, vec![URLENCODED, MULTIPART]);
    }

    #[tokio::test]
    async fn post_urlencoded_stores_text_plain() {
        let (store, table) = open_table();
        let req = post_request("/key", URLENCODED, "value=hello");
        let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
        assert!(res.body_ref().is_empty());

        let entry = store.get("key").await.unwrap();
        assert_eq!(entry.value.as_ref(), b"hello");
        assert_eq!(entry.metadata.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn post_without_value_field_is_400() {
        let (_, table) = open_table();
        let req = post_request("/key", URLENCODED, "other=field");
        let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn post_expiration_passed_through() {
        let store = Arc::new(RecordingStore::default());
        let table = StoreTable::new(store.clone(), Origins::Any);
        let req = post_request("/key", URLENCODED, "value=hello&expiration=1924992000");
        table.handle(&req, 0, &segs(&["key"])).await.unwrap();

        let put = store.last_put.lock().await;
        let (key, value, opts) = put.as_ref().unwrap();
        assert_eq!(key, "key");
        assert_eq!(value.as_ref(), b"hello");
        assert_eq!(opts.expiration, Some(1_924_992_000));
        assert_eq!(opts.metadata.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn post_unparsable_expiration_is_ignored() {
        let store = Arc::new(RecordingStore::default());
        let table = StoreTable::new(store.clone(), Origins::Any);
        let req = post_request("/key", URLENCODED, "value=hello&expiration=soon");
        let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::Ok);

        let put = store.last_put.lock().await;
        assert_eq!(put.as_ref().unwrap().2.expiration, None);
    }

    fn multipart(boundary: &str, sections: &[String]) -> String {
        format!(
            "{}--{boundary}--\r\n",
            sections
                .iter()
                .map(|s| format!("--{boundary}\r\n{s}"))
                .collect::<String>()
        )
    }

    fn text_section(name: &str, content: &str) -> String {
        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{content}\r\n")
    }

    fn file_section(name: &str, content_type: &str, content: &str) -> String {
        format!(
            "Content-Disposition: form-data; name=\"{name}\"; filename=\"f\"\r\nContent-Type: {content_type}\r\n\r\n{content}\r\n"
        )
    }

    #[tokio::test]
    async fn matching_file_before_value_wins_over_text() {
        let store = Arc::new(RecordingStore::default());
        let table = StoreTable::new(store.clone(), Origins::Any);

        let body = multipart(
            "B",
            &[
                file_section("upload", "image/svg+xml", "<svg/>"),
                text_section("value", "<svg/>"),
            ],
        );
        let req = post_request("/key", "multipart/form-data; boundary=B", &body);
        let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::Ok);

        let put = store.last_put.lock().await;
        let (_, value, opts) = put.as_ref().unwrap();
        assert_eq!(value.as_ref(), b"<svg/>");
        assert_eq!(opts.metadata.as_deref(), Some("image/svg+xml"));
    }

    #[tokio::test]
    async fn value_before_file_short_circuits_as_text() {
        let store = Arc::new(RecordingStore::default());
        let table = StoreTable::new(store.clone(), Origins::Any);

        let body = multipart(
            "B",
            &[
                text_section("value", "<svg/>"),
                file_section("upload", "image/svg+xml", "<svg/>"),
            ],
        );
        let req = post_request("/key", "multipart/form-data; boundary=B", &body);
        table.handle(&req, 0, &segs(&["key"])).await.unwrap();

        let put = store.last_put.lock().await;
        let (_, value, opts) = put.as_ref().unwrap();
        assert_eq!(value.as_ref(), b"<svg/>");
        assert_eq!(opts.metadata.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn non_matching_file_leaves_text_value() {
        let store = Arc::new(RecordingStore::default());
        let table = StoreTable::new(store.clone(), Origins::Any);

        let body = multipart(
            "B",
            &[
                file_section("upload", "image/png", "unrelated bytes"),
                text_section("value", "hello"),
            ],
        );
        let req = post_request("/key", "multipart/form-data; boundary=B", &body);
        table.handle(&req, 0, &segs(&["key"])).await.unwrap();

        let put = store.last_put.lock().await;
        let (_, value, opts) = put.as_ref().unwrap();
        assert_eq!(value.as_ref(), b"hello");
        assert_eq!(opts.metadata.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn post_malformed_multipart_is_400() {
        let (_, table) = open_table();
        let req = post_request("/key", "multipart/form-data; boundary=B", "not multipart");
        let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::BadRequest);
    }

    // ── OPTIONS and other methods ─────────────────────────────────────────────

    #[tokio::test]
    async fn options_advertises_methods_separately() {
        let (_, table) = open_table();
        let req = method_request("OPTIONS", "/key");
        let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
        let methods: Vec<_> = res
            .headers()
            .get_all("access-control-allow-methods")
            .collect();
        assert_eq!(methods, vec!["GET", "POST", "OPTIONS"]);
        assert_eq!(res.headers().get("access-control-max-age"), Some("86400"));
    }

    #[tokio::test]
    async fn options_needs_no_key_segment() {
        let (_, table) = open_table();
        let req = method_request("OPTIONS", "/");
        let res = table.handle(&req, 3, &[]).await.unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn other_methods_are_405_with_cors_headers() {
        let (_, table) = open_table();
        for method in ["PUT", "DELETE", "PATCH", "BREW"] {
            let req = method_request(method, "/key");
            let res = table.handle(&req, 0, &segs(&["key"])).await.unwrap();
            assert_eq!(res.status(), StatusCode::MethodNotAllowed);
            assert!(res.body_ref().is_empty());
            assert_eq!(res.headers().get("access-control-allow-origin"), Some("*"));
        }
    }
}
