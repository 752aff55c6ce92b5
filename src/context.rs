use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use http::{header::AsHeaderName, request::Parts, HeaderMap, HeaderName, HeaderValue};

use crate::ProcedureKind;

/// The state of a single call, created fresh for every request.
///
/// Middleware receive it mutably so they can store values in the request state for the handler
/// to pick up. It is never shared between requests.
pub struct Context {
    request: Arc<Parts>,
    // Shared with the dispatcher so headers set by the handler end up on the response.
    response_headers: Arc<Mutex<HeaderMap>>,
    procedure: String,
    kind: ProcedureKind,
    state: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new(request: Parts) -> Self {
        Self {
            request: Arc::new(request),
            response_headers: Default::default(),
            procedure: String::new(),
            kind: ProcedureKind::Query,
            state: HashMap::new(),
        }
    }

    pub(crate) fn bind(&mut self, procedure: &str, kind: ProcedureKind) {
        self.procedure = procedure.to_string();
        self.kind = kind;
    }

    pub(crate) fn response_headers_handle(&self) -> Arc<Mutex<HeaderMap>> {
        self.response_headers.clone()
    }

    /// The head of the HTTP request being served.
    pub fn request(&self) -> &Parts {
        &self.request
    }

    /// The name of the procedure being called.
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    /// Get a request header. Values which aren't valid visible ASCII are ignored.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.request
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// Get a parameter from the URL's query string.
    pub fn query(&self, key: &str) -> Option<String> {
        let query = self.request.uri.query()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Set a header on the response. Replaces any previous value.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        lock(&self.response_headers).insert(name, value);
    }

    /// The headers which will be sent with the response.
    pub fn response_headers(&self) -> HeaderMap {
        lock(&self.response_headers).clone()
    }

    /// Store a value in the request state, replacing any value stored under the same key.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.state.insert(key.into(), Box::new(value));
    }

    /// Get a value from the request state. Returns `None` if the key is missing or holds another type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.state.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.state.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Take a value out of the request state. A value of another type is left in place.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.state.get(key)?.is::<T>() {
            return None;
        }

        self.state
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.contains_key(key)
    }
}

impl Default for Context {
    fn default() -> Self {
        let (parts, _) = http::Request::new(()).into_parts();
        Self::new(parts)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("procedure", &self.procedure)
            .field("kind", &self.kind)
            .field("method", &self.request.method)
            .field("uri", &self.request.uri)
            .field("state", &self.state.keys())
            .finish()
    }
}

// Header inserts cannot leave the map half written, so a poisoned lock is still usable.
pub(crate) fn lock(headers: &Mutex<HeaderMap>) -> MutexGuard<'_, HeaderMap> {
    headers.lock().unwrap_or_else(|err| err.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(uri: &str) -> Context {
        let (parts, _) = http::Request::builder()
            .uri(uri)
            .header("x-user", "ferris")
            .body(())
            .unwrap()
            .into_parts();
        Context::new(parts)
    }

    #[test]
    fn reads_headers_and_query() {
        let ctx = context("/_kestrel?__proc=q__ping&name=a%20b");
        assert_eq!(ctx.header("x-user"), Some("ferris"));
        assert_eq!(ctx.header("x-missing"), None);
        assert_eq!(ctx.query("name").as_deref(), Some("a b"));
        assert_eq!(ctx.query("__proc").as_deref(), Some("q__ping"));
        assert_eq!(ctx.query("nope"), None);
    }

    #[test]
    fn request_state_is_typed() {
        let mut ctx = Context::default();
        ctx.set("user_id", 42u64);

        assert_eq!(ctx.get::<u64>("user_id"), Some(&42));
        assert_eq!(ctx.get::<String>("user_id"), None);
        assert_eq!(ctx.remove::<String>("user_id"), None);
        assert!(ctx.contains("user_id"));
        assert_eq!(ctx.remove::<u64>("user_id"), Some(42));
        assert!(!ctx.contains("user_id"));
    }

    #[test]
    fn response_headers_are_shared() {
        let ctx = Context::default();
        let handle = ctx.response_headers_handle();
        ctx.set_header(
            http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        );

        assert_eq!(
            lock(&handle).get(http::header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
    }
}
