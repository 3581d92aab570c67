//! Request-scoped context propagation.
//!
//! One [`RequestContext`] is established per inbound request and bound to the
//! task-local scope for the rest of that request's handling, so any code in
//! the async call tree can retrieve it without parameter threading.
//! Concurrent requests each get their own binding; they can never observe
//! each other's context.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;

use axum::http::{HeaderMap, Method, Uri};
use serde_json::Value;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: RefCell<RequestContext>;
}

/// Correlation context for a single logical request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Free-form fields layered in by child scopes (e.g. operation names)
    pub extra: BTreeMap<String, String>,
    pub ip: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub query: Option<String>,
    pub request_id: String,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
}

impl RequestContext {
    /// A fresh context with a unique request id and nothing else resolved.
    pub fn new() -> Self {
        Self {
            extra: BTreeMap::new(),
            ip: None,
            method: None,
            path: None,
            query: None,
            request_id: Uuid::new_v4().to_string(),
            session_id: None,
            user_agent: None,
            user_id: None,
            username: None,
        }
    }

    /// Build a context from the inbound request line, headers, and peer
    /// address. Client ip resolution is trusted-proxy-aware: the first
    /// non-empty entry of `x-forwarded-for`, then `x-real-ip`, then the
    /// socket address.
    pub fn from_request(
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        let mut context = Self::new();
        context.method = Some(method.to_string());
        context.path = Some(uri.path().to_string());
        context.query = uri.query().map(str::to_string);
        context.user_agent = headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        context.ip = client_ip(headers, peer_addr);
        context
    }

    /// A copy of this context with `overrides` layered on top. The receiver
    /// is left untouched; lookups after the child scope ends see the parent
    /// as it was.
    pub fn layered(&self, overrides: &BTreeMap<String, String>) -> Self {
        let mut child = self.clone();
        for (key, value) in overrides {
            child.extra.insert(key.clone(), value.clone());
        }
        child
    }

    /// Flatten to key/value pairs for log correlation. Unresolved fields are
    /// omitted rather than serialized as nulls.
    pub fn as_log_fields(&self) -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        fields.insert("request_id".to_string(), Value::from(self.request_id.clone()));

        let optional = [
            ("ip", &self.ip),
            ("method", &self.method),
            ("path", &self.path),
            ("query", &self.query),
            ("session_id", &self.session_id),
            ("user_agent", &self.user_agent),
            ("user_id", &self.user_id),
            ("username", &self.username),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                fields.insert(key.to_string(), Value::from(value.clone()));
            }
        }
        for (key, value) in &self.extra {
            fields.insert(key.clone(), Value::from(value.clone()));
        }
        fields
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

fn client_ip(headers: &HeaderMap, peer_addr: Option<SocketAddr>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return Some(first.to_string());
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return Some(real_ip.to_string());
        }
    }
    peer_addr.map(|addr| addr.ip().to_string())
}

/// Run `fut` with `context` bound as the current request context. Everything
/// awaited inside -- including spawned-nowhere continuations of the same
/// task -- sees it via [`current`].
pub async fn scope<F>(context: RequestContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(RefCell::new(context), fut).await
}

/// Run `fut` with a child context layering `overrides` over the current one.
/// Outside any scope, the child becomes a root context with a fresh id.
pub async fn child_scope<F>(overrides: BTreeMap<String, String>, fut: F) -> F::Output
where
    F: Future,
{
    let child = match current() {
        Some(parent) => parent.layered(&overrides),
        None => {
            let mut context = RequestContext::new();
            context.extra = overrides;
            context
        }
    };
    scope(child, fut).await
}

/// The context of the currently executing logical request, or None when no
/// scope is active (background task, test harness).
pub fn current() -> Option<RequestContext> {
    CURRENT.try_with(|c| c.borrow().clone()).ok()
}

/// Mutate the current context in place (e.g. record the user once the
/// session resolves). A no-op outside any scope.
pub fn enrich<F>(f: F)
where
    F: FnOnce(&mut RequestContext),
{
    let _ = CURRENT.try_with(|c| f(&mut c.borrow_mut()));
}
