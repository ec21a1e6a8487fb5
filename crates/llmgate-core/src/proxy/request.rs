use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use std::sync::Arc;

use crate::auth::Identity;
use crate::provider::{Adapter, RequestInfo};

/// A buffered inbound request on its way through the transport chain.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Adapter selected by path prefix
    pub adapter: Arc<dyn Adapter>,
    /// `/v1/...` part of the path
    pub suffix: String,
    /// Raw query string without `?`
    pub query: String,
    pub model: String,
    /// Filled in by the auth layer
    pub identity: Identity,
}

impl ProxyRequest {
    pub fn new(method: Method, headers: HeaderMap, body: Bytes, adapter: Arc<dyn Adapter>) -> Self {
        Self {
            method,
            headers,
            body,
            adapter,
            suffix: String::new(),
            query: String::new(),
            model: String::new(),
            identity: Identity::default(),
        }
    }

    pub fn info(&self) -> RequestInfo {
        RequestInfo {
            method: self.method.clone(),
            path: self.suffix.clone(),
            query: self.query.clone(),
            model: self.model.clone(),
            tenant: self.identity.tenant.clone(),
            app: self.identity.app.clone(),
            user_id: self.identity.user_id.clone(),
        }
    }
}
