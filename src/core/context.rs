use std::collections::HashMap;

use http::{HeaderMap, Method, Request, Uri};

/// Per-request data available to stylesheet and parameter expressions.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Values attached by earlier policies in the chain.
    pub attributes: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
            attributes: HashMap::new(),
        }
    }

    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self::new(req.method().clone(), req.uri(), req.headers().clone())
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// First value of header `name` that is valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}
