//! Inbound request representation and the normalized request details
//! handed to hooks and sinks.

use crate::config::{IpExtractionConfig, RequestDetailsConfig};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

/// The parts of an HTTP request the engine looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    /// Client IP address as a string.
    pub ip: String,
    /// HTTP method as received.
    pub method: String,
    /// Path without query string, e.g. `/admin/users`.
    pub path: String,
    /// The URL as received: absolute when the host supplied one.
    pub full_url: String,
    /// Query string without the leading `?`.
    pub query: Option<String>,
    pub user_agent: Option<String>,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    /// Identifier of the authenticated user, if any.
    pub user_id: Option<String>,
}

impl InboundRequest {
    /// Build a request from a client IP, a method and a URL that is either
    /// absolute (`https://host/path?q`) or path-only (`/path?q`).
    pub fn new(ip: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        let full_url = url.into();
        let (path, query) = split_url(&full_url);

        Self {
            ip: ip.into(),
            method: method.into(),
            path,
            full_url,
            query,
            user_agent: None,
            headers: HashMap::new(),
            user_id: None,
        }
    }

    /// Build a request whose client IP is taken from proxy headers, falling
    /// back to the transport peer address.
    pub fn from_parts(
        peer: IpAddr,
        method: impl Into<String>,
        url: impl Into<String>,
        headers: &HashMap<String, Vec<String>>,
        extraction: &IpExtractionConfig,
    ) -> Self {
        let headers = flatten_headers(headers);
        let ip = extract_client_ip(&headers, extraction).unwrap_or(peer);
        let user_agent = headers.get("user-agent").cloned();

        let mut request = Self::new(ip.to_string(), method, url);
        request.user_agent = user_agent;
        request.headers = headers;
        request
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        let user_agent = user_agent.into();
        self.headers
            .insert("user-agent".to_string(), user_agent.clone());
        self.user_agent = Some(user_agent);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Path without surrounding slashes; the root path is `/`.
    pub fn normalized_path(&self) -> String {
        let trimmed = self.path.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Full URL without the trailing `/` before the query string.
    pub fn normalized_full_url(&self) -> String {
        let without_fragment = self.full_url.split('#').next().unwrap_or_default();
        let (target, query) = match without_fragment.split_once('?') {
            Some((target, query)) => (target, Some(query)),
            None => (without_fragment, None),
        };

        let target = target.trim_end_matches('/');
        let target = if target.is_empty() { "/" } else { target };

        match query.filter(|q| !q.is_empty()) {
            Some(query) => format!("{}?{}", target, query),
            None => target.to_string(),
        }
    }
}

/// Split a URL into its path and query string.
fn split_url(url: &str) -> (String, Option<String>) {
    let without_fragment = url.split('#').next().unwrap_or_default();
    let (target, query) = match without_fragment.split_once('?') {
        Some((target, query)) => (target, Some(query.to_string())),
        None => (without_fragment, None),
    };

    let path = match target.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None => target,
    };

    let path = if path.is_empty() { "/" } else { path };
    (path.to_string(), query.filter(|q| !q.is_empty()))
}

/// Extract client IP from request headers.
pub fn extract_client_ip(
    headers: &HashMap<String, String>,
    config: &IpExtractionConfig,
) -> Option<IpAddr> {
    for header_name in &config.headers {
        let header_lower = header_name.to_lowercase();
        if let Some(value) = headers.get(&header_lower) {
            let ip_str = if config.use_first_ip {
                // X-Forwarded-For: client, proxy1, proxy2
                value.split(',').next()?.trim()
            } else {
                value.split(',').last()?.trim()
            };

            if let Ok(ip) = ip_str.parse() {
                return Some(ip);
            }
        }
    }
    None
}

/// Flatten multi-value headers to single values.
fn flatten_headers(headers: &HashMap<String, Vec<String>>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.first().cloned().unwrap_or_default()))
        .collect()
}

/// Read-only snapshot of an admitted request.
///
/// This is the only input hooks receive, so they never depend on the host
/// framework's request type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestDetails {
    pub ip: String,
    /// Upper-cased HTTP method.
    pub method: String,
    pub path: String,
    pub full_url: String,
    pub query: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    /// Captured headers, keyed by lower-cased name.
    pub headers: BTreeMap<String, String>,
    pub user_id: Option<String>,
    /// Response status, once the host knows it.
    pub status_code: Option<u16>,
    /// Handling time in milliseconds, once the host knows it.
    pub duration_ms: Option<u64>,
}

impl RequestDetails {
    pub fn from_request(request: &InboundRequest, config: &RequestDetailsConfig) -> Self {
        let headers = config
            .capture_headers
            .iter()
            .filter_map(|name| {
                let name = name.to_lowercase();
                request.headers.get(&name).map(|value| (name, value.clone()))
            })
            .collect();

        Self {
            ip: request.ip.clone(),
            method: request.method.trim().to_ascii_uppercase(),
            path: request.path.clone(),
            full_url: request.full_url.clone(),
            query: request.query.clone(),
            user_agent: request.user_agent.clone(),
            referrer: request.headers.get("referer").cloned(),
            headers,
            user_id: request.user_id.clone(),
            status_code: None,
            duration_ms: None,
        }
    }

    /// Attach response outcome.
    pub fn with_response(mut self, status_code: u16, duration_ms: u64) -> Self {
        self.status_code = Some(status_code);
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}
