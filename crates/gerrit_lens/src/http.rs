//! Transport boundary for all HTTP I/O.
//!
//! [`crate::api::GerritApi`] builds [`HttpRequest`]s and hands them to an
//! [`HttpTransport`]. Status codes are not interpreted here: any answer from
//! the server is a successful send, and only failures to get an answer at all
//! are [`HttpError`]s.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether the method can change server state.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        self != HttpMethod::Get
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// An outgoing request. The URL is absolute and already carries the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Attach a serialized JSON body. An empty body leaves the request as is.
    #[must_use]
    pub fn with_json(mut self, body: Vec<u8>) -> Self {
        if !body.is_empty() {
            self.body = body;
            self = self.with_header("Content-Type", "application/json; charset=UTF-8");
        }
        self
    }

    /// First header value with this name, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Key under which identical requests share one network call.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        format!("{} {}\n{}", self.method, self.url, String::from_utf8_lossy(&self.body))
    }
}

/// Whatever the server answered, error statuses included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The server could not be reached or its answer could not be read.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("could not connect: {0}")]
    Connect(String),

    #[error("request timed out")]
    TimedOut,

    #[error("could not read response: {0}")]
    Body(String),

    #[error("could not build HTTP client: {0}")]
    Client(String),

    #[error("no response routed for {method} {url}")]
    Unrouted { method: HttpMethod, url: String },
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

#[cfg(feature = "reqwest")]
pub mod reqwest_transport {
    use std::time::Duration;

    use super::*;

    fn classify(err: reqwest::Error) -> HttpError {
        if err.is_timeout() {
            HttpError::TimedOut
        } else if err.is_body() || err.is_decode() {
            HttpError::Body(err.to_string())
        } else {
            HttpError::Connect(err.to_string())
        }
    }

    /// Transport over a shared `reqwest` client.
    #[derive(Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }

        /// `accept_invalid_certs` is for self-hosted servers with
        /// self-signed certificates.
        pub fn with_options(timeout: Duration, accept_invalid_certs: bool) -> Result<Self, HttpError> {
            reqwest::Client::builder()
                .timeout(timeout)
                .danger_accept_invalid_certs(accept_invalid_certs)
                .build()
                .map(Self::new)
                .map_err(|e| HttpError::Client(e.to_string()))
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Delete => reqwest::Method::DELETE,
            };
            let builder = request
                .headers
                .iter()
                .fold(self.client.request(method, &request.url), |b, (k, v)| {
                    b.header(k.as_str(), v.as_str())
                });
            let builder = if request.body.is_empty() {
                builder
            } else {
                builder.body(request.body)
            };

            let response = builder.send().await.map_err(classify)?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    Some((name.as_str().to_string(), value.to_str().ok()?.to_string()))
                })
                .collect();
            let body = response.bytes().await.map_err(classify)?.to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockTransport;

#[cfg(any(test, feature = "test-util"))]
mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::api::MAGIC_PREFIX;

    type Routes = HashMap<(HttpMethod, String), VecDeque<HttpResponse>>;

    /// Scripted Gerrit server.
    ///
    /// Responses are queued per method and exact URL (query included) and
    /// handed out in order. Each send yields once before answering, so
    /// concurrent callers really overlap.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        routes: Arc<Mutex<Routes>>,
        sent: Arc<Mutex<Vec<HttpRequest>>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, method: HttpMethod, url: impl Into<String>, response: HttpResponse) {
            self.routes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry((method, url.into()))
                .or_default()
                .push_back(response);
        }

        /// Queue a 200 JSON answer, prefixed the way Gerrit prefixes JSON.
        pub fn push_json(&self, method: HttpMethod, url: impl Into<String>, json: &str) {
            let mut response = HttpResponse::new(200, format!("{MAGIC_PREFIX}\n{json}"));
            response
                .headers
                .push(("Content-Type".to_string(), "application/json".to_string()));
            self.push(method, url, response);
        }

        /// Queue a plain-text answer with the given status.
        pub fn push_status(&self, method: HttpMethod, url: impl Into<String>, status: u16, body: &str) {
            self.push(method, url, HttpResponse::new(status, body));
        }

        /// Every request sent so far, oldest first.
        #[must_use]
        pub fn requests(&self) -> Vec<HttpRequest> {
            self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        #[must_use]
        pub fn count(&self, method: HttpMethod) -> usize {
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .filter(|r| r.method == method)
                .count()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let key = (request.method, request.url.clone());
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(request);
            let queued = self
                .routes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get_mut(&key)
                .and_then(VecDeque::pop_front);

            tokio::task::yield_now().await;

            queued.ok_or(HttpError::Unrouted {
                method: key.0,
                url: key.1,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder_sets_json_content_type_only_with_body() {
        let bare = HttpRequest::new(HttpMethod::Delete, "https://review.example.com/a/x");
        assert_eq!(bare.header("content-type"), None);

        let with_body = HttpRequest::new(HttpMethod::Put, "https://review.example.com/a/x")
            .with_header("Accept", "application/json")
            .with_json(br#"{"message":"nit"}"#.to_vec());
        assert_eq!(
            with_body.header("CONTENT-TYPE"),
            Some("application/json; charset=UTF-8")
        );
        assert_eq!(with_body.header("accept"), Some("application/json"));
    }

    #[test]
    fn test_dedup_key_distinguishes_method_and_body() {
        let url = "https://review.example.com/a/changes/1";
        let get = HttpRequest::new(HttpMethod::Get, url);
        let post = HttpRequest::new(HttpMethod::Post, url);
        let post_body = HttpRequest::new(HttpMethod::Post, url).with_json(b"{}".to_vec());

        assert_eq!(get.dedup_key(), HttpRequest::new(HttpMethod::Get, url).dedup_key());
        assert_ne!(get.dedup_key(), post.dedup_key());
        assert_ne!(post.dedup_key(), post_body.dedup_key());
    }

    #[test]
    fn test_only_get_is_non_mutating() {
        assert!(!HttpMethod::Get.is_mutating());
        assert!(HttpMethod::Post.is_mutating());
        assert!(HttpMethod::Put.is_mutating());
        assert!(HttpMethod::Delete.is_mutating());
    }

    #[tokio::test]
    async fn test_mock_answers_in_order_and_records_requests() {
        let transport = MockTransport::new();
        let url = "https://review.example.com/a/changes/";
        transport.push_json(HttpMethod::Get, url, "[]");
        transport.push_status(HttpMethod::Get, url, 503, "busy");

        let first = transport
            .send(HttpRequest::new(HttpMethod::Get, url))
            .await
            .expect("first");
        assert!(first.is_success());
        assert_eq!(first.header("content-type"), Some("application/json"));
        assert_eq!(first.text(), ")]}'\n[]");

        let second = transport
            .send(HttpRequest::new(HttpMethod::Get, url))
            .await
            .expect("second");
        assert_eq!(second.status, 503);
        assert!(!second.is_success());

        assert_eq!(transport.count(HttpMethod::Get), 2);
        assert_eq!(transport.requests()[0].url, url);
    }

    #[tokio::test]
    async fn test_mock_without_route_is_unrouted() {
        let transport = MockTransport::new();
        let err = transport
            .send(HttpRequest::new(HttpMethod::Delete, "https://review.example.com/a/missing"))
            .await
            .expect_err("nothing queued");
        assert!(matches!(err, HttpError::Unrouted { method: HttpMethod::Delete, .. }));
    }
}
