//! `reqwest`-backed transport

use crate::error::HttpError;
use courier_core::config::{Body, Method};
use courier_core::transport::{RequestConfig, Response, Transport, TransportError, TransportFuture};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// HTTP transport over a shared `reqwest` client
///
/// Cheap to clone; clones share the connection pool. Dropping the future
/// returned by [`Transport::request`] cancels the HTTP exchange, which is how
/// an engine abort reaches the network.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: Client,
    origin: Option<Url>,
    timeout: Option<Duration>,
    accept_all_statuses: bool,
}

impl ReqwestTransport {
    /// Create a transport with a default client and no origin
    ///
    /// Only absolute endpoints can be requested until an origin is set
    /// through [`builder`](Self::builder).
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            origin: None,
            timeout: None,
            accept_all_statuses: false,
        }
    }

    /// Create a new transport builder
    #[must_use]
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    fn url_for(&self, endpoint: &str) -> Result<Url, TransportError> {
        if let Ok(url) = Url::parse(endpoint) {
            return Ok(url);
        }
        let origin = self.origin.as_ref().ok_or_else(|| {
            TransportError::InvalidRequest(format!("relative endpoint {endpoint:?} needs an origin"))
        })?;
        origin
            .join(endpoint)
            .map_err(|e| TransportError::InvalidRequest(format!("{endpoint:?}: {e}")))
    }

    fn prepare(&self, config: &RequestConfig, timeout: Option<Duration>) -> Result<RequestBuilder, TransportError> {
        let url = self.url_for(&config.endpoint())?;
        tracing::debug!(request_id = config.request_id, method = %config.method, %url, "Sending HTTP request");

        let mut builder = self.client.request(method(config.method), url);
        for (name, value) in &config.headers {
            builder = builder.header(name, value);
        }
        if !config.params.is_empty() {
            builder = builder.query(&config.params);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(match &config.body {
            None => builder,
            Some(Body::Json(value)) => builder.json(value),
            Some(Body::Text(text)) => builder
                .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(text.clone()),
            Some(Body::Bytes(bytes)) => builder.body(bytes.clone()),
            Some(Body::Form(fields)) => builder.form(fields),
        })
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ReqwestTransport {
    fn request(&self, config: RequestConfig) -> TransportFuture {
        let timeout = config.timeout.or(self.timeout);
        let prepared = self.prepare(&config, timeout);
        let accept_all_statuses = self.accept_all_statuses;

        Box::pin(async move {
            let response = prepared?
                .send()
                .await
                .map_err(|e| map_error(&e, timeout))?;
            read_response(response, accept_all_statuses, timeout).await
        })
    }
}

/// Builder for [`ReqwestTransport`]
#[derive(Debug, Default)]
pub struct ReqwestTransportBuilder {
    client: Option<Client>,
    origin: Option<Url>,
    timeout: Option<Duration>,
    accept_all_statuses: bool,
}

impl ReqwestTransportBuilder {
    /// Resolve relative endpoints against `origin`
    ///
    /// The origin's own path is replaced by rooted endpoints, so layer
    /// `base_url`s carry the full path.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidOrigin`] if `origin` is not an absolute URL
    pub fn origin(mut self, origin: &str) -> Result<Self, HttpError> {
        let invalid = |reason: String| HttpError::InvalidOrigin {
            origin: origin.to_string(),
            reason,
        };
        let url = Url::parse(origin).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("not a base URL".to_string()));
        }
        self.origin = Some(url);
        Ok(self)
    }

    /// Use an existing client (shared pool, custom TLS, proxies)
    #[must_use]
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Timeout for requests whose resolved configuration sets none
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Hand every status to the engine as a response
    ///
    /// By default non-2xx statuses fail as `TransportError::Status`. With this
    /// set they arrive as responses and the business predicate decides.
    #[must_use]
    pub const fn accept_all_statuses(mut self) -> Self {
        self.accept_all_statuses = true;
        self
    }

    /// Build the transport
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Client`] if no client was given and the default one cannot be built
    pub fn build(self) -> Result<ReqwestTransport, HttpError> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder().build()?,
        };
        Ok(ReqwestTransport {
            client,
            origin: self.origin,
            timeout: self.timeout,
            accept_all_statuses: self.accept_all_statuses,
        })
    }
}

const fn method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

fn map_error(error: &reqwest::Error, timeout: Option<Duration>) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout.unwrap_or_default())
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else if error.is_decode() {
        TransportError::Decode(error.to_string())
    } else {
        TransportError::Network(error.to_string())
    }
}

async fn read_response(
    response: reqwest::Response,
    accept_all_statuses: bool,
    timeout: Option<Duration>,
) -> Result<Response, TransportError> {
    let status = response.status();
    let headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();
    let bytes = response.bytes().await.map_err(|e| map_error(&e, timeout))?;
    let body = decode_body(&bytes);

    tracing::debug!(status = status.as_u16(), "HTTP response received");

    if !accept_all_statuses && !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            message: status_message(&body, status),
        });
    }

    Ok(Response {
        status: status.as_u16(),
        headers,
        body,
    })
}

fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn status_message(body: &Value, status: StatusCode) -> String {
    match body {
        Value::Null => status.canonical_reason().unwrap_or_default().to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_body_prefers_json() {
        assert_eq!(decode_body(br#"{"id": 1}"#), json!({"id": 1}));
        assert_eq!(decode_body(b"plain text"), json!("plain text"));
        assert_eq!(decode_body(b""), Value::Null);
    }

    #[test]
    fn test_status_message_uses_reason_for_empty_body() {
        assert_eq!(status_message(&Value::Null, StatusCode::NOT_FOUND), "Not Found");
        assert_eq!(status_message(&json!("gone"), StatusCode::GONE), "gone");
        assert_eq!(
            status_message(&json!({"code": 9}), StatusCode::BAD_REQUEST),
            r#"{"code":9}"#
        );
    }

    #[test]
    fn test_relative_endpoint_joins_origin() {
        let transport = ReqwestTransport::builder()
            .origin("https://api.example.com")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(
            transport.url_for("/v1/users/42").unwrap().as_str(),
            "https://api.example.com/v1/users/42"
        );
        assert_eq!(
            transport.url_for("https://other.example.com/x").unwrap().as_str(),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_relative_endpoint_without_origin_is_invalid() {
        let transport = ReqwestTransport::new();
        assert!(matches!(
            transport.url_for("/users"),
            Err(TransportError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_origin_must_be_absolute() {
        assert!(matches!(
            ReqwestTransport::builder().origin("/relative"),
            Err(HttpError::InvalidOrigin { .. })
        ));
        assert!(matches!(
            ReqwestTransport::builder().origin("mailto:someone@example.com"),
            Err(HttpError::InvalidOrigin { .. })
        ));
    }
}
