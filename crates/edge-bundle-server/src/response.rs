//! HTTP response conversion.
//!
//! Guest responses, static assets and errors all leave the server through
//! [`WasmHttpResponse`].

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};
use tracing::warn;

use edge_bundle_core::GuestResponse;

/// A response before conversion to axum.
#[derive(Debug, Clone)]
pub struct WasmHttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers as key-value pairs
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl WasmHttpResponse {
    /// Create a simple text response.
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![(
                "content-type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: body.as_bytes().to_vec(),
        }
    }

    /// Create a JSON response.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string().into_bytes(),
        }
    }

    /// Add a header to the response.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Convert to Axum response.
    ///
    /// Headers that are not valid HTTP are dropped with a warning. An
    /// out-of-range status becomes 500.
    pub fn into_axum_response(self) -> Response<Body> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(header = %name, "Dropping invalid response header"),
            }
        }

        response
    }
}

impl From<GuestResponse> for WasmHttpResponse {
    fn from(response: GuestResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }
}
