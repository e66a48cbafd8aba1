//! Request/response exchange format between host and guest.
//!
//! Both directions use the same frame:
//!
//! ```text
//! ┌──────────────┬──────────────────────┬────────────────┐
//! │ head_len u32 │ JSON head (head_len) │ raw body bytes │
//! │ little-endian│                      │                │
//! └──────────────┴──────────────────────┴────────────────┘
//! ```
//!
//! The head carries method, URI and headers (request) or status and
//! headers (response); the body travels untouched so binary payloads never
//! pass through JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use edge_bundle_common::RuntimeError;

const LEN_PREFIX: usize = 4;

/// A request handed to the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestRequest {
    /// HTTP method.
    pub method: String,
    /// Path and query.
    pub uri: String,
    /// Header pairs in arrival order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

/// The guest's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestResponse {
    /// HTTP status code.
    pub status: u16,
    /// Header pairs.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

#[derive(Serialize)]
struct RequestHead<'a> {
    method: &'a str,
    uri: &'a str,
    headers: &'a [(String, String)],
}

#[derive(Serialize, Deserialize)]
struct ResponseHead {
    status: u16,
    #[serde(default)]
    headers: Vec<(String, String)>,
}

impl GuestRequest {
    /// Create a request without headers or body.
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Encode into a guest frame.
    ///
    /// # Errors
    ///
    /// Fails only if the head cannot be serialized.
    pub fn to_frame(&self) -> Result<Vec<u8>, RuntimeError> {
        let head = RequestHead {
            method: &self.method,
            uri: &self.uri,
            headers: &self.headers,
        };
        encode_frame(&head, &self.body)
    }
}

impl GuestResponse {
    /// Decode a frame produced by the guest.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidGuestResponse`] for a malformed frame.
    pub fn from_frame(frame: &[u8]) -> Result<Self, RuntimeError> {
        let (head, body): (ResponseHead, &[u8]) = decode_frame(frame)?;
        Ok(Self {
            status: head.status,
            headers: head.headers,
            body: body.to_vec(),
        })
    }

    /// Encode into a guest frame. Used by test guests and tooling.
    ///
    /// # Errors
    ///
    /// Fails only if the head cannot be serialized.
    pub fn to_frame(&self) -> Result<Vec<u8>, RuntimeError> {
        let head = ResponseHead {
            status: self.status,
            headers: self.headers.clone(),
        };
        encode_frame(&head, &self.body)
    }
}

fn encode_frame<H: Serialize>(head: &H, body: &[u8]) -> Result<Vec<u8>, RuntimeError> {
    let head = serde_json::to_vec(head)
        .map_err(|e| RuntimeError::invalid_config(format!("Failed to encode frame head: {e}")))?;
    let head_len = u32::try_from(head.len())
        .map_err(|_| RuntimeError::invalid_config("Frame head exceeds 4 GiB"))?;

    let mut frame = Vec::with_capacity(LEN_PREFIX + head.len() + body.len());
    frame.extend_from_slice(&head_len.to_le_bytes());
    frame.extend_from_slice(&head);
    frame.extend_from_slice(body);
    Ok(frame)
}

fn decode_frame<H: DeserializeOwned>(frame: &[u8]) -> Result<(H, &[u8]), RuntimeError> {
    let Some((prefix, rest)) = frame.split_first_chunk::<LEN_PREFIX>() else {
        return Err(RuntimeError::invalid_guest_response(format!(
            "frame of {} bytes has no length prefix",
            frame.len()
        )));
    };

    let head_len = u32::from_le_bytes(*prefix) as usize;
    if head_len > rest.len() {
        return Err(RuntimeError::invalid_guest_response(format!(
            "head length {head_len} exceeds frame remainder {}",
            rest.len()
        )));
    }

    let (head, body) = rest.split_at(head_len);
    let head = serde_json::from_slice(head)
        .map_err(|e| RuntimeError::invalid_guest_response(format!("bad head: {e}")))?;
    Ok((head, body))
}
