//! HTTP request conversion for the guest.

use axum::http::request::Parts;
use bytes::Bytes;

use edge_bundle_core::GuestRequest;

/// Upper bound on a buffered request body.
pub const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// Build a [`GuestRequest`] from request parts and the buffered body.
///
/// Header values that are not visible ASCII are dropped.
pub fn to_guest_request(parts: &Parts, body: Bytes) -> GuestRequest {
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();

    let uri = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);

    GuestRequest {
        method: parts.method.to_string(),
        uri,
        headers,
        body: body.to_vec(),
    }
}
