//! Static asset source seam.
//!
//! The runtime fetches its bundle through an [`AssetSource`], and the
//! server uses the same trait to serve static files before falling back
//! to the guest. Bodies are pulled chunk by chunk so large archives never
//! need to be buffered twice.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use edge_bundle_common::AssetError;

/// A chunked asset body.
#[async_trait]
pub trait AssetBody: Send {
    /// Next chunk of the body, or `None` at the end.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, AssetError>;
}

/// A fetched asset.
pub struct Asset {
    /// MIME type, if known.
    pub content_type: Option<String>,
    /// Body length in bytes, if known up front.
    pub content_length: Option<u64>,
    /// The body stream.
    pub body: Box<dyn AssetBody>,
}

impl Asset {
    /// Wrap an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        let bytes = bytes.into();
        Self {
            content_type,
            content_length: Some(bytes.len() as u64),
            body: Box::new(BytesBody(Some(bytes))),
        }
    }

    /// Drain the body into one buffer.
    pub async fn collect(mut self) -> Result<Bytes, AssetError> {
        let mut buffer = BytesMut::with_capacity(
            self.content_length
                .and_then(|len| usize::try_from(len).ok())
                .unwrap_or(0),
        );
        while let Some(chunk) = self.body.next_chunk().await? {
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }
}

impl std::fmt::Debug for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Asset")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Single-chunk body over an in-memory buffer.
struct BytesBody(Option<Bytes>);

#[async_trait]
impl AssetBody for BytesBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, AssetError> {
        Ok(self.0.take().filter(|b| !b.is_empty()))
    }
}

/// Where static assets and the bundle archive come from.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Fetch an asset by its logical path. `Ok(None)` is a miss.
    async fn fetch(&self, path: &str) -> Result<Option<Asset>, AssetError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}
