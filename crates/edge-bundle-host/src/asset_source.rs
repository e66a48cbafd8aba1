//! Asset sources.
//!
//! - [`DirAssetSource`]: files under a local directory
//! - [`HttpAssetSource`]: objects under an HTTP base URL
//!
//! Both stream bodies chunk by chunk. A missing asset is `Ok(None)`, never
//! an error.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{Client, Response, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};
use url::Url;

use edge_bundle_common::{AssetError, AssetSourceKind, AssetsConfig};
use edge_bundle_core::{Asset, AssetBody, AssetSource};

const CHUNK_SIZE: usize = 64 * 1024;

/// Build the source described by the `[assets]` config section.
///
/// # Errors
///
/// Returns [`AssetError::InvalidBase`] if an HTTP base is not a valid URL.
pub fn from_config(config: &AssetsConfig) -> Result<Box<dyn AssetSource>, AssetError> {
    Ok(match config.source {
        AssetSourceKind::Dir => Box::new(DirAssetSource::new(&config.base)),
        AssetSourceKind::Http => Box::new(HttpAssetSource::new(&config.base)?),
    })
}

/// Serves files below a root directory.
#[derive(Debug, Clone)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    /// Create a source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a logical path onto the root. `None` for anything that would
    /// leave it.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        (resolved != self.root).then_some(resolved)
    }
}

#[async_trait]
impl AssetSource for DirAssetSource {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn fetch(&self, path: &str) -> Result<Option<Asset>, AssetError> {
        let Some(resolved) = self.resolve(path) else {
            debug!("Rejected asset path");
            return Ok(None);
        };

        let file = match File::open(&resolved).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AssetError::io(path, e)),
        };
        let metadata = file.metadata().await.map_err(|e| AssetError::io(path, e))?;
        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Asset {
            content_type: guess_content_type(path).map(str::to_string),
            content_length: Some(metadata.len()),
            body: Box::new(FileBody {
                file,
                path: path.to_string(),
            }),
        }))
    }

    fn describe(&self) -> String {
        format!("dir:{}", self.root.display())
    }
}

struct FileBody {
    file: File,
    path: String,
}

#[async_trait]
impl AssetBody for FileBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, AssetError> {
        let mut buffer = BytesMut::with_capacity(CHUNK_SIZE);
        let read = self
            .file
            .read_buf(&mut buffer)
            .await
            .map_err(|e| AssetError::io(self.path.as_str(), e))?;
        Ok((read > 0).then(|| buffer.freeze()))
    }
}

/// Fetches objects relative to a base URL.
#[derive(Debug, Clone)]
pub struct HttpAssetSource {
    client: Client,
    base: Url,
}

impl HttpAssetSource {
    /// Create a source for `base`. A trailing `/` is added if missing so
    /// that relative joins stay below it.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::InvalidBase`] if `base` is not an absolute
    /// http(s) URL or the client cannot be built.
    pub fn new(base: &str) -> Result<Self, AssetError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("edge-bundle/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AssetError::InvalidBase {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Self::with_client(client, base)
    }

    /// Create with a custom HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::InvalidBase`] if `base` is not an absolute
    /// http(s) URL.
    pub fn with_client(client: Client, base: &str) -> Result<Self, AssetError> {
        let mut base = Url::parse(base).map_err(|e| AssetError::InvalidBase {
            reason: format!("{base}: {e}"),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(AssetError::InvalidBase {
                reason: format!("unsupported scheme '{}'", base.scheme()),
            });
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { client, base })
    }

    fn url_for(&self, path: &str) -> Result<Url, AssetError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| AssetError::InvalidBase {
                reason: format!("cannot join '{path}': {e}"),
            })
    }
}

#[async_trait]
impl AssetSource for HttpAssetSource {
    #[instrument(skip(self), fields(base = %self.base))]
    async fn fetch(&self, path: &str) -> Result<Option<Asset>, AssetError> {
        let url = self.url_for(path)?;
        if !url.as_str().starts_with(self.base.as_str()) {
            debug!(url = %url, "Rejected asset path");
            return Ok(None);
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AssetError::request(url.as_str(), e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AssetError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| guess_content_type(path).map(str::to_string));

        debug!(url = %url, status = status.as_u16(), "Asset response");

        Ok(Some(Asset {
            content_type,
            content_length: response.content_length(),
            body: Box::new(ResponseBody {
                response,
                url: url.to_string(),
            }),
        }))
    }

    fn describe(&self) -> String {
        format!("http:{}", self.base)
    }
}

struct ResponseBody {
    response: Response,
    url: String,
}

#[async_trait]
impl AssetBody for ResponseBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, AssetError> {
        self.response
            .chunk()
            .await
            .map_err(|e| AssetError::request(self.url.as_str(), e))
    }
}

/// MIME type from a path's extension.
pub fn guess_content_type(path: &str) -> Option<&'static str> {
    let (_, ext) = path.rsplit_once('.')?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "map" | "json" => "application/json",
        "html" | "htm" => "text/html; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "wasm" => "application/wasm",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("build/assets")).unwrap();
        std::fs::write(dir.path().join("build/assets/app.css"), "body{}").unwrap();
        std::fs::write(dir.path().join("favicon.ico"), [0u8, 0, 1, 0]).unwrap();
        dir
    }

    #[test]
    fn test_dir_fetch_hit() {
        let dir = site();
        let source = DirAssetSource::new(dir.path());

        let asset = tokio_test::block_on(source.fetch("/build/assets/app.css"))
            .unwrap()
            .unwrap();
        assert_eq!(asset.content_type.as_deref(), Some("text/css; charset=utf-8"));
        assert_eq!(asset.content_length, Some(6));
        assert_eq!(tokio_test::block_on(asset.collect()).unwrap(), "body{}");
    }

    #[test]
    fn test_dir_fetch_miss() {
        let dir = site();
        let source = DirAssetSource::new(dir.path());

        assert!(tokio_test::block_on(source.fetch("/nope.css")).unwrap().is_none());
        assert!(tokio_test::block_on(source.fetch("/build")).unwrap().is_none());
        assert!(tokio_test::block_on(source.fetch("/")).unwrap().is_none());
    }

    #[test]
    fn test_dir_rejects_traversal() {
        let dir = site();
        let source = DirAssetSource::new(dir.path().join("build"));

        assert!(source.resolve("/../favicon.ico").is_none());
        assert!(source.resolve("assets/../../favicon.ico").is_none());
        assert!(
            tokio_test::block_on(source.fetch("/../favicon.ico"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_http_base_normalized() {
        let source = HttpAssetSource::new("https://cdn.example.com/releases/v3").unwrap();
        assert_eq!(
            source.url_for("/app.tar.gz").unwrap().as_str(),
            "https://cdn.example.com/releases/v3/app.tar.gz"
        );
        assert_eq!(source.describe(), "http:https://cdn.example.com/releases/v3/");
    }

    #[test]
    fn test_http_invalid_base() {
        assert!(matches!(
            HttpAssetSource::new("not a url"),
            Err(AssetError::InvalidBase { .. })
        ));
        assert!(matches!(
            HttpAssetSource::new("ftp://example.com/"),
            Err(AssetError::InvalidBase { .. })
        ));
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("/a/b.JS"), Some("text/javascript; charset=utf-8"));
        assert_eq!(guess_content_type("font.woff2"), Some("font/woff2"));
        assert_eq!(guess_content_type("/index.php"), None);
        assert_eq!(guess_content_type("/README"), None);
    }
}
