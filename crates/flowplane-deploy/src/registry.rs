//! Container registry checks.
//!
//! The registry is passive: the pipeline only consults it to confirm that
//! a built tag exists and carries the platforms the deploy target needs.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{EngineError, Result};

/// Platform the serverless target requires.
pub const AMD64: &str = "linux/amd64";

/// What the registry reports for a tag.
#[derive(Debug, Clone)]
pub struct ImageManifest {
    /// Platforms present in the manifest (e.g. `linux/amd64`).
    pub platforms: Vec<String>,
}

impl ImageManifest {
    /// Whether the manifest covers the given platform.
    #[must_use]
    pub fn supports(&self, platform: &str) -> bool {
        self.platforms.iter().any(|p| p == platform)
    }
}

/// A container registry consulted via tag-existence checks.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Fetch the manifest for an image reference, or `None` when the tag
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns a transient or hard [`EngineError`] per the retry policy.
    async fn manifest(&self, image: &str) -> Result<Option<ImageManifest>>;
}

/// Registry v2 HTTP implementation.
pub struct HttpImageRegistry {
    http: reqwest::Client,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ManifestList {
    #[serde(default)]
    manifests: Vec<ManifestEntry>,
}

#[derive(Deserialize)]
struct ManifestEntry {
    #[serde(default)]
    platform: Option<ManifestPlatform>,
}

#[derive(Deserialize)]
struct ManifestPlatform {
    os: String,
    architecture: String,
}

impl HttpImageRegistry {
    /// Create a registry client; `token` is sent as a bearer when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| EngineError::Invalid(format!("http client: {e}")))?;
        Ok(Self { http, token })
    }

    /// Split `host/repo:tag` into manifest-URL components.
    fn manifest_url(image: &str) -> Result<String> {
        let (host, rest) = image
            .split_once('/')
            .ok_or_else(|| EngineError::Invalid(format!("unparseable image reference: {image}")))?;
        let (repo, tag) = rest.rsplit_once(':').unwrap_or((rest, "latest"));
        Ok(format!("https://{host}/v2/{repo}/manifests/{tag}"))
    }
}

#[async_trait]
impl ImageRegistry for HttpImageRegistry {
    async fn manifest(&self, image: &str) -> Result<Option<ImageManifest>> {
        let url = Self::manifest_url(image)?;

        let mut request = self.http.get(&url).header(
            "Accept",
            "application/vnd.docker.distribution.manifest.list.v2+json, \
             application/vnd.oci.image.index.v1+json",
        );
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::from_transport(&e, "registry"))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if status >= 300 {
            return Err(EngineError::from_status(status, "registry"));
        }

        let list: ManifestList = response
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("registry manifest: {e}")))?;

        let platforms = list
            .manifests
            .into_iter()
            .filter_map(|entry| entry.platform)
            .map(|p| format!("{}/{}", p.os, p.architecture))
            .collect::<Vec<_>>();

        // A single-arch manifest has no sub-manifest list; treat it as
        // amd64-only, which is what single-arch builders produce here.
        let platforms = if platforms.is_empty() {
            vec![AMD64.to_string()]
        } else {
            platforms
        };

        Ok(Some(ImageManifest { platforms }))
    }
}

/// An in-memory registry for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockImageRegistry {
    /// Platforms reported for every known tag.
    pub platforms: parking_lot::Mutex<Vec<String>>,
    /// When `true`, every tag is reported missing.
    pub missing: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MockImageRegistry {
    fn default() -> Self {
        Self {
            platforms: parking_lot::Mutex::new(vec![AMD64.to_string()]),
            missing: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl MockImageRegistry {
    /// A registry where every tag exists as `linux/amd64`.
    #[must_use]
    pub fn amd64() -> Self {
        Self::default()
    }

    /// A registry reporting only the given platforms.
    #[must_use]
    pub fn with_platforms(platforms: &[&str]) -> Self {
        let mock = Self::default();
        *mock.platforms.lock() = platforms.iter().map(ToString::to_string).collect();
        mock
    }

    /// A registry where no tag exists.
    #[must_use]
    pub fn empty() -> Self {
        let mock = Self::default();
        mock.missing
            .store(true, std::sync::atomic::Ordering::SeqCst);
        mock
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl ImageRegistry for MockImageRegistry {
    async fn manifest(&self, _image: &str) -> Result<Option<ImageManifest>> {
        if self.missing.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(ImageManifest {
            platforms: self.platforms.lock().clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_url_parsing() {
        let url = HttpImageRegistry::manifest_url("registry.example.com/agent-runtime-x:latest")
            .unwrap();
        assert_eq!(
            url,
            "https://registry.example.com/v2/agent-runtime-x/manifests/latest"
        );

        assert!(HttpImageRegistry::manifest_url("no-slashes").is_err());
    }

    #[test]
    fn supports_checks_platforms() {
        let manifest = ImageManifest {
            platforms: vec!["linux/arm64".into(), AMD64.into()],
        };
        assert!(manifest.supports(AMD64));
        assert!(!manifest.supports("windows/amd64"));
    }
}
