//! Download cache provider
//!
//! Keeps one copy of a URL's content per target under a fixed cache root.

use async_trait::async_trait;
use kiln_exec::Connection;
use kiln_exec::shell::{quote, quote_path};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::error::RequireError;
use crate::traits::Provider;

/// Cache root on the target, relative to the login user's home
pub const DEFAULT_CACHE_ROOT: &str = "~/.cache/kiln/downloads";

/// Ensures the content of `url` exists at a deterministic cache path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadCache {
    url: String,
    cache_root: String,
}

impl DownloadCache {
    /// Cache `url` under the default cache root
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cache_root: DEFAULT_CACHE_ROOT.to_string(),
        }
    }

    /// Use a different cache root
    #[must_use]
    pub fn with_cache_root(mut self, root: impl Into<String>) -> Self {
        let root = root.into();
        self.cache_root = root.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn cache_root(&self) -> &str {
        &self.cache_root
    }

    /// Last segment of the URL path
    #[must_use]
    pub fn basename(&self) -> String {
        let path = match url::Url::parse(&self.url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => self.url.clone(),
        };
        path.rsplit('/').next().unwrap_or_default().to_string()
    }

    /// Cache entry name: `<sha256 of url>_<basename>`
    #[must_use]
    pub fn entry_name(&self) -> String {
        let digest = Sha256::digest(self.url.as_bytes());
        let hash: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("{hash}_{}", self.basename())
    }

    /// Path of the cached file on the target
    #[must_use]
    pub fn download_location(&self) -> String {
        format!("{}/{}", self.cache_root, self.entry_name())
    }
}

#[async_trait]
impl Provider for DownloadCache {
    fn resource_key(&self) -> String {
        self.download_location()
    }

    async fn prepare(&self, conn: &dyn Connection) -> Result<(), RequireError> {
        conn.run(&format!("mkdir -p {}", quote_path(&self.cache_root))).await?;
        Ok(())
    }

    async fn is_satisfied(&self, conn: &dyn Connection) -> Result<bool, RequireError> {
        let location = self.download_location();
        debug!(location = %location, "checking cache entry");
        Ok(conn.test(&format!("test -r {}", quote_path(&location))).await?)
    }

    #[instrument(skip(self, conn), fields(url = %self.url))]
    async fn create(&self, conn: &dyn Connection) -> Result<(), RequireError> {
        let location = self.download_location();
        let (target, partial) = (
            quote_path(&location),
            quote_path(&format!("{location}.part")),
        );

        info!("downloading");
        // A failed fetch never leaves a readable cache entry behind
        conn.run(&format!(
            "curl -fsSL {} -o {partial} && mv {partial} {target}",
            quote(&self.url)
        ))
        .await?;
        info!(location = %location, "downloaded");
        Ok(())
    }

    async fn delete(&self, conn: &dyn Connection) -> Result<(), RequireError> {
        let location = self.download_location();
        debug!(location = %location, "removing cache entry");
        conn.run(&format!(
            "rm -f {} {}",
            quote_path(&location),
            quote_path(&format!("{location}.part"))
        ))
        .await?;
        Ok(())
    }
}
