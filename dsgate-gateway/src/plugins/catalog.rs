//! # Plugin Catalog Module
//!
//! The in-memory union of all enabled repositories' manifests.
//!
//! ## Refresh Semantics
//!
//! On startup and then on a fixed interval (one hour by default) the
//! refresher iterates the enabled repositories, fetches each manifest via
//! the matching downloader, decodes it, and merges every plugin descriptor
//! into the catalog keyed by plugin id. A fetch or decode failure is
//! logged per repository and does not abort the pass; the failing
//! repository's previous entries stay in the catalog until a later pass
//! replaces them.
//!
//! Writers replace whole plugin entries atomically: a descriptor is merged
//! as one unit, never field by field, so readers observe either the old
//! descriptor or the new one.

use crate::config::RepositoryConfig;
use crate::plugins::downloader::DownloaderSet;
use dsgate_backend_sdk::models::{PluginDescriptor, RepositoryManifest};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// The in-memory plugin catalog and its refresher.
pub struct PluginCatalog {
    repositories: Vec<RepositoryConfig>,
    downloaders: Arc<DownloaderSet>,
    plugins: RwLock<HashMap<String, PluginDescriptor>>,
}

impl PluginCatalog {
    pub fn new(repositories: Vec<RepositoryConfig>, downloaders: Arc<DownloaderSet>) -> Self {
        Self {
            repositories,
            downloaders,
            plugins: RwLock::new(HashMap::new()),
        }
    }

    /// Run one refresh pass over every enabled repository.
    ///
    /// Returns how many repositories merged successfully.
    pub async fn refresh(&self) -> usize {
        let mut merged = 0usize;
        for repo in self.repositories.iter().filter(|r| r.enabled) {
            match self.fetch_manifest(repo).await {
                Ok(manifest) => {
                    let count = manifest.plugins.len();
                    let mut plugins = self.plugins.write().await;
                    for descriptor in manifest.plugins {
                        plugins.insert(descriptor.id.clone(), descriptor);
                    }
                    tracing::info!(
                        repository = %repo.name,
                        plugins = count,
                        "Repository manifest merged"
                    );
                    merged += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        repository = %repo.name,
                        url = %repo.url,
                        error = %e,
                        "Repository refresh failed, keeping previous entries"
                    );
                }
            }
        }
        merged
    }

    async fn fetch_manifest(
        &self,
        repo: &RepositoryConfig,
    ) -> Result<RepositoryManifest, crate::gateway_error::GatewayError> {
        let body = self.downloaders.fetch_all(&repo.url).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Spawn the hourly refresh loop. The first pass runs immediately.
    pub fn start_refresh_task(self: &Arc<Self>, interval: Duration) {
        let catalog = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let merged = catalog.refresh().await;
                tracing::debug!(repositories = merged, "Catalog refresh pass complete");
            }
        });
    }

    /// One plugin descriptor by id.
    pub async fn get(&self, plugin_id: &str) -> Option<PluginDescriptor> {
        self.plugins.read().await.get(plugin_id).cloned()
    }

    /// Snapshot of every descriptor, sorted by plugin id.
    pub async fn snapshot(&self) -> Vec<PluginDescriptor> {
        let plugins = self.plugins.read().await;
        let mut all: Vec<PluginDescriptor> = plugins.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Number of cataloged plugins.
    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    /// Whether the catalog holds no plugins.
    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }
}
