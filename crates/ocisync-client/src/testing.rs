//! In-memory registry used by unit tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::descriptor::{Descriptor, RepositoryRef};
use crate::digest::Digest;
use crate::media_types::{OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE};
use crate::registry::Registry;
use crate::{Error, Result};

pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// Serves whatever bytes it holds without checking them, so that tests can
/// model a registry that returns corrupted or truncated content.
#[derive(Default)]
pub struct MemoryRegistry {
    tags: Vec<(String, Descriptor)>,
    blobs: HashMap<Digest, Vec<u8>>,
    overrides: HashMap<Digest, Vec<u8>>,
    hang: Option<Digest>,
    delay: Option<Duration>,
    fetches: Mutex<HashMap<Digest, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repo() -> RepositoryRef {
        RepositoryRef::new("registry.test", "abc/my-repo").unwrap()
    }

    pub fn blob(&mut self, media_type: &str, bytes: &[u8]) -> Descriptor {
        let d = Descriptor::for_bytes(media_type, bytes);
        self.blobs.insert(d.digest.clone(), bytes.to_vec());
        d
    }

    pub fn layer(&mut self, bytes: &[u8]) -> Descriptor {
        self.blob(LAYER_MEDIA_TYPE, bytes)
    }

    pub fn manifest(&mut self, config: Option<&Descriptor>, layers: &[Descriptor]) -> Descriptor {
        let mut doc = json!({
            "schemaVersion": 2,
            "mediaType": OCI_IMAGE_MANIFEST_MEDIA_TYPE,
            "layers": layers,
        });
        if let Some(config) = config {
            doc["config"] = json!(config);
        }
        let bytes = serde_json::to_vec(&doc).unwrap();
        self.blob(OCI_IMAGE_MANIFEST_MEDIA_TYPE, &bytes)
    }

    /// Artifact manifest whose `subject` is another manifest.
    pub fn referrer(&mut self, subject: &Descriptor, layers: &[Descriptor]) -> Descriptor {
        let bytes = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": OCI_IMAGE_MANIFEST_MEDIA_TYPE,
            "layers": layers,
            "subject": subject,
        }))
        .unwrap();
        self.blob(OCI_IMAGE_MANIFEST_MEDIA_TYPE, &bytes)
    }

    pub fn index(&mut self, manifests: &[Descriptor]) -> Descriptor {
        let bytes = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": OCI_IMAGE_INDEX_MEDIA_TYPE,
            "manifests": manifests,
        }))
        .unwrap();
        self.blob(OCI_IMAGE_INDEX_MEDIA_TYPE, &bytes)
    }

    pub fn tag(&mut self, tag: &str, descriptor: &Descriptor) {
        self.tags.push((tag.to_string(), descriptor.clone()));
    }

    /// Serve `bytes` instead of the real content of `digest`.
    pub fn serve_instead(&mut self, digest: &Digest, bytes: &[u8]) {
        self.overrides.insert(digest.clone(), bytes.to_vec());
    }

    /// Never finish fetching `digest`.
    pub fn hang_on(&mut self, digest: &Digest) {
        self.hang = Some(digest.clone());
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetch_count(&self, digest: &Digest) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(digest)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn list_tags(&self, repo: &RepositoryRef) -> Result<Vec<String>> {
        if *repo != Self::repo() {
            return Err(Error::NotFound(format!("repository {repo}")));
        }
        Ok(self.tags.iter().map(|(t, _)| t.clone()).collect())
    }

    async fn resolve_tag(&self, repo: &RepositoryRef, tag: &str) -> Result<Descriptor> {
        self.tags
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| Error::NotFound(repo.with_tag(tag)))
    }

    async fn fetch_content(
        &self,
        _repo: &RepositoryRef,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(descriptor.digest.clone())
            .or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.hang.as_ref() == Some(&descriptor.digest) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let digest = &descriptor.digest;
        self.overrides
            .get(digest)
            .or_else(|| self.blobs.get(digest))
            .cloned()
            .ok_or_else(|| Error::NotFound(digest.to_string()))
    }
}
