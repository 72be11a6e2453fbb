use std::sync::Arc;
use tracing::debug;

use crate::Result;
use crate::descriptor::RepositoryRef;
use crate::registry::Registry;

/// Lists the tags of a repository, in the order the registry reports them.
#[derive(Clone)]
pub struct TagLister {
    registry: Arc<dyn Registry>,
}

impl TagLister {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    pub async fn list(&self, repo: &RepositoryRef) -> Result<Vec<String>> {
        let tags = self.registry.list_tags(repo).await?;
        debug!(%repo, count = tags.len(), "listed tags");
        Ok(tags)
    }
}
