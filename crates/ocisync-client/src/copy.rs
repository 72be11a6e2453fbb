//! Copy the content graph behind a tag into a [`BlobStore`].
//!
//! The walk is iterative: a queue of pending descriptors seeded with the
//! resolved root, and a visited-set keyed by digest so shared blobs are
//! handled once per run. Descriptors are processed by at most
//! [`CopyOptions::max_concurrency`] tasks; a manifest's children are only
//! queued once its own bytes are available (fetched or already local).

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::descriptor::{Content, Descriptor, RepositoryRef, validate_tag};
use crate::digest::Digest;
use crate::registry::Registry;
use crate::store::BlobStore;
use crate::{CopyError, Error, Result};

/// Default bound on concurrent fetches.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct CopyOptions {
    /// Maximum number of descriptors fetched at the same time (at least 1).
    pub max_concurrency: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Outcome of a successful copy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyReport {
    /// Descriptor the tag resolved to.
    pub root: Descriptor,
    /// Distinct descriptors in the graph.
    pub descriptors_total: usize,
    /// Descriptors already present in the store.
    pub descriptors_skipped: usize,
    /// Descriptors fetched from the registry during this run.
    pub descriptors_fetched: usize,
    /// Bytes fetched from the registry during this run.
    pub bytes_fetched: u64,
}

/// What processing one descriptor produced.
struct Visit {
    fetched: bool,
    size: u64,
    children: Vec<Descriptor>,
}

pub struct Copier {
    registry: Arc<dyn Registry>,
    store: BlobStore,
    options: CopyOptions,
}

impl Copier {
    pub fn new(registry: Arc<dyn Registry>, store: BlobStore) -> Self {
        Self {
            registry,
            store,
            options: CopyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    /// Synchronize everything `repo:tag` references into the store.
    ///
    /// Any failure aborts the run. Blobs committed before the failure stay
    /// in the store; staged writes of in-flight tasks are discarded. The
    /// same applies when `cancel` fires.
    pub async fn copy(
        &self,
        repo: &RepositoryRef,
        tag: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<CopyReport, CopyError> {
        let reference = repo.with_tag(tag);
        let fail = |digest: Option<&Digest>, source: Error| CopyError {
            reference: reference.clone(),
            digest: digest.map(Digest::to_string),
            source,
        };

        validate_tag(tag).map_err(|e| fail(None, e))?;
        info!(%reference, "copying");

        let root = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(fail(None, Error::Cancelled)),
            root = self.registry.resolve_tag(repo, tag) => root.map_err(|e| fail(None, e))?,
        };
        debug!(%reference, digest = %root.digest, media_type = %root.media_type, "resolved root");

        let max_concurrency = self.options.max_concurrency.max(1);
        let mut report = CopyReport {
            root: root.clone(),
            descriptors_total: 0,
            descriptors_skipped: 0,
            descriptors_fetched: 0,
            bytes_fetched: 0,
        };
        let mut queue = VecDeque::from([root]);
        let mut visited: HashSet<Digest> = HashSet::new();
        let mut tasks: JoinSet<std::result::Result<Visit, (Digest, Error)>> = JoinSet::new();

        loop {
            while tasks.len() < max_concurrency
                && let Some(descriptor) = queue.pop_front()
            {
                if !visited.insert(descriptor.digest.clone()) {
                    trace!(digest = %descriptor.digest, "already visited");
                    continue;
                }
                report.descriptors_total += 1;

                let registry = Arc::clone(&self.registry);
                let store = self.store.clone();
                let repo = repo.clone();
                tasks.spawn(async move {
                    let digest = descriptor.digest.clone();
                    visit(registry.as_ref(), &store, &repo, descriptor)
                        .await
                        .map_err(|e| (digest, e))
                });
            }

            if tasks.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                abandon(&mut tasks).await;
                info!(%reference, "copy cancelled");
                return Err(fail(None, Error::Cancelled));
            };

            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => {
                    abandon(&mut tasks).await;
                    return Err(fail(None, Error::Cancelled));
                }
            };
            match outcome {
                Ok(visit) => {
                    if visit.fetched {
                        report.descriptors_fetched += 1;
                        report.bytes_fetched += visit.size;
                    } else {
                        report.descriptors_skipped += 1;
                    }
                    queue.extend(visit.children);
                }
                Err((digest, source)) => {
                    abandon(&mut tasks).await;
                    return Err(fail(Some(&digest), source));
                }
            }
        }

        info!(
            %reference,
            total = report.descriptors_total,
            fetched = report.descriptors_fetched,
            skipped = report.descriptors_skipped,
            bytes = report.bytes_fetched,
            "copy complete"
        );
        Ok(report)
    }
}

/// Process one descriptor: skip or fetch+commit, then discover children.
async fn visit(
    registry: &dyn Registry,
    store: &BlobStore,
    repo: &RepositoryRef,
    descriptor: Descriptor,
) -> Result<Visit> {
    let digest = &descriptor.digest;
    let has_children = descriptor.kind().has_children();

    if store.exists(digest).await? {
        debug!(%digest, "present in store, skipping fetch");
        let children = if has_children {
            let bytes = store.read(digest).await?;
            descriptor.verify(&bytes)?;
            children_of(&descriptor, &bytes)?
        } else {
            Vec::new()
        };
        return Ok(Visit {
            fetched: false,
            size: 0,
            children,
        });
    }

    debug!(%digest, size = descriptor.size, media_type = %descriptor.media_type, "fetching");
    let bytes = registry.fetch_content(repo, &descriptor).await?;
    let children = children_of(&descriptor, &bytes)?;

    let mut writer = store.begin_write(digest, descriptor.size).await?;
    writer.write(&bytes).await?;
    writer.commit().await?;

    Ok(Visit {
        fetched: true,
        size: bytes.len() as u64,
        children,
    })
}

fn children_of(descriptor: &Descriptor, bytes: &[u8]) -> Result<Vec<Descriptor>> {
    Ok(Content::parse(descriptor, bytes)?
        .map(|content| content.children())
        .unwrap_or_default())
}

/// Abort in-flight tasks and wait until they are gone, so their staged
/// writes have been dropped by the time the copy returns.
async fn abandon<T: 'static>(tasks: &mut JoinSet<T>) {
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
}
