//! Client for pulling OCI artifacts by tag into a local content-addressable
//! store.
//!
//! - [`HttpRegistry`] speaks the OCI Distribution API (`/v2`): tag listing,
//!   tag resolution and digest-verified content fetches, authenticated with
//!   a bearer token from a [`CredentialProvider`].
//! - [`BlobStore`] keeps blobs keyed by digest and only exposes content
//!   whose digest has been verified.
//! - [`Copier`] walks the graph behind a tag (index, manifests, config,
//!   layers) and fetches whatever the store is missing.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ocisync_client::{
//!     BlobStore, Copier, EnvCredentials, HttpRegistry, RegistryEndpoint, RepositoryRef,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> ocisync_client::Result<()> {
//! let endpoint = RegistryEndpoint::parse("ghcr.io")?;
//! let registry = HttpRegistry::new(endpoint, Arc::new(EnvCredentials::default()))?;
//! let store = BlobStore::open("./store").await?;
//!
//! let repo = RepositoryRef::parse("ghcr.io/abc/my-repo", None)?;
//! let report = Copier::new(Arc::new(registry), store)
//!     .copy(&repo, "v13", &CancellationToken::new())
//!     .await
//!     .map_err(|e| e.source)?;
//! println!("fetched {} of {}", report.descriptors_fetched, report.descriptors_total);
//! # Ok(()) }
//! ```

mod copy;
mod credential;
mod descriptor;
mod digest;
mod endpoint;
mod error;
mod media_types;
mod registry;
mod store;
mod tags;

#[cfg(test)]
mod testing;

pub use copy::{CopyOptions, CopyReport, Copier, DEFAULT_MAX_CONCURRENCY};
pub use credential::{
    Credential, CredentialProvider, DEFAULT_TOKEN_ENV, EnvCredentials, StaticCredentials,
};
pub use descriptor::{Content, Descriptor, ImageIndex, ImageManifest, RepositoryRef, validate_tag};
pub use digest::{Algorithm, Digest, Hasher};
pub use endpoint::RegistryEndpoint;
pub use error::{CopyError, Error, Result};
pub use media_types::*;
pub use registry::{HttpRegistry, Registry};
pub use store::{BlobStore, BlobWriter};
pub use tags::TagLister;
