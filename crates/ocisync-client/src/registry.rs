//! Registry capability used by the copier, and its HTTP implementation.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, LINK};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};
use url::Url;

use crate::credential::{Credential, CredentialProvider};
use crate::descriptor::{Descriptor, RepositoryRef, validate_tag};
use crate::digest::{Digest, Hasher};
use crate::endpoint::RegistryEndpoint;
use crate::media_types::{ACCEPT_MANIFEST, MediaKind, OCI_IMAGE_MANIFEST_MEDIA_TYPE};
use crate::{Error, Result};

const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

/// Authenticated access to one registry.
#[async_trait]
pub trait Registry: Send + Sync {
    /// All tags of `repo`, in the order the server returns them.
    async fn list_tags(&self, repo: &RepositoryRef) -> Result<Vec<String>>;

    /// Resolve `tag` to the descriptor of the manifest it points at.
    async fn resolve_tag(&self, repo: &RepositoryRef, tag: &str) -> Result<Descriptor>;

    /// Fetch the bytes of `descriptor`.
    ///
    /// Implementations must only return bytes whose size and digest match
    /// the descriptor, and fail with [`Error::DigestMismatch`] otherwise.
    async fn fetch_content(&self, repo: &RepositoryRef, descriptor: &Descriptor)
    -> Result<Vec<u8>>;

    /// Resolve `tag` and fetch the manifest it points at.
    async fn fetch_manifest(
        &self,
        repo: &RepositoryRef,
        tag: &str,
    ) -> Result<(Descriptor, Vec<u8>)> {
        let descriptor = self.resolve_tag(repo, tag).await?;
        let bytes = self.fetch_content(repo, &descriptor).await?;
        Ok((descriptor, bytes))
    }
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// [`Registry`] over the OCI distribution HTTP API.
pub struct HttpRegistry {
    endpoint: RegistryEndpoint,
    credentials: Arc<dyn CredentialProvider>,
    credential: Mutex<Option<Arc<Credential>>>,
    http: reqwest::Client,
    page_size: Option<u32>,
}

impl HttpRegistry {
    pub fn new(endpoint: RegistryEndpoint, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ocisync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::network(endpoint.base_url.as_str(), e))?;

        Ok(Self {
            endpoint,
            credentials,
            credential: Mutex::new(None),
            http,
            page_size: None,
        })
    }

    /// Ask the server for at most `n` tags per page.
    pub fn with_page_size(mut self, n: u32) -> Self {
        self.page_size = Some(n.max(1));
        self
    }

    pub fn endpoint(&self) -> &RegistryEndpoint {
        &self.endpoint
    }

    fn check_repo(&self, repo: &RepositoryRef) -> Result<()> {
        if repo.host() != self.endpoint.registry {
            return Err(Error::invalid_reference(
                repo.to_string(),
                format!("repository is not on registry {}", self.endpoint.registry),
            ));
        }
        Ok(())
    }

    /// Current credential; `refresh` re-resolves it from the provider.
    fn credential(&self, refresh: bool) -> Result<Arc<Credential>> {
        let mut cached = self.credential.lock().unwrap_or_else(|e| e.into_inner());
        if !refresh && let Some(credential) = cached.as_ref() {
            return Ok(Arc::clone(credential));
        }
        let credential = Arc::new(self.credentials.resolve(&self.endpoint.registry)?);
        *cached = Some(Arc::clone(&credential));
        Ok(credential)
    }

    /// Send an authenticated request, re-authenticating once on 401.
    async fn send(
        &self,
        url: &str,
        build: impl Fn(&reqwest::Client) -> RequestBuilder,
    ) -> Result<Response> {
        let credential = self.credential(false)?;
        let resp = self
            .execute(url, credential.authorize(build(&self.http)))
            .await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        debug!(%url, "registry returned 401, re-authenticating once");
        let credential = self.credential(true)?;
        self.execute(url, credential.authorize(build(&self.http)))
            .await
    }

    async fn execute(&self, url: &str, req: RequestBuilder) -> Result<Response> {
        trace!(%url, "registry request");
        req.send().await.map_err(|e| Error::network(url, e))
    }

    /// Map non-success statuses onto the error taxonomy.
    async fn check(
        &self,
        resp: Response,
        url: &str,
        what: impl FnOnce() -> String,
    ) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Auth {
                host: self.endpoint.registry.clone(),
                status: status.as_u16(),
            }),
            StatusCode::NOT_FOUND => Err(Error::NotFound(what())),
            _ => {
                let body = resp.text().await.unwrap_or_default();
                Err(Error::network(
                    url,
                    format!("registry returned HTTP {}: {}", status.as_u16(), body.trim()),
                ))
            }
        }
    }

    fn manifest_url(&self, repo: &RepositoryRef, reference: &str) -> String {
        self.endpoint
            .url(&format!("/v2/{}/manifests/{reference}", repo.path()))
    }

    fn blob_url(&self, repo: &RepositoryRef, digest: &Digest) -> String {
        self.endpoint.url(&format!("/v2/{}/blobs/{digest}", repo.path()))
    }

    /// Full `GET` of a manifest by tag, used when `HEAD` lacks the digest header.
    async fn resolve_by_get(
        &self,
        repo: &RepositoryRef,
        tag: &str,
        url: &str,
    ) -> Result<Descriptor> {
        let accept = ACCEPT_MANIFEST.join(", ");
        let resp = self
            .send(url, |http| http.get(url).header(ACCEPT, accept.as_str()))
            .await?;
        let resp = self.check(resp, url, || repo.with_tag(tag)).await?;

        let header_media_type = media_type_header(resp.headers());
        let header_digest = digest_header(resp.headers());
        let body = resp.bytes().await.map_err(|e| Error::network(url, e))?;

        let digest = match header_digest {
            Some(expected) => {
                expected.verify(&body)?;
                expected
            }
            None => Digest::sha256(&body),
        };

        // Some registries answer with a generic content type; the body knows better.
        let media_type = header_media_type
            .filter(|m| MediaKind::of(m).has_children())
            .or_else(|| {
                serde_json::from_slice::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.get("mediaType")?.as_str().map(str::to_string))
            })
            .unwrap_or_else(|| OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string());

        Ok(Descriptor::new(media_type, digest, body.len() as u64))
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn list_tags(&self, repo: &RepositoryRef) -> Result<Vec<String>> {
        self.check_repo(repo)?;

        let first = self.endpoint.url(&format!("/v2/{}/tags/list", repo.path()));
        let mut first = Url::parse(&first).map_err(|e| Error::network(&first, e))?;
        if let Some(n) = self.page_size {
            first.query_pairs_mut().append_pair("n", &n.to_string());
        }

        let mut tags = Vec::new();
        let mut requested = HashSet::new();
        let mut next = Some(first);
        while let Some(url) = next.take() {
            if !requested.insert(url.clone()) {
                return Err(Error::network(url.as_str(), "pagination cycle in Link headers"));
            }
            let url_str = url.as_str();
            let resp = self.send(url_str, |http| http.get(url.clone())).await?;
            let resp = self
                .check(resp, url_str, || format!("repository {repo}"))
                .await?;

            next = next_link(resp.headers())
                .map(|target| self.endpoint.join(&target))
                .transpose()?;

            let page: TagList = resp
                .json()
                .await
                .map_err(|e| Error::network(url_str, format!("invalid tag list: {e}")))?;
            tags.extend(page.tags.unwrap_or_default());
        }

        debug!(%repo, count = tags.len(), "listed tags");
        Ok(tags)
    }

    async fn resolve_tag(&self, repo: &RepositoryRef, tag: &str) -> Result<Descriptor> {
        self.check_repo(repo)?;
        validate_tag(tag)?;

        let url = self.manifest_url(repo, tag);
        let accept = ACCEPT_MANIFEST.join(", ");
        let resp = self
            .send(&url, |http| http.head(&url).header(ACCEPT, accept.as_str()))
            .await?;
        let resp = self.check(resp, &url, || repo.with_tag(tag)).await?;

        let headers = resp.headers();
        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&n| n > 0);
        let media_type = media_type_header(headers).filter(|m| MediaKind::of(m).has_children());
        let descriptor = match (media_type, digest_header(headers), size) {
            (Some(media_type), Some(digest), Some(size)) => {
                Descriptor::new(media_type, digest, size)
            }
            _ => {
                debug!(%url, "HEAD response incomplete, resolving with GET");
                self.resolve_by_get(repo, tag, &url).await?
            }
        };

        debug!(
            reference = %repo.with_tag(tag),
            digest = %descriptor.digest,
            media_type = %descriptor.media_type,
            "resolved tag"
        );
        Ok(descriptor)
    }

    async fn fetch_content(
        &self,
        repo: &RepositoryRef,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>> {
        self.check_repo(repo)?;

        let kind = descriptor.kind();
        let url = if kind.has_children() {
            self.manifest_url(repo, &descriptor.digest.to_string())
        } else {
            self.blob_url(repo, &descriptor.digest)
        };

        let resp = if kind.has_children() {
            let accept = ACCEPT_MANIFEST.join(", ");
            self.send(&url, |http| http.get(&url).header(ACCEPT, accept.as_str()))
                .await?
        } else {
            self.send(&url, |http| http.get(&url)).await?
        };
        let mut resp = self
            .check(resp, &url, || format!("{} in {repo}", descriptor.digest))
            .await?;

        let expected = descriptor.size;
        let mut hasher = Hasher::new(descriptor.digest.algorithm());
        let mut out = Vec::with_capacity(usize::try_from(expected).unwrap_or(0).min(1 << 26));
        while let Some(chunk) = resp.chunk().await.map_err(|e| Error::network(&url, e))? {
            if (out.len() + chunk.len()) as u64 > expected {
                return Err(Error::digest_mismatch(
                    descriptor.digest.to_string(),
                    format!("more than {expected} bytes"),
                ));
            }
            hasher.update(&chunk);
            out.extend_from_slice(&chunk);
        }

        if out.len() as u64 != expected {
            return Err(Error::digest_mismatch(
                descriptor.digest.to_string(),
                format!("{} bytes (expected {expected})", out.len()),
            ));
        }
        let actual = hasher.finish();
        if actual != descriptor.digest {
            return Err(Error::digest_mismatch(
                descriptor.digest.to_string(),
                actual.to_string(),
            ));
        }

        trace!(digest = %descriptor.digest, size = expected, "fetched and verified");
        Ok(out)
    }
}

fn media_type_header(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let essence = value.split(';').next()?.trim();
    (!essence.is_empty()).then(|| essence.to_string())
}

fn digest_header(headers: &HeaderMap) -> Option<Digest> {
    headers
        .get(DOCKER_CONTENT_DIGEST)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Target of an RFC 5988 `Link: <...>; rel="next"` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|link| {
            let (target, params) = link.trim().split_once(';')?;
            let is_next = params.split(';').any(|p| {
                let p = p.trim().replace(' ', "");
                p == "rel=\"next\"" || p == "rel=next"
            });
            let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
            is_next.then(|| target.to_string())
        })
}
