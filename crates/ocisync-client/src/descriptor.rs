use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::digest::Digest;
use crate::media_types::MediaKind;
use crate::{Error, Result};

/// A unit of content in a registry, identified by its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            annotations: None,
        }
    }

    /// Descriptor for `bytes` as sha256 content.
    pub fn for_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(media_type, Digest::sha256(bytes), bytes.len() as u64)
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::of(&self.media_type)
    }

    /// Check size and digest of fetched bytes against this descriptor.
    pub fn verify(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 != self.size {
            return Err(Error::digest_mismatch(
                self.digest.to_string(),
                format!("{} bytes (expected {})", bytes.len(), self.size),
            ));
        }
        self.digest.verify(bytes)
    }
}

/// Image manifest: optional config plus ordered layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub config: Option<Descriptor>,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    /// Manifest this artifact refers to (signatures, SBOMs, attestations).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
}

/// Manifest-of-manifests used for multi-platform artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
}

/// Parsed manifest-like content, selected by the declared media type.
#[derive(Debug, Clone)]
pub enum Content {
    Manifest(ImageManifest),
    Index(ImageIndex),
}

impl Content {
    /// Parse the bytes of `descriptor`.
    ///
    /// Returns `Ok(None)` for plain blobs, which have no children.
    pub fn parse(descriptor: &Descriptor, bytes: &[u8]) -> Result<Option<Self>> {
        let parsed = match descriptor.kind() {
            MediaKind::Blob => return Ok(None),
            MediaKind::Manifest => serde_json::from_slice(bytes).map(Self::Manifest),
            MediaKind::Index => serde_json::from_slice(bytes).map(Self::Index),
        };
        parsed
            .map(Some)
            .map_err(|e| Error::format(descriptor.digest.to_string(), e))
    }

    /// Child descriptors: the subject first, then config and layers for a
    /// manifest or child manifests for an index.
    pub fn children(&self) -> Vec<Descriptor> {
        match self {
            Self::Manifest(m) => m
                .subject
                .iter()
                .chain(m.config.iter())
                .chain(m.layers.iter())
                .cloned()
                .collect(),
            Self::Index(i) => i.subject.iter().chain(i.manifests.iter()).cloned().collect(),
        }
    }
}

/// A remote repository: registry host plus repository path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryRef {
    host: String,
    path: String,
}

impl RepositoryRef {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        let host = host.into().trim().trim_end_matches('/').to_string();
        let path = path.into().trim_matches('/').to_string();
        let whole = format!("{host}/{path}");

        if host.is_empty() {
            return Err(Error::invalid_reference(whole, "registry host must not be empty"));
        }
        if path.is_empty() {
            return Err(Error::invalid_reference(whole, "repository path must not be empty"));
        }
        let valid_path = path.split('/').all(|segment| {
            !segment.is_empty()
                && segment.bytes().all(|b| {
                    b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-')
                })
        });
        if !valid_path {
            return Err(Error::invalid_reference(
                whole,
                "repository path must be lowercase alphanumeric segments separated by '/'",
            ));
        }

        Ok(Self { host, path })
    }

    /// Parse `host/path`, e.g. `ghcr.io/abc/my-repo`.
    ///
    /// When the first segment does not look like a registry host
    /// (no `.`, no `:`, not `localhost`), `default_host` is used instead.
    pub fn parse(s: &str, default_host: Option<&str>) -> Result<Self> {
        let s = s.trim().trim_matches('/');
        match s.split_once('/') {
            Some((first, rest)) if looks_like_host(first) => Self::new(first, rest),
            _ => match default_host {
                Some(host) => Self::new(host, s),
                None => Err(Error::invalid_reference(
                    s,
                    "missing registry host (expected e.g. ghcr.io/owner/repo)",
                )),
            },
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host/path:tag`, used in logs and errors.
    pub fn with_tag(&self, tag: &str) -> String {
        format!("{self}:{tag}")
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.path)
    }
}

fn looks_like_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

/// Validate a tag against the OCI distribution grammar `[\w][\w.-]{0,127}`.
pub fn validate_tag(tag: &str) -> Result<()> {
    let mut bytes = tag.bytes();
    let first_ok = bytes
        .next()
        .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_');
    let rest_ok = bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if !first_ok || !rest_ok || tag.len() > 128 {
        return Err(Error::invalid_reference(tag, "not a valid tag"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_types::{OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE};
    use serde_json::json;

    #[test]
    fn repository_ref_parse_with_host() {
        let r = RepositoryRef::parse("ghcr.io/abc/my-repo", None).unwrap();
        assert_eq!(r.host(), "ghcr.io");
        assert_eq!(r.path(), "abc/my-repo");
        assert_eq!(r.with_tag("v13"), "ghcr.io/abc/my-repo:v13");
    }

    #[test]
    fn repository_ref_parse_with_port() {
        let r = RepositoryRef::parse("localhost:5000/team/app", None).unwrap();
        assert_eq!(r.host(), "localhost:5000");
        assert_eq!(r.path(), "team/app");
    }

    #[test]
    fn repository_ref_parse_uses_default_host() {
        let r = RepositoryRef::parse("abc/my-repo", Some("ghcr.io")).unwrap();
        assert_eq!(r.to_string(), "ghcr.io/abc/my-repo");

        let err = RepositoryRef::parse("abc/my-repo", None).unwrap_err();
        assert!(err.to_string().contains("missing registry host"));
    }

    #[test]
    fn repository_ref_rejects_bad_paths() {
        assert!(RepositoryRef::new("ghcr.io", "").is_err());
        assert!(RepositoryRef::new("ghcr.io", "Abc/Repo").is_err());
        assert!(RepositoryRef::new("ghcr.io", "abc//repo").is_err());
        assert!(RepositoryRef::new("", "abc").is_err());
    }

    #[test]
    fn tag_validation() {
        validate_tag("v13").unwrap();
        validate_tag("1.0.0-rc.1").unwrap();
        validate_tag("_latest").unwrap();
        assert!(validate_tag("").is_err());
        assert!(validate_tag("-bad").is_err());
        assert!(validate_tag("has/slash").is_err());
        assert!(validate_tag(&"a".repeat(129)).is_err());
    }

    #[test]
    fn descriptor_verify_checks_size_then_digest() {
        let d = Descriptor::for_bytes("application/octet-stream", b"hello");
        d.verify(b"hello").unwrap();

        let err = d.verify(b"hell").unwrap_err();
        assert!(matches!(err, Error::DigestMismatch { .. }));

        let err = d.verify(b"HELLO").unwrap_err();
        assert!(matches!(err, Error::DigestMismatch { .. }));
    }

    #[test]
    fn descriptor_json_uses_camel_case() {
        let d = Descriptor::for_bytes(OCI_IMAGE_MANIFEST_MEDIA_TYPE, b"{}");
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["mediaType"], OCI_IMAGE_MANIFEST_MEDIA_TYPE);
        assert_eq!(v["size"], 2);
        assert!(v.get("annotations").is_none());
    }

    #[test]
    fn manifest_children_are_config_then_layers() {
        let config = Descriptor::for_bytes("application/vnd.oci.image.config.v1+json", b"{}");
        let l1 = Descriptor::for_bytes("application/vnd.oci.image.layer.v1.tar", b"one");
        let l2 = Descriptor::for_bytes("application/vnd.oci.image.layer.v1.tar", b"two");
        let body = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": OCI_IMAGE_MANIFEST_MEDIA_TYPE,
            "config": config,
            "layers": [l1, l2],
        }))
        .unwrap();
        let root = Descriptor::for_bytes(OCI_IMAGE_MANIFEST_MEDIA_TYPE, &body);

        let content = Content::parse(&root, &body).unwrap().unwrap();
        assert_eq!(content.children(), vec![config, l1, l2]);
    }

    #[test]
    fn subject_comes_before_config_and_layers() {
        let subject = Descriptor::for_bytes(OCI_IMAGE_MANIFEST_MEDIA_TYPE, b"{}");
        let sig = Descriptor::for_bytes("application/vnd.dev.cosign.simplesigning.v1+json", b"sig");
        let body = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "layers": [sig],
            "subject": subject,
        }))
        .unwrap();
        let root = Descriptor::for_bytes(OCI_IMAGE_MANIFEST_MEDIA_TYPE, &body);

        let content = Content::parse(&root, &body).unwrap().unwrap();
        assert_eq!(content.children(), vec![subject, sig]);
    }

    #[test]
    fn manifest_without_config_is_accepted() {
        let body = br#"{"schemaVersion":2,"layers":[]}"#;
        let root = Descriptor::for_bytes(OCI_IMAGE_MANIFEST_MEDIA_TYPE, body);
        let content = Content::parse(&root, body).unwrap().unwrap();
        assert!(content.children().is_empty());
    }

    #[test]
    fn index_children_are_manifests() {
        let m = Descriptor::for_bytes(OCI_IMAGE_MANIFEST_MEDIA_TYPE, b"{}");
        let body = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "manifests": [m],
        }))
        .unwrap();
        let root = Descriptor::for_bytes(OCI_IMAGE_INDEX_MEDIA_TYPE, &body);
        let content = Content::parse(&root, &body).unwrap().unwrap();
        assert!(matches!(content, Content::Index(_)));
        assert_eq!(content.children(), vec![m]);
    }

    #[test]
    fn malformed_index_is_format_error() {
        let body = br#"{"schemaVersion":2}"#;
        let root = Descriptor::for_bytes(OCI_IMAGE_INDEX_MEDIA_TYPE, body);
        let err = Content::parse(&root, body).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn blobs_have_no_content() {
        let d = Descriptor::for_bytes("application/octet-stream", b"not json");
        assert!(Content::parse(&d, b"not json").unwrap().is_none());
    }
}
