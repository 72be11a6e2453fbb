//! Media types the content graph walk understands.

/// OCI image manifest.
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image index (multi-platform manifest-of-manifests).
pub const OCI_IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Docker schema2 manifest.
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Docker schema2 manifest list.
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Recommended media type for empty `{}` config blobs of artifact manifests.
pub const OCI_EMPTY_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.empty.v1+json";

/// `Accept` values sent when resolving or fetching manifests.
pub const ACCEPT_MANIFEST: [&str; 4] = [
    OCI_IMAGE_MANIFEST_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE,
    DOCKER_MANIFEST_MEDIA_TYPE,
    DOCKER_MANIFEST_LIST_MEDIA_TYPE,
];

/// How a media type participates in the graph walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Manifest,
    Index,
    Blob,
}

impl MediaKind {
    pub fn of(media_type: &str) -> Self {
        // Parameters such as `; charset=utf-8` do not change the kind.
        let essence = media_type.split(';').next().unwrap_or_default().trim();
        match essence {
            OCI_IMAGE_MANIFEST_MEDIA_TYPE | DOCKER_MANIFEST_MEDIA_TYPE => Self::Manifest,
            OCI_IMAGE_INDEX_MEDIA_TYPE | DOCKER_MANIFEST_LIST_MEDIA_TYPE => Self::Index,
            _ => Self::Blob,
        }
    }

    pub fn has_children(self) -> bool {
        !matches!(self, Self::Blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_manifest_and_index_types() {
        assert_eq!(
            MediaKind::of(OCI_IMAGE_MANIFEST_MEDIA_TYPE),
            MediaKind::Manifest
        );
        assert_eq!(MediaKind::of(DOCKER_MANIFEST_MEDIA_TYPE), MediaKind::Manifest);
        assert_eq!(MediaKind::of(OCI_IMAGE_INDEX_MEDIA_TYPE), MediaKind::Index);
        assert_eq!(
            MediaKind::of(DOCKER_MANIFEST_LIST_MEDIA_TYPE),
            MediaKind::Index
        );
        assert_eq!(
            MediaKind::of("application/vnd.oci.image.layer.v1.tar+gzip"),
            MediaKind::Blob
        );
    }

    #[test]
    fn ignores_media_type_parameters() {
        assert_eq!(
            MediaKind::of("application/vnd.oci.image.index.v1+json; charset=utf-8"),
            MediaKind::Index
        );
    }
}
