use url::Url;

use crate::{Error, Result};

/// Base URL of a registry's distribution API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEndpoint {
    /// Base URL with scheme, e.g. `https://ghcr.io`.
    pub base_url: Url,
    /// Registry host (and optional port), the key credentials are resolved by.
    pub registry: String,
}

impl RegistryEndpoint {
    /// Parse a registry host (`ghcr.io`, `localhost:5000`) or a full URL.
    ///
    /// Bare hosts are reached over https; pass an explicit `http://` URL to
    /// talk to a plain-text registry.
    pub fn parse(registry: &str) -> Result<Self> {
        let registry = registry.trim();
        let with_scheme = if registry.contains("://") {
            registry.to_string()
        } else {
            format!("https://{registry}")
        };

        let url = Url::parse(&with_scheme).map_err(|e| {
            Error::invalid_reference(registry, format!("invalid registry URL: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::invalid_reference(
                registry,
                "registry URL scheme must be http or https",
            ));
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::invalid_reference(registry, "registry URL missing host"))?
            .to_string();
        let registry_host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };

        // Requests always target `/v2/...` at the origin.
        if url.path() != "/" && !url.path().is_empty() {
            return Err(Error::invalid_reference(
                registry,
                format!("registry URL must not contain a path (got '{}')", url.path()),
            ));
        }

        Ok(Self {
            base_url: url,
            registry: registry_host,
        })
    }

    /// Absolute URL for an API path such as `/v2/<name>/tags/list`.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// Resolve a possibly relative `Link` target against the base URL.
    pub fn join(&self, target: &str) -> Result<Url> {
        self.base_url
            .join(target)
            .map_err(|e| Error::network(target, format!("invalid link target: {e}")))
    }
}
