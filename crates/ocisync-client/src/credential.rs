use oci_client::secrets::RegistryAuth;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::{Error, Result};

/// Environment variable read by [`EnvCredentials::default`].
pub const DEFAULT_TOKEN_ENV: &str = "OCISYNC_TOKEN";

/// Static bearer credential for one registry host.
pub struct Credential {
    registry_host: String,
    access_token: SecretString,
}

impl Credential {
    pub fn new(registry_host: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            registry_host: registry_host.into(),
            access_token: SecretString::from(access_token.into()),
        }
    }

    pub fn registry_host(&self) -> &str {
        &self.registry_host
    }

    /// The same credential for use with [`oci_client::Client`].
    pub fn registry_auth(&self) -> RegistryAuth {
        RegistryAuth::Bearer(self.access_token.expose_secret().to_string())
    }

    /// Attach the token as `Authorization: Bearer <token>`.
    pub(crate) fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(self.access_token.expose_secret())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("registry_host", &self.registry_host)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Supplies the credential used for requests to a registry host.
pub trait CredentialProvider: Send + Sync {
    fn resolve(&self, host: &str) -> Result<Credential>;
}

/// Reads a single access token from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_ENV)
    }
}

impl CredentialProvider for EnvCredentials {
    fn resolve(&self, host: &str) -> Result<Credential> {
        let token = std::env::var(&self.var)
            .map_err(|_| Error::auth_config(host, format!("{} is not set", self.var)))?;
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::auth_config(host, format!("{} is empty", self.var)));
        }
        Ok(Credential::new(host, token))
    }
}

/// A fixed token, handed out for any host.
#[derive(Debug)]
pub struct StaticCredentials {
    access_token: SecretString,
}

impl StaticCredentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn resolve(&self, host: &str) -> Result<Credential> {
        Ok(Credential::new(host, self.access_token.expose_secret()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable name so parallel tests don't race.
    fn with_env<T>(var: &str, value: Option<&str>, f: impl FnOnce() -> T) -> T {
        // SAFETY: variable names are unique per test.
        unsafe {
            match value {
                Some(v) => std::env::set_var(var, v),
                None => std::env::remove_var(var),
            }
        }
        f()
    }

    #[test]
    fn env_credentials_reads_token() {
        let cred = with_env("OCISYNC_TEST_TOKEN_SET", Some(" tok \n"), || {
            EnvCredentials::new("OCISYNC_TEST_TOKEN_SET").resolve("ghcr.io")
        })
        .unwrap();
        assert_eq!(cred.registry_host(), "ghcr.io");
        assert!(matches!(cred.registry_auth(), RegistryAuth::Bearer(t) if t == "tok"));
    }

    #[test]
    fn env_credentials_missing_is_auth_config_error() {
        let err = with_env("OCISYNC_TEST_TOKEN_UNSET", None, || {
            EnvCredentials::new("OCISYNC_TEST_TOKEN_UNSET").resolve("ghcr.io")
        })
        .unwrap_err();
        assert!(matches!(err, Error::AuthConfig { .. }));
        assert!(err.to_string().contains("OCISYNC_TEST_TOKEN_UNSET is not set"));
    }

    #[test]
    fn env_credentials_empty_is_auth_config_error() {
        let err = with_env("OCISYNC_TEST_TOKEN_EMPTY", Some("   "), || {
            EnvCredentials::new("OCISYNC_TEST_TOKEN_EMPTY").resolve("ghcr.io")
        })
        .unwrap_err();
        assert!(matches!(err, Error::AuthConfig { .. }));
    }

    #[test]
    fn authorize_sets_sensitive_bearer_header() {
        let cred = Credential::new("ghcr.io", "tok");
        let req = cred
            .authorize(reqwest::Client::new().get("https://ghcr.io/v2/"))
            .build()
            .unwrap();
        let value = &req.headers()["authorization"];
        assert_eq!(value, "Bearer tok");
        assert!(value.is_sensitive());
    }

    #[test]
    fn debug_output_redacts_token() {
        let cred = Credential::new("ghcr.io", "super-secret");
        let debug = format!("{cred:?}");
        assert!(debug.contains("ghcr.io"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn static_credentials_follow_requested_host() {
        let cred = StaticCredentials::new("tok").resolve("example.com").unwrap();
        assert_eq!(cred.registry_host(), "example.com");
    }
}
