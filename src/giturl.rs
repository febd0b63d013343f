//! Hosting-provider git URL parsing.
//!
//! Accepts the HTTPS form (`https://host/owner/name[.git]`) and the SSH
//! form (`git@host:owner/name[.git]`) for the recognized hosting providers.
//! Both forms normalize to the same owner/name pair.

use std::fmt;

/// Hosts we accept clone requests for.
const RECOGNIZED_HOSTS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org"];

/// Errors from parsing a repository URL.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GitUrlError {
    /// The URL does not match either recognized shape.
    #[error("invalid repository URL: {url}")]
    Malformed { url: String },

    /// The host is not a recognized hosting provider.
    #[error("unsupported git host: {host}")]
    UnsupportedHost { host: String },
}

/// A parsed repository location on a recognized hosting provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub host: String,
    pub owner: String,
    pub name: String,
}

impl GitUrl {
    /// Parses an HTTPS or SSH repository URL.
    pub fn parse(url: &str) -> Result<Self, GitUrlError> {
        let url = url.trim();

        let (host, path) = if let Some(rest) = url.strip_prefix("https://") {
            rest.split_once('/').ok_or_else(|| GitUrlError::Malformed {
                url: url.to_string(),
            })?
        } else if let Some(rest) = url.strip_prefix("git@") {
            rest.split_once(':').ok_or_else(|| GitUrlError::Malformed {
                url: url.to_string(),
            })?
        } else {
            return Err(GitUrlError::Malformed {
                url: url.to_string(),
            });
        };

        if !RECOGNIZED_HOSTS.contains(&host) {
            return Err(GitUrlError::UnsupportedHost {
                host: host.to_string(),
            });
        }

        let mut segments = path.trim_matches('/').splitn(2, '/');
        let owner = segments.next().unwrap_or_default();
        let name = segments.next().unwrap_or_default();
        let name = name.strip_suffix(".git").unwrap_or(name);

        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(GitUrlError::Malformed {
                url: url.to_string(),
            });
        }

        Ok(Self {
            host: host.to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Canonical HTTPS clone URL (without credentials).
    pub fn https_url(&self) -> String {
        format!("https://{}/{}/{}.git", self.host, self.owner, self.name)
    }

    /// Clone URL with an inline credential for private repositories.
    ///
    /// The returned string embeds the token and must never be logged or
    /// persisted.
    pub fn authenticated_url(&self, token: &AccessToken) -> String {
        format!(
            "https://{}@{}/{}/{}.git",
            token.reveal(),
            self.host,
            self.owner,
            self.name
        )
    }
}

impl fmt::Display for GitUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.host, self.owner, self.name)
    }
}

/// A short-lived repository access credential.
///
/// `Debug` and `Display` redact the value so the token cannot leak through
/// log lines or error messages.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token. Only the clone-command builder should call this.
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}
