//! OCI artifact reference parsing.
//!
//! `host[:port]/repository[:tag][@digest]`, with Docker Hub defaults for
//! references without a host part.

use ocm_core::error::{OcmError, Result};

/// Registry used when the reference names none.
pub const DEFAULT_HOST: &str = "docker.io";

const DEFAULT_TAG: &str = "latest";

/// Parsed artifact reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReference {
    /// Registry host, possibly with port
    pub host: String,
    /// Repository (namespace) inside the registry
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ArtifactReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(OcmError::invalid("artifact reference", reference, "empty"));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(OcmError::invalid(
                        "artifact reference",
                        reference,
                        "digest must be <algorithm>:<hex>",
                    ));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // a tag can only follow the last path component
        let last_slash = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon) => {
                let split = last_slash + colon;
                let candidate = &name_tag[split + 1..];
                // `host:5000` without a repository is a port, not a tag
                if last_slash == 0 && candidate.chars().all(|c| c.is_ascii_digit()) {
                    (name_tag, None)
                } else {
                    (&name_tag[..split], Some(candidate.to_string()))
                }
            }
            None => (name_tag, None),
        };

        let (host, repository) = split_host(name)?;
        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            host,
            repository,
            tag,
            digest,
        })
    }

    /// Reference to a repository with an explicit tag or digest.
    pub fn new(host: &str, repository: &str, version: &str) -> Self {
        let (tag, digest) = if version.starts_with("sha256:") {
            (None, Some(version.to_string()))
        } else {
            (Some(version.to_string()), None)
        };
        Self {
            host: host.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        }
    }

    /// Digest if present, tag otherwise.
    pub fn version(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.host, self.repository);
        if let Some(tag) = &self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

fn split_host(name: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(OcmError::invalid("artifact reference", name, "empty repository"));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
        return Ok((DEFAULT_HOST.to_string(), name.to_string()));
    }
    Ok((DEFAULT_HOST.to_string(), format!("library/{}", name)))
}

impl std::fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_reference())
    }
}

/// Host part of a registry base URL, without scheme and trailing slash.
pub fn host_of(base_url: &str) -> &str {
    let s = base_url
        .strip_prefix("https://")
        .or_else(|| base_url.strip_prefix("http://"))
        .unwrap_or(base_url);
    s.trim_end_matches('/')
}
