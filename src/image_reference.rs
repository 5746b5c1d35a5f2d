use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

const MAX_NAME_LENGTH: usize = 255;

static PATH_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("path component regex is valid")
});
static DOMAIN_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])$")
        .expect("domain component regex is valid")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag regex is valid")
});
static DIGEST_ALGORITHM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*$")
        .expect("digest algorithm regex is valid")
});
static DIGEST_HEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{32,}$").expect("digest hex regex is valid"));

/// A container image reference split into its registry domain, repository
/// path, tag and digest.
///
/// A missing domain means the image is pulled from the implicit default
/// registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub domain: Option<String>,
    pub path: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("image reference is empty")]
    Empty,
    #[error("invalid domain {0}")]
    InvalidDomain(String),
    #[error("invalid repository path {0}")]
    InvalidPath(String),
    #[error("invalid tag {0}")]
    InvalidTag(String),
    #[error("invalid digest {0}")]
    InvalidDigest(String),
    #[error("repository name must not be longer than 255 characters")]
    NameTooLong,
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(domain) = &self.domain {
            write!(f, "{}/", domain)?;
        }
        write!(f, "{}", self.path)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => (name, Some(parse_digest(digest)?)),
            None => (s, None),
        };

        let (domain, remainder) = split_domain(name);
        if let Some(domain) = domain {
            validate_domain(domain)?;
        }

        // Any colon left once the domain is gone can only introduce a tag
        let (path, tag) = match remainder.rfind(':') {
            Some(pos) if !remainder[pos..].contains('/') => {
                (&remainder[..pos], Some(&remainder[pos + 1..]))
            }
            _ => (remainder, None),
        };

        validate_path(path)?;
        if name.len() - tag.map_or(0, |t| t.len() + 1) > MAX_NAME_LENGTH {
            return Err(ParseError::NameTooLong);
        }
        if let Some(tag) = tag {
            if !TAG.is_match(tag) {
                return Err(ParseError::InvalidTag(tag.to_string()));
            }
        }

        Ok(Self {
            domain: domain.map(str::to_string),
            path: path.to_string(),
            tag: tag.map(str::to_string),
            digest,
        })
    }

    pub fn has_digest(&self) -> bool {
        self.digest.is_some()
    }

    /// The reference as pulled upstream when this one goes through a local
    /// proxy: the `localhost` registry is dropped and a leading dotted path
    /// segment becomes the registry again, `host-port` turning into
    /// `host:port`.
    pub fn upstream(&self) -> ImageReference {
        if self.hostname() != Some("localhost") {
            return self.clone();
        }
        let (domain, path) = match self.path.split_once('/') {
            Some((first, rest)) if first.contains('.') => {
                (Some(decode_domain_segment(first)), rest.to_string())
            }
            _ => (None, self.path.clone()),
        };
        ImageReference {
            domain,
            path,
            tag: self.tag.clone(),
            digest: self.digest.clone(),
        }
    }

    /// Host part of the domain, without its port.
    pub fn hostname(&self) -> Option<&str> {
        self.domain
            .as_deref()
            .map(|domain| domain.split_once(':').map_or(domain, |(host, _)| host))
    }
}

/// The segment before the first slash names a registry only when it looks like
/// a host: it has a dot or a port, or it is `localhost`.
fn split_domain(name: &str) -> (Option<&str>, &str) {
    match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (Some(first), rest)
        }
        _ => (None, name),
    }
}

fn decode_domain_segment(segment: &str) -> String {
    match segment.rsplit_once('-') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            format!("{}:{}", host, port)
        }
        _ => segment.to_string(),
    }
}

fn validate_domain(domain: &str) -> Result<(), ParseError> {
    let invalid = || ParseError::InvalidDomain(domain.to_string());

    let (host, port) = match domain.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (domain, None),
    };
    if let Some(port) = port {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
    }
    if host.is_empty() || !host.split('.').all(|c| DOMAIN_COMPONENT.is_match(c)) {
        return Err(invalid());
    }
    Ok(())
}

fn validate_path(path: &str) -> Result<(), ParseError> {
    if path.is_empty() || !path.split('/').all(|c| PATH_COMPONENT.is_match(c)) {
        return Err(ParseError::InvalidPath(path.to_string()));
    }
    Ok(())
}

fn parse_digest(digest: &str) -> Result<String, ParseError> {
    match digest.split_once(':') {
        Some((algorithm, encoded))
            if DIGEST_ALGORITHM.is_match(algorithm) && DIGEST_HEX.is_match(encoded) =>
        {
            Ok(digest.to_string())
        }
        _ => Err(ParseError::InvalidDigest(digest.to_string())),
    }
}
