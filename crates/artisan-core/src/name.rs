//! Package names: `[domain/]group/name[:tag]`.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Registry domain used when a name carries none.
pub const DEFAULT_DOMAIN: &str = "artisan.library";

/// Tag used when a name carries none.
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LEN: usize = 128;
const MAX_DOMAIN_LEN: usize = 253;

/// A fully resolved package name.
///
/// The group may span several path segments (`acme/tools/app` has group
/// `acme/tools` and name `app`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageName {
    domain: String,
    group: String,
    name: String,
    tag: String,
}

impl PackageName {
    /// Build a name from its parts, validating each one.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] if any part is malformed.
    pub fn new(
        domain: impl Into<String>,
        group: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Result<Self> {
        let this = Self {
            domain: domain.into(),
            group: group.into(),
            name: name.into(),
            tag: tag.into(),
        };
        validate_domain(&this.domain)?;
        for segment in this.group.split('/') {
            validate_segment(segment, "group")?;
        }
        validate_segment(&this.name, "name")?;
        validate_tag(&this.tag)?;
        Ok(this)
    }

    /// Parse from a `[domain/]group/name[:tag]` string.
    ///
    /// The leading segment is taken as a domain when it contains `.` or `:`
    /// or is `localhost`.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] if the string is not a valid name.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::validation("package name is empty"));
        }

        // a ':' before the last '/' belongs to the domain port
        let last_slash = s.rfind('/').map_or(0, |i| i + 1);
        let (path, tag) = match s[last_slash..].rfind(':') {
            Some(i) => (&s[..last_slash + i], &s[last_slash + i + 1..]),
            None => (s, DEFAULT_TAG),
        };

        let mut segments: Vec<&str> = path.split('/').collect();
        let domain = if segments.len() > 2 && is_domain_like(segments[0]) {
            segments.remove(0).to_string()
        } else {
            DEFAULT_DOMAIN.to_string()
        };

        if segments.len() < 2 {
            return Err(Error::validation(format!(
                "package name '{s}' must have at least a group and a name"
            )));
        }

        let name = segments.pop().unwrap_or_default();
        Self::new(domain, segments.join("/"), name, tag)
    }

    /// Registry domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Group path.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Package name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// `group/name`.
    #[must_use]
    pub fn repository(&self) -> String {
        format!("{}/{}", self.group, self.name)
    }

    /// `domain/group/name`, the key under which the local index stores a repository.
    #[must_use]
    pub fn fully_qualified_name(&self) -> String {
        format!("{}/{}/{}", self.domain, self.group, self.name)
    }

    /// Whether both names address the same repository (tags ignored).
    #[must_use]
    pub fn is_in_same_repository_as(&self, other: &Self) -> bool {
        self.domain == other.domain && self.group == other.group && self.name == other.name
    }

    /// Same repository with a different tag.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] if the tag is malformed.
    pub fn with_tag(&self, tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        validate_tag(&tag)?;
        Ok(Self {
            tag,
            ..self.clone()
        })
    }

    /// Whether the domain is the built-in default.
    #[must_use]
    pub fn has_default_domain(&self) -> bool {
        self.domain == DEFAULT_DOMAIN
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fully_qualified_name(), self.tag)
    }
}

impl FromStr for PackageName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for PackageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

fn is_domain_like(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

/// Validate a tag: `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`.
///
/// # Errors
/// Returns [`Error::Validation`] if the tag is malformed.
pub fn validate_tag(tag: &str) -> Result<()> {
    let mut chars = tag.chars();
    let Some(first) = chars.next() else {
        return Err(Error::validation("tag is empty"));
    };
    if tag.len() > MAX_TAG_LEN {
        return Err(Error::validation(format!(
            "tag '{tag}' is longer than {MAX_TAG_LEN} characters"
        )));
    }
    if !(first.is_ascii_alphanumeric() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(Error::validation(format!("tag '{tag}' contains invalid characters")));
    }
    Ok(())
}

fn validate_segment(segment: &str, what: &str) -> Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(Error::validation(format!("{what} segment '{segment}' is not allowed")));
    }
    if !segment
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
    {
        return Err(Error::validation(format!(
            "{what} '{segment}' may only contain lowercase letters, digits, '.', '_' and '-'"
        )));
    }
    Ok(())
}

fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return Err(Error::validation(format!("domain '{domain}' has an invalid length")));
    }
    let (host, port) = match domain.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (domain, None),
    };
    if let Some(port) = port
        && port.parse::<u16>().is_err()
    {
        return Err(Error::validation(format!("domain '{domain}' has an invalid port")));
    }
    for label in host.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(Error::validation(format!("domain '{domain}' is not a valid host name")));
        }
    }
    Ok(())
}
