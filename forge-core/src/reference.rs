//! Image reference parsing and normalization.
//!
//! An [`ImageReference`] is the resolved identity of a container image:
//! registry, namespace, name and tag. References are the common currency
//! between searchers, the reference builder and the generated object graph,
//! and identity comparison always happens on the normalized form.

use crate::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default registry applied when a reference carries none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Default namespace applied when a reference carries none.
pub const DEFAULT_NAMESPACE: &str = "library";

/// Default tag applied when a reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// A resolved image identity.
///
/// `tracker_local` distinguishes a cluster-local image tracker reference from
/// an external registry image; both sides of a build use the same type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tracker_local: bool,
}

impl ImageReference {
    /// Parse a reference of the form `[registry/][namespace/]name[:tag]`.
    ///
    /// The first segment is treated as a registry only when it looks like a
    /// host (contains `.` or `:`, or is `localhost`), matching the docker
    /// client's disambiguation rules.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(ForgeError::InvalidReference {
                value: value.to_string(),
                reason: "reference is empty".to_string(),
            });
        }

        let mut registry = None;
        let mut namespace = None;
        let mut rest = value;

        let segments: Vec<&str> = value.split('/').collect();
        match segments.len() {
            1 => {}
            2 => {
                if is_registry_host(segments[0]) {
                    registry = Some(segments[0].to_string());
                } else {
                    namespace = Some(segments[0].to_string());
                }
                rest = segments[1];
            }
            3 => {
                if !is_registry_host(segments[0]) {
                    return Err(ForgeError::InvalidReference {
                        value: value.to_string(),
                        reason: format!("{:?} is not a valid registry host", segments[0]),
                    });
                }
                registry = Some(segments[0].to_string());
                namespace = Some(segments[1].to_string());
                rest = segments[2];
            }
            _ => {
                return Err(ForgeError::InvalidReference {
                    value: value.to_string(),
                    reason: "at most registry/namespace/name segments are allowed".to_string(),
                });
            }
        }

        let (name, tag) = match rest.rsplit_once(':') {
            Some((name, tag)) if !name.is_empty() && !tag.is_empty() => {
                (name.to_string(), Some(tag.to_string()))
            }
            Some(_) => {
                return Err(ForgeError::InvalidReference {
                    value: value.to_string(),
                    reason: "empty name or tag".to_string(),
                });
            }
            None => (rest.to_string(), None),
        };

        if name.is_empty() {
            return Err(ForgeError::InvalidReference {
                value: value.to_string(),
                reason: "reference has no name".to_string(),
            });
        }

        Ok(ImageReference { registry, namespace, name, tag, tracker_local: false })
    }

    /// Fill in the docker client defaults: `docker.io`, `library`, `latest`.
    ///
    /// Identity comparison and user-facing warnings about identical
    /// references always use this normalized form.
    pub fn docker_client_defaults(&self) -> ImageReference {
        let mut out = self.clone();
        if out.registry.is_none() {
            out.registry = Some(DEFAULT_REGISTRY.to_string());
        }
        if out.namespace.is_none() {
            out.namespace = Some(DEFAULT_NAMESPACE.to_string());
        }
        if out.tag.is_none() {
            out.tag = Some(DEFAULT_TAG.to_string());
        }
        out
    }

    /// True when the normalized registry/namespace/name/tag identities match.
    ///
    /// This is an identity comparison, not a string comparison: `centos` and
    /// `docker.io/library/centos:latest` are equal.
    pub fn same_identity(&self, other: &ImageReference) -> bool {
        let a = self.docker_client_defaults();
        let b = other.docker_client_defaults();
        a.registry == b.registry && a.namespace == b.namespace && a.name == b.name && a.tag == b.tag
    }

    /// The tag, or the default tag when none was given.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// `name:tag` form used for tracker tag references.
    pub fn name_and_tag(&self) -> String {
        format!("{}:{}", self.name, self.tag_or_default())
    }

    /// A short object name suggestion derived from the image name.
    pub fn suggest_name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        if let Some(namespace) = &self.namespace {
            write!(f, "{}/", namespace)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        Ok(())
    }
}

/// Whether a path segment names a registry host rather than a namespace.
fn is_registry_host(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let r = ImageReference::parse("mysql").unwrap();
        assert_eq!(r.name, "mysql");
        assert_eq!(r.registry, None);
        assert_eq!(r.namespace, None);
        assert_eq!(r.tag, None);
    }

    #[test]
    fn test_parse_with_tag() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(r.name, "nginx");
        assert_eq!(r.tag.as_deref(), Some("1.25"));
    }

    #[test]
    fn test_parse_namespace() {
        let r = ImageReference::parse("centos/ruby-22-centos7").unwrap();
        assert_eq!(r.namespace.as_deref(), Some("centos"));
        assert_eq!(r.name, "ruby-22-centos7");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("myrepo:5000/myco/example").unwrap();
        assert_eq!(r.registry.as_deref(), Some("myrepo:5000"));
        assert_eq!(r.namespace.as_deref(), Some("myco"));
        assert_eq!(r.name, "example");
        assert_eq!(r.tag, None);
    }

    #[test]
    fn test_parse_full() {
        let r = ImageReference::parse("ghcr.io/org/repo:latest").unwrap();
        assert_eq!(r.registry.as_deref(), Some("ghcr.io"));
        assert_eq!(r.namespace.as_deref(), Some("org"));
        assert_eq!(r.name, "repo");
        assert_eq!(r.tag.as_deref(), Some("latest"));
    }

    #[test]
    fn test_parse_rejects_empty_tag() {
        assert!(ImageReference::parse("nginx:").is_err());
        assert!(ImageReference::parse("").is_err());
    }

    #[test]
    fn test_docker_client_defaults() {
        let r = ImageReference::parse("centos").unwrap().docker_client_defaults();
        assert_eq!(r.to_string(), "docker.io/library/centos:latest");
    }

    #[test]
    fn test_same_identity_ignores_string_form() {
        let short = ImageReference::parse("centos").unwrap();
        let long = ImageReference::parse("docker.io/library/centos:latest").unwrap();
        assert!(short.same_identity(&long));

        let other = ImageReference::parse("centos:7").unwrap();
        assert!(!short.same_identity(&other));
    }

    #[test]
    fn test_display_round_trip() {
        for value in ["mysql", "nginx:1.25", "centos/ruby-22-centos7", "myrepo:5000/myco/example"] {
            let r = ImageReference::parse(value).unwrap();
            assert_eq!(r.to_string(), value);
        }
    }
}
