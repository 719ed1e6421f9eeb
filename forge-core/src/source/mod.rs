//! Source repository locations and classification.
//!
//! A [`SourceRepository`] is a local path or remote URL (with optional
//! `#ref` fragment and context sub-directory) plus lazily-populated detection
//! info. Detection runs exactly once per repository and is idempotent; see
//! [`detect`] for the detector machinery.

pub mod detect;

use crate::dockerfile::Dockerfile;
use crate::error::{ForgeError, Result};
use crate::generate::objects::RepositoryRef;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Classification lifecycle of a repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DetectionState {
    #[default]
    Unclassified,
    Detecting,
    Classified(SourceInfo),
    Failed(String),
}

/// What detection learned about a repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceInfo {
    /// Classification terms (language/framework) used as builder search terms.
    pub terms: Vec<String>,

    /// Parsed Dockerfile found at the context directory, if any.
    pub dockerfile: Option<Dockerfile>,
}

impl SourceInfo {
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn has_dockerfile(&self) -> bool {
        self.dockerfile.is_some()
    }
}

/// A git-cloneable or local source location plus its detected build metadata.
#[derive(Debug, Clone)]
pub struct SourceRepository {
    location: String,
    local_path: Option<PathBuf>,
    git_ref: Option<String>,
    context_dir: Option<String>,
    state: DetectionState,
}

impl SourceRepository {
    /// Parse a location: a remote URL (optionally `url#ref`) or a local path.
    pub fn new(location: &str) -> Result<Self> {
        if location.is_empty() {
            return Err(ForgeError::InvalidRepository {
                location: location.to_string(),
                reason: "location is empty".to_string(),
            });
        }

        if is_remote_url(location) {
            let (url, git_ref) = match location.split_once('#') {
                Some((url, fragment)) if !fragment.is_empty() => {
                    (url.to_string(), Some(fragment.to_string()))
                }
                Some((url, _)) => (url.to_string(), None),
                None => (location.to_string(), None),
            };
            return Ok(SourceRepository {
                location: url,
                local_path: None,
                git_ref,
                context_dir: None,
                state: DetectionState::Unclassified,
            });
        }

        Ok(SourceRepository {
            location: location.to_string(),
            local_path: Some(PathBuf::from(location)),
            git_ref: None,
            context_dir: None,
            state: DetectionState::Unclassified,
        })
    }

    pub fn with_context_dir(mut self, context_dir: Option<String>) -> Self {
        self.context_dir = context_dir.filter(|d| !d.is_empty());
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn is_remote(&self) -> bool {
        self.local_path.is_none()
    }

    pub fn git_ref(&self) -> Option<&str> {
        self.git_ref.as_deref()
    }

    pub fn context_dir(&self) -> Option<&str> {
        self.context_dir.as_deref()
    }

    /// Detection info, populated once classification completes.
    pub fn info(&self) -> Option<&SourceInfo> {
        match &self.state {
            DetectionState::Classified(info) => Some(info),
            _ => None,
        }
    }

    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: DetectionState) {
        self.state = state;
    }

    /// Base name of the repository, used as the default object name.
    ///
    /// Prefers the context directory, then the last location segment with a
    /// `.git` suffix stripped.
    pub fn name(&self) -> String {
        if let Some(context_dir) = &self.context_dir {
            if let Some(base) = Path::new(context_dir).file_name() {
                return base.to_string_lossy().to_string();
            }
        }

        let trimmed = self.location.trim_end_matches('/');
        let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
        let base = base.trim_end_matches(".git");
        if base.is_empty() || base == "." || base == ".." {
            // A bare `.` resolves through the current directory's real name.
            if let Some(path) = &self.local_path {
                if let Ok(canonical) = path.canonicalize() {
                    if let Some(name) = canonical.file_name() {
                        return name.to_string_lossy().to_string();
                    }
                }
            }
            return "app".to_string();
        }
        base.to_string()
    }

    /// The location as recorded on a generated build spec.
    pub fn repository_ref(&self) -> RepositoryRef {
        RepositoryRef {
            location: self.location.clone(),
            git_ref: self.git_ref.clone(),
            context_dir: self.context_dir.clone(),
        }
    }
}

static ENV_ARGUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=.*$").expect("valid env regex"));

static COMPONENT_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:/@+~-]*$").expect("valid component regex"));

/// `KEY=VALUE` tokens become environment bindings.
pub fn is_environment_argument(token: &str) -> bool {
    ENV_ARGUMENT.is_match(token)
}

fn is_remote_url(token: &str) -> bool {
    const SCHEMES: &[&str] = &["http://", "https://", "git://", "ssh://", "file://"];
    SCHEMES.iter().any(|s| token.starts_with(s)) || token.starts_with("git@")
}

/// URL/path/git-ref-shaped tokens become source repositories.
pub fn is_possible_source_repository(token: &str) -> bool {
    if is_remote_url(token) {
        return true;
    }
    // `builder~source` and `a+b` are component syntax even when the source
    // side names a git location.
    if token.contains('~') || token.contains('+') {
        return false;
    }
    if token.split('#').next().unwrap_or(token).ends_with(".git") {
        return true;
    }
    if token == "." || token == ".." || token.starts_with("./") || token.starts_with("../") || token.starts_with('/') {
        return true;
    }
    Path::new(token).is_dir()
}

/// Everything else that still looks like a name becomes a component.
pub fn is_component_reference(token: &str) -> bool {
    COMPONENT_REFERENCE.is_match(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_url_with_ref() {
        let repo = SourceRepository::new("https://github.com/example/ruby-hello-world#beta4").unwrap();
        assert!(repo.is_remote());
        assert_eq!(repo.location(), "https://github.com/example/ruby-hello-world");
        assert_eq!(repo.git_ref(), Some("beta4"));
        assert_eq!(repo.name(), "ruby-hello-world");
    }

    #[test]
    fn test_git_suffix_stripped_from_name() {
        let repo = SourceRepository::new("git://github.com/example/origin.git").unwrap();
        assert_eq!(repo.name(), "origin");
    }

    #[test]
    fn test_context_dir_drives_name() {
        let repo = SourceRepository::new("https://github.com/example/sti-ruby")
            .unwrap()
            .with_context_dir(Some("2.0/test/rack-test-app".to_string()));
        assert_eq!(repo.name(), "rack-test-app");
    }

    #[test]
    fn test_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("my-app");
        std::fs::create_dir(&location).unwrap();
        let repo = SourceRepository::new(location.to_str().unwrap()).unwrap();
        assert!(!repo.is_remote());
        assert_eq!(repo.name(), "my-app");
    }

    #[test]
    fn test_classification_helpers() {
        assert!(is_environment_argument("first=one"));
        assert!(!is_environment_argument("=broken"));
        assert!(!is_environment_argument("plain"));

        assert!(is_possible_source_repository("git://github.com/example/origin.git"));
        assert!(is_possible_source_repository("https://github.com/example/ruby-hello-world#beta4"));
        assert!(is_possible_source_repository("."));
        assert!(is_possible_source_repository("git@github.com:org/repo.git"));
        assert!(!is_possible_source_repository("mysql+ruby~git@github.com/example/origin.git"));

        assert!(is_component_reference("one"));
        assert!(is_component_reference("two+three"));
        assert!(is_component_reference("four~five"));
        assert!(is_component_reference("mysql+ruby~git@github.com/example/origin.git"));
        assert!(!is_component_reference("-flag"));
    }

    #[test]
    fn test_info_only_after_classification() {
        let mut repo = SourceRepository::new("https://example.com/app").unwrap();
        assert!(repo.info().is_none());
        repo.set_state(DetectionState::Classified(SourceInfo {
            terms: vec!["ruby".to_string()],
            dockerfile: None,
        }));
        assert_eq!(repo.info().unwrap().terms(), ["ruby".to_string()]);
    }
}
