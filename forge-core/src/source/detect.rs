//! Source repository content detection.
//!
//! Detection runs an ordered list of content detectors against a repository
//! file listing; the first detector whose signature test passes contributes
//! the classification terms. A Dockerfile tester runs independently of
//! language classification and records presence plus the parsed base image.

use super::{DetectionState, SourceInfo, SourceRepository};
use crate::dockerfile::Dockerfile;
use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument};

/// A repository file listing, with paths relative to the context directory.
#[derive(Debug, Clone, Default)]
pub struct FileListing {
    files: Vec<String>,
}

impl FileListing {
    pub fn new(mut files: Vec<String>) -> Self {
        // Deterministic detection regardless of listing order.
        files.sort();
        FileListing { files }
    }

    /// True when the listing has `name` at the repository root.
    pub fn contains(&self, name: &str) -> bool {
        self.files.iter().any(|f| f == name)
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }
}

/// A pluggable content detector.
pub trait Detector: Send + Sync {
    /// Classification terms when the repository matches, `None` otherwise.
    fn detect(&self, files: &FileListing) -> Option<Vec<String>>;
}

/// Detects a language by the presence of its signature files.
#[derive(Debug, Clone, Copy)]
pub struct LanguageDetector {
    pub language: &'static str,
    pub signatures: &'static [&'static str],
}

impl Detector for LanguageDetector {
    fn detect(&self, files: &FileListing) -> Option<Vec<String>> {
        if self.signatures.iter().any(|s| files.contains(s)) {
            debug!(language = self.language, "language signature matched");
            Some(vec![self.language.to_string()])
        } else {
            None
        }
    }
}

static LANGUAGE_TABLE: Lazy<Vec<LanguageDetector>> = Lazy::new(|| {
    vec![
        LanguageDetector { language: "ruby", signatures: &["Gemfile", "Rakefile", "config.ru"] },
        LanguageDetector { language: "jee", signatures: &["pom.xml"] },
        LanguageDetector { language: "nodejs", signatures: &["app.json", "package.json"] },
        LanguageDetector { language: "php", signatures: &["index.php", "composer.json"] },
        LanguageDetector { language: "python", signatures: &["requirements.txt", "setup.py"] },
        LanguageDetector { language: "perl", signatures: &["index.pl", "cpanfile"] },
        LanguageDetector { language: "golang", signatures: &["main.go", "Godeps", "go.mod"] },
    ]
});

/// The default, ordered detector list. Passed explicitly into the enumerator;
/// there is no process-wide mutable registry.
pub fn default_detectors() -> Vec<Arc<dyn Detector>> {
    LANGUAGE_TABLE.iter().map(|d| Arc::new(*d) as Arc<dyn Detector>).collect()
}

/// Tests for a Dockerfile at the repository root.
#[derive(Debug, Clone)]
pub struct DockerfileTester {
    filename: String,
}

impl Default for DockerfileTester {
    fn default() -> Self {
        DockerfileTester { filename: "Dockerfile".to_string() }
    }
}

impl DockerfileTester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn test(&self, files: &FileListing) -> bool {
        files.contains(&self.filename)
    }
}

/// File access for a checked-out or remote-cloned repository.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Paths relative to the repository's context directory.
    async fn list_files(&self, repo: &SourceRepository) -> anyhow::Result<Vec<String>>;

    async fn read_file(&self, repo: &SourceRepository, relative: &str) -> anyhow::Result<Vec<u8>>;
}

/// Reads repositories from the local filesystem.
///
/// Remote locations need a checkout first; asking this client about one is an
/// error the caller records against that repository only.
#[derive(Debug, Default)]
pub struct LocalSourceClient;

impl LocalSourceClient {
    fn root(repo: &SourceRepository) -> anyhow::Result<PathBuf> {
        let base = repo
            .local_path()
            .ok_or_else(|| anyhow::anyhow!("remote repository {} has no local checkout", repo.location()))?;
        Ok(match repo.context_dir() {
            Some(dir) => base.join(dir),
            None => base.to_path_buf(),
        })
    }

    fn walk(dir: &PathBuf, prefix: &str, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name == ".git" {
                continue;
            }
            let relative =
                if prefix.is_empty() { name.clone() } else { format!("{}/{}", prefix, name) };
            if entry.file_type()?.is_dir() {
                Self::walk(&entry.path(), &relative, out)?;
            } else {
                out.push(relative);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SourceClient for LocalSourceClient {
    async fn list_files(&self, repo: &SourceRepository) -> anyhow::Result<Vec<String>> {
        let root = Self::root(repo)?;
        let mut files = Vec::new();
        Self::walk(&root, "", &mut files)?;
        Ok(files)
    }

    async fn read_file(&self, repo: &SourceRepository, relative: &str) -> anyhow::Result<Vec<u8>> {
        let path = Self::root(repo)?.join(relative);
        Ok(std::fs::read(path)?)
    }
}

/// Runs detectors and the Dockerfile tester over repositories.
#[derive(Clone)]
pub struct SourceRepositoryEnumerator {
    pub detectors: Vec<Arc<dyn Detector>>,
    pub tester: DockerfileTester,
}

impl SourceRepositoryEnumerator {
    pub fn new() -> Self {
        SourceRepositoryEnumerator {
            detectors: default_detectors(),
            tester: DockerfileTester::new(),
        }
    }

    /// Classify one repository. Idempotent: an already classified repository
    /// is left untouched.
    #[instrument(skip(self, client, repo), fields(location = %repo.location()))]
    pub async fn detect(
        &self,
        client: &dyn SourceClient,
        repo: &mut SourceRepository,
    ) -> Result<()> {
        if matches!(repo.state(), DetectionState::Classified(_)) {
            return Ok(());
        }
        repo.set_state(DetectionState::Detecting);

        let files = match client.list_files(repo).await {
            Ok(files) => FileListing::new(files),
            Err(err) => {
                repo.set_state(DetectionState::Failed(err.to_string()));
                return Err(ForgeError::DetectionFailed {
                    location: repo.location().to_string(),
                    reason: err.to_string(),
                });
            }
        };

        // First matching detector wins; no match means empty terms, which is
        // a risk factor for downstream resolution but not an error here.
        let terms = self
            .detectors
            .iter()
            .find_map(|d| d.detect(&files))
            .unwrap_or_default();

        let dockerfile = if self.tester.test(&files) {
            match client.read_file(repo, self.tester.filename()).await {
                Ok(content) => {
                    let content = String::from_utf8_lossy(&content);
                    Some(Dockerfile::parse(&content)?)
                }
                Err(err) => {
                    repo.set_state(DetectionState::Failed(err.to_string()));
                    return Err(ForgeError::DetectionFailed {
                        location: repo.location().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        } else {
            None
        };

        debug!(terms = ?terms, dockerfile = dockerfile.is_some(), "repository classified");
        repo.set_state(DetectionState::Classified(SourceInfo { terms, dockerfile }));
        Ok(())
    }
}

impl Default for SourceRepositoryEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapSourceClient {
        files: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl SourceClient for MapSourceClient {
        async fn list_files(&self, _repo: &SourceRepository) -> anyhow::Result<Vec<String>> {
            Ok(self.files.iter().map(|(name, _)| name.to_string()).collect())
        }

        async fn read_file(&self, _repo: &SourceRepository, relative: &str) -> anyhow::Result<Vec<u8>> {
            self.files
                .iter()
                .find(|(name, _)| *name == relative)
                .map(|(_, content)| content.as_bytes().to_vec())
                .ok_or_else(|| anyhow::anyhow!("no such file {}", relative))
        }
    }

    #[tokio::test]
    async fn test_ruby_signature_detected() {
        let client = MapSourceClient { files: vec![("Gemfile", ""), ("app.rb", "")] };
        let enumerator = SourceRepositoryEnumerator::new();
        let mut repo = SourceRepository::new("https://example.com/ruby-hello-world").unwrap();

        enumerator.detect(&client, &mut repo).await.unwrap();
        let info = repo.info().unwrap();
        assert_eq!(info.terms(), ["ruby".to_string()]);
        assert!(!info.has_dockerfile());

        // Repeated detection is idempotent.
        enumerator.detect(&client, &mut repo).await.unwrap();
        assert_eq!(repo.info().unwrap().terms(), ["ruby".to_string()]);
    }

    #[tokio::test]
    async fn test_first_detector_wins() {
        let client = MapSourceClient { files: vec![("Gemfile", ""), ("package.json", "")] };
        let enumerator = SourceRepositoryEnumerator::new();
        let mut repo = SourceRepository::new("https://example.com/mixed").unwrap();
        enumerator.detect(&client, &mut repo).await.unwrap();
        assert_eq!(repo.info().unwrap().terms(), ["ruby".to_string()]);
    }

    #[tokio::test]
    async fn test_dockerfile_recorded_independently() {
        let client = MapSourceClient {
            files: vec![("Dockerfile", "FROM centos/ruby-22-centos7\nEXPOSE 8080"), ("Gemfile", "")],
        };
        let enumerator = SourceRepositoryEnumerator::new();
        let mut repo = SourceRepository::new("https://example.com/ruby-docker").unwrap();
        enumerator.detect(&client, &mut repo).await.unwrap();

        let info = repo.info().unwrap();
        assert_eq!(info.terms(), ["ruby".to_string()]);
        let dockerfile = info.dockerfile.as_ref().unwrap();
        assert_eq!(dockerfile.base_image(), Some("centos/ruby-22-centos7"));
    }

    #[tokio::test]
    async fn test_unrecognized_repository_gets_empty_terms() {
        let client = MapSourceClient { files: vec![("README.md", "")] };
        let enumerator = SourceRepositoryEnumerator::new();
        let mut repo = SourceRepository::new("https://example.com/mystery").unwrap();
        enumerator.detect(&client, &mut repo).await.unwrap();
        assert!(repo.info().unwrap().terms().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_marks_repository_failed() {
        let enumerator = SourceRepositoryEnumerator::new();
        let mut repo = SourceRepository::new("https://example.com/unreachable").unwrap();
        let err = enumerator.detect(&LocalSourceClient, &mut repo).await.unwrap_err();
        assert!(matches!(err, ForgeError::DetectionFailed { .. }));
        assert!(matches!(repo.state(), DetectionState::Failed(_)));
    }

    #[tokio::test]
    async fn test_local_client_lists_context_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub/app")).unwrap();
        std::fs::write(dir.path().join("sub/app/Gemfile"), "source :rubygems").unwrap();
        std::fs::write(dir.path().join("top.txt"), "").unwrap();

        let repo = SourceRepository::new(dir.path().to_str().unwrap())
            .unwrap()
            .with_context_dir(Some("sub/app".to_string()));
        let files = LocalSourceClient.list_files(&repo).await.unwrap();
        assert_eq!(files, vec!["Gemfile".to_string()]);
    }
}
