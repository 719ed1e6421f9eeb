//! Searcher over a local image index (a docker-compatible daemon).
//!
//! The local index answers exact lookups cheaply and can inspect images for
//! capability flags, so it runs before any remote registry search. A
//! configured registry searcher is consulted as well and its results are
//! merged; a failure on either side never hides the other side's matches.

use super::{ComponentMatch, ImageSummary, SearchError, Searcher, SCORE_EXACT, SCORE_PARTIAL};
use crate::reference::ImageReference;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// A local image index.
///
/// `inspect_image` returns `Ok(None)` for images that do not exist; only
/// transport-level failures are errors.
#[async_trait]
pub trait ImageClient: Send + Sync {
    /// Repo tags of locally present images matching the pattern (substring).
    async fn list_images(&self, pattern: &str) -> anyhow::Result<Vec<String>>;

    /// Inspect one image by repo tag.
    async fn inspect_image(&self, name: &str) -> anyhow::Result<Option<ImageSummary>>;
}

/// Searches a local image client, then a registry searcher.
pub struct DockerClientSearcher {
    /// Local index; absent when no daemon is reachable.
    pub client: Option<Arc<dyn ImageClient>>,

    /// Remote registry fallback, merged into the result set.
    pub registry_searcher: Option<Arc<dyn Searcher>>,

    /// The local index fronts an insecure (plain HTTP) registry.
    pub insecure: bool,
}

impl DockerClientSearcher {
    async fn search_local(
        &self,
        precise: bool,
        term: &str,
        matches: &mut Vec<ComponentMatch>,
        errors: &mut Vec<SearchError>,
    ) {
        let Some(client) = &self.client else { return };

        let wanted = match ImageReference::parse(term) {
            Ok(r) => r,
            Err(_) => return,
        };

        let repo_tags = match client.list_images(&wanted.name).await {
            Ok(tags) => tags,
            Err(err) => {
                errors.push(SearchError::new("local image index", err));
                return;
            }
        };

        for repo_tag in repo_tags {
            let Ok(candidate) = ImageReference::parse(&repo_tag) else { continue };

            let score = if candidate.same_identity(&wanted) {
                SCORE_EXACT
            } else if candidate.name == wanted.name || candidate.name.contains(&wanted.name) {
                SCORE_PARTIAL
            } else {
                continue;
            };
            if precise && score > SCORE_EXACT {
                continue;
            }

            let image = match client.inspect_image(&repo_tag).await {
                Ok(image) => image,
                Err(err) => {
                    errors.push(SearchError::new("local image index", err));
                    None
                }
            };
            let builder = image.as_ref().is_some_and(ImageSummary::is_builder);

            debug!(term, %repo_tag, score, "local image match");
            matches.push(ComponentMatch {
                value: repo_tag.clone(),
                name: candidate.name.clone(),
                argument: format!("--image={:?}", repo_tag),
                description: format!("Local image {:?}", repo_tag),
                score,
                builder,
                local: true,
                reference: Some(candidate),
                image,
                template: None,
            });
        }
    }
}

#[async_trait]
impl Searcher for DockerClientSearcher {
    async fn search(&self, precise: bool, terms: &[String]) -> (Vec<ComponentMatch>, Vec<SearchError>) {
        let mut matches = Vec::new();
        let mut errors = Vec::new();

        for term in terms {
            self.search_local(precise, term, &mut matches, &mut errors).await;
        }

        if let Some(registry) = &self.registry_searcher {
            let (remote_matches, remote_errors) = registry.search(precise, terms).await;
            matches.extend(remote_matches);
            errors.extend(remote_errors);
        }

        (matches, errors)
    }
}
