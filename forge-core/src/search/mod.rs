//! Search backends for component resolution.
//!
//! A [`Searcher`] turns search terms into scored [`ComponentMatch`]
//! candidates. Backends are pluggable and composable: resolvers hold
//! collections of searchers and apply a selection policy on top (see
//! `resolve`). A backend failure never voids the matches of other backends;
//! every searcher returns whatever it found alongside the errors it hit.

pub mod docker;
pub mod registry;
pub mod template;
pub mod tracker;

use crate::reference::ImageReference;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use docker::{DockerClientSearcher, ImageClient};
pub use registry::{DockerRegistrySearcher, HubRegistryClient, RegistryClient, RegistryImage};
pub use template::{Template, TemplateFileSearcher, TemplateIndexClient, TemplateSearcher};
pub use tracker::{AnnotationTrackerSearcher, TrackerIndexClient, TrackerSearcher};

/// Score of an exact match. Lower is better.
pub const SCORE_EXACT: f32 = 0.0;

/// Score of a partial (inexact) match.
pub const SCORE_PARTIAL: f32 = 0.5;

/// Environment variable names that mark an image as a builder.
///
/// `STI_SCRIPTS_URL` is the historical marker and still widely set by builder
/// images; `BUILDER_SCRIPTS_URL` is the current one.
pub const BUILDER_ENV_MARKERS: &[&str] = &["BUILDER_SCRIPTS_URL", "STI_SCRIPTS_URL"];

/// Inspection result for an image: the capability surface the generation
/// pipeline reads when wiring deployments and services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    /// Environment variables baked into the image.
    pub env: Vec<(String, String)>,

    /// Ports the image declares via EXPOSE.
    pub exposed_ports: Vec<u16>,

    /// Volume paths the image declares.
    pub volumes: Vec<String>,
}

impl ImageSummary {
    /// True when the image advertises builder scripts in its environment.
    pub fn is_builder(&self) -> bool {
        self.env.iter().any(|(k, _)| BUILDER_ENV_MARKERS.contains(&k.as_str()))
    }
}

/// The result of resolving one search term against one backend.
#[derive(Debug, Clone, Default)]
pub struct ComponentMatch {
    /// Canonical value of the match (usually the full image reference).
    pub value: String,

    /// Short name of the matched artifact.
    pub name: String,

    /// CLI argument that would reproduce this match unambiguously.
    pub argument: String,

    /// Human description shown when enumerating candidates.
    pub description: String,

    /// Match quality in `[0.0 exact, 1.0 weak]`, used for ranking.
    pub score: f32,

    /// The image can build source into a new image.
    pub builder: bool,

    /// The match came from a local index rather than a remote registry.
    pub local: bool,

    /// Resolved image identity, when the match is an image.
    pub reference: Option<ImageReference>,

    /// Inspection data, when the backend could inspect the image.
    pub image: Option<ImageSummary>,

    /// The matched template, when the backend searches templates.
    pub template: Option<Template>,
}

impl ComponentMatch {
    pub fn is_exact(&self) -> bool {
        self.score <= SCORE_EXACT
    }

    pub fn is_template(&self) -> bool {
        self.template.is_some()
    }
}

/// An error from a single backend during a search.
///
/// Carried inside no-match failures so the cause chain of every backend that
/// tried survives aggregation.
#[derive(Error, Debug)]
#[error("{backend}: {source}")]
pub struct SearchError {
    pub backend: &'static str,
    #[source]
    pub source: anyhow::Error,
}

impl SearchError {
    pub fn new(backend: &'static str, source: anyhow::Error) -> Self {
        SearchError { backend, source }
    }
}

/// A pluggable search backend.
///
/// `precise` restricts the backend to exact matches only; implementations
/// skip inexact candidates instead of scoring them. Partial results must be
/// returned even when some of the backend's sub-queries error.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(&self, precise: bool, terms: &[String]) -> (Vec<ComponentMatch>, Vec<SearchError>);
}

/// Composes searchers by concatenating their matches and errors.
///
/// One failing backend never voids the matches of the others.
pub struct SearcherList {
    pub searchers: Vec<std::sync::Arc<dyn Searcher>>,
}

#[async_trait]
impl Searcher for SearcherList {
    async fn search(&self, precise: bool, terms: &[String]) -> (Vec<ComponentMatch>, Vec<SearchError>) {
        let mut matches = Vec::new();
        let mut errors = Vec::new();
        for searcher in &self.searchers {
            let (m, e) = searcher.search(precise, terms).await;
            matches.extend(m);
            errors.extend(e);
        }
        (matches, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_markers() {
        let image = ImageSummary {
            env: vec![("STI_SCRIPTS_URL".to_string(), "http://repo/git/ruby".to_string())],
            ..Default::default()
        };
        assert!(image.is_builder());

        let plain = ImageSummary::default();
        assert!(!plain.is_builder());
    }

    #[test]
    fn test_match_exactness() {
        let m = ComponentMatch { score: SCORE_EXACT, ..Default::default() };
        assert!(m.is_exact());
        let m = ComponentMatch { score: SCORE_PARTIAL, ..Default::default() };
        assert!(!m.is_exact());
    }
}
