//! Remote registry searcher.
//!
//! Talks to a docker-registry-compatible search endpoint through the
//! [`RegistryClient`] trait. The bundled [`HubRegistryClient`] queries the
//! hub's `/v1/search` API over HTTP with a bounded timeout; every call takes
//! the caller-supplied timeout so a slow registry only delays its own term.

use super::{ComponentMatch, SearchError, Searcher, SCORE_EXACT, SCORE_PARTIAL};
use crate::credentials::CredentialStore;
use crate::reference::{ImageReference, DEFAULT_NAMESPACE};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A remote image search backend.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn find_images(&self, term: &str) -> anyhow::Result<Vec<RegistryImage>>;
}

/// One remote search result.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryImage {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, rename = "is_official")]
    pub official: bool,

    #[serde(default, rename = "star_count")]
    pub stars: i64,
}

/// Searches a remote registry via a [`RegistryClient`].
pub struct DockerRegistrySearcher {
    pub client: Arc<dyn RegistryClient>,
}

impl DockerRegistrySearcher {
    fn score(term: &ImageReference, result: &RegistryImage) -> Option<f32> {
        // Official images are listed bare but address as `library/<name>`.
        let result_name = if result.official && !result.name.contains('/') {
            format!("{}/{}", DEFAULT_NAMESPACE, result.name)
        } else {
            result.name.clone()
        };
        let wanted = match &term.namespace {
            Some(ns) => format!("{}/{}", ns, term.name),
            None => format!("{}/{}", DEFAULT_NAMESPACE, term.name),
        };

        if result_name == wanted {
            Some(SCORE_EXACT)
        } else if result_name.ends_with(&format!("/{}", term.name)) || result_name.contains(&term.name) {
            Some(SCORE_PARTIAL)
        } else {
            None
        }
    }
}

#[async_trait]
impl Searcher for DockerRegistrySearcher {
    async fn search(&self, precise: bool, terms: &[String]) -> (Vec<ComponentMatch>, Vec<SearchError>) {
        let mut matches = Vec::new();
        let mut errors = Vec::new();

        for term in terms {
            let wanted = match ImageReference::parse(term) {
                Ok(r) => r,
                Err(err) => {
                    errors.push(SearchError::new("docker registry", anyhow::Error::new(err)));
                    continue;
                }
            };

            let results = match self.client.find_images(&wanted.name).await {
                Ok(results) => results,
                Err(err) => {
                    errors.push(SearchError::new("docker registry", err));
                    continue;
                }
            };

            for result in results {
                let Some(score) = Self::score(&wanted, &result) else { continue };
                if precise && score > SCORE_EXACT {
                    continue;
                }

                let mut reference = ImageReference::parse(&result.name)
                    .unwrap_or_else(|_| ImageReference { name: result.name.clone(), ..Default::default() });
                reference.tag = wanted.tag.clone();

                debug!(term, name = %result.name, score, "registry match");
                matches.push(ComponentMatch {
                    value: reference.to_string(),
                    name: reference.name.clone(),
                    argument: format!("--image={:?}", reference.to_string()),
                    description: format!("Registry image {:?} ({})", result.name, result.description),
                    score,
                    builder: false,
                    local: false,
                    reference: Some(reference),
                    image: None,
                    template: None,
                });
            }
        }

        (matches, errors)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RegistryImage>,
}

/// HTTP client for the public hub search API.
pub struct HubRegistryClient {
    http: reqwest::Client,
    base: String,
    credentials: Arc<dyn CredentialStore>,
}

impl HubRegistryClient {
    /// Default search endpoint.
    pub const DEFAULT_BASE: &'static str = "https://index.docker.io";

    pub fn new(
        timeout: Duration,
        insecure: bool,
        credentials: Arc<dyn CredentialStore>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .build()?;
        Ok(HubRegistryClient { http, base: Self::DEFAULT_BASE.to_string(), credentials })
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }
}

#[async_trait]
impl RegistryClient for HubRegistryClient {
    async fn find_images(&self, term: &str) -> anyhow::Result<Vec<RegistryImage>> {
        let url = format!("{}/v1/search", self.base);
        let host = self.base.trim_start_matches("https://").trim_start_matches("http://");
        let (username, password) = self.credentials.basic(host);

        let mut request = self.http.get(&url).query(&[("q", term)]);
        if !username.is_empty() {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?.error_for_status()?;
        let body: SearchResponse = response.json().await?;
        Ok(body.results)
    }
}
