//! Searchers over the cluster's image tracker index.
//!
//! Two views of the same index: [`TrackerSearcher`] matches trackers by name
//! and tag, [`AnnotationTrackerSearcher`] matches builder trackers by the
//! languages their `supports` annotation advertises. The annotation view is
//! what turns detected source classification terms into builder images.

use super::{ComponentMatch, ImageSummary, SearchError, Searcher, SCORE_EXACT, SCORE_PARTIAL};
use crate::generate::objects::{ImageTracker, SUPPORTS_ANNOTATION};
use crate::reference::{ImageReference, DEFAULT_TAG};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Read access to the cluster's tracker index.
#[async_trait]
pub trait TrackerIndexClient: Send + Sync {
    /// All trackers visible in one namespace.
    async fn list_trackers(&self, namespace: &str) -> anyhow::Result<Vec<ImageTracker>>;

    /// Inspect the image behind one tracker tag; `Ok(None)` when the tag has
    /// no resolved image yet.
    async fn tracker_image(
        &self,
        namespace: &str,
        name: &str,
        tag: &str,
    ) -> anyhow::Result<Option<ImageSummary>>;
}

fn tracker_match(
    namespace: &str,
    tracker: &ImageTracker,
    tag: &str,
    score: f32,
    image: Option<ImageSummary>,
) -> ComponentMatch {
    let builder = image.as_ref().is_some_and(ImageSummary::is_builder);
    let reference = ImageReference {
        registry: None,
        namespace: Some(namespace.to_string()),
        name: tracker.name.clone(),
        tag: Some(tag.to_string()),
        tracker_local: true,
    };
    ComponentMatch {
        value: reference.to_string(),
        name: tracker.name.clone(),
        argument: format!("--image-tracker={:?}", reference.to_string()),
        description: format!("Image tracker {:?} in namespace {:?}", tracker.name, namespace),
        score,
        builder,
        local: true,
        reference: Some(reference),
        image,
        template: None,
    }
}

/// Searches trackers by name across an ordered namespace list.
pub struct TrackerSearcher {
    pub client: Arc<dyn TrackerIndexClient>,
    pub namespaces: Vec<String>,
}

#[async_trait]
impl Searcher for TrackerSearcher {
    async fn search(&self, precise: bool, terms: &[String]) -> (Vec<ComponentMatch>, Vec<SearchError>) {
        let mut matches = Vec::new();
        let mut errors = Vec::new();

        for namespace in &self.namespaces {
            let trackers = match self.client.list_trackers(namespace).await {
                Ok(trackers) => trackers,
                Err(err) => {
                    errors.push(SearchError::new("image tracker index", err));
                    continue;
                }
            };

            for term in terms {
                let Ok(wanted) = ImageReference::parse(term) else { continue };
                let tag = wanted.tag_or_default().to_string();

                for tracker in &trackers {
                    let score = if tracker.name == wanted.name {
                        // An exact name only counts as exact when the tag exists.
                        if tracker.has_tag(&tag) || tracker.tags.is_empty() {
                            SCORE_EXACT
                        } else {
                            SCORE_PARTIAL
                        }
                    } else if tracker.name.contains(wanted.name.as_str()) {
                        SCORE_PARTIAL
                    } else {
                        continue;
                    };
                    if precise && score > SCORE_EXACT {
                        continue;
                    }

                    let image = match self.client.tracker_image(namespace, &tracker.name, &tag).await {
                        Ok(image) => image,
                        Err(err) => {
                            errors.push(SearchError::new("image tracker index", err));
                            None
                        }
                    };

                    debug!(term, tracker = %tracker.name, namespace, score, "tracker match");
                    matches.push(tracker_match(namespace, tracker, &tag, score, image));
                }
            }
        }

        (matches, errors)
    }
}

/// Searches builder trackers by their `supports` annotation.
///
/// Annotation format: a comma-separated list of `language[:version]` entries,
/// e.g. `ruby:2.0,ruby`. A bare language entry is an exact match for that
/// language term; a versioned entry matches the language partially.
pub struct AnnotationTrackerSearcher {
    pub client: Arc<dyn TrackerIndexClient>,
    pub namespaces: Vec<String>,
}

impl AnnotationTrackerSearcher {
    fn annotation_score(supports: &str, term: &str) -> Option<f32> {
        let mut best: Option<f32> = None;
        for entry in supports.split(',').map(str::trim) {
            let language = entry.split(':').next().unwrap_or(entry);
            if entry == term {
                best = Some(SCORE_EXACT);
                break;
            }
            if language == term {
                best = Some(best.map_or(SCORE_PARTIAL, |b: f32| b.min(SCORE_PARTIAL)));
            }
        }
        best
    }
}

#[async_trait]
impl Searcher for AnnotationTrackerSearcher {
    async fn search(&self, precise: bool, terms: &[String]) -> (Vec<ComponentMatch>, Vec<SearchError>) {
        let mut matches = Vec::new();
        let mut errors = Vec::new();

        for namespace in &self.namespaces {
            let trackers = match self.client.list_trackers(namespace).await {
                Ok(trackers) => trackers,
                Err(err) => {
                    errors.push(SearchError::new("tracker annotation index", err));
                    continue;
                }
            };

            for tracker in &trackers {
                let Some(supports) = tracker.annotations.get(SUPPORTS_ANNOTATION) else { continue };

                for term in terms {
                    let Some(score) = Self::annotation_score(supports, term) else { continue };
                    if precise && score > SCORE_EXACT {
                        continue;
                    }

                    let image = match self
                        .client
                        .tracker_image(namespace, &tracker.name, DEFAULT_TAG)
                        .await
                    {
                        Ok(image) => image,
                        Err(err) => {
                            errors.push(SearchError::new("tracker annotation index", err));
                            None
                        }
                    };

                    debug!(term, tracker = %tracker.name, namespace, score, "annotation match");
                    let mut m = tracker_match(namespace, tracker, DEFAULT_TAG, score, image);
                    // Advertising language support implies build capability.
                    m.builder = true;
                    matches.push(m);
                }
            }
        }

        (matches, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::objects::TrackedTag;
    use std::collections::BTreeMap;

    struct FakeIndex {
        trackers: Vec<ImageTracker>,
    }

    #[async_trait]
    impl TrackerIndexClient for FakeIndex {
        async fn list_trackers(&self, _namespace: &str) -> anyhow::Result<Vec<ImageTracker>> {
            Ok(self.trackers.clone())
        }

        async fn tracker_image(
            &self,
            _namespace: &str,
            _name: &str,
            _tag: &str,
        ) -> anyhow::Result<Option<ImageSummary>> {
            Ok(Some(ImageSummary {
                env: vec![("BUILDER_SCRIPTS_URL".to_string(), "http://repo/ruby".to_string())],
                ..Default::default()
            }))
        }
    }

    fn ruby_tracker(supports: Option<&str>) -> ImageTracker {
        let mut annotations = BTreeMap::new();
        if let Some(s) = supports {
            annotations.insert(SUPPORTS_ANNOTATION.to_string(), s.to_string());
        }
        ImageTracker {
            name: "ruby".to_string(),
            annotations,
            tags: vec![TrackedTag { name: "latest".to_string(), from: None }],
        }
    }

    #[tokio::test]
    async fn test_tracker_name_match() {
        let s = TrackerSearcher {
            client: Arc::new(FakeIndex { trackers: vec![ruby_tracker(None)] }),
            namespaces: vec!["default".to_string()],
        };
        let (matches, errors) = s.search(false, &["ruby".to_string()]).await;
        assert!(errors.is_empty());
        assert_eq!(matches.len(), 1);
        assert!(matches[0].is_exact());
        assert!(matches[0].builder);
        assert!(matches[0].reference.as_ref().unwrap().tracker_local);
    }

    #[tokio::test]
    async fn test_missing_tag_downgrades_match() {
        let s = TrackerSearcher {
            client: Arc::new(FakeIndex { trackers: vec![ruby_tracker(None)] }),
            namespaces: vec!["default".to_string()],
        };
        let (matches, _) = s.search(false, &["ruby:9.9".to_string()]).await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].score, SCORE_PARTIAL);
    }

    #[tokio::test]
    async fn test_annotation_match() {
        let s = AnnotationTrackerSearcher {
            client: Arc::new(FakeIndex { trackers: vec![ruby_tracker(Some("ruby:2.0,ruby"))] }),
            namespaces: vec!["default".to_string()],
        };
        let (matches, _) = s.search(false, &["ruby".to_string()]).await;
        assert_eq!(matches.len(), 1);
        assert!(matches[0].is_exact());
        assert!(matches[0].builder);
    }

    #[tokio::test]
    async fn test_annotation_versioned_entry_is_partial() {
        assert_eq!(
            AnnotationTrackerSearcher::annotation_score("ruby:2.0", "ruby"),
            Some(SCORE_PARTIAL)
        );
        assert_eq!(AnnotationTrackerSearcher::annotation_score("nodejs", "ruby"), None);
    }
}
