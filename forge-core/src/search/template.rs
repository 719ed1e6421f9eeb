//! Template searchers: the cluster template index and local template files.

use super::{ComponentMatch, SearchError, Searcher, SCORE_EXACT, SCORE_PARTIAL};
use crate::generate::objects::GeneratedObject;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A stored template: a named bundle of pre-defined workload descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub objects: Vec<GeneratedObject>,
}

/// Read access to the cluster's template index.
#[async_trait]
pub trait TemplateIndexClient: Send + Sync {
    async fn list_templates(&self, namespace: &str) -> anyhow::Result<Vec<Template>>;
}

fn template_match(template: &Template, score: f32) -> ComponentMatch {
    ComponentMatch {
        value: template.name.clone(),
        name: template.name.clone(),
        argument: format!("--template={:?}", template.name),
        description: format!("Template {:?}: {}", template.name, template.description),
        score,
        builder: false,
        local: false,
        reference: None,
        image: None,
        template: Some(template.clone()),
    }
}

/// Searches stored templates by name across an ordered namespace list.
pub struct TemplateSearcher {
    pub client: Arc<dyn TemplateIndexClient>,
    pub namespaces: Vec<String>,
}

#[async_trait]
impl Searcher for TemplateSearcher {
    async fn search(&self, precise: bool, terms: &[String]) -> (Vec<ComponentMatch>, Vec<SearchError>) {
        let mut matches = Vec::new();
        let mut errors = Vec::new();

        for namespace in &self.namespaces {
            let templates = match self.client.list_templates(namespace).await {
                Ok(templates) => templates,
                Err(err) => {
                    errors.push(SearchError::new("template index", err));
                    continue;
                }
            };

            for term in terms {
                for template in &templates {
                    let score = if template.name == *term {
                        SCORE_EXACT
                    } else if template.name.contains(term.as_str()) {
                        SCORE_PARTIAL
                    } else {
                        continue;
                    };
                    if precise && score > SCORE_EXACT {
                        continue;
                    }

                    debug!(term, template = %template.name, namespace, score, "template match");
                    let mut m = template_match(template, score);
                    if m.template.as_ref().is_some_and(|t| t.namespace.is_none()) {
                        if let Some(t) = m.template.as_mut() {
                            t.namespace = Some(namespace.clone());
                        }
                    }
                    matches.push(m);
                }
            }
        }

        (matches, errors)
    }
}

/// Treats a search term as a path to a template file (YAML or JSON).
///
/// A term that names no existing file is simply not a match; an existing file
/// that fails to parse is a backend error.
#[derive(Debug, Default)]
pub struct TemplateFileSearcher;

impl TemplateFileSearcher {
    fn load(path: &Path) -> anyhow::Result<Template> {
        let content = std::fs::read_to_string(path)?;
        let template = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        Ok(template)
    }
}

#[async_trait]
impl Searcher for TemplateFileSearcher {
    async fn search(&self, _precise: bool, terms: &[String]) -> (Vec<ComponentMatch>, Vec<SearchError>) {
        let mut matches = Vec::new();
        let mut errors = Vec::new();

        for term in terms {
            let path = Path::new(term);
            if !path.is_file() {
                continue;
            }
            match Self::load(path) {
                Ok(template) => {
                    debug!(term, template = %template.name, "template file match");
                    matches.push(template_match(&template, SCORE_EXACT));
                }
                Err(err) => errors.push(SearchError::new("template file", err)),
            }
        }

        (matches, errors)
    }
}
