//! Component references and resolution policies.
//!
//! A [`ComponentInput`] is one user-supplied token plus its parsed modifiers.
//! A [`Resolver`] applies a selection policy over one or more searchers to
//! turn an input into at most one accepted [`ComponentMatch`], or a typed
//! per-input failure. Per-input failures never abort the run; the pipeline
//! collects them into a single [`ResolutionErrors`] aggregate.

use crate::search::{ComponentMatch, SearchError, Searcher, SCORE_EXACT};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A per-input resolution failure. Recoverable: aggregated, not fatal.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no match for {value:?}{}", format_causes(.errs))]
    NoMatch { value: String, errs: Vec<SearchError> },

    #[error("multiple matches for {value:?}:{}", format_candidates(.matches))]
    MultipleMatches { value: String, matches: Vec<ComponentMatch> },

    #[error("no resolver defined for {value:?}")]
    NoResolver { value: String },
}

impl ResolveError {
    /// The input value the failure belongs to.
    pub fn value(&self) -> &str {
        match self {
            ResolveError::NoMatch { value, .. }
            | ResolveError::MultipleMatches { value, .. }
            | ResolveError::NoResolver { value } => value,
        }
    }
}

fn format_causes(errs: &[SearchError]) -> String {
    if errs.is_empty() {
        return String::new();
    }
    let causes: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
    format!(" ({})", causes.join("; "))
}

fn format_candidates(matches: &[ComponentMatch]) -> String {
    let mut out = String::new();
    for m in matches {
        out.push_str(&format!("\n  {} ({})", m.argument, m.description));
    }
    out
}

/// Every per-input failure collected across one generation run.
///
/// Order follows task completion and is not guaranteed; callers inspect
/// membership, not position.
#[derive(Error, Debug, Default)]
#[error("{}", format_aggregate(.errors))]
pub struct ResolutionErrors {
    errors: Vec<ResolveError>,
}

fn format_aggregate(errors: &[ResolveError]) -> String {
    let lines: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    lines.join("\n")
}

impl ResolutionErrors {
    pub fn push(&mut self, err: ResolveError) {
        self.errors.push(err);
    }

    pub fn extend(&mut self, errs: impl IntoIterator<Item = ResolveError>) {
        self.errors.extend(errs);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ResolveError] {
        &self.errors
    }

    pub fn retain(&mut self, keep: impl FnMut(&ResolveError) -> bool) {
        self.errors.retain(keep);
    }
}

impl IntoIterator for ResolutionErrors {
    type Item = ResolveError;
    type IntoIter = std::vec::IntoIter<ResolveError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

/// A selection policy over search results.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, value: &str) -> Result<ComponentMatch, ResolveError>;
}

/// Accepts the lowest-scoring exact match, or a uniquely best inexact match.
///
/// Multiple exact matches, or multiple inexact matches tied at the lowest
/// score, fail with [`ResolveError::MultipleMatches`] enumerating every
/// candidate. No matches at all fail with [`ResolveError::NoMatch`] wrapping
/// every backend error that occurred along the way.
pub struct UniqueExactOrInexactMatchResolver {
    pub searcher: Arc<dyn Searcher>,
}

#[async_trait]
impl Resolver for UniqueExactOrInexactMatchResolver {
    async fn resolve(&self, value: &str) -> Result<ComponentMatch, ResolveError> {
        let (mut matches, errs) = self.searcher.search(false, &[value.to_string()]).await;
        matches.sort_by(|a, b| a.score.total_cmp(&b.score));

        let exact: Vec<&ComponentMatch> = matches.iter().filter(|m| m.is_exact()).collect();
        match exact.len() {
            1 => {
                let only = exact[0];
                debug!(value, matched = %only.value, "resolved exact match");
                return Ok(only.clone());
            }
            n if n > 1 => {
                return Err(ResolveError::MultipleMatches {
                    value: value.to_string(),
                    matches: exact.into_iter().cloned().collect(),
                });
            }
            _ => {}
        }

        let inexact: Vec<&ComponentMatch> =
            matches.iter().filter(|m| m.score > SCORE_EXACT).collect();
        match inexact.as_slice() {
            [] => Err(ResolveError::NoMatch { value: value.to_string(), errs }),
            [only] => {
                debug!(value, matched = %only.value, score = only.score, "resolved single inexact match");
                Ok((*only).clone())
            }
            [best, second, ..] if best.score < second.score => {
                debug!(value, matched = %best.value, score = best.score, "resolved best inexact match");
                Ok((*best).clone())
            }
            _ => Err(ResolveError::MultipleMatches {
                value: value.to_string(),
                matches: inexact.into_iter().cloned().collect(),
            }),
        }
    }
}

/// Accepts the first match from an ordered searcher list.
///
/// Used when the caller already constrains the search to something
/// unambiguous, like an explicit image reference; searchers run precisely.
pub struct FirstMatchResolver {
    pub searchers: Vec<Arc<dyn Searcher>>,
}

#[async_trait]
impl Resolver for FirstMatchResolver {
    async fn resolve(&self, value: &str) -> Result<ComponentMatch, ResolveError> {
        let mut all_errs = Vec::new();
        for searcher in &self.searchers {
            let (matches, errs) = searcher.search(true, &[value.to_string()]).await;
            all_errs.extend(errs);
            if let Some(m) = matches.into_iter().next() {
                debug!(value, %m.value, "resolved first match");
                return Ok(m);
            }
        }
        Err(ResolveError::NoMatch { value: value.to_string(), errs: all_errs })
    }
}

/// One user-supplied component token plus parsed modifiers.
///
/// Created at input classification, mutated once when resolution attaches a
/// match, read-only afterwards.
#[derive(Clone)]
pub struct ComponentInput {
    /// The original token as typed.
    pub argument: String,

    /// The component value to resolve (`name[:tag]`).
    pub value: String,

    /// The component must build from source (`builder~source` form or an
    /// explicit flag).
    pub expect_to_build: bool,

    /// Source location attached via `builder~source`.
    pub uses_source: Option<String>,

    /// Components sharing a group index deploy together.
    pub group: usize,

    /// The resolution policy for this input, when one applies.
    pub resolver: Option<Arc<dyn Resolver>>,

    /// The accepted match once resolution completes.
    pub resolved: Option<ComponentMatch>,
}

impl std::fmt::Debug for ComponentInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInput")
            .field("argument", &self.argument)
            .field("value", &self.value)
            .field("expect_to_build", &self.expect_to_build)
            .field("uses_source", &self.uses_source)
            .field("group", &self.group)
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl ComponentInput {
    /// Parse one component token into its grouped inputs.
    ///
    /// `a+b` groups components into one deployment; `builder~source` attaches
    /// a source location and marks the component as to-be-built.
    pub fn parse(token: &str, group: usize) -> Vec<ComponentInput> {
        token
            .split('+')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (value, uses_source) = match part.split_once('~') {
                    Some((component, source)) if !source.is_empty() => {
                        (component.to_string(), Some(source.to_string()))
                    }
                    Some((component, _)) => (component.to_string(), None),
                    None => (part.to_string(), None),
                };
                ComponentInput {
                    argument: token.to_string(),
                    expect_to_build: uses_source.is_some(),
                    value,
                    uses_source,
                    group,
                    resolver: None,
                    resolved: None,
                }
            })
            .collect()
    }
}

/// Resolve every unresolved input concurrently.
///
/// Inputs are independent: each task only writes its own match slot, and
/// failures land in the aggregate in completion order.
pub async fn resolve_all(inputs: &mut [ComponentInput]) -> ResolutionErrors {
    let mut errors = ResolutionErrors::default();
    let mut handles = Vec::new();

    for (idx, input) in inputs.iter().enumerate() {
        if input.resolved.is_some() {
            continue;
        }
        let Some(resolver) = input.resolver.clone() else {
            errors.push(ResolveError::NoResolver { value: input.value.clone() });
            continue;
        };
        let value = input.value.clone();
        let task_value = value.clone();
        handles.push((
            value,
            tokio::spawn(async move { (idx, resolver.resolve(&task_value).await) }),
        ));
    }

    for (value, handle) in handles {
        match handle.await {
            Ok((idx, Ok(m))) => inputs[idx].resolved = Some(m),
            Ok((_, Err(err))) => errors.push(err),
            Err(join_err) => errors.push(ResolveError::NoMatch {
                value,
                errs: vec![SearchError::new("resolver task", anyhow::Error::new(join_err))],
            }),
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SCORE_PARTIAL;

    struct StaticSearcher {
        matches: Vec<ComponentMatch>,
        errs: Vec<String>,
    }

    #[async_trait]
    impl Searcher for StaticSearcher {
        async fn search(
            &self,
            _precise: bool,
            _terms: &[String],
        ) -> (Vec<ComponentMatch>, Vec<SearchError>) {
            let errs = self
                .errs
                .iter()
                .map(|e| SearchError::new("static", anyhow::anyhow!(e.clone())))
                .collect();
            (self.matches.clone(), errs)
        }
    }

    fn scored(value: &str, score: f32) -> ComponentMatch {
        ComponentMatch {
            value: value.to_string(),
            name: value.to_string(),
            score,
            ..Default::default()
        }
    }

    fn unique(matches: Vec<ComponentMatch>, errs: Vec<String>) -> UniqueExactOrInexactMatchResolver {
        UniqueExactOrInexactMatchResolver { searcher: Arc::new(StaticSearcher { matches, errs }) }
    }

    #[tokio::test]
    async fn test_exact_match_wins_over_inexact() {
        let r = unique(vec![scored("partial", SCORE_PARTIAL), scored("exact", SCORE_EXACT)], vec![]);
        let m = r.resolve("mysql").await.unwrap();
        assert_eq!(m.value, "exact");
    }

    #[tokio::test]
    async fn test_multiple_exact_is_ambiguous() {
        let r = unique(vec![scored("a", SCORE_EXACT), scored("b", SCORE_EXACT)], vec![]);
        let err = r.resolve("mysql").await.unwrap_err();
        assert!(matches!(err, ResolveError::MultipleMatches { ref matches, .. } if matches.len() == 2));
    }

    #[tokio::test]
    async fn test_single_inexact_accepted() {
        let r = unique(vec![scored("close", SCORE_PARTIAL)], vec![]);
        assert_eq!(r.resolve("mysql").await.unwrap().value, "close");
    }

    #[tokio::test]
    async fn test_best_inexact_accepted_when_unique() {
        let r = unique(vec![scored("closer", 0.25), scored("far", SCORE_PARTIAL)], vec![]);
        assert_eq!(r.resolve("mysql").await.unwrap().value, "closer");
    }

    #[tokio::test]
    async fn test_tied_inexact_is_ambiguous() {
        let r = unique(vec![scored("a", SCORE_PARTIAL), scored("b", SCORE_PARTIAL)], vec![]);
        let err = r.resolve("mysql").await.unwrap_err();
        assert!(matches!(err, ResolveError::MultipleMatches { .. }));
    }

    #[tokio::test]
    async fn test_no_match_wraps_backend_errors() {
        let r = unique(vec![], vec!["backend one down".to_string(), "backend two down".to_string()]);
        let err = r.resolve("mysql:invalid").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("no match for \"mysql:invalid\""));
        assert!(message.contains("backend one down"));
        assert!(message.contains("backend two down"));
        let ResolveError::NoMatch { errs, .. } = err else { panic!("expected NoMatch") };
        assert_eq!(errs.len(), 2);
    }

    #[tokio::test]
    async fn test_first_match_takes_backend_order() {
        let empty: Arc<dyn Searcher> = Arc::new(StaticSearcher { matches: vec![], errs: vec![] });
        let hit: Arc<dyn Searcher> =
            Arc::new(StaticSearcher { matches: vec![scored("hit", SCORE_EXACT)], errs: vec![] });
        let r = FirstMatchResolver { searchers: vec![empty, hit] };
        assert_eq!(r.resolve("anything").await.unwrap().value, "hit");
    }

    #[test]
    fn test_parse_group_token() {
        let inputs = ComponentInput::parse("mysql+ruby~https://example.com/repo.git", 0);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].value, "mysql");
        assert!(!inputs[0].expect_to_build);
        assert_eq!(inputs[1].value, "ruby");
        assert!(inputs[1].expect_to_build);
        assert_eq!(inputs[1].uses_source.as_deref(), Some("https://example.com/repo.git"));
        assert_eq!(inputs[0].group, inputs[1].group);
    }

    #[tokio::test]
    async fn test_resolve_all_is_independent_per_input() {
        let good: Arc<dyn Resolver> =
            Arc::new(unique(vec![scored("ruby", SCORE_EXACT)], vec![]));
        let bad: Arc<dyn Resolver> = Arc::new(unique(vec![], vec!["down".to_string()]));

        let mut inputs = ComponentInput::parse("ruby", 0);
        inputs[0].resolver = Some(good);
        let mut failing = ComponentInput::parse("mysql", 1);
        failing[0].resolver = Some(bad);
        inputs.extend(failing);

        let errors = resolve_all(&mut inputs).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.errors()[0].value(), "mysql");
        assert!(inputs[0].resolved.is_some(), "failure of one input must not void the other");
        assert!(inputs[1].resolved.is_none());
    }

    #[tokio::test]
    async fn test_resolve_all_without_resolver() {
        let mut inputs = ComponentInput::parse("mysql", 0);
        let errors = resolve_all(&mut inputs).await;
        assert_eq!(errors.len(), 1);
        assert!(errors.to_string().contains("no resolver"));
    }
}
