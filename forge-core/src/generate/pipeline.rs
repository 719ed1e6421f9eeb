//! The generation pipeline: from raw arguments to an object graph.
//!
//! [`AppConfig`] carries the classified inputs, the flags, and the pluggable
//! collaborators (searchers, detector, source client). [`AppConfig::run`]
//! orchestrates classification, concurrent resolution and detection, builder
//! pairing, strategy validation, reference assignment and emission, and
//! returns either the finished [`ObjectGraph`] or an error. Per-input
//! failures are aggregated; only contradictory user intent aborts early.

use crate::dockerfile::Dockerfile;
use crate::env::{Environment, SecretMount};
use crate::error::{ForgeError, Result};
use crate::generate::objects::{
    BuildSource, BuildSpec, BuildStrategy, Container, DeploymentSpec, GeneratedObject,
    ImageSourceInput, ImageSourcePath, ImageTracker, Labels, ObjectGraph, ObjectReference,
    ServicePort, ServiceSpec, TrackedTag, Volume, VolumeMount, VolumeSource,
    INSECURE_REPOSITORY_ANNOTATION,
};
use crate::generate::refs::{check_circular_output, ReferenceBuilder};
use crate::reference::{ImageReference, DEFAULT_TAG};
use crate::resolve::{
    resolve_all, ComponentInput, FirstMatchResolver, ResolutionErrors, ResolveError, Resolver,
    UniqueExactOrInexactMatchResolver,
};
use crate::search::{ComponentMatch, ImageSummary, SearchError, Searcher, SearcherList};
use crate::source::detect::{LocalSourceClient, SourceClient, SourceRepositoryEnumerator};
use crate::source::{
    is_component_reference, is_environment_argument, is_possible_source_repository,
    SourceRepository,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// How a build turns its input into an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Source,
    Docker,
    Pipeline,
}

impl FromStr for Strategy {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source" => Ok(Strategy::Source),
            "docker" => Ok(Strategy::Docker),
            "pipeline" => Ok(Strategy::Pipeline),
            other => Err(ForgeError::InvalidReference {
                value: other.to_string(),
                reason: "strategy must be 'source', 'docker' or 'pipeline'".to_string(),
            }),
        }
    }
}

/// The result of a generation run.
#[derive(Debug)]
pub struct AppResult {
    /// The primary object name assigned to the application.
    pub name: String,

    /// The generated object graph; the caller owns it from here.
    pub objects: ObjectGraph,

    /// Non-fatal advisories, never part of the error value.
    pub warnings: Vec<String>,
}

/// Configuration and collaborators for one generation run.
pub struct AppConfig {
    // Classified inputs.
    pub components: Vec<String>,
    pub source_repositories: Vec<String>,
    pub environment: Vec<String>,

    /// Explicit image-only inputs, resolved against the docker searcher only.
    pub docker_images: Vec<String>,

    /// Explicit template inputs, resolved against template searchers only.
    pub templates: Vec<String>,

    // Flags.
    pub name: Option<String>,
    pub strategy: Option<Strategy>,
    pub dockerfile: Option<String>,
    pub context_dir: Option<String>,
    pub to: Option<String>,
    pub output_docker: bool,
    pub no_output: bool,
    pub expect_to_build: bool,
    pub deploy: bool,
    pub insecure_registry: bool,
    pub add_environment_to_build: bool,
    pub source_image: Option<String>,
    pub source_image_path: Option<String>,
    pub secrets: Vec<String>,
    pub labels: Labels,
    pub namespace: String,

    // Collaborators.
    pub docker_searcher: Option<Arc<dyn Searcher>>,
    pub tracker_searcher: Option<Arc<dyn Searcher>>,
    pub annotation_searcher: Option<Arc<dyn Searcher>>,
    pub template_searcher: Option<Arc<dyn Searcher>>,
    pub template_file_searcher: Option<Arc<dyn Searcher>>,
    pub detector: SourceRepositoryEnumerator,
    pub source_client: Arc<dyn SourceClient>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            components: Vec::new(),
            source_repositories: Vec::new(),
            environment: Vec::new(),
            docker_images: Vec::new(),
            templates: Vec::new(),
            name: None,
            strategy: None,
            dockerfile: None,
            context_dir: None,
            to: None,
            output_docker: false,
            no_output: false,
            expect_to_build: false,
            deploy: false,
            insecure_registry: false,
            add_environment_to_build: false,
            source_image: None,
            source_image_path: None,
            secrets: Vec::new(),
            labels: Labels::new(),
            namespace: "default".to_string(),
            docker_searcher: None,
            tracker_searcher: None,
            annotation_searcher: None,
            template_searcher: None,
            template_file_searcher: None,
            detector: SourceRepositoryEnumerator::new(),
            source_client: Arc::new(LocalSourceClient),
        }
    }
}

impl AppConfig {
    /// Classify raw arguments into components, source repositories and
    /// environment pairs. Returns the tokens that fit no category.
    ///
    /// A token lands in exactly one category: `key=value` is environment,
    /// URL/path/git-ref shapes are repositories, name shapes are components.
    pub fn add_arguments(&mut self, args: &[String]) -> Vec<String> {
        let mut unknown = Vec::new();
        for arg in args {
            if is_environment_argument(arg) {
                self.environment.push(arg.clone());
            } else if is_possible_source_repository(arg) {
                self.source_repositories.push(arg.clone());
            } else if is_component_reference(arg) {
                self.components.push(arg.clone());
            } else {
                unknown.push(arg.clone());
            }
        }
        unknown
    }

    /// Resolver for free-form component tokens: every configured backend.
    fn component_resolver(&self) -> Option<Arc<dyn Resolver>> {
        let searchers: Vec<Arc<dyn Searcher>> = [
            self.tracker_searcher.clone(),
            self.template_searcher.clone(),
            self.template_file_searcher.clone(),
            self.docker_searcher.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if searchers.is_empty() {
            return None;
        }
        Some(Arc::new(UniqueExactOrInexactMatchResolver {
            searcher: Arc::new(SearcherList { searchers }),
        }))
    }

    /// Resolver for explicit image inputs: docker backends only.
    fn image_resolver(&self) -> Option<Arc<dyn Resolver>> {
        let searcher = self.docker_searcher.clone()?;
        Some(Arc::new(UniqueExactOrInexactMatchResolver { searcher }))
    }

    /// Resolver for explicit template inputs.
    fn template_resolver(&self) -> Option<Arc<dyn Resolver>> {
        let searchers: Vec<Arc<dyn Searcher>> =
            [self.template_searcher.clone(), self.template_file_searcher.clone()]
                .into_iter()
                .flatten()
                .collect();
        if searchers.is_empty() {
            return None;
        }
        Some(Arc::new(UniqueExactOrInexactMatchResolver {
            searcher: Arc::new(SearcherList { searchers }),
        }))
    }

    /// Resolver for already-constrained references (a Dockerfile base image).
    fn precise_image_resolver(&self) -> Option<Arc<dyn Resolver>> {
        let searcher = self.docker_searcher.clone()?;
        Some(Arc::new(FirstMatchResolver { searchers: vec![searcher] }))
    }

    /// Run the pipeline.
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> Result<AppResult> {
        let mut errors = ResolutionErrors::default();
        let mut warnings = Vec::new();

        // Step 1: materialize inputs.
        let mut repositories = self.build_repositories()?;
        let mut inputs = self.build_inputs(&mut repositories)?;

        // An inline Dockerfile forces the docker strategy and cannot be
        // combined with an explicit source strategy or multiple repositories.
        let inline_dockerfile = match &self.dockerfile {
            Some(content) => {
                if self.strategy == Some(Strategy::Source) {
                    return Err(ForgeError::StrategyConflict);
                }
                if repositories.len() > 1 {
                    return Err(ForgeError::DockerfileWithMultipleRepositories);
                }
                let parsed = Dockerfile::parse(content)?;
                if parsed.base_image().is_none() {
                    return Err(ForgeError::MissingFromInstruction {
                        repository: repositories
                            .first()
                            .map(|r| r.location().to_string())
                            .unwrap_or_default(),
                    });
                }
                self.strategy = Some(Strategy::Docker);
                Some(parsed)
            }
            None => None,
        };

        // Step 2: resolve components and detect repositories concurrently.
        // Each item only writes its own slot, so the fan-out is unordered.
        let detection_handles = self.spawn_detection(&repositories);
        let resolve_errors = resolve_all(&mut inputs).await;
        errors.extend(self.filter_resolution_errors(resolve_errors));
        self.collect_detection(detection_handles, &mut repositories, &mut errors).await;

        // Steps 3-6: pair builders, assign references, emit the graph.
        let mut emitter = Emitter::new(self, &mut warnings);
        self.emit(&mut emitter, inline_dockerfile, &mut inputs, &repositories, &mut errors)
            .await?;
        let (graph, name) = emitter.finish();

        // Step 7: aggregate. Fatal errors returned earlier; zero errors
        // returns the graph.
        if !errors.is_empty() {
            return Err(ForgeError::Resolution(errors));
        }

        info!(name = %name, objects = graph.objects.len(), "generated object graph");
        Ok(AppResult { name, objects: graph, warnings })
    }

    fn build_repositories(&self) -> Result<Vec<SourceRepository>> {
        let mut repositories = Vec::new();
        for location in &self.source_repositories {
            repositories.push(
                SourceRepository::new(location)?.with_context_dir(self.context_dir.clone()),
            );
        }
        Ok(repositories)
    }

    fn build_inputs(&self, repositories: &mut Vec<SourceRepository>) -> Result<Vec<ComponentInput>> {
        let mut inputs: Vec<ComponentInput> = Vec::new();
        let mut group = 0;

        for token in &self.components {
            let mut parsed = ComponentInput::parse(token, group);
            for input in &mut parsed {
                if self.expect_to_build {
                    input.expect_to_build = true;
                }
                input.resolver = self.component_resolver();
                // A `builder~source` association contributes its own repository.
                if let Some(source) = &input.uses_source {
                    if !repositories.iter().any(|r| r.location() == source) {
                        repositories.push(
                            SourceRepository::new(source)?
                                .with_context_dir(self.context_dir.clone()),
                        );
                    }
                }
            }
            inputs.extend(parsed);
            group += 1;
        }

        for image in &self.docker_images {
            let mut parsed = ComponentInput::parse(image, group);
            for input in &mut parsed {
                input.resolver = self.image_resolver();
                if self.expect_to_build {
                    input.expect_to_build = true;
                }
            }
            inputs.extend(parsed);
            group += 1;
        }

        for template in &self.templates {
            let mut input = ComponentInput::parse(template, group);
            for i in &mut input {
                i.resolver = self.template_resolver();
            }
            inputs.extend(input);
            group += 1;
        }

        Ok(inputs)
    }

    /// Detection tasks fan out per repository; each returns the classified
    /// repository which is written back by index on collection.
    fn spawn_detection(
        &self,
        repositories: &[SourceRepository],
    ) -> Vec<tokio::task::JoinHandle<(usize, SourceRepository, Option<ForgeError>)>> {
        let mut handles = Vec::new();
        for (idx, repo) in repositories.iter().enumerate() {
            let detector = self.detector.clone();
            let client = Arc::clone(&self.source_client);
            let mut repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let err = detector.detect(client.as_ref(), &mut repo).await.err();
                (idx, repo, err)
            }));
        }
        handles
    }

    async fn collect_detection(
        &self,
        handles: Vec<tokio::task::JoinHandle<(usize, SourceRepository, Option<ForgeError>)>>,
        repositories: &mut [SourceRepository],
        errors: &mut ResolutionErrors,
    ) {
        for handle in handles {
            match handle.await {
                Ok((idx, repo, err)) => {
                    let location = repo.location().to_string();
                    repositories[idx] = repo;
                    if let Some(err) = err {
                        // A repository that cannot be inspected is a per-input
                        // failure, not a pipeline abort.
                        errors.push(ResolveError::NoMatch {
                            value: location,
                            errs: vec![SearchError::new("source detection", anyhow::Error::new(err))],
                        });
                    }
                }
                Err(join_err) => {
                    errors.push(ResolveError::NoMatch {
                        value: "source detection".to_string(),
                        errs: vec![SearchError::new("source detection", anyhow::Error::new(join_err))],
                    });
                }
            }
        }
    }

    /// Under the docker strategy the base image comes from a Dockerfile, so
    /// inputs that found no resolver are not failures.
    fn filter_resolution_errors(&self, mut errors: ResolutionErrors) -> ResolutionErrors {
        if self.strategy == Some(Strategy::Docker) {
            errors.retain(|e| !matches!(e, ResolveError::NoResolver { .. }));
        }
        errors
    }

    async fn resolve_source_image(
        &self,
        emitter: &mut Emitter<'_>,
        errors: &mut ResolutionErrors,
    ) -> Option<ImageSourceInput> {
        let value = self.source_image.as_deref()?;
        let resolver = self.image_resolver().or_else(|| self.precise_image_resolver());
        let m = match resolver {
            Some(resolver) => match resolver.resolve(value).await {
                Ok(m) => m,
                Err(err) => {
                    errors.push(err);
                    return None;
                }
            },
            None => {
                errors.push(ResolveError::NoResolver { value: value.to_string() });
                return None;
            }
        };

        let reference = m
            .reference
            .clone()
            .unwrap_or_else(|| ImageReference { name: m.name.clone(), ..Default::default() });
        let tracker = emitter.ensure_tracker_tag(
            &reference.name,
            reference.tag_or_default(),
            Some(reference.clone()),
        );

        let paths = match &self.source_image_path {
            Some(spec) => {
                let (source_path, destination_dir) = spec
                    .split_once(':')
                    .map(|(s, d)| (s.to_string(), d.to_string()))
                    .unwrap_or_else(|| (spec.to_string(), ".".to_string()));
                vec![ImageSourcePath { source_path, destination_dir }]
            }
            None => Vec::new(),
        };

        Some(ImageSourceInput {
            from: ObjectReference::tracker_tag(format!(
                "{}:{}",
                tracker,
                reference.tag_or_default()
            )),
            paths,
        })
    }

    async fn emit(
        &self,
        emitter: &mut Emitter<'_>,
        inline_dockerfile: Option<Dockerfile>,
        inputs: &mut [ComponentInput],
        repositories: &[SourceRepository],
        errors: &mut ResolutionErrors,
    ) -> Result<()> {
        let source_image_input = self.resolve_source_image(emitter, errors).await;
        let mut consumed = vec![false; inputs.len()];

        // Builds from source repositories.
        for repo in repositories {
            let docker_build = self.strategy == Some(Strategy::Docker)
                || (self.strategy.is_none()
                    && repo.info().map(|i| i.has_dockerfile()).unwrap_or(false));

            if docker_build {
                let dockerfile = match &inline_dockerfile {
                    Some(df) => Some(df.clone()),
                    None => repo.info().and_then(|i| i.dockerfile.clone()),
                };
                let Some(dockerfile) = dockerfile else {
                    // Strategy docker without any Dockerfile in sight.
                    errors.push(ResolveError::NoMatch {
                        value: repo.location().to_string(),
                        errs: vec![SearchError::new(
                            "docker build",
                            anyhow::anyhow!("no Dockerfile found in the repository"),
                        )],
                    });
                    continue;
                };
                self.emit_docker_build(
                    emitter,
                    repo,
                    &dockerfile,
                    self.dockerfile.clone(),
                    &source_image_input,
                )
                .await?;
            } else if self.strategy == Some(Strategy::Pipeline) {
                emitter.emit_pipeline_build(repo, &source_image_input)?;
            } else {
                // Source build: explicit builders win, detected terms otherwise.
                let mut paired = self.builders_for_repository(repo, inputs, &mut consumed);
                if paired.is_empty() {
                    match self.search_builder_for(repo).await {
                        Ok(m) => paired.push(m),
                        Err(err) => {
                            errors.push(err);
                            continue;
                        }
                    }
                }
                for builder in paired {
                    emitter.emit_source_build(repo, &builder, &source_image_input)?;
                }
            }
        }

        // A Dockerfile with no repository is its own build.
        if repositories.is_empty() {
            if let Some(dockerfile) = &inline_dockerfile {
                self.emit_docker_build_without_repo(
                    emitter,
                    dockerfile,
                    self.dockerfile.clone().unwrap_or_default(),
                    &source_image_input,
                )
                .await?;
            }
        }

        // Image builds with no repository: to-be-built components feeding on
        // image source inputs only.
        if repositories.is_empty() && inline_dockerfile.is_none() && self.expect_to_build {
            for (idx, input) in inputs.iter().enumerate() {
                if consumed[idx] {
                    continue;
                }
                let Some(m) = input.resolved.clone() else { continue };
                if m.reference.is_none() {
                    continue;
                }
                if source_image_input.is_some() {
                    consumed[idx] = true;
                    emitter.emit_image_only_build(&m, &source_image_input)?;
                }
            }
        }

        // Runtime components: templates and unconsumed images.
        let mut runtime: Vec<(usize, ComponentMatch)> = Vec::new();
        for (idx, input) in inputs.iter().enumerate() {
            if consumed[idx] {
                continue;
            }
            let Some(m) = &input.resolved else { continue };
            if let Some(template) = &m.template {
                debug!(template = %template.name, "expanding template objects");
                emitter.push_template_objects(template.objects.clone());
                continue;
            }
            if m.reference.is_some() {
                runtime.push((input.group, m.clone()));
            }
        }
        emitter.emit_runtime_groups(&runtime);

        // Builds implicitly deploy their output when deployment is requested.
        if self.deploy {
            emitter.emit_build_output_deployments();
        }

        Ok(())
    }

    /// Builders explicitly associated with a repository: a `~` link first,
    /// then (when building everything) every unconsumed image input, then the
    /// first unconsumed builder-capable match.
    fn builders_for_repository(
        &self,
        repo: &SourceRepository,
        inputs: &[ComponentInput],
        consumed: &mut [bool],
    ) -> Vec<ComponentMatch> {
        let mut builders = Vec::new();

        for (idx, input) in inputs.iter().enumerate() {
            if consumed[idx] {
                continue;
            }
            if input.uses_source.as_deref() == Some(repo.location()) {
                if let Some(m) = &input.resolved {
                    consumed[idx] = true;
                    builders.push(m.clone());
                }
            }
        }
        if !builders.is_empty() {
            return builders;
        }

        if self.expect_to_build {
            for (idx, input) in inputs.iter().enumerate() {
                if consumed[idx] {
                    continue;
                }
                if let Some(m) = &input.resolved {
                    if m.reference.is_some() {
                        consumed[idx] = true;
                        builders.push(m.clone());
                    }
                }
            }
            return builders;
        }

        for (idx, input) in inputs.iter().enumerate() {
            if consumed[idx] {
                continue;
            }
            if let Some(m) = &input.resolved {
                if m.builder {
                    consumed[idx] = true;
                    builders.push(m.clone());
                    break;
                }
            }
        }
        builders
    }

    /// Find a builder image for a repository from its detected terms.
    ///
    /// Backends cascade in priority order (annotation index, trackers,
    /// docker); within each backend the unique-match policy applies. The
    /// cascade keeps one backend's exact match from being declared ambiguous
    /// against another backend's.
    async fn search_builder_for(&self, repo: &SourceRepository) -> std::result::Result<ComponentMatch, ResolveError> {
        let terms: Vec<String> = repo.info().map(|i| i.terms().to_vec()).unwrap_or_default();
        let value = if terms.is_empty() { repo.location().to_string() } else { terms.join(",") };

        if terms.is_empty() {
            return Err(ResolveError::NoMatch {
                value,
                errs: vec![SearchError::new(
                    "builder search",
                    anyhow::anyhow!("no language detected in the repository"),
                )],
            });
        }

        let backends: Vec<Arc<dyn Searcher>> = [
            self.annotation_searcher.clone(),
            self.tracker_searcher.clone(),
            self.docker_searcher.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if backends.is_empty() {
            return Err(ResolveError::NoResolver { value });
        }

        let mut causes = Vec::new();
        for backend in backends {
            let resolver = UniqueExactOrInexactMatchResolver { searcher: backend };
            for term in &terms {
                match resolver.resolve(term).await {
                    Ok(m) => return Ok(m),
                    Err(ResolveError::NoMatch { errs, .. }) => causes.extend(errs),
                    Err(err @ ResolveError::MultipleMatches { .. }) => return Err(err),
                    Err(err) => {
                        debug!(term, error = %err, "builder term did not resolve");
                    }
                }
            }
        }
        causes.push(SearchError::new(
            "builder search",
            anyhow::anyhow!("no builder image matched the detected terms"),
        ));
        Err(ResolveError::NoMatch { value, errs: causes })
    }

    async fn emit_docker_build(
        &self,
        emitter: &mut Emitter<'_>,
        repo: &SourceRepository,
        dockerfile: &Dockerfile,
        inline_content: Option<String>,
        source_image_input: &Option<ImageSourceInput>,
    ) -> Result<()> {
        let base = dockerfile.base_image_reference()?.ok_or_else(|| {
            ForgeError::MissingFromInstruction { repository: repo.location().to_string() }
        })?;
        let base_match = self.resolve_base_image(&base).await;
        emitter.emit_docker_build_spec(
            Some(repo),
            &base,
            base_match,
            dockerfile.exposed_ports(),
            inline_content,
            source_image_input,
        )
    }

    async fn emit_docker_build_without_repo(
        &self,
        emitter: &mut Emitter<'_>,
        dockerfile: &Dockerfile,
        content: String,
        source_image_input: &Option<ImageSourceInput>,
    ) -> Result<()> {
        let base = dockerfile.base_image_reference()?.ok_or_else(|| {
            ForgeError::MissingFromInstruction { repository: String::new() }
        })?;
        let base_match = self.resolve_base_image(&base).await;
        emitter.emit_docker_build_spec(
            None,
            &base,
            base_match,
            dockerfile.exposed_ports(),
            Some(content),
            source_image_input,
        )
    }

    /// Resolving the base image of a docker build is best-effort: an
    /// unresolved base falls back to pulling at build time.
    async fn resolve_base_image(&self, base: &ImageReference) -> Option<ComponentMatch> {
        let resolver = self.precise_image_resolver()?;
        match resolver.resolve(&base.to_string()).await {
            Ok(m) => Some(m),
            Err(err) => {
                debug!(base = %base, error = %err, "base image not resolved, deferring to build time");
                None
            }
        }
    }
}

/// Accumulates generated objects during one run and owns the naming state.
struct Emitter<'a> {
    config: &'a AppConfig,
    warnings: &'a mut Vec<String>,
    refs: ReferenceBuilder,
    trackers: Vec<ImageTracker>,
    builds: Vec<BuildSpec>,
    deployments: Vec<DeploymentSpec>,
    services: Vec<ServiceSpec>,
    template_objects: Vec<GeneratedObject>,
    runtime_env: Environment,
    build_env: Environment,
    secrets: Vec<SecretMount>,
    /// Build outputs to deploy: (name, tracker tag, ports, volumes).
    build_outputs: Vec<(String, String, Vec<u16>, Vec<String>)>,
}

impl<'a> Emitter<'a> {
    fn new(config: &'a AppConfig, warnings: &'a mut Vec<String>) -> Self {
        let (runtime_env, invalid) = Environment::parse(&config.environment);
        for token in invalid {
            warnings.push(format!("ignoring malformed environment assignment {:?}", token));
        }
        let build_env =
            if config.add_environment_to_build { runtime_env.clone() } else { Environment::new() };
        let secrets = config.secrets.iter().map(|s| SecretMount::parse(s)).collect();

        Emitter {
            config,
            warnings,
            refs: ReferenceBuilder::new(),
            trackers: Vec::new(),
            builds: Vec::new(),
            deployments: Vec::new(),
            services: Vec::new(),
            template_objects: Vec::new(),
            runtime_env,
            build_env,
            secrets,
            build_outputs: Vec::new(),
        }
    }

    /// Ensure a tracker exists carrying `tag`; one tracker per distinct image
    /// name, with tags merged. Returns the tracker name actually used.
    fn ensure_tracker_tag(
        &mut self,
        base_name: &str,
        tag: &str,
        from: Option<ImageReference>,
    ) -> String {
        let insecure = self.config.insecure_registry
            && from.as_ref().is_some_and(|f| !f.tracker_local);

        if let Some(tracker) = self.trackers.iter_mut().find(|t| t.name == base_name) {
            if !tracker.has_tag(tag) {
                tracker.tags.push(TrackedTag { name: tag.to_string(), from });
            } else if let Some(from) = from {
                // An output placeholder tag learns its external source later.
                if let Some(existing) =
                    tracker.tags.iter_mut().find(|t| t.name == tag && t.from.is_none())
                {
                    existing.from = Some(from);
                }
            }
            if insecure {
                tracker
                    .annotations
                    .insert(INSECURE_REPOSITORY_ANNOTATION.to_string(), "true".to_string());
            }
            return tracker.name.clone();
        }

        let name = self.refs.reserve("ImageTracker", base_name);
        let mut annotations = std::collections::BTreeMap::new();
        if insecure {
            annotations.insert(INSECURE_REPOSITORY_ANNOTATION.to_string(), "true".to_string());
        }
        self.trackers.push(ImageTracker {
            name: name.clone(),
            annotations,
            tags: vec![TrackedTag { name: tag.to_string(), from }],
        });
        name
    }

    /// Compute the output reference for a build named after `default_name`.
    ///
    /// Returns `(app name, output reference, output identity)`; the identity
    /// feeds the circular check and is absent when output is suppressed.
    fn output_for(
        &mut self,
        default_name: &str,
    ) -> Result<(String, Option<ObjectReference>, Option<ImageReference>)> {
        let to_ref = match &self.config.to {
            Some(to) => Some(ImageReference::parse(to).map_err(|err| {
                ForgeError::InvalidOutputReference { value: to.clone(), reason: err.to_string() }
            })?),
            None => None,
        };

        let name = self
            .config
            .name
            .clone()
            .or_else(|| to_ref.as_ref().map(|r| r.name.clone()))
            .unwrap_or_else(|| default_name.to_string());

        if self.config.no_output {
            return Ok((name, None, None));
        }

        // Docker output writes straight to an external reference; no tracker.
        if self.config.output_docker {
            let identity = match &to_ref {
                Some(r) => r.clone(),
                None => ImageReference {
                    name: name.clone(),
                    tag: Some(DEFAULT_TAG.to_string()),
                    ..Default::default()
                },
            };
            let value = self
                .config
                .to
                .clone()
                .unwrap_or_else(|| format!("{}:{}", name, DEFAULT_TAG));
            return Ok((name, Some(ObjectReference::docker_image(value)), Some(identity)));
        }

        if let Some(to_ref) = to_ref {
            let tag = to_ref.tag_or_default().to_string();
            let tracker = self.ensure_tracker_tag(&to_ref.name, &tag, None);
            let identity = ImageReference {
                name: tracker.clone(),
                tag: Some(tag.clone()),
                tracker_local: true,
                ..Default::default()
            };
            return Ok((
                name,
                Some(ObjectReference::tracker_tag(format!("{}:{}", tracker, tag))),
                Some(identity),
            ));
        }

        let tracker = self.ensure_tracker_tag(&name, DEFAULT_TAG, None);
        let identity = ImageReference {
            name: tracker.clone(),
            tag: Some(DEFAULT_TAG.to_string()),
            tracker_local: true,
            ..Default::default()
        };
        Ok((
            name,
            Some(ObjectReference::tracker_tag(format!("{}:{}", tracker, DEFAULT_TAG))),
            Some(identity),
        ))
    }

    fn emit_docker_build_spec(
        &mut self,
        repo: Option<&SourceRepository>,
        base: &ImageReference,
        base_match: Option<ComponentMatch>,
        dockerfile_ports: Vec<u16>,
        inline_content: Option<String>,
        source_image_input: &Option<ImageSourceInput>,
    ) -> Result<()> {
        let default_name =
            repo.map(|r| r.name()).unwrap_or_else(|| base.suggest_name().to_string());
        let (name, output, output_identity) = self.output_for(&default_name)?;

        // The base image identity is always tracked; a resolved match only
        // enriches it with inspection data.
        let reference =
            base_match.as_ref().and_then(|m| m.reference.clone()).unwrap_or_else(|| base.clone());
        let tag = reference.tag_or_default().to_string();
        let tracker = self.ensure_tracker_tag(&reference.name, &tag, Some(reference.clone()));
        let from = Some(ObjectReference::tracker_tag(format!("{}:{}", tracker, tag)));

        // Circular output detection on tracker tag identity.
        if let Some(output_identity) = &output_identity {
            let input_identity = ImageReference {
                name: base.name.clone(),
                tag: Some(base.tag_or_default().to_string()),
                tracker_local: output_identity.tracker_local,
                ..Default::default()
            };
            let input_identity = if self.config.output_docker {
                base.clone()
            } else {
                input_identity
            };
            if let Some(warning) =
                check_circular_output(&input_identity, output_identity, self.config.to.is_some())?
            {
                warn!("{}", warning);
                self.warnings.push(warning);
            }
        }

        let build_name = self.refs.reserve("BuildSpec", &name);
        let ports = if dockerfile_ports.is_empty() {
            base_match
                .as_ref()
                .and_then(|m| m.image.as_ref())
                .map(|i| i.exposed_ports.clone())
                .unwrap_or_default()
        } else {
            dockerfile_ports
        };
        let volumes = base_match
            .as_ref()
            .and_then(|m| m.image.as_ref())
            .map(|i| i.volumes.clone())
            .unwrap_or_default();

        self.builds.push(BuildSpec {
            name: build_name.clone(),
            labels: Labels::new(),
            source: BuildSource {
                repository: repo.map(|r| r.repository_ref()),
                dockerfile: inline_content,
                images: source_image_input.clone().into_iter().collect(),
                secrets: self.secrets.clone(),
            },
            strategy: BuildStrategy::Docker { from, env: self.build_env.clone() },
            output,
        });
        self.record_build_output(&name, ports, volumes);
        Ok(())
    }

    fn emit_source_build(
        &mut self,
        repo: &SourceRepository,
        builder: &ComponentMatch,
        source_image_input: &Option<ImageSourceInput>,
    ) -> Result<()> {
        let (name, output, _) = self.output_for(&repo.name())?;

        let reference = builder.reference.clone().unwrap_or_else(|| ImageReference {
            name: builder.name.clone(),
            ..Default::default()
        });
        let tag = reference.tag_or_default().to_string();
        let tracker = self.ensure_tracker_tag(&reference.name, &tag, Some(reference.clone()));
        let from = ObjectReference::tracker_tag(format!("{}:{}", tracker, tag));

        let build_name = self.refs.reserve("BuildSpec", &name);
        let summary = builder.image.clone().unwrap_or_default();

        self.builds.push(BuildSpec {
            name: build_name.clone(),
            labels: Labels::new(),
            source: BuildSource {
                repository: Some(repo.repository_ref()),
                dockerfile: None,
                images: source_image_input.clone().into_iter().collect(),
                secrets: self.secrets.clone(),
            },
            strategy: BuildStrategy::Source { from, env: self.build_env.clone() },
            output,
        });
        self.record_build_output(&name, summary.exposed_ports, summary.volumes);
        Ok(())
    }

    fn emit_pipeline_build(
        &mut self,
        repo: &SourceRepository,
        source_image_input: &Option<ImageSourceInput>,
    ) -> Result<()> {
        let (name, output, _) = self.output_for(&repo.name())?;
        let build_name = self.refs.reserve("BuildSpec", &name);
        self.builds.push(BuildSpec {
            name: build_name,
            labels: Labels::new(),
            source: BuildSource {
                repository: Some(repo.repository_ref()),
                dockerfile: None,
                images: source_image_input.clone().into_iter().collect(),
                secrets: self.secrets.clone(),
            },
            strategy: BuildStrategy::Pipeline { env: self.build_env.clone() },
            output,
        });
        // Pipeline builds run externally; nothing to deploy here.
        Ok(())
    }

    fn emit_image_only_build(
        &mut self,
        builder: &ComponentMatch,
        source_image_input: &Option<ImageSourceInput>,
    ) -> Result<()> {
        let reference = builder.reference.clone().unwrap_or_else(|| ImageReference {
            name: builder.name.clone(),
            ..Default::default()
        });
        let (name, output, _) = self.output_for(reference.suggest_name())?;

        let tag = reference.tag_or_default().to_string();
        let tracker = self.ensure_tracker_tag(&reference.name, &tag, Some(reference.clone()));
        let from = ObjectReference::tracker_tag(format!("{}:{}", tracker, tag));

        let build_name = self.refs.reserve("BuildSpec", &name);
        let summary = builder.image.clone().unwrap_or_default();
        self.builds.push(BuildSpec {
            name: build_name.clone(),
            labels: Labels::new(),
            source: BuildSource {
                repository: None,
                dockerfile: None,
                images: source_image_input.clone().into_iter().collect(),
                secrets: self.secrets.clone(),
            },
            strategy: BuildStrategy::Source { from, env: self.build_env.clone() },
            output,
        });
        self.record_build_output(&name, summary.exposed_ports, summary.volumes);
        Ok(())
    }

    /// Remember a build output for deployment, keyed by the output tracker.
    fn record_build_output(&mut self, app_name: &str, ports: Vec<u16>, volumes: Vec<String>) {
        if self.config.no_output || self.config.output_docker {
            return;
        }
        self.build_outputs.push((
            app_name.to_string(),
            format!("{}:{}", app_name, DEFAULT_TAG),
            ports,
            volumes,
        ));
    }

    /// One deployment per build output, when deployment was requested.
    fn emit_build_output_deployments(&mut self) {
        let outputs = std::mem::take(&mut self.build_outputs);
        for (app_name, image, ports, volumes) in outputs {
            let summary = ImageSummary { env: Vec::new(), exposed_ports: ports, volumes };
            self.emit_deployment(&app_name, vec![(app_name.clone(), image, summary)]);
        }
    }

    /// Deployments for runtime component groups: one deployment per group,
    /// one container per component.
    fn emit_runtime_groups(&mut self, runtime: &[(usize, ComponentMatch)]) {
        if !self.config.deploy {
            // Still track the images so they are importable later.
            for (_, m) in runtime {
                if let Some(reference) = &m.reference {
                    let name = self
                        .config
                        .name
                        .clone()
                        .unwrap_or_else(|| reference.suggest_name().to_string());
                    self.ensure_tracker_tag(
                        &name,
                        reference.tag_or_default(),
                        Some(reference.clone()),
                    );
                }
            }
            return;
        }

        let mut groups: Vec<usize> = runtime.iter().map(|(g, _)| *g).collect();
        groups.dedup();

        for group in groups {
            let members: Vec<&ComponentMatch> =
                runtime.iter().filter(|(g, _)| *g == group).map(|(_, m)| m).collect();
            let Some(first) = members.first() else { continue };

            let first_ref = first.reference.clone().unwrap_or_default();
            let base_name = self
                .config
                .name
                .clone()
                .unwrap_or_else(|| first_ref.suggest_name().to_string());

            let mut containers = Vec::new();
            for m in &members {
                let reference = m.reference.clone().unwrap_or_default();
                let tag = reference.tag_or_default().to_string();
                let tracker_base = if members.len() == 1 {
                    base_name.clone()
                } else {
                    reference.suggest_name().to_string()
                };
                let tracker =
                    self.ensure_tracker_tag(&tracker_base, &tag, Some(reference.clone()));
                let summary = m.image.clone().unwrap_or_default();
                containers.push((
                    tracker.clone(),
                    format!("{}:{}", tracker, tag),
                    summary,
                ));
            }
            self.emit_deployment(&base_name, containers);
        }
    }

    /// Emit one deployment spec (and its service when ports exist).
    ///
    /// Image-declared volumes with no backing store become EmptyDir pod
    /// volumes named `<container>-volume-<n>`.
    fn emit_deployment(&mut self, base_name: &str, containers: Vec<(String, String, ImageSummary)>) {
        let name = self.refs.reserve("DeploymentSpec", base_name);

        let mut selector = Labels::new();
        selector.insert("app".to_string(), name.clone());
        for (k, v) in &self.config.labels {
            selector.insert(k.clone(), v.clone());
        }

        let mut volumes = Vec::new();
        let mut specs = Vec::new();
        let mut first_ports: Vec<u16> = Vec::new();
        let mut used_names = std::collections::HashSet::new();

        for (container_name, image, summary) in containers {
            let mut container_name = container_name;
            let mut counter = 1;
            while !used_names.insert(container_name.clone()) {
                container_name = format!("{}-{}", container_name, counter);
                counter += 1;
            }

            let mut volume_mounts = Vec::new();
            for (idx, path) in summary.volumes.iter().enumerate() {
                let volume_name = format!("{}-volume-{}", container_name, idx + 1);
                volume_mounts
                    .push(VolumeMount { name: volume_name.clone(), mount_path: path.clone() });
                volumes.push(Volume { name: volume_name, source: VolumeSource::EmptyDir });
            }

            if first_ports.is_empty() {
                first_ports = summary.exposed_ports.clone();
            }
            specs.push(Container {
                name: container_name,
                image,
                env: self.runtime_env.clone(),
                ports: summary.exposed_ports.clone(),
                volume_mounts,
            });
        }

        self.deployments.push(DeploymentSpec {
            name: name.clone(),
            labels: Labels::new(),
            selector: selector.clone(),
            replicas: 1,
            containers: specs,
            volumes,
        });

        // A service exposes the first declared port.
        if let Some(port) = first_ports.first().copied() {
            let service_name = self.refs.reserve("Service", &name);
            self.services.push(ServiceSpec {
                name: service_name,
                labels: Labels::new(),
                selector,
                ports: vec![ServicePort { port, target_port: port }],
            });
        }
    }

    fn push_template_objects(&mut self, objects: Vec<GeneratedObject>) {
        for mut object in objects {
            // Template object names still pass through the collision registry.
            let reserved = self.refs.reserve(object.kind(), object.name());
            if reserved != object.name() {
                match &mut object {
                    GeneratedObject::ImageTracker(o) => o.name = reserved,
                    GeneratedObject::BuildSpec(o) => o.name = reserved,
                    GeneratedObject::DeploymentSpec(o) => o.name = reserved,
                    GeneratedObject::Service(o) => o.name = reserved,
                }
            }
            self.template_objects.push(object);
        }
    }

    fn finish(self) -> (ObjectGraph, String) {
        let mut graph = ObjectGraph::default();
        let name = self
            .config
            .name
            .clone()
            .or_else(|| self.builds.first().map(|b| b.name.clone()))
            .or_else(|| self.deployments.first().map(|d| d.name.clone()))
            .or_else(|| self.trackers.first().map(|t| t.name.clone()))
            .unwrap_or_default();

        for tracker in self.trackers {
            graph.push(GeneratedObject::ImageTracker(tracker));
        }
        for build in self.builds {
            graph.push(GeneratedObject::BuildSpec(build));
        }
        for deployment in self.deployments {
            graph.push(GeneratedObject::DeploymentSpec(deployment));
        }
        for service in self.services {
            graph.push(GeneratedObject::Service(service));
        }
        for object in self.template_objects {
            graph.push(object);
        }

        for object in &mut graph.objects {
            object.apply_labels(&self.config.labels);
        }

        (graph, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_arguments_classification() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().to_str().unwrap().to_string();

        let cases: Vec<(Vec<&str>, Vec<&str>, Vec<&str>, Vec<&str>, Vec<&str>)> = vec![
            // args, env, repos, components, unknown
            (
                vec!["one", "two+three", "four~five"],
                vec![],
                vec![],
                vec!["one", "two+three", "four~five"],
                vec![],
            ),
            (
                vec![".", local.as_str(), "git://github.com/example/origin.git"],
                vec![],
                vec![".", local.as_str(), "git://github.com/example/origin.git"],
                vec![],
                vec![],
            ),
            (
                vec!["https://github.com/example/ruby-hello-world#beta4"],
                vec![],
                vec!["https://github.com/example/ruby-hello-world#beta4"],
                vec![],
                vec![],
            ),
            (
                vec!["first=one", "second=two", "third=three"],
                vec!["first=one", "second=two", "third=three"],
                vec![],
                vec![],
                vec![],
            ),
            (
                vec![
                    "git://github.com/example/origin.git",
                    "mysql+ruby~git@github.com/example/origin.git",
                    "env1=test",
                    "ruby-helloworld-sample",
                ],
                vec!["env1=test"],
                vec!["git://github.com/example/origin.git"],
                vec!["mysql+ruby~git@github.com/example/origin.git", "ruby-helloworld-sample"],
                vec![],
            ),
        ];

        for (args, env, repos, components, unknown) in cases {
            let mut config = AppConfig::default();
            let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            let got_unknown = config.add_arguments(&args);

            let expect = |items: Vec<&str>| -> Vec<String> {
                items.iter().map(|s| s.to_string()).collect::<Vec<_>>()
            };
            assert_eq!(config.environment, expect(env), "env for {:?}", args);
            assert_eq!(config.source_repositories, expect(repos), "repos for {:?}", args);
            assert_eq!(config.components, expect(components), "components for {:?}", args);
            assert_eq!(got_unknown, expect(unknown), "unknown for {:?}", args);
        }
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("docker".parse::<Strategy>().unwrap(), Strategy::Docker);
        assert_eq!("source".parse::<Strategy>().unwrap(), Strategy::Source);
        assert_eq!("pipeline".parse::<Strategy>().unwrap(), Strategy::Pipeline);
        assert!("jenkins".parse::<Strategy>().is_err());
    }
}
