//! Generated workload descriptors.
//!
//! The output of a generation run is an [`ObjectGraph`]: a set of descriptors
//! keyed by kind and name, ready to be submitted to the orchestration API.
//! The graph holds a tagged [`GeneratedObject`] per descriptor so callers can
//! match exhaustively instead of inspecting runtime types.

use crate::env::{Environment, SecretMount};
use crate::reference::ImageReference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation marking a tracker as fed from an insecure (plain HTTP) registry.
pub const INSECURE_REPOSITORY_ANNOTATION: &str = "forge.io/insecure-repository";

/// Annotation on cluster trackers listing the languages a builder supports.
pub const SUPPORTS_ANNOTATION: &str = "forge.io/supports";

/// Labels applied to generated objects and selectors.
pub type Labels = BTreeMap<String, String>;

/// A reference from one generated object to an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub kind: ReferenceKind,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// What an [`ObjectReference`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// A `name:tag` entry of a cluster-local image tracker.
    TrackerTag,

    /// A raw external image reference.
    DockerImage,
}

impl ObjectReference {
    pub fn tracker_tag(name: impl Into<String>) -> Self {
        ObjectReference { kind: ReferenceKind::TrackerTag, name: name.into(), namespace: None }
    }

    pub fn docker_image(name: impl Into<String>) -> Self {
        ObjectReference { kind: ReferenceKind::DockerImage, name: name.into(), namespace: None }
    }
}

/// Tracks one or more tagged versions of an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTracker {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TrackedTag>,
}

/// One tracked tag; `from` names the external image feeding the tag, absent
/// for tags populated by build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedTag {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<ImageReference>,
}

impl ImageTracker {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.name == tag)
    }
}

/// Where a build takes its source from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSource {
    /// Source repository location, when building from a repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryRef>,

    /// Inline Dockerfile content, when one was supplied directly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,

    /// Images whose content is copied into the build context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageSourceInput>,

    /// Secrets mounted into the build.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretMount>,
}

/// A source repository location as recorded on a build spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub location: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
}

/// An image-source input: copy paths out of an image into the build context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSourceInput {
    pub from: ObjectReference,
    pub paths: Vec<ImageSourcePath>,
}

/// A `source:destination` copy pair for an image-source input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSourcePath {
    pub source_path: String,
    pub destination_dir: String,
}

/// How a build turns source into an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuildStrategy {
    /// Source build on top of a builder image.
    Source { from: ObjectReference, env: Environment },

    /// Docker build; `from` overrides the Dockerfile base image when set.
    Docker { from: Option<ObjectReference>, env: Environment },

    /// Externally executed pipeline build.
    Pipeline { env: Environment },
}

impl BuildStrategy {
    pub fn env(&self) -> &Environment {
        match self {
            BuildStrategy::Source { env, .. }
            | BuildStrategy::Docker { env, .. }
            | BuildStrategy::Pipeline { env } => env,
        }
    }
}

/// Describes how to produce an image from source or a Dockerfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,

    pub source: BuildSource,
    pub strategy: BuildStrategy,

    /// Destination of the built image; `None` discards the output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ObjectReference>,
}

/// A container within a deployment specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,

    #[serde(default, skip_serializing_if = "Environment::is_empty")]
    pub env: Environment,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

/// A pod-level volume backing one or more mounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

/// Backing store of a generated volume. Declared-but-unbacked image volumes
/// always land on an empty directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeSource {
    EmptyDir,
}

/// Describes how to run a resolved or built image.
///
/// Generated pods carry exactly the selector labels, which keeps the label
/// selector and pod labels consistent by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,

    pub selector: Labels,
    pub replicas: u32,
    pub containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub port: u16,
    pub target_port: u16,
}

/// Exposes a deployment's first declared port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,

    pub selector: Labels,
    pub ports: Vec<ServicePort>,
}

/// One generated descriptor, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum GeneratedObject {
    ImageTracker(ImageTracker),
    BuildSpec(BuildSpec),
    DeploymentSpec(DeploymentSpec),
    Service(ServiceSpec),
}

impl GeneratedObject {
    pub fn kind(&self) -> &'static str {
        match self {
            GeneratedObject::ImageTracker(_) => "ImageTracker",
            GeneratedObject::BuildSpec(_) => "BuildSpec",
            GeneratedObject::DeploymentSpec(_) => "DeploymentSpec",
            GeneratedObject::Service(_) => "Service",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            GeneratedObject::ImageTracker(o) => &o.name,
            GeneratedObject::BuildSpec(o) => &o.name,
            GeneratedObject::DeploymentSpec(o) => &o.name,
            GeneratedObject::Service(o) => &o.name,
        }
    }

    /// Apply labels to the object, without overwriting existing keys.
    pub fn apply_labels(&mut self, labels: &Labels) {
        let target = match self {
            GeneratedObject::ImageTracker(_) => return,
            GeneratedObject::BuildSpec(o) => &mut o.labels,
            GeneratedObject::DeploymentSpec(o) => &mut o.labels,
            GeneratedObject::Service(o) => &mut o.labels,
        };
        for (k, v) in labels {
            target.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

/// The set of generated descriptors. Names are unique within a kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectGraph {
    pub objects: Vec<GeneratedObject>,
}

impl ObjectGraph {
    pub fn push(&mut self, object: GeneratedObject) {
        self.objects.push(object);
    }

    pub fn contains(&self, kind: &str, name: &str) -> bool {
        self.objects.iter().any(|o| o.kind() == kind && o.name() == name)
    }

    pub fn names_of_kind(&self, kind: &str) -> Vec<&str> {
        self.objects.iter().filter(|o| o.kind() == kind).map(|o| o.name()).collect()
    }

    pub fn trackers(&self) -> impl Iterator<Item = &ImageTracker> {
        self.objects.iter().filter_map(|o| match o {
            GeneratedObject::ImageTracker(t) => Some(t),
            _ => None,
        })
    }

    pub fn builds(&self) -> impl Iterator<Item = &BuildSpec> {
        self.objects.iter().filter_map(|o| match o {
            GeneratedObject::BuildSpec(b) => Some(b),
            _ => None,
        })
    }

    pub fn deployments(&self) -> impl Iterator<Item = &DeploymentSpec> {
        self.objects.iter().filter_map(|o| match o {
            GeneratedObject::DeploymentSpec(d) => Some(d),
            _ => None,
        })
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.objects.iter().filter_map(|o| match o {
            GeneratedObject::Service(s) => Some(s),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_name() {
        let object = GeneratedObject::ImageTracker(ImageTracker {
            name: "ruby".to_string(),
            ..Default::default()
        });
        assert_eq!(object.kind(), "ImageTracker");
        assert_eq!(object.name(), "ruby");
    }

    #[test]
    fn test_apply_labels_keeps_existing() {
        let mut object = GeneratedObject::Service(ServiceSpec {
            name: "web".to_string(),
            labels: Labels::from([("app".to_string(), "web".to_string())]),
            selector: Labels::new(),
            ports: vec![],
        });
        let extra = Labels::from([
            ("app".to_string(), "other".to_string()),
            ("tier".to_string(), "frontend".to_string()),
        ]);
        object.apply_labels(&extra);

        let GeneratedObject::Service(service) = object else { unreachable!() };
        assert_eq!(service.labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(service.labels.get("tier").map(String::as_str), Some("frontend"));
    }

    #[test]
    fn test_graph_serializes_with_kind_tag() {
        let mut graph = ObjectGraph::default();
        graph.push(GeneratedObject::ImageTracker(ImageTracker {
            name: "mysql".to_string(),
            ..Default::default()
        }));
        let json = serde_json::to_string(&graph).unwrap();
        assert!(json.contains("\"kind\":\"ImageTracker\""));
    }
}
