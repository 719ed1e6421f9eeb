//! Orchestration API submission.
//!
//! The pipeline never talks to the cluster while generating; submission
//! happens only once the whole graph exists, so a failed run leaves nothing
//! half-created by this code path.

use crate::error::Result;
use crate::generate::objects::{GeneratedObject, ObjectGraph};
use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, instrument};

/// Create/list access to the orchestration API, per generated object kind.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create(&self, namespace: &str, object: &GeneratedObject) -> anyhow::Result<()>;

    /// Names of existing objects of one kind, for collision reporting.
    async fn list_names(&self, namespace: &str, kind: &str) -> anyhow::Result<Vec<String>>;
}

/// Submit a finished graph, one object at a time, in graph order.
#[instrument(skip(client, graph), fields(namespace = %namespace, objects = graph.objects.len()))]
pub async fn submit_graph(
    client: &dyn ClusterClient,
    namespace: &str,
    graph: &ObjectGraph,
) -> Result<()> {
    for object in &graph.objects {
        client
            .create(namespace, object)
            .await
            .with_context(|| format!("creating {} {:?}", object.kind(), object.name()))?;
        info!(kind = object.kind(), name = object.name(), "created object");
    }
    Ok(())
}
