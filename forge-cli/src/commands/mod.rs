//! CLI command implementations

pub mod new;
pub mod search;

use forge_core::credentials::{BasicCredentials, CredentialStore, NoCredentials};
use forge_core::search::{
    DockerClientSearcher, DockerRegistrySearcher, HubRegistryClient, Searcher,
    TemplateFileSearcher,
};
use std::sync::Arc;
use std::time::Duration;

/// Wire the default searcher stack: the public registry behind the docker
/// searcher, plus local template files.
pub fn default_searchers(
    timeout: Duration,
    insecure: bool,
    registry_auth: Option<&str>,
) -> anyhow::Result<(Arc<dyn Searcher>, Arc<dyn Searcher>)> {
    let credentials: Arc<dyn CredentialStore> = match registry_auth {
        Some(auth) => {
            let (username, password) = auth
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("--registry-auth must be USER:PASSWORD"))?;
            let mut store = BasicCredentials::new();
            store.add("", "", username, password);
            Arc::new(store)
        }
        None => Arc::new(NoCredentials),
    };

    let registry = HubRegistryClient::new(timeout, insecure, credentials)?;
    let docker_searcher: Arc<dyn Searcher> = Arc::new(DockerClientSearcher {
        client: None,
        registry_searcher: Some(Arc::new(DockerRegistrySearcher { client: Arc::new(registry) })),
        insecure,
    });
    let template_files: Arc<dyn Searcher> = Arc::new(TemplateFileSearcher);
    Ok((docker_searcher, template_files))
}
