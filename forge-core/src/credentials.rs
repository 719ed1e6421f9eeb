//! Registry credential stores.
//!
//! Searchers that talk to authenticated registries resolve credentials
//! through the [`CredentialStore`] trait. Stores never fail a lookup: a store
//! that cannot materialize its backing keyring degrades to anonymous access
//! and records the error for later inspection.

use std::sync::Mutex;
use tracing::debug;

/// Provides basic-auth credentials for a registry URL.
///
/// Implementations are read-only and safely shared across concurrent
/// resolutions. The `url` argument is `host[/path]` without a scheme.
pub trait CredentialStore: Send + Sync {
    /// Returns `(username, password)`, empty strings when anonymous.
    fn basic(&self, url: &str) -> (String, String);
}

/// A store that always answers anonymously.
#[derive(Debug, Default)]
pub struct NoCredentials;

impl CredentialStore for NoCredentials {
    fn basic(&self, url: &str) -> (String, String) {
        debug!("asked to provide basic credentials for {}", url);
        (String::new(), String::new())
    }
}

/// An explicit, ordered list of basic-auth entries.
///
/// An empty host or path acts as a wildcard; the first matching entry wins.
#[derive(Debug, Default)]
pub struct BasicCredentials {
    entries: Vec<BasicEntry>,
}

#[derive(Debug)]
struct BasicEntry {
    host: String,
    path: String,
    username: String,
    password: String,
}

impl BasicCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, host: &str, path: &str, username: &str, password: &str) {
        self.entries.push(BasicEntry {
            host: host.to_string(),
            path: path.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        });
    }
}

impl CredentialStore for BasicCredentials {
    fn basic(&self, url: &str) -> (String, String) {
        let (host, path) = split_host_path(url);
        for entry in &self.entries {
            if !entry.host.is_empty() && entry.host != host {
                continue;
            }
            if !entry.path.is_empty() && entry.path != path {
                continue;
            }
            return (entry.username.clone(), entry.password.clone());
        }
        (String::new(), String::new())
    }
}

/// A declarative registry secret, the input to [`SecretCredentialStore`].
#[derive(Debug, Clone)]
pub struct RegistrySecret {
    /// Server address the secret applies to, e.g. `quay.io` or
    /// `index.docker.io/v1`.
    pub server: String,
    pub username: String,
    pub password: String,
}

type SecretsFn = Box<dyn Fn() -> anyhow::Result<Vec<RegistrySecret>> + Send + Sync>;

/// A credential store backed by a declarative secret list.
///
/// The keyring is materialized at most once, on first lookup, behind a mutex;
/// a materialization error is captured and the store degrades to anonymous
/// lookups instead of failing resolution.
pub struct SecretCredentialStore {
    state: Mutex<KeyringState>,
}

struct KeyringState {
    secrets_fn: Option<SecretsFn>,
    keyring: Option<Keyring>,
    error: Option<String>,
}

impl SecretCredentialStore {
    pub fn new(secrets: Vec<RegistrySecret>) -> Self {
        SecretCredentialStore {
            state: Mutex::new(KeyringState {
                secrets_fn: Some(Box::new(move || Ok(secrets.clone()))),
                keyring: None,
                error: None,
            }),
        }
    }

    /// Defer loading the secret list until the first lookup.
    pub fn lazy(secrets_fn: impl Fn() -> anyhow::Result<Vec<RegistrySecret>> + Send + Sync + 'static) -> Self {
        SecretCredentialStore {
            state: Mutex::new(KeyringState {
                secrets_fn: Some(Box::new(secrets_fn)),
                keyring: None,
                error: None,
            }),
        }
    }

    /// The error captured during keyring materialization, if any.
    pub fn error(&self) -> Option<String> {
        self.state.lock().expect("credential store lock poisoned").error.clone()
    }

    fn with_keyring<T>(&self, f: impl FnOnce(&Keyring) -> T) -> T {
        let mut state = self.state.lock().expect("credential store lock poisoned");
        if state.keyring.is_none() {
            let secrets = match state.secrets_fn.take() {
                Some(load) => match load() {
                    Ok(secrets) => secrets,
                    Err(err) => {
                        debug!("loading keyring failed for credential store: {}", err);
                        state.error = Some(err.to_string());
                        Vec::new()
                    }
                },
                None => Vec::new(),
            };
            state.keyring = Some(Keyring::from_secrets(&secrets));
        }
        f(state.keyring.as_ref().expect("keyring initialized above"))
    }
}

impl CredentialStore for SecretCredentialStore {
    fn basic(&self, url: &str) -> (String, String) {
        self.with_keyring(|keyring| keyring.lookup(url))
    }
}

/// An index of server address to credentials.
struct Keyring {
    entries: Vec<(String, String, String)>,
}

impl Keyring {
    fn from_secrets(secrets: &[RegistrySecret]) -> Keyring {
        let entries = secrets
            .iter()
            .map(|s| {
                let key = s.server.trim_start_matches("https://").trim_start_matches("http://");
                (key.trim_end_matches('/').to_string(), s.username.clone(), s.password.clone())
            })
            .collect();
        Keyring { entries }
    }

    fn lookup(&self, target: &str) -> (String, String) {
        let value = target.trim_end_matches('/');
        if let Some((_, user, pass)) = self.entries.iter().find(|(key, _, _)| key == value) {
            debug!("found secret to match {}", target);
            return (user.clone(), pass.clone());
        }
        // Historical docker.io lookups answer token challenges against the
        // legacy index host. One-level retry only.
        if value == "auth.docker.io/token" {
            debug!("being asked for {}, trying index.docker.io/v1 for legacy behavior", target);
            return self.lookup("index.docker.io/v1");
        }
        debug!("unable to find a secret to match {}", target);
        (String::new(), String::new())
    }
}

fn split_host_path(url: &str) -> (&str, &str) {
    match url.split_once('/') {
        Some((host, path)) => (host, path),
        None => (url, ""),
    }
}
