//! Environment and secret argument parsing.

use serde::{Deserialize, Serialize};

/// An ordered list of environment variable bindings.
///
/// Insertion order is preserved and the first occurrence of a key wins; later
/// duplicates are dropped rather than overwriting. This matches how the
/// bindings are eventually rendered into container specs, where ordering is
/// visible to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment(Vec<(String, String)>);

impl Environment {
    pub fn new() -> Self {
        Environment(Vec::new())
    }

    /// Parse `KEY=VALUE` tokens. Returns the parsed environment plus the
    /// tokens that were not valid assignments.
    pub fn parse(tokens: &[String]) -> (Environment, Vec<String>) {
        let mut env = Environment::new();
        let mut invalid = Vec::new();
        for token in tokens {
            match token.split_once('=') {
                Some((key, value)) if !key.is_empty() => env.add(key, value),
                _ => invalid.push(token.clone()),
            }
        }
        (env, invalid)
    }

    /// Add a binding; a duplicate key is ignored.
    pub fn add(&mut self, key: &str, value: &str) {
        if !self.contains(key) {
            self.0.push((key.to_string(), value.to_string()));
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }
}

/// A secret mount request: the secret name plus the destination directory the
/// build exposes it at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMount {
    pub name: String,
    pub destination: String,
}

impl SecretMount {
    /// Parse a `name[:destination]` spec. A bare name mounts at `.`.
    pub fn parse(spec: &str) -> SecretMount {
        match spec.split_once(':') {
            Some((name, dest)) if !dest.is_empty() => {
                SecretMount { name: name.to_string(), destination: dest.to_string() }
            }
            Some((name, _)) => SecretMount { name: name.to_string(), destination: ".".to_string() },
            None => SecretMount { name: spec.to_string(), destination: ".".to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_preserves_order() {
        let (env, invalid) = Environment::parse(&strings(&["B=2", "A=1", "C=3"]));
        assert!(invalid.is_empty());
        let keys: Vec<_> = env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_first_occurrence_wins() {
        let (env, _) = Environment::parse(&strings(&["A=first", "A=second"]));
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("A"), Some("first"));
    }

    #[test]
    fn test_invalid_tokens_reported() {
        let (env, invalid) = Environment::parse(&strings(&["A=1", "not-an-assignment", "=x"]));
        assert_eq!(env.len(), 1);
        assert_eq!(invalid, strings(&["not-an-assignment", "=x"]));
    }

    #[test]
    fn test_secret_with_destination() {
        let s = SecretMount::parse("foo:/var");
        assert_eq!(s.name, "foo");
        assert_eq!(s.destination, "/var");
    }

    #[test]
    fn test_secret_defaults_to_current_dir() {
        let s = SecretMount::parse("bar");
        assert_eq!(s.name, "bar");
        assert_eq!(s.destination, ".");
    }
}
