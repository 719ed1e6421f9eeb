//! Object naming and build output reference checks.
//!
//! The [`ReferenceBuilder`] hands out object names that are unique per kind
//! within one generation run, and validates that a build's output reference
//! is not its own input.

use crate::error::{ForgeError, Result};
use crate::reference::ImageReference;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Allocates collision-free object names, scoped per kind per run.
#[derive(Debug, Default)]
pub struct ReferenceBuilder {
    taken: HashMap<String, HashSet<String>>,
}

impl ReferenceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a name for `kind`, appending `-1`, `-2`, … when the base name
    /// is already taken by another object of the same kind.
    pub fn reserve(&mut self, kind: &str, base: &str) -> String {
        let taken = self.taken.entry(kind.to_string()).or_default();
        let name = if taken.insert(base.to_string()) {
            base.to_string()
        } else {
            let mut counter = 1;
            loop {
                let candidate = format!("{}-{}", base, counter);
                if taken.insert(candidate.clone()) {
                    break candidate;
                }
                counter += 1;
            }
        };
        if name != base {
            debug!(kind, base, name = %name, "deduplicated object name");
        }
        name
    }

    pub fn is_taken(&self, kind: &str, name: &str) -> bool {
        self.taken.get(kind).is_some_and(|names| names.contains(name))
    }
}

/// Validate a build's input against its output reference.
///
/// Identity comparison happens on the normalized registry/namespace/name/tag
/// form, never on string equality. Identical identities are fatal unless the
/// output was requested explicitly with `--to`; explicit intent downgrades
/// the failure to a returned warning.
pub fn check_circular_output(
    input: &ImageReference,
    output: &ImageReference,
    explicit_to: bool,
) -> Result<Option<String>> {
    if !input.same_identity(output) {
        return Ok(None);
    }
    let normalized = input.docker_client_defaults().to_string();
    if explicit_to {
        return Ok(Some(format!(
            "the input and output image tracker tags are identical ({:?})",
            normalized
        )));
    }
    Err(ForgeError::CircularOutputReference { reference: normalized })
}
