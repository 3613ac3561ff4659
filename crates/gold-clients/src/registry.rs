// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed registries of named review/CI clients.
//!
//! Ingesters are constructed from config strings; the registry is what lets
//! a string like "gerrit" resolve to a client without compile-time
//! coupling.

use crate::traits::{CodeReviewClient, ContinuousIntegrationClient};
use std::collections::HashMap;
use std::sync::Arc;

/// A registry of named [`CodeReviewClient`]s and
/// [`ContinuousIntegrationClient`]s.
#[derive(Default)]
pub struct SystemRegistry {
    crs: HashMap<String, Arc<dyn CodeReviewClient>>,
    cis: HashMap<String, Arc<dyn ContinuousIntegrationClient>>,
}

impl SystemRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a code-review client under its system name, replacing any
    /// previous entry.
    pub fn register_crs(&mut self, client: impl CodeReviewClient + 'static) {
        self.crs.insert(client.system().to_string(), Arc::new(client));
    }

    /// Register a CI client under its system name, replacing any previous
    /// entry.
    pub fn register_cis(&mut self, client: impl ContinuousIntegrationClient + 'static) {
        self.cis.insert(client.system().to_string(), Arc::new(client));
    }

    /// Look up a code-review client by system name.
    #[must_use]
    pub fn crs(&self, name: &str) -> Option<Arc<dyn CodeReviewClient>> {
        self.crs.get(name).cloned()
    }

    /// Look up a CI client by system name.
    #[must_use]
    pub fn cis(&self, name: &str) -> Option<Arc<dyn ContinuousIntegrationClient>> {
        self.cis.get(name).cloned()
    }

    /// Sorted names of registered code-review systems.
    #[must_use]
    pub fn crs_names(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.crs.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    /// Sorted names of registered CI systems.
    #[must_use]
    pub fn cis_names(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.cis.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCi, MockCodeReview};

    #[test]
    fn resolves_registered_names() {
        let mut registry = SystemRegistry::new();
        registry.register_crs(MockCodeReview::new("gerrit"));
        registry.register_cis(MockCi::new("buildbucket"));
        assert!(registry.crs("gerrit").is_some());
        assert!(registry.crs("github").is_none());
        assert_eq!(registry.crs_names(), vec!["gerrit"]);
        assert_eq!(registry.cis_names(), vec!["buildbucket"]);
    }
}
