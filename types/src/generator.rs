use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no generator registered for namespace {namespace} version {version}")]
pub struct UnsupportedProfileError {
    pub namespace: String,
    pub version: u64,
}

/// A generator binds a `(namespace, version)` pair to the profile URI that
/// names the operation semantics of anchors it produces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generator {
    pub namespace: String,
    pub version: u64,
    pub profile: Url,
}

/// Registry of known generators.
///
/// Registration is an explicit dependency injected at construction; tests
/// instantiate a local registry rather than relying on process state.
#[derive(Clone, Debug, Default)]
pub struct GeneratorRegistry {
    generators: Vec<Generator>,
}

impl GeneratorRegistry {
    pub fn new(generators: Vec<Generator>) -> Self {
        Self { generators }
    }

    pub fn register(&mut self, generator: Generator) {
        self.generators.push(generator);
    }

    /// Profile URI for a `(namespace, version)` pair.
    pub fn profile_for(
        &self,
        namespace: &str,
        version: u64,
    ) -> Result<&Url, UnsupportedProfileError> {
        self.generators
            .iter()
            .find(|g| g.namespace == namespace && g.version == version)
            .map(|g| &g.profile)
            .ok_or_else(|| UnsupportedProfileError {
                namespace: namespace.to_string(),
                version,
            })
    }

    /// Inverse lookup: the generator a profile URI names.
    pub fn generator_for(&self, profile: &Url) -> Option<&Generator> {
        self.generators.iter().find(|g| &g.profile == profile)
    }
}
