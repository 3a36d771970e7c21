use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Monotonic version token assigned to versioned writes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(pub u64);

/// Per-write metadata: expiration settings and an optional version
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    version: Option<Version>,
    lifespan: Option<Duration>,
    max_idle: Option<Duration>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn lifespan(&self) -> Option<Duration> {
        self.lifespan
    }

    pub fn max_idle(&self) -> Option<Duration> {
        self.max_idle
    }

    /// Copy of this metadata carrying `version`
    pub fn with_version(&self, version: Version) -> Self {
        Self {
            version: Some(version),
            ..self.clone()
        }
    }

    pub fn with_lifespan(mut self, lifespan: Duration) -> Self {
        self.lifespan = Some(lifespan);
        self
    }

    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = Some(max_idle);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_version_keeps_expiration() {
        let metadata = Metadata::new()
            .with_lifespan(Duration::from_secs(10))
            .with_max_idle(Duration::from_secs(5));
        let versioned = metadata.with_version(Version(7));

        assert_eq!(metadata.version(), None);
        assert_eq!(versioned.version(), Some(Version(7)));
        assert_eq!(versioned.lifespan(), Some(Duration::from_secs(10)));
        assert_eq!(versioned.max_idle(), Some(Duration::from_secs(5)));
    }
}
