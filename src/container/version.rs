use crate::command::Version;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of version tokens for versioned writes
pub trait VersionGenerator: Send + Sync {
    fn next(&self) -> Version;
}

/// Process-wide monotonic counter
#[derive(Debug, Default)]
pub struct NumericVersionGenerator {
    counter: AtomicU64,
}

impl NumericVersionGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator whose first token is `start + 1`
    pub fn starting_at(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
        }
    }
}

impl VersionGenerator for NumericVersionGenerator {
    fn next(&self) -> Version {
        Version(self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_versions_are_monotonic() {
        let generator = NumericVersionGenerator::starting_at(41);
        assert_eq!(generator.next(), Version(42));
        assert_eq!(generator.next(), Version(43));
    }

    #[test]
    fn test_concurrent_versions_are_unique() {
        let generator = Arc::new(NumericVersionGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || (0..250).map(|_| generator.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<Version> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }
}
