//! Cache keys for composed SQL.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hash of every observable input a composition depends on.
///
/// Two specifications with equal fingerprints compose to the same SQL. The
/// inputs are the statement versions of the base and nested statements and
/// the cardinality of every list parameter, never the parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Start accumulating a fingerprint.
    pub fn builder() -> FingerprintBuilder {
        FingerprintBuilder {
            hasher: DefaultHasher::new(),
        }
    }

    /// Get the raw hash value.
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Accumulates composition inputs into a [`Fingerprint`].
#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    hasher: DefaultHasher,
}

impl FingerprintBuilder {
    /// Mix in a statement version.
    pub fn version(&mut self, version: u64) -> &mut Self {
        version.hash(&mut self.hasher);
        self
    }

    /// Mix in a name or tag.
    pub fn tag(&mut self, tag: &str) -> &mut Self {
        tag.hash(&mut self.hasher);
        self
    }

    /// Mix in a cardinality.
    pub fn cardinality(&mut self, count: usize) -> &mut Self {
        count.hash(&mut self.hasher);
        self
    }

    /// Mix in the fingerprint of a nested composition.
    pub fn nested(&mut self, fingerprint: Fingerprint) -> &mut Self {
        fingerprint.0.hash(&mut self.hasher);
        self
    }

    /// Finish the fingerprint.
    pub fn finish(&self) -> Fingerprint {
        Fingerprint(self.hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn of(version: u64, cardinalities: &[(&str, usize)]) -> Fingerprint {
        let mut builder = Fingerprint::builder();
        builder.version(version);
        for (name, count) in cardinalities {
            builder.tag(name).cardinality(*count);
        }
        builder.finish()
    }

    #[test]
    fn test_equal_inputs_equal_fingerprints() {
        assert_eq!(of(1, &[("ids", 2)]), of(1, &[("ids", 2)]));
    }

    #[test]
    fn test_cardinality_changes_fingerprint() {
        assert_ne!(of(1, &[("ids", 2)]), of(1, &[("ids", 3)]));
        assert_ne!(of(1, &[("ids", 2)]), of(2, &[("ids", 2)]));
    }
}
