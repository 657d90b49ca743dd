//! ID generation utilities.

use ulid::Ulid;
use uuid::Uuid;

/// ID generator for persisted rows and worker identities.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based ID.
    ///
    /// ULIDs sort by creation time, which keeps `ORDER BY id` close to
    /// insertion order for every table.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate a worker identity of the form `{prefix}-{uuid}`.
    #[must_use]
    pub fn generate_worker_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::new_v4().simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ulid() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        assert_eq!(id1.len(), 26);
        assert_ne!(id1, id2);
        assert_eq!(id1, id1.to_lowercase());
    }

    #[test]
    fn test_generate_worker_id() {
        let id_gen = IdGenerator::new();
        let id = id_gen.generate_worker_id("worker");

        assert!(id.starts_with("worker-"));
        assert_eq!(id.len(), "worker-".len() + 32);
    }
}
