//! scrambledb core types

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Generator of unique table and alias names for materialized intermediates.
///
/// Each instance carries a random serial so that names from concurrent
/// processes sharing one scratchpad schema never collide; within an instance
/// a monotonically increasing counter keeps names unique. Passed explicitly
/// to whoever needs names, never reached through a global.
#[derive(Debug)]
pub struct IdCreator {
    serial: String,
    counter: AtomicU64,
    scratchpad_schema: String,
}

impl IdCreator {
    pub fn new(scratchpad_schema: impl Into<String>) -> Self {
        let serial = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            serial,
            counter: AtomicU64::new(0),
            scratchpad_schema: scratchpad_schema.into(),
        }
    }

    pub fn scratchpad_schema(&self) -> &str {
        &self.scratchpad_schema
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    /// A fresh relation alias.
    pub fn generate_alias_name(&self) -> String {
        format!("scrambledbalias{}", self.next())
    }

    /// A fresh scratchpad-qualified table name as (schema, table).
    pub fn generate_table_name(&self) -> (String, String) {
        (
            self.scratchpad_schema.clone(),
            format!("scrambledbtemp_{}_{}", self.serial, self.next()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique_and_increasing() {
        let creator = IdCreator::new("scratch");
        let (s1, t1) = creator.generate_table_name();
        let (s2, t2) = creator.generate_table_name();
        assert_eq!(s1, "scratch");
        assert_eq!(s2, "scratch");
        assert_ne!(t1, t2);

        let a1 = creator.generate_alias_name();
        let a2 = creator.generate_alias_name();
        assert_ne!(a1, a2);
    }

    #[test]
    fn test_serials_differ_across_instances() {
        let a = IdCreator::new("scratch");
        let b = IdCreator::new("scratch");
        assert_ne!(a.generate_table_name().1, b.generate_table_name().1);
    }
}
