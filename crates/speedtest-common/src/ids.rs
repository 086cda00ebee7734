//! Prefixed ID generation.
//!
//! IDs use a `prefix_` followed by a UUIDv7 (time-ordered), so they sort by
//! creation time and are identifiable by type in logs.

use uuid::Uuid;

fn prefixed_id(prefix: &str) -> String {
    let id = Uuid::now_v7();
    format!("{}_{}", prefix, id.as_simple())
}

/// Generate a test run ID: `run_<uuid7>`
pub fn run_id() -> String {
    prefixed_id("run")
}

/// Generate a stats session ID: `ses_<uuid7>`
pub fn session_id() -> String {
    prefixed_id("ses")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_correct_prefix() {
        assert!(run_id().starts_with("run_"));
        assert!(session_id().starts_with("ses_"));
    }

    #[test]
    fn ids_are_unique() {
        let a = run_id();
        let b = run_id();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_are_sortable_by_time() {
        let a = session_id();
        let b = session_id();
        assert!(b > a, "Expected {b} > {a}");
    }
}
