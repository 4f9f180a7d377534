//! Candidate-name generation for collision resolution.
//!
//! Derivation is pure (see `skiff_storage::keys`); actual reservation happens
//! through conditional inserts against the unique constraints on file and
//! session rows, so callers iterate candidates until an insert sticks.

use skiff_storage::keys;

/// Bound on `-N` suffix attempts before giving up with a conflict error.
pub const MAX_SLUG_ATTEMPTS: u32 = 100;

/// Candidate filenames for a user-supplied original, in try-order.
///
/// Slug mode yields `test.pdf`, `test-1.pdf`, `test-2.pdf`, ...; random mode
/// yields a bounded number of fresh opaque identifiers.
pub fn name_candidates(original: &str, random: bool) -> Box<dyn Iterator<Item = String> + Send> {
    if random {
        let original = original.to_string();
        Box::new((0..keys::MAX_RANDOM_KEY_ATTEMPTS).map(move |_| keys::random_key(&original)))
    } else {
        let slug = keys::slugify_filename(original);
        Box::new((0..=MAX_SLUG_ATTEMPTS).map(move |n| keys::candidate(&slug, n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_candidates_count_upwards() {
        let names: Vec<String> = name_candidates("Test File.PDF", false).take(3).collect();
        assert_eq!(names, vec!["test-file.pdf", "test-file-1.pdf", "test-file-2.pdf"]);
    }

    #[test]
    fn random_candidates_are_bounded_and_distinct() {
        let names: Vec<String> = name_candidates("report.pdf", true).collect();
        assert_eq!(names.len(), keys::MAX_RANDOM_KEY_ATTEMPTS as usize);
        for name in &names {
            assert!(name.ends_with(".pdf"));
        }
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
