//! Storage key and slug derivation.
//!
//! All backends share the same key layout: `files/{owner_id}/{filename}`.
//! Slug derivation is pure; collision resolution happens at the database
//! layer via unique constraints, with the `candidate` helper producing the
//! `-N` suffixed retries.

use rand::distr::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

/// Length of the random identifier used for opaque URLs.
const RANDOM_KEY_LEN: usize = 8;

/// Bounded attempts when generating random keys before giving up.
pub const MAX_RANDOM_KEY_ATTEMPTS: u32 = 5;

/// Generate a storage key for the given owner and resolved filename.
pub fn storage_key(owner_id: Uuid, filename: &str) -> String {
    format!("files/{}/{}", owner_id, filename)
}

/// The key prefix holding every object of one owner.
pub fn owner_prefix(owner_id: Uuid) -> String {
    format!("files/{}", owner_id)
}

/// Strip directory components and traversal sequences from user input,
/// leaving a bare filename.
fn sanitize(original: &str) -> String {
    let normalized = original.replace('\\', "/");
    let last = normalized.rsplit('/').next().unwrap_or("");
    last.replace("..", "")
}

/// Split a filename into stem and extension. Hidden files and names without
/// a dot have no extension.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// Derive a URL-safe slug from a user-supplied filename.
///
/// Lower-cases, collapses every run of non-alphanumeric characters in the
/// stem to a single hyphen, trims leading/trailing hyphens, and re-appends
/// the lower-cased extension. The display name keeps the original spelling;
/// only the storage key uses the slug.
pub fn slugify_filename(original: &str) -> String {
    let sanitized = sanitize(original);
    let (stem, ext) = split_extension(&sanitized);

    let mut slug = String::with_capacity(stem.len());
    let mut pending_hyphen = false;
    for c in stem.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    if slug.is_empty() {
        slug.push_str("file");
    }

    match ext {
        Some(ext) => {
            let ext: String = ext
                .to_lowercase()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect();
            if ext.is_empty() {
                slug
            } else {
                format!("{}.{}", slug, ext)
            }
        }
        None => slug,
    }
}

/// Produce the N-th collision candidate for a slug: `test.pdf` →
/// `test-1.pdf`, `test-2.pdf`, ... `candidate(slug, 0)` is the slug itself.
pub fn candidate(slug: &str, n: u32) -> String {
    if n == 0 {
        return slug.to_string();
    }
    let (stem, ext) = split_extension(slug);
    match ext {
        Some(ext) => format!("{}-{}.{}", stem, n, ext),
        None => format!("{}-{}", stem, n),
    }
}

/// Generate a short random identifier keeping the original extension, for
/// callers that prefer opaque URLs.
pub fn random_key(original: &str) -> String {
    let sanitized = sanitize(original);
    let (_, ext) = split_extension(&sanitized);

    let id: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_KEY_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();

    match ext {
        Some(ext) => {
            let ext: String = ext
                .to_lowercase()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect();
            if ext.is_empty() {
                id
            } else {
                format!("{}.{}", id, ext)
            }
        }
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_lowercases_and_hyphenates() {
        assert_eq!(slugify_filename("Test File.PDF"), "test-file.pdf");
        assert_eq!(slugify_filename("---Test File---.pdf"), "test-file.pdf");
        assert_eq!(slugify_filename("Quarterly Report (final) v2.docx"), "quarterly-report-final-v2.docx");
    }

    #[test]
    fn slug_handles_missing_extension() {
        assert_eq!(slugify_filename("README"), "readme");
        assert_eq!(slugify_filename(".bashrc"), "bashrc");
        assert_eq!(slugify_filename("archive."), "archive");
    }

    #[test]
    fn slug_strips_traversal_and_directories() {
        assert_eq!(slugify_filename("../../etc/passwd"), "passwd");
        assert_eq!(slugify_filename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(slugify_filename("a/b/c/notes.txt"), "notes.txt");
    }

    #[test]
    fn slug_never_empty() {
        assert_eq!(slugify_filename("!!!"), "file");
        assert_eq!(slugify_filename(""), "file");
    }

    #[test]
    fn candidates_append_counter_before_extension() {
        assert_eq!(candidate("test.pdf", 0), "test.pdf");
        assert_eq!(candidate("test.pdf", 1), "test-1.pdf");
        assert_eq!(candidate("test.pdf", 2), "test-2.pdf");
        assert_eq!(candidate("readme", 3), "readme-3");
    }

    #[test]
    fn random_key_keeps_extension_and_varies() {
        let a = random_key("Test File.PDF");
        let b = random_key("Test File.PDF");
        assert!(a.ends_with(".pdf"));
        assert_eq!(a.len(), RANDOM_KEY_LEN + 4);
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.'));
    }

    #[test]
    fn storage_key_is_owner_scoped() {
        let owner = Uuid::new_v4();
        let key = storage_key(owner, "test-file.pdf");
        assert_eq!(key, format!("files/{}/test-file.pdf", owner));
        assert!(key.starts_with(&owner_prefix(owner)));
    }
}
