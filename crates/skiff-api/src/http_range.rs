//! `Range` request header parsing.
//!
//! Supports the single-range forms `bytes=a-b`, `bytes=a-`, and `bytes=-n`.
//! Multi-range requests are not supported and fall back to a full response,
//! per RFC 9110 (a server MAY ignore the Range header).

use skiff_core::AppError;
use skiff_storage::ByteRange;

/// Outcome of parsing a Range header against an object size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedRange {
    /// No Range header or an ignorable one; serve the full body.
    Full,
    /// A satisfiable single range.
    Partial(ByteRange),
}

/// Parse an optional Range header value for an object of `size` bytes.
///
/// Returns `RangeNotSatisfiable` for syntactically valid ranges that fall
/// outside the object, and treats malformed values as ignorable.
pub fn parse_range(header: Option<&str>, size: u64) -> Result<ParsedRange, AppError> {
    let Some(header) = header else {
        return Ok(ParsedRange::Full);
    };

    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        // Unknown unit; ignore the header.
        return Ok(ParsedRange::Full);
    };

    // Multi-range requests are ignored rather than rejected.
    if spec.contains(',') {
        return Ok(ParsedRange::Full);
    }

    let spec = spec.trim();
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return Ok(ParsedRange::Full);
    };

    let range = match (start_str.trim(), end_str.trim()) {
        // bytes=-n : final n bytes
        ("", suffix) => {
            let n: u64 = match suffix.parse() {
                Ok(n) => n,
                Err(_) => return Ok(ParsedRange::Full),
            };
            if n == 0 || size == 0 {
                return Err(AppError::RangeNotSatisfiable { size });
            }
            let start = size.saturating_sub(n);
            ByteRange::new(start, size - 1)
        }
        // bytes=a- : from a to the end
        (start, "") => {
            let start: u64 = match start.parse() {
                Ok(s) => s,
                Err(_) => return Ok(ParsedRange::Full),
            };
            if start >= size {
                return Err(AppError::RangeNotSatisfiable { size });
            }
            ByteRange::new(start, size - 1)
        }
        // bytes=a-b : inclusive range, clamped to the object end
        (start, end) => {
            let start: u64 = match start.parse() {
                Ok(s) => s,
                Err(_) => return Ok(ParsedRange::Full),
            };
            let end: u64 = match end.parse() {
                Ok(e) => e,
                Err(_) => return Ok(ParsedRange::Full),
            };
            if start > end || start >= size {
                return Err(AppError::RangeNotSatisfiable { size });
            }
            ByteRange::new(start, end.min(size - 1))
        }
    };

    Ok(ParsedRange::Partial(range))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_header_is_full() {
        assert_eq!(parse_range(None, 100).unwrap(), ParsedRange::Full);
    }

    #[test]
    fn bounded_range_parses_inclusively() {
        let parsed = parse_range(Some("bytes=0-99"), 1000).unwrap();
        assert_eq!(parsed, ParsedRange::Partial(ByteRange::new(0, 99)));

        let parsed = parse_range(Some("bytes=500-999"), 1000).unwrap();
        assert_eq!(parsed, ParsedRange::Partial(ByteRange::new(500, 999)));
    }

    #[test]
    fn end_is_clamped_to_object_size() {
        let parsed = parse_range(Some("bytes=500-2000"), 1000).unwrap();
        assert_eq!(parsed, ParsedRange::Partial(ByteRange::new(500, 999)));
    }

    #[test]
    fn open_ended_range_runs_to_end() {
        let parsed = parse_range(Some("bytes=900-"), 1000).unwrap();
        assert_eq!(parsed, ParsedRange::Partial(ByteRange::new(900, 999)));
    }

    #[test]
    fn suffix_range_takes_final_bytes() {
        let parsed = parse_range(Some("bytes=-100"), 1000).unwrap();
        assert_eq!(parsed, ParsedRange::Partial(ByteRange::new(900, 999)));

        // Suffix longer than the object covers the whole body.
        let parsed = parse_range(Some("bytes=-5000"), 1000).unwrap();
        assert_eq!(parsed, ParsedRange::Partial(ByteRange::new(0, 999)));
    }

    #[test]
    fn out_of_bounds_start_is_unsatisfiable() {
        assert!(matches!(
            parse_range(Some("bytes=1000-1099"), 1000),
            Err(AppError::RangeNotSatisfiable { size: 1000 })
        ));
        assert!(matches!(
            parse_range(Some("bytes=5-2"), 1000),
            Err(AppError::RangeNotSatisfiable { .. })
        ));
        assert!(matches!(
            parse_range(Some("bytes=-0"), 1000),
            Err(AppError::RangeNotSatisfiable { .. })
        ));
    }

    #[test]
    fn malformed_and_multi_ranges_fall_back_to_full() {
        assert_eq!(parse_range(Some("bytes=abc-def"), 100).unwrap(), ParsedRange::Full);
        assert_eq!(parse_range(Some("items=0-5"), 100).unwrap(), ParsedRange::Full);
        assert_eq!(
            parse_range(Some("bytes=0-5,10-15"), 100).unwrap(),
            ParsedRange::Full
        );
        assert_eq!(parse_range(Some("bytes=nonsense"), 100).unwrap(), ParsedRange::Full);
    }
}
