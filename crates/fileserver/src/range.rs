//! `Range` header parsing and resolution against a resource length
//!
//! Only a single `bytes=<start>-<end>` range is accepted. Either bound may be
//! omitted, but not both. Lists of ranges are rejected as malformed rather
//! than answered with `multipart/byteranges`.

use thiserror::Error;

/// Why a range could not be served
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    /// Header does not follow the accepted grammar (HTTP 400)
    #[error("invalid range request: {0}")]
    Malformed(&'static str),
    /// Syntax is fine but the interval lies outside the resource (HTTP 416)
    #[error("requested range not satisfiable")]
    Unsatisfiable,
}

/// Bounds as sent by the client, before the resource length is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    start: Option<u64>,
    end: Option<u64>,
}

/// Inclusive byte interval actually served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    /// Number of bytes in the interval
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value for a resource of `total` bytes
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Parse an optional `Range` header value
///
/// # Returns
/// * `Ok(None)` - no header, serve the whole resource
/// * `Ok(Some(spec))` - a single well-formed range
/// * `Err(RangeError::Malformed)` - anything else
pub fn parse(header: Option<&str>) -> Result<Option<RangeSpec>, RangeError> {
    let Some(header) = header else {
        return Ok(None);
    };

    let (unit, spec) = header
        .trim()
        .split_once('=')
        .ok_or(RangeError::Malformed("missing '='"))?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return Err(RangeError::Malformed("unsupported range unit"));
    }
    if spec.contains(',') {
        return Err(RangeError::Malformed("multiple ranges are not supported"));
    }

    let (start, end) = spec
        .trim()
        .split_once('-')
        .ok_or(RangeError::Malformed("missing '-'"))?;
    let start = parse_bound(start)?;
    let end = parse_bound(end)?;

    if start.is_none() && end.is_none() {
        return Err(RangeError::Malformed("no range bounds"));
    }

    Ok(Some(RangeSpec { start, end }))
}

fn parse_bound(raw: &str) -> Result<Option<u64>, RangeError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Malformed("range bound is not a number"));
    }
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| RangeError::Malformed("range bound out of bounds"))
}

impl RangeSpec {
    pub fn start(&self) -> Option<u64> {
        self.start
    }

    pub fn end(&self) -> Option<u64> {
        self.end
    }

    /// Bind the requested bounds to a resource of `length` bytes
    ///
    /// `bytes=-K` selects the last `K` bytes, `bytes=K-` runs to the end and
    /// an end past the resource is clamped. Nothing is satisfiable on an
    /// empty resource.
    pub fn resolve(&self, length: u64) -> Result<ByteRange, RangeError> {
        let last = length.checked_sub(1).ok_or(RangeError::Unsatisfiable)?;

        let (start, end) = match (self.start, self.end) {
            (None, Some(suffix)) => (length.saturating_sub(suffix), last),
            (Some(start), None) => (start, last),
            (Some(start), Some(end)) => (start, end.min(last)),
            (None, None) => return Err(RangeError::Unsatisfiable),
        };

        // end <= last here, so this also rejects starts past the last byte
        if start > end {
            return Err(RangeError::Unsatisfiable);
        }

        Ok(ByteRange { start, end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(header: &str) -> RangeSpec {
        parse(Some(header)).unwrap().unwrap()
    }

    #[test]
    fn test_no_header() {
        assert_eq!(parse(None), Ok(None));
    }

    #[test]
    fn test_parse_bounds() {
        let s = spec("bytes=0-5");
        assert_eq!((s.start(), s.end()), (Some(0), Some(5)));

        let s = spec("bytes=50-");
        assert_eq!((s.start(), s.end()), (Some(50), None));

        let s = spec("bytes=-50");
        assert_eq!((s.start(), s.end()), (None, Some(50)));

        let s = spec("  bytes = 7 - 9 ");
        assert_eq!((s.start(), s.end()), (Some(7), Some(9)));
    }

    #[test]
    fn test_malformed_headers() {
        for header in [
            "invalid_range_format",
            "bytes",
            "bytes=",
            "bytes=-",
            "bytes=abc-def",
            "bytes=1-x",
            "bytes=+1-5",
            "bytes=1-5-7",
            "bytes=5",
            "items=0-5",
            "bytes=0-10,20-30",
            "bytes=99999999999999999999999-",
        ] {
            assert!(
                matches!(parse(Some(header)), Err(RangeError::Malformed(_))),
                "{} should be malformed",
                header
            );
        }
    }

    #[test]
    fn test_resolve_explicit_range() {
        let range = spec("bytes=0-5").resolve(1024).unwrap();
        assert_eq!(range, ByteRange { start: 0, end: 5 });
        assert_eq!(range.len(), 6);
        assert_eq!(range.content_range(1024), "bytes 0-5/1024");
    }

    #[test]
    fn test_resolve_whole_file_range() {
        let range = spec("bytes=0-1023").resolve(1024).unwrap();
        assert_eq!(range, ByteRange { start: 0, end: 1023 });
        assert_eq!(range.len(), 1024);
    }

    #[test]
    fn test_resolve_open_ended() {
        let range = spec("bytes=50-").resolve(1024).unwrap();
        assert_eq!(range, ByteRange { start: 50, end: 1023 });
    }

    #[test]
    fn test_resolve_suffix() {
        let range = spec("bytes=-50").resolve(1024).unwrap();
        assert_eq!(range, ByteRange { start: 974, end: 1023 });
        assert_eq!(range.len(), 50);
    }

    #[test]
    fn test_resolve_suffix_longer_than_file() {
        let range = spec("bytes=-5000").resolve(1024).unwrap();
        assert_eq!(range, ByteRange { start: 0, end: 1023 });
    }

    #[test]
    fn test_resolve_zero_suffix() {
        assert_eq!(spec("bytes=-0").resolve(1024), Err(RangeError::Unsatisfiable));
    }

    #[test]
    fn test_end_is_clamped() {
        let range = spec("bytes=1000-5000").resolve(1024).unwrap();
        assert_eq!(range, ByteRange { start: 1000, end: 1023 });
    }

    #[test]
    fn test_last_byte() {
        let range = spec("bytes=1023-").resolve(1024).unwrap();
        assert_eq!(range, ByteRange { start: 1023, end: 1023 });
        assert_eq!(range.len(), 1);
    }

    #[test]
    fn test_unsatisfiable() {
        for header in ["bytes=5-0", "bytes=1050-1065", "bytes=1014-100", "bytes=1024-", "bytes=1024-2000"] {
            assert_eq!(
                spec(header).resolve(1024),
                Err(RangeError::Unsatisfiable),
                "{} should be unsatisfiable",
                header
            );
        }
    }

    #[test]
    fn test_empty_resource() {
        for header in ["bytes=0-", "bytes=0-0", "bytes=-10"] {
            assert_eq!(spec(header).resolve(0), Err(RangeError::Unsatisfiable));
        }
    }
}
