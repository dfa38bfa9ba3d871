//! Parsing and resolution of single `Range: bytes=start-end` headers.
//!
//! Only one range expression is honoured. Multi-range requests are treated as
//! unsatisfiable rather than answered with `multipart/byteranges`.

const BYTES_UNIT: &str = "bytes=";

/// Parsed request intent, bounds inclusive, as written in the header.
///
/// `start: None` is the suffix form (`bytes=-N`), in which case `end` holds
/// the suffix length rather than an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// A validated byte window within a resource of `total_length` bytes.
///
/// Invariant: `start <= end < total_length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedInterval {
    pub start: u64,
    pub end: u64,
    pub total_length: u64,
}

impl ResolvedInterval {
    /// Number of bytes covered, `end - start + 1`.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Whether the interval spans the whole resource.
    pub fn is_complete(&self) -> bool {
        self.start == 0 && self.end + 1 == self.total_length
    }
}

/// Outcome of resolving an optional range header against a length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No usable range was requested, serve the whole resource.
    Full,
    /// Serve exactly this interval.
    Partial(ResolvedInterval),
    /// The range can't be honoured, answer `416` with `bytes */{total}`.
    Unsatisfiable,
}

/// Marker for a `bytes=` header whose range expression can't be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedRange;

impl RangeSpec {
    /// Parses a raw header value.
    ///
    /// Returns `Ok(None)` when the header carries no byte range at all
    /// (empty, or another unit), and `Err` when it claims the `bytes` unit
    /// but the expression is malformed or lists several ranges.
    pub fn parse(header: &str) -> Result<Option<RangeSpec>, MalformedRange> {
        let header = header.trim();
        if header.is_empty() {
            return Ok(None);
        }

        let Some(unit) = header.get(..BYTES_UNIT.len()) else {
            return Ok(None);
        };
        if !unit.eq_ignore_ascii_case(BYTES_UNIT) {
            return Ok(None);
        }

        let expr = header[BYTES_UNIT.len()..].trim();
        if expr.contains(',') {
            return Err(MalformedRange);
        }

        let (start, end) = expr.split_once('-').ok_or(MalformedRange)?;
        let start = parse_bound(start)?;
        let end = parse_bound(end)?;
        if start.is_none() && end.is_none() {
            return Err(MalformedRange);
        }

        Ok(Some(RangeSpec { start, end }))
    }

    /// Computes the interval this range selects in a resource of
    /// `total_length` bytes, clamping `end` to the last byte.
    pub fn resolve(&self, total_length: u64) -> Option<ResolvedInterval> {
        let last = total_length.checked_sub(1)?;

        let (start, end) = match (self.start, self.end) {
            (Some(start), Some(end)) => {
                if start > end || start > last {
                    return None;
                }
                (start, end.min(last))
            }
            (Some(start), None) => {
                if start > last {
                    return None;
                }
                (start, last)
            }
            (None, Some(suffix)) => {
                if suffix == 0 {
                    return None;
                }
                (total_length.saturating_sub(suffix), last)
            }
            (None, None) => return None,
        };

        Some(ResolvedInterval { start, end, total_length })
    }
}

fn parse_bound(bound: &str) -> Result<Option<u64>, MalformedRange> {
    let bound = bound.trim();
    if bound.is_empty() {
        return Ok(None);
    }
    if !bound.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MalformedRange);
    }
    bound.parse().map(Some).map_err(|_| MalformedRange)
}

/// Resolves an optional `Range` header against `total_length`.
///
/// Pure function: the caller supplies the length, nothing is read here.
pub fn resolve(header: Option<&str>, total_length: u64) -> Resolution {
    let spec = match header.map(RangeSpec::parse) {
        None | Some(Ok(None)) => return Resolution::Full,
        Some(Err(MalformedRange)) => return Resolution::Unsatisfiable,
        Some(Ok(Some(spec))) => spec,
    };

    match spec.resolve(total_length) {
        Some(interval) => Resolution::Partial(interval),
        None => Resolution::Unsatisfiable,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn interval(start: u64, end: u64, total_length: u64) -> Resolution {
        Resolution::Partial(ResolvedInterval { start, end, total_length })
    }

    #[test]
    fn test_no_range_header() {
        assert_eq!(Resolution::Full, resolve(None, 10_000));
        assert_eq!(Resolution::Full, resolve(Some(""), 10_000));
        assert_eq!(Resolution::Full, resolve(Some("   "), 10_000));
    }

    #[test]
    fn test_other_unit_is_ignored() {
        assert_eq!(Resolution::Full, resolve(Some("items=0-5"), 10_000));
        assert_eq!(Resolution::Full, resolve(Some("bleets=100-324"), 500));
        assert_eq!(Resolution::Full, resolve(Some("none"), 500));
    }

    #[test]
    fn test_unit_is_case_insensitive() {
        assert_eq!(interval(0, 9, 100), resolve(Some("Bytes=0-9"), 100));
        assert_eq!(interval(0, 9, 100), resolve(Some("BYTES=0-9"), 100));
    }

    #[test]
    fn test_concrete_scenarios() {
        let total = 10_000;
        assert_eq!(interval(0, 999, total), resolve(Some("bytes=0-999"), total));
        assert_eq!(interval(9000, 9999, total), resolve(Some("bytes=9000-"), total));
        assert_eq!(interval(9500, 9999, total), resolve(Some("bytes=-500"), total));
        assert_eq!(Resolution::Unsatisfiable, resolve(Some("bytes=10000-10050"), total));
    }

    #[test]
    fn test_every_valid_pair_resolves_exactly() {
        for total in 1..=12u64 {
            for start in 0..total {
                for end in start..total {
                    let header = format!("bytes={start}-{end}");
                    assert_eq!(
                        interval(start, end, total),
                        resolve(Some(&header), total),
                        "{header} against {total}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_open_start_beyond_length() {
        for total in 1..=8u64 {
            for start in total..total + 4 {
                let header = format!("bytes={start}-");
                assert_eq!(Resolution::Unsatisfiable, resolve(Some(&header), total), "{header}");
            }
        }
    }

    #[test]
    fn test_suffix() {
        assert_eq!(interval(499, 499, 500), resolve(Some("bytes=-1"), 500));
        assert_eq!(interval(400, 499, 500), resolve(Some("bytes=-100"), 500));
        assert_eq!(interval(0, 499, 500), resolve(Some("bytes=-500"), 500));
        assert_eq!(interval(0, 499, 500), resolve(Some("bytes=-24646"), 500));
        assert_eq!(Resolution::Unsatisfiable, resolve(Some("bytes=-0"), 500));
    }

    #[test]
    fn test_end_is_clamped() {
        assert_eq!(interval(0, 499, 500), resolve(Some("bytes=0-24646"), 500));
        assert_eq!(interval(30, 53, 54), resolve(Some("bytes=30-99"), 54));
        assert_eq!(interval(0, 0, 1), resolve(Some("bytes=0-0"), 1));
    }

    #[test]
    fn test_start_after_end() {
        assert_eq!(Resolution::Unsatisfiable, resolve(Some("bytes=30-29"), 54));
    }

    #[test]
    fn test_empty_resource() {
        assert_eq!(Resolution::Full, resolve(None, 0));
        assert_eq!(Resolution::Unsatisfiable, resolve(Some("bytes=0-"), 0));
        assert_eq!(Resolution::Unsatisfiable, resolve(Some("bytes=-10"), 0));
        assert_eq!(Resolution::Unsatisfiable, resolve(Some("bytes=0-0"), 0));
    }

    #[test]
    fn test_malformed() {
        for header in [
            "bytes=",
            "bytes=-",
            "bytes=abc-",
            "bytes=1-x",
            "bytes=5",
            "bytes=+5-10",
            "bytes=-5-10",
            "bytes=99999999999999999999-",
            "bytes=0-4,-1",
            "bytes=0-100,200-300",
        ] {
            assert_eq!(Resolution::Unsatisfiable, resolve(Some(header), 500), "{header}");
        }
    }

    #[test]
    fn test_whitespace_is_tolerated() {
        assert_eq!(interval(10, 20, 100), resolve(Some(" bytes= 10 - 20 "), 100));
    }

    #[test]
    fn test_parse() {
        assert_matches!(RangeSpec::parse("bytes=5-"), Ok(Some(RangeSpec { start: Some(5), end: None })));
        assert_matches!(RangeSpec::parse("bytes=-5"), Ok(Some(RangeSpec { start: None, end: Some(5) })));
        assert_matches!(RangeSpec::parse("seconds=5-"), Ok(None));
        assert_matches!(RangeSpec::parse("bytes=x"), Err(MalformedRange));
    }

    #[test]
    fn test_interval_len() {
        let full = ResolvedInterval { start: 0, end: 9999, total_length: 10_000 };
        assert_eq!(10_000, full.len());
        assert!(full.is_complete());

        let part = ResolvedInterval { start: 9500, end: 9999, total_length: 10_000 };
        assert_eq!(500, part.len());
        assert!(!part.is_complete());
    }
}
