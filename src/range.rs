// src/range.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Byte-range calculation for ranged GETs.
//!
//! Pure functions only: given where the cursor is, how it got there, how many
//! bytes are wanted and (if known) how big the object is, produce the value of
//! the HTTP `Range` header.

use std::fmt;

use crate::error::SourceError;

/// Reference point of a seek, mirroring `io.SeekStart` / `SeekCurrent` / `SeekEnd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Whence {
    #[default]
    Start,
    Current,
    End,
}

impl TryFrom<i32> for Whence {
    type Error = SourceError;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Whence::Start),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            other => Err(SourceError::InvalidWhence(other)),
        }
    }
}

/// A `Range` header value.
///
/// `end == None` is the suffix form `bytes=<begin>` where `begin` is expected
/// to be non-positive ("the last |begin| bytes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub begin: i64,
    pub end: Option<i64>,
}

impl ByteRange {
    /// Number of bytes this range asks for.
    pub fn len(&self) -> u64 {
        match self.end {
            Some(end) => end.saturating_sub(self.begin).saturating_add(1).max(0) as u64,
            None => self.begin.unsigned_abs(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "bytes={}-{}", self.begin, end),
            None => write!(f, "bytes={}", self.begin),
        }
    }
}

/// Compute the range for a fetch of `count` bytes at `offset`.
///
/// With an unknown size the caller owns validity: start/current offsets map to
/// `bytes=o-(o+count-1)`, end offsets to the suffix form. With a known size the
/// begin is resolved against the object, clamped to 0, and the end clamped to
/// the last byte. An empty object yields `None` (no `Range` header).
pub fn byte_range(offset: i64, whence: Whence, count: u64, size: Option<u64>) -> Option<ByteRange> {
    let count = i64::try_from(count).unwrap_or(i64::MAX);

    let Some(size) = size else {
        return Some(match whence {
            Whence::Start | Whence::Current => ByteRange {
                begin: offset,
                end: Some(offset.saturating_add(count).saturating_sub(1)),
            },
            Whence::End => ByteRange { begin: offset, end: None },
        });
    };

    if size == 0 {
        // Nothing addressable; fetch without a range.
        return None;
    }
    let size = size as i64;
    let begin = match whence {
        Whence::Start | Whence::Current => offset,
        Whence::End => size + offset,
    }
    .max(0);
    let end = begin.saturating_add(count).saturating_sub(1).min(size - 1);

    Some(ByteRange { begin, end: Some(end) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(offset: i64, whence: Whence, count: u64, size: Option<u64>) -> String {
        byte_range(offset, whence, count, size)
            .map(|r| r.to_string())
            .unwrap_or_default()
    }

    #[test]
    fn known_size_from_start() {
        assert_eq!(header(10, Whence::Start, 20, Some(100)), "bytes=10-29");
        assert_eq!(header(0, Whence::Start, 100, Some(100)), "bytes=0-99");
        assert_eq!(header(0, Whence::Start, 1, Some(100)), "bytes=0-0");
    }

    #[test]
    fn known_size_current_same_as_start() {
        assert_eq!(header(10, Whence::Current, 20, Some(100)), "bytes=10-29");
    }

    #[test]
    fn known_size_end_is_clamped() {
        assert_eq!(header(-10, Whence::End, 20, Some(100)), "bytes=90-99");
        assert_eq!(header(-100, Whence::End, 10, Some(100)), "bytes=0-9");
    }

    #[test]
    fn known_size_begin_clamped_to_zero() {
        assert_eq!(header(-150, Whence::End, 10, Some(100)), "bytes=0-9");
        assert_eq!(header(-5, Whence::Start, 10, Some(100)), "bytes=0-9");
    }

    #[test]
    fn known_size_end_clamped_to_last_byte() {
        assert_eq!(header(95, Whence::Start, 20, Some(100)), "bytes=95-99");
        assert_eq!(header(0, Whence::Start, u32::MAX as u64, Some(100)), "bytes=0-99");
    }

    #[test]
    fn huge_count_does_not_overflow() {
        assert_eq!(header(10, Whence::Start, u64::MAX, Some(100)), "bytes=10-99");
        let r = byte_range(10, Whence::Start, u64::MAX, None).unwrap();
        assert_eq!(r.end, Some(i64::MAX - 1));
    }

    #[test]
    fn unknown_size_start_and_current() {
        assert_eq!(header(5, Whence::Start, 10, None), "bytes=5-14");
        assert_eq!(header(5, Whence::Current, 10, None), "bytes=5-14");
    }

    #[test]
    fn unknown_size_end_is_suffix() {
        assert_eq!(header(-50, Whence::End, 10, None), "bytes=-50");
        assert_eq!(header(-50, Whence::End, 1000, None), "bytes=-50");
    }

    #[test]
    fn empty_object_has_no_range() {
        assert_eq!(header(0, Whence::Start, 10, Some(0)), "");
    }

    #[test]
    fn range_len() {
        assert_eq!(byte_range(10, Whence::Start, 20, Some(100)).unwrap().len(), 20);
        assert_eq!(byte_range(95, Whence::Start, 20, Some(100)).unwrap().len(), 5);
        assert_eq!(byte_range(-50, Whence::End, 0, None).unwrap().len(), 50);
    }

    #[test]
    fn whence_from_int() {
        assert_eq!(Whence::try_from(0).unwrap(), Whence::Start);
        assert_eq!(Whence::try_from(1).unwrap(), Whence::Current);
        assert_eq!(Whence::try_from(2).unwrap(), Whence::End);
        assert!(matches!(Whence::try_from(3), Err(SourceError::InvalidWhence(3))));
        assert!(matches!(Whence::try_from(-1), Err(SourceError::InvalidWhence(-1))));
    }
}
