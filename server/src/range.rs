use crate::error::TransferError;

const UNIT_PREFIX: &str = "bytes=";

/// One contiguous range as written by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=start-end`, end inclusive
    Bounded(u64, u64),
    /// `bytes=start-`
    From(u64),
    /// `bytes=-len`, the last `len` bytes
    Suffix(u64),
}

/// Span actually served, end inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteSpan {
    /// A resolved span always holds at least one byte.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Content-Range` header.
    #[must_use]
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

impl RangeSpec {
    /// Parses a `Range` header value. Only a single range in bytes is accepted.
    pub fn parse(header: &str) -> Result<Self, TransferError> {
        let invalid = || TransferError::Validation(format!("invalid range {header:?}"));

        let spec = header.trim().strip_prefix(UNIT_PREFIX).ok_or_else(invalid)?;
        if spec.contains(',') {
            return Err(TransferError::Validation(
                "multiple ranges are not supported".to_owned(),
            ));
        }
        let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
        let (start, end) = (start.trim(), end.trim());
        let number = |s: &str| s.parse::<u64>().map_err(|_| invalid());

        match (start.is_empty(), end.is_empty()) {
            (false, false) => {
                let (start, end) = (number(start)?, number(end)?);
                if end < start {
                    return Err(invalid());
                }
                Ok(RangeSpec::Bounded(start, end))
            }
            (false, true) => Ok(RangeSpec::From(number(start)?)),
            (true, false) => Ok(RangeSpec::Suffix(number(end)?)),
            (true, true) => Err(invalid()),
        }
    }

    /// Resolves the range against the content length, clamping the end to the
    /// content and the span to at most `ceiling` bytes.
    pub fn resolve(&self, total: u64, ceiling: u64) -> Result<ByteSpan, TransferError> {
        let unsatisfiable = TransferError::RangeNotSatisfiable { total };
        if total == 0 {
            return Err(unsatisfiable);
        }
        let last = total - 1;
        let (start, end) = match *self {
            RangeSpec::Bounded(start, end) => (start, end.min(last)),
            RangeSpec::From(start) => (start, last),
            RangeSpec::Suffix(0) => return Err(unsatisfiable),
            RangeSpec::Suffix(len) => (total.saturating_sub(len), last),
        };
        if start > last {
            return Err(unsatisfiable);
        }
        let window_end = start.saturating_add(ceiling.max(1) - 1);
        Ok(ByteSpan {
            start,
            end: end.min(window_end),
            total,
        })
    }
}

/// Range requests are served for audio and video only.
#[must_use]
pub fn is_streamable(mime_type: &str) -> bool {
    let top = mime_type.split('/').next().unwrap_or_default();
    top.eq_ignore_ascii_case("video") || top.eq_ignore_ascii_case("audio")
}
