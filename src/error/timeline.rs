// Timeline validation errors

use crate::error::ErrorCode;
use std::fmt;

/// Timeline error code constants
///
/// Error code range: 2001-2004
pub struct TimelineErrorCodes {}

impl TimelineErrorCodes {
    /// Events are not sorted by start offset
    pub const UNSORTED: i32 = 2001;

    /// Two events share the same id
    pub const DUPLICATE_ID: i32 = 2002;

    /// An event has a zero duration
    pub const ZERO_DURATION: i32 = 2003;

    /// An event ends (plus grace) beyond the representable clock range
    pub const OFFSET_OVERFLOW: i32 = 2004;
}

/// Rejection reasons for a timeline handed to `TimelineStore::load`
///
/// A rejected timeline leaves the store untouched and the session never starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineError {
    /// Event at `index` starts before its predecessor
    Unsorted {
        index: usize,
        start_offset_ms: u64,
        previous_start_ms: u64,
    },

    /// Event id appears more than once
    DuplicateId { id: u64 },

    /// Event has no duration, so it can never be hit
    ZeroDuration { id: u64 },

    /// Start, duration and trailing grace overflow the millisecond clock
    OffsetOverflow { id: u64 },
}

impl ErrorCode for TimelineError {
    fn code(&self) -> i32 {
        match self {
            TimelineError::Unsorted { .. } => TimelineErrorCodes::UNSORTED,
            TimelineError::DuplicateId { .. } => TimelineErrorCodes::DUPLICATE_ID,
            TimelineError::ZeroDuration { .. } => TimelineErrorCodes::ZERO_DURATION,
            TimelineError::OffsetOverflow { .. } => TimelineErrorCodes::OFFSET_OVERFLOW,
        }
    }

    fn message(&self) -> String {
        match self {
            TimelineError::Unsorted {
                index,
                start_offset_ms,
                previous_start_ms,
            } => format!(
                "Event #{} starts at {}ms, before the previous event at {}ms",
                index, start_offset_ms, previous_start_ms
            ),
            TimelineError::DuplicateId { id } => format!("Duplicate chord event id {}", id),
            TimelineError::ZeroDuration { id } => {
                format!("Chord event {} has a zero duration", id)
            }
            TimelineError::OffsetOverflow { id } => {
                format!("Chord event {} ends beyond the supported clock range", id)
            }
        }
    }
}

impl fmt::Display for TimelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TimelineError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for TimelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_error_codes() {
        assert_eq!(
            TimelineError::DuplicateId { id: 3 }.code(),
            TimelineErrorCodes::DUPLICATE_ID
        );
        assert_eq!(
            TimelineError::ZeroDuration { id: 3 }.code(),
            TimelineErrorCodes::ZERO_DURATION
        );
        assert_eq!(
            TimelineError::OffsetOverflow { id: 3 }.code(),
            TimelineErrorCodes::OFFSET_OVERFLOW
        );
    }

    #[test]
    fn test_unsorted_message_names_offsets() {
        let err = TimelineError::Unsorted {
            index: 2,
            start_offset_ms: 100,
            previous_start_ms: 400,
        };
        let text = err.to_string();
        assert!(text.contains("code 2001"));
        assert!(text.contains("100ms"));
        assert!(text.contains("400ms"));
    }
}
