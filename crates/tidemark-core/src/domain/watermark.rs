use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{UtcDateTime, ValidationError};

/// Monotonically comparable marker for how much of a source's or node's data
/// has been incorporated. Total order over its UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark(UtcDateTime);

impl Watermark {
    pub const fn new(at: UtcDateTime) -> Self {
        Self(at)
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        UtcDateTime::parse(input).map(Self)
    }

    pub fn as_datetime(self) -> UtcDateTime {
        self.0
    }

    pub fn format_rfc3339(self) -> String {
        self.0.format_rfc3339()
    }

    /// The later of the two watermarks.
    pub fn merged_with(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

impl Display for Watermark {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_timestamp() {
        let earlier = Watermark::parse("2024-01-02T21:00:00Z").expect("parse");
        let later = Watermark::parse("2024-01-03T21:00:00Z").expect("parse");

        assert!(later > earlier);
        assert_eq!(earlier.merged_with(later), later);
        assert_eq!(later.merged_with(earlier), later);
    }
}
