use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical provider identifiers used in records, watermarks, and run output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Tiingo,
    Alphavantage,
    Yahoo,
}

impl SourceId {
    pub const ALL: [Self; 3] = [Self::Tiingo, Self::Alphavantage, Self::Yahoo];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tiingo => "tiingo",
            Self::Alphavantage => "alphavantage",
            Self::Yahoo => "yahoo",
        }
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tiingo" => Ok(Self::Tiingo),
            "alphavantage" => Ok(Self::Alphavantage),
            "yahoo" => Ok(Self::Yahoo),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}
