//! Batch parameters shared by every task of a batch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output aspect ratio requested from the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "2:3")]
    Portrait,
    #[serde(rename = "3:2")]
    Landscape,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "2:3",
            AspectRatio::Landscape => "3:2",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported aspect ratio '{0}' (expected 1:1, 2:3 or 3:2)")]
pub struct ParseAspectRatioError(pub String);

impl FromStr for AspectRatio {
    type Err = ParseAspectRatioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1:1" => Ok(AspectRatio::Square),
            "2:3" => Ok(AspectRatio::Portrait),
            "3:2" => Ok(AspectRatio::Landscape),
            other => Err(ParseAspectRatioError(other.to_string())),
        }
    }
}

/// What a `StartBatch` command carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSpec {
    pub prompts: Vec<String>,
    pub quantity: u32,
    pub aspect_ratio: AspectRatio,
}
