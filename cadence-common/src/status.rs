use core::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a dispatch unit.
///
/// A unit is created `Pending` and is resolved by the worker pool to either
/// `Sent` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

impl UnitStatus {
    /// Whether the unit still waits for a delivery attempt
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }
}

impl Display for UnitStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

/// Unrecognised textual status or priority
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct ParseError {
    kind: &'static str,
    value: String,
}

impl FromStr for UnitStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            _ => Err(ParseError {
                kind: "status",
                value: s.to_string(),
            }),
        }
    }
}

/// Priority class of a campaign.
///
/// `High` is the "send now" class: its units skip the delay schedule and are
/// released ahead of `Normal` units that are due at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    #[serde(alias = "low")]
    Normal,
}

impl Priority {
    /// Queue weight, larger is released first
    pub const fn weight(self) -> u8 {
        match self {
            Self::High => 10,
            Self::Normal => 1,
        }
    }

    pub const fn is_high(self) -> bool {
        matches!(self, Self::High)
    }
}

impl Display for Priority {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => fmt.write_str("high"),
            Self::Normal => fmt.write_str("normal"),
        }
    }
}

impl FromStr for Priority {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" | "low" => Ok(Self::Normal),
            _ => Err(ParseError {
                kind: "priority",
                value: s.to_string(),
            }),
        }
    }
}
