//! Priority tiers assigned to enriched alerts

use serde::{Deserialize, Serialize};

/// Priority tier of an incident, P1 being the most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    P1,
    P2,
    P3,
    #[default]
    P4,
}

impl Priority {
    /// Map an alert `severity` label onto a tier
    pub fn from_severity(severity: &str) -> Self {
        match severity.to_lowercase().as_str() {
            "critical" | "page" | "emergency" => Self::P1,
            "high" | "error" | "major" => Self::P2,
            "warning" | "warn" | "medium" => Self::P3,
            _ => Self::P4,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P1 => write!(f, "P1"),
            Self::P2 => write!(f, "P2"),
            Self::P3 => write!(f, "P3"),
            Self::P4 => write!(f, "P4"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "P1" => Ok(Self::P1),
            "P2" => Ok(Self::P2),
            "P3" => Ok(Self::P3),
            "P4" => Ok(Self::P4),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}
