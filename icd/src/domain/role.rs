//! Responder roles - the analyzers an alert is fanned out to

use serde::{Deserialize, Serialize};

/// Category of specialized analyzer expected to answer about an alert
///
/// Each role owns a bus channel of the same name. Ordering is only used to
/// keep response maps and missing-role lists stable in forwarded payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponderRole {
    Metric,
    Log,
    Deployment,
    #[serde(alias = "trace")]
    Tracing,
    Notification,
    Postmortem,
}

impl ResponderRole {
    /// All roles in channel order
    pub const ALL: [ResponderRole; 6] = [
        Self::Metric,
        Self::Log,
        Self::Deployment,
        Self::Tracing,
        Self::Notification,
        Self::Postmortem,
    ];

    /// Bus channel this role listens on for fanned-out alerts
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Log => "log",
            Self::Deployment => "deployment",
            Self::Tracing => "tracing",
            Self::Notification => "notification",
            Self::Postmortem => "postmortem",
        }
    }
}

impl std::fmt::Display for ResponderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.channel())
    }
}

impl std::str::FromStr for ResponderRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metric" | "metrics" => Ok(Self::Metric),
            "log" | "logs" => Ok(Self::Log),
            "deployment" | "deploy" => Ok(Self::Deployment),
            "tracing" | "trace" => Ok(Self::Tracing),
            "notification" => Ok(Self::Notification),
            "postmortem" => Ok(Self::Postmortem),
            _ => Err(format!("Unknown responder role: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_channels_are_distinct() {
        let mut channels: Vec<_> = ResponderRole::ALL.iter().map(|r| r.channel()).collect();
        channels.sort();
        channels.dedup();
        assert_eq!(channels.len(), ResponderRole::ALL.len());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("METRIC".parse::<ResponderRole>().unwrap(), ResponderRole::Metric);
        assert_eq!("trace".parse::<ResponderRole>().unwrap(), ResponderRole::Tracing);
        assert!("root_cause".parse::<ResponderRole>().is_err());
    }

    #[test]
    fn test_role_serde_accepts_trace_alias() {
        let role: ResponderRole = serde_json::from_str("\"trace\"").unwrap();
        assert_eq!(role, ResponderRole::Tracing);

        let json = serde_json::to_string(&ResponderRole::Tracing).unwrap();
        assert_eq!(json, "\"tracing\"");
    }
}
