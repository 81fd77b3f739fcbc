//! Alert enrichment
//!
//! Enrichment heuristics belong to a collaborator outside the coordinator; this
//! module only fixes the seam ([`AlertEnricher`]) and ships a small keyword-based
//! default so the daemon is usable without one.

use std::collections::BTreeSet;

use tracing::debug;

use crate::domain::{EnrichedAlert, Priority, RawAlert, ResponderRole, SearchContext};

/// Turns a raw alert into the payload that is fanned out
pub trait AlertEnricher: Send + Sync {
    fn enrich(&self, alert: RawAlert) -> EnrichedAlert;
}

/// Keyword routing table: role and the words that hint at it
const ROUTING_KEYWORDS: &[(ResponderRole, &[&str])] = &[
    (
        ResponderRole::Metric,
        &["cpu", "memory", "latency", "saturation", "throughput", "disk", "oom"],
    ),
    (
        ResponderRole::Log,
        &["error", "exception", "panic", "crash", "stacktrace", "5xx"],
    ),
    (
        ResponderRole::Deployment,
        &["deploy", "rollout", "release", "version", "image", "canary"],
    ),
    (ResponderRole::Tracing, &["trace", "span", "timeout", "dependency", "upstream"]),
];

/// Default enricher: severity-based priority and keyword routing hints
#[derive(Debug, Clone, Default)]
pub struct KeywordEnricher;

impl KeywordEnricher {
    pub fn new() -> Self {
        Self
    }

    /// Lower-cased words from the alert's name and human-readable annotations
    fn keywords(alert: &RawAlert) -> Vec<String> {
        let mut text = String::new();
        for part in [
            alert.name(),
            alert.annotation("summary"),
            alert.annotation("description"),
        ]
        .into_iter()
        .flatten()
        {
            text.push(' ');
            text.push_str(part);
        }

        // Split camel case so "HighLatency" yields "high" and "latency"
        let mut spaced = String::with_capacity(text.len());
        let mut prev_lower = false;
        for c in text.chars() {
            if c.is_uppercase() && prev_lower {
                spaced.push(' ');
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            spaced.push(c);
        }

        let mut seen = BTreeSet::new();
        spaced
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
            .map(str::to_lowercase)
            .filter(|w| seen.insert(w.clone()))
            .collect()
    }

    /// Roles hinted by the keywords, strongest match first
    fn route(keywords: &[String]) -> Vec<ResponderRole> {
        let mut scored: Vec<(usize, ResponderRole)> = ROUTING_KEYWORDS
            .iter()
            .map(|(role, words)| {
                let hits = keywords
                    .iter()
                    .filter(|k| words.iter().any(|w| k.contains(w)))
                    .count();
                (hits, *role)
            })
            .filter(|(hits, _)| *hits > 0)
            .collect();

        // Stable sort keeps table order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, role)| role).collect()
    }
}

impl AlertEnricher for KeywordEnricher {
    fn enrich(&self, alert: RawAlert) -> EnrichedAlert {
        let priority = alert.label("severity").map(Priority::from_severity).unwrap_or_default();
        let keywords = Self::keywords(&alert);
        let mut routed = Self::route(&keywords).into_iter();
        let primary_responder = routed.next();
        let secondary_responders: Vec<_> = routed.collect();

        let search_context = SearchContext {
            service: alert
                .label("service")
                .or_else(|| alert.label("job"))
                .or_else(|| alert.label("app"))
                .map(String::from),
            namespace: alert.label("namespace").map(String::from),
            keywords,
        };

        let mut enriched = EnrichedAlert::new(alert);
        debug!(
            alert_id = %enriched.alert_id,
            %priority,
            ?primary_responder,
            "KeywordEnricher::enrich: enriched"
        );
        enriched.priority = priority;
        enriched.primary_responder = primary_responder;
        enriched.secondary_responders = secondary_responders;
        enriched.search_context = search_context;
        enriched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alert(value: serde_json::Value) -> RawAlert {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_enrich_priority_from_severity() {
        let enriched = KeywordEnricher::new().enrich(alert(json!({
            "alert_id": "A1",
            "labels": {"alertname": "DiskFull", "severity": "critical"}
        })));
        assert_eq!(enriched.alert_id, "A1");
        assert_eq!(enriched.priority, Priority::P1);
    }

    #[test]
    fn test_enrich_missing_severity_defaults() {
        let enriched = KeywordEnricher::new().enrich(alert(json!({"labels": {"alertname": "Thing"}})));
        assert_eq!(enriched.priority, Priority::P4);
        assert!(enriched.primary_responder.is_none());
        assert!(enriched.alert_id.starts_with("alert-"));
    }

    #[test]
    fn test_enrich_routing_hints() {
        let enriched = KeywordEnricher::new().enrich(alert(json!({
            "labels": {"alertname": "HighLatency", "service": "checkout", "namespace": "prod"},
            "annotations": {"summary": "Latency spike after deploy of version 1.4"}
        })));

        assert_eq!(enriched.primary_responder, Some(ResponderRole::Deployment));
        assert!(enriched.secondary_responders.contains(&ResponderRole::Metric));
        assert_eq!(enriched.search_context.service.as_deref(), Some("checkout"));
        assert_eq!(enriched.search_context.namespace.as_deref(), Some("prod"));
        assert!(enriched.search_context.keywords.contains(&"latency".to_string()));
    }

    #[test]
    fn test_keywords_split_camel_case_and_dedupe() {
        let raw = alert(json!({
            "labels": {"alertname": "PodCrashLooping"},
            "annotations": {"summary": "pod crash loop"}
        }));
        let keywords = KeywordEnricher::keywords(&raw);
        assert_eq!(keywords.iter().filter(|k| *k == "crash").count(), 1);
        assert!(keywords.contains(&"looping".to_string()));
    }
}
