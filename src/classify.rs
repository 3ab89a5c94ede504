use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ClassifierConfig;
use crate::error::{RowError, RowErrorKind};
use crate::models::EventKind;
use crate::rules::{first_match, Pattern, Rule};

static RUNNING_DISTANCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d[\d,.]*\s?(m|km|k)\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRule {
    pub kind: EventKind,
    /// Marks are void when the tailwind exceeds the legal limit
    pub wind_relevant: bool,
}

const fn time(wind_relevant: bool) -> EventRule {
    EventRule {
        kind: EventKind::TimeAscending,
        wind_relevant,
    }
}

const fn distance(wind_relevant: bool) -> EventRule {
    EventRule {
        kind: EventKind::DistanceDescending,
        wind_relevant,
    }
}

const POINTS: EventRule = EventRule {
    kind: EventKind::PointsDescending,
    wind_relevant: false,
};

/// The built-in classification table, in evaluation order.
///
/// 1. Exact outdoor names of wind-measured events. Indoor and weight/height
///    variants fall through to the substring rules and are never wind-checked.
/// 2. Substring rules for multi-word formats (relays, walks, steeplechase,
///    hurdles, road events) so a relay leg length never reads as a flat race.
/// 3. Combined events, then throws and jumps including implement variants
///    such as `Shot Put (3kg)` or `Javelin Throw (700g)`.
/// 4. A generic running-distance pattern (`60m`, `10,000m`, `10km`, `5k`).
pub fn builtin_rules() -> Vec<Rule<EventRule>> {
    vec![
        Rule::new(Pattern::exact("100m"), time(true)),
        Rule::new(Pattern::exact("200m"), time(true)),
        Rule::new(Pattern::exact("100m Hurdles"), time(true)),
        Rule::new(Pattern::exact("110m Hurdles"), time(true)),
        Rule::new(Pattern::exact("Long Jump"), distance(true)),
        Rule::new(Pattern::exact("Triple Jump"), distance(true)),
        Rule::new(Pattern::contains("relay"), time(false)),
        Rule::new(Pattern::contains("walk"), time(false)),
        Rule::new(Pattern::contains("steeplechase"), time(false)),
        Rule::new(Pattern::contains("hurdles"), time(false)),
        Rule::new(Pattern::contains("marathon"), time(false)),
        Rule::new(Pattern::contains("cross country"), time(false)),
        Rule::new(Pattern::contains("mile"), time(false)),
        Rule::new(Pattern::contains("athlon"), POINTS),
        Rule::new(Pattern::contains("shot put"), distance(false)),
        Rule::new(Pattern::contains("discus"), distance(false)),
        Rule::new(Pattern::contains("hammer"), distance(false)),
        Rule::new(Pattern::contains("javelin"), distance(false)),
        Rule::new(Pattern::contains("weight throw"), distance(false)),
        Rule::new(Pattern::contains("high jump"), distance(false)),
        Rule::new(Pattern::contains("pole vault"), distance(false)),
        Rule::new(Pattern::contains("long jump"), distance(false)),
        Rule::new(Pattern::contains("triple jump"), distance(false)),
        Rule::new(Pattern::Regex(RUNNING_DISTANCE.clone()), time(false)),
    ]
}

pub struct EventClassifier {
    rules: Vec<Rule<EventRule>>,
    catch_all: Option<EventKind>,
}

impl EventClassifier {
    pub fn new(rules: Vec<Rule<EventRule>>, catch_all: Option<EventKind>) -> Self {
        Self { rules, catch_all }
    }

    /// Configured rules first, then the built-in table.
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.rules.len() + 32);
        for rule in &config.rules {
            rules.push(Rule::new(
                rule.pattern()?,
                EventRule {
                    kind: rule.kind,
                    wind_relevant: rule.wind,
                },
            ));
        }
        rules.extend(builtin_rules());
        Ok(Self::new(rules, config.catch_all))
    }

    pub fn classify(&self, event_name: &str) -> Result<EventRule, RowError> {
        let key = event_name.trim().to_lowercase();
        if let Some(rule) = first_match(&self.rules, &key) {
            return Ok(*rule);
        }
        match self.catch_all {
            Some(kind) => Ok(EventRule {
                kind,
                wind_relevant: false,
            }),
            None => Err(RowError::new(
                RowErrorKind::UnknownEvent,
                "event_name",
                event_name,
                "no classification rule matches this event",
            )),
        }
    }
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self::new(builtin_rules(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventRuleConfig, MatchType};

    fn kind(name: &str) -> EventKind {
        EventClassifier::default().classify(name).unwrap().kind
    }

    fn wind(name: &str) -> bool {
        EventClassifier::default()
            .classify(name)
            .unwrap()
            .wind_relevant
    }

    #[test]
    fn implement_weight_variant_is_distance() {
        assert_eq!(kind("Shot Put (3kg)"), EventKind::DistanceDescending);
        assert_eq!(kind("Javelin Throw (700g)"), EventKind::DistanceDescending);
        assert_eq!(kind("Hammer Throw"), EventKind::DistanceDescending);
    }

    #[test]
    fn combined_events_are_points() {
        assert_eq!(kind("Decathlon"), EventKind::PointsDescending);
        assert_eq!(kind("Heptathlon"), EventKind::PointsDescending);
        assert_eq!(kind("Pentathlon Indoor"), EventKind::PointsDescending);
    }

    #[test]
    fn track_and_road_events_are_time() {
        for name in [
            "100m",
            "400m",
            "10,000m",
            "3000m Steeplechase",
            "4x100m Relay",
            "4x400m Mixed Relay",
            "20km Race Walk",
            "Marathon",
            "Half Marathon",
            "One Mile",
            "10km Road",
            "60m Hurdles",
        ] {
            assert_eq!(kind(name), EventKind::TimeAscending, "{}", name);
        }
    }

    #[test]
    fn jumps_are_distance() {
        assert_eq!(kind("High Jump"), EventKind::DistanceDescending);
        assert_eq!(kind("Pole Vault"), EventKind::DistanceDescending);
        assert_eq!(kind("Long Jump Indoor"), EventKind::DistanceDescending);
    }

    #[test]
    fn wind_relevance_only_for_outdoor_sprints_and_horizontal_jumps() {
        assert!(wind("100m"));
        assert!(wind("110m Hurdles"));
        assert!(wind("Long Jump"));
        assert!(wind("triple jump"));
        assert!(!wind("400m"));
        assert!(!wind("4x100m Relay"));
        assert!(!wind("Long Jump Indoor"));
        assert!(!wind("60m"));
    }

    #[test]
    fn relay_never_reads_as_flat_race() {
        let rule = EventClassifier::default().classify("4x100m Relay").unwrap();
        assert!(!rule.wind_relevant);
    }

    #[test]
    fn unknown_event_fails_closed() {
        let err = EventClassifier::default()
            .classify("Tug of War")
            .unwrap_err();
        assert_eq!(err.kind, RowErrorKind::UnknownEvent);
        assert_eq!(err.value, "Tug of War");
    }

    #[test]
    fn catch_all_applies_when_configured() {
        let classifier = EventClassifier::new(builtin_rules(), Some(EventKind::TimeAscending));
        let rule = classifier.classify("Tug of War").unwrap();
        assert_eq!(rule.kind, EventKind::TimeAscending);
        assert!(!rule.wind_relevant);
    }

    #[test]
    fn configured_rules_take_precedence() {
        let config = ClassifierConfig {
            catch_all: None,
            rules: vec![EventRuleConfig {
                pattern: "100m".to_string(),
                match_type: MatchType::Exact,
                kind: EventKind::TimeAscending,
                wind: false,
            }],
        };
        let classifier = EventClassifier::from_config(&config).unwrap();
        assert!(!classifier.classify("100m").unwrap().wind_relevant);
    }
}
