use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::RoundConfig;
use crate::error::{RowError, RowErrorKind};
use crate::models::Round;
use crate::rules::{first_match, Pattern, Rule};

/// Heat or section number at the end of a label: `h3`, `sf2`, `heat 4`, `final 1`
static SECTION_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*?[a-z])[\s\-]*\d+$").unwrap());

/// Single-letter labels that never take a section number. `r2` is round 2,
/// not a second repechage, and `s2` is not a semi-final.
const UNNUMBERED: &[&str] = &["r", "s"];

/// Exact labels after lower-casing and dropping the section number.
pub fn builtin_rules() -> Vec<Rule<Round>> {
    let table: &[(&[&str], Round)] = &[
        (
            &["final", "f", "a final", "b final", "fa", "fb", "final a", "final b"],
            Round::Final,
        ),
        (
            &["semi-final", "semi-finals", "semifinal", "semifinals", "semi final", "semi finals", "semi", "sf", "s"],
            Round::SemiFinals,
        ),
        (&["heat", "heats", "h", "r1", "round 1"], Round::Heats),
        (
            &["qualification", "qualifying", "qual", "q"],
            Round::Qualification,
        ),
        (&["repechage", "rep", "r"], Round::Repechage),
    ];

    table
        .iter()
        .flat_map(|(labels, round)| labels.iter().map(move |l| Rule::new(Pattern::exact(l), *round)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Matched(Round),
    /// Empty or a configured "none" token, normalized to Final
    Defaulted,
}

impl RoundOutcome {
    pub fn round(self) -> Round {
        match self {
            RoundOutcome::Matched(round) => round,
            RoundOutcome::Defaulted => Round::Final,
        }
    }
}

pub struct RoundNormalizer {
    rules: Vec<Rule<Round>>,
    none_tokens: Vec<String>,
}

impl RoundNormalizer {
    pub fn new(config: &RoundConfig) -> Self {
        Self {
            rules: builtin_rules(),
            none_tokens: config
                .none_tokens
                .iter()
                .map(|t| t.trim().to_lowercase())
                .collect(),
        }
    }

    pub fn normalize(&self, label: &str) -> Result<RoundOutcome, RowError> {
        let key = label.trim().to_lowercase();
        if key.is_empty() || self.none_tokens.contains(&key) {
            return Ok(RoundOutcome::Defaulted);
        }

        let base = SECTION_SUFFIX
            .captures(&key)
            .map(|caps| caps[1].to_string())
            .filter(|base| !UNNUMBERED.contains(&base.as_str()));

        first_match(&self.rules, &key)
            .or_else(|| base.and_then(|base| first_match(&self.rules, &base)))
            .map(|round| RoundOutcome::Matched(*round))
            .ok_or_else(|| {
                RowError::new(
                    RowErrorKind::RoundParse,
                    "round_raw",
                    label,
                    "unrecognized round label",
                )
            })
    }
}

impl Default for RoundNormalizer {
    fn default() -> Self {
        Self::new(&RoundConfig::default())
    }
}
