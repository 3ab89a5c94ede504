use serde::{Deserialize, Serialize};
use std::fmt;

/// One untyped source row. `row` is the 1-based data row number (header excluded).
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub row: u64,
    pub fields: csv::StringRecord,
}

/// A bounded slice of the source, in source order.
#[derive(Debug)]
pub struct Batch {
    pub index: u64,
    pub records: Vec<RawRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_row(&self) -> Option<u64> {
        self.records.first().map(|r| r.row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Men,
    Women,
}

/// Comparison polarity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TimeAscending,
    DistanceDescending,
    PointsDescending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Round {
    Heats,
    Qualification,
    #[serde(rename = "Semi Finals")]
    SemiFinals,
    Final,
    Repechage,
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Round::Heats => "Heats",
            Round::Qualification => "Qualification",
            Round::SemiFinals => "Semi Finals",
            Round::Final => "Final",
            Round::Repechage => "Repechage",
        };
        f.write_str(label)
    }
}

/// Mapper output: typed where trivial, raw text where a later stage decides.
#[derive(Debug, Clone)]
pub struct MappedRecord {
    pub row: u64,
    pub athlete_name: String,
    pub athlete_id_raw: String,
    pub country_code: String,
    pub gender: Gender,
    pub date_of_birth: String,
    pub event_name: String,
    pub result_text: String,
    pub wind: String,
    pub competition_id: String,
    pub competition_name: String,
    pub start_date: chrono::NaiveDate,
    pub round_raw: String,
    pub position: Option<u32>,
    pub wa_points: String,
    pub personal_best: String,
    pub season_best: String,
}

/// The durable output unit. Field order is the canonical column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub athlete_name: String,
    pub athlete_id_raw: String,
    pub athlete_id_canonical: String,
    pub country_code: String,
    pub gender: Gender,
    pub date_of_birth: String,
    pub event_name: String,
    pub event_kind: EventKind,
    pub result_text: String,
    pub result_numeric: Option<f64>,
    pub wind: String,
    pub competition_id: String,
    pub competition_name: String,
    #[serde(serialize_with = "serialize_date")]
    pub start_date: chrono::NaiveDate,
    pub year: i32,
    pub round_raw: String,
    pub round_normalized: Round,
    pub position: Option<u32>,
    pub wa_points: String,
    pub personal_best: String,
    pub season_best: String,
}

pub const CANONICAL_COLUMNS: &[&str] = &[
    "athlete_name",
    "athlete_id_raw",
    "athlete_id_canonical",
    "country_code",
    "gender",
    "date_of_birth",
    "event_name",
    "event_kind",
    "result_text",
    "result_numeric",
    "wind",
    "competition_id",
    "competition_name",
    "start_date",
    "year",
    "round_raw",
    "round_normalized",
    "position",
    "wa_points",
    "personal_best",
    "season_best",
];

fn serialize_date<S>(date: &chrono::NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(&date.format("%Y-%m-%d"))
}
