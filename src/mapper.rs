//! Source column tables and the typed conversion of trivial fields.

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;

use crate::error::{PipelineError, RecordFailure, RowError, RowErrorKind};
use crate::identity::normalize_athlete_id;
use crate::models::{Gender, MappedRecord, RawRecord};
use crate::reader::SourceSchema;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

enum NameSource {
    Split {
        first: &'static str,
        last: &'static str,
    },
    Single(&'static str),
}

/// Source column name for each field the mapper reads.
struct ColumnNames {
    athlete_name: NameSource,
    athlete_id: &'static str,
    country_code: &'static str,
    gender: &'static str,
    date_of_birth: &'static str,
    event_name: &'static str,
    result_text: &'static str,
    wind: &'static str,
    round: &'static str,
    position: &'static str,
    competition_id: &'static str,
    competition_name: &'static str,
    start_date: &'static str,
    wa_points: &'static str,
    personal_best: &'static str,
    season_best: &'static str,
}

const EXPORT_NAMES: ColumnNames = ColumnNames {
    athlete_name: NameSource::Split {
        first: "firstname",
        last: "lastname",
    },
    athlete_id: "athleteid",
    country_code: "nationality",
    gender: "gender",
    date_of_birth: "dob",
    event_name: "eventname",
    result_text: "performance",
    wind: "wind",
    round: "round",
    position: "position",
    competition_id: "competitionid",
    competition_name: "competitionname",
    start_date: "competitiondate",
    wa_points: "wapoints",
    personal_best: "pb",
    season_best: "sb",
};

// Derived columns (canonical id, kind, numeric value, year, normalized round)
// are ignored and recomputed.
const CANONICAL_NAMES: ColumnNames = ColumnNames {
    athlete_name: NameSource::Single("athlete_name"),
    athlete_id: "athlete_id_raw",
    country_code: "country_code",
    gender: "gender",
    date_of_birth: "date_of_birth",
    event_name: "event_name",
    result_text: "result_text",
    wind: "wind",
    round: "round_raw",
    position: "position",
    competition_id: "competition_id",
    competition_name: "competition_name",
    start_date: "start_date",
    wa_points: "wa_points",
    personal_best: "personal_best",
    season_best: "season_best",
};

#[derive(Debug, Clone, Copy)]
struct Column {
    index: usize,
}

enum NameColumns {
    Split { first: Column, last: Column },
    Single(Column),
}

pub struct FieldMapper {
    schema: SourceSchema,
    /// Header names by position; a row must have one field per header
    header_names: Vec<String>,
    athlete_name: NameColumns,
    athlete_id: Column,
    country_code: Column,
    gender: Column,
    date_of_birth: Column,
    event_name: Column,
    result_text: Column,
    wind: Column,
    round: Column,
    position: Column,
    competition_id: Column,
    competition_name: Column,
    start_date: Column,
    wa_points: Column,
    personal_best: Column,
    season_best: Column,
}

impl FieldMapper {
    pub fn new(schema: SourceSchema, headers: &StringRecord) -> Result<Self, PipelineError> {
        let names = match schema {
            SourceSchema::Export => &EXPORT_NAMES,
            SourceSchema::Canonical => &CANONICAL_NAMES,
        };
        let locate = |name: &'static str| -> Result<Column, PipelineError> {
            headers
                .iter()
                .position(|h| h == name)
                .map(|index| Column { index })
                .ok_or_else(|| PipelineError::MissingColumn {
                    row: 0,
                    column: name.to_string(),
                })
        };

        let athlete_name = match names.athlete_name {
            NameSource::Split { first, last } => NameColumns::Split {
                first: locate(first)?,
                last: locate(last)?,
            },
            NameSource::Single(name) => NameColumns::Single(locate(name)?),
        };

        Ok(Self {
            schema,
            header_names: headers.iter().map(str::to_string).collect(),
            athlete_name,
            athlete_id: locate(names.athlete_id)?,
            country_code: locate(names.country_code)?,
            gender: locate(names.gender)?,
            date_of_birth: locate(names.date_of_birth)?,
            event_name: locate(names.event_name)?,
            result_text: locate(names.result_text)?,
            wind: locate(names.wind)?,
            round: locate(names.round)?,
            position: locate(names.position)?,
            competition_id: locate(names.competition_id)?,
            competition_name: locate(names.competition_name)?,
            start_date: locate(names.start_date)?,
            wa_points: locate(names.wa_points)?,
            personal_best: locate(names.personal_best)?,
            season_best: locate(names.season_best)?,
        })
    }

    pub fn schema(&self) -> SourceSchema {
        self.schema
    }

    pub fn map(&self, raw: &RawRecord) -> Result<MappedRecord, RecordFailure> {
        if raw.fields.len() < self.header_names.len() {
            return Err(PipelineError::MissingColumn {
                row: raw.row,
                column: self.header_names[raw.fields.len()].clone(),
            }
            .into());
        }
        let get = |col: Column| field(raw, col);
        let row_err = |e: RowError| RecordFailure::Row(e.at_row(raw.row));

        let athlete_name = match &self.athlete_name {
            NameColumns::Split { first, last } => {
                let first = get(*first).trim();
                let last = get(*last).trim();
                format!("{} {}", first, last).trim().to_string()
            }
            NameColumns::Single(col) => get(*col).trim().to_string(),
        };

        let country_code = parse_country(get(self.country_code)).map_err(row_err)?;
        let gender = parse_gender(get(self.gender)).map_err(row_err)?;
        let event_name = required("event_name", get(self.event_name)).map_err(row_err)?;
        let competition_id = normalize_athlete_id(
            &required("competition_id", get(self.competition_id)).map_err(row_err)?,
        );
        let start_date = parse_date(get(self.start_date)).map_err(row_err)?;
        let position = parse_position(get(self.position));

        Ok(MappedRecord {
            row: raw.row,
            athlete_name,
            athlete_id_raw: get(self.athlete_id).trim().to_string(),
            country_code,
            gender,
            date_of_birth: get(self.date_of_birth).to_string(),
            event_name,
            result_text: get(self.result_text).trim().to_string(),
            wind: get(self.wind).to_string(),
            competition_id,
            competition_name: get(self.competition_name).to_string(),
            start_date,
            round_raw: get(self.round).trim().to_string(),
            position,
            wa_points: get(self.wa_points).to_string(),
            personal_best: get(self.personal_best).to_string(),
            season_best: get(self.season_best).to_string(),
        })
    }
}

fn field(raw: &RawRecord, col: Column) -> &str {
    &raw.fields[col.index]
}

fn invalid(column: &str, value: &str, message: &str) -> RowError {
    RowError::new(RowErrorKind::InvalidField, column, value, message)
}

fn required(column: &str, value: &str) -> Result<String, RowError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid(column, value, "required field is empty"));
    }
    Ok(trimmed.to_string())
}

pub fn parse_country(value: &str) -> Result<String, RowError> {
    let code = required("country_code", value)?.to_uppercase();
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(invalid(
            "country_code",
            value,
            "country code must be three letters",
        ));
    }
    Ok(code)
}

pub fn parse_gender(value: &str) -> Result<Gender, RowError> {
    match value.trim().to_lowercase().as_str() {
        "m" | "men" | "male" => Ok(Gender::Men),
        "f" | "w" | "women" | "female" => Ok(Gender::Women),
        _ => Err(invalid("gender", value, "unrecognized gender")),
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, RowError> {
    let text = required("start_date", value)?;
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&text, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(&text, fmt).ok())
                .map(|dt| dt.date())
        })
        .ok_or_else(|| invalid("start_date", value, "unrecognized date format"))
}

/// Tie (`=3`) and ordinal (`3.`) markers are dropped. Anything that is not a
/// whole number (`DNF`, `-`, empty) means no placing.
pub fn parse_position(value: &str) -> Option<u32> {
    value
        .trim()
        .trim_start_matches('=')
        .trim_end_matches(['.', '='])
        .trim()
        .parse::<u32>()
        .ok()
}
