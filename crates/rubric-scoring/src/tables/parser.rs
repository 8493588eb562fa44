use super::normalizer::{is_blank, normalize_header, parse_flag};
use super::TableError;
use crate::scoring::{ItemResponse, RubricRow};
use csv::StringRecord;
use serde::{Deserialize, Deserializer};
use std::io::Read;

pub(crate) fn parse_responses<R: Read>(reader: R) -> Result<Vec<ItemResponse>, TableError> {
    let mut csv_reader = reader_with_normalized_headers(reader)?;
    let mut responses = Vec::new();

    for record in csv_reader.deserialize::<ResponseRow>() {
        let row = record?;
        responses.push(ItemResponse {
            subject_id: row.subject_id,
            survey_name: row.survey_name.unwrap_or_default(),
            item_id: row.item_id,
            value: row.value,
        });
    }

    Ok(responses)
}

/// `default_pattern` stands in for a blank or absent `survey_pattern` column.
pub(crate) fn parse_rubric<R: Read>(
    reader: R,
    default_pattern: &str,
) -> Result<Vec<RubricRow>, TableError> {
    let mut csv_reader = reader_with_normalized_headers(reader)?;
    let mut rows = Vec::new();

    for (index, record) in csv_reader.deserialize::<RubricCsvRow>().enumerate() {
        let row = record?;
        // Header is line 1.
        let line = index + 2;

        let reverse = match row.reverse.as_deref() {
            Some(raw) => parse_flag(raw).ok_or_else(|| TableError::InvalidField {
                line,
                column: "reverse",
                value: raw.to_string(),
            })?,
            None => false,
        };
        let min = parse_bound(row.min.as_deref(), line, "min")?;
        let max = parse_bound(row.max.as_deref(), line, "max")?;

        let scored_scale = row
            .scored_scale
            .unwrap_or_else(|| row.scale_name.clone());

        rows.push(RubricRow {
            survey_pattern: row
                .survey_pattern
                .unwrap_or_else(|| default_pattern.to_string()),
            scale_name: row.scale_name,
            scored_scale,
            item_id: row.item_id,
            include: row.include,
            reverse,
            min,
            max,
            transform: row.transform,
        });
    }

    Ok(rows)
}

fn reader_with_normalized_headers<R: Read>(reader: R) -> Result<csv::Reader<R>, TableError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers: StringRecord = csv_reader.headers()?.iter().map(normalize_header).collect();
    csv_reader.set_headers(headers);
    Ok(csv_reader)
}

fn parse_bound(
    raw: Option<&str>,
    line: usize,
    column: &'static str,
) -> Result<Option<f64>, TableError> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(Some)
        .ok_or_else(|| TableError::InvalidField {
            line,
            column,
            value: raw.to_string(),
        })
}

#[derive(Debug, Deserialize)]
struct ResponseRow {
    subject_id: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    survey_name: Option<String>,
    item_id: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RubricCsvRow {
    #[serde(default, deserialize_with = "blank_as_none")]
    survey_pattern: Option<String>,
    scale_name: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    scored_scale: Option<String>,
    #[serde(alias = "column_name")]
    item_id: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    reverse: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    min: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    max: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    transform: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    include: Option<String>,
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !is_blank(value)))
}
