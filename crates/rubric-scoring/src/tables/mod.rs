//! CSV ingestion of response and rubric tables, and emission of scored tables.

mod normalizer;
mod parser;

use crate::scoring::{ItemResponse, RubricRow, ScoredTable};
use std::io::{Read, Write};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to read table: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("line {line}: column '{column}' has unsupported value '{value}'")]
    InvalidField {
        line: usize,
        column: &'static str,
        value: String,
    },
}

/// Long-format response table loader.
pub struct ResponseTable;

impl ResponseTable {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<ItemResponse>, TableError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<ItemResponse>, TableError> {
        parser::parse_responses(reader)
    }
}

/// Rubric table loader. One file per measure; several files are concatenated.
pub struct RubricTable;

impl RubricTable {
    /// Rows without a `survey_pattern` take the file stem.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<RubricRow>, TableError> {
        let path = path.as_ref();
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = std::fs::File::open(path)?;
        parser::parse_rubric(file, &stem)
    }

    pub fn from_paths<I, P>(paths: I) -> Result<Vec<RubricRow>, TableError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut rows = Vec::new();
        for path in paths {
            rows.extend(Self::from_path(path)?);
        }
        Ok(rows)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        default_pattern: &str,
    ) -> Result<Vec<RubricRow>, TableError> {
        parser::parse_rubric(reader, default_pattern)
    }
}

/// Writes one CSV row per score; missing scores are empty cells.
pub fn write_scores_csv<W: Write>(writer: W, table: &ScoredTable) -> Result<(), TableError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in &table.rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_scores_json<W: Write>(writer: W, table: &ScoredTable) -> Result<(), TableError> {
    serde_json::to_writer_pretty(writer, table)?;
    Ok(())
}
