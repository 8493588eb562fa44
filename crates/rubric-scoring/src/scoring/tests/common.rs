use crate::scoring::{ItemResponse, RubricRow, ScoringConfig, ScoringEngine};

pub(super) fn rubric(scale: &str, subscale: &str, item_id: &str, include: &str) -> RubricRow {
    RubricRow {
        survey_pattern: "wellbeing".to_string(),
        scale_name: scale.to_string(),
        scored_scale: subscale.to_string(),
        item_id: item_id.to_string(),
        include: Some(include.to_string()),
        reverse: false,
        min: Some(1.0),
        max: Some(4.0),
        transform: None,
    }
}

pub(super) fn reversed(mut row: RubricRow) -> RubricRow {
    row.reverse = true;
    row
}

pub(super) fn with_transform(mut row: RubricRow, transform: &str) -> RubricRow {
    row.transform = Some(transform.to_string());
    row
}

pub(super) fn answer(subject_id: &str, item_id: &str, value: &str) -> ItemResponse {
    ItemResponse::new(subject_id, "wellbeing_baseline", item_id, Some(value))
}

pub(super) fn engine() -> ScoringEngine {
    ScoringEngine::new(ScoringConfig::default())
}

pub(super) fn numeric(table: &crate::scoring::ScoredTable, subscale: &str, subject: &str) -> f64 {
    table
        .rows
        .iter()
        .find(|row| row.scored_scale == subscale && row.subject_id == subject)
        .and_then(|row| row.score.as_f64())
        .expect("numeric score present")
}
