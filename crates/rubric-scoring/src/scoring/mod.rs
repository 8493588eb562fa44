mod aggregation;
pub mod domain;
mod reversal;
mod rules;
pub mod transform;
mod validation;

#[cfg(test)]
mod tests;

pub use aggregation::{
    aggregate, Aggregate, AggregationMethod, AggregationRegistry, AggregationResolver,
    MissingPolicy, Reducer,
};
pub use domain::{
    GroupKey, IncludeTag, ItemBounds, ItemResponse, RubricRow, RubricRule, ScoreValue, ScoredValue,
};
pub use reversal::{reverse, ReversalApplier};
pub use rules::{JoinedRow, JoinedSet, RuleCompiler};
pub use transform::{CompiledTransform, ExpressionError, TransformSpec, TransformationEvaluator};
pub use validation::{ensure_uniform_by, uniform_value, Directive};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Method label carried by passthrough rows.
pub const IDENTITY_METHOD: &str = "identity";

/// Raw cells that count as missing before numeric coercion.
const MISSING_TOKENS: [&str; 4] = ["na", "nan", "null", "n/a"];

/// Fatal configuration and consistency defects. Any of these aborts the whole run.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("inconsistent {directive} within {group}: found {}", .values.join(", "))]
    InconsistentDirective {
        directive: Directive,
        group: String,
        values: Vec<String>,
    },
    #[error("unknown aggregation method '{tag}' for {group}")]
    UnknownAggregation { tag: String, group: String },
    #[error("item '{item_id}' has no min/max bounds: {reason}")]
    MissingBounds { item_id: String, reason: String },
    #[error("item '{item_id}' has min {min} greater than max {max}")]
    InvalidBounds { item_id: String, min: f64, max: f64 },
    #[error("item '{item_id}' has malformed transform '{spec}': {source}")]
    MalformedTransform {
        item_id: String,
        spec: String,
        source: ExpressionError,
    },
}

/// Missing-value policies and execution knobs for one scoring run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub mean_missing: MissingPolicy,
    pub aggregate_missing: MissingPolicy,
    pub parallel: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            mean_missing: MissingPolicy::Exclude,
            aggregate_missing: MissingPolicy::Propagate,
            parallel: false,
        }
    }
}

/// Row accounting for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScoringSummary {
    pub joined_rows: usize,
    pub excluded_rows: usize,
    pub unanswered_rows: usize,
    pub identity_rows: usize,
    pub numeric_rows: usize,
    pub non_numeric_values: usize,
    pub empty_groups: usize,
    pub scores: usize,
}

/// Scored output ordered by survey, scale, subscale, then subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoredTable {
    pub summary: ScoringSummary,
    pub rows: Vec<ScoredValue>,
}

impl ScoredTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn find(&self, scale_name: &str, scored_scale: &str, subject_id: &str) -> Option<&ScoredValue> {
        self.rows.iter().find(|row| {
            row.scale_name == scale_name
                && row.scored_scale == scored_scale
                && row.subject_id == subject_id
        })
    }
}

/// Rubric-driven scorer: join, validate, transform, reverse, aggregate.
pub struct ScoringEngine {
    config: ScoringConfig,
    registry: AggregationRegistry,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self::with_registry(config, AggregationRegistry::builtin())
    }

    pub fn with_registry(config: ScoringConfig, registry: AggregationRegistry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn registry(&self) -> &AggregationRegistry {
        &self.registry
    }

    pub fn score(
        &self,
        responses: &[ItemResponse],
        rubric: &[RubricRow],
    ) -> Result<ScoredTable, ScoringError> {
        let rules = RuleCompiler::compile(rubric)?;
        let joined = RuleCompiler::join(&rules, responses);

        let mut summary = ScoringSummary {
            joined_rows: joined.rows.len() + joined.excluded,
            excluded_rows: joined.excluded,
            unanswered_rows: joined.synthesized,
            ..ScoringSummary::default()
        };

        ensure_uniform_by(
            Directive::Include,
            &joined.rows,
            |row| row.key.clone(),
            |row| row.rule.include.clone(),
        )?;

        let (identity, numeric): (Vec<_>, Vec<_>) = joined
            .rows
            .into_iter()
            .partition(|row| row.rule.include.is_identity());
        summary.identity_rows = identity.len();
        summary.numeric_rows = numeric.len();

        let (mut rows, identity_empty) = score_identity(&identity)?;
        let (numeric_rows, numeric_empty, non_numeric) = self.score_numeric(&rules, &numeric)?;
        rows.extend(numeric_rows);
        rows.sort_by(|a, b| {
            (&a.survey_name, &a.scale_name, &a.scored_scale, &a.subject_id).cmp(&(
                &b.survey_name,
                &b.scale_name,
                &b.scored_scale,
                &b.subject_id,
            ))
        });

        summary.non_numeric_values = non_numeric;
        summary.empty_groups = identity_empty + numeric_empty;
        summary.scores = rows.len();

        info!(
            joined = summary.joined_rows,
            excluded = summary.excluded_rows,
            identity = summary.identity_rows,
            numeric = summary.numeric_rows,
            empty_groups = summary.empty_groups,
            scores = summary.scores,
            "scoring run complete"
        );

        Ok(ScoredTable { summary, rows })
    }

    /// Transforms, reverse-codes, and aggregates the numeric partition.
    fn score_numeric(
        &self,
        rules: &[RubricRule],
        rows: &[JoinedRow<'_>],
    ) -> Result<(Vec<ScoredValue>, usize, usize), ScoringError> {
        ensure_uniform_by(
            Directive::Transform,
            rows,
            |row| row.rule.item_id.clone(),
            |row| row.rule.transform.clone(),
        )?;

        let mut non_numeric = 0;
        let mut values: Vec<Option<f64>> = rows
            .iter()
            .map(|row| {
                let (value, rejected) = coerce(row.value);
                if rejected {
                    non_numeric += 1;
                    debug!(item = %row.rule.item_id, subject = %row.key.subject_id, "non-numeric value treated as missing");
                }
                value
            })
            .collect();

        let mut columns: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (index, row) in rows.iter().enumerate() {
            columns.entry(row.rule_index).or_default().push(index);
        }

        let mut evaluator = TransformationEvaluator::new();
        for (rule_index, indices) in columns {
            let rule = &rules[rule_index];
            let bounds = rule.bounds();
            let compiled = evaluator.compile(&rule.item_id, &rule.transform, bounds)?;

            let mut column: Vec<Option<f64>> = indices.iter().map(|&index| values[index]).collect();
            compiled.apply_column(&mut column, bounds);
            if rule.reverse {
                let bounds = bounds.ok_or_else(|| ScoringError::MissingBounds {
                    item_id: rule.item_id.clone(),
                    reason: "item is flagged for reverse-coding".to_string(),
                })?;
                ReversalApplier::apply(&mut column, bounds);
            }

            for (index, value) in indices.into_iter().zip(column) {
                values[index] = value;
            }
        }
        debug!(distinct = evaluator.len(), "compiled transform specifications");

        let mut groups: BTreeMap<&GroupKey, (Vec<&IncludeTag>, Vec<Option<f64>>)> =
            BTreeMap::new();
        for (row, value) in rows.iter().zip(values) {
            let (tags, group_values) = groups.entry(&row.key).or_default();
            tags.push(&row.rule.include);
            group_values.push(value);
        }

        let resolver = AggregationResolver::new(
            &self.registry,
            self.config.mean_missing,
            self.config.aggregate_missing,
        );
        let groups: Vec<_> = groups.into_iter().collect();
        let results: Vec<Result<(ScoredValue, bool), ScoringError>> = if self.config.parallel {
            groups
                .into_par_iter()
                .map(|(key, (tags, values))| score_group(&resolver, key, &tags, &values))
                .collect()
        } else {
            groups
                .into_iter()
                .map(|(key, (tags, values))| score_group(&resolver, key, &tags, &values))
                .collect()
        };

        let mut scored = Vec::with_capacity(results.len());
        let mut empty = 0;
        for result in results {
            let (row, was_empty) = result?;
            if was_empty {
                empty += 1;
            }
            scored.push(row);
        }

        Ok((scored, empty, non_numeric))
    }
}

fn score_group(
    resolver: &AggregationResolver<'_>,
    key: &GroupKey,
    tags: &[&IncludeTag],
    values: &[Option<f64>],
) -> Result<(ScoredValue, bool), ScoringError> {
    let (method, result) = resolver.resolve_and_aggregate(key, tags, values)?;
    let row = ScoredValue::new(
        key.clone(),
        result.score.into(),
        result.item_count,
        result.missing_count,
        method.label(),
    );
    Ok((row, result.is_empty()))
}

/// Emits one passthrough row per group; the group's non-missing values must agree.
fn score_identity(rows: &[JoinedRow<'_>]) -> Result<(Vec<ScoredValue>, usize), ScoringError> {
    let mut groups: BTreeMap<&GroupKey, Vec<Option<&str>>> = BTreeMap::new();
    for row in rows {
        groups
            .entry(&row.key)
            .or_default()
            .push(row.value.filter(|value| !is_missing_token(value)));
    }

    let mut scored = Vec::with_capacity(groups.len());
    let mut empty = 0;
    for (key, values) in groups {
        let present: Vec<&str> = values.iter().flatten().copied().collect();
        let verbatim = uniform_value(Directive::IdentityValue, key, present.iter().copied())?;

        let score = match verbatim {
            Some(value) => ScoreValue::Verbatim(value.to_string()),
            None => {
                empty += 1;
                warn!(group = %key, "identity group has no values; emitting missing score");
                ScoreValue::Missing
            }
        };

        scored.push(ScoredValue::new(
            key.clone(),
            score,
            present.len(),
            values.len() - present.len(),
            IDENTITY_METHOD,
        ));
    }

    Ok((scored, empty))
}

/// Shared by the table loader and numeric coercion.
pub(crate) fn is_missing_token(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || MISSING_TOKENS
            .iter()
            .any(|token| trimmed.eq_ignore_ascii_case(token))
}

/// Numeric coercion; the flag is set when a non-blank value could not be parsed.
fn coerce(raw: Option<&str>) -> (Option<f64>, bool) {
    let Some(raw) = raw.filter(|raw| !is_missing_token(raw)) else {
        return (None, false);
    };

    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => (Some(value), false),
        _ => (None, true),
    }
}
