use super::domain::{GroupKey, IncludeTag, ItemResponse, RubricRow, RubricRule};
use super::ScoringError;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A rubric rule paired with one subject's value for its item.
#[derive(Debug, Clone)]
pub struct JoinedRow<'a> {
    pub key: GroupKey,
    /// Position of `rule` in the compiled rule list.
    pub rule_index: usize,
    pub rule: &'a RubricRule,
    /// `None` when the subject never answered the item or left it blank.
    pub value: Option<&'a str>,
}

/// Working set handed to the engine after joining and exclusion.
#[derive(Debug, Clone, Default)]
pub struct JoinedSet<'a> {
    pub rows: Vec<JoinedRow<'a>>,
    pub excluded: usize,
    pub synthesized: usize,
}

/// Turns rubric rows into typed rules and joins them onto responses.
pub struct RuleCompiler;

impl RuleCompiler {
    pub fn compile(rows: &[RubricRow]) -> Result<Vec<RubricRule>, ScoringError> {
        rows.iter().map(compile_rule).collect()
    }

    /// Left-joins `rules` onto `responses` by item id, then drops excluded rows.
    ///
    /// A rule only sees surveys matching its pattern. Every matching (survey, subject)
    /// pair gets a row for that rule; pairs without an answer carry a missing value.
    pub fn join<'a>(rules: &'a [RubricRule], responses: &'a [ItemResponse]) -> JoinedSet<'a> {
        let mut by_item: HashMap<&str, Vec<&ItemResponse>> = HashMap::new();
        let mut participants: BTreeSet<(&str, &str)> = BTreeSet::new();
        for response in responses {
            by_item
                .entry(response.item_id.as_str())
                .or_default()
                .push(response);
            participants.insert((
                response.survey_name.as_str(),
                response.subject_id.as_str(),
            ));
        }

        let mut joined = JoinedSet::default();
        for (rule_index, rule) in rules.iter().enumerate() {
            let answers = by_item
                .get(rule.item_id.as_str())
                .map(Vec::as_slice)
                .unwrap_or_default();

            let mut answered: HashSet<(&str, &str)> = HashSet::new();
            let mut rows = Vec::with_capacity(answers.len());
            for response in answers
                .iter()
                .filter(|response| rule.matches_survey(&response.survey_name))
            {
                answered.insert((
                    response.survey_name.as_str(),
                    response.subject_id.as_str(),
                ));
                rows.push(JoinedRow {
                    key: group_key(rule, &response.survey_name, &response.subject_id),
                    rule_index,
                    rule,
                    value: response.value.as_deref(),
                });
            }

            for &(survey_name, subject_id) in &participants {
                if rule.matches_survey(survey_name) && !answered.contains(&(survey_name, subject_id))
                {
                    joined.synthesized += 1;
                    rows.push(JoinedRow {
                        key: group_key(rule, survey_name, subject_id),
                        rule_index,
                        rule,
                        value: None,
                    });
                }
            }

            if rule.include.is_excluded() {
                joined.excluded += rows.len();
            } else {
                joined.rows.extend(rows);
            }
        }

        joined
    }
}

fn group_key(rule: &RubricRule, survey_name: &str, subject_id: &str) -> GroupKey {
    GroupKey {
        survey_name: survey_name.to_string(),
        scale_name: rule.scale_name.clone(),
        scored_scale: rule.scored_scale.clone(),
        subject_id: subject_id.to_string(),
    }
}

fn compile_rule(row: &RubricRow) -> Result<RubricRule, ScoringError> {
    let include = IncludeTag::parse(row.include.as_deref());

    if !include.is_excluded() {
        if row.reverse && (row.min.is_none() || row.max.is_none()) {
            return Err(ScoringError::MissingBounds {
                item_id: row.item_id.clone(),
                reason: "item is flagged for reverse-coding".to_string(),
            });
        }

        if let (Some(min), Some(max)) = (row.min, row.max) {
            if min > max {
                return Err(ScoringError::InvalidBounds {
                    item_id: row.item_id.clone(),
                    min,
                    max,
                });
            }
        }
    }

    Ok(RubricRule {
        survey_pattern: row.survey_pattern.trim().to_string(),
        scale_name: row.scale_name.trim().to_string(),
        scored_scale: row.scored_scale.trim().to_string(),
        item_id: row.item_id.trim().to_string(),
        include,
        reverse: row.reverse,
        min: row.min,
        max: row.max,
        transform: row.transform.as_deref().unwrap_or_default().trim().to_string(),
    })
}
