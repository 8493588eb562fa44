use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// One long-format answer: a single subject's raw value for a single item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResponse {
    pub subject_id: String,
    pub survey_name: String,
    pub item_id: String,
    pub value: Option<String>,
}

impl ItemResponse {
    pub fn new(
        subject_id: impl Into<String>,
        survey_name: impl Into<String>,
        item_id: impl Into<String>,
        value: Option<&str>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            survey_name: survey_name.into(),
            item_id: item_id.into(),
            value: value.map(str::to_string),
        }
    }
}

/// Rubric row as supplied by the loader, before tags and bounds are validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricRow {
    pub survey_pattern: String,
    pub scale_name: String,
    pub scored_scale: String,
    pub item_id: String,
    pub include: Option<String>,
    pub reverse: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub transform: Option<String>,
}

/// Per-item directive selecting exclusion, an aggregation method, or passthrough.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncludeTag {
    Excluded,
    Mean,
    Named(String),
    Identity,
}

impl IncludeTag {
    pub const MEAN_TAG: &'static str = "1";
    pub const IDENTITY_TAG: &'static str = "I";

    /// Blank and `0` exclude; `1` is the mean; `I` is identity; anything else names a reduction.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Self::Excluded;
        };

        match raw {
            "0" => Self::Excluded,
            Self::MEAN_TAG => Self::Mean,
            "I" | "i" => Self::Identity,
            other => Self::Named(other.to_ascii_lowercase()),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, Self::Excluded)
    }
}

impl fmt::Display for IncludeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncludeTag::Excluded => f.write_str("0"),
            IncludeTag::Mean => f.write_str(Self::MEAN_TAG),
            IncludeTag::Named(name) => f.write_str(name),
            IncludeTag::Identity => f.write_str(Self::IDENTITY_TAG),
        }
    }
}

/// Item-scoped response bounds used by reverse-coding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemBounds {
    pub min: f64,
    pub max: f64,
}

/// Typed scoring rule compiled from a [`RubricRow`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RubricRule {
    pub survey_pattern: String,
    pub scale_name: String,
    pub scored_scale: String,
    pub item_id: String,
    pub include: IncludeTag,
    pub reverse: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub transform: String,
}

impl RubricRule {
    pub fn bounds(&self) -> Option<ItemBounds> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some(ItemBounds { min, max }),
            _ => None,
        }
    }

    /// Blank patterns apply to every survey; otherwise a case-insensitive substring match.
    pub fn matches_survey(&self, survey_name: &str) -> bool {
        let pattern = self.survey_pattern.trim();
        pattern.is_empty()
            || survey_name
                .to_ascii_lowercase()
                .contains(&pattern.to_ascii_lowercase())
    }
}

/// Output grouping: one scored row per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupKey {
    pub survey_name: String,
    pub scale_name: String,
    pub scored_scale: String,
    pub subject_id: String,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "survey '{}', scale '{}', subscale '{}', subject '{}'",
            self.survey_name, self.scale_name, self.scored_scale, self.subject_id
        )
    }
}

/// Score cell: an aggregate, a passthrough value, or nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreValue {
    Numeric(f64),
    Verbatim(String),
    Missing,
}

impl ScoreValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScoreValue::Numeric(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, ScoreValue::Missing)
    }
}

impl From<Option<f64>> for ScoreValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(ScoreValue::Missing, ScoreValue::Numeric)
    }
}

impl fmt::Display for ScoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreValue::Numeric(value) => write!(f, "{value}"),
            ScoreValue::Verbatim(value) => f.write_str(value),
            ScoreValue::Missing => f.write_str("NA"),
        }
    }
}

impl Serialize for ScoreValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ScoreValue::Numeric(value) => serializer.serialize_f64(*value),
            ScoreValue::Verbatim(value) => serializer.serialize_str(value),
            ScoreValue::Missing => serializer.serialize_none(),
        }
    }
}

/// One row of the scored table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredValue {
    pub survey_name: String,
    pub scale_name: String,
    pub scored_scale: String,
    pub subject_id: String,
    pub score: ScoreValue,
    pub item_count: usize,
    pub missing_count: usize,
    pub method: String,
}

impl ScoredValue {
    pub(crate) fn new(
        key: GroupKey,
        score: ScoreValue,
        item_count: usize,
        missing_count: usize,
        method: impl Into<String>,
    ) -> Self {
        Self {
            survey_name: key.survey_name,
            scale_name: key.scale_name,
            scored_scale: key.scored_scale,
            subject_id: key.subject_id,
            score,
            item_count,
            missing_count,
            method: method.into(),
        }
    }

    pub fn key(&self) -> GroupKey {
        GroupKey {
            survey_name: self.survey_name.clone(),
            scale_name: self.scale_name.clone(),
            scored_scale: self.scored_scale.clone(),
            subject_id: self.subject_id.clone(),
        }
    }
}
