use super::domain::{GroupKey, IncludeTag};
use super::validation::{uniform_value, Directive};
use super::ScoringError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Reduction over the non-missing values of one group. Never called with an empty slice.
pub type Reducer = fn(&[f64]) -> f64;

/// How missing item values affect an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Drop missing values and reduce what remains.
    Exclude,
    /// Any missing value makes the aggregate missing.
    Propagate,
}

impl MissingPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exclude" | "omit" | "skip" => Some(Self::Exclude),
            "propagate" | "keep" => Some(Self::Propagate),
            _ => None,
        }
    }
}

impl fmt::Display for MissingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingPolicy::Exclude => f.write_str("exclude"),
            MissingPolicy::Propagate => f.write_str("propagate"),
        }
    }
}

/// Resolved reduction for an include tag.
#[derive(Debug, Clone, Copy)]
pub enum AggregationMethod {
    Mean,
    Named { name: &'static str, reduce: Reducer },
}

impl AggregationMethod {
    pub fn label(&self) -> &'static str {
        match self {
            AggregationMethod::Mean => "mean",
            AggregationMethod::Named { name, .. } => *name,
        }
    }

    fn reduce(&self, values: &[f64]) -> f64 {
        match self {
            AggregationMethod::Mean => mean(values),
            AggregationMethod::Named { reduce, .. } => reduce(values),
        }
    }
}

/// Closed mapping from include tags to reductions.
#[derive(Debug, Clone)]
pub struct AggregationRegistry {
    reducers: BTreeMap<&'static str, Reducer>,
}

impl Default for AggregationRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AggregationRegistry {
    pub fn empty() -> Self {
        Self {
            reducers: BTreeMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("sum", sum);
        registry.register("prod", product);
        registry.register("min", minimum);
        registry.register("max", maximum);
        registry.register("median", median);
        registry
    }

    /// Adds or replaces a named reduction. Names are matched case-insensitively.
    pub fn register(&mut self, name: &'static str, reduce: Reducer) {
        self.reducers.insert(name, reduce);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.reducers.keys().copied()
    }

    pub fn resolve(&self, tag: &IncludeTag) -> Option<AggregationMethod> {
        match tag {
            IncludeTag::Mean => Some(AggregationMethod::Mean),
            IncludeTag::Named(name) => self
                .reducers
                .iter()
                .find(|(registered, _)| registered.eq_ignore_ascii_case(name))
                .map(|(name, reduce)| AggregationMethod::Named {
                    name: *name,
                    reduce: *reduce,
                }),
            IncludeTag::Excluded | IncludeTag::Identity => None,
        }
    }
}

/// Aggregate plus provenance counts over the same input window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub score: Option<f64>,
    pub item_count: usize,
    pub missing_count: usize,
}

impl Aggregate {
    /// True when no value contributed to the reduction.
    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }
}

/// Reduces `values` with `method` under `policy`.
pub fn aggregate(
    values: &[Option<f64>],
    method: &AggregationMethod,
    policy: MissingPolicy,
) -> Aggregate {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let item_count = present.len();
    let missing_count = values.len() - item_count;

    let score = if present.is_empty() || (policy == MissingPolicy::Propagate && missing_count > 0)
    {
        None
    } else {
        Some(method.reduce(&present)).filter(|score| score.is_finite())
    };

    Aggregate {
        score,
        item_count,
        missing_count,
    }
}

/// Validates, resolves, and applies the aggregation for one group.
#[derive(Debug, Clone, Copy)]
pub struct AggregationResolver<'a> {
    registry: &'a AggregationRegistry,
    mean_missing: MissingPolicy,
    aggregate_missing: MissingPolicy,
}

impl<'a> AggregationResolver<'a> {
    pub fn new(
        registry: &'a AggregationRegistry,
        mean_missing: MissingPolicy,
        aggregate_missing: MissingPolicy,
    ) -> Self {
        Self {
            registry,
            mean_missing,
            aggregate_missing,
        }
    }

    pub fn policy_for(&self, method: &AggregationMethod) -> MissingPolicy {
        match method {
            AggregationMethod::Mean => self.mean_missing,
            AggregationMethod::Named { .. } => self.aggregate_missing,
        }
    }

    /// `tags` holds the include tag of every contributing row; they must agree.
    pub fn resolve_and_aggregate(
        &self,
        key: &GroupKey,
        tags: &[&IncludeTag],
        values: &[Option<f64>],
    ) -> Result<(AggregationMethod, Aggregate), ScoringError> {
        let tag = uniform_value(Directive::Include, key, tags.iter().copied())?;

        let Some(tag) = tag else {
            warn!(group = %key, "no contributing rows for aggregation group; emitting missing score");
            return Ok((
                AggregationMethod::Mean,
                Aggregate {
                    score: None,
                    item_count: 0,
                    missing_count: 0,
                },
            ));
        };

        let method =
            self.registry
                .resolve(tag)
                .ok_or_else(|| ScoringError::UnknownAggregation {
                    tag: tag.to_string(),
                    group: key.to_string(),
                })?;

        let result = aggregate(values, &method, self.policy_for(&method));
        if result.is_empty() {
            warn!(
                group = %key,
                method = method.label(),
                missing = result.missing_count,
                "aggregation group has no non-missing values; emitting missing score"
            );
        }

        Ok((method, result))
    }
}

fn mean(values: &[f64]) -> f64 {
    sum(values) / values.len() as f64
}

fn sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

fn product(values: &[f64]) -> f64 {
    values.iter().product()
}

fn minimum(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn maximum(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> GroupKey {
        GroupKey {
            survey_name: "wellbeing".to_string(),
            scale_name: "mood".to_string(),
            scored_scale: "total".to_string(),
            subject_id: "s01".to_string(),
        }
    }

    #[test]
    fn mean_of_complete_group() {
        let values = [Some(1.0), Some(2.0), Some(3.0), Some(4.0)];
        let result = aggregate(&values, &AggregationMethod::Mean, MissingPolicy::Exclude);
        assert_eq!(result.score, Some(2.5));
        assert_eq!(result.item_count, 4);
        assert_eq!(result.missing_count, 0);
    }

    #[test]
    fn mean_excludes_missing_values() {
        let values = [Some(2.0), None, Some(4.0)];
        let result = aggregate(&values, &AggregationMethod::Mean, MissingPolicy::Exclude);
        assert_eq!(result.score, Some(3.0));
        assert_eq!(result.item_count, 2);
        assert_eq!(result.missing_count, 1);
    }

    #[test]
    fn named_reduction_propagates_missing_values() {
        let registry = AggregationRegistry::builtin();
        let method = registry
            .resolve(&IncludeTag::Named("sum".to_string()))
            .expect("sum registered");
        let values = [Some(2.0), None, Some(4.0)];

        let result = aggregate(&values, &method, MissingPolicy::Propagate);
        assert_eq!(result.score, None);
        assert_eq!(result.missing_count, 1);

        let result = aggregate(&values, &method, MissingPolicy::Exclude);
        assert_eq!(result.score, Some(6.0));
    }

    #[test]
    fn builtin_reducers() {
        let registry = AggregationRegistry::builtin();
        let values = [Some(3.0), Some(1.0), Some(4.0), Some(2.0)];
        let expected = [
            ("sum", 10.0),
            ("prod", 24.0),
            ("min", 1.0),
            ("max", 4.0),
            ("median", 2.5),
        ];

        for (name, score) in expected {
            let method = registry
                .resolve(&IncludeTag::Named(name.to_string()))
                .expect("builtin registered");
            let result = aggregate(&values, &method, MissingPolicy::Propagate);
            assert_eq!(result.score, Some(score), "reducer {name}");
            assert_eq!(method.label(), name);
        }
    }

    #[test]
    fn unknown_tag_is_fatal() {
        let registry = AggregationRegistry::builtin();
        let resolver =
            AggregationResolver::new(&registry, MissingPolicy::Exclude, MissingPolicy::Propagate);
        let tag = IncludeTag::Named("geomean".to_string());

        let error = resolver
            .resolve_and_aggregate(&key(), &[&tag], &[Some(1.0)])
            .expect_err("unknown tag rejected");

        match error {
            ScoringError::UnknownAggregation { tag, group } => {
                assert_eq!(tag, "geomean");
                assert!(group.contains("subject 's01'"));
            }
            other => panic!("expected unknown aggregation, got {other:?}"),
        }
    }

    #[test]
    fn registered_extension_resolves() {
        fn range(values: &[f64]) -> f64 {
            maximum(values) - minimum(values)
        }

        let mut registry = AggregationRegistry::builtin();
        registry.register("range", range);
        let resolver =
            AggregationResolver::new(&registry, MissingPolicy::Exclude, MissingPolicy::Propagate);
        let tag = IncludeTag::Named("range".to_string());

        let (method, result) = resolver
            .resolve_and_aggregate(&key(), &[&tag, &tag], &[Some(1.0), Some(5.0)])
            .expect("range resolves");
        assert_eq!(method.label(), "range");
        assert_eq!(result.score, Some(4.0));
    }

    #[test]
    fn mixed_tags_are_fatal() {
        let registry = AggregationRegistry::builtin();
        let resolver =
            AggregationResolver::new(&registry, MissingPolicy::Exclude, MissingPolicy::Propagate);
        let sum = IncludeTag::Named("sum".to_string());

        let error = resolver
            .resolve_and_aggregate(&key(), &[&IncludeTag::Mean, &sum], &[Some(1.0), Some(2.0)])
            .expect_err("heterogeneous tags rejected");

        assert!(matches!(
            error,
            ScoringError::InconsistentDirective {
                directive: Directive::Include,
                ..
            }
        ));
    }

    #[test]
    fn empty_group_yields_missing_without_error() {
        let registry = AggregationRegistry::builtin();
        let resolver =
            AggregationResolver::new(&registry, MissingPolicy::Exclude, MissingPolicy::Propagate);

        let (_, result) = resolver
            .resolve_and_aggregate(&key(), &[&IncludeTag::Mean, &IncludeTag::Mean], &[None, None])
            .expect("empty group is not fatal");
        assert_eq!(result.score, None);
        assert_eq!(result.item_count, 0);
        assert_eq!(result.missing_count, 2);
    }

    #[test]
    fn missing_policy_parses_config_values() {
        assert_eq!(MissingPolicy::parse(" Exclude "), Some(MissingPolicy::Exclude));
        assert_eq!(MissingPolicy::parse("propagate"), Some(MissingPolicy::Propagate));
        assert_eq!(MissingPolicy::parse("impute"), None);
    }
}
