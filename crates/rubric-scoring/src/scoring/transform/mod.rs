mod expr;
mod parser;

pub use expr::{ArithOp, CompareOp, Expr, Predicate};

use super::domain::ItemBounds;
use super::ScoringError;
use parser::TransformParser;
use std::collections::HashMap;
use std::sync::Arc;

/// Spellings that mean "leave the value alone".
const NO_OP_SPELLINGS: [&str; 6] = ["", "none", "no-op", "noop", "identity", "na"];

/// Grammar errors raised while compiling a transform specification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("unexpected character '{found}' at position {position}")]
    UnexpectedCharacter { found: char, position: usize },
    #[error("invalid number '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },
    #[error("unknown identifier '{name}' at position {position}")]
    UnknownIdentifier { name: String, position: usize },
    #[error("{message} at position {position}")]
    Syntax { position: usize, message: String },
}

/// Parsed form of a rubric `transform` cell.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformSpec {
    NoOp,
    Unconditional(Expr),
    /// Values failing the guard pass through unchanged.
    Conditional { when: Predicate, then: Expr },
}

impl TransformSpec {
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        let trimmed = text.trim();
        if NO_OP_SPELLINGS
            .iter()
            .any(|spelling| trimmed.eq_ignore_ascii_case(spelling))
        {
            return Ok(Self::NoOp);
        }

        TransformParser::new(trimmed)?.parse()
    }

    /// True when evaluation needs the item's min/max.
    pub fn requires_bounds(&self) -> bool {
        match self {
            TransformSpec::NoOp => false,
            TransformSpec::Unconditional(expr) => expr.uses_reverse(),
            TransformSpec::Conditional { when, then } => when.uses_reverse() || then.uses_reverse(),
        }
    }

    /// Missing stays missing; non-finite results become missing.
    pub fn apply(&self, value: Option<f64>, bounds: Option<ItemBounds>) -> Option<f64> {
        let value = value?;
        let result = match self {
            TransformSpec::NoOp => value,
            TransformSpec::Unconditional(expr) => expr.eval(value, bounds),
            TransformSpec::Conditional { when, then } => {
                if when.eval(value, bounds) {
                    then.eval(value, bounds)
                } else {
                    value
                }
            }
        };

        Some(result).filter(|result| result.is_finite())
    }
}

/// A specification compiled once and shared by every item that uses it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTransform {
    source: String,
    spec: TransformSpec,
}

impl CompiledTransform {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn spec(&self) -> &TransformSpec {
        &self.spec
    }

    pub fn is_noop(&self) -> bool {
        self.spec == TransformSpec::NoOp
    }

    pub fn requires_bounds(&self) -> bool {
        self.spec.requires_bounds()
    }

    pub fn apply(&self, value: Option<f64>, bounds: Option<ItemBounds>) -> Option<f64> {
        self.spec.apply(value, bounds)
    }

    /// Elementwise application over one item's column.
    pub fn apply_column(&self, values: &mut [Option<f64>], bounds: Option<ItemBounds>) {
        if self.is_noop() {
            return;
        }

        for value in values.iter_mut() {
            *value = self.apply(*value, bounds);
        }
    }
}

/// Compiles transform specifications, caching one compiled function per distinct text.
#[derive(Debug, Default)]
pub struct TransformationEvaluator {
    compiled: HashMap<String, Arc<CompiledTransform>>,
}

impl TransformationEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles `text` for `item_id`, failing when the grammar rejects it or when it
    /// invokes reverse-coding for an item without bounds.
    pub fn compile(
        &mut self,
        item_id: &str,
        text: &str,
        bounds: Option<ItemBounds>,
    ) -> Result<Arc<CompiledTransform>, ScoringError> {
        let source = text.trim();
        let compiled = match self.compiled.get(source) {
            Some(compiled) => Arc::clone(compiled),
            None => {
                let spec =
                    TransformSpec::parse(source).map_err(|source_error| {
                        ScoringError::MalformedTransform {
                            item_id: item_id.to_string(),
                            spec: source.to_string(),
                            source: source_error,
                        }
                    })?;
                let compiled = Arc::new(CompiledTransform {
                    source: source.to_string(),
                    spec,
                });
                self.compiled
                    .insert(source.to_string(), Arc::clone(&compiled));
                compiled
            }
        };

        if compiled.requires_bounds() && bounds.is_none() {
            return Err(ScoringError::MissingBounds {
                item_id: item_id.to_string(),
                reason: format!("transform '{source}' reverse-codes the value"),
            });
        }

        Ok(compiled)
    }

    /// Number of distinct specifications compiled so far.
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: ItemBounds = ItemBounds { min: 1.0, max: 4.0 };

    #[test]
    fn conditional_reverse_only_touches_matching_values() {
        let mut evaluator = TransformationEvaluator::new();
        let compiled = evaluator
            .compile("q1", "when value > 3 then reverse(value)", Some(BOUNDS))
            .expect("compiles");

        let mut column = vec![Some(1.0), Some(2.0), Some(5.0)];
        compiled.apply_column(&mut column, Some(BOUNDS));
        assert_eq!(column, vec![Some(1.0), Some(2.0), Some(0.0)]);
    }

    #[test]
    fn noop_spellings_leave_values_unchanged() {
        for text in ["", "  ", "none", "No-Op", "NA", "identity"] {
            let spec = TransformSpec::parse(text).expect("no-op parses");
            assert_eq!(spec, TransformSpec::NoOp, "spelling {text:?}");
            assert_eq!(spec.apply(Some(2.0), None), Some(2.0));
        }
    }

    #[test]
    fn missing_and_non_finite_results_are_missing() {
        let spec = TransformSpec::parse("10 / value").expect("parses");
        assert_eq!(spec.apply(None, None), None);
        assert_eq!(spec.apply(Some(0.0), None), None);
        assert_eq!(spec.apply(Some(4.0), None), Some(2.5));
    }

    #[test]
    fn identical_specifications_share_one_compilation() {
        let mut evaluator = TransformationEvaluator::new();
        let first = evaluator
            .compile("q1", "value * 2", None)
            .expect("compiles");
        let second = evaluator
            .compile("q2", "  value * 2 ", None)
            .expect("compiles");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(evaluator.len(), 1);
        assert_eq!(second.source(), "value * 2");
        assert!(matches!(second.spec(), TransformSpec::Unconditional(_)));
    }

    #[test]
    fn malformed_specification_echoes_item_and_text() {
        let mut evaluator = TransformationEvaluator::new();
        let error = evaluator
            .compile("q7", "ifelse(x > 3, 5 - x, x)", Some(BOUNDS))
            .expect_err("outside the grammar");

        match error {
            ScoringError::MalformedTransform { item_id, spec, .. } => {
                assert_eq!(item_id, "q7");
                assert_eq!(spec, "ifelse(x > 3, 5 - x, x)");
            }
            other => panic!("expected malformed transform, got {other:?}"),
        }
    }

    #[test]
    fn reversing_transform_requires_bounds() {
        let mut evaluator = TransformationEvaluator::new();
        let error = evaluator
            .compile("q3", "reverse(value)", None)
            .expect_err("bounds required");

        assert!(matches!(error, ScoringError::MissingBounds { ref item_id, .. } if item_id == "q3"));
    }
}
