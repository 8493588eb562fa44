use super::ScoringError;
use std::collections::BTreeMap;
use std::fmt;

/// Rubric or data directive whose value must agree across a validation group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Include,
    Transform,
    IdentityValue,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Include => f.write_str("include"),
            Directive::Transform => f.write_str("transform"),
            Directive::IdentityValue => f.write_str("identity value"),
        }
    }
}

/// Returns the single value shared by `values`, `None` when empty.
///
/// Any disagreement is fatal and reports every distinct value in first-seen order.
pub fn uniform_value<V, I>(
    directive: Directive,
    group: &dyn fmt::Display,
    values: I,
) -> Result<Option<V>, ScoringError>
where
    I: IntoIterator<Item = V>,
    V: PartialEq + fmt::Display,
{
    let mut distinct: Vec<V> = Vec::new();
    for value in values {
        if !distinct.contains(&value) {
            distinct.push(value);
        }
    }

    if distinct.len() > 1 {
        return Err(ScoringError::InconsistentDirective {
            directive,
            group: group.to_string(),
            values: distinct.iter().map(ToString::to_string).collect(),
        });
    }

    Ok(distinct.pop())
}

/// Groups `rows` by `key` and requires `value` to be uniform inside each group.
///
/// Groups are checked in key order so the first reported conflict is deterministic.
pub fn ensure_uniform_by<T, K, V>(
    directive: Directive,
    rows: &[T],
    key: impl Fn(&T) -> K,
    value: impl Fn(&T) -> V,
) -> Result<BTreeMap<K, V>, ScoringError>
where
    K: Ord + fmt::Display,
    V: PartialEq + fmt::Display,
{
    let mut groups: BTreeMap<K, Vec<V>> = BTreeMap::new();
    for row in rows {
        groups.entry(key(row)).or_default().push(value(row));
    }

    let mut resolved = BTreeMap::new();
    for (group, values) in groups {
        if let Some(shared) = uniform_value(directive, &group, values)? {
            resolved.insert(group, shared);
        }
    }

    Ok(resolved)
}
