use super::domain::ItemBounds;

/// Reverse-codes a single value against its item's bounds.
pub fn reverse(value: f64, bounds: ItemBounds) -> f64 {
    bounds.min + bounds.max - value
}

/// Applies reverse-coding to a column of item values; missing stays missing.
pub struct ReversalApplier;

impl ReversalApplier {
    pub fn apply(values: &mut [Option<f64>], bounds: ItemBounds) {
        for value in values.iter_mut() {
            *value = value.map(|value| reverse(value, bounds));
        }
    }
}
