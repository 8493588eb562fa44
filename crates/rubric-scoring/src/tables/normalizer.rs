use crate::scoring::is_missing_token;

/// Canonical header spelling: BOM stripped, trimmed, lowercase, spaces as underscores.
pub(crate) fn normalize_header(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    collapsed.to_ascii_lowercase()
}

/// Cells the upstream exporters use for "no value".
pub(crate) fn is_blank(value: &str) -> bool {
    is_missing_token(value)
}

/// Boolean-like rubric flags; blank reads as false.
pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    if is_blank(value) {
        return Some(false);
    }

    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Some(true),
        "0" | "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn normalize_for_tests(value: &str) -> String {
    normalize_header(value)
}
