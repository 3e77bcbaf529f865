/// Currency symbols stripped before parsing.
const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹'];

/// Parses a loosely formatted spreadsheet value into a number.
///
/// Handles currency symbols, thousands separators, accounting negatives
/// (`(45)` becomes `-45`) and trailing percentages (`12%` becomes `0.12`).
/// Malformed input yields `None`; this never panics.
pub fn normalize_numeric(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (body, is_percent) = match trimmed.strip_suffix('%') {
        Some(body) => (body, true),
        None => (trimmed, false),
    };

    let stripped: String = body
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && *c != ',' && !c.is_whitespace())
        .collect();

    let signed = replace_accounting_negative(&stripped);
    let value: f64 = signed.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    Some(if is_percent { value / 100.0 } else { value })
}

/// Rewrites the first parenthesized group `(x)` as `-x`.
fn replace_accounting_negative(input: &str) -> String {
    let Some(open) = input.find('(') else {
        return input.to_string();
    };
    let Some(close) = input.rfind(')').filter(|close| *close > open) else {
        return input.to_string();
    };

    format!(
        "{}-{}{}",
        &input[..open],
        &input[open + 1..close],
        &input[close + 1..]
    )
}
