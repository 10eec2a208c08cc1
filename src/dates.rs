use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

/// Tried in order; the first successful parse wins. Long-form textual
/// formats come before numeric ones.
const DATE_FORMATS: &[&str] = &["%A, %B %d, %Y", "%B %d, %Y", "%m/%d/%Y", "%Y-%m-%d"];

static DATE_LIKE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b\d{4}-\d{2}-\d{2}\b",
        r"\b\d{1,2}/\d{1,2}/\d{4}\b",
        r"\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)[a-z]*\.?\s+\d{1,2},\s+\d{4}\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("date-like pattern must compile"))
    .collect()
});

/// Interprets `token` as a calendar date. `None` is the normal answer for
/// most text in a page.
pub fn parse_menu_date(token: &str) -> Option<NaiveDate> {
    let normalized = token.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&normalized, format).ok())
}

/// Every substring of `text` that looks like a date, in pattern order.
pub fn find_date_like(text: &str) -> Vec<String> {
    DATE_LIKE
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.as_str().to_string()))
        .collect()
}
