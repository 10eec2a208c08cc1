use crate::dates::parse_menu_date;
use crate::model::{EmbeddedPayload, MenuByDate, collapse_whitespace};
use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;

/// Day containers, most specific first.
const DAY_CONTAINER_SELECTORS: &[&str] = &[".calendar-day", ".menu-day", "[data-date]", ".day"];
const DATE_LABEL_SELECTORS: &[&str] = &[".sr-only", ".date", ".day-label", "time", "h3", "h4"];
const DATE_ATTRIBUTES: &[&str] = &["data-date", "datetime"];
const ITEM_SELECTORS: &[&str] = &[
    ".item .recipe-name",
    ".recipe-name",
    ".menu-item",
    ".item",
    "li",
];

const EMBEDDED_KEYWORDS: &[&str] = &["menu", "recipe", "lunch", "entree", "items"];
const MAX_CANDIDATE_BYTES: usize = 512 * 1024;
const MAX_DECODE_ATTEMPTS: usize = 256;
const MAX_SCANNED_OPENERS: usize = 4096;
/// Total bytes bracket-matching may walk per script, across all openers.
const MAX_SCAN_BYTES: usize = 4 * 1024 * 1024;
const SNIPPET_CHARS: usize = 200;

/// One guess at the page's structure. Implementations never see each
/// other's output.
pub trait MenuStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, doc: &Html) -> Result<StrategyOutput>;
}

#[derive(Debug, Clone, Default)]
pub struct StrategyOutput {
    pub menu: MenuByDate,
    pub findings: Vec<EmbeddedPayload>,
}

impl From<MenuByDate> for StrategyOutput {
    fn from(menu: MenuByDate) -> Self {
        Self {
            menu,
            findings: Vec::new(),
        }
    }
}

/// Fixed run order; later strategies win date collisions.
pub fn default_strategies() -> Vec<Box<dyn MenuStrategy>> {
    vec![
        Box::new(CalendarBlockStrategy),
        Box::new(HeaderListStrategy),
        Box::new(TableStrategy),
        Box::new(EmbeddedDataStrategy),
    ]
}

pub struct CalendarBlockStrategy;

impl MenuStrategy for CalendarBlockStrategy {
    fn name(&self) -> &'static str {
        "calendar_block"
    }

    fn extract(&self, doc: &Html) -> Result<StrategyOutput> {
        let mut menu = MenuByDate::new();

        let Some((container_selector, containers)) =
            first_matching(doc.root_element(), DAY_CONTAINER_SELECTORS)?
        else {
            return Ok(menu.into());
        };
        let labels = compile_all(DATE_LABEL_SELECTORS)?;

        debug!(
            selector = container_selector,
            containers = containers.len(),
            "day containers found"
        );

        for container in containers {
            let Some(date) = container_date(container, &labels) else {
                continue;
            };

            let items = match first_matching(container, ITEM_SELECTORS)? {
                Some((_, elements)) => elements.into_iter().map(element_text).collect(),
                None => Vec::new(),
            };

            if !menu.insert(date, items) {
                debug!(%date, "day container has no menu items; discarding");
            }
        }

        Ok(menu.into())
    }
}

/// The first label selector with any match decides; the container's own
/// date attributes are consulted only when no label selector matches.
fn container_date(container: ElementRef<'_>, labels: &[Selector]) -> Option<NaiveDate> {
    let Some(matched) = labels
        .iter()
        .map(|selector| container.select(selector).collect::<Vec<_>>())
        .find(|matched| !matched.is_empty())
    else {
        return date_from_attributes(container);
    };

    matched.into_iter().find_map(|label| {
        parse_menu_date(&element_text(label)).or_else(|| date_from_attributes(label))
    })
}

fn date_from_attributes(element: ElementRef<'_>) -> Option<NaiveDate> {
    DATE_ATTRIBUTES
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .find_map(parse_menu_date)
}

pub struct HeaderListStrategy;

impl MenuStrategy for HeaderListStrategy {
    fn name(&self) -> &'static str {
        "header_list"
    }

    fn extract(&self, doc: &Html) -> Result<StrategyOutput> {
        let headings = parse_selector("h1, h2, h3, h4, h5, h6")?;
        let mut menu = MenuByDate::new();

        for heading in doc.select(&headings) {
            let Some(date) = parse_menu_date(&element_text(heading)) else {
                continue;
            };

            let Some(sibling) = heading.next_siblings().find_map(ElementRef::wrap) else {
                continue;
            };
            if !matches!(sibling.value().name(), "ul" | "ol") {
                continue;
            }

            let items = sibling
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|child| child.value().name() == "li")
                .map(element_text)
                .collect::<Vec<_>>();

            if !menu.insert(date, items) {
                debug!(%date, "dated heading has an empty list; discarding");
            }
        }

        Ok(menu.into())
    }
}

pub struct TableStrategy;

impl MenuStrategy for TableStrategy {
    fn name(&self) -> &'static str {
        "table"
    }

    fn extract(&self, doc: &Html) -> Result<StrategyOutput> {
        let tables = parse_selector("table")?;
        let caption = parse_selector("caption")?;
        let header_cell = parse_selector("th")?;
        let data_cell = parse_selector("td")?;
        let mut menu = MenuByDate::new();

        for table in doc.select(&tables) {
            let date = table
                .select(&caption)
                .next()
                .and_then(|el| parse_menu_date(&element_text(el)))
                .or_else(|| {
                    table
                        .select(&header_cell)
                        .find_map(|el| parse_menu_date(&element_text(el)))
                });
            let Some(date) = date else {
                continue;
            };

            // Columns are not distinguished; every data cell is an item.
            let items = table.select(&data_cell).map(element_text).collect::<Vec<_>>();
            if !menu.insert(date, items) {
                debug!(%date, "dated table has no data cells; discarding");
            }
        }

        Ok(menu.into())
    }
}

/// Looks for menu-shaped JSON inside inline scripts. Detection only: hits
/// are reported as findings and never become menu entries.
pub struct EmbeddedDataStrategy;

impl MenuStrategy for EmbeddedDataStrategy {
    fn name(&self) -> &'static str {
        "embedded_data"
    }

    fn extract(&self, doc: &Html) -> Result<StrategyOutput> {
        let scripts = parse_selector("script")?;
        let mut findings = Vec::new();

        for (script_index, script) in doc.select(&scripts).enumerate() {
            let text = script.text().collect::<String>();
            findings.extend(scan_embedded_json(&text, script_index));
        }

        Ok(StrategyOutput {
            menu: MenuByDate::new(),
            findings,
        })
    }
}

fn scan_embedded_json(text: &str, script_index: usize) -> Vec<EmbeddedPayload> {
    // ASCII lowering keeps byte offsets, so candidates slice both strings alike.
    let lower = text.to_ascii_lowercase();
    if !contains_keyword(&lower) {
        return Vec::new();
    }

    let mut found = Vec::new();
    let mut attempts = 0usize;
    let mut openers = 0usize;
    let mut budget = MAX_SCAN_BYTES;
    let mut offset = 0usize;

    while let Some(rel) = text[offset..].find(['{', '[']) {
        let start = offset + rel;
        offset = start + 1;
        openers += 1;
        if openers > MAX_SCANNED_OPENERS || budget == 0 {
            break;
        }

        let limit = budget.min(MAX_CANDIDATE_BYTES);
        let rest = &text[start..];
        let Some(len) = balanced_len(rest, limit) else {
            budget -= limit.min(rest.len());
            continue;
        };
        budget -= len;

        let candidate = &text[start..start + len];
        let candidate_lower = &lower[start..start + len];
        if !contains_keyword(candidate_lower) {
            continue;
        }

        attempts += 1;
        if attempts > MAX_DECODE_ATTEMPTS {
            break;
        }

        // Undecodable text is skipped; nested candidates get their own turn.
        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };

        found.push(EmbeddedPayload {
            script_index,
            keywords: matched_keywords(candidate_lower),
            top_level_keys: top_level_keys(&value),
            snippet: candidate.chars().take(SNIPPET_CHARS).collect(),
        });
        offset = start + len;
    }

    found
}

/// Byte length of the bracket-balanced prefix of `text`, honouring JSON
/// string quoting. Gives up after `limit` bytes.
fn balanced_len(text: &str, limit: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    // Brackets and quotes are ASCII and never appear inside a multi-byte
    // UTF-8 sequence, so walking bytes is exact.
    for (idx, byte) in text.bytes().enumerate().take(limit) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// `text` must already be ASCII-lowercased.
fn contains_keyword(text: &str) -> bool {
    EMBEDDED_KEYWORDS.iter().any(|kw| text.contains(kw))
}

/// `text` must already be ASCII-lowercased.
fn matched_keywords(text: &str) -> Vec<String> {
    EMBEDDED_KEYWORDS
        .iter()
        .filter(|kw| text.contains(*kw))
        .map(ToString::to_string)
        .collect()
}

fn top_level_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => map.keys().take(20).cloned().collect(),
        Value::Array(items) => items
            .first()
            .and_then(Value::as_object)
            .map(|first| first.keys().take(20).cloned().collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Tries `candidates` in order and returns the first selector with at least
/// one match under `scope`, together with its matches.
fn first_matching<'a>(
    scope: ElementRef<'a>,
    candidates: &[&'static str],
) -> Result<Option<(&'static str, Vec<ElementRef<'a>>)>> {
    for candidate in candidates {
        let selector = parse_selector(candidate)?;
        let matched = scope.select(&selector).collect::<Vec<_>>();
        if !matched.is_empty() {
            return Ok(Some((*candidate, matched)));
        }
    }
    Ok(None)
}

fn compile_all(selectors: &[&str]) -> Result<Vec<Selector>> {
    selectors.iter().map(|s| parse_selector(s)).collect()
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|err| anyhow!("invalid selector {selector}: {err:?}"))
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn run(strategy: &dyn MenuStrategy, html: &str) -> StrategyOutput {
        strategy.extract(&Html::parse_document(html)).unwrap()
    }

    #[test]
    fn calendar_blocks_with_sr_only_labels() {
        let html = r#"
            <div class="calendar-day">
              <span class="sr-only">March 5, 2024</span>
              <div class="item"><span class="recipe-name">Cheese Pizza</span><span>120 cal</span></div>
              <div class="item"><span class="recipe-name">Garden Salad</span></div>
            </div>
            <div class="calendar-day">
              <span class="sr-only">March 6, 2024</span>
              <div class="item"><span class="recipe-name">Tacos</span></div>
            </div>
        "#;
        let out = run(&CalendarBlockStrategy, html);
        assert_eq!(out.menu.len(), 2);
        assert_eq!(
            out.menu.get(&date(2024, 3, 5)).unwrap(),
            &vec!["Cheese Pizza", "Garden Salad"]
        );
        assert_eq!(out.menu.get(&date(2024, 3, 6)).unwrap(), &vec!["Tacos"]);
    }

    #[test]
    fn calendar_blocks_drop_days_without_items() {
        let html = r#"
            <div class="menu-day"><p class="date">03/04/2024</p></div>
            <div class="menu-day">
              <p class="date">03/05/2024</p>
              <ul><li class="menu-item">Chicken Nuggets</li><li class="menu-item">Milk</li></ul>
            </div>
        "#;
        let out = run(&CalendarBlockStrategy, html);
        assert!(out.menu.get(&date(2024, 3, 4)).is_none());
        assert_eq!(
            out.menu.get(&date(2024, 3, 5)).unwrap(),
            &vec!["Chicken Nuggets", "Milk"]
        );
    }

    #[test]
    fn calendar_blocks_stop_at_first_matching_container_selector() {
        // `.calendar-day` matches, so the `.menu-day` block is never considered.
        let html = r#"
            <div class="calendar-day"><span class="sr-only">March 5, 2024</span>
              <span class="menu-item">Pizza</span></div>
            <div class="menu-day"><span class="date">March 6, 2024</span>
              <span class="menu-item">Tacos</span></div>
        "#;
        let out = run(&CalendarBlockStrategy, html);
        assert_eq!(out.menu.dates().collect::<Vec<_>>(), vec![date(2024, 3, 5)]);
    }

    #[test]
    fn calendar_blocks_fall_back_to_date_attribute() {
        let html = r#"
            <section data-date="2024-03-07">
              <b>Thursday</b>
              <li>Fish Sticks</li>
            </section>
        "#;
        let out = run(&CalendarBlockStrategy, html);
        assert_eq!(out.menu.get(&date(2024, 3, 7)).unwrap(), &vec!["Fish Sticks"]);
    }

    #[test]
    fn first_matching_label_selector_decides_the_date() {
        let html = r#"
            <div class="calendar-day">
              <span class="sr-only">Tuesday</span>
              <span class="date">March 5, 2024</span>
              <span class="menu-item">Pizza</span>
            </div>
            <div class="calendar-day" data-date="2024-03-06">
              <span class="date">Wednesday</span>
              <span class="menu-item">Tacos</span>
            </div>
            <div class="calendar-day">
              <span class="sr-only">Thursday</span>
              <time datetime="2024-03-07">Thu</time>
              <span class="sr-only">March 7, 2024</span>
              <span class="menu-item">Soup</span>
            </div>
        "#;
        let out = run(&CalendarBlockStrategy, html);
        assert_eq!(out.menu.dates().collect::<Vec<_>>(), vec![date(2024, 3, 7)]);
    }

    #[test]
    fn header_followed_by_list() {
        let html = r#"
            <h2>March 5, 2024</h2>
            <ul><li>Pizza</li><li>Milk</li></ul>
            <h2>Specials</h2>
            <ul><li>Not a day</li></ul>
            <h3>2024-03-06</h3>
            <p>Closed</p>
            <ul><li>Ignored: sibling is not the list</li></ul>
            <h3>03/07/2024</h3>
            <ol><li>Burger</li></ol>
        "#;
        let out = run(&HeaderListStrategy, html);
        assert_eq!(out.menu.len(), 2);
        assert_eq!(out.menu.get(&date(2024, 3, 5)).unwrap(), &vec!["Pizza", "Milk"]);
        assert_eq!(out.menu.get(&date(2024, 3, 7)).unwrap(), &vec!["Burger"]);
    }

    #[test]
    fn header_with_empty_list_is_discarded() {
        let out = run(&HeaderListStrategy, "<h2>March 5, 2024</h2><ul><li> </li></ul>");
        assert!(out.menu.is_empty());
    }

    #[test]
    fn table_uses_caption_then_header_cell() {
        let html = r#"
            <table><caption>March 5, 2024</caption>
              <tr><th>Entree</th><th>Side</th></tr>
              <tr><td>Pizza</td><td>Milk</td></tr>
            </table>
            <table>
              <tr><th>Day</th><th>03/06/2024</th></tr>
              <tr><td>Tacos</td><td>Rice</td></tr>
            </table>
            <table><tr><th>Nutrition</th></tr><tr><td>n/a</td></tr></table>
        "#;
        let out = run(&TableStrategy, html);
        assert_eq!(out.menu.len(), 2);
        assert_eq!(out.menu.get(&date(2024, 3, 5)).unwrap(), &vec!["Pizza", "Milk"]);
        assert_eq!(out.menu.get(&date(2024, 3, 6)).unwrap(), &vec!["Tacos", "Rice"]);
    }

    #[test]
    fn embedded_data_reports_but_never_maps() {
        let html = r#"
            <script>
              window.__STATE__ = {"menu": {"days": [{"date": "2024-03-05", "items": ["Pizza"]}]}};
              var broken = {menu: oops};
            </script>
            <script src="/app.js"></script>
        "#;
        let out = run(&EmbeddedDataStrategy, html);
        assert!(out.menu.is_empty());
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].top_level_keys, vec!["menu"]);
        assert!(out.findings[0].keywords.contains(&"menu".to_string()));
    }

    #[test]
    fn embedded_data_tries_nested_candidates_after_a_bad_outer_object() {
        let text = r#"init({ config: 1, payload: {"lunch": "Pizza"} })"#;
        let found = scan_embedded_json(text, 0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].top_level_keys, vec!["lunch"]);
    }

    #[test]
    fn balanced_len_respects_strings() {
        assert_eq!(balanced_len(r#"{"a": "}"} tail"#, 64), Some(10));
        assert_eq!(balanced_len("{ unclosed", 64), None);
        assert_eq!(balanced_len("}", 64), None);
        assert_eq!(balanced_len("{ \"é\": [1] }", 64), Some(13));
    }

    #[test]
    fn balanced_len_gives_up_at_limit() {
        assert_eq!(balanced_len("{ \"menu\": 1 }", 8), None);
        assert_eq!(balanced_len("{ \"menu\": 1 }", 13), Some(13));
    }

    #[test]
    fn unbalanced_script_scan_is_bounded() {
        let mut text = String::from("var menu = 1; ");
        for _ in 0..5000 {
            text.push_str("out += '{'; ");
        }
        text.push_str(&"x".repeat(400 * 1024));
        text.push_str(r#" var late = {"menu": []};"#);

        let started = std::time::Instant::now();
        let found = scan_embedded_json(&text, 0);
        assert!(found.is_empty());
        assert!(
            started.elapsed() < std::time::Duration::from_secs(5),
            "scan took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn payload_ahead_of_unbalanced_noise_is_still_found() {
        let mut text = String::from(r#"var state = {"lunch": ["Pizza"]}; "#);
        for _ in 0..200 {
            text.push_str("out += '['; ");
        }
        let found = scan_embedded_json(&text, 3);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].script_index, 3);
        assert_eq!(found[0].keywords, vec!["lunch"]);
    }

    #[test]
    fn default_order_is_fixed() {
        let names = default_strategies()
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["calendar_block", "header_list", "table", "embedded_data"]
        );
    }
}
