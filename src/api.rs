//! Menu JSON endpoint payloads.
//!
//! The endpoint wraps its week in `{"data": {"days": [...]}}`. Days without a
//! usable date and items without a name are skipped rather than rejected;
//! only a payload missing the envelope is a decode error.

use crate::dates::parse_menu_date;
use crate::model::MenuByDate;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct MenuResponse {
    pub data: MenuWeek,
}

#[derive(Debug, Deserialize)]
pub struct MenuWeek {
    #[serde(default)]
    pub days: Vec<MenuDay>,
}

#[derive(Debug, Deserialize)]
pub struct MenuDay {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub menu_items: Option<Vec<ApiMenuItem>>,
}

#[derive(Debug, Deserialize)]
pub struct ApiMenuItem {
    #[serde(default)]
    pub name: Option<String>,
}

pub fn decode_menu(body: &str) -> Result<MenuByDate, serde_json::Error> {
    let response = serde_json::from_str::<MenuResponse>(body)?;
    Ok(response.data.into_menu())
}

impl MenuWeek {
    /// Same rules as the HTML strategies: item order kept, empty days
    /// dropped, a repeated date replaces the earlier entry.
    pub fn into_menu(self) -> MenuByDate {
        let mut menu = MenuByDate::new();

        for day in self.days {
            let Some(date) = day.date.as_deref().and_then(api_date) else {
                debug!(date = ?day.date, "api day without a usable date; skipping");
                continue;
            };
            let items = day
                .menu_items
                .unwrap_or_default()
                .into_iter()
                .filter_map(|item| item.name);

            if !menu.insert(date, items) {
                debug!(%date, "api day has no named items; discarding");
            }
        }

        menu
    }
}

/// ISO dates, optionally with a time part.
fn api_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    parse_menu_date(raw).or_else(|| raw.get(..10).and_then(parse_menu_date))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn decodes_days_in_item_order() {
        let body = r#"{
            "data": {
                "id": 74432,
                "days": [
                    {"date": "2024-03-04", "menu_items": [
                        {"name": "French Toast Sticks", "id": 1},
                        {"name": "Apple Slices"}
                    ]},
                    {"date": "2024-03-05T00:00:00", "menu_items": [{"name": " Cheese  Pizza "}]}
                ]
            }
        }"#;

        let menu = decode_menu(body).unwrap();
        assert_eq!(menu.len(), 2);
        assert_eq!(
            menu.get(&date(2024, 3, 4)).unwrap(),
            &vec!["French Toast Sticks", "Apple Slices"]
        );
        assert_eq!(menu.get(&date(2024, 3, 5)).unwrap(), &vec!["Cheese Pizza"]);
    }

    #[test]
    fn skips_days_and_items_that_cannot_be_used() {
        let body = r#"{"data": {"days": [
            {"menu_items": [{"name": "Orphan"}]},
            {"date": "someday", "menu_items": [{"name": "Orphan"}]},
            {"date": "2024-03-06"},
            {"date": "2024-03-07", "menu_items": null},
            {"date": "2024-03-08", "menu_items": [{"id": 9}, {"name": "  "}]},
            {"date": "2024-03-11", "menu_items": [{"id": 9}, {"name": "Tacos"}]}
        ]}}"#;

        let menu = decode_menu(body).unwrap();
        assert_eq!(menu.dates().collect::<Vec<_>>(), vec![date(2024, 3, 11)]);
        assert_eq!(menu.get(&date(2024, 3, 11)).unwrap(), &vec!["Tacos"]);
    }

    #[test]
    fn missing_envelope_is_an_error() {
        assert!(decode_menu(r#"{"days": []}"#).is_err());
        assert!(decode_menu("<html></html>").is_err());
        assert!(decode_menu(r#"{"data": {}}"#).unwrap().is_empty());
    }
}
