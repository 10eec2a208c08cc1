use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Menu items for one school day, in document order.
pub type MenuItemList = Vec<String>;

/// Calendar date to menu items. A date is only ever stored with at least
/// one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MenuByDate {
    days: BTreeMap<NaiveDate, MenuItemList>,
}

impl MenuByDate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `items` for `date` after trimming each entry and dropping
    /// blanks. Returns false (and leaves the map untouched) when nothing
    /// survives.
    pub fn insert<I, S>(&mut self, date: NaiveDate, items: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let items = clean_items(items);
        if items.is_empty() {
            return false;
        }
        self.days.insert(date, items);
        true
    }

    /// Whole-entry overwrite: every date in `other` replaces the entry here.
    pub fn merge_from(&mut self, other: MenuByDate) {
        self.days.extend(other.days);
    }

    pub fn get(&self, date: &NaiveDate) -> Option<&MenuItemList> {
        self.days.get(date)
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &MenuItemList)> {
        self.days.iter()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days.keys().copied()
    }
}

fn clean_items<I, S>(items: I) -> MenuItemList
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| collapse_whitespace(item.as_ref()))
        .filter(|item| !item.is_empty())
        .collect()
}

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One all-day, non-blocking calendar entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub uid: String,
    pub title: String,
    pub description: String,
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
    pub transparent: bool,
}

#[derive(Debug, Clone)]
pub struct Feed {
    pub events: Vec<CalendarEvent>,
    /// False when the feed holds only the failure sentinel.
    pub success: bool,
}

/// Embedded JSON that looked menu-related. Detection only; never merged
/// into a [`MenuByDate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedPayload {
    pub script_index: usize,
    pub keywords: Vec<String>,
    pub top_level_keys: Vec<String>,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub source_url: String,
    pub days: usize,
    pub events: usize,
    pub success: bool,
    pub fetch_failed: bool,
    pub ics_path: PathBuf,
}
