use crate::config::FeedConfig;
use crate::model::{CalendarEvent, Feed, MenuByDate};
use chrono::{Days, NaiveDate};
use uuid::Uuid;

pub struct FeedBuilder<'a> {
    config: &'a FeedConfig,
    diagnostics_name: String,
}

impl<'a> FeedBuilder<'a> {
    /// `diagnostics_name` is what the failure sentinel tells subscribers to
    /// look at.
    pub fn new(config: &'a FeedConfig, diagnostics_name: impl Into<String>) -> Self {
        Self {
            config,
            diagnostics_name: diagnostics_name.into(),
        }
    }

    /// One event per menu day, or a single failure sentinel dated `today`
    /// when `menu` is empty.
    pub fn build(&self, menu: &MenuByDate, today: NaiveDate) -> Feed {
        if menu.is_empty() {
            return Feed {
                events: vec![self.sentinel(today)],
                success: false,
            };
        }

        let events = menu
            .iter()
            .map(|(date, items)| {
                let mut description = self.config.description_header.clone();
                for item in items {
                    description.push('\n');
                    description.push_str(item);
                }
                self.all_day(*date, self.config.event_title.clone(), description)
            })
            .collect();

        Feed {
            events,
            success: true,
        }
    }

    fn sentinel(&self, today: NaiveDate) -> CalendarEvent {
        let description = format!(
            "No menu data could be extracted from the school menu page.\nSee {} for details.",
            self.diagnostics_name
        );
        self.all_day(today, self.config.failure_title.clone(), description)
    }

    fn all_day(&self, start: NaiveDate, title: String, description: String) -> CalendarEvent {
        CalendarEvent {
            uid: self.uid(start),
            title,
            description,
            start,
            end: start.checked_add_days(Days::new(1)).unwrap_or(start),
            transparent: true,
        }
    }

    pub fn uid(&self, date: NaiveDate) -> String {
        format!(
            "lunch-{}-{}@{}",
            date.format("%Y-%m-%d"),
            Uuid::new_v4(),
            self.config.uid_domain
        )
    }
}
