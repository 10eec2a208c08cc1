use anyhow::Result;
use chrono::{NaiveDate, TimeZone, Utc};
use lunchcal::config::{AppConfig, FetchMode, LoadedConfig};
use lunchcal::ics::{ParsedEvent, read_calendar};
use lunchcal::pipeline::{collect_menu, refresh, refresh_as_of};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn refresh_writes_one_event_per_menu_day() -> Result<()> {
    let env = FixtureEnv::new("week_menu.html")?;

    let report = refresh(&env.loaded)?;
    assert!(report.success);
    assert!(!report.fetch_failed);
    assert_eq!(report.days, 3);
    assert_eq!(report.events, 3);

    let events = env.read_events()?;
    let dates = events.iter().filter_map(|e| e.start).collect::<Vec<_>>();
    assert_eq!(dates, vec![date(2024, 3, 4), date(2024, 3, 5), date(2024, 3, 7)]);
    for event in &events {
        let start = event.start.expect("start date");
        assert_eq!(event.end, start.succ_opt());
        assert_eq!(event.summary, "School Lunch Menu");
        assert!(event.transparent);
        assert!(event.uid.ends_with("@example.com"));
    }

    assert_eq!(
        events[0].description,
        "Lunch Menu:\nFrench Toast Sticks\nTurkey Sausage\nApple Slices"
    );
    // The table runs after the calendar blocks and replaces March 5 wholesale.
    assert_eq!(
        events[1].description,
        "Lunch Menu:\nCheese Pizza\nGarden Salad, Ranch\n1% Milk"
    );

    assert!(!env.diagnostics_path().exists());
    Ok(())
}

#[test]
fn calendar_header_carries_feed_metadata() -> Result<()> {
    let env = FixtureEnv::new("week_menu.html")?;
    refresh(&env.loaded)?;

    let text = fs::read_to_string(env.ics_path())?;
    assert!(text.contains("VERSION:2.0\r\n"));
    assert!(text.contains("PRODID:-//School Lunch Menu Calendar//example.com//\r\n"));
    assert!(text.contains("X-WR-CALNAME:School Lunch Menu\r\n"));
    assert!(text.contains("X-WR-CALDESC:Daily school lunch menu items\r\n"));
    assert!(text.contains("X-WR-TIMEZONE:America/New_York\r\n"));
    Ok(())
}

#[test]
fn repeated_refresh_produces_identical_event_content() -> Result<()> {
    let env = FixtureEnv::new("week_menu.html")?;

    refresh(&env.loaded)?;
    let first = env.read_events()?;
    refresh(&env.loaded)?;
    let second = env.read_events()?;

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(without_uid(a), without_uid(b));
        assert_ne!(a.uid, b.uid);
    }
    Ok(())
}

#[test]
fn fetch_failure_publishes_sentinel_and_records_diagnostics() -> Result<()> {
    let env = FixtureEnv::new("week_menu.html")?;
    fs::remove_file(env.dir.path().join("menu.html"))?;

    let now = Utc.with_ymd_and_hms(2024, 3, 5, 3, 30, 0).unwrap();
    let report = refresh_as_of(&env.loaded, now)?;
    assert!(!report.success);
    assert!(report.fetch_failed);
    assert_eq!(report.days, 0);
    assert_eq!(report.events, 1);

    let events = env.read_events()?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].summary, "Menu Fetch Failed");
    // 03:30 UTC is still March 4 in New York.
    assert_eq!(events[0].start, Some(date(2024, 3, 4)));
    assert_eq!(events[0].end, Some(date(2024, 3, 5)));
    assert!(events[0].description.contains("menu_debug.log"));

    let diagnostics = fs::read_to_string(env.diagnostics_path())?;
    assert!(diagnostics.contains("| fetch failure ====="));
    assert!(diagnostics.contains("failed to read menu snapshot"));
    Ok(())
}

#[test]
fn page_without_menu_data_captures_structure() -> Result<()> {
    let env = FixtureEnv::new("empty_shell.html")?;

    let collection = collect_menu(&env.loaded)?;
    assert!(collection.menu.is_empty());
    assert!(!collection.fetch_failed);

    let diagnostics = fs::read_to_string(env.diagnostics_path())?;
    assert!(diagnostics.contains("| no menu data extracted ====="));
    assert!(diagnostics.contains("calendar_block: 0 day(s)"));
    assert!(diagnostics.contains("id=\"app\""));
    assert!(diagnostics.contains("March 4, 2024"));
    assert!(diagnostics.contains("/api/v1/public/menu/74432"));
    assert!(diagnostics.contains("Loading menus for the week"));

    let report = refresh(&env.loaded)?;
    assert!(!report.success);
    assert!(!report.fetch_failed);
    let diagnostics = fs::read_to_string(env.diagnostics_path())?;
    assert_eq!(diagnostics.matches("| no menu data extracted =====").count(), 2);
    Ok(())
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn without_uid(event: &ParsedEvent) -> ParsedEvent {
    ParsedEvent {
        uid: String::new(),
        ..event.clone()
    }
}

struct FixtureEnv {
    dir: TempDir,
    loaded: LoadedConfig,
}

impl FixtureEnv {
    fn new(fixture: &str) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let fixture_path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(fixture);
        fs::copy(fixture_path, dir.path().join("menu.html"))?;

        let mut config = AppConfig::default();
        config.fetch.mode = FetchMode::File;
        config.fetch.file_path = Some(PathBuf::from("menu.html"));
        config.output.ics_path = PathBuf::from("out/lunch_menu.ics");
        config.validate()?;

        let loaded = LoadedConfig::from_config(dir.path().join("lunchcal.toml"), config);
        Ok(Self { dir, loaded })
    }

    fn ics_path(&self) -> PathBuf {
        self.dir.path().join("out/lunch_menu.ics")
    }

    fn diagnostics_path(&self) -> PathBuf {
        self.dir.path().join("menu_debug.log")
    }

    fn read_events(&self) -> Result<Vec<ParsedEvent>> {
        Ok(read_calendar(&fs::read_to_string(self.ics_path())?))
    }
}
