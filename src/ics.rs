use crate::config::FeedConfig;
use crate::model::CalendarEvent;
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use std::path::Path;

const FOLD_LIMIT: usize = 75;

/// A VEVENT read back from a rendered calendar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEvent {
    pub uid: String,
    pub summary: String,
    pub description: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub transparent: bool,
}

pub fn render_calendar(
    feed: &FeedConfig,
    timezone: &str,
    events: &[CalendarEvent],
    stamp: DateTime<Utc>,
) -> String {
    let mut lines = Vec::new();
    push_line(&mut lines, "BEGIN:VCALENDAR".to_string());
    push_line(&mut lines, "VERSION:2.0".to_string());
    push_line(&mut lines, format!("PRODID:{}", feed.product_id));
    push_line(&mut lines, "CALSCALE:GREGORIAN".to_string());
    push_line(&mut lines, "METHOD:PUBLISH".to_string());
    push_line(
        &mut lines,
        format!("X-WR-CALNAME:{}", escape_text(&feed.calendar_name)),
    );
    push_line(
        &mut lines,
        format!("X-WR-CALDESC:{}", escape_text(&feed.calendar_description)),
    );
    push_line(&mut lines, format!("X-WR-TIMEZONE:{timezone}"));

    for event in events {
        append_event_lines(&mut lines, event, stamp);
    }

    push_line(&mut lines, "END:VCALENDAR".to_string());
    lines.join("\r\n") + "\r\n"
}

/// Replaces `path` as a whole: readers see the old file or the new one.
pub fn write_calendar(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output dir {}", parent.display()))?;
    }

    let tmp = path.with_extension("ics.tmp");
    std::fs::write(&tmp, contents)
        .with_context(|| format!("failed to write ics {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move ics into place at {}", path.display()))?;

    Ok(())
}

fn append_event_lines(lines: &mut Vec<String>, event: &CalendarEvent, stamp: DateTime<Utc>) {
    push_line(lines, "BEGIN:VEVENT".to_string());
    push_line(lines, format!("UID:{}", escape_text(&event.uid)));
    push_line(lines, format!("DTSTAMP:{}", format_utc(stamp)));
    push_line(
        lines,
        format!("DTSTART;VALUE=DATE:{}", format_date(event.start)),
    );
    push_line(lines, format!("DTEND;VALUE=DATE:{}", format_date(event.end)));
    push_line(lines, format!("SUMMARY:{}", escape_text(&event.title)));
    push_line(
        lines,
        format!("DESCRIPTION:{}", escape_text(&event.description)),
    );
    if event.transparent {
        push_line(lines, "TRANSP:TRANSPARENT".to_string());
    } else {
        push_line(lines, "TRANSP:OPAQUE".to_string());
    }
    push_line(lines, "END:VEVENT".to_string());
}

/// Reads the VEVENTs out of a calendar document. Unknown properties and
/// components are ignored.
pub fn read_calendar(text: &str) -> Vec<ParsedEvent> {
    let mut events = Vec::new();
    let mut current: Option<ParsedEvent> = None;

    for line in unfold_lines(text) {
        let Some((head, value)) = line.split_once(':') else {
            continue;
        };
        let name = head.split(';').next().unwrap_or(head).to_ascii_uppercase();

        if name == "BEGIN" && value.eq_ignore_ascii_case("VEVENT") {
            current = Some(ParsedEvent::default());
            continue;
        }
        if name == "END" && value.eq_ignore_ascii_case("VEVENT") {
            events.extend(current.take());
            continue;
        }
        let Some(event) = current.as_mut() else {
            continue;
        };

        match name.as_str() {
            "UID" => event.uid = unescape_text(value),
            "SUMMARY" => event.summary = unescape_text(value),
            "DESCRIPTION" => event.description = unescape_text(value),
            "DTSTART" => event.start = parse_date_value(value),
            "DTEND" => event.end = parse_date_value(value),
            "TRANSP" => event.transparent = value.eq_ignore_ascii_case("TRANSPARENT"),
            _ => {}
        }
    }

    events
}

fn unfold_lines(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in text.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(continued) = raw.strip_prefix([' ', '\t'])
            && let Some(last) = out.last_mut()
        {
            last.push_str(continued);
            continue;
        }
        if !raw.is_empty() {
            out.push(raw.to_string());
        }
    }
    out
}

fn parse_date_value(value: &str) -> Option<NaiveDate> {
    let digits = value.get(..8)?;
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

fn push_line(lines: &mut Vec<String>, line: String) {
    lines.extend(fold_line(&line));
}

/// Splits at 75 octets; continuation lines carry a leading space within the
/// same limit. Never splits inside a UTF-8 sequence.
fn fold_line(line: &str) -> Vec<String> {
    if line.len() <= FOLD_LIMIT {
        return vec![line.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for ch in line.chars() {
        if current.len() + ch.len_utf8() > FOLD_LIMIT {
            chunks.push(std::mem::take(&mut current));
            current.push(' ');
        }
        current.push(ch);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn format_utc(value: DateTime<Utc>) -> String {
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        value.year(),
        value.month(),
        value.day(),
        value.hour(),
        value.minute(),
        value.second()
    )
}

fn format_date(value: NaiveDate) -> String {
    format!("{:04}{:02}{:02}", value.year(), value.month(), value.day())
}

fn escape_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace("\r\n", "\\n")
        .replace('\n', "\\n")
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
