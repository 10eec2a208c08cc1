//! Free-text capture of failed or empty refreshes, for a human to read when
//! the menu page changes shape. Nothing in the crate parses this back.

use crate::dates::find_date_like;
use crate::error::FetchError;
use crate::model::EmbeddedPayload;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::error::Error as _;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;
use url::Url;

const ELEMENT_KEYWORDS: &[&str] = &[
    "menu", "day", "calendar", "lunch", "food", "item", "recipe", "meal",
];
const SAMPLES_PER_KEYWORD: usize = 10;
const SAMPLE_TEXT_CHARS: usize = 200;
const MAX_DATE_MATCHES: usize = 20;
const MAX_ENDPOINTS: usize = 20;

static API_ENDPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:https?://[^\s"'<>()]+)?/api/[^\s"'<>()]*"#)
        .expect("api endpoint pattern must compile")
});

#[derive(Debug, Clone)]
struct Section {
    title: String,
    body: String,
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticsReport {
    heading: String,
    sections: Vec<Section>,
}

impl DiagnosticsReport {
    pub fn new(heading: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            sections: Vec::new(),
        }
    }

    pub fn section(&mut self, title: impl Into<String>, body: impl Into<String>) -> &mut Self {
        self.sections.push(Section {
            title: title.into(),
            body: body.into(),
        });
        self
    }

    pub fn render(&self, at: DateTime<Utc>) -> String {
        let mut out = format!(
            "\n===== {} | {} =====\n",
            at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.heading
        );
        for section in &self.sections {
            out.push_str(&format!("\n--- {} ---\n", section.title));
            out.push_str(section.body.trim_end());
            out.push('\n');
        }
        out
    }

    /// Appends the rendered report to `path` in one write.
    pub fn append_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create diagnostics dir {}", parent.display())
            })?;
        }

        let rendered = self.render(Utc::now());
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open diagnostics file {}", path.display()))?;
        file.write_all(rendered.as_bytes())
            .with_context(|| format!("failed to write diagnostics file {}", path.display()))?;

        info!(file = %path.display(), sections = self.sections.len(), "diagnostics captured");
        Ok(())
    }
}

pub fn record_fetch_failure(path: &Path, url: &str, err: &FetchError) -> Result<()> {
    let mut chain = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }

    let mut report = DiagnosticsReport::new("fetch failure");
    report
        .section("Source", url)
        .section("Error", chain.join("\n  caused by: "));
    report.append_to(path)
}

pub fn record_empty_result(
    path: &Path,
    url: &str,
    html: &str,
    strategy_counts: &[(&'static str, usize)],
    findings: &[EmbeddedPayload],
) -> Result<()> {
    empty_result_report(url, html, strategy_counts, findings).append_to(path)
}

fn empty_result_report(
    url: &str,
    html: &str,
    strategy_counts: &[(&'static str, usize)],
    findings: &[EmbeddedPayload],
) -> DiagnosticsReport {
    let doc = Html::parse_document(html);
    let counts = strategy_counts
        .iter()
        .map(|(name, days)| format!("{name}: {days} day(s)"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut report = DiagnosticsReport::new("no menu data extracted");
    report
        .section(
            "Source",
            format!("url: {url}\nmarkup length: {} bytes", html.len()),
        )
        .section("Strategies", counts)
        .section("Candidate elements", candidate_elements(&doc))
        .section("Date-like text", date_like_text(&doc))
        .section("Possible API endpoints", api_endpoints(html, url))
        .section("Embedded JSON", describe_findings(findings))
        .section("Full markup", html);
    report
}

fn candidate_elements(doc: &Html) -> String {
    let mut lines = Vec::new();

    for keyword in ELEMENT_KEYWORDS {
        let css = format!("[class*=\"{keyword}\"], [id*=\"{keyword}\"]");
        let Ok(selector) = Selector::parse(&css) else {
            continue;
        };
        let matched = doc.select(&selector).collect::<Vec<_>>();
        if matched.is_empty() {
            continue;
        }

        lines.push(format!("[{keyword}] {} element(s)", matched.len()));
        for element in matched.into_iter().take(SAMPLES_PER_KEYWORD) {
            let value = element.value();
            let text = element
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            lines.push(format!(
                "  <{} class=\"{}\" id=\"{}\"> {}",
                value.name(),
                value.attr("class").unwrap_or_default(),
                value.attr("id").unwrap_or_default(),
                text.chars().take(SAMPLE_TEXT_CHARS).collect::<String>()
            ));
        }
    }

    none_if_empty(lines)
}

fn date_like_text(doc: &Html) -> String {
    let text = doc.root_element().text().collect::<Vec<_>>().join(" ");
    let mut seen = BTreeSet::new();
    let lines = find_date_like(&text)
        .into_iter()
        .filter(|m| seen.insert(m.clone()))
        .take(MAX_DATE_MATCHES)
        .collect();
    none_if_empty(lines)
}

fn api_endpoints(html: &str, source_url: &str) -> String {
    let base = Url::parse(source_url).ok();
    let mut seen = BTreeSet::new();
    let lines = API_ENDPOINT
        .find_iter(html)
        .map(|m| {
            let raw = m.as_str();
            base.as_ref()
                .filter(|_| raw.starts_with('/'))
                .and_then(|b| b.join(raw).ok())
                .map(|u| u.to_string())
                .unwrap_or_else(|| raw.to_string())
        })
        .filter(|endpoint| seen.insert(endpoint.clone()))
        .take(MAX_ENDPOINTS)
        .collect();
    none_if_empty(lines)
}

fn describe_findings(findings: &[EmbeddedPayload]) -> String {
    let lines = findings
        .iter()
        .map(|f| {
            format!(
                "script #{} keywords=[{}] keys=[{}]\n  {}",
                f.script_index,
                f.keywords.join(", "),
                f.top_level_keys.join(", "),
                f.snippet
            )
        })
        .collect();
    none_if_empty(lines)
}

fn none_if_empty(lines: Vec<String>) -> String {
    if lines.is_empty() {
        "(none)".to_string()
    } else {
        lines.join("\n")
    }
}
