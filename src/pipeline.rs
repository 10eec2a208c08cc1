use crate::api::decode_menu;
use crate::config::LoadedConfig;
use crate::diagnostics::{record_empty_result, record_fetch_failure};
use crate::feed::FeedBuilder;
use crate::fetch::{PageFormat, fetch_menu_page};
use crate::ics::{render_calendar, write_calendar};
use crate::model::{EmbeddedPayload, MenuByDate, RefreshReport};
use crate::strategy::{MenuStrategy, default_strategies};
use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use scraper::Html;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub menu: MenuByDate,
    /// Days reported by each strategy, in run order.
    pub strategy_counts: Vec<(&'static str, usize)>,
    pub findings: Vec<EmbeddedPayload>,
}

#[derive(Debug, Clone)]
pub struct MenuCollection {
    pub source_url: String,
    pub menu: MenuByDate,
    pub fetch_failed: bool,
}

pub struct Extractor {
    strategies: Vec<Box<dyn MenuStrategy>>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::with_strategies(default_strategies())
    }
}

impl Extractor {
    pub fn with_strategies(strategies: Vec<Box<dyn MenuStrategy>>) -> Self {
        Self { strategies }
    }

    /// Runs every strategy against one parse of `html` and merges their
    /// results in order. A later strategy replaces an earlier one's entry
    /// for the same date; a failing strategy contributes nothing.
    pub fn extract(&self, html: &str) -> Extraction {
        let doc = Html::parse_document(html);
        let mut extraction = Extraction::default();

        for strategy in &self.strategies {
            match strategy.extract(&doc) {
                Ok(output) => {
                    let days = output.menu.len();
                    debug!(
                        strategy = strategy.name(),
                        days,
                        findings = output.findings.len(),
                        "strategy finished"
                    );
                    for finding in &output.findings {
                        debug!(
                            strategy = strategy.name(),
                            script = finding.script_index,
                            keys = ?finding.top_level_keys,
                            "embedded menu-like json detected"
                        );
                    }
                    extraction.strategy_counts.push((strategy.name(), days));
                    extraction.findings.extend(output.findings);
                    extraction.menu.merge_from(output.menu);
                }
                Err(err) => {
                    warn!(strategy = strategy.name(), error = %err, "strategy failed; skipping");
                    extraction.strategy_counts.push((strategy.name(), 0));
                }
            }
        }

        extraction
    }
}

pub fn extract_menu(html: &str) -> Extraction {
    Extractor::default().extract(html)
}

const API_SOURCE: &str = "menu_api";

/// Decodes a menu endpoint body. An unexpected payload is contained the same
/// way a failing strategy is: logged, and counted as zero days.
pub fn extract_api_menu(body: &str) -> Extraction {
    let menu = match decode_menu(body) {
        Ok(menu) => menu,
        Err(err) => {
            warn!(error = %err, "unexpected menu api payload");
            MenuByDate::new()
        }
    };

    Extraction {
        strategy_counts: vec![(API_SOURCE, menu.len())],
        menu,
        findings: Vec::new(),
    }
}

/// Fetches and extracts. A fetch failure or an empty result is captured to
/// the diagnostics file and comes back as an empty menu, never as an error.
pub fn collect_menu(loaded: &LoadedConfig) -> Result<MenuCollection> {
    collect_menu_with(loaded, &Extractor::default())
}

pub fn collect_menu_with(loaded: &LoadedConfig, extractor: &Extractor) -> Result<MenuCollection> {
    let diagnostics_path = loaded.diagnostics_path()?;

    let page = match fetch_menu_page(loaded) {
        Ok(page) => page,
        Err(err) => {
            let url = loaded.config.target_url();
            warn!(%url, error = %err, "menu fetch failed");
            capture(&diagnostics_path, |path| record_fetch_failure(path, url, &err));
            return Ok(MenuCollection {
                source_url: url.to_string(),
                menu: MenuByDate::new(),
                fetch_failed: true,
            });
        }
    };

    let extraction = match page.format {
        PageFormat::Html => extractor.extract(&page.body),
        PageFormat::MenuJson => extract_api_menu(&page.body),
    };
    info!(
        url = %page.source_url,
        days = extraction.menu.len(),
        strategies = ?extraction.strategy_counts,
        "menu extraction complete"
    );

    if extraction.menu.is_empty() {
        warn!(url = %page.source_url, "no menu data extracted");
        capture(&diagnostics_path, |path| {
            record_empty_result(
                path,
                &page.source_url,
                &page.body,
                &extraction.strategy_counts,
                &extraction.findings,
            )
        });
    }

    Ok(MenuCollection {
        source_url: page.source_url,
        menu: extraction.menu,
        fetch_failed: false,
    })
}

fn capture(path: &Path, record: impl FnOnce(&Path) -> Result<()>) {
    if let Err(err) = record(path) {
        warn!(file = %path.display(), error = %err, "failed to write diagnostics");
    }
}

/// One full refresh: fetch, extract, build and write the calendar file.
pub fn refresh(loaded: &LoadedConfig) -> Result<RefreshReport> {
    refresh_as_of(loaded, Utc::now())
}

/// The calendar is written even when `source.timezone` is unusable; dates
/// then fall back to UTC.
pub fn refresh_as_of(loaded: &LoadedConfig, now: DateTime<Utc>) -> Result<RefreshReport> {
    let config = &loaded.config;
    let tz = config.timezone().unwrap_or_else(|err| {
        warn!(error = %err, "falling back to UTC for calendar dates");
        Tz::UTC
    });

    let collection = collect_menu(loaded)?;

    let today = now.with_timezone(&tz).date_naive();
    let diagnostics_path = loaded.diagnostics_path()?;
    let diagnostics_name = diagnostics_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| diagnostics_path.display().to_string());

    let feed = FeedBuilder::new(&config.feed, diagnostics_name).build(&collection.menu, today);
    let text = render_calendar(&config.feed, tz.name(), &feed.events, now);

    let ics_path = loaded.ics_path()?;
    write_calendar(&ics_path, &text)?;

    if feed.success {
        info!(
            days = collection.menu.len(),
            file = %ics_path.display(),
            "calendar updated"
        );
    } else {
        warn!(
            file = %ics_path.display(),
            "calendar written with failure notice; no menu data available"
        );
    }

    Ok(RefreshReport {
        source_url: collection.source_url,
        days: collection.menu.len(),
        events: feed.events.len(),
        success: feed.success,
        fetch_failed: collection.fetch_failed,
        ics_path,
    })
}
