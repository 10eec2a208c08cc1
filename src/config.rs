use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Config file location; relative paths inside the file resolve against
    /// its parent directory.
    pub path: PathBuf,
    pub config: AppConfig,
}

impl LoadedConfig {
    pub fn from_config(path: impl Into<PathBuf>, config: AppConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }

    pub fn ics_path(&self) -> Result<PathBuf> {
        resolve_path(&self.path, &self.config.output.ics_path)
    }

    pub fn diagnostics_path(&self) -> Result<PathBuf> {
        resolve_path(&self.path, &self.config.output.diagnostics_path)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub serve: ServeConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        match self.fetch.mode {
            FetchMode::Http => {
                let url = self.source.url.trim();
                if url.is_empty() {
                    bail!("source.url must not be empty");
                }
                Url::parse(url).with_context(|| format!("source.url is not a valid url: {url}"))?;
            }
            FetchMode::Api => {
                let url = self.fetch.api_url.trim();
                if url.is_empty() {
                    bail!("fetch.api_url must not be empty for api mode");
                }
                Url::parse(url)
                    .with_context(|| format!("fetch.api_url is not a valid url: {url}"))?;
            }
            FetchMode::File => {
                if self.fetch.file_path.is_none() {
                    bail!("fetch.file_path is required for file mode");
                }
            }
        }

        self.timezone()?;
        self.serve.refresh_time()?;

        if self.output.ics_path.as_os_str().is_empty() {
            bail!("output.ics_path must not be empty");
        }
        if self.output.diagnostics_path.as_os_str().is_empty() {
            bail!("output.diagnostics_path must not be empty");
        }
        if self.feed.uid_domain.trim().is_empty() {
            bail!("feed.uid_domain must not be empty");
        }

        Ok(())
    }

    /// The URL a fetch in the configured mode goes to.
    pub fn target_url(&self) -> &str {
        match self.fetch.mode {
            FetchMode::Api => self.fetch.api_url.trim(),
            FetchMode::Http | FetchMode::File => self.source.url.trim(),
        }
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.source
            .timezone
            .parse::<Tz>()
            .map_err(|err| anyhow!("unknown source.timezone {}: {err}", self.source.timezone))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub url: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// The menu page itself, run through the HTML strategies.
    #[default]
    Http,
    /// The menu site's JSON endpoint, decoded directly.
    Api,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub mode: FetchMode,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Sent as `x-district` on api requests.
    #[serde(default = "default_district")]
    pub district: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::Http,
            file_path: None,
            timeout_secs: default_timeout_secs(),
            user_agent: None,
            api_url: default_api_url(),
            district: default_district(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_ics_path")]
    pub ics_path: PathBuf,
    #[serde(default = "default_diagnostics_path")]
    pub diagnostics_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            ics_path: default_ics_path(),
            diagnostics_path: default_diagnostics_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_product_id")]
    pub product_id: String,
    #[serde(default = "default_calendar_name")]
    pub calendar_name: String,
    #[serde(default = "default_calendar_description")]
    pub calendar_description: String,
    #[serde(default = "default_event_title")]
    pub event_title: String,
    #[serde(default = "default_description_header")]
    pub description_header: String,
    #[serde(default = "default_uid_domain")]
    pub uid_domain: String,
    #[serde(default = "default_failure_title")]
    pub failure_title: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            product_id: default_product_id(),
            calendar_name: default_calendar_name(),
            calendar_description: default_calendar_description(),
            event_title: default_event_title(),
            description_header: default_description_header(),
            uid_domain: default_uid_domain(),
            failure_title: default_failure_title(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServeConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_refresh_at")]
    pub refresh_at: String,
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            refresh_at: default_refresh_at(),
            public_url: None,
        }
    }
}

impl ServeConfig {
    pub fn refresh_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.refresh_at.trim(), "%H:%M")
            .with_context(|| format!("serve.refresh_at must be HH:MM, got {}", self.refresh_at))
    }
}

/// Loads `config_path`, falling back to defaults when the file is absent.
pub fn load_config(config_path: &Path) -> Result<LoadedConfig> {
    let config = if config_path.exists() {
        let text = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config: {}", config_path.display()))?;
        toml::from_str::<AppConfig>(&text)
            .with_context(|| format!("failed to parse toml in {}", config_path.display()))?
    } else {
        AppConfig::default()
    };

    config
        .validate()
        .with_context(|| format!("invalid config {}", config_path.display()))?;

    Ok(LoadedConfig {
        path: config_path.to_path_buf(),
        config,
    })
}

pub fn resolve_path(base_config_path: &Path, maybe_relative: &Path) -> Result<PathBuf> {
    if maybe_relative.is_absolute() {
        return Ok(maybe_relative.to_path_buf());
    }

    let parent = base_config_path.parent().ok_or_else(|| {
        anyhow!(
            "config path has no parent directory: {}",
            base_config_path.display()
        )
    })?;

    Ok(parent.join(maybe_relative))
}

fn default_source_url() -> String {
    "https://myschoolmenus.com/organizations/1543/sites/11029/menus/74432".to_string()
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_api_url() -> String {
    "https://www.myschoolmenus.com/api/v1/public/menu/74432".to_string()
}

fn default_district() -> Option<String> {
    Some("1543".to_string())
}

fn default_ics_path() -> PathBuf {
    PathBuf::from("lunch_menu.ics")
}

fn default_diagnostics_path() -> PathBuf {
    PathBuf::from("menu_debug.log")
}

fn default_product_id() -> String {
    "-//School Lunch Menu Calendar//example.com//".to_string()
}

fn default_calendar_name() -> String {
    "School Lunch Menu".to_string()
}

fn default_calendar_description() -> String {
    "Daily school lunch menu items".to_string()
}

fn default_event_title() -> String {
    "School Lunch Menu".to_string()
}

fn default_description_header() -> String {
    "Lunch Menu:".to_string()
}

fn default_uid_domain() -> String {
    "example.com".to_string()
}

fn default_failure_title() -> String {
    "Menu Fetch Failed".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_refresh_at() -> String {
    "06:00".to_string()
}
