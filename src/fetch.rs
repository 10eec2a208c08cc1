use crate::config::{FetchMode, LoadedConfig, resolve_path};
use crate::error::FetchError;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::{info, warn};

const DISTRICT_HEADER: HeaderName = HeaderName::from_static("x-district");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    Html,
    /// Body of the menu JSON endpoint.
    MenuJson,
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub source_url: String,
    pub body: String,
    pub format: PageFormat,
}

/// Single attempt, no retries and no caching.
pub fn fetch_menu_page(loaded: &LoadedConfig) -> Result<FetchedPage, FetchError> {
    match loaded.config.fetch.mode {
        FetchMode::Http => fetch_http_page(loaded),
        FetchMode::Api => fetch_api_page(loaded),
        FetchMode::File => fetch_file_page(loaded),
    }
}

fn fetch_http_page(loaded: &LoadedConfig) -> Result<FetchedPage, FetchError> {
    let url = loaded.config.source.url.trim();
    let client = build_client(loaded, HeaderMap::new())?;

    let body = get_text(&client, url)?;
    info!(%url, bytes = body.len(), "fetched menu page");

    Ok(FetchedPage {
        source_url: url.to_string(),
        body,
        format: PageFormat::Html,
    })
}

fn fetch_api_page(loaded: &LoadedConfig) -> Result<FetchedPage, FetchError> {
    let fetch = &loaded.config.fetch;
    let url = fetch.api_url.trim();

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(district) = &fetch.district {
        match HeaderValue::from_str(district.trim()) {
            Ok(value) => {
                headers.insert(DISTRICT_HEADER, value);
            }
            Err(err) => warn!(error = %err, "ignoring invalid fetch.district"),
        }
    }
    let client = build_client(loaded, headers)?;

    let body = get_text(&client, url)?;
    info!(%url, bytes = body.len(), "fetched menu api");

    Ok(FetchedPage {
        source_url: url.to_string(),
        body,
        format: PageFormat::MenuJson,
    })
}

fn build_client(loaded: &LoadedConfig, mut headers: HeaderMap) -> Result<Client, FetchError> {
    let fetch = &loaded.config.fetch;
    if let Some(user_agent) = &fetch.user_agent {
        match HeaderValue::from_str(user_agent) {
            Ok(value) => {
                headers.insert(USER_AGENT, value);
            }
            Err(err) => warn!(error = %err, "ignoring invalid fetch.user_agent"),
        }
    }

    Client::builder()
        .timeout(Duration::from_secs(fetch.timeout_secs))
        .default_headers(headers)
        .build()
        .map_err(FetchError::ClientBuild)
}

fn get_text(client: &Client, url: &str) -> Result<String, FetchError> {
    let resp = client.get(url).send().map_err(|source| FetchError::Request {
        url: url.to_string(),
        source,
    })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status,
        });
    }

    resp.text().map_err(|source| FetchError::Body {
        url: url.to_string(),
        source,
    })
}

fn fetch_file_page(loaded: &LoadedConfig) -> Result<FetchedPage, FetchError> {
    let file_path = loaded
        .config
        .fetch
        .file_path
        .as_ref()
        .ok_or(FetchError::MissingFilePath)?;
    let resolved = resolve_path(&loaded.path, file_path).map_err(|_| FetchError::File {
        path: file_path.clone(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    })?;
    let bytes = std::fs::read(&resolved).map_err(|source| FetchError::File {
        path: resolved.clone(),
        source,
    })?;

    info!(
        file = %resolved.display(),
        bytes = bytes.len(),
        "loaded menu snapshot"
    );

    Ok(FetchedPage {
        source_url: format!("file://{}", resolved.display()),
        body: String::from_utf8_lossy(&bytes).into_owned(),
        format: PageFormat::Html,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::path::PathBuf;

    #[test]
    fn file_mode_reads_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("menu.html"), "<html>menu</html>").unwrap();

        let mut config = AppConfig::default();
        config.fetch.mode = FetchMode::File;
        config.fetch.file_path = Some(PathBuf::from("menu.html"));
        let loaded = LoadedConfig::from_config(dir.path().join("lunchcal.toml"), config);

        let page = fetch_menu_page(&loaded).unwrap();
        assert_eq!(page.body, "<html>menu</html>");
        assert_eq!(page.format, PageFormat::Html);
        assert!(page.source_url.starts_with("file://"));
    }

    #[test]
    fn missing_snapshot_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.fetch.mode = FetchMode::File;
        config.fetch.file_path = Some(PathBuf::from("nope.html"));
        let loaded = LoadedConfig::from_config(dir.path().join("lunchcal.toml"), config);

        let err = fetch_menu_page(&loaded).unwrap_err();
        assert!(matches!(err, FetchError::File { .. }));
    }
}
