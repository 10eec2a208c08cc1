//! HTTP surface and daily refresh loop around [`crate::pipeline::refresh`].
//!
//! Refreshes run on the blocking pool and never overlap: a trigger that
//! arrives while one is in flight is dropped.

use crate::config::LoadedConfig;
use crate::model::RefreshReport;
use crate::pipeline::refresh;
use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

pub const CALENDAR_ROUTE: &str = "/lunch_calendar.ics";

#[derive(Debug, Clone)]
pub struct LastRefresh {
    pub at: DateTime<Utc>,
    pub report: RefreshReport,
}

#[derive(Clone)]
pub struct AppState {
    loaded: Arc<LoadedConfig>,
    ics_path: Arc<PathBuf>,
    tz: Tz,
    refresh_lock: Arc<Mutex<()>>,
    last_refresh: Arc<RwLock<Option<LastRefresh>>>,
}

impl AppState {
    pub fn new(loaded: LoadedConfig) -> Result<Self> {
        let ics_path = loaded.ics_path()?;
        let tz = loaded.config.timezone()?;
        Ok(Self {
            loaded: Arc::new(loaded),
            ics_path: Arc::new(ics_path),
            tz,
            refresh_lock: Arc::new(Mutex::new(())),
            last_refresh: Arc::new(RwLock::new(None)),
        })
    }

    pub async fn last_refresh(&self) -> Option<LastRefresh> {
        self.last_refresh.read().await.clone()
    }

    fn subscription_url(&self) -> String {
        let serve = &self.loaded.config.serve;
        let base = serve
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", serve.bind));
        format!("{}{CALENDAR_ROUTE}", base.trim_end_matches('/'))
    }
}

/// Runs one refresh unless another is already running, in which case the
/// trigger is skipped and `None` is returned.
pub async fn trigger_refresh(state: &AppState) -> Option<RefreshReport> {
    let Ok(_guard) = state.refresh_lock.try_lock() else {
        warn!("refresh already in progress; skipping trigger");
        return None;
    };

    let loaded = Arc::clone(&state.loaded);
    match tokio::task::spawn_blocking(move || refresh(&loaded)).await {
        Ok(Ok(report)) => {
            info!(
                days = report.days,
                success = report.success,
                "refresh finished"
            );
            *state.last_refresh.write().await = Some(LastRefresh {
                at: Utc::now(),
                report: report.clone(),
            });
            Some(report)
        }
        Ok(Err(err)) => {
            error!(error = ?err, "refresh failed");
            None
        }
        Err(err) => {
            error!(error = %err, "refresh task panicked or was cancelled");
            None
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route(CALENDAR_ROUTE, get(calendar))
        .with_state(state)
}

async fn calendar(State(state): State<AppState>) -> Response {
    match tokio::fs::read(state.ics_path.as_path()).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "text/calendar; charset=utf-8")],
            bytes,
        )
            .into_response(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "calendar has not been generated yet").into_response()
        }
        Err(err) => {
            error!(file = %state.ics_path.display(), error = %err, "failed to read calendar");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn home(State(state): State<AppState>) -> Html<String> {
    let last_updated = describe_last_refresh(state.last_refresh().await.as_ref(), state.tz);

    Html(format!(
        "<html>\n<head><title>{name}</title></head>\n<body>\n\
         <h1>{name}</h1>\n\
         <p>Subscribe to this calendar feed in your calendar application using this URL:</p>\n\
         <code>{url}</code>\n\
         <p>Last updated: {last_updated}</p>\n\
         </body>\n</html>\n",
        name = state.loaded.config.feed.calendar_name,
        url = state.subscription_url(),
    ))
}

/// Local time in the source timezone, as subscribers read it.
fn describe_last_refresh(last: Option<&LastRefresh>, tz: Tz) -> String {
    let Some(last) = last else {
        return "never".to_string();
    };
    let at = last.at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z");
    if last.report.success {
        format!("{at} ({} day(s) of menus)", last.report.days)
    } else {
        format!("{at} (no menu data; see diagnostics)")
    }
}

/// Registers the daily refresh at `serve.refresh_at` in the source timezone.
/// The returned scheduler must be kept alive.
pub async fn build_scheduler(state: AppState) -> Result<JobScheduler> {
    let config = &state.loaded.config;
    let at = config.serve.refresh_time()?;
    let tz = state.tz;
    let schedule = format!("0 {} {} * * *", at.minute(), at.hour());

    let scheduler = JobScheduler::new()
        .await
        .context("failed to create scheduler")?;

    let job_state = state.clone();
    let job = Job::new_async_tz(schedule.as_str(), tz, move |_uuid, _lock| {
        let state = job_state.clone();
        Box::pin(async move {
            info!("scheduler: starting daily menu refresh");
            trigger_refresh(&state).await;
        })
    })
    .with_context(|| format!("invalid refresh schedule {schedule}"))?;

    scheduler
        .add(job)
        .await
        .context("failed to register refresh job")?;
    scheduler
        .start()
        .await
        .context("failed to start scheduler")?;

    info!(at = %at.format("%H:%M"), timezone = %tz, "daily refresh scheduled");
    Ok(scheduler)
}

/// Refreshes once, schedules the daily refresh and serves until shutdown.
pub async fn serve(loaded: LoadedConfig) -> Result<()> {
    let bind = loaded.config.serve.bind.clone();
    let state = AppState::new(loaded)?;

    trigger_refresh(&state).await;
    let _scheduler = build_scheduler(state.clone()).await?;

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, url = %state.subscription_url(), "serving lunch calendar");

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("received shutdown signal, starting graceful shutdown");
}
