pub mod aggregate;
pub mod api;
pub mod board;
pub mod config;
pub mod error;
pub mod forms;
pub mod models;
pub mod residents;
pub mod token;

use aggregate::{DashboardStore, DerivedStats, IssueCounts};
use api::{ApiClient, Backend};
use board::IssueBoard;
use config::Config;
use error::ApiError;
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `log` records from the library are routed
/// through it.
///
/// `PROPDESK_LOG` takes an `EnvFilter` directive; `PROPDESK_LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("PROPDESK_LOG")
        .unwrap_or_else(|_| EnvFilter::new("propdesk=info,warn"));
    let format = std::env::var("PROPDESK_LOG_FORMAT").unwrap_or_default();
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if format == "json" {
        registry
            .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = installed {
        eprintln!("propdesk: logging already initialised: {e}");
    }
}

/// What the owner dashboard shows on load.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub stats: DerivedStats,
    pub issue_counts: IssueCounts,
    pub issues: Vec<models::Issue>,
}

/// Load issues and dashboard collections side by side.
pub async fn load_dashboard(backend: Arc<dyn Backend>) -> DashboardSnapshot {
    let store = DashboardStore::new();
    let (board, _notices) = IssueBoard::new(Arc::clone(&backend));

    let (issues, _) = futures::join!(board.refresh(), store.refresh(backend.as_ref()));
    if let Err(e) = issues {
        log::warn!("Showing dashboard without issues: {e}");
    }

    DashboardSnapshot {
        stats: store.stats(),
        issue_counts: board.counts(),
        issues: board.issues().as_ref().clone(),
    }
}

/// Fetch the dashboard once with the configured backend and print it as JSON.
pub async fn run() -> Result<(), ApiError> {
    let config = Config::load()?;
    log::info!("Using API at {}", config.api_base_url);

    let client: Arc<dyn Backend> = Arc::new(ApiClient::from_config(&config));
    let snapshot = load_dashboard(client).await;
    let rendered = serde_json::to_string_pretty(&snapshot).map_err(|e| ApiError::Decode {
        endpoint: "dashboard".to_string(),
        reason: e.to_string(),
    })?;
    println!("{rendered}");
    Ok(())
}
