//! Application state for the Actix-web server
//!
//! This module defines the shared state used across all HTTP handlers.
//! The `AppState` struct is wrapped in `web::Data` and gives every handler
//! the capture engine, the batch runner and a way to open chapter pages.
//!
//! # Structure
//!
//! - `AppState`: engine, discovery, batch control and configuration
//! - `AppState::build`: wires them together from a loaded `Config`

use chapter_grabber::batch::BatchControl;
use chapter_grabber::browser::BrowserManager;
use chapter_grabber::config::Config;
use chapter_grabber::discovery::ChapterDiscoverer;
use chapter_grabber::http_client::EnhancedHttpClient;
use chapter_grabber::metrics::MetricsTracker;
use chapter_grabber::pipeline::CaptureEngine;
use chapter_grabber::session::{ProgressHub, SessionRegistry};
use chapter_grabber::target::{StaticTargets, TargetFactory};
use std::sync::Arc;
use std::time::Duration;

/// Shared application state for Actix-web handlers
///
/// This struct is wrapped in `web::Data` and shared across all HTTP request handlers.
/// Every field is either immutable or internally synchronized.
pub struct AppState {
    /// Single-chapter pipeline; also owns the session registry and progress hub
    pub engine: Arc<CaptureEngine>,
    /// Multi-chapter queue and runner
    pub batch: BatchControl,
    pub discoverer: ChapterDiscoverer,
    /// Chrome pages when the browser is up, plain HTTP pages otherwise
    pub targets: Arc<dyn TargetFactory>,
    /// Metrics tracker for capture strategies
    pub metrics: MetricsTracker,
    /// Application configuration
    pub config: Config,
}

impl AppState {
    pub fn build(
        config: Config,
        http: Arc<EnhancedHttpClient>,
        browser: Option<BrowserManager>,
    ) -> Self {
        let metrics = MetricsTracker::new();
        let engine = CaptureEngine::new(
            &config,
            http.clone(),
            metrics.clone(),
            SessionRegistry::new(),
            ProgressHub::default(),
        );

        let targets: Arc<dyn TargetFactory> = match browser {
            Some(manager) => Arc::new(manager),
            None => Arc::new(StaticTargets::new(
                http,
                Duration::from_secs(config.discovery.navigation_timeout_secs),
            )),
        };

        Self {
            engine: Arc::new(engine),
            batch: BatchControl::new(),
            discoverer: ChapterDiscoverer::new(config.discovery.clone()),
            targets,
            metrics,
            config,
        }
    }
}
