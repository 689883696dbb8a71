use super::config::BrowserConfig;
use super::page::BrowserPage;
use crate::error::TargetError;
use crate::target::{CaptureTarget, TargetFactory};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

/// Owns the Chrome process and hands out capture pages
pub struct BrowserManager {
    browser: Arc<Browser>,
    config: BrowserConfig,
}

impl BrowserManager {
    /// Launch Chrome with the given configuration
    pub fn new(config: BrowserConfig) -> Result<Self, BrowserError> {
        let launch_options = Self::build_launch_options(&config)?;

        let browser = Browser::new(launch_options)
            .map_err(|e| BrowserError::InitializationError(e.to_string()))?;

        log::info!(
            "Browser started (headless: {}, {} extra flags)",
            config.headless,
            config.chrome_flags.len()
        );

        Ok(Self {
            browser: Arc::new(browser),
            config,
        })
    }

    fn build_launch_options(config: &BrowserConfig) -> Result<LaunchOptions<'_>, BrowserError> {
        let args: Vec<&OsStr> = config.chrome_flags.iter().map(OsStr::new).collect();

        LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.window_size.0, config.window_size.1)))
            .idle_browser_timeout(Duration::from_secs(
                config.navigation_timeout_seconds.max(config.timeout_seconds) * 5,
            ))
            .args(args)
            .build()
            .map_err(|e| BrowserError::ConfigurationError(e.to_string()))
    }

    /// Create a new tab
    pub fn new_tab(&self) -> Result<Arc<Tab>, BrowserError> {
        open_tab(&self.browser, &self.config)
    }

    /// Create a tab wrapped as a capture target
    pub fn new_page(&self) -> Result<BrowserPage, BrowserError> {
        let tab = self.new_tab()?;
        Ok(BrowserPage::new(
            tab,
            self.config.timeout(),
            self.config.navigation_timeout(),
        ))
    }

    /// Tabs the browser currently has open
    pub fn open_tab_count(&self) -> usize {
        self.browser
            .get_tabs()
            .lock()
            .map(|tabs| tabs.len())
            .unwrap_or_else(|e| e.into_inner().len())
    }

    /// Get the browser configuration
    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }
}

fn open_tab(browser: &Browser, config: &BrowserConfig) -> Result<Arc<Tab>, BrowserError> {
    let tab = browser
        .new_tab()
        .map_err(|e| BrowserError::TabCreationError(e.to_string()))?;

    if let Some(ua) = &config.user_agent {
        tab.set_user_agent(ua, Some("en-US,en;q=0.9"), None)
            .map_err(|e| BrowserError::ConfigurationError(e.to_string()))?;
    }
    tab.set_default_timeout(config.navigation_timeout());

    Ok(tab)
}

#[async_trait]
impl TargetFactory for BrowserManager {
    async fn open(&self) -> Result<Arc<dyn CaptureTarget>, TargetError> {
        let browser = self.browser.clone();
        let config = self.config.clone();
        // Tab creation talks to Chrome synchronously
        let tab = tokio::task::spawn_blocking(move || open_tab(&browser, &config))
            .await
            .map_err(|e| TargetError::Browser(format!("Tab task failed: {}", e)))??;

        Ok(Arc::new(BrowserPage::new(
            tab,
            self.config.timeout(),
            self.config.navigation_timeout(),
        )))
    }
}

/// Errors that can occur during browser operations
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    #[error("Browser configuration error: {0}")]
    ConfigurationError(String),

    #[error("Tab creation failed: {0}")]
    TabCreationError(String),
}

impl From<BrowserError> for TargetError {
    fn from(e: BrowserError) -> Self {
        TargetError::Browser(e.to_string())
    }
}
