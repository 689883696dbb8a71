use crate::batch::BatchSettings;
use crate::capture::ProfileSettings;
use crate::discovery::DiscoverySettings;
use crate::locator::{LocatorSettings, ScrollPlan};
use crate::scheduler::SchedulerSettings;
use crate::target::InterceptFilter;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Root of the chapter library (`{library}/{series}/{chapter}/001.jpg`)
    #[serde(default = "default_library_dir")]
    pub library_dir: String,
    #[serde(default)]
    pub capture: SchedulerSettings,
    #[serde(default)]
    pub scroll: ScrollPlan,
    #[serde(default)]
    pub locator: LocatorSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub interception: InterceptFilter,
    #[serde(default)]
    pub profiles: ProfileSettings,
    #[serde(default)]
    pub bot_detection: BotDetectionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotDetectionConfig {
    /// Drive pages with headless Chrome instead of plain HTTP
    #[serde(default = "default_true")]
    pub enable_browser: bool,

    /// Maximum number of retry attempts for failed page requests
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    /// Timeout for HTTP requests in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Enable cookie support
    #[serde(default = "default_true")]
    pub enable_cookies: bool,

    /// Enable gzip/brotli compression
    #[serde(default = "default_true")]
    pub enable_compression: bool,

    /// Timeout for a single in-page command (scroll, snapshot, copy) in seconds
    #[serde(default = "default_timeout")]
    pub browser_timeout_secs: u64,

    /// Browser headless mode
    #[serde(default = "default_true")]
    pub browser_headless: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// First port tried; the next ones up to `port_end` are used if taken
    #[serde(default = "default_port_start")]
    pub port_start: u16,
    #[serde(default = "default_port_end")]
    pub port_end: u16,
}

fn default_true() -> bool { true }
fn default_max_retries() -> usize { 4 }
fn default_initial_retry_delay() -> u64 { 500 }
fn default_max_retry_delay() -> u64 { 8000 }
fn default_timeout() -> u64 { 30 }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port_start() -> u16 { 8080 }
fn default_port_end() -> u16 { 8090 }

fn default_library_dir() -> String {
    let base = dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("MangaGrabber")
        .join("library")
        .to_string_lossy()
        .to_string()
}

impl Default for BotDetectionConfig {
    fn default() -> Self {
        Self {
            enable_browser: true,
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            timeout_secs: default_timeout(),
            enable_cookies: true,
            enable_compression: true,
            browser_timeout_secs: default_timeout(),
            browser_headless: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port_start: default_port_start(),
            port_end: default_port_end(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_dir: default_library_dir(),
            capture: SchedulerSettings::default(),
            scroll: ScrollPlan::default(),
            locator: LocatorSettings::default(),
            discovery: DiscoverySettings::default(),
            batch: BatchSettings::default(),
            interception: InterceptFilter::default(),
            profiles: ProfileSettings::default(),
            bot_detection: BotDetectionConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to defaults
    pub fn load() -> Self {
        let path = Path::new(CONFIG_FILE);
        if !path.exists() {
            log::info!("No {} found, using default configuration", CONFIG_FILE);
            return Self::default();
        }
        match Self::load_from(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::warn!("Ignoring invalid {}: {}", CONFIG_FILE, e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str::<Config>(&content)?)
    }

    pub fn library_path(&self) -> PathBuf {
        PathBuf::from(&self.library_dir)
    }
}

impl BotDetectionConfig {
    /// Create an enhanced HTTP client from this configuration
    pub fn create_http_client(
        &self,
    ) -> Result<crate::http_client::EnhancedHttpClient, reqwest::Error> {
        use crate::http_client::{EnhancedHttpClient, HttpClientConfig};
        use std::time::Duration;

        let config = HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            initial_retry_delay_ms: self.initial_retry_delay_ms,
            max_retry_delay_ms: self.max_retry_delay_ms,
            enable_cookies: self.enable_cookies,
            enable_gzip: self.enable_compression,
        };

        EnhancedHttpClient::with_config(config)
    }

    /// Launch a browser manager from this configuration
    pub fn create_browser_manager(
        &self,
    ) -> Result<crate::browser::BrowserManager, crate::browser::BrowserError> {
        use crate::browser::{BrowserConfig, BrowserError, BrowserManager};

        if !self.enable_browser {
            return Err(BrowserError::ConfigurationError(
                "Browser is disabled in configuration".to_string(),
            ));
        }

        let config = BrowserConfig {
            headless: self.browser_headless,
            timeout_seconds: self.browser_timeout_secs,
            ..BrowserConfig::default()
        };

        BrowserManager::new(config)
    }
}
