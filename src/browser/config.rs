use std::time::Duration;

/// Configuration for browser instances
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,

    /// Browser window size
    pub window_size: (u32, u32),

    /// Custom user agent
    pub user_agent: Option<String>,

    /// Timeout for a single in-page command in seconds
    pub timeout_seconds: u64,

    /// Page load timeout in seconds
    pub navigation_timeout_seconds: u64,

    /// Additional Chrome flags
    pub chrome_flags: Vec<String>,
}

/// Flags that hide automation and let cross-origin chapter images render
fn stealth_flags() -> Vec<String> {
    vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--no-sandbox".to_string(),
        "--disable-web-security".to_string(),
        "--disable-features=IsolateOrigins,site-per-process".to_string(),
    ]
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_size: (1920, 1080),
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36"
                    .to_string(),
            ),
            timeout_seconds: 30,
            navigation_timeout_seconds: 60,
            chrome_flags: stealth_flags(),
        }
    }
}

impl BrowserConfig {
    /// Visible browser, useful to watch a capture
    pub fn debug_mode() -> Self {
        Self {
            headless: false,
            ..Self::default()
        }
    }

    /// Get command timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrowserConfig::default();
        assert!(config.headless);
        assert_eq!(config.window_size, (1920, 1080));
        assert!(config.user_agent.is_some());
        assert_eq!(config.navigation_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_default_flags_are_stealthy() {
        let config = BrowserConfig::default();
        assert!(config
            .chrome_flags
            .iter()
            .any(|f| f.contains("AutomationControlled")));
        assert!(config.chrome_flags.iter().any(|f| f == "--disable-web-security"));
    }

    #[test]
    fn test_debug_mode() {
        let config = BrowserConfig::debug_mode();
        assert!(!config.headless);
        assert_eq!(config.chrome_flags, BrowserConfig::default().chrome_flags);
    }
}
