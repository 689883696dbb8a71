//! The page under control
//!
//! Everything the engine does to a chapter page goes through [`CaptureTarget`]:
//! load it, scroll it, read it back and optionally copy rendered images or
//! listen to its network traffic. [`crate::browser::BrowserPage`] drives a
//! real Chrome tab; [`StaticPage`] only fetches HTML and is used when the
//! browser is disabled.

use crate::error::{CaptureError, TargetError};
use crate::http_client::EnhancedHttpClient;
use crate::locator::ScrollPlan;
use crate::models::{CapturedImage, PageSnapshot};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[async_trait]
pub trait CaptureTarget: Send + Sync {
    /// Navigate to `url` and wait until the document is loaded
    async fn load(&self, url: &str) -> Result<(), TargetError>;

    /// Scroll the page so lazy images materialize, then return to the top
    async fn scroll_through(&self, plan: &ScrollPlan) -> Result<(), TargetError>;

    async fn snapshot(&self) -> Result<PageSnapshot, TargetError>;

    fn can_copy_rendered(&self) -> bool {
        false
    }

    /// Read back the pixels of an already rendered image
    async fn copy_rendered(&self, url: &str) -> Result<CapturedImage, CaptureError> {
        Err(CaptureError::Unsupported(format!(
            "rendered copy of {} is not available on this target",
            url
        )))
    }

    fn can_intercept(&self) -> bool {
        false
    }

    /// Start recording image responses. `None` means the target cannot listen.
    async fn start_interception(
        &self,
        _filter: &InterceptFilter,
    ) -> Result<Option<InterceptionLog>, TargetError> {
        Ok(None)
    }

    async fn stop_interception(&self) {}

    /// `Cookie` header value for the loaded page, if the target tracks cookies itself
    async fn cookie_header(&self) -> Option<String> {
        None
    }
}

/// Opens a fresh page for each chapter
#[async_trait]
pub trait TargetFactory: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn CaptureTarget>, TargetError>;
}

fn default_min_bytes() -> usize { 10_000 }
fn default_skip_patterns() -> Vec<String> {
    vec!["logo".to_string(), "icon".to_string(), "avatar".to_string()]
}

/// Which network responses are kept while intercepting
#[derive(Debug, Deserialize, Clone)]
pub struct InterceptFilter {
    /// Bodies at or below this size are thumbnails or spacers
    #[serde(default = "default_min_bytes")]
    pub min_bytes: usize,

    #[serde(default = "default_skip_patterns")]
    pub skip_patterns: Vec<String>,
}

impl Default for InterceptFilter {
    fn default() -> Self {
        Self {
            min_bytes: default_min_bytes(),
            skip_patterns: default_skip_patterns(),
        }
    }
}

impl InterceptFilter {
    /// Cheap check done before the body is requested
    pub fn wants(&self, url: &str, content_type: &str) -> bool {
        if !content_type.to_ascii_lowercase().starts_with("image/") {
            return false;
        }
        let lower = url.to_lowercase();
        !self.skip_patterns.iter().any(|p| lower.contains(p.as_str()))
    }

    pub fn accepts(&self, url: &str, content_type: &str, body_len: usize) -> bool {
        body_len > self.min_bytes && self.wants(url, content_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedResponse {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Responses recorded during interception, in arrival order.
///
/// Shared between the network event thread and the engine.
#[derive(Debug, Clone, Default)]
pub struct InterceptionLog {
    responses: Arc<Mutex<Vec<InterceptedResponse>>>,
}

impl InterceptionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: InterceptedResponse) {
        let mut guard = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        // Reloads and retries deliver the same image again
        if guard.iter().any(|r| r.url == response.url) {
            return;
        }
        guard.push(response);
    }

    pub fn len(&self) -> usize {
        self.responses.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn responses(&self) -> Vec<InterceptedResponse> {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Plain HTTP page: what the server sends is what the locator sees.
///
/// Cookies live in the shared client's cookie store, so image fetches made
/// through the same client are already credentialed.
pub struct StaticPage {
    client: Arc<EnhancedHttpClient>,
    navigation_timeout: Duration,
    current: Mutex<Option<PageSnapshot>>,
}

impl StaticPage {
    pub fn new(client: Arc<EnhancedHttpClient>, navigation_timeout: Duration) -> Self {
        Self {
            client,
            navigation_timeout,
            current: Mutex::new(None),
        }
    }
}

/// Hands out [`StaticPage`]s sharing one HTTP client
pub struct StaticTargets {
    client: Arc<EnhancedHttpClient>,
    navigation_timeout: Duration,
}

impl StaticTargets {
    pub fn new(client: Arc<EnhancedHttpClient>, navigation_timeout: Duration) -> Self {
        Self {
            client,
            navigation_timeout,
        }
    }
}

#[async_trait]
impl TargetFactory for StaticTargets {
    async fn open(&self) -> Result<Arc<dyn CaptureTarget>, TargetError> {
        Ok(Arc::new(StaticPage::new(
            self.client.clone(),
            self.navigation_timeout,
        )))
    }
}

/// Text of the document's `<title>`, whitespace collapsed
pub fn document_title(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("title") else {
        return String::new();
    };
    document
        .select(&selector)
        .next()
        .map(|t| t.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

#[async_trait]
impl CaptureTarget for StaticPage {
    async fn load(&self, url: &str) -> Result<(), TargetError> {
        log::debug!("Fetching static page {}", url);
        let html = tokio::time::timeout(self.navigation_timeout, self.client.get_text(url))
            .await
            .map_err(|_| {
                TargetError::Timeout(format!(
                    "{} after {}s",
                    url,
                    self.navigation_timeout.as_secs()
                ))
            })?
            .map_err(|e| TargetError::Navigation(format!("Failed to load {}: {}", url, e)))?;

        let snapshot = PageSnapshot {
            url: url.to_string(),
            title: document_title(&html),
            html,
            image_sizes: Default::default(),
        };
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
        Ok(())
    }

    async fn scroll_through(&self, _plan: &ScrollPlan) -> Result<(), TargetError> {
        // Nothing is lazy without a script engine
        Ok(())
    }

    async fn snapshot(&self) -> Result<PageSnapshot, TargetError> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(TargetError::NotLoaded)
    }
}
