//! Capture strategies
//!
//! A [`CaptureStrategy`] turns one [`ImageRef`] into bytes. Three exist:
//!
//! - [`DirectCopy`] reads the already rendered image back from the page. No
//!   extra network traffic, but cross-origin images are tainted.
//! - [`InterceptionCapture`] serves bytes recorded off the wire while the page
//!   loaded.
//! - [`AuthenticatedFetch`] requests the image again with the page's cookies
//!   and referer.
//!
//! [`Fallback`] chains two of them. Which chain a chapter gets is decided by
//! its [`SiteProfile`].

use crate::error::CaptureError;
use crate::http_client::EnhancedHttpClient;
use crate::metrics::MetricsTracker;
use crate::models::{CapturedImage, ImageRef};
use crate::target::{CaptureTarget, InterceptedResponse};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const DIRECT_COPY: &str = "direct-copy";
pub const FETCH: &str = "fetch";
pub const INTERCEPTION: &str = "interception";

#[async_trait]
pub trait CaptureStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn capture(&self, image: &ImageRef) -> Result<CapturedImage, CaptureError>;
}

/// Copy the rendered pixels out of the page
pub struct DirectCopy {
    target: Arc<dyn CaptureTarget>,
}

impl DirectCopy {
    pub fn new(target: Arc<dyn CaptureTarget>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl CaptureStrategy for DirectCopy {
    fn name(&self) -> &str {
        DIRECT_COPY
    }

    async fn capture(&self, image: &ImageRef) -> Result<CapturedImage, CaptureError> {
        if !self.target.can_copy_rendered() {
            return Err(CaptureError::Unsupported(DIRECT_COPY.to_string()));
        }
        self.target.copy_rendered(&image.url).await
    }
}

/// Re-request the image as the page would
pub struct AuthenticatedFetch {
    client: Arc<EnhancedHttpClient>,
    referer: Option<String>,
    cookie_header: Option<String>,
}

/// `https://host/` for a page URL
pub fn page_origin(page_url: &str) -> Option<String> {
    let url = Url::parse(page_url).ok()?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(format!("{}/", origin.ascii_serialization()))
}

impl AuthenticatedFetch {
    pub fn new(
        client: Arc<EnhancedHttpClient>,
        page_url: &str,
        cookie_header: Option<String>,
    ) -> Self {
        Self {
            client,
            referer: page_origin(page_url),
            cookie_header,
        }
    }
}

#[async_trait]
impl CaptureStrategy for AuthenticatedFetch {
    fn name(&self) -> &str {
        FETCH
    }

    async fn capture(&self, image: &ImageRef) -> Result<CapturedImage, CaptureError> {
        self.client
            .fetch_image(
                &image.url,
                self.referer.as_deref(),
                self.cookie_header.as_deref(),
            )
            .await
    }
}

fn without_query(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

fn last_segment(url: &str) -> Option<String> {
    let stripped = without_query(url);
    stripped
        .rsplit('/')
        .find(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
}

/// Map located URLs to intercepted responses.
///
/// Returns `url index -> response index`. Matching runs in three passes of
/// decreasing strictness: exact URL, URL without query and fragment, final
/// path segment. A response is used at most once.
pub fn match_intercepted(urls: &[String], responses: &[InterceptedResponse]) -> HashMap<usize, usize> {
    let mut matched: HashMap<usize, usize> = HashMap::new();
    let mut used: HashSet<usize> = HashSet::new();

    let passes: [fn(&str) -> Option<String>; 3] = [
        |u| Some(u.to_string()),
        |u| Some(without_query(u)),
        last_segment,
    ];

    for key in passes {
        for (i, url) in urls.iter().enumerate() {
            if matched.contains_key(&i) {
                continue;
            }
            let Some(wanted) = key(url) else { continue };
            let hit = responses.iter().enumerate().find(|(j, r)| {
                !used.contains(j) && key(&r.url).as_deref() == Some(wanted.as_str())
            });
            if let Some((j, _)) = hit {
                matched.insert(i, j);
                used.insert(j);
            }
        }
    }

    matched
}

/// Serve images recorded during page load
pub struct InterceptionCapture {
    by_url: HashMap<String, CapturedImage>,
}

impl InterceptionCapture {
    pub fn new(items: &[ImageRef], responses: &[InterceptedResponse]) -> Self {
        let urls: Vec<String> = items.iter().map(|i| i.url.clone()).collect();
        let by_url = match_intercepted(&urls, responses)
            .into_iter()
            .map(|(i, j)| {
                let r = &responses[j];
                (
                    urls[i].clone(),
                    CapturedImage::new(r.bytes.clone(), r.content_type.clone()),
                )
            })
            .collect();
        Self { by_url }
    }

    pub fn matched_count(&self) -> usize {
        self.by_url.len()
    }
}

#[async_trait]
impl CaptureStrategy for InterceptionCapture {
    fn name(&self) -> &str {
        INTERCEPTION
    }

    async fn capture(&self, image: &ImageRef) -> Result<CapturedImage, CaptureError> {
        self.by_url
            .get(&image.url)
            .cloned()
            .ok_or_else(|| CaptureError::NotIntercepted(image.url.clone()))
    }
}

/// Try `primary`, hand fallback-worthy failures to `secondary`
pub struct Fallback {
    name: String,
    primary: Box<dyn CaptureStrategy>,
    secondary: Box<dyn CaptureStrategy>,
    metrics: Option<MetricsTracker>,
}

impl Fallback {
    pub fn new(primary: Box<dyn CaptureStrategy>, secondary: Box<dyn CaptureStrategy>) -> Self {
        Self {
            name: format!("{}>{}", primary.name(), secondary.name()),
            primary,
            secondary,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsTracker) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl CaptureStrategy for Fallback {
    fn name(&self) -> &str {
        &self.name
    }

    async fn capture(&self, image: &ImageRef) -> Result<CapturedImage, CaptureError> {
        match self.primary.capture(image).await {
            Ok(captured) => Ok(captured),
            Err(e) if e.triggers_fallback() => {
                log::debug!(
                    "{} failed for image {} ({}), trying {}",
                    self.primary.name(),
                    image.index,
                    e,
                    self.secondary.name()
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_fallback(self.primary.name());
                }
                self.secondary.capture(image).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Per-site capture strategy choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteProfile {
    /// Direct copy, then fetch
    Standard,
    /// Fetch only
    FetchOnly,
    /// Interception, then fetch
    Intercepted,
}

fn default_true() -> bool { true }

#[derive(Debug, Deserialize, Clone)]
pub struct ProfileSettings {
    /// Sites whose images are always re-fetched
    #[serde(default)]
    pub fetch_only_domains: Vec<String>,

    /// Sites whose images are taken from network traffic
    #[serde(default)]
    pub intercept_domains: Vec<String>,

    /// Batch runs intercept by default; single captures start with direct copy
    #[serde(default = "default_true")]
    pub intercept_in_batch: bool,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            fetch_only_domains: Vec::new(),
            intercept_domains: Vec::new(),
            intercept_in_batch: true,
        }
    }
}

fn host_matches(host: &str, domains: &[String]) -> bool {
    domains.iter().any(|d| {
        let d = d.trim().trim_start_matches("www.").to_lowercase();
        !d.is_empty() && (host == d || host.ends_with(&format!(".{}", d)))
    })
}

/// Choose the capture chain for a chapter URL.
///
/// Configured domains win, then batch mode. Targets lacking a capability are
/// moved down to the next profile they can serve.
pub fn profile_for(
    url: &str,
    settings: &ProfileSettings,
    batch_mode: bool,
    target: &dyn CaptureTarget,
) -> SiteProfile {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default();

    let wanted = if host_matches(&host, &settings.fetch_only_domains) {
        SiteProfile::FetchOnly
    } else if host_matches(&host, &settings.intercept_domains)
        || (batch_mode && settings.intercept_in_batch)
    {
        SiteProfile::Intercepted
    } else {
        SiteProfile::Standard
    };

    match wanted {
        SiteProfile::Intercepted if target.can_intercept() => SiteProfile::Intercepted,
        SiteProfile::Intercepted | SiteProfile::Standard if target.can_copy_rendered() => {
            SiteProfile::Standard
        }
        _ => SiteProfile::FetchOnly,
    }
}

/// Assemble the strategy chain for a profile
pub fn build_strategy(
    profile: SiteProfile,
    target: Arc<dyn CaptureTarget>,
    fetch: AuthenticatedFetch,
    interception: Option<InterceptionCapture>,
    metrics: &MetricsTracker,
) -> Box<dyn CaptureStrategy> {
    match (profile, interception) {
        (SiteProfile::Intercepted, Some(intercepted)) => Box::new(
            Fallback::new(Box::new(intercepted), Box::new(fetch)).with_metrics(metrics.clone()),
        ),
        (SiteProfile::Standard, _) => Box::new(
            Fallback::new(Box::new(DirectCopy::new(target)), Box::new(fetch))
                .with_metrics(metrics.clone()),
        ),
        _ => Box::new(fetch),
    }
}
