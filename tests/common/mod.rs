//! In-memory reader site used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chapter_grabber::error::{CaptureError, TargetError};
use chapter_grabber::locator::ScrollPlan;
use chapter_grabber::models::{CapturedImage, PageSnapshot};
use chapter_grabber::target::{
    CaptureTarget, InterceptFilter, InterceptedResponse, InterceptionLog, TargetFactory,
};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SITE: &str = "https://read.example.com";

pub fn chapter_url(n: usize) -> String {
    format!("{}/solo-leveling/chapter-{}", SITE, n)
}

pub fn image_url(chapter: usize, page: usize) -> String {
    format!("https://cdn.example.com/sl/{}/{:02}.png", chapter, page)
}

/// Body bytes that identify the page they came from
pub fn image_bytes(url: &str) -> Vec<u8> {
    format!("PNG:{}", url).into_bytes()
}

/// A reader page with its images inside the usual reader container
pub fn reader_html(title: &str, images: &[String], extra: &str) -> String {
    let imgs: String = images
        .iter()
        .map(|u| format!(r#"<div class="page-break"><img src="{}"></div>"#, u))
        .collect();
    format!(
        r#"<html><head><title>{}</title></head><body>
<img src="{}/static/site-logo.png">
<div class="reading-content">{}</div>
{}
</body></html>"#,
        title, SITE, imgs, extra
    )
}

pub fn next_link(url: &str) -> String {
    format!(r#"<div class="nav-links"><a class="next" href="{}">Next</a></div>"#, url)
}

#[derive(Default)]
pub struct FakeSite {
    pages: HashMap<String, PageSnapshot>,
    images: HashMap<String, Vec<u8>>,
    /// Remaining transient failures per image URL
    flaky: Mutex<HashMap<String, usize>>,
    broken: HashSet<String>,
    unreachable: HashSet<String>,
    max_latency_ms: u64,
    copies: Mutex<Vec<String>>,
    /// Images each page pulls over the network while loading
    traffic: HashMap<String, Vec<String>>,
    intercepting: bool,
    interception_fails: bool,
    /// Images that never show up in recorded traffic
    off_the_wire: HashSet<String>,
    /// Recorded image URLs in the order they arrived
    arrivals: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, title: &str, html: String) -> Self {
        self.pages.insert(
            url.to_string(),
            PageSnapshot {
                url: url.to_string(),
                title: title.to_string(),
                html,
                image_sizes: Default::default(),
            },
        );
        self
    }

    /// A chapter page whose images are all served
    pub fn with_chapter(mut self, url: &str, title: &str, images: &[String], extra: &str) -> Self {
        for img in images {
            self.images.insert(img.clone(), image_bytes(img));
        }
        self.traffic.insert(url.to_string(), images.to_vec());
        let html = reader_html(title, images, extra);
        self.with_page(url, title, html)
    }

    /// A chapter whose images only appear in network traffic, not in the markup
    pub fn with_scripted_chapter(mut self, url: &str, title: &str, images: &[String]) -> Self {
        for img in images {
            self.images.insert(img.clone(), image_bytes(img));
        }
        self.traffic.insert(url.to_string(), images.to_vec());
        let html = reader_html(title, &[], "<script src=\"/reader.js\"></script>");
        self.with_page(url, title, html)
    }

    /// Tabs record image responses, delivered out of page order
    pub fn intercepting(mut self) -> Self {
        self.intercepting = true;
        self
    }

    /// Tabs claim they can intercept but fail to start
    pub fn interception_fails(mut self) -> Self {
        self.intercepting = true;
        self.interception_fails = true;
        self
    }

    pub fn off_the_wire(mut self, url: &str) -> Self {
        self.off_the_wire.insert(url.to_string());
        self
    }

    pub fn arrivals(&self) -> Vec<String> {
        self.arrivals.lock().unwrap().clone()
    }

    pub fn flaky(self, url: &str, failures: usize) -> Self {
        self.flaky
            .lock()
            .unwrap()
            .insert(url.to_string(), failures);
        self
    }

    pub fn broken(mut self, url: &str) -> Self {
        self.broken.insert(url.to_string());
        self
    }

    pub fn unreachable(mut self, url: &str) -> Self {
        self.unreachable.insert(url.to_string());
        self
    }

    pub fn latency(mut self, max_ms: u64) -> Self {
        self.max_latency_ms = max_ms;
        self
    }

    pub fn into_arc(self) -> Arc<FakeSite> {
        Arc::new(self)
    }

    pub fn copies_of(&self, url: &str) -> usize {
        self.copies
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

/// One browser tab on the fake site
pub struct FakeTab {
    site: Arc<FakeSite>,
    current: Mutex<Option<String>>,
    recording: Mutex<Option<(InterceptionLog, InterceptFilter)>>,
}

impl FakeTab {
    pub fn new(site: Arc<FakeSite>) -> Self {
        Self {
            site,
            current: Mutex::new(None),
            recording: Mutex::new(None),
        }
    }

    /// Deliver the page's images to the recorder, never in page order
    fn replay_traffic(&self, url: &str) {
        let recording = self.recording.lock().unwrap();
        let Some((log, filter)) = recording.as_ref() else {
            return;
        };
        let mut wire: Vec<String> = self
            .site
            .traffic
            .get(url)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|u| !self.site.off_the_wire.contains(u))
            .collect();
        let page_order = wire.clone();
        wire.shuffle(&mut rand::thread_rng());
        if wire.len() > 1 && wire == page_order {
            wire.reverse();
        }
        for img in wire {
            let bytes = image_bytes(&img);
            if !filter.accepts(&img, "image/png", bytes.len()) {
                continue;
            }
            self.site.arrivals.lock().unwrap().push(img.clone());
            log.push(InterceptedResponse {
                url: img,
                content_type: Some("image/png".to_string()),
                bytes,
            });
        }
    }
}

#[async_trait]
impl CaptureTarget for FakeTab {
    async fn load(&self, url: &str) -> Result<(), TargetError> {
        if self.site.unreachable.contains(url) || !self.site.pages.contains_key(url) {
            return Err(TargetError::Navigation(format!("net::ERR_FAILED {}", url)));
        }
        *self.current.lock().unwrap() = Some(url.to_string());
        self.replay_traffic(url);
        Ok(())
    }

    async fn scroll_through(&self, _plan: &ScrollPlan) -> Result<(), TargetError> {
        Ok(())
    }

    async fn snapshot(&self) -> Result<PageSnapshot, TargetError> {
        let current = self.current.lock().unwrap().clone();
        current
            .and_then(|url| self.site.pages.get(&url).cloned())
            .ok_or(TargetError::NotLoaded)
    }

    fn can_copy_rendered(&self) -> bool {
        true
    }

    fn can_intercept(&self) -> bool {
        self.site.intercepting
    }

    async fn start_interception(
        &self,
        filter: &InterceptFilter,
    ) -> Result<Option<InterceptionLog>, TargetError> {
        if !self.site.intercepting {
            return Ok(None);
        }
        if self.site.interception_fails {
            return Err(TargetError::Browser("Network.enable rejected".to_string()));
        }
        let log = InterceptionLog::new();
        *self.recording.lock().unwrap() = Some((log.clone(), filter.clone()));
        Ok(Some(log))
    }

    async fn stop_interception(&self) {
        *self.recording.lock().unwrap() = None;
    }

    async fn copy_rendered(&self, url: &str) -> Result<CapturedImage, CaptureError> {
        if self.site.max_latency_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=self.site.max_latency_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.site.copies.lock().unwrap().push(url.to_string());

        if self.site.broken.contains(url) {
            return Err(CaptureError::Status(404));
        }
        {
            let mut flaky = self.site.flaky.lock().unwrap();
            if let Some(left) = flaky.get_mut(url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(CaptureError::Transient("connection reset".to_string()));
                }
            }
        }
        match self.site.images.get(url) {
            Some(bytes) => Ok(CapturedImage::new(bytes.clone(), Some("image/png".to_string()))),
            None => Err(CaptureError::Status(404)),
        }
    }
}

pub struct FakeTabs {
    pub site: Arc<FakeSite>,
}

#[async_trait]
impl TargetFactory for FakeTabs {
    async fn open(&self) -> Result<Arc<dyn CaptureTarget>, TargetError> {
        Ok(Arc::new(FakeTab::new(self.site.clone())))
    }
}

/// Engine writing into `library`, tuned for fast tests
pub fn engine(library: &std::path::Path) -> chapter_grabber::pipeline::CaptureEngine {
    use chapter_grabber::config::Config;
    use chapter_grabber::http_client::EnhancedHttpClient;
    use chapter_grabber::metrics::MetricsTracker;
    use chapter_grabber::pipeline::CaptureEngine;
    use chapter_grabber::session::{ProgressHub, SessionRegistry};

    let mut config = Config::default();
    config.library_dir = library.to_string_lossy().to_string();
    config.capture.window_pause_ms = 0;
    config.capture.retry_delay_ms = 10;
    config.scroll.settle_ms = 0;
    // Test bodies are tiny
    config.interception.min_bytes = 0;

    let http = Arc::new(EnhancedHttpClient::new().unwrap());
    CaptureEngine::new(
        &config,
        http,
        MetricsTracker::new(),
        SessionRegistry::new(),
        ProgressHub::default(),
    )
}
