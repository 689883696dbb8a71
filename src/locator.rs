//! Content discovery on a chapter page
//!
//! [`locate`] picks the page images of a chapter out of a [`PageSnapshot`].
//! Reader layouts differ per site, so a ranked list of reader-container
//! selectors is tried and the one yielding the most images wins. When none of
//! them finds enough, every sufficiently large image on the page is taken
//! instead. Navigation and ad images are then filtered out by URL.
//!
//! The snapshot must be taken after the page was scrolled through with a
//! [`ScrollPlan`], otherwise lazy-loaded pages are missing.

use crate::models::{ImageCandidate, PageSnapshot};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// Reader containers observed across manga sites, best guesses first
pub const READER_SELECTORS: &[&str] = &[
    "div.container-chapter-reader img",
    ".reading-content img",
    ".chapter-content img",
    ".page-break img",
    ".wp-manga-chapter-img",
    "#content img",
    ".reader-area img",
    "#readerarea img",
    ".read-content img",
    "img.wp-manga-chapter-img",
    "img[loading='lazy']",
];

/// URL fragments that mark navigation, branding or ad images
pub const URL_DENYLIST: &[&str] = &[
    "logo",
    "icon",
    "avatar",
    "button",
    "banner",
    "/ad",
    "advertisement",
    "loading",
    "placeholder",
];

/// Attributes that may carry the real image URL, lazy loaders included
const URL_ATTRIBUTES: &[&str] = &["src", "data-src", "data-lazy-src", "data-original", "data-cfsrc"];

fn default_min_candidates() -> usize { 3 }
fn default_min_size() -> u32 { 100 }
fn default_selectors() -> Vec<String> {
    READER_SELECTORS.iter().map(|s| s.to_string()).collect()
}
fn default_step_px() -> u32 { 500 }
fn default_interval_ms() -> u64 { 100 }
fn default_settle_ms() -> u64 { 2000 }

/// Thresholds for picking chapter images
#[derive(Debug, Deserialize, Clone)]
pub struct LocatorSettings {
    /// Below this many selector matches the size fallback is used
    #[serde(default = "default_min_candidates")]
    pub min_candidates: usize,

    /// Minimum natural width for the size fallback (exclusive)
    #[serde(default = "default_min_size")]
    pub min_width: u32,

    /// Minimum natural height for the size fallback (exclusive)
    #[serde(default = "default_min_size")]
    pub min_height: u32,

    /// Ranked reader selectors
    #[serde(default = "default_selectors")]
    pub selectors: Vec<String>,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            min_candidates: default_min_candidates(),
            min_width: default_min_size(),
            min_height: default_min_size(),
            selectors: default_selectors(),
        }
    }
}

/// Incremental scroll used to make lazy-loaded images materialize.
///
/// The target scrolls down by `step_px` every `interval_ms` until it reaches the
/// bottom, jumps back to the top and waits `settle_ms` for late images.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ScrollPlan {
    #[serde(default = "default_step_px")]
    pub step_px: u32,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for ScrollPlan {
    fn default() -> Self {
        Self {
            step_px: default_step_px(),
            interval_ms: default_interval_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl ScrollPlan {
    /// Script that performs the scroll in the page and resolves when settled
    pub fn script(&self) -> String {
        format!(
            r#"
            new Promise((resolve) => {{
                let steps = 0;
                const timer = setInterval(() => {{
                    window.scrollBy(0, {step});
                    steps++;
                    const atBottom = (window.innerHeight + window.scrollY) >= document.body.scrollHeight - 10;
                    if (atBottom || steps > 2000) {{
                        clearInterval(timer);
                        window.scrollTo(0, 0);
                        setTimeout(() => resolve(steps), {settle});
                    }}
                }}, {interval});
            }})
            "#,
            step = self.step_px,
            interval = self.interval_ms,
            settle = self.settle_ms,
        )
    }
}

/// Whether a URL looks like site chrome rather than a chapter page
pub fn is_denylisted(url: &str) -> bool {
    let lower = url.to_lowercase();
    URL_DENYLIST.iter().any(|needle| lower.contains(needle))
}

/// Resolve an attribute value against the page URL
pub fn resolve_url(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    match base {
        Some(b) => b.join(raw).ok().map(|u| u.to_string()),
        None => Url::parse(raw).ok().map(|u| u.to_string()),
    }
}

fn parse_dimension(value: Option<&str>) -> Option<u32> {
    let value = value?.trim().trim_end_matches("px");
    value.parse::<f64>().ok().map(|v| v as u32)
}

fn candidate_from(
    element: ElementRef<'_>,
    base: Option<&Url>,
    sizes: &HashMap<String, (u32, u32)>,
    selector: Option<&str>,
) -> Option<ImageCandidate> {
    let el = element.value();
    if el.name() != "img" {
        return None;
    }
    let url = URL_ATTRIBUTES
        .iter()
        .filter_map(|attr| el.attr(attr))
        .find_map(|raw| resolve_url(base, raw))?;

    let (width, height) = match sizes.get(&url) {
        Some(&(w, h)) => (Some(w), Some(h)),
        None => (parse_dimension(el.attr("width")), parse_dimension(el.attr("height"))),
    };

    Some(ImageCandidate {
        url,
        selector: selector.map(|s| s.to_string()),
        width,
        height,
    })
}

/// Apply the ranked selectors and keep the largest result. Earlier selectors win ties.
fn best_selector_match(
    document: &Html,
    base: Option<&Url>,
    sizes: &HashMap<String, (u32, u32)>,
    settings: &LocatorSettings,
) -> Vec<ImageCandidate> {
    let mut best: Vec<ImageCandidate> = Vec::new();

    for selector_str in &settings.selectors {
        let selector = match Selector::parse(selector_str) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Skipping invalid selector {:?}: {:?}", selector_str, e);
                continue;
            }
        };
        let found: Vec<ImageCandidate> = document
            .select(&selector)
            .filter_map(|el| candidate_from(el, base, sizes, Some(selector_str.as_str())))
            .collect();

        log::debug!("Selector {:?}: {} images", selector_str, found.len());
        if found.len() > best.len() {
            best = found;
        }
    }

    best
}

fn large_images(
    document: &Html,
    base: Option<&Url>,
    sizes: &HashMap<String, (u32, u32)>,
    settings: &LocatorSettings,
) -> Vec<ImageCandidate> {
    let Ok(img) = Selector::parse("img") else {
        return Vec::new();
    };
    document
        .select(&img)
        .filter_map(|el| candidate_from(el, base, sizes, None))
        .filter(|c| {
            matches!((c.width, c.height), (Some(w), Some(h)) if w > settings.min_width && h > settings.min_height)
        })
        .collect()
}

/// Locate the chapter images of a page, in document order.
pub fn locate(snapshot: &PageSnapshot, settings: &LocatorSettings) -> Vec<ImageCandidate> {
    let document = Html::parse_document(&snapshot.html);
    let base = Url::parse(&snapshot.url).ok();
    let sizes = &snapshot.image_sizes;

    let mut candidates = best_selector_match(&document, base.as_ref(), sizes, settings);

    if candidates.len() < settings.min_candidates {
        let fallback = large_images(&document, base.as_ref(), sizes, settings);
        log::debug!(
            "Selectors found {} images, size fallback found {}",
            candidates.len(),
            fallback.len()
        );
        if fallback.len() > candidates.len() {
            candidates = fallback;
        }
    }

    let mut seen = HashSet::new();
    let located: Vec<ImageCandidate> = candidates
        .into_iter()
        .filter(|c| {
            if is_denylisted(&c.url) {
                log::debug!("Ignored navigation/ad image: {}", c.url);
                return false;
            }
            true
        })
        .filter(|c| seen.insert(c.url.clone()))
        .collect();

    log::info!("Located {} chapter images on {}", located.len(), snapshot.url);
    located
}
