//! Chapter sequence discovery
//!
//! Builds the list of chapters to capture starting from one chapter page.
//! Reader pages usually carry a chapter `<select>`; when they do, the list is
//! read straight from it. Otherwise the "next chapter" link is followed page
//! by page until it runs out, loops or the limit is hit.

use crate::locator::resolve_url;
use crate::models::PageSnapshot;
use crate::target::CaptureTarget;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

/// "Next chapter" controls, most specific first
pub const NEXT_SELECTORS: &[&str] = &[
    "a[rel='next']",
    "a.next_page",
    "a.next-chapter",
    ".nav-next a",
    ".next-chapter a",
    "a.btn-next",
    "a.next",
    ".nav-links .next",
];

const LIST_ATTRIBUTES: &[&str] = &["value", "data-redirect", "data-url"];

fn default_max_chapters() -> usize { 50 }
fn default_navigation_timeout() -> u64 { 60 }
fn default_next_selectors() -> Vec<String> {
    NEXT_SELECTORS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoverySettings {
    #[serde(default = "default_max_chapters")]
    pub max_chapters: usize,

    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    #[serde(default = "default_next_selectors")]
    pub next_selectors: Vec<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            max_chapters: default_max_chapters(),
            navigation_timeout_secs: default_navigation_timeout(),
            next_selectors: default_next_selectors(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    StructuredList,
    NavigateNext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The chapter limit was reached
    MaxReached,
    /// The structured list has no further entries
    EndOfList,
    /// No next link on the last page
    NoNext,
    /// The next link pointed at an already collected chapter
    Cycle,
    /// A page failed to load; the URLs collected so far are returned
    NavigationFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryOutcome {
    /// Starts with the start URL
    pub urls: Vec<String>,
    pub method: DiscoveryMethod,
    pub stop: StopReason,
}

/// Compare key for chapter URLs: no fragment, no trailing slash
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string().trim_end_matches('/').to_string()
        }
        Err(_) => url
            .trim()
            .split('#')
            .next()
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string(),
    }
}

fn chapter_number_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"(?i)(?:chapter|chap|ch|episode|ep)[\s._/-]*(\d+(?:\.\d+)?)", r"(\d+(?:\.\d+)?)"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Chapter number from option text, falling back to the URL.
///
/// Labelled numbers ("Ch. 14") win over bare ones; for bare numbers in the
/// text the last one is taken, so "Vol. 2 - 14" gives 14.
fn chapter_number(text: &str, url: &str) -> Option<f64> {
    let patterns = chapter_number_patterns();
    let parse = |m: Option<regex::Match<'_>>| m.and_then(|m| m.as_str().parse::<f64>().ok());

    let labelled = patterns.first();
    let bare = patterns.get(1);

    labelled
        .and_then(|re| parse(re.captures(text).and_then(|c| c.get(1))))
        .or_else(|| bare.and_then(|re| parse(re.find_iter(text).last())))
        .or_else(|| labelled.and_then(|re| parse(re.captures(url).and_then(|c| c.get(1)))))
}

struct ListEntry {
    url: String,
    number: Option<f64>,
}

fn select_entries(select: ElementRef<'_>, option: &Selector, base: Option<&Url>) -> Vec<ListEntry> {
    let mut entries: Vec<ListEntry> = Vec::new();
    let mut seen = HashSet::new();
    for opt in select.select(option) {
        let el = opt.value();
        let Some(url) = LIST_ATTRIBUTES
            .iter()
            .filter_map(|attr| el.attr(attr))
            .map(|raw| raw.trim())
            .filter(|raw| {
                // Plain numeric values are chapter ids, not links
                !raw.is_empty()
                    && raw != &"#"
                    && !raw.starts_with("javascript:")
                    && !raw.chars().all(|c| c.is_ascii_digit())
            })
            .find_map(|raw| resolve_url(base, raw))
        else {
            continue;
        };
        if !seen.insert(normalize_url(&url)) {
            continue;
        }
        let text: String = opt.text().collect::<Vec<_>>().join(" ");
        entries.push(ListEntry {
            number: chapter_number(&text, &url),
            url,
        });
    }
    entries
}

/// Whether the list runs from the newest chapter down
fn is_descending(entries: &[ListEntry]) -> bool {
    let known: Vec<f64> = entries.iter().filter_map(|e| e.number).collect();
    match (known.first(), known.last()) {
        (Some(first), Some(last)) if known.len() >= 2 => first > last,
        _ => false,
    }
}

/// Read the chapter list from a `<select>` that contains the current chapter.
///
/// Returns the current entry followed by the later chapters, at most
/// `max_chapters`, plus whether the list ran out before the limit.
pub fn structured_list(
    snapshot: &PageSnapshot,
    start_url: &str,
    max_chapters: usize,
) -> Option<(Vec<String>, bool)> {
    let document = Html::parse_document(&snapshot.html);
    let base = Url::parse(&snapshot.url).ok();
    let select = Selector::parse("select").ok()?;
    let option = Selector::parse("option").ok()?;
    let wanted = [normalize_url(start_url), normalize_url(&snapshot.url)];

    for control in document.select(&select) {
        let entries = select_entries(control, &option, base.as_ref());
        if entries.len() < 2 {
            continue;
        }
        let Some(position) = entries
            .iter()
            .position(|e| wanted.contains(&normalize_url(&e.url)))
        else {
            continue;
        };

        let ordered: Vec<String> = if is_descending(&entries) {
            entries[..=position].iter().rev().map(|e| e.url.clone()).collect()
        } else {
            entries[position..].iter().map(|e| e.url.clone()).collect()
        };
        let exhausted = ordered.len() <= max_chapters;
        let urls: Vec<String> = ordered.into_iter().take(max_chapters).collect();
        log::debug!(
            "Chapter list with {} entries, current at {}, {} selected",
            entries.len(),
            position,
            urls.len()
        );
        return Some((urls, exhausted));
    }
    None
}

fn usable_href(el: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
    let href = el.value().attr("href")?.trim();
    if href.is_empty() || href == "#" || href.starts_with("javascript:") {
        return None;
    }
    resolve_url(base, href)
}

fn looks_like_next(el: ElementRef<'_>) -> bool {
    let text = el.text().collect::<String>().trim().to_lowercase();
    let title = el.value().attr("title").unwrap_or_default().to_lowercase();
    [text, title].iter().any(|label| {
        label.contains("next") && !label.contains("prev")
    })
}

/// Find the link to the following chapter
pub fn find_next_link(snapshot: &PageSnapshot, selectors: &[String]) -> Option<String> {
    let document = Html::parse_document(&snapshot.html);
    let base = Url::parse(&snapshot.url).ok();
    let current = normalize_url(&snapshot.url);

    let not_current = |url: &String| normalize_url(url) != current;

    for selector_str in selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            log::warn!("Skipping invalid next-link selector {:?}", selector_str);
            continue;
        };
        let found = document
            .select(&selector)
            .filter_map(|el| {
                // `.nav-links .next` may match the anchor or its wrapper
                if el.value().name() == "a" {
                    usable_href(el, base.as_ref())
                } else {
                    Selector::parse("a[href]")
                        .ok()
                        .and_then(|a| el.select(&a).next())
                        .and_then(|a| usable_href(a, base.as_ref()))
                }
            })
            .find(not_current);
        if found.is_some() {
            return found;
        }
    }

    let anchors = Selector::parse("a[href]").ok()?;
    document
        .select(&anchors)
        .filter(|el| looks_like_next(*el))
        .filter_map(|el| usable_href(el, base.as_ref()))
        .find(not_current)
}

/// Walks from a start chapter to the chapters that follow it
pub struct ChapterDiscoverer {
    settings: DiscoverySettings,
}

impl ChapterDiscoverer {
    pub fn new(settings: DiscoverySettings) -> Self {
        Self { settings }
    }

    async fn load_snapshot(
        &self,
        target: &dyn CaptureTarget,
        url: &str,
    ) -> Option<PageSnapshot> {
        let limit = Duration::from_secs(self.settings.navigation_timeout_secs);
        let loaded = tokio::time::timeout(limit, async {
            target.load(url).await?;
            target.snapshot().await
        })
        .await;
        match loaded {
            Ok(Ok(snapshot)) => Some(snapshot),
            Ok(Err(e)) => {
                log::warn!("Discovery stopped at {}: {}", url, e);
                None
            }
            Err(_) => {
                log::warn!("Discovery stopped at {}: timed out after {:?}", url, limit);
                None
            }
        }
    }

    /// Collect up to `max_chapters` chapter URLs starting at `start_url`.
    ///
    /// Never fails: a page that does not load ends the walk and whatever was
    /// collected is returned.
    pub async fn discover(
        &self,
        target: &dyn CaptureTarget,
        start_url: &str,
        max_chapters: Option<usize>,
    ) -> DiscoveryOutcome {
        let max = max_chapters.unwrap_or(self.settings.max_chapters);
        let mut urls: Vec<String> = Vec::new();

        if max == 0 {
            return DiscoveryOutcome {
                urls,
                method: DiscoveryMethod::NavigateNext,
                stop: StopReason::MaxReached,
            };
        }

        urls.push(start_url.to_string());
        let Some(mut snapshot) = self.load_snapshot(target, start_url).await else {
            return DiscoveryOutcome {
                urls,
                method: DiscoveryMethod::NavigateNext,
                stop: StopReason::NavigationFailed,
            };
        };

        if let Some((list, exhausted)) = structured_list(&snapshot, start_url, max) {
            log::info!("Found chapter list on {} ({} chapters)", start_url, list.len());
            return DiscoveryOutcome {
                urls: list,
                method: DiscoveryMethod::StructuredList,
                stop: if exhausted {
                    StopReason::EndOfList
                } else {
                    StopReason::MaxReached
                },
            };
        }

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(normalize_url(start_url));
        seen.insert(normalize_url(&snapshot.url));

        let stop = loop {
            if urls.len() >= max {
                break StopReason::MaxReached;
            }
            let Some(next) = find_next_link(&snapshot, &self.settings.next_selectors) else {
                break StopReason::NoNext;
            };
            if !seen.insert(normalize_url(&next)) {
                break StopReason::Cycle;
            }
            log::debug!("Next chapter: {}", next);
            urls.push(next.clone());

            match self.load_snapshot(target, &next).await {
                Some(loaded) => {
                    // Redirects can land on an already collected chapter
                    let landed = normalize_url(&loaded.url);
                    if landed != normalize_url(&next) && !seen.insert(landed) {
                        break StopReason::Cycle;
                    }
                    snapshot = loaded;
                }
                None => break StopReason::NavigationFailed,
            }
        };

        log::info!(
            "Discovered {} chapters from {} ({:?})",
            urls.len(),
            start_url,
            stop
        );
        DiscoveryOutcome {
            urls,
            method: DiscoveryMethod::NavigateNext,
            stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, body: &str) -> PageSnapshot {
        PageSnapshot {
            url: url.to_string(),
            title: String::new(),
            html: format!("<html><body>{}</body></html>", body),
            image_sizes: Default::default(),
        }
    }

    fn options(numbers: impl Iterator<Item = usize>) -> String {
        numbers
            .map(|n| {
                format!(
                    r#"<option value="https://read.example.com/s/chapter-{n}">Chapter {n}</option>"#
                )
            })
            .collect()
    }

    #[test]
    fn test_ascending_list_from_current() {
        let snapshot = page(
            "https://read.example.com/s/chapter-5",
            &format!("<select id='chapters'>{}</select>", options(1..=10)),
        );
        let (urls, exhausted) = structured_list(&snapshot, &snapshot.url, 10).unwrap();
        assert_eq!(urls.len(), 6);
        assert_eq!(urls[0], "https://read.example.com/s/chapter-5");
        assert_eq!(urls[5], "https://read.example.com/s/chapter-10");
        assert!(exhausted);
    }

    #[test]
    fn test_descending_list_is_walked_backwards() {
        let snapshot = page(
            "https://read.example.com/s/chapter-5",
            &format!("<select>{}</select>", options((1..=10).rev())),
        );
        let (urls, _) = structured_list(&snapshot, &snapshot.url, 3).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://read.example.com/s/chapter-5",
                "https://read.example.com/s/chapter-6",
                "https://read.example.com/s/chapter-7",
            ]
        );
    }

    #[test]
    fn test_list_without_current_chapter_is_ignored() {
        let snapshot = page(
            "https://read.example.com/s/chapter-50",
            &format!("<select>{}</select>", options(1..=10)),
        );
        assert!(structured_list(&snapshot, &snapshot.url, 10).is_none());
    }

    #[test]
    fn test_relative_data_redirect_options() {
        let snapshot = page(
            "https://read.example.com/s/ch-2/",
            r#"<select>
                <option data-redirect="/s/ch-1/">Ch 1</option>
                <option data-redirect="/s/ch-2/" selected>Ch 2</option>
                <option data-redirect="/s/ch-3/">Ch 3</option>
            </select>"#,
        );
        let (urls, _) = structured_list(&snapshot, "https://read.example.com/s/ch-2", 10).unwrap();
        assert_eq!(
            urls,
            vec!["https://read.example.com/s/ch-2/", "https://read.example.com/s/ch-3/"]
        );
    }

    #[test]
    fn test_next_link_by_selector_and_text() {
        let by_rel = page(
            "https://read.example.com/s/1",
            r#"<a href="/s/0">Previous</a><a rel="next" href="/s/2">→</a>"#,
        );
        assert_eq!(
            find_next_link(&by_rel, &default_next_selectors()).as_deref(),
            Some("https://read.example.com/s/2")
        );

        let by_text = page(
            "https://read.example.com/s/1",
            r#"<a href="/s/0">Prev</a><a href="/s/2">Next Chapter »</a>"#,
        );
        assert_eq!(
            find_next_link(&by_text, &default_next_selectors()).as_deref(),
            Some("https://read.example.com/s/2")
        );

        let wrapped = page(
            "https://read.example.com/s/1",
            r#"<div class="nav-links"><span class="next"><a href="/s/2">»</a></span></div>"#,
        );
        assert_eq!(
            find_next_link(&wrapped, &default_next_selectors()).as_deref(),
            Some("https://read.example.com/s/2")
        );

        let none = page(
            "https://read.example.com/s/1",
            r##"<a href="#">Next</a><a href="/s/0">Previous chapter</a>"##,
        );
        assert_eq!(find_next_link(&none, &default_next_selectors()), None);
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://read.example.com/s/ch-2/#top"),
            "https://read.example.com/s/ch-2"
        );
        assert_eq!(
            normalize_url("https://READ.example.com/s/ch-2"),
            "https://read.example.com/s/ch-2"
        );
    }

    #[test]
    fn test_chapter_number() {
        assert_eq!(chapter_number("Chapter 12.5", ""), Some(12.5));
        assert_eq!(chapter_number("Vol. 2 Ch. 14", ""), Some(14.0));
        assert_eq!(chapter_number("", "https://x.com/s/chapter-7"), Some(7.0));
        assert_eq!(chapter_number("Prologue", "https://x.com/s/prologue"), None);
    }
}
