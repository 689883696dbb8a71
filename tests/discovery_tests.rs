/// Chapter discovery against an in-memory reader site

mod common;

use chapter_grabber::discovery::{ChapterDiscoverer, DiscoveryMethod, DiscoverySettings, StopReason};
use common::{chapter_url, image_url, next_link, reader_html, FakeSite, FakeTab};
use std::sync::Arc;

fn title(n: usize) -> String {
    format!("Solo Leveling - Chapter {}", n)
}

/// Chapters `1..=count`, each linking to the next; `last_links_to` closes a loop
fn chain(count: usize, last_links_to: Option<usize>) -> FakeSite {
    let mut site = FakeSite::new();
    for n in 1..=count {
        let next = if n < count {
            next_link(&chapter_url(n + 1))
        } else {
            last_links_to.map(|t| next_link(&chapter_url(t))).unwrap_or_default()
        };
        site = site.with_chapter(&chapter_url(n), &title(n), &[image_url(n, 1)], &next);
    }
    site
}

fn discoverer() -> ChapterDiscoverer {
    ChapterDiscoverer::new(DiscoverySettings {
        navigation_timeout_secs: 5,
        ..DiscoverySettings::default()
    })
}

fn tab(site: FakeSite) -> FakeTab {
    FakeTab::new(Arc::new(site))
}

#[tokio::test]
async fn test_follows_next_links_to_the_end() {
    let tab = tab(chain(5, None));
    let outcome = discoverer().discover(&tab, &chapter_url(2), None).await;

    assert_eq!(outcome.method, DiscoveryMethod::NavigateNext);
    assert_eq!(outcome.stop, StopReason::NoNext);
    assert_eq!(
        outcome.urls,
        (2..=5).map(chapter_url).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_stops_on_cycle() {
    let tab = tab(chain(3, Some(1)));
    let outcome = discoverer().discover(&tab, &chapter_url(1), Some(10)).await;

    assert_eq!(outcome.stop, StopReason::Cycle);
    assert_eq!(
        outcome.urls,
        vec![chapter_url(1), chapter_url(2), chapter_url(3)]
    );
}

#[tokio::test]
async fn test_respects_max_chapters() {
    let tab = tab(chain(10, None));
    let outcome = discoverer().discover(&tab, &chapter_url(1), Some(4)).await;

    assert_eq!(outcome.stop, StopReason::MaxReached);
    assert_eq!(outcome.urls.len(), 4);
    assert_eq!(outcome.urls[3], chapter_url(4));
}

#[tokio::test]
async fn test_navigation_failure_keeps_partial_result() {
    let tab = tab(chain(5, None).unreachable(&chapter_url(3)));
    let outcome = discoverer().discover(&tab, &chapter_url(1), None).await;

    assert_eq!(outcome.stop, StopReason::NavigationFailed);
    // The failing chapter was linked, so it is still listed
    assert_eq!(
        outcome.urls,
        vec![chapter_url(1), chapter_url(2), chapter_url(3)]
    );
}

#[tokio::test]
async fn test_unreachable_start_returns_only_start() {
    let tab = tab(FakeSite::new());
    let outcome = discoverer().discover(&tab, &chapter_url(7), None).await;

    assert_eq!(outcome.stop, StopReason::NavigationFailed);
    assert_eq!(outcome.urls, vec![chapter_url(7)]);
}

#[tokio::test]
async fn test_chapter_select_is_preferred_over_links() {
    let options: String = (1..=10)
        .map(|n| {
            format!(
                r#"<option value="{}"{}>Chapter {}</option>"#,
                chapter_url(n),
                if n == 5 { " selected" } else { "" },
                n
            )
        })
        .collect();
    let extra = format!(
        r#"<select class="chapter-select">{}</select>{}"#,
        options,
        next_link(&chapter_url(6))
    );
    let site = FakeSite::new().with_page(
        &chapter_url(5),
        &title(5),
        reader_html(&title(5), &[image_url(5, 1)], &extra),
    );

    let outcome = discoverer()
        .discover(&tab(site), &chapter_url(5), Some(10))
        .await;

    assert_eq!(outcome.method, DiscoveryMethod::StructuredList);
    assert_eq!(outcome.stop, StopReason::EndOfList);
    assert_eq!(outcome.urls, (5..=10).map(chapter_url).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_descending_select_is_read_backwards() {
    let options: String = (1..=8)
        .rev()
        .map(|n| format!(r#"<option value="{}">Ch. {}</option>"#, chapter_url(n), n))
        .collect();
    let extra = format!(r#"<select>{}</select>"#, options);
    let site = FakeSite::new().with_page(
        &chapter_url(3),
        &title(3),
        reader_html(&title(3), &[image_url(3, 1)], &extra),
    );

    let outcome = discoverer()
        .discover(&tab(site), &chapter_url(3), Some(4))
        .await;

    assert_eq!(outcome.method, DiscoveryMethod::StructuredList);
    assert_eq!(outcome.stop, StopReason::MaxReached);
    assert_eq!(outcome.urls, (3..=6).map(chapter_url).collect::<Vec<_>>());
}
