/// Multi-chapter batches through the capture engine

mod common;

use chapter_grabber::batch::{BatchControl, BatchSettings, ChapterQueue};
use chapter_grabber::models::QueueItemStatus;
use chapter_grabber::persistence::read_tree;
use common::{chapter_url, engine, image_url, FakeSite, FakeTabs};

fn site(chapters: usize, pages: usize) -> FakeSite {
    let mut site = FakeSite::new();
    for n in 1..=chapters {
        let images: Vec<String> = (1..=pages).map(|p| image_url(n, p)).collect();
        site = site.with_chapter(
            &chapter_url(n),
            &format!("Solo Leveling - Chapter {}", n),
            &images,
            "",
        );
    }
    site
}

fn no_pause() -> BatchSettings {
    BatchSettings {
        chapter_pause_ms: 0,
    }
}

#[tokio::test]
async fn test_batch_captures_selected_chapters_in_order() {
    let library = tempfile::tempdir().unwrap();
    let engine = engine(library.path());
    let factory = FakeTabs {
        site: site(4, 3).unreachable(&chapter_url(4)).into_arc(),
    };

    let control = BatchControl::new();
    control
        .load(ChapterQueue::from_urls((1..=4).map(chapter_url)))
        .unwrap();
    control.set_selected(1, false).unwrap();
    control.try_start().unwrap();

    let summary = control.run(&engine, &factory, &no_pause()).await;

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert!(!summary.cancelled);

    let snapshot = control.snapshot();
    assert!(!snapshot.running);
    let statuses: Vec<&QueueItemStatus> = snapshot.items.iter().map(|i| &i.result_status).collect();
    assert_eq!(
        statuses[0],
        &QueueItemStatus::Done {
            success: 3,
            failures: 0
        }
    );
    assert_eq!(statuses[1], &QueueItemStatus::Skipped);
    assert!(matches!(statuses[3], QueueItemStatus::Failed { .. }));

    let tree = read_tree(library.path()).unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].name, "Solo Leveling");
    let chapters: Vec<&str> = tree[0].chapters.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(chapters, vec!["Chapter 001", "Chapter 003"]);
    assert_eq!(tree[0].chapters[0].pages, vec!["001.png", "002.png", "003.png"]);
}

#[tokio::test]
async fn test_cancelled_batch_skips_remaining_chapters() {
    let library = tempfile::tempdir().unwrap();
    let engine = engine(library.path());
    let factory = FakeTabs {
        site: site(3, 1).into_arc(),
    };

    let control = BatchControl::new();
    control
        .load(ChapterQueue::from_urls((1..=3).map(chapter_url)))
        .unwrap();
    control.try_start().unwrap();
    control.cancel();

    let summary = control.run(&engine, &factory, &no_pause()).await;

    assert!(summary.cancelled);
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.skipped, 3);
    assert!(control
        .snapshot()
        .items
        .iter()
        .all(|i| i.result_status == QueueItemStatus::Skipped));

    // The runner slot is free again
    assert!(control.try_start().is_ok());
}
