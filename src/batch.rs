//! Multi-chapter runs
//!
//! A [`ChapterQueue`] holds the chapters picked for a batch, usually filled
//! from discovery. [`BatchControl`] runs the selected ones in order through
//! the [`CaptureEngine`], pausing between chapters, and can be cancelled
//! between chapters.

use crate::discovery::normalize_url;
use crate::models::{ChapterQueueItem, QueueItemStatus};
use crate::pipeline::CaptureEngine;
use crate::target::TargetFactory;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn default_chapter_pause_ms() -> u64 { 2000 }

#[derive(Debug, Deserialize, Clone)]
pub struct BatchSettings {
    /// Pause between two chapters, keeps sites from rate limiting us
    #[serde(default = "default_chapter_pause_ms")]
    pub chapter_pause_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            chapter_pause_ms: default_chapter_pause_ms(),
        }
    }
}

/// Ordered, de-duplicated chapter list
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChapterQueue {
    items: Vec<ChapterQueueItem>,
}

impl ChapterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut queue = Self::new();
        for url in urls {
            queue.add(url);
        }
        queue
    }

    /// Append a chapter. Returns false if it is already queued.
    pub fn add(&mut self, url: impl Into<String>) -> bool {
        let url = url.into();
        let key = normalize_url(&url);
        if self.items.iter().any(|i| normalize_url(&i.url) == key) {
            return false;
        }
        self.items.push(ChapterQueueItem::new(url));
        true
    }

    pub fn set_selected(&mut self, index: usize, selected: bool) -> bool {
        match self.items.get_mut(index) {
            Some(item) => {
                item.selected = selected;
                true
            }
            None => false,
        }
    }

    pub fn toggle(&mut self, index: usize) -> Option<bool> {
        let item = self.items.get_mut(index)?;
        item.selected = !item.selected;
        Some(item.selected)
    }

    pub fn items(&self) -> &[ChapterQueueItem] {
        &self.items
    }

    pub fn selected_urls(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| i.selected)
            .map(|i| i.url.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn set_status(&mut self, index: usize, status: QueueItemStatus) {
        if let Some(item) = self.items.get_mut(index) {
            item.result_status = status;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub running: bool,
    pub items: Vec<ChapterQueueItem>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("A batch is already running")]
    AlreadyRunning,

    #[error("No chapter at position {0}")]
    UnknownIndex(usize),
}

/// Shared batch state: the queue, a running flag and the cancel switch
#[derive(Clone, Default)]
pub struct BatchControl {
    queue: Arc<Mutex<ChapterQueue>>,
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl BatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, ChapterQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Replace the queue. Refused while a batch runs.
    pub fn load(&self, queue: ChapterQueue) -> Result<(), BatchError> {
        if self.is_running() {
            return Err(BatchError::AlreadyRunning);
        }
        *self.queue() = queue;
        Ok(())
    }

    pub fn set_selected(&self, index: usize, selected: bool) -> Result<(), BatchError> {
        if self.is_running() {
            return Err(BatchError::AlreadyRunning);
        }
        if self.queue().set_selected(index, selected) {
            Ok(())
        } else {
            Err(BatchError::UnknownIndex(index))
        }
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            running: self.is_running(),
            items: self.queue().items().to_vec(),
        }
    }

    /// Stop after the chapter in progress
    pub fn cancel(&self) {
        if self.is_running() {
            log::info!("Batch cancel requested");
            self.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// Claim the runner slot; pair with [`BatchControl::run`]
    pub fn try_start(&self) -> Result<(), BatchError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| {
                self.cancel.store(false, Ordering::SeqCst);
            })
            .map_err(|_| BatchError::AlreadyRunning)
    }

    /// Capture every selected chapter in queue order.
    ///
    /// Must follow a successful [`BatchControl::try_start`]; releases the
    /// runner slot when done.
    pub async fn run(
        &self,
        engine: &CaptureEngine,
        factory: &dyn TargetFactory,
        settings: &BatchSettings,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let plan: Vec<(usize, String, bool)> = self
            .queue()
            .items()
            .iter()
            .enumerate()
            .map(|(i, item)| (i, item.url.clone(), item.selected))
            .collect();
        let total_selected = plan.iter().filter(|(_, _, s)| *s).count();
        let mut started = 0usize;

        for (index, url, selected) in plan {
            if !selected {
                self.queue().set_status(index, QueueItemStatus::Skipped);
                summary.skipped += 1;
                continue;
            }
            if self.cancel.load(Ordering::SeqCst) {
                self.queue().set_status(index, QueueItemStatus::Skipped);
                summary.skipped += 1;
                summary.cancelled = true;
                continue;
            }

            if started > 0 && settings.chapter_pause_ms > 0 {
                tokio::time::sleep(Duration::from_millis(settings.chapter_pause_ms)).await;
                if self.cancel.load(Ordering::SeqCst) {
                    self.queue().set_status(index, QueueItemStatus::Skipped);
                    summary.skipped += 1;
                    summary.cancelled = true;
                    continue;
                }
            }
            started += 1;

            log::info!("Batch chapter {}/{}: {}", started, total_selected, url);
            self.queue().set_status(index, QueueItemStatus::Running);

            let status = match factory.open().await {
                Ok(target) => match engine.capture_chapter(target, &url, true).await {
                    Ok(report) => QueueItemStatus::Done {
                        success: report.success_count,
                        failures: report.failures.len(),
                    },
                    Err(e) => QueueItemStatus::Failed {
                        reason: e.to_string(),
                    },
                },
                Err(e) => QueueItemStatus::Failed {
                    reason: e.to_string(),
                },
            };

            match &status {
                QueueItemStatus::Done { .. } => summary.completed += 1,
                _ => summary.failed += 1,
            }
            self.queue().set_status(index, status);
        }

        log::info!(
            "Batch finished: {} completed, {} failed, {} skipped{}",
            summary.completed,
            summary.failed,
            summary.skipped,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        self.cancel.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_deduplicates_in_insertion_order() {
        let queue = ChapterQueue::from_urls([
            "https://read.example.com/s/ch-1",
            "https://read.example.com/s/ch-2",
            "https://read.example.com/s/ch-1/",
            "https://read.example.com/s/ch-3#comments",
            "https://read.example.com/s/ch-3",
        ]);
        let urls: Vec<&str> = queue.items().iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://read.example.com/s/ch-1",
                "https://read.example.com/s/ch-2",
                "https://read.example.com/s/ch-3#comments",
            ]
        );
        assert!(queue.items().iter().all(|i| i.selected));
        assert!(queue
            .items()
            .iter()
            .all(|i| i.result_status == QueueItemStatus::Pending));
    }

    #[test]
    fn test_toggle_selection() {
        let mut queue = ChapterQueue::from_urls(["https://a.example/1", "https://a.example/2"]);
        assert_eq!(queue.toggle(0), Some(false));
        assert_eq!(queue.selected_urls(), vec!["https://a.example/2".to_string()]);
        assert_eq!(queue.toggle(5), None);
        assert!(queue.set_selected(0, true));
        assert_eq!(queue.selected_urls().len(), 2);
    }

    #[test]
    fn test_control_refuses_changes_while_running() {
        let control = BatchControl::new();
        control
            .load(ChapterQueue::from_urls(["https://a.example/1"]))
            .unwrap();
        control.try_start().unwrap();

        assert_eq!(control.try_start(), Err(BatchError::AlreadyRunning));
        assert_eq!(
            control.load(ChapterQueue::new()),
            Err(BatchError::AlreadyRunning)
        );
        assert_eq!(control.set_selected(0, false), Err(BatchError::AlreadyRunning));
        assert!(control.snapshot().running);
    }

    #[test]
    fn test_set_selected_unknown_index() {
        let control = BatchControl::new();
        assert_eq!(control.set_selected(3, false), Err(BatchError::UnknownIndex(3)));
    }
}
