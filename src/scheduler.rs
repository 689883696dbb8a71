use crate::capture::CaptureStrategy;
use crate::error::CaptureError;
use crate::metrics::MetricsTracker;
use crate::models::{ImageExtension, ImageRef, ItemFailure};
use crate::persistence::ImageSink;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn default_window_size() -> usize { 10 }
fn default_window_pause_ms() -> u64 { 50 }
fn default_max_retries() -> usize { 3 }
fn default_retry_delay_ms() -> u64 { 500 }
fn default_log_tail() -> usize { 20 }

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerSettings {
    /// Images captured concurrently per window
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Pause between windows
    #[serde(default = "default_window_pause_ms")]
    pub window_pause_ms: u64,

    /// Attempts per image, the first one included
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Log entries attached to each progress event
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_pause_ms: default_window_pause_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            log_tail: default_log_tail(),
        }
    }
}

/// Reported after every finished window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowProgress {
    /// 1-based
    pub window: usize,
    pub windows: usize,
    pub done: usize,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub success_count: usize,
    /// Sorted by index, one entry per failed image
    pub failures: Vec<ItemFailure>,
    /// `written[i]` is where `items[i]` was stored
    pub written: Vec<Option<PathBuf>>,
}

/// Windowed, bounded-concurrency capture of a chapter's images
pub struct BatchScheduler {
    settings: SchedulerSettings,
}

impl BatchScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Capture and persist every item.
    ///
    /// Items inside a window run concurrently, windows run one after another.
    /// Item failures are collected, never propagated.
    pub async fn run<F>(
        &self,
        items: &[ImageRef],
        strategy: &dyn CaptureStrategy,
        sink: &dyn ImageSink,
        metrics: &MetricsTracker,
        mut on_window: F,
    ) -> BatchOutcome
    where
        F: FnMut(&WindowProgress) + Send,
    {
        let window_size = self.settings.window_size.max(1);
        let total = items.len();
        let windows = total.div_ceil(window_size);

        let mut outcome = BatchOutcome {
            success_count: 0,
            failures: Vec::new(),
            written: vec![None; total],
        };

        for (w, window) in items.chunks(window_size).enumerate() {
            if w > 0 && self.settings.window_pause_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.settings.window_pause_ms)).await;
            }

            let offset = w * window_size;
            let results: Vec<(usize, Result<PathBuf, CaptureError>)> =
                stream::iter(window.iter().enumerate().map(|(i, item)| async move {
                    (offset + i, self.process(item, strategy, sink, metrics).await)
                }))
                .buffer_unordered(window_size)
                .collect()
                .await;

            for (position, result) in results {
                match result {
                    Ok(path) => {
                        outcome.written[position] = Some(path);
                        outcome.success_count += 1;
                    }
                    Err(e) => {
                        log::warn!("Image {} failed: {}", items[position].index + 1, e);
                        outcome.failures.push(ItemFailure {
                            index: items[position].index,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            on_window(&WindowProgress {
                window: w + 1,
                windows,
                done: (offset + window.len()).min(total),
                total,
                success_count: outcome.success_count,
                failure_count: outcome.failures.len(),
            });
        }

        outcome.failures.sort_by_key(|f| f.index);
        outcome
    }

    /// One image: capture with retries, then persist once
    async fn process(
        &self,
        item: &ImageRef,
        strategy: &dyn CaptureStrategy,
        sink: &dyn ImageSink,
        metrics: &MetricsTracker,
    ) -> Result<PathBuf, CaptureError> {
        let attempts = self.settings.max_retries.max(1);
        let name = strategy.name();
        let mut attempt = 1;

        let captured = loop {
            let started = Instant::now();
            match strategy.capture(item).await {
                Ok(captured) => {
                    metrics.record_success(name, started.elapsed());
                    break captured;
                }
                Err(e) => {
                    metrics.record_failure(name, &e);
                    if !e.is_retryable() || attempt >= attempts {
                        return Err(e);
                    }
                    log::debug!(
                        "Retrying image {} ({}/{}): {}",
                        item.index + 1,
                        attempt,
                        attempts,
                        e
                    );
                    metrics.record_retry(name);
                    tokio::time::sleep(Duration::from_millis(self.settings.retry_delay_ms)).await;
                    attempt += 1;
                }
            }
        };

        let extension = captured
            .content_type
            .as_deref()
            .and_then(ImageExtension::from_content_type)
            .unwrap_or(item.extension);

        sink.persist(item.index, &captured.bytes, extension).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CapturedImage;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Flaky {
        failures_before_success: HashMap<usize, usize>,
        error: CaptureError,
        attempts: Mutex<HashMap<usize, usize>>,
    }

    impl Flaky {
        fn new(failures_before_success: HashMap<usize, usize>, error: CaptureError) -> Self {
            Self {
                failures_before_success,
                error,
                attempts: Mutex::new(HashMap::new()),
            }
        }

        fn attempts_for(&self, index: usize) -> usize {
            *self.attempts.lock().unwrap().get(&index).unwrap_or(&0)
        }
    }

    #[async_trait]
    impl CaptureStrategy for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn capture(&self, image: &ImageRef) -> Result<CapturedImage, CaptureError> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let n = attempts.entry(image.index).or_insert(0);
                *n += 1;
                *n
            };
            let fail_times = *self.failures_before_success.get(&image.index).unwrap_or(&0);
            if attempt <= fail_times {
                return Err(self.error.clone());
            }
            Ok(CapturedImage::new(vec![image.index as u8], None))
        }
    }

    #[derive(Default)]
    struct MemorySink {
        stored: Mutex<HashMap<usize, (Vec<u8>, ImageExtension)>>,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl ImageSink for MemorySink {
        async fn persist(
            &self,
            index: usize,
            bytes: &[u8],
            extension: ImageExtension,
        ) -> Result<PathBuf, CaptureError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.stored
                .lock()
                .unwrap()
                .insert(index, (bytes.to_vec(), extension));
            Ok(Path::new("mem").join(format!("{:03}.{}", index + 1, extension)))
        }
    }

    fn fast_settings() -> SchedulerSettings {
        SchedulerSettings {
            window_size: 4,
            window_pause_ms: 0,
            max_retries: 3,
            retry_delay_ms: 1,
            log_tail: 20,
        }
    }

    fn items(n: usize) -> Vec<ImageRef> {
        (0..n)
            .map(|i| ImageRef::new(i, format!("https://cdn.example.com/{}.png", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_windows_report_progress() {
        let scheduler = BatchScheduler::new(fast_settings());
        let strategy = Flaky::new(HashMap::new(), CaptureError::Transient("x".to_string()));
        let sink = MemorySink::default();
        let mut reports = Vec::new();

        let outcome = scheduler
            .run(&items(10), &strategy, &sink, &MetricsTracker::new(), |p| {
                reports.push(p.clone())
            })
            .await;

        assert_eq!(outcome.success_count, 10);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].done, 4);
        assert_eq!(reports[2].window, 3);
        assert_eq!(reports[2].windows, 3);
        assert_eq!(reports[2].done, 10);
        assert_eq!(sink.stored.lock().unwrap()[&3].1, ImageExtension::Png);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let scheduler = BatchScheduler::new(fast_settings());
        let strategy = Flaky::new(
            HashMap::from([(1, usize::MAX)]),
            CaptureError::Status(404),
        );
        let sink = MemorySink::default();
        let metrics = MetricsTracker::new();

        let outcome = scheduler.run(&items(3), &strategy, &sink, &metrics, |_| {}).await;

        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].index, 1);
        assert!(outcome.written[1].is_none());
        assert_eq!(strategy.attempts_for(1), 1);
        assert_eq!(metrics.get_metrics("flaky").unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn test_retryable_error_exhausts_attempts_once() {
        let scheduler = BatchScheduler::new(fast_settings());
        let strategy = Flaky::new(
            HashMap::from([(2, usize::MAX)]),
            CaptureError::Status(503),
        );
        let sink = MemorySink::default();
        let metrics = MetricsTracker::new();

        let outcome = scheduler.run(&items(5), &strategy, &sink, &metrics, |_| {}).await;

        assert_eq!(outcome.success_count, 4);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].reason.contains("503"));
        assert_eq!(strategy.attempts_for(2), 3);
        assert_eq!(metrics.get_metrics("flaky").unwrap().retry_count, 2);
        assert_eq!(sink.writes.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_content_type_overrides_url_extension() {
        struct Typed;

        #[async_trait]
        impl CaptureStrategy for Typed {
            fn name(&self) -> &str {
                "typed"
            }
            async fn capture(&self, _image: &ImageRef) -> Result<CapturedImage, CaptureError> {
                Ok(CapturedImage::new(vec![1], Some("image/jpeg".to_string())))
            }
        }

        let scheduler = BatchScheduler::new(fast_settings());
        let sink = MemorySink::default();
        let outcome = scheduler
            .run(&items(1), &Typed, &sink, &MetricsTracker::new(), |_| {})
            .await;

        assert_eq!(outcome.success_count, 1);
        assert_eq!(sink.stored.lock().unwrap()[&0].1, ImageExtension::Jpg);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let scheduler = BatchScheduler::new(fast_settings());
        let strategy = Flaky::new(HashMap::new(), CaptureError::Transient("x".to_string()));
        let mut calls = 0;
        let outcome = scheduler
            .run(&[], &strategy, &MemorySink::default(), &MetricsTracker::new(), |_| calls += 1)
            .await;
        assert_eq!(outcome.success_count, 0);
        assert!(outcome.written.is_empty());
        assert_eq!(calls, 0);
    }
}
