//! One chapter, end to end
//!
//! [`CaptureEngine::capture_chapter`] loads the page, scrolls it, locates the
//! images, names the chapter from its title and hands the images to the
//! batch scheduler. Every stage is mirrored into a [`CaptureSession`] and
//! published on the [`ProgressHub`].

use crate::capture::{
    build_strategy, profile_for, AuthenticatedFetch, InterceptionCapture, ProfileSettings,
    SiteProfile,
};
use crate::config::Config;
use crate::error::{CaptureError, EngineError, SessionError};
use crate::http_client::EnhancedHttpClient;
use crate::locator::{locate, LocatorSettings, ScrollPlan};
use crate::metrics::MetricsTracker;
use crate::models::{ImageExtension, ImageRef, ItemFailure, SessionStatus};
use crate::persistence::ChapterWriter;
use crate::scheduler::BatchScheduler;
use crate::session::{CaptureSession, ProgressHub, SessionGuard, SessionRegistry};
use crate::target::{CaptureTarget, InterceptFilter, InterceptedResponse};
use crate::title::parse_title;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Result of a chapter run that got past scanning
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub session_id: String,
    pub url: String,
    pub series_name: String,
    pub chapter_label: String,
    pub folder: PathBuf,
    pub profile: SiteProfile,
    pub total: usize,
    pub success_count: usize,
    pub failures: Vec<ItemFailure>,
    /// Index-aligned with the chapter's images
    pub files: Vec<Option<PathBuf>>,
    pub status: SessionStatus,
}

pub struct CaptureEngine {
    library: PathBuf,
    scroll: ScrollPlan,
    locator: LocatorSettings,
    interception: InterceptFilter,
    profiles: ProfileSettings,
    scheduler: BatchScheduler,
    log_tail: usize,
    http: Arc<EnhancedHttpClient>,
    metrics: MetricsTracker,
    registry: SessionRegistry,
    progress: ProgressHub,
}

/// Items built from network traffic when the markup gave nothing away
fn items_from_intercepted(responses: &[InterceptedResponse]) -> Vec<ImageRef> {
    responses
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut item = ImageRef::new(i, r.url.clone());
            if ImageExtension::from_url(&r.url).is_none() {
                if let Some(ext) = r
                    .content_type
                    .as_deref()
                    .and_then(ImageExtension::from_content_type)
                {
                    item.extension = ext;
                }
            }
            item
        })
        .collect()
}

impl CaptureEngine {
    pub fn new(
        config: &Config,
        http: Arc<EnhancedHttpClient>,
        metrics: MetricsTracker,
        registry: SessionRegistry,
        progress: ProgressHub,
    ) -> Self {
        Self {
            library: config.library_path(),
            scroll: config.scroll.clone(),
            locator: config.locator.clone(),
            interception: config.interception.clone(),
            profiles: config.profiles.clone(),
            scheduler: BatchScheduler::new(config.capture.clone()),
            log_tail: config.capture.log_tail,
            http,
            metrics,
            registry,
            progress,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn progress(&self) -> &ProgressHub {
        &self.progress
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    pub fn library(&self) -> &PathBuf {
        &self.library
    }

    fn publish(&self, session: &CaptureSession, message: &str) {
        self.progress
            .publish(session.event(message, None, None, self.log_tail));
    }

    fn advance(&self, session: &mut CaptureSession, to: SessionStatus, message: &str) {
        if let Err(e) = session.transition(to) {
            log::error!("[{}] {}", session.target(), e);
        }
        self.publish(session, message);
    }

    /// Mark the session failed and hand the error back
    fn fail(&self, session: &mut CaptureSession, error: impl Into<EngineError>) -> EngineError {
        let error = error.into();
        session.log("error", error.to_string());
        self.advance(session, SessionStatus::Failed, &error.to_string());
        error
    }

    fn checked(
        &self,
        session: &mut CaptureSession,
        result: Result<(), SessionError>,
    ) -> Result<(), EngineError> {
        result.map_err(|e| self.fail(session, e))
    }

    /// Capture one chapter into the library.
    ///
    /// Only a second run for the same URL or a failed scan is an error;
    /// individual image failures are reported in the result.
    pub async fn capture_chapter(
        &self,
        target: Arc<dyn CaptureTarget>,
        url: &str,
        batch_mode: bool,
    ) -> Result<CaptureReport, EngineError> {
        let guard = self.registry.begin(url)?;
        self.capture_claimed(guard, target, url, batch_mode).await
    }

    /// Same as [`capture_chapter`](Self::capture_chapter) for a caller that
    /// already holds the claim on `url`. The claim is released when the run ends.
    pub async fn capture_claimed(
        &self,
        guard: SessionGuard,
        target: Arc<dyn CaptureTarget>,
        url: &str,
        batch_mode: bool,
    ) -> Result<CaptureReport, EngineError> {
        let _guard = guard;
        let mut session = CaptureSession::new(url);
        session.log("start", format!("Capture requested for {}", url));
        self.advance(&mut session, SessionStatus::Scanning, "Scanning page");

        let mut profile = profile_for(url, &self.profiles, batch_mode, target.as_ref());
        let interception = if profile == SiteProfile::Intercepted {
            match target.start_interception(&self.interception).await {
                Ok(log) => log,
                Err(e) => {
                    session.log("warn", format!("Interception unavailable: {}", e));
                    None
                }
            }
        } else {
            None
        };
        if profile == SiteProfile::Intercepted && interception.is_none() {
            profile = if target.can_copy_rendered() {
                SiteProfile::Standard
            } else {
                SiteProfile::FetchOnly
            };
        }

        if let Err(e) = target.load(url).await {
            if interception.is_some() {
                target.stop_interception().await;
            }
            return Err(self.fail(&mut session, CaptureError::ScanFailed(e.to_string())));
        }
        if let Err(e) = target.scroll_through(&self.scroll).await {
            // Whatever loaded so far is still worth scanning
            session.log("warn", format!("Scroll incomplete: {}", e));
        }
        let snapshot = target.snapshot().await;
        if interception.is_some() {
            target.stop_interception().await;
        }
        let snapshot = match snapshot {
            Ok(s) => s,
            Err(e) => return Err(self.fail(&mut session, CaptureError::ScanFailed(e.to_string()))),
        };

        let intercepted = interception
            .as_ref()
            .map(|l| l.responses())
            .unwrap_or_default();
        let candidates = locate(&snapshot, &self.locator);
        let items: Vec<ImageRef> = if !candidates.is_empty() {
            candidates
                .into_iter()
                .enumerate()
                .map(|(i, c)| ImageRef::new(i, c.url))
                .collect()
        } else if !intercepted.is_empty() {
            session.log(
                "scan",
                format!("No images in markup, using {} intercepted responses", intercepted.len()),
            );
            items_from_intercepted(&intercepted)
        } else {
            return Err(self.fail(
                &mut session,
                CaptureError::ScanFailed(format!("no chapter images found on {}", url)),
            ));
        };

        let title = parse_title(&snapshot.title);
        let assigned = session.assign_scan(title.clone(), items.clone());
        self.checked(&mut session, assigned)?;
        session.log(
            "scan",
            format!(
                "{} images for {} / {} ({:?})",
                items.len(),
                title.series_name,
                title.chapter_label,
                profile
            ),
        );

        let cookies = target.cookie_header().await;
        let fetch = AuthenticatedFetch::new(self.http.clone(), &snapshot.url, cookies);
        let intercepted_capture = interception
            .as_ref()
            .map(|_| InterceptionCapture::new(&items, &intercepted));
        if let Some(ic) = &intercepted_capture {
            session.log(
                "scan",
                format!("{}/{} images matched in network traffic", ic.matched_count(), items.len()),
            );
        }
        let strategy = build_strategy(
            profile,
            target.clone(),
            fetch,
            intercepted_capture,
            &self.metrics,
        );

        self.advance(
            &mut session,
            SessionStatus::Capturing,
            &format!("Capturing {} images with {}", items.len(), strategy.name()),
        );

        let writer = ChapterWriter::new(&self.library, &title.series_name, &title.chapter_label);
        let outcome = {
            let session_ref = &session;
            self.scheduler
                .run(&items, strategy.as_ref(), &writer, &self.metrics, |p| {
                    let mut event = session_ref.event(
                        format!("Window {}/{}", p.window, p.windows),
                        Some(p.done),
                        Some(p.total),
                        self.log_tail,
                    );
                    event.success_count = p.success_count;
                    event.failure_count = p.failure_count;
                    self.progress.publish(event);
                })
                .await
        };

        self.advance(&mut session, SessionStatus::Saving, "Recording results");
        for (item, written) in items.iter().zip(&outcome.written) {
            if written.is_some() {
                let recorded = session.record_success(item.index);
                self.checked(&mut session, recorded)?;
            }
        }
        for failure in &outcome.failures {
            let recorded = session.record_failure(failure.index, failure.reason.clone());
            self.checked(&mut session, recorded)?;
        }

        let summary = format!(
            "Saved {}/{} images to {}",
            session.success_count(),
            items.len(),
            writer.dir().display()
        );
        session.log("done", summary.clone());
        self.advance(&mut session, SessionStatus::Done, &summary);

        Ok(CaptureReport {
            session_id: session.id().to_string(),
            url: url.to_string(),
            series_name: title.series_name,
            chapter_label: title.chapter_label,
            folder: writer.dir().to_path_buf(),
            profile,
            total: items.len(),
            success_count: session.success_count(),
            failures: session.failures().to_vec(),
            files: outcome.written,
            status: session.status(),
        })
    }
}
