//! Capture session bookkeeping
//!
//! A [`CaptureSession`] is owned by the pipeline run that created it and
//! records status, item outcomes and an append-only event log.
//! [`SessionRegistry`] makes sure only one session per chapter URL is active,
//! and [`ProgressHub`] fans snapshots out to whoever is listening.

use crate::discovery::normalize_url;
use crate::error::SessionError;
use crate::models::{ChapterTitle, ImageRef, ItemFailure, LogEntry, ProgressEvent, SessionStatus};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const DEFAULT_LOG_TAIL: usize = 20;

#[derive(Debug, Clone)]
pub struct CaptureSession {
    id: String,
    target: String,
    status: SessionStatus,
    items: Vec<ImageRef>,
    title: Option<ChapterTitle>,
    success_count: usize,
    failures: Vec<ItemFailure>,
    recorded: HashSet<usize>,
    event_log: Vec<LogEntry>,
}

impl CaptureSession {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target: target.into(),
            status: SessionStatus::Idle,
            items: Vec::new(),
            title: None,
            success_count: 0,
            failures: Vec::new(),
            recorded: HashSet::new(),
            event_log: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn items(&self) -> &[ImageRef] {
        &self.items
    }

    pub fn title(&self) -> Option<&ChapterTitle> {
        self.title.as_ref()
    }

    pub fn success_count(&self) -> usize {
        self.success_count
    }

    pub fn failures(&self) -> &[ItemFailure] {
        &self.failures
    }

    /// Fix the chapter's name and image order. Allowed once.
    pub fn assign_scan(&mut self, title: ChapterTitle, items: Vec<ImageRef>) -> Result<(), SessionError> {
        if self.title.is_some() {
            return Err(SessionError::AlreadyScanned);
        }
        self.title = Some(title);
        self.items = items;
        Ok(())
    }

    /// Move forward in the lifecycle. Stages may be skipped, never revisited.
    pub fn transition(&mut self, to: SessionStatus) -> Result<(), SessionError> {
        let from = self.status;
        let allowed = !from.is_terminal() && (to == SessionStatus::Failed || to.rank() > from.rank());
        if !allowed {
            return Err(SessionError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        self.log("status", format!("{} -> {}", from.as_str(), to.as_str()));
        Ok(())
    }

    fn claim_outcome(&mut self, index: usize) -> Result<(), SessionError> {
        if !self.items.iter().any(|i| i.index == index) {
            return Err(SessionError::UnknownItem(index));
        }
        if !self.recorded.insert(index) {
            return Err(SessionError::DuplicateOutcome(index));
        }
        Ok(())
    }

    pub fn record_success(&mut self, index: usize) -> Result<(), SessionError> {
        self.claim_outcome(index)?;
        self.success_count += 1;
        Ok(())
    }

    pub fn record_failure(&mut self, index: usize, reason: impl Into<String>) -> Result<(), SessionError> {
        self.claim_outcome(index)?;
        self.failures.push(ItemFailure {
            index,
            reason: reason.into(),
        });
        Ok(())
    }

    pub fn log(&mut self, tag: &str, message: impl Into<String>) {
        let message = message.into();
        log::info!("[{}] {}: {}", self.target, tag, message);
        self.event_log.push(LogEntry {
            tag: tag.to_string(),
            message,
            time: Utc::now(),
        });
    }

    /// Last `k` log entries, oldest first
    pub fn tail(&self, k: usize) -> Vec<LogEntry> {
        let start = self.event_log.len().saturating_sub(k);
        self.event_log[start..].to_vec()
    }

    pub fn event(
        &self,
        message: impl Into<String>,
        current: Option<usize>,
        total: Option<usize>,
        log_tail: usize,
    ) -> ProgressEvent {
        ProgressEvent {
            session_id: self.id.clone(),
            target: self.target.clone(),
            status: self.status,
            message: message.into(),
            current,
            total,
            success_count: self.success_count,
            failure_count: self.failures.len(),
            logs: self.tail(log_tail),
        }
    }
}

/// Targets with a capture in flight
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `target`. The claim lasts as long as the returned guard.
    ///
    /// Spellings of one URL that differ only by fragment or trailing slash
    /// share a claim.
    pub fn begin(&self, target: &str) -> Result<SessionGuard, SessionError> {
        let key = normalize_url(target);
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(key.clone()) {
            return Err(SessionError::AlreadyActive(target.to_string()));
        }
        Ok(SessionGuard {
            active: self.active.clone(),
            target: key,
        })
    }

    pub fn is_active(&self, target: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&normalize_url(target))
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[derive(Debug)]
pub struct SessionGuard {
    active: Arc<Mutex<HashSet<String>>>,
    target: String,
}

impl SessionGuard {
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.target);
    }
}

/// Best-effort progress fan-out.
///
/// Slow subscribers lag and lose events instead of blocking the capture.
/// The last event per target is kept for polling.
#[derive(Debug, Clone)]
pub struct ProgressHub {
    sender: broadcast::Sender<ProgressEvent>,
    latest: Arc<Mutex<HashMap<String, ProgressEvent>>>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            latest: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn publish(&self, event: ProgressEvent) {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event.target.clone(), event.clone());
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn latest(&self, target: &str) -> Option<ProgressEvent> {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(target)
            .cloned()
    }

    pub fn all_latest(&self) -> Vec<ProgressEvent> {
        let mut events: Vec<ProgressEvent> = self
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        events.sort_by(|a, b| a.target.cmp(&b.target));
        events
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(256)
    }
}
