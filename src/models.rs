use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of one capture run
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Idle,
    Scanning,
    Capturing,
    Saving,
    Done,
    Failed,
}

impl SessionStatus {
    /// Position in the forward-only lifecycle. Done and Failed share the last slot.
    pub fn rank(self) -> u8 {
        match self {
            SessionStatus::Idle => 0,
            SessionStatus::Scanning => 1,
            SessionStatus::Capturing => 2,
            SessionStatus::Saving => 3,
            SessionStatus::Done | SessionStatus::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Done | SessionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Scanning => "scanning",
            SessionStatus::Capturing => "capturing",
            SessionStatus::Saving => "saving",
            SessionStatus::Done => "done",
            SessionStatus::Failed => "failed",
        }
    }
}

/// Image file types the library accepts
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ImageExtension {
    Jpg,
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl ImageExtension {
    /// Used when neither the URL nor the response says what the image is
    pub const FALLBACK: ImageExtension = ImageExtension::Webp;

    pub fn as_str(self) -> &'static str {
        match self {
            ImageExtension::Jpg => "jpg",
            ImageExtension::Jpeg => "jpeg",
            ImageExtension::Png => "png",
            ImageExtension::Webp => "webp",
            ImageExtension::Gif => "gif",
        }
    }

    pub fn parse(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" => Some(ImageExtension::Jpg),
            "jpeg" => Some(ImageExtension::Jpeg),
            "png" => Some(ImageExtension::Png),
            "webp" => Some(ImageExtension::Webp),
            "gif" => Some(ImageExtension::Gif),
            _ => None,
        }
    }

    /// Infer from the last path segment of a URL, ignoring query and fragment
    pub fn from_url(url: &str) -> Option<Self> {
        let path = match reqwest::Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        };
        let segment = path.rsplit('/').next()?;
        let (_, ext) = segment.rsplit_once('.')?;
        Self::parse(ext)
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("webp") {
            Some(ImageExtension::Webp)
        } else if ct.contains("png") {
            Some(ImageExtension::Png)
        } else if ct.contains("gif") {
            Some(ImageExtension::Gif)
        } else if ct.contains("jpeg") || ct.contains("jpg") {
            Some(ImageExtension::Jpg)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ImageExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page image of a chapter. The index fixes the output file name.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub index: usize,
    pub url: String,
    pub extension: ImageExtension,
}

impl ImageRef {
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        let url = url.into();
        let extension = ImageExtension::from_url(&url).unwrap_or(ImageExtension::FALLBACK);
        Self {
            index,
            url,
            extension,
        }
    }

    /// `001`, `002`, ... wider only past 999 pages
    pub fn file_stem(&self) -> String {
        Self::stem_for(self.index)
    }

    /// File stem for the zero-based `index`
    pub fn stem_for(index: usize) -> String {
        format!("{:03}", index + 1)
    }
}

/// An image element provisionally identified as chapter content
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub url: String,
    /// Selector that produced the candidate, `None` for the size fallback
    pub selector: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Raw bytes for one image plus what the producer said about them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl CapturedImage {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            bytes,
            content_type,
        }
    }
}

/// Series and chapter folder names derived from a page title
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChapterTitle {
    pub series_name: String,
    pub chapter_label: String,
}

/// What the page looked like after lazy content was forced to load
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub html: String,
    /// Natural image sizes keyed by resolved URL, when the target can measure them
    #[serde(default)]
    pub image_sizes: HashMap<String, (u32, u32)>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub tag: String,
    pub message: String,
    pub time: DateTime<Utc>,
}

/// State snapshot pushed to observers on transitions and progress ticks
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProgressEvent {
    pub session_id: String,
    pub target: String,
    pub status: SessionStatus,
    pub message: String,
    pub current: Option<usize>,
    pub total: Option<usize>,
    pub success_count: usize,
    pub failure_count: usize,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Running,
    Done { success: usize, failures: usize },
    Failed { reason: String },
    Skipped,
}

/// One chapter of a multi-chapter batch
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChapterQueueItem {
    pub url: String,
    pub selected: bool,
    pub result_status: QueueItemStatus,
}

impl ChapterQueueItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            selected: true,
            result_status: QueueItemStatus::Pending,
        }
    }
}
