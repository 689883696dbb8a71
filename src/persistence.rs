//! Library layout on disk
//!
//! Chapters live at `{library}/{series}/{chapter}/{001}.{ext}`. Files are
//! written under a `.part` name and renamed once complete, so a crash never
//! leaves a truncated image under a final name.

use crate::error::CaptureError;
use crate::models::{ImageExtension, ImageRef};
use crate::title::sanitize_path_component;
use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};

const PART_SUFFIX: &str = "part";

/// Destination for captured images
#[async_trait]
pub trait ImageSink: Send + Sync {
    /// Store the image for `index` and return where it ended up
    async fn persist(
        &self,
        index: usize,
        bytes: &[u8],
        extension: ImageExtension,
    ) -> Result<PathBuf, CaptureError>;
}

/// Writes one chapter folder
#[derive(Debug, Clone)]
pub struct ChapterWriter {
    dir: PathBuf,
}

impl ChapterWriter {
    pub fn new(library: &Path, series_name: &str, chapter_label: &str) -> Self {
        Self {
            dir: library
                .join(folder_name(series_name))
                .join(folder_name(chapter_label)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn folder_name(raw: &str) -> String {
    let clean = sanitize_path_component(raw);
    // "." and ".." would escape the library
    if clean.is_empty() || clean.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        clean
    }
}

/// `001.jpg`, then `001 (1).jpg`, `001 (2).jpg`, ... for names already taken
async fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{}.{}", stem, ext));
    if !tokio::fs::try_exists(&first).await.unwrap_or(false) {
        return first;
    }
    let mut n = 1usize;
    loop {
        let candidate = dir.join(format!("{} ({}).{}", stem, n, ext));
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

#[async_trait]
impl ImageSink for ChapterWriter {
    async fn persist(
        &self,
        index: usize,
        bytes: &[u8],
        extension: ImageExtension,
    ) -> Result<PathBuf, CaptureError> {
        let persist_err = |e: io::Error| CaptureError::Persist(e.to_string());

        tokio::fs::create_dir_all(&self.dir).await.map_err(persist_err)?;

        let stem = ImageRef::stem_for(index);
        let tmp_path = self
            .dir
            .join(format!("{}.{}.{}", stem, extension.as_str(), PART_SUFFIX));
        if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(persist_err(e));
        }

        let final_path = unique_path(&self.dir, &stem, extension.as_str()).await;
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(persist_err(e));
        }

        log::debug!("Saved {}", final_path.display());
        Ok(final_path)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChapterEntry {
    pub name: String,
    pub pages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SeriesEntry {
    pub name: String,
    pub chapter_count: usize,
    /// First page of the first chapter
    pub thumbnail: Option<PathBuf>,
    pub chapters: Vec<ChapterEntry>,
}

/// First number in a name, e.g. `12.5` for `Chapter 012.5`
fn leading_number(name: &str) -> Option<f64> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let digits: String = name[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.trim_end_matches('.').parse().ok()
}

/// Numbers first in numeric order, ties and number-less names by text
fn numeric_order(a: &str, b: &str) -> Ordering {
    match (leading_number(a), leading_number(b)) {
        (Some(x), Some(y)) => x
            .partial_cmp(&y)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

fn sub_dirs(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            out.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
        }
    }
    Ok(out)
}

fn is_page_file(name: &str) -> bool {
    name.rsplit_once('.')
        .and_then(|(_, ext)| ImageExtension::parse(ext))
        .is_some()
}

/// Enumerate the library as series, chapters and pages.
///
/// A missing library is empty rather than an error. Series folders without
/// any chapter folder are left out.
pub fn read_tree(root: &Path) -> io::Result<Vec<SeriesEntry>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut series_dirs = sub_dirs(root)?;
    series_dirs.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));

    let mut library = Vec::with_capacity(series_dirs.len());
    for (series_name, series_path) in series_dirs {
        let mut chapter_dirs = sub_dirs(&series_path)?;
        if chapter_dirs.is_empty() {
            continue;
        }
        chapter_dirs.sort_by(|a, b| numeric_order(&a.0, &b.0));
        let first_chapter = chapter_dirs[0].1.clone();

        let mut chapters = Vec::with_capacity(chapter_dirs.len());
        for (chapter_name, chapter_path) in chapter_dirs {
            let mut pages: Vec<String> = std::fs::read_dir(&chapter_path)?
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|name| is_page_file(name))
                .collect();
            pages.sort_by(|a, b| numeric_order(a, b));
            chapters.push(ChapterEntry {
                name: chapter_name,
                pages,
            });
        }

        let thumbnail = chapters
            .first()
            .and_then(|c| c.pages.first())
            .map(|page| first_chapter.join(page));
        library.push(SeriesEntry {
            name: series_name,
            chapter_count: chapters.len(),
            thumbnail,
            chapters,
        });
    }

    Ok(library)
}
