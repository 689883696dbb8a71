//! Page title parsing
//!
//! Turns a reader page's `<title>` into the series and chapter folder names
//! used by the library, e.g. `"Solo Leveling - Chapter 3 | Site"` becomes
//! `Solo Leveling` / `Chapter 003`.

use crate::models::ChapterTitle;
use regex::Regex;
use std::sync::OnceLock;

pub const UNKNOWN_SERIES: &str = "Unknown Manga";
pub const DEFAULT_CHAPTER_LABEL: &str = "Chapter 001";

const FALLBACK_TITLE_CHARS: usize = 50;

/// Characters that cannot appear in a folder name on common filesystems
const FORBIDDEN: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

fn chapter_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)(.+?)\s*[-–—]\s*chapter\s*(\d+(?:\.\d+)?)",
            r"(?i)(.+?)\s*chapter\s*(\d+(?:\.\d+)?)",
            r"(?i)(.+?)\s*ch\.?\s*(\d+(?:\.\d+)?)",
            r"(?i)(.+?)\s*[-–—]\s*episode\s*(\d+(?:\.\d+)?)",
            r"(.+?)\s*#(\d+(?:\.\d+)?)",
            r"(.+?)\s*(\d+(?:\.\d+)?)\s*$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn series_suffixes() -> &'static [Regex] {
    static SUFFIXES: OnceLock<Vec<Regex>> = OnceLock::new();
    SUFFIXES.get_or_init(|| {
        [r"\s*[-–—]\s*$", r"(?i)\s+Read\s+Online.*$", r"(?i)\s+Manga.*$"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Remove characters that are illegal in paths and trim the result
pub fn sanitize_path_component(s: &str) -> String {
    s.replace(FORBIDDEN, "").trim().to_string()
}

/// Zero-pad a chapter number so lexical order matches numeric order.
///
/// Integers get three digits (`3` -> `003`), fractional numbers keep one
/// decimal and are padded to five characters (`12.5` -> `012.5`).
pub fn format_chapter_number(raw: &str) -> Option<String> {
    let value: f64 = raw.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value.fract() == 0.0 {
        Some(format!("{:03}", value as u64))
    } else {
        Some(format!("{:05.1}", value))
    }
}

fn clean_series_name(name: &str) -> String {
    let mut cleaned = name.trim().to_string();
    for suffix in series_suffixes() {
        cleaned = suffix.replace(&cleaned, "").to_string();
    }
    cleaned.trim().to_string()
}

/// Parse a raw page title into series and chapter names.
///
/// The first matching pattern wins. Titles with no recognizable chapter number
/// keep their first 50 characters as the series name and get `Chapter 001`.
pub fn parse_title(raw_title: &str) -> ChapterTitle {
    let mut title = sanitize_path_component(raw_title);
    if title.is_empty() {
        title = UNKNOWN_SERIES.to_string();
    }

    for pattern in chapter_patterns() {
        let Some(caps) = pattern.captures(&title) else {
            continue;
        };
        let (Some(name), Some(number)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let Some(formatted) = format_chapter_number(number.as_str()) else {
            continue;
        };

        let mut series_name = clean_series_name(name.as_str());
        if series_name.is_empty() {
            series_name = UNKNOWN_SERIES.to_string();
        }

        return ChapterTitle {
            series_name,
            chapter_label: format!("Chapter {}", formatted),
        };
    }

    let truncated: String = title.chars().take(FALLBACK_TITLE_CHARS).collect();
    let series_name = truncated.trim().to_string();
    ChapterTitle {
        series_name: if series_name.is_empty() {
            UNKNOWN_SERIES.to_string()
        } else {
            series_name
        },
        chapter_label: DEFAULT_CHAPTER_LABEL.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(raw: &str) -> (String, String) {
        let t = parse_title(raw);
        (t.series_name, t.chapter_label)
    }

    #[test]
    fn test_dash_chapter_pattern() {
        assert_eq!(
            parsed("Solo Leveling - Chapter 3"),
            ("Solo Leveling".to_string(), "Chapter 003".to_string())
        );
        assert_eq!(
            parsed("Solo Leveling – chapter 45"),
            ("Solo Leveling".to_string(), "Chapter 045".to_string())
        );
    }

    #[test]
    fn test_ch_and_hash_patterns() {
        assert_eq!(
            parsed("Tower of God Ch. 12"),
            ("Tower of God".to_string(), "Chapter 012".to_string())
        );
        assert_eq!(
            parsed("Berserk #7"),
            ("Berserk".to_string(), "Chapter 007".to_string())
        );
    }

    #[test]
    fn test_episode_and_trailing_number() {
        assert_eq!(
            parsed("Lore Olympus - Episode 101"),
            ("Lore Olympus".to_string(), "Chapter 101".to_string())
        );
        assert_eq!(
            parsed("One Piece 1090"),
            ("One Piece".to_string(), "Chapter 1090".to_string())
        );
    }

    #[test]
    fn test_fractional_chapter_is_distinct() {
        let (_, label) = parsed("Blue Lock Chapter 12.5");
        assert_eq!(label, "Chapter 012.5");
        assert_ne!(label, "Chapter 012");
    }

    #[test]
    fn test_site_suffixes_removed() {
        assert_eq!(
            parsed("Kingdom Manga Online - Chapter 700").0,
            "Kingdom"
        );
        assert_eq!(
            parsed("Vinland Saga Read Online Free Chapter 5").0,
            "Vinland Saga"
        );
    }

    #[test]
    fn test_forbidden_characters_stripped() {
        let (series, label) = parsed("Re:Zero / Part <3> - Chapter 4");
        assert_eq!(series, "ReZero  Part 3");
        assert_eq!(label, "Chapter 004");
    }

    #[test]
    fn test_unmatched_title_falls_back() {
        let long = "A very long page title without any digits that keeps going on and on";
        let t = parse_title(long);
        assert_eq!(t.chapter_label, DEFAULT_CHAPTER_LABEL);
        assert_eq!(t.series_name.chars().count(), 50);
        assert!(long.starts_with(&t.series_name));
    }

    #[test]
    fn test_empty_title() {
        let t = parse_title("   ");
        assert_eq!(t.series_name, UNKNOWN_SERIES);
        assert_eq!(t.chapter_label, DEFAULT_CHAPTER_LABEL);
    }

    #[test]
    fn test_idempotent_on_own_output() {
        for raw in [
            "Solo Leveling - Chapter 3",
            "Blue Lock Chapter 12.5",
            "Tower of God Ch. 120",
            "Berserk #7",
        ] {
            let first = parse_title(raw);
            let rebuilt = format!("{} - {}", first.series_name, first.chapter_label);
            let second = parse_title(&rebuilt);
            assert_eq!(first, second, "title {:?} was not stable", raw);
        }
    }

    #[test]
    fn test_format_chapter_number() {
        assert_eq!(format_chapter_number("3").as_deref(), Some("003"));
        assert_eq!(format_chapter_number("012").as_deref(), Some("012"));
        assert_eq!(format_chapter_number("12.5").as_deref(), Some("012.5"));
        assert_eq!(format_chapter_number("abc"), None);
    }
}
