//! Headless Chrome capture target
//!
//! Chapter pages are loaded in a real browser so lazy loaders run, rendered
//! images can be copied back out of a canvas and image responses can be
//! recorded off the wire.
//!
//! # Example
//!
//! ```no_run
//! use chapter_grabber::browser::{BrowserConfig, BrowserManager};
//! use chapter_grabber::locator::ScrollPlan;
//! use chapter_grabber::target::CaptureTarget;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = BrowserManager::new(BrowserConfig::default())?;
//! let page = manager.new_page()?;
//!
//! page.load("https://example.com/series/chapter-1").await?;
//! page.scroll_through(&ScrollPlan::default()).await?;
//! let snapshot = page.snapshot().await?;
//!
//! println!("{} bytes of HTML, {} measured images", snapshot.html.len(), snapshot.image_sizes.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod manager;
pub mod page;

pub use config::BrowserConfig;
pub use manager::{BrowserError, BrowserManager};
pub use page::BrowserPage;
