// Library interface for chapter_grabber
// The control server in main.rs and the integration tests both build on these modules

pub mod batch;
pub mod browser;
pub mod capture;
pub mod config;
pub mod discovery;
pub mod error;
pub mod http_client;
pub mod locator;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod target;
pub mod title;
