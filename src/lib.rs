#![forbid(unsafe_code)]

//! Shared building blocks for the tubegrab binaries: YouTube search scraping,
//! result ranking, and resolving a watch page into a direct media URL.

pub mod config;
pub mod extractor;
pub mod formats;
pub mod gemini;
pub mod logging;
pub mod ranking;
pub mod search;
