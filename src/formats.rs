//! Format selection for the download endpoint.
//!
//! yt-dlp reports every encoding variant of a video as a separate format
//! record. The selector below turns that list plus a human quality label
//! ("720p", "1080p", ...) into exactly one direct URL.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Target height used when a quality label carries no digits.
pub const DEFAULT_TARGET_HEIGHT: u32 = 720;
/// Quality label assumed when the caller does not send one.
pub const DEFAULT_QUALITY_LABEL: &str = "720p";
/// Only muxed files in this container are considered playable candidates.
pub const REQUIRED_CONTAINER: &str = "mp4";

const NO_STREAM_CODEC: &str = "none";

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digit pattern compiles"));

/// One encoding variant of a video, as found in yt-dlp's `formats` array.
///
/// Every field is optional because yt-dlp omits or nulls whatever a given
/// extractor could not determine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, rename = "vcodec", skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, rename = "acodec", skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(default, rename = "ext", skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl FormatRecord {
    /// Height in pixels, treating `0` like a missing value.
    pub fn pixel_height(&self) -> Option<u32> {
        self.height.filter(|height| *height > 0)
    }

    /// Direct URL, treating an empty string like a missing value.
    pub fn direct_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !url.is_empty())
    }

    pub fn has_video(&self) -> bool {
        carries_stream(self.video_codec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        carries_stream(self.audio_codec.as_deref())
    }

    /// A record is a candidate when it is a muxed audio+video mp4 with a
    /// known height and a URL we can redirect to.
    pub fn is_usable_candidate(&self) -> bool {
        self.has_video()
            && self.has_audio()
            && self.extension.as_deref() == Some(REQUIRED_CONTAINER)
            && self.pixel_height().is_some()
            && self.direct_url().is_some()
    }

    fn label(&self) -> &str {
        self.format_id.as_deref().unwrap_or("?")
    }
}

fn carries_stream(codec: Option<&str>) -> bool {
    codec.is_some_and(|codec| !codec.is_empty() && !codec.eq_ignore_ascii_case(NO_STREAM_CODEC))
}

/// Extracts the target height from the first run of digits in `label`.
///
/// `"1080p"` gives 1080, `"4k"` gives 4. Labels without digits (or digit runs
/// too large for a `u32`) fall back to [`DEFAULT_TARGET_HEIGHT`].
pub fn target_height(label: Option<&str>) -> u32 {
    label
        .and_then(|label| DIGIT_RUN.find(label))
        .and_then(|digits| digits.as_str().parse::<u32>().ok())
        .unwrap_or(DEFAULT_TARGET_HEIGHT)
}

/// Picks the direct URL that best matches `quality` from `formats`.
///
/// Policy: the tallest usable candidate whose height does not exceed the
/// target wins. When every candidate is taller than the target, the smallest
/// one is returned. Without any usable candidate the first record that has a
/// URL at all is returned, and `None` means nothing in the list is fetchable.
pub fn select_format_url<'a>(formats: &'a [FormatRecord], quality: Option<&str>) -> Option<&'a str> {
    let target = target_height(quality);

    let mut candidates: Vec<&FormatRecord> = formats
        .iter()
        .filter(|format| format.is_usable_candidate())
        .collect();
    // Stable sort: equal heights keep their original relative order.
    candidates.sort_by(|a, b| b.pixel_height().cmp(&a.pixel_height()));

    if let Some(best) = candidates
        .iter()
        .find(|format| format.pixel_height().is_some_and(|height| height <= target))
    {
        info!(
            format_id = best.label(),
            height = best.pixel_height(),
            target,
            "selected format at or below target"
        );
        return best.direct_url();
    }

    if let Some(smallest) = candidates.last() {
        info!(
            format_id = smallest.label(),
            height = smallest.pixel_height(),
            target,
            "every candidate exceeds target, falling back to lowest available"
        );
        return smallest.direct_url();
    }

    if let Some(any) = formats.iter().find(|format| format.direct_url().is_some()) {
        warn!(
            format_id = any.label(),
            "no muxed mp4 candidate, falling back to first format with a url"
        );
        return any.direct_url();
    }

    error!(target, total = formats.len(), "no suitable format found");
    None
}
