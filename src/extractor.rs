//! yt-dlp integration for the download endpoint.
//!
//! yt-dlp does the heavy lifting of turning a watch page into format records;
//! [`resolve_download_url`] is the boundary where its failures are collapsed
//! into a single "no usable format" outcome.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::formats::{FormatRecord, select_format_url};

const YOUTUBE_ORIGIN: &str = "https://www.youtube.com";
const VIDEO_ID_LEN: usize = 11;
/// How long one `--dump-single-json` run may take before it is killed.
pub const DEFAULT_YTDLP_TIMEOUT: Duration = Duration::from_secs(60);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Nothing fetchable was found, including every upstream failure.
    #[error("no usable format found")]
    NoUsableFormat,
    #[error("unsupported video url: {0}")]
    InvalidVideoUrl(String),
}

/// Produces the format list for a video page.
pub trait FormatSource: Send + Sync {
    fn fetch_formats(&self, video_url: &str) -> Result<Vec<FormatRecord>>;
}

/// Runs `yt-dlp --dump-single-json` and reads its `formats` array.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: PathBuf,
    cookies: Option<PathBuf>,
    timeout: Duration,
}

/// The part of yt-dlp's info JSON we care about.
#[derive(Deserialize)]
struct InfoJson {
    #[serde(default)]
    formats: Option<Vec<FormatRecord>>,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<PathBuf>, cookies: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cookies,
            timeout: DEFAULT_YTDLP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The cookies file, if one is configured and present on disk.
    fn cookies_file(&self) -> Option<&Path> {
        let cookies = self.cookies.as_deref()?;
        if cookies.exists() {
            Some(cookies)
        } else {
            warn!(path = %cookies.display(), "cookies file not found, running yt-dlp without it");
            None
        }
    }

    fn command(&self, video_url: &str) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-progress");
        if let Some(cookies) = self.cookies_file() {
            command.arg("--cookies").arg(cookies);
        }
        command
            .arg("--")
            .arg(video_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    /// Runs yt-dlp and kills it once `self.timeout` has passed.
    fn run(&self, video_url: &str) -> Result<Output> {
        let mut child = self
            .command(video_url)
            .spawn()
            .with_context(|| format!("launching {} for {video_url}", self.binary.display()))?;

        // Both pipes are drained while we wait; the info JSON easily exceeds
        // the pipe buffer.
        let stdout = drain_pipe(child.stdout.take());
        let stderr = drain_pipe(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait().context("waiting for yt-dlp")? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                error!(
                    url = video_url,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "yt-dlp timed out, killed"
                );
                bail!(
                    "yt-dlp timed out after {:.1}s for {}",
                    self.timeout.as_secs_f64(),
                    video_url
                );
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        };

        Ok(Output {
            status,
            stdout: collect_pipe(stdout)?,
            stderr: collect_pipe(stderr)?,
        })
    }
}

fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect_pipe(handle: JoinHandle<io::Result<Vec<u8>>>) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow!("yt-dlp output reader panicked"))?
        .context("reading yt-dlp output")
}

impl FormatSource for YtDlpExtractor {
    fn fetch_formats(&self, video_url: &str) -> Result<Vec<FormatRecord>> {
        let output = self.run(video_url)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "yt-dlp failed for {} (status {}): {}",
                video_url,
                output.status,
                stderr.trim()
            );
        }

        parse_formats(&output.stdout)
    }
}

/// Reads the `formats` array out of a `--dump-single-json` payload.
pub fn parse_formats(raw: &[u8]) -> Result<Vec<FormatRecord>> {
    let info: InfoJson = serde_json::from_slice(raw).context("parsing yt-dlp metadata response")?;
    Ok(info.formats.unwrap_or_default())
}

/// Resolves `video_url` into one direct media URL at `quality`.
///
/// Extractor errors are logged here and reported as
/// [`ResolveError::NoUsableFormat`], so callers only ever see one failure kind.
pub fn resolve_download_url(
    source: &dyn FormatSource,
    video_url: &str,
    quality: &str,
) -> Result<String, ResolveError> {
    info!(url = video_url, quality, "extracting formats");
    let formats = match source.fetch_formats(video_url) {
        Ok(formats) => formats,
        Err(err) => {
            let detail = format!("{err:#}");
            error!(url = video_url, quality, error = %detail, "format extraction failed");
            return Err(ResolveError::NoUsableFormat);
        }
    };

    if formats.is_empty() {
        error!(url = video_url, quality, "no formats found");
        return Err(ResolveError::NoUsableFormat);
    }

    match select_format_url(&formats, Some(quality)) {
        Some(url) => Ok(url.to_string()),
        None => {
            error!(url = video_url, quality, "no format with a retrievable url");
            Err(ResolveError::NoUsableFormat)
        }
    }
}

/// Turns what a client sends into a full watch URL.
///
/// Accepts absolute http(s) URLs, site-relative paths such as `/watch?v=..`
/// (what the search endpoint returns), and bare 11-character video ids.
pub fn normalize_video_url(input: &str) -> Result<String, ResolveError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ResolveError::InvalidVideoUrl(input.to_string()));
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("https://") || lower.starts_with("http://") {
        return Ok(trimmed.to_string());
    }
    if trimmed.starts_with('/') && !trimmed.starts_with("//") {
        return Ok(format!("{YOUTUBE_ORIGIN}{trimmed}"));
    }
    if is_video_id(trimmed) {
        return Ok(format!("{YOUTUBE_ORIGIN}/watch?v={trimmed}"));
    }

    Err(ResolveError::InvalidVideoUrl(trimmed.to_string()))
}

fn is_video_id(value: &str) -> bool {
    value.len() == VIDEO_ID_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
