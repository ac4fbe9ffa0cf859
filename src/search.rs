//! Keyword search by scraping YouTube's results page.
//!
//! The results page ships its initial state as a JSON blob assigned to
//! `var ytInitialData` inside an inline `<script>`. We locate that script, parse
//! the blob and walk down to the `videoRenderer` entries.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

pub const SEARCH_URL: &str = "https://www.youtube.com/results";
const INITIAL_DATA_MARKER: &str = "var ytInitialData = ";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const SECTIONS_POINTER: &str =
    "/contents/twoColumnSearchResultsRenderer/primaryContents/sectionListRenderer/contents";

/// A single video entry from a search results page.
///
/// `relevance_score` and `safety_rating` are only filled in by the model
/// ranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_rating: Option<String>,
}

impl SearchResult {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: title.into(),
            url: format!("/watch?v={id}"),
            id,
            views: None,
            channel: None,
            duration: None,
            thumbnail: None,
            relevance_score: None,
            safety_rating: None,
        }
    }
}

/// Anything that can turn a query into search results.
pub trait SearchSource: Send + Sync {
    fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
}

/// Blocking scraper for `youtube.com/results`.
pub struct YoutubeScraper {
    agent: ureq::Agent,
    limit: usize,
}

impl YoutubeScraper {
    pub fn new(timeout: Duration, limit: usize) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build();
        Self { agent, limit }
    }
}

impl SearchSource for YoutubeScraper {
    fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        info!(query, "searching youtube");
        let html = self
            .agent
            .get(SEARCH_URL)
            .query("search_query", query)
            .call()
            .with_context(|| format!("requesting search results for {query:?}"))?
            .into_string()
            .context("reading search results page")?;
        let results = parse_search_page(&html, self.limit)?;
        info!(query, count = results.len(), "search finished");
        Ok(results)
    }
}

/// Extracts at most `limit` videos from a results page.
///
/// Fails when the page has no `ytInitialData` script or its JSON does not
/// parse. A blob without the expected renderer path yields no results.
pub fn parse_search_page(html: &str, limit: usize) -> Result<Vec<SearchResult>> {
    let data = extract_initial_data(html)?;
    let mut results = Vec::new();

    let sections = data
        .pointer(SECTIONS_POINTER)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let items = sections
        .iter()
        .filter_map(|section| section.pointer("/itemSectionRenderer/contents"))
        .filter_map(Value::as_array)
        .flatten();

    for item in items {
        if results.len() >= limit {
            break;
        }
        if let Some(result) = item.get("videoRenderer").and_then(parse_video_renderer) {
            results.push(result);
        }
    }

    Ok(results)
}

fn extract_initial_data(html: &str) -> Result<Value> {
    let document = Html::parse_document(html);
    let scripts = Selector::parse("script").map_err(|err| anyhow!("script selector: {err:?}"))?;

    for script in document.select(&scripts) {
        let text: String = script.text().collect();
        let Some((_, rest)) = text.split_once(INITIAL_DATA_MARKER) else {
            continue;
        };
        // The assignment is followed by `;` and sometimes more statements, so
        // only the first JSON value is read.
        let data = serde_json::Deserializer::from_str(rest)
            .into_iter::<Value>()
            .next()
            .ok_or_else(|| anyhow!("ytInitialData assignment is empty"))?
            .map_err(|err| {
                error!(%err, "failed to parse ytInitialData JSON");
                anyhow!("parsing ytInitialData: {err}")
            })?;
        return Ok(data);
    }

    error!("could not find ytInitialData, the page structure may have changed");
    Err(anyhow!("ytInitialData not found in search page"))
}

fn parse_video_renderer(video: &Value) -> Option<SearchResult> {
    let id = video.get("videoId")?.as_str()?;
    let title = video.pointer("/title/runs/0/text")?.as_str()?;
    if id.is_empty() || title.is_empty() {
        return None;
    }

    let mut result = SearchResult::new(id, title);
    result.views = text_field(video.get("viewCountText"));
    result.channel = text_field(video.get("ownerText"));
    result.duration = text_field(video.get("lengthText"));
    result.thumbnail = video
        .pointer("/thumbnail/thumbnails")
        .and_then(Value::as_array)
        .and_then(|thumbs| thumbs.last())
        .and_then(|thumb| thumb.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(result)
}

/// YouTube renders text either as `{"simpleText": ".."}` or as a list of runs.
fn text_field(value: Option<&Value>) -> Option<String> {
    let value = value?;
    if let Some(text) = value.get("simpleText").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let runs = value.get("runs")?.as_array()?;
    let joined: String = runs
        .iter()
        .filter_map(|run| run.get("text").and_then(Value::as_str))
        .collect();
    if joined.is_empty() { None } else { Some(joined) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn video(id: &str, title: &str) -> Value {
        json!({
            "videoRenderer": {
                "videoId": id,
                "title": { "runs": [ { "text": title } ] },
                "viewCountText": { "simpleText": "1,234 views" },
                "ownerText": { "runs": [ { "text": "Some " }, { "text": "Channel" } ] },
                "lengthText": { "simpleText": "3:05" },
                "thumbnail": { "thumbnails": [
                    { "url": "https://i.ytimg.com/small.jpg" },
                    { "url": "https://i.ytimg.com/large.jpg" }
                ] }
            }
        })
    }

    fn page(sections: Value) -> String {
        let data = json!({
            "contents": {
                "twoColumnSearchResultsRenderer": {
                    "primaryContents": {
                        "sectionListRenderer": { "contents": sections }
                    }
                }
            }
        });
        format!(
            "<html><head><script>var other = 1;</script></head><body>\
             <script nonce=\"abc\">var ytInitialData = {data};</script>\
             <script>window.foo = 2;</script></body></html>"
        )
    }

    #[test]
    fn parses_video_renderers() {
        let html = page(json!([
            { "itemSectionRenderer": { "contents": [
                video("abc123def45", "First"),
                { "shelfRenderer": {} },
                video("xyz987uvw65", "Second")
            ] } }
        ]));
        let results = parse_search_page(&html, 15).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "abc123def45");
        assert_eq!(results[0].title, "First");
        assert_eq!(results[0].url, "/watch?v=abc123def45");
        assert_eq!(results[0].views.as_deref(), Some("1,234 views"));
        assert_eq!(results[0].channel.as_deref(), Some("Some Channel"));
        assert_eq!(results[0].duration.as_deref(), Some("3:05"));
        assert_eq!(
            results[0].thumbnail.as_deref(),
            Some("https://i.ytimg.com/large.jpg")
        );
        assert_eq!(results[1].title, "Second");
    }

    #[test]
    fn stops_at_limit() {
        let items: Vec<Value> = (0..20)
            .map(|i| video(&format!("id{i:09}"), &format!("Video {i}")))
            .collect();
        let html = page(json!([{ "itemSectionRenderer": { "contents": items } }]));
        let results = parse_search_page(&html, 15).unwrap();
        assert_eq!(results.len(), 15);
        assert_eq!(results[14].title, "Video 14");
    }

    #[test]
    fn skips_entries_without_title_or_id() {
        let html = page(json!([{ "itemSectionRenderer": { "contents": [
            { "videoRenderer": { "videoId": "noTitle0000" } },
            { "videoRenderer": { "title": { "runs": [ { "text": "No id" } ] } } },
            video("ok000000000", "Ok")
        ] } }]));
        let results = parse_search_page(&html, 15).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "ok000000000");
    }

    #[test]
    fn walks_every_section() {
        let html = page(json!([
            { "itemSectionRenderer": { "contents": [ video("a0000000000", "A") ] } },
            { "continuationItemRenderer": {} },
            { "itemSectionRenderer": { "contents": [ video("b0000000000", "B") ] } }
        ]));
        let results = parse_search_page(&html, 15).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a0000000000", "b0000000000"]);
    }

    #[test]
    fn unexpected_structure_yields_empty_list() {
        let html = "<script>var ytInitialData = {\"contents\": {}};</script>";
        assert!(parse_search_page(html, 15).unwrap().is_empty());
    }

    #[test]
    fn missing_initial_data_is_an_error() {
        let err = parse_search_page("<html><script>var x = 1;</script></html>", 15).unwrap_err();
        assert!(err.to_string().contains("ytInitialData not found"));
    }

    #[test]
    fn broken_json_is_an_error() {
        let err = parse_search_page("<script>var ytInitialData = {broken;</script>", 15)
            .unwrap_err();
        assert!(err.to_string().contains("parsing ytInitialData"));
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let value = serde_json::to_value(SearchResult::new("abc", "Title")).unwrap();
        assert_eq!(
            value,
            json!({ "title": "Title", "url": "/watch?v=abc", "id": "abc" })
        );
    }
}
