//! Ordering of search results before they are returned to the client.
//!
//! The strategy is picked once at startup from [`RankingMode`]; handlers only
//! ever see an `Arc<dyn Ranker>`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RuntimeSettings;
use crate::gemini::{GeminiClient, ModelClient};
use crate::search::SearchResult;

pub trait Ranker: Send + Sync {
    fn name(&self) -> &'static str;
    fn rank(&self, results: Vec<SearchResult>) -> Vec<SearchResult>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    Off,
    #[default]
    Popularity,
    Model,
}

impl RankingMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "disabled" | "false" => Some(Self::Off),
            "popularity" | "views" | "popular" => Some(Self::Popularity),
            "model" | "gemini" | "llm" => Some(Self::Model),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Popularity => "popularity",
            Self::Model => "model",
        }
    }
}

impl FromStr for RankingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
            .ok_or_else(|| format!("unknown ranking mode {value:?} (expected off, popularity or model)"))
    }
}

/// Builds the ranker for `settings.ranking`.
///
/// Model ranking needs an API key; without one we log and use popularity.
pub fn ranker_from_settings(settings: &RuntimeSettings) -> Arc<dyn Ranker> {
    match settings.ranking {
        RankingMode::Off => Arc::new(Unranked),
        RankingMode::Popularity => Arc::new(PopularitySort),
        RankingMode::Model => match &settings.gemini_api_key {
            Some(key) => Arc::new(ExternalModelRank::new(GeminiClient::new(
                key.clone(),
                settings.gemini_model.clone(),
                settings.http_timeout,
            ))),
            None => {
                warn!("GEMINI_API_KEY not set, model ranking disabled; using popularity");
                Arc::new(PopularitySort)
            }
        },
    }
}

/// Leaves results in scrape order.
pub struct Unranked;

impl Ranker for Unranked {
    fn name(&self) -> &'static str {
        "off"
    }

    fn rank(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        info!("ranking disabled, returning results unchanged");
        results
    }
}

/// Most viewed first. Results without a readable view count sort last.
pub struct PopularitySort;

impl Ranker for PopularitySort {
    fn name(&self) -> &'static str {
        "popularity"
    }

    fn rank(&self, mut results: Vec<SearchResult>) -> Vec<SearchResult> {
        results.sort_by_key(|result| std::cmp::Reverse(popularity(result)));
        info!(count = results.len(), "results sorted by popularity");
        results
    }
}

/// Numeric view count parsed from text such as `"1,234,567 views"`.
pub fn popularity(result: &SearchResult) -> u64 {
    result
        .views
        .as_deref()
        .and_then(|views| {
            let cleaned = views.replace(',', "");
            let cleaned = cleaned.trim();
            let cleaned = cleaned
                .strip_suffix(" views")
                .or_else(|| cleaned.strip_suffix(" view"))
                .unwrap_or(cleaned);
            cleaned.trim().parse::<u64>().ok()
        })
        .unwrap_or(0)
}

/// Asks a language model to score each result and sorts by that score.
///
/// Results are ordered by ascending `relevance_score`, the opposite direction
/// of [`PopularitySort`]. Only the score and safety rating are taken from the
/// reply; every other field stays as scraped. Any failure returns the input
/// untouched.
pub struct ExternalModelRank<C> {
    client: C,
}

impl<C: ModelClient> ExternalModelRank<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    fn try_rank(&self, results: &[SearchResult]) -> Result<Vec<SearchResult>> {
        let prompt = build_prompt(results)?;
        let reply = self.client.generate(&prompt)?;
        let verdicts = parse_model_reply(&reply, results)?;
        let mut ranked: Vec<SearchResult> = results
            .iter()
            .cloned()
            .map(|mut result| {
                if let Some(verdict) = verdicts.get(&result.id) {
                    result.relevance_score = verdict.relevance_score;
                    result.safety_rating = verdict.safety_rating.clone();
                }
                result
            })
            .collect();
        ranked.sort_by(|a, b| compare_scores(a.relevance_score, b.relevance_score));
        Ok(ranked)
    }
}

impl<C: ModelClient> Ranker for ExternalModelRank<C> {
    fn name(&self) -> &'static str {
        "model"
    }

    fn rank(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        if results.is_empty() {
            return results;
        }
        match self.try_rank(&results) {
            Ok(ranked) => {
                info!(count = ranked.len(), "results ranked by model");
                ranked
            }
            Err(err) => {
                warn!(error = %err, "model ranking failed, returning results unranked");
                results
            }
        }
    }
}

fn compare_scores(a: Option<f64>, b: Option<f64>) -> Ordering {
    a.unwrap_or(0.0).total_cmp(&b.unwrap_or(0.0))
}

fn build_prompt(results: &[SearchResult]) -> Result<String> {
    let payload = serde_json::to_string_pretty(results).context("serializing results")?;
    Ok(format!(
        "You are reviewing YouTube search results.\n\
         For every object in the JSON array below add two fields:\n\
         - \"relevance_score\": a number from 0 to 10 for how useful the video is\n\
         - \"safety_rating\": one of \"safe\", \"caution\" or \"unsafe\"\n\
         Keep every existing field unchanged and keep the same number of objects.\n\
         Reply with the JSON array only.\n\n{payload}"
    ))
}

/// What the model adds to one result.
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    id: String,
    #[serde(default)]
    relevance_score: Option<f64>,
    #[serde(default)]
    safety_rating: Option<String>,
}

/// Parses the model reply, tolerating a surrounding Markdown code fence.
///
/// The reply must cover exactly the ids that were sent.
fn parse_model_reply(
    reply: &str,
    results: &[SearchResult],
) -> Result<HashMap<String, ModelVerdict>> {
    let body = strip_code_fence(reply);
    let verdicts: Vec<ModelVerdict> =
        serde_json::from_str(body).context("model reply is not a result array")?;
    if verdicts.len() != results.len() {
        bail!(
            "model returned {} results, expected {}",
            verdicts.len(),
            results.len()
        );
    }

    let sent: HashSet<&str> = results.iter().map(|result| result.id.as_str()).collect();
    let mut by_id = HashMap::with_capacity(verdicts.len());
    for verdict in verdicts {
        if !sent.contains(verdict.id.as_str()) {
            bail!("model returned unknown id {:?}", verdict.id);
        }
        by_id.insert(verdict.id.clone(), verdict);
    }
    if by_id.len() != sent.len() {
        bail!("model reply covers {} of {} ids", by_id.len(), sent.len());
    }
    Ok(by_id)
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the optional language tag on the opening fence.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
