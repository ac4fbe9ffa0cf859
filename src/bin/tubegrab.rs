#![forbid(unsafe_code)]

//! Command-line front end to the same search, ranking and format selection
//! the backend serves over HTTP.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tubegrab::{
    config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings},
    extractor::{YtDlpExtractor, normalize_video_url, resolve_download_url},
    formats::DEFAULT_QUALITY_LABEL,
    gemini::{GeminiClient, ModelClient},
    logging,
    ranking::{RankingMode, ranker_from_settings},
    search::{SearchResult, SearchSource, YoutubeScraper},
};

const CHECK_MODEL_PROMPT: &str = "Say 'Hello, World!'";

#[derive(Debug, Parser)]
#[command(version, about = "Search YouTube and resolve direct media links")]
struct Cli {
    /// Dotenv file to read settings from.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search YouTube and print the results.
    Search {
        /// Words to search for.
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Maximum number of results (overrides TUBEGRAB_SEARCH_LIMIT).
        #[arg(long)]
        limit: Option<usize>,
        /// Ranking strategy (overrides TUBEGRAB_RANKING).
        #[arg(long)]
        rank: Option<RankingMode>,
    },
    /// Print the direct media URL for a video.
    Resolve {
        /// Watch URL, `/watch?v=..` path or bare video id.
        url: String,
        /// Desired quality label such as `720p`.
        #[arg(long, default_value = DEFAULT_QUALITY_LABEL)]
        quality: String,
    },
    /// Send a test prompt to the configured Gemini model.
    CheckModel,
}

impl Cli {
    fn overrides(&self) -> RuntimeOverrides {
        let mut overrides = RuntimeOverrides {
            env_path: self.env_file.clone(),
            ..RuntimeOverrides::default()
        };
        if let Command::Search { limit, rank, .. } = &self.command {
            overrides.search_limit = *limit;
            overrides.ranking = *rank;
        }
        overrides
    }
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let settings = resolve_runtime_settings(cli.overrides())?;

    match cli.command {
        Command::Search { query, .. } => {
            let query = query.join(" ");
            let results = run_search(&settings, &query)?;
            print!("{}", format_results(&results));
        }
        Command::Resolve { url, quality } => {
            let video_url = normalize_video_url(&url)?;
            let extractor =
                YtDlpExtractor::new(settings.ytdlp_bin.clone(), settings.ytdlp_cookies.clone())
                    .with_timeout(settings.ytdlp_timeout);
            let direct = resolve_download_url(&extractor, &video_url, &quality)
                .with_context(|| format!("resolving {video_url} at {quality}"))?;
            println!("{direct}");
        }
        Command::CheckModel => check_model(&settings)?,
    }
    Ok(())
}

fn run_search(settings: &RuntimeSettings, query: &str) -> Result<Vec<SearchResult>> {
    let scraper = YoutubeScraper::new(settings.http_timeout, settings.search_limit);
    let results = scraper.search(query)?;
    let ranker = ranker_from_settings(settings);
    info!(count = results.len(), ranker = ranker.name(), "ranking results");
    Ok(ranker.rank(results))
}

fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results.\n".to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(index, result)| {
            let mut line = format!("{}. {} ({})", index + 1, result.title, result.url);
            if let Some(channel) = &result.channel {
                line.push_str(&format!(" by {channel}"));
            }
            if let Some(views) = &result.views {
                line.push_str(&format!(" [{views}]"));
            }
            line.push('\n');
            line
        })
        .collect()
}

fn check_model(settings: &RuntimeSettings) -> Result<()> {
    let Some(api_key) = settings.gemini_api_key.as_deref() else {
        bail!("GEMINI_API_KEY is not set");
    };
    let client = GeminiClient::new(
        api_key,
        settings.gemini_model.clone(),
        settings.http_timeout,
    );
    let reply = client
        .generate(CHECK_MODEL_PROMPT)
        .with_context(|| format!("calling {}", client.model()))?;
    info!(model = client.model(), "model responded");
    println!("{}", reply.trim());
    Ok(())
}
