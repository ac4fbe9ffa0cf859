#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::gemini::DEFAULT_GEMINI_MODEL;
use crate::ranking::RankingMode;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_TUBEGRAB_PORT: u16 = 8080;
pub const DEFAULT_TUBEGRAB_HOST: &str = "127.0.0.1";
pub const DEFAULT_WWW_ROOT: &str = "www";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_SEARCH_LIMIT: usize = 15;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_YTDLP_TIMEOUT_SECS: u64 = 60;

/// Everything the binaries need at startup, after `.env`, the environment and
/// command-line overrides have been merged.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub host: String,
    pub port: u16,
    pub www_root: PathBuf,
    pub ranking: RankingMode,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub ytdlp_bin: PathBuf,
    pub ytdlp_cookies: Option<PathBuf>,
    pub ytdlp_timeout: Duration,
    pub search_limit: usize,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub www_root: Option<PathBuf>,
    pub ranking: Option<RankingMode>,
    pub search_limit: Option<usize>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_settings_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> RuntimeSettings {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeSettings {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("TUBEGRAB_HOST"))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TUBEGRAB_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("TUBEGRAB_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_TUBEGRAB_PORT);
    let www_root = overrides
        .www_root
        .or_else(|| lookup("WWW_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WWW_ROOT));
    let ranking = overrides
        .ranking
        .or_else(|| lookup("TUBEGRAB_RANKING").and_then(|value| RankingMode::parse(&value)))
        .unwrap_or_default();
    let gemini_api_key = lookup("GEMINI_API_KEY").filter(|value| !value.trim().is_empty());
    let gemini_model = lookup("GEMINI_MODEL")
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
    let ytdlp_bin = lookup("YTDLP_BIN")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));
    let ytdlp_cookies = lookup("YTDLP_COOKIES").map(PathBuf::from);
    let ytdlp_timeout = lookup("YTDLP_TIMEOUT_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_YTDLP_TIMEOUT_SECS);
    let search_limit = overrides
        .search_limit
        .or_else(|| {
            lookup("TUBEGRAB_SEARCH_LIMIT").and_then(|value| value.parse::<usize>().ok())
        })
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_SEARCH_LIMIT);
    let http_timeout = lookup("TUBEGRAB_HTTP_TIMEOUT_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

    RuntimeSettings {
        host,
        port,
        www_root,
        ranking,
        gemini_api_key,
        gemini_model,
        ytdlp_bin,
        ytdlp_cookies,
        ytdlp_timeout: Duration::from_secs(ytdlp_timeout),
        search_limit,
        http_timeout: Duration::from_secs(http_timeout),
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Parses a dotenv-style file. A missing file yields an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> RuntimeSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_settings(&vars, |_| None)
    }

    #[test]
    fn defaults_apply_to_empty_file() {
        let settings = settings_from("");
        assert_eq!(settings.host, DEFAULT_TUBEGRAB_HOST);
        assert_eq!(settings.port, DEFAULT_TUBEGRAB_PORT);
        assert_eq!(settings.www_root, PathBuf::from(DEFAULT_WWW_ROOT));
        assert_eq!(settings.ranking, RankingMode::Popularity);
        assert_eq!(settings.gemini_api_key, None);
        assert_eq!(settings.gemini_model, DEFAULT_GEMINI_MODEL);
        assert_eq!(settings.ytdlp_bin, PathBuf::from(DEFAULT_YTDLP_BIN));
        assert_eq!(settings.ytdlp_cookies, None);
        assert_eq!(
            settings.ytdlp_timeout,
            Duration::from_secs(DEFAULT_YTDLP_TIMEOUT_SECS)
        );
        assert_eq!(settings.search_limit, DEFAULT_SEARCH_LIMIT);
        assert_eq!(
            settings.http_timeout,
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)
        );
    }

    #[test]
    fn reads_values_from_file() {
        let settings = settings_from(
            "TUBEGRAB_HOST=\"0.0.0.0\"\nTUBEGRAB_PORT=\"5000\"\nWWW_ROOT=\"/srv/www\"\n\
             TUBEGRAB_RANKING=\"model\"\nGEMINI_API_KEY=\"secret\"\nGEMINI_MODEL=\"gemini-2.0-flash\"\n\
             YTDLP_BIN=\"/opt/yt-dlp\"\nYTDLP_COOKIES=\"/srv/cookies.txt\"\nYTDLP_TIMEOUT_SECS=\"90\"\n\
             TUBEGRAB_SEARCH_LIMIT=\"5\"\nTUBEGRAB_HTTP_TIMEOUT_SECS=\"3\"\n",
        );
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.www_root, PathBuf::from("/srv/www"));
        assert_eq!(settings.ranking, RankingMode::Model);
        assert_eq!(settings.gemini_api_key.as_deref(), Some("secret"));
        assert_eq!(settings.gemini_model, "gemini-2.0-flash");
        assert_eq!(settings.ytdlp_bin, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(
            settings.ytdlp_cookies,
            Some(PathBuf::from("/srv/cookies.txt"))
        );
        assert_eq!(settings.ytdlp_timeout, Duration::from_secs(90));
        assert_eq!(settings.search_limit, 5);
        assert_eq!(settings.http_timeout, Duration::from_secs(3));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let settings = settings_from(
            "TUBEGRAB_PORT=\"nope\"\nTUBEGRAB_SEARCH_LIMIT=\"0\"\nTUBEGRAB_HTTP_TIMEOUT_SECS=\"-1\"\nYTDLP_TIMEOUT_SECS=\"0\"\nTUBEGRAB_RANKING=\"loud\"\n",
        );
        assert_eq!(settings.port, DEFAULT_TUBEGRAB_PORT);
        assert_eq!(settings.search_limit, DEFAULT_SEARCH_LIMIT);
        assert_eq!(
            settings.http_timeout,
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)
        );
        assert_eq!(
            settings.ytdlp_timeout,
            Duration::from_secs(DEFAULT_YTDLP_TIMEOUT_SECS)
        );
        assert_eq!(settings.ranking, RankingMode::Popularity);
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_config("TUBEGRAB_PORT=\"7000\"\n").path()).unwrap();
        let settings = build_runtime_settings(&vars, |key| {
            if key == "TUBEGRAB_PORT" {
                Some("9000".to_string())
            } else {
                None
            }
        });
        assert_eq!(settings.port, 9000);
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("TUBEGRAB_HOST".to_string(), "file-host".to_string());
        vars.insert("TUBEGRAB_PORT".to_string(), "7000".to_string());
        vars.insert("WWW_ROOT".to_string(), "/file-www".to_string());
        vars.insert("TUBEGRAB_RANKING".to_string(), "model".to_string());

        let overrides = RuntimeOverrides {
            host: Some("override-host".into()),
            port: Some(9100),
            www_root: None,
            ranking: Some(RankingMode::Off),
            search_limit: Some(3),
            env_path: None,
        };

        let settings = build_runtime_settings_with_overrides(
            &vars,
            |key| {
                if key == "WWW_ROOT" {
                    Some("/env-www".to_string())
                } else if key == "TUBEGRAB_PORT" {
                    Some("8000".to_string())
                } else {
                    None
                }
            },
            overrides,
        );

        assert_eq!(settings.host, "override-host");
        assert_eq!(settings.port, 9100);
        assert_eq!(settings.www_root, PathBuf::from("/env-www"));
        assert_eq!(settings.ranking, RankingMode::Off);
        assert_eq!(settings.search_limit, 3);
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let settings = build_runtime_settings_with_overrides(
            &HashMap::new(),
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        );
        assert_eq!(settings.host, DEFAULT_TUBEGRAB_HOST);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let settings = settings_from("GEMINI_API_KEY=\"  \"\n");
        assert_eq!(settings.gemini_api_key, None);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export TUBEGRAB_HOST="0.0.0.0"
            WWW_ROOT='/www'
            GEMINI_MODEL =  "gemini-1.5-pro"
            TUBEGRAB_PORT=9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("TUBEGRAB_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("WWW_ROOT").unwrap(), "/www");
        assert_eq!(vars.get("GEMINI_MODEL").unwrap(), "gemini-1.5-pro");
        assert_eq!(vars.get("TUBEGRAB_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn explicit_env_path_is_read() -> Result<()> {
        let cfg = make_config("TUBEGRAB_SEARCH_LIMIT=\"4\"\nTUBEGRAB_PORT=\"6060\"\n");
        let overrides = RuntimeOverrides {
            env_path: Some(cfg.path().to_path_buf()),
            ..RuntimeOverrides::default()
        };
        let env_path = overrides.env_path.clone().unwrap_or_default();
        let settings =
            build_runtime_settings_with_overrides(&read_env_file(&env_path)?, |_| None, overrides);
        assert_eq!(settings.search_limit, 4);
        assert_eq!(settings.port, 6060);

        // The public entry point reads the same file and must not fail.
        resolve_runtime_settings(RuntimeOverrides {
            env_path: Some(cfg.path().to_path_buf()),
            ..RuntimeOverrides::default()
        })?;
        Ok(())
    }
}
