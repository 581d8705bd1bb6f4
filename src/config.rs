//! Configuration for MarketRadar.
//!
//! Values come from the environment (a `.env` file is loaded first when present):
//! - `HOST` / `PORT` - Server bind address. Defaults to `0.0.0.0:8000`.
//! - `PUBLIC_WS_BASE` - Base used to build mission stream URLs. Defaults to `ws://localhost:{PORT}`.
//! - `CORS_ORIGINS` - Comma-separated browser origins allowed to call the API. Defaults to `*`.
//! - `BROWSER_HEADLESS` - Default headless flag. Defaults to `true`.
//! - `BROWSER_TIMEOUT_MS` - Default page timeout. Defaults to `30000`.
//! - `BROWSER_VIEWPORT_WIDTH` / `BROWSER_VIEWPORT_HEIGHT` - Defaults to `1920x1080`.
//! - `CHROME_PATH` - Optional. Chrome executable; auto-detected when unset.
//! - `AGENT_MAX_ITERATIONS` - Defaults to `100`.
//! - `AGENT_MIN_SOURCES` - Distinct sources needed before finishing. Defaults to `5`.
//! - `AGENT_LOOP_THRESHOLD` - Visits to one URL that count as a loop. Defaults to `3`.
//! - `AGENT_MIN_WORD_COUNT` - Words a page needs before extraction. Defaults to `100`.
//! - `AGENT_SEARCH_HOME` / `AGENT_SEARCH_RESULTS` - Search engine entry points.
//! - `AGENT_TRUSTED_DOMAINS` / `AGENT_SKIP_DOMAINS` - Comma-separated domain lists.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

const TRUSTED_DOMAINS: &[&str] = &[
    "wikipedia.org",
    "mercadolivre.com.br",
    "amazon.com.br",
    "magazineluiza.com.br",
    "americanas.com.br",
    "casasbahia.com.br",
    "extra.com.br",
    "submarino.com.br",
    "shoptime.com.br",
    "pontofrio.com.br",
    "buscape.com.br",
    "zoom.com.br",
    "compare.com.br",
    "preco.com.br",
    "google.com/shopping",
    "bing.com/shop",
];

const SKIP_DOMAINS: &[&str] = &[
    "google.com",
    "bing.com",
    "duckduckgo.com",
    "facebook.com",
    "twitter.com",
    "instagram.com",
];

/// Knobs for the decision engine.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_iterations: u32,
    pub min_sources: usize,
    pub loop_threshold: u32,
    /// A page must have strictly more words than this to be extracted.
    pub min_word_count: usize,
    pub search_home_url: String,
    /// Search results endpoint; the query goes into `q`.
    pub search_results_url: String,
    pub trusted_domains: Vec<String>,
    pub skip_domains: Vec<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            min_sources: 5,
            loop_threshold: 3,
            min_word_count: 100,
            search_home_url: "https://www.google.com".to_string(),
            search_results_url: "https://www.google.com/search".to_string(),
            trusted_domains: TRUSTED_DOMAINS.iter().map(|d| d.to_string()).collect(),
            skip_domains: SKIP_DOMAINS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// Browser launch options.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless: bool,
    pub timeout_ms: u64,
    pub viewport: (u32, u32),
    pub chrome_path: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_ms: 30_000,
            viewport: (1920, 1080),
            chrome_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub public_ws_base: String,
    /// Allowed CORS origins; `*` allows any origin.
    pub cors_origins: Vec<String>,
    pub browser: BrowserSettings,
    pub agent: AgentSettings,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup (useful for testing).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or(&lookup, "PORT", 8000)?;
        let public_ws_base = lookup("PUBLIC_WS_BASE")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("ws://localhost:{port}"));
        let cors_origins = lookup("CORS_ORIGINS")
            .map(|s| {
                split_list(&s)
                    .into_iter()
                    .map(|o| o.trim_end_matches('/').to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| vec!["*".to_string()]);

        let defaults = BrowserSettings::default();
        let browser = BrowserSettings {
            headless: parse_bool_or(&lookup, "BROWSER_HEADLESS", defaults.headless)?,
            timeout_ms: parse_or(&lookup, "BROWSER_TIMEOUT_MS", defaults.timeout_ms)?,
            viewport: (
                parse_or(&lookup, "BROWSER_VIEWPORT_WIDTH", defaults.viewport.0)?,
                parse_or(&lookup, "BROWSER_VIEWPORT_HEIGHT", defaults.viewport.1)?,
            ),
            chrome_path: lookup("CHROME_PATH").map(PathBuf::from),
        };

        let defaults = AgentSettings::default();
        let agent = AgentSettings {
            max_iterations: parse_or(&lookup, "AGENT_MAX_ITERATIONS", defaults.max_iterations)?,
            min_sources: parse_or(&lookup, "AGENT_MIN_SOURCES", defaults.min_sources)?,
            loop_threshold: parse_or(&lookup, "AGENT_LOOP_THRESHOLD", defaults.loop_threshold)?,
            min_word_count: parse_or(&lookup, "AGENT_MIN_WORD_COUNT", defaults.min_word_count)?,
            search_home_url: lookup("AGENT_SEARCH_HOME").unwrap_or(defaults.search_home_url),
            search_results_url: lookup("AGENT_SEARCH_RESULTS")
                .unwrap_or(defaults.search_results_url),
            trusted_domains: lookup("AGENT_TRUSTED_DOMAINS")
                .map(|s| split_list(&s))
                .unwrap_or(defaults.trusted_domains),
            skip_domains: lookup("AGENT_SKIP_DOMAINS")
                .map(|s| split_list(&s))
                .unwrap_or(defaults.skip_domains),
        };

        if agent.loop_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "AGENT_LOOP_THRESHOLD".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            host,
            port,
            public_ws_base,
            cors_origins,
            browser,
            agent,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{e}"))),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(key.to_string(), v)),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
