use crate::domain::AreaCodes;
use crate::sync::{FeaturedImagePolicy, ReconcilePolicy};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.apimo.pro";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Provider/token/agency triple. Sync is only enabled when all three are set.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub provider: String,
    pub token: String,
    pub agency: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("provider", &self.provider)
            .field("token", &"<redacted>")
            .field("agency", &self.agency)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub page_limit: usize,
    pub request_timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_limit: 100,
            request_timeout: Duration::from_secs(60),
            accept_invalid_certs: false,
        }
    }
}

/// Everything one sync process needs, built once at startup and handed to the driver.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub credentials: Option<Credentials>,
    pub api: ApiConfig,
    pub policy: ReconcilePolicy,
    pub area_codes: AreaCodes,
    pub max_page_attempts: u32,
    pub retry_backoff: Duration,
    pub lock_ttl: chrono::Duration,
    pub database_path: PathBuf,
    pub taxonomy_path: PathBuf,
    pub media_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            api: ApiConfig::default(),
            policy: ReconcilePolicy::default(),
            area_codes: AreaCodes::default(),
            max_page_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            lock_ttl: chrono::Duration::hours(6),
            database_path: PathBuf::from("listings.sqlite3"),
            taxonomy_path: PathBuf::from("config/mappings.json"),
            media_dir: PathBuf::from("media"),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        cfg.credentials = match (get("APIMO_PROVIDER"), get("APIMO_TOKEN"), get("APIMO_AGENCY")) {
            (Some(provider), Some(token), Some(agency)) => Some(Credentials {
                provider,
                token,
                agency,
            }),
            _ => None,
        };

        if let Some(v) = get("APIMO_BASE_URL") {
            cfg.api.base_url = v;
        }
        if let Some(v) = get("APIMO_PAGE_LIMIT") {
            cfg.api.page_limit = parse_num("APIMO_PAGE_LIMIT", &v)?;
            if cfg.api.page_limit == 0 {
                return Err(invalid("APIMO_PAGE_LIMIT", "must be greater than zero"));
            }
        }
        if let Some(v) = get("APIMO_TIMEOUT_SECS") {
            cfg.api.request_timeout = Duration::from_secs(parse_num("APIMO_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("APIMO_ACCEPT_INVALID_CERTS") {
            cfg.api.accept_invalid_certs = parse_bool("APIMO_ACCEPT_INVALID_CERTS", &v)?;
        }

        if let Some(v) = get("SYNC_FRESHNESS_DAYS") {
            cfg.policy.freshness_window =
                chrono::Duration::days(parse_num("SYNC_FRESHNESS_DAYS", &v)?);
        }
        if let Some(v) = get("SYNC_SITE_LANGUAGE") {
            cfg.policy.site_language = v;
        }
        if let Some(v) = get("SYNC_FALLBACK_AUTHOR_ID") {
            cfg.policy.fallback_author_id = parse_num("SYNC_FALLBACK_AUTHOR_ID", &v)?;
        }
        if let Some(v) = get("SYNC_INITIAL_STATUS") {
            cfg.policy.initial_status = v;
        }
        if let Some(v) = get("SYNC_FEATURED_IMAGE") {
            cfg.policy.featured_image = match v.as_str() {
                "first" | "first-encountered" => FeaturedImagePolicy::FirstEncountered,
                "lowest-rank" => FeaturedImagePolicy::LowestRank,
                other => {
                    return Err(invalid(
                        "SYNC_FEATURED_IMAGE",
                        format!("expected first-encountered or lowest-rank, got {other}"),
                    ))
                }
            };
        }

        if let Some(v) = get("SYNC_BEDROOM_AREA_TYPES") {
            cfg.area_codes.bedroom = parse_codes("SYNC_BEDROOM_AREA_TYPES", &v)?;
        }
        if let Some(v) = get("SYNC_BATHROOM_AREA_TYPES") {
            cfg.area_codes.bathroom = parse_codes("SYNC_BATHROOM_AREA_TYPES", &v)?;
        }

        if let Some(v) = get("SYNC_MAX_PAGE_ATTEMPTS") {
            cfg.max_page_attempts = parse_num::<u32>("SYNC_MAX_PAGE_ATTEMPTS", &v)?.max(1);
        }
        if let Some(v) = get("SYNC_RETRY_BACKOFF_SECS") {
            cfg.retry_backoff = Duration::from_secs(parse_num("SYNC_RETRY_BACKOFF_SECS", &v)?);
        }
        if let Some(v) = get("SYNC_LOCK_TTL_MINUTES") {
            cfg.lock_ttl = chrono::Duration::minutes(parse_num("SYNC_LOCK_TTL_MINUTES", &v)?);
        }

        if let Some(v) = get("SYNC_DATABASE_PATH") {
            cfg.database_path = PathBuf::from(v);
        }
        if let Some(v) = get("SYNC_TAXONOMY_PATH") {
            cfg.taxonomy_path = PathBuf::from(v);
        }
        if let Some(v) = get("SYNC_MEDIA_DIR") {
            cfg.media_dir = PathBuf::from(v);
        }

        Ok(cfg)
    }

    /// Key for the pass guard; two agencies may sync into one store independently.
    pub fn job_key(&self, operation: &str) -> String {
        match &self.credentials {
            Some(c) => format!("{operation}:{}", c.agency),
            None => operation.to_string(),
        }
    }
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}

fn parse_num<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| invalid(key, e.to_string()))
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(key, format!("not a boolean: {other}"))),
    }
}

fn parse_codes(key: &'static str, value: &str) -> Result<Vec<i64>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_num(key, s))
        .collect()
}
