//! Runtime configuration: TOML file + environment overrides + built-in seed.
//!
//! Load order: `$NEWSFUSE_CONFIG_PATH` > `config/newsfuse.toml` > built-in
//! seed. Env overrides are applied after file parsing. Validation runs once
//! at startup; any problem is a fatal `ConfigError` there and only there.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::ConfigError;

pub const ENV_CONFIG_PATH: &str = "NEWSFUSE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/newsfuse.toml";

const ENV_TIMEZONE: &str = "NEWSFUSE_TIMEZONE";
const ENV_WEBHOOK_URL: &str = "NEWSFUSE_WEBHOOK_URL";
const ENV_SIMILARITY_THRESHOLD: &str = "NEWSFUSE_SIMILARITY_THRESHOLD";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// IANA timezone used for the logical day key and wall-clock triggers.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Bind address for the HTTP read surface.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Source list in priority order: first entry wins canonical-field ties.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub push: PushConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    pub url: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Newswire,
    Rss,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Pairwise similarity at or above this groups two items. (0, 1].
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// How long past expiry an entry is still servable-but-stale.
    #[serde(default = "default_stale_window_secs")]
    pub stale_window_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            stale_window_secs: default_stale_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Per-adapter fetch budget; a slow source is failed, not waited for.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// "remote" calls the configured endpoint first; "lexicon" skips it.
    #[serde(default = "default_classifier_mode")]
    pub mode: String,
    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_classifier_model")]
    pub model: String,
    /// Name of the env var holding the API key; the key itself never lives
    /// in the config file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_classify_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_classify_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mode: default_classifier_mode(),
            endpoint: default_classifier_endpoint(),
            model: default_classifier_model(),
            api_key_env: default_api_key_env(),
            batch_size: default_classify_batch_size(),
            timeout_secs: default_classify_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Wall-clock push times, "%H:%M" in the configured timezone.
    #[serde(default = "default_push_times")]
    pub push_times: Vec<String>,
    /// Periodic cache-warm interval. Warms only; never pushes.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Warm the cache once right after startup.
    #[serde(default = "default_true")]
    pub warm_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            push_times: default_push_times(),
            refresh_interval_secs: default_refresh_interval_secs(),
            warm_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushConfig {
    /// Webhook endpoint for the text-card channel. Absent = channel off.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_user: String,
    /// Env var holding the SMTP password.
    #[serde(default = "default_smtp_pass_env")]
    pub pass_env: String,
    pub from: String,
    pub to: String,
}

fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_similarity_threshold() -> f64 {
    0.60
}
fn default_ttl_secs() -> u64 {
    1800
}
fn default_stale_window_secs() -> u64 {
    3600
}
fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_classifier_mode() -> String {
    "lexicon".to_string()
}
fn default_classifier_endpoint() -> String {
    "https://open.bigmodel.cn/api/paas/v4/chat/completions".to_string()
}
fn default_classifier_model() -> String {
    "glm-4-flash".to_string()
}
fn default_api_key_env() -> String {
    "GLM4_API_KEY".to_string()
}
fn default_classify_batch_size() -> usize {
    20
}
fn default_classify_timeout_secs() -> u64 {
    20
}
fn default_push_times() -> Vec<String> {
    vec!["10:00".to_string(), "15:30".to_string()]
}
fn default_refresh_interval_secs() -> u64 {
    3600
}
fn default_true() -> bool {
    true
}
fn default_smtp_pass_env() -> String {
    "SMTP_PASS".to_string()
}

impl AppConfig {
    /// Load using env path override, then the default path, then the seed.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(ConfigError::new(format!(
                    "{ENV_CONFIG_PATH} points to non-existent path {}",
                    pb.display()
                )));
            }
            return Self::load_from(&pb);
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        let mut cfg = Self::default_seed();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::new(format!("reading {}: {e}", path.display())))?;
        let mut cfg: AppConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::new(format!("parsing {}: {e}", path.display())))?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Built-in seed mirroring the flash-news feeds the service started with.
    /// Used when no config file is present.
    pub fn default_seed() -> Self {
        Self {
            timezone: default_timezone(),
            bind_addr: default_bind_addr(),
            sources: vec![
                SourceConfig {
                    id: "jin10".into(),
                    kind: SourceKind::Newswire,
                    url: "https://newsnow.busiyi.world/api/s?id=jin10".into(),
                    display_name: Some("Jin10".into()),
                },
                SourceConfig {
                    id: "cls-telegraph".into(),
                    kind: SourceKind::Newswire,
                    url: "https://newsnow.busiyi.world/api/s?id=cls-telegraph".into(),
                    display_name: Some("CLS Telegraph".into()),
                },
                SourceConfig {
                    id: "wallstreetcn".into(),
                    kind: SourceKind::Newswire,
                    url: "https://newsnow.busiyi.world/api/s?id=wallstreetcn-hot".into(),
                    display_name: Some("WallStreetCN".into()),
                },
            ],
            dedup: DedupConfig::default(),
            cache: CacheConfig::default(),
            aggregation: AggregationConfig::default(),
            classifier: ClassifierConfig::default(),
            schedule: ScheduleConfig::default(),
            push: PushConfig::default(),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(tz) = std::env::var(ENV_TIMEZONE) {
            self.timezone = tz;
        }
        if let Ok(url) = std::env::var(ENV_WEBHOOK_URL) {
            if !url.trim().is_empty() {
                self.push.webhook_url = Some(url);
            }
        }
        if let Ok(t) = std::env::var(ENV_SIMILARITY_THRESHOLD) {
            let v: f64 = t.parse().map_err(|_| {
                ConfigError::new(format!("{ENV_SIMILARITY_THRESHOLD} is not a number: {t}"))
            })?;
            self.dedup.similarity_threshold = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;

        if self.sources.is_empty() {
            return Err(ConfigError::new("sources list is empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for s in &self.sources {
            if s.id.trim().is_empty() {
                return Err(ConfigError::new("source with empty id"));
            }
            if s.url.trim().is_empty() {
                return Err(ConfigError::new(format!("source {} has empty url", s.id)));
            }
            if !seen.insert(s.id.as_str()) {
                return Err(ConfigError::new(format!("duplicate source id {}", s.id)));
            }
        }

        let t = self.dedup.similarity_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(ConfigError::new(format!(
                "dedup.similarity_threshold out of (0, 1]: {t}"
            )));
        }

        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::new("cache.ttl_secs must be positive"));
        }
        if self.cache.stale_window_secs < self.cache.ttl_secs {
            return Err(ConfigError::new(
                "cache.stale_window_secs must be >= cache.ttl_secs (it is measured from store time)",
            ));
        }
        if self.aggregation.fetch_timeout_secs == 0 {
            return Err(ConfigError::new(
                "aggregation.fetch_timeout_secs must be positive",
            ));
        }

        match self.classifier.mode.as_str() {
            "remote" | "lexicon" => {}
            other => {
                return Err(ConfigError::new(format!(
                    "classifier.mode must be \"remote\" or \"lexicon\", got {other:?}"
                )))
            }
        }
        if self.classifier.batch_size == 0 {
            return Err(ConfigError::new("classifier.batch_size must be positive"));
        }
        if self.classifier.mode == "remote" {
            let key = std::env::var(&self.classifier.api_key_env).unwrap_or_default();
            if key.trim().is_empty() {
                return Err(ConfigError::new(format!(
                    "classifier.mode is \"remote\" but ${} is not set",
                    self.classifier.api_key_env
                )));
            }
        }

        for t in &self.schedule.push_times {
            parse_push_time(t)?;
        }
        if self.schedule.refresh_interval_secs == 0 {
            return Err(ConfigError::new(
                "schedule.refresh_interval_secs must be positive",
            ));
        }

        if self.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::new(format!(
                "bind_addr is not host:port: {}",
                self.bind_addr
            )));
        }

        if let Some(email) = &self.push.email {
            for (field, v) in [
                ("smtp_host", &email.smtp_host),
                ("smtp_user", &email.smtp_user),
                ("from", &email.from),
                ("to", &email.to),
            ] {
                if v.trim().is_empty() {
                    return Err(ConfigError::new(format!("push.email.{field} is empty")));
                }
            }
        }

        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::new(format!("unknown timezone {:?}", self.timezone)))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.aggregation.fetch_timeout_secs)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn stale_window(&self) -> Duration {
        Duration::from_secs(self.cache.stale_window_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.refresh_interval_secs)
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier.timeout_secs)
    }

    /// Push times parsed to `NaiveTime`; entries were validated at startup.
    pub fn push_times(&self) -> Vec<NaiveTime> {
        self.schedule
            .push_times
            .iter()
            .filter_map(|t| parse_push_time(t).ok())
            .collect()
    }

    /// Source ids in priority order (list order; first wins ties).
    pub fn source_order(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id.clone()).collect()
    }

    pub fn display_name(&self, source_id: &str) -> String {
        self.sources
            .iter()
            .find(|s| s.id == source_id)
            .and_then(|s| s.display_name.clone())
            .unwrap_or_else(|| source_id.to_string())
    }
}

fn parse_push_time(s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| ConfigError::new(format!("push time not HH:MM: {s:?}")))
}

/// Logical cache key: the calendar day in the configured timezone.
pub fn logical_day_key(tz: Tz, now: DateTime<Utc>) -> String {
    now.with_timezone(&tz).format("%Y-%m-%d").to_string()
}
