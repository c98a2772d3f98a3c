use std::time::Duration;

use crate::{
    config_db::ConfigDb,
    error::{Error, Result},
    fusion::{DEFAULT_RRF_K, FusionConfig, RetrievalStrategy},
};

/// Prefix of the environment variables that override stored settings.
pub const ENV_PREFIX: &str = "DOCROUTE_";

/// Every setting key, in display order.
pub const KEYS: &[&str] = &[
    "rrf_k",
    "top_k",
    "min_score",
    "default_collection",
    "deadline_ms",
    "degrade_gracefully",
    "strategy",
];

/// Runtime settings for routing and retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub rrf_k: f64,
    pub top_k: usize,
    pub min_score: f64,
    pub default_collection: String,
    /// Deadline for each collaborator call.
    pub deadline: Duration,
    pub degrade_gracefully: bool,
    pub strategy: RetrievalStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            top_k: 10,
            min_score: 0.01,
            default_collection: "default".to_string(),
            deadline: Duration::from_secs(10),
            degrade_gracefully: false,
            strategy: RetrievalStrategy::HybridRrf,
        }
    }
}

impl Settings {
    /// Resolve settings from, in order of increasing priority:
    /// 1. Built-in defaults
    /// 2. Values stored with `docroute settings set`
    /// 3. `DOCROUTE_*` environment variables (`DOCROUTE_TOP_K`, ...)
    pub fn resolve(config_db: &ConfigDb) -> Result<Self> {
        Self::layered(
            |key| config_db.get_setting(key),
            |key| std::env::var(env_name(key)).ok(),
        )
    }

    /// Layer stored values and then environment values over the defaults.
    pub fn layered(
        stored: impl Fn(&str) -> Result<Option<String>>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut settings = Self::default();

        for key in KEYS {
            if let Some(value) = stored(key)? {
                settings.set(key, &value)?;
            }
        }
        for key in KEYS {
            if let Some(value) = env(key) {
                settings.set(key, &value)?;
            }
        }

        Ok(settings)
    }

    /// Parse and apply a single value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "rrf_k" => {
                let k: f64 = parse(key, value)?;
                if !(k.is_finite() && k > 0.0) {
                    return Err(invalid(key, value, "must be positive"));
                }
                self.rrf_k = k;
            }
            "top_k" => {
                let top_k: usize = parse(key, value)?;
                if top_k == 0 {
                    return Err(invalid(key, value, "must be at least 1"));
                }
                self.top_k = top_k;
            }
            "min_score" => {
                let min: f64 = parse(key, value)?;
                if !(min.is_finite() && min >= 0.0) {
                    return Err(invalid(key, value, "must not be negative"));
                }
                self.min_score = min;
            }
            "default_collection" => {
                if value.is_empty() {
                    return Err(invalid(key, value, "must not be empty"));
                }
                self.default_collection = value.to_string();
            }
            "deadline_ms" => {
                let ms: u64 = parse(key, value)?;
                if ms == 0 {
                    return Err(invalid(key, value, "must be at least 1"));
                }
                self.deadline = Duration::from_millis(ms);
            }
            "degrade_gracefully" => {
                self.degrade_gracefully = parse_bool(value).ok_or_else(|| {
                    invalid(key, value, "expected true or false")
                })?;
            }
            "strategy" => {
                self.strategy = value
                    .parse::<RetrievalStrategy>()
                    .map_err(|e| invalid(key, value, &e))?;
            }
            _ => {
                return Err(Error::Config(format!(
                    "unknown setting '{key}' (known: {})",
                    KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Key and display value of every setting.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("rrf_k", self.rrf_k.to_string()),
            ("top_k", self.top_k.to_string()),
            ("min_score", self.min_score.to_string()),
            ("default_collection", self.default_collection.clone()),
            ("deadline_ms", self.deadline.as_millis().to_string()),
            ("degrade_gracefully", self.degrade_gracefully.to_string()),
            ("strategy", self.strategy.to_string()),
        ]
    }

    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            rrf_k: self.rrf_k,
            deadline: self.deadline,
            degrade_gracefully: self.degrade_gracefully,
            strategy: self.strategy,
        }
    }
}

/// Environment variable for a setting key.
pub fn env_name(key: &str) -> String {
    format!("{ENV_PREFIX}{}", key.to_ascii_uppercase())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| invalid(key, value, "not a valid number"))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> Error {
    Error::Config(format!("invalid value '{value}' for {key}: {reason}"))
}
