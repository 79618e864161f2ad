use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_GROQ_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_MAX_TOKENS: u32 = 800;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TOP_K: usize = 5;
const DEFAULT_CHAT_RATE_LIMIT_PER_MIN: u32 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct GentaxConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: String,
    pub groq: GroqConfig,
    pub storage: StorageConfig,
    pub knowledge: KnowledgeConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroqConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding every conversation.
    pub sessions_file: PathBuf,
    /// Directory holding `index.html` and the UI assets.
    pub static_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeConfig {
    pub dir: PathBuf,
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Per-IP quota for `/api/chat`; 0 disables the limiter.
    pub chat_per_min: u32,
    /// Key clients by the first `x-forwarded-for` hop instead of the peer
    /// address. Only enable behind a proxy that sets the header.
    pub trust_forwarded_for: bool,
}

impl GentaxConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_lookup(common_config, |key| env::var(key).ok())
    }

    /// Build the service settings from an arbitrary variable source.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string());
        let vars = Vars {
            lookup: &lookup,
            is_prod: environment == "prod",
        };

        Ok(GentaxConfig {
            common,
            groq: GroqConfig {
                api_key: vars.get("GROQ_API_KEY", None)?,
                model: vars.get("GROQ_MODEL", Some(DEFAULT_GROQ_MODEL))?,
                base_url: vars
                    .get("GROQ_BASE_URL", Some(DEFAULT_GROQ_BASE_URL))?
                    .trim_end_matches('/')
                    .to_string(),
                temperature: vars.parsed("GROQ_TEMPERATURE", DEFAULT_TEMPERATURE)?,
                max_tokens: vars.parsed("GROQ_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
                timeout_secs: vars.parsed("GROQ_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?,
            },
            storage: StorageConfig {
                sessions_file: vars.get("SESSIONS_FILE", Some("sessions.json"))?.into(),
                static_dir: vars.get("STATIC_DIR", Some("static"))?.into(),
            },
            knowledge: KnowledgeConfig {
                dir: vars.get("KNOWLEDGE_DIR", Some("knowledge"))?.into(),
                top_k: vars.parsed("RETRIEVAL_TOP_K", DEFAULT_TOP_K)?,
            },
            rate_limit: RateLimitConfig {
                chat_per_min: vars.parsed(
                    "CHAT_RATE_LIMIT_PER_MIN",
                    DEFAULT_CHAT_RATE_LIMIT_PER_MIN,
                )?,
                trust_forwarded_for: vars.parsed("TRUST_FORWARDED_FOR", false)?,
            },
            environment,
        })
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
    is_prod: bool,
}

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str, default: Option<&str>) -> Result<String, AppError> {
        match (self.lookup)(key).filter(|v| !v.trim().is_empty()) {
            Some(val) => Ok(val),
            None => {
                if self.is_prod {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required in production but not set",
                        key
                    )))
                } else if let Some(def) = default {
                    Ok(def.to_string())
                } else {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required but not set",
                        key
                    )))
                }
            }
        }
    }

    /// Numeric and boolean settings: unparseable values fall back to the default.
    fn parsed<T>(&self, key: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr + ToString + Copy,
    {
        let raw = self.get(key, Some(&default.to_string()))?;
        Ok(raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting, using default");
            default
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<GentaxConfig, AppError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GentaxConfig::from_lookup(core_config::Config::default(), |key| map.get(key).cloned())
    }

    #[test]
    fn applies_defaults_in_dev() {
        let config = load(&[("GROQ_API_KEY", "gsk_test")]).unwrap();

        assert_eq!(config.common.host, "0.0.0.0");
        assert_eq!(config.common.port, 8000);
        assert_eq!(config.groq.model, "llama-3.1-8b-instant");
        assert_eq!(config.groq.base_url, DEFAULT_GROQ_BASE_URL);
        assert_eq!(config.groq.max_tokens, 800);
        assert!((config.groq.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.knowledge.top_k, 5);
        assert_eq!(config.storage.sessions_file, PathBuf::from("sessions.json"));
        assert_eq!(config.storage.static_dir, PathBuf::from("static"));
        assert_eq!(config.rate_limit.chat_per_min, 30);
        assert!(!config.rate_limit.trust_forwarded_for);
        assert_eq!(config.environment, "dev");
    }

    #[test]
    fn api_key_is_required() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("GROQ_API_KEY"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        assert!(load(&[("GROQ_API_KEY", "   ")]).is_err());
    }

    #[test]
    fn model_and_base_url_are_overridable() {
        let config = load(&[
            ("GROQ_API_KEY", "gsk_test"),
            ("GROQ_MODEL", "llama-3.3-70b-versatile"),
            ("GROQ_BASE_URL", "http://localhost:9999/v1/"),
        ])
        .unwrap();

        assert_eq!(config.groq.model, "llama-3.3-70b-versatile");
        assert_eq!(config.groq.base_url, "http://localhost:9999/v1");
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = load(&[
            ("GROQ_API_KEY", "gsk_test"),
            ("GROQ_MAX_TOKENS", "lots"),
            ("RETRIEVAL_TOP_K", "3"),
        ])
        .unwrap();

        assert_eq!(config.groq.max_tokens, 800);
        assert_eq!(config.knowledge.top_k, 3);
    }

    #[test]
    fn forwarded_for_trust_is_opt_in() {
        let config = load(&[
            ("GROQ_API_KEY", "gsk_test"),
            ("TRUST_FORWARDED_FOR", "true"),
        ])
        .unwrap();
        assert!(config.rate_limit.trust_forwarded_for);

        let config = load(&[("GROQ_API_KEY", "gsk_test"), ("TRUST_FORWARDED_FOR", "yes")]).unwrap();
        assert!(!config.rate_limit.trust_forwarded_for);
    }

    #[test]
    fn prod_requires_every_setting() {
        let err = load(&[("ENVIRONMENT", "prod"), ("GROQ_API_KEY", "gsk_test")]).unwrap_err();
        assert!(err.to_string().contains("required in production"));
    }
}
