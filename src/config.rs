use chrono::Datelike;
use serde::Deserialize;
use std::path::Path;

use crate::error::{FaultKind, OracleError, OracleResult};

/// 目录拉取失败时使用的候选模型，新版在前
pub const DEFAULT_FALLBACK_MODELS: [&str; 2] = ["gemini-2.0-flash", "gemini-1.5-flash"];

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// 运行时读取的 API Key 环境变量
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

// 编译期注入的默认 Key
const BUILD_TIME_API_KEY: Option<&str> = option_env!("BAZI_ORACLE_API_KEY");

// 配置文件结构
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub models: ModelsConfig,
    pub retry: RetryConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub gemini_key: Option<String>,
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            gemini_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelsConfig {
    pub fallback: Vec<String>,
    /// When set, every catalog entry must contain this substring.
    pub family_filter: Option<String>,
    pub excluded_keywords: Vec<String>,
    pub daily_model: Option<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            fallback: DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
            family_filter: None,
            excluded_keywords: ["audio", "tts", "vision", "embedding"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            daily_model: None,
        }
    }
}

impl ModelsConfig {
    /// The newer default; used whenever a candidate list would otherwise be empty.
    pub fn primary_default(&self) -> &str {
        self.fallback
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_FALLBACK_MODELS[0])
    }

    pub fn fallback_list(&self) -> Vec<String> {
        if self.fallback.is_empty() {
            DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
        } else {
            self.fallback.clone()
        }
    }

    pub fn daily_model(&self) -> &str {
        self.daily_model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.primary_default())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicyKind {
    /// Advance on every fault except credential failures.
    #[default]
    Broad,
    /// Advance only on the fault kinds listed in `retryable`.
    AllowList,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub policy: RetryPolicyKind,
    pub retryable: Vec<FaultKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicyKind::Broad,
            retryable: vec![
                FaultKind::NotFound,
                FaultKind::RateLimited,
                FaultKind::Overloaded,
                FaultKind::BadRequest,
                FaultKind::MalformedPayload,
                FaultKind::Transport,
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    pub focus_year: Option<i32>,
    pub chat_context_chars: usize,
    pub reading_temperature: f32,
    pub compatibility_temperature: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            focus_year: None,
            chat_context_chars: 500,
            reading_temperature: 0.85,
            compatibility_temperature: 0.6,
        }
    }
}

impl AnalysisConfig {
    pub fn focus_year(&self) -> i32 {
        self.focus_year
            .unwrap_or_else(|| chrono::Local::now().date_naive().year())
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Config> {
        let config = Self::load_from("config.toml")?;
        Ok(config)
    }

    /// 读取指定配置文件；文件不存在时使用默认值
    pub fn load_from(path: impl AsRef<Path>) -> OracleResult<Config> {
        let path = path.as_ref();
        let config = if path.exists() {
            let config_content = std::fs::read_to_string(path)
                .map_err(|e| OracleError::Config(format!("無法讀取 {}: {}", path.display(), e)))?;
            Self::parse(&config_content)?
        } else {
            tracing::debug!("{} 不存在，使用預設配置", path.display());
            Config::default()
        };
        Ok(config)
    }

    pub fn parse(content: &str) -> OracleResult<Config> {
        toml::from_str(content).map_err(|e| OracleError::Config(format!("配置文件解析失敗: {}", e)))
    }

    /// Pick the credential to use: explicit key, then the configured one,
    /// then `GEMINI_API_KEY`, then the key baked in at build time.
    pub fn resolve_credential(&self, explicit: Option<&str>) -> OracleResult<String> {
        self.resolve_credential_or(explicit, environment_credential)
    }

    fn resolve_credential_or(
        &self,
        explicit: Option<&str>,
        fallback: impl FnOnce() -> Option<String>,
    ) -> OracleResult<String> {
        let given = explicit
            .into_iter()
            .chain(self.api.gemini_key.as_deref())
            .find(|k| !blank(k))
            .map(|k| k.trim().to_string());
        given
            .or_else(fallback)
            .filter(|k| !blank(k))
            .map(|k| k.trim().to_string())
            .ok_or(OracleError::MissingCredential)
    }
}

fn environment_credential() -> Option<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|k| !blank(k))
        .or_else(|| BUILD_TIME_API_KEY.filter(|k| !blank(k)).map(str::to_string))
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}
