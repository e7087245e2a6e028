//! Model catalog resolution.
//!
//! Turns the provider's live model listing into a ranked candidate list,
//! degrading to the configured defaults whenever the listing is unusable.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::api::GenerativeBackend;
use crate::config::ModelsConfig;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d+)").expect("version pattern is valid"));

/// Model tiers, lowest first so the derived ordering ranks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModelTier {
    Unrecognized,
    Fast,
    Standard,
    Top,
}

impl ModelTier {
    pub fn of(model: &str) -> Self {
        if model.contains("ultra") {
            ModelTier::Top
        } else if model.contains("pro") {
            ModelTier::Standard
        } else if model.contains("flash") {
            ModelTier::Fast
        } else {
            ModelTier::Unrecognized
        }
    }
}

/// First decimal number in the identifier; missing versions sort lowest.
pub fn model_version(model: &str) -> f64 {
    VERSION_RE
        .captures(model)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn compare_models(a: &str, b: &str) -> Ordering {
    model_version(b)
        .partial_cmp(&model_version(a))
        .unwrap_or(Ordering::Equal)
        .then_with(|| ModelTier::of(b).cmp(&ModelTier::of(a)))
}

pub struct CatalogResolver<'a> {
    config: &'a ModelsConfig,
}

impl<'a> CatalogResolver<'a> {
    pub fn new(config: &'a ModelsConfig) -> Self {
        Self { config }
    }

    pub fn is_text_model(&self, model: &str) -> bool {
        let in_family = self
            .config
            .family_filter
            .as_deref()
            .map(|family| model.contains(family))
            .unwrap_or(true);
        in_family
            && !self
                .config
                .excluded_keywords
                .iter()
                .any(|keyword| model.contains(keyword.as_str()))
    }

    /// Filter and rank a raw listing. Never returns an empty list.
    ///
    /// The sort is stable, so entries with equal version and tier keep
    /// their catalog order.
    pub fn rank(&self, models: Vec<String>) -> Vec<String> {
        let mut candidates: Vec<String> = models
            .into_iter()
            .filter(|m| self.is_text_model(m))
            .collect();
        candidates.sort_by(|a, b| compare_models(a, b));

        if candidates.is_empty() {
            return vec![self.config.primary_default().to_string()];
        }
        candidates
    }

    /// Fetch the live catalog and rank it.
    pub async fn resolve(&self, backend: &dyn GenerativeBackend, credential: &str) -> Vec<String> {
        match backend.list_models(credential).await {
            Ok(models) => {
                let ranked = self.rank(models);
                debug!("模型候選順序: {:?}", ranked);
                ranked
            }
            Err(e) => {
                warn!("模型目錄取得失敗，改用預設模型: {}", e);
                self.config.fallback_list()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::GenerateRequest;
    use crate::error::{OracleError, OracleResult};
    use async_trait::async_trait;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    struct StubCatalog(fn() -> OracleResult<Vec<String>>);

    #[async_trait]
    impl GenerativeBackend for StubCatalog {
        async fn list_models(&self, _credential: &str) -> OracleResult<Vec<String>> {
            (self.0)()
        }

        async fn generate(&self, _credential: &str, _request: &GenerateRequest) -> OracleResult<String> {
            Err(OracleError::EmptyResponse)
        }
    }

    #[test]
    fn test_version_then_tier_ranking() {
        let config = ModelsConfig::default();
        let ranked = CatalogResolver::new(&config).rank(names(&[
            "modelX-1.5-flash",
            "modelY-2.0-pro",
            "modelZ-2.0-flash",
        ]));
        assert_eq!(ranked, names(&["modelY-2.0-pro", "modelZ-2.0-flash", "modelX-1.5-flash"]));
    }

    #[test]
    fn test_model_version_parsing() {
        assert_eq!(model_version("gemini-2.5-pro-preview"), 2.5);
        assert_eq!(model_version("gemini-1.5-flash-002"), 1.5);
        assert_eq!(model_version("gemini-pro"), 0.0);
    }

    #[test]
    fn test_tier_keywords() {
        assert_eq!(ModelTier::of("gemini-1.0-ultra"), ModelTier::Top);
        assert_eq!(ModelTier::of("gemini-2.0-pro"), ModelTier::Standard);
        assert_eq!(ModelTier::of("gemini-2.0-flash-lite"), ModelTier::Fast);
        assert_eq!(ModelTier::of("gemma-3-27b"), ModelTier::Unrecognized);
        assert!(ModelTier::Top > ModelTier::Standard);
        assert!(ModelTier::Fast > ModelTier::Unrecognized);
    }

    #[test]
    fn test_ties_keep_catalog_order() {
        let config = ModelsConfig::default();
        let ranked = CatalogResolver::new(&config).rank(names(&[
            "gemini-2.0-flash-001",
            "gemini-1.5-pro",
            "gemini-2.0-flash-lite",
            "gemini-2.0-flash-exp",
        ]));
        assert_eq!(
            ranked,
            names(&["gemini-2.0-flash-001", "gemini-2.0-flash-lite", "gemini-2.0-flash-exp", "gemini-1.5-pro"])
        );
    }

    #[test]
    fn test_non_text_models_filtered() {
        let config = ModelsConfig::default();
        let ranked = CatalogResolver::new(&config).rank(names(&[
            "gemini-2.5-flash-preview-tts",
            "text-embedding-004",
            "gemini-2.5-flash-native-audio",
            "gemini-pro-vision",
            "gemini-1.5-flash",
        ]));
        assert_eq!(ranked, names(&["gemini-1.5-flash"]));
    }

    #[test]
    fn test_family_filter() {
        let config = ModelsConfig { family_filter: Some("gemini".to_string()), ..Default::default() };
        let ranked = CatalogResolver::new(&config).rank(names(&["gemma-3-27b", "gemini-1.5-flash"]));
        assert_eq!(ranked, names(&["gemini-1.5-flash"]));
    }

    #[test]
    fn test_empty_after_filter_returns_newer_default() {
        let config = ModelsConfig::default();
        let ranked = CatalogResolver::new(&config).rank(names(&["text-embedding-004"]));
        assert_eq!(ranked, names(&["gemini-2.0-flash"]));

        assert_eq!(CatalogResolver::new(&config).rank(vec![]), names(&["gemini-2.0-flash"]));
    }

    #[tokio::test]
    async fn test_failed_fetch_returns_default_pair() {
        let config = ModelsConfig::default();
        let resolver = CatalogResolver::new(&config);

        let offline = StubCatalog(|| Err(OracleError::Transport("connection refused".to_string())));
        assert_eq!(resolver.resolve(&offline, "key").await, names(&["gemini-2.0-flash", "gemini-1.5-flash"]));

        let garbled = StubCatalog(|| Err(OracleError::MalformedPayload("expected value".to_string())));
        assert_eq!(resolver.resolve(&garbled, "key").await, names(&["gemini-2.0-flash", "gemini-1.5-flash"]));
    }

    #[tokio::test]
    async fn test_resolve_ranks_live_listing() {
        let config = ModelsConfig::default();
        let live = StubCatalog(|| Ok(vec!["gemini-1.5-flash".to_string(), "gemini-2.5-pro".to_string()]));
        let ranked = CatalogResolver::new(&config).resolve(&live, "key").await;
        assert_eq!(ranked, names(&["gemini-2.5-pro", "gemini-1.5-flash"]));
    }
}
