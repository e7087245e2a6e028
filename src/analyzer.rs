use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;

use crate::api::{ApiClient, GenerateRequest, GenerativeBackend};
use crate::catalog::CatalogResolver;
use crate::config::Config;
use crate::error::{OracleError, OracleResult};
use crate::executor::{ResilientExecutor, RetryPolicy};
use crate::models::*;
use crate::plan::{PlanBuilder, PlanRequest, QueryPlan};

/// Entry points for every query the application issues.
pub struct FortuneAnalyzer {
    backend: Arc<dyn GenerativeBackend>,
    executor: ResilientExecutor,
    planner: PlanBuilder,
    pub config: Config,
}

impl FortuneAnalyzer {
    pub fn new(config: Config) -> OracleResult<Self> {
        let api_client = ApiClient::new(&config.api)?;
        Ok(Self::with_backend(config, Arc::new(api_client)))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn GenerativeBackend>) -> Self {
        let executor = ResilientExecutor::new(
            RetryPolicy::from_config(&config.retry),
            config.models.primary_default(),
        );
        let planner = PlanBuilder::from_config(&config.analysis);

        FortuneAnalyzer {
            backend,
            executor,
            planner,
            config,
        }
    }

    async fn ranked_models(&self, credential: &str) -> Vec<String> {
        CatalogResolver::new(&self.config.models)
            .resolve(self.backend.as_ref(), credential)
            .await
    }

    /// Single-person reading in Basic, Yearly or Scholarly mode.
    pub async fn analyze_reading(
        &self,
        input: &UserInput,
        mode: AnalysisMode,
        credential: Option<&str>,
    ) -> OracleResult<AnalysisResponse> {
        let credential = self.config.resolve_credential(credential)?;
        let request = PlanRequest::Reading { mode, input };
        let plan = self.planner.build(request)?;
        info!("開始論命: {} ({})", mode.label(), input.birth_date);
        self.run_analysis(&plan, request.mode(), &credential).await
    }

    pub async fn analyze_compatibility(
        &self,
        first: &UserInput,
        second: &UserInput,
        credential: Option<&str>,
    ) -> OracleResult<AnalysisResponse> {
        let credential = self.config.resolve_credential(credential)?;
        let request = PlanRequest::Compatibility { first, second };
        let plan = self.planner.build(request)?;
        info!("開始合盤: {} × {}", first.birth_date, second.birth_date);
        self.run_analysis(&plan, request.mode(), &credential).await
    }

    async fn run_analysis(
        &self,
        plan: &QueryPlan,
        mode: AnalysisMode,
        credential: &str,
    ) -> OracleResult<AnalysisResponse> {
        let candidates = self.ranked_models(credential).await;
        let backend = self.backend.as_ref();

        let (response, model) = self
            .executor
            .execute(candidates, |model| {
                let request = structured_request(model, plan);
                async move {
                    let text = backend.generate(credential, &request).await?;
                    parse_analysis(&text, mode)
                }
            })
            .await?;

        info!("論命完成，使用模型: {}", model);
        Ok(AnalysisResponse {
            used_model: Some(model),
            ..response
        })
    }

    /// One follow-up turn grounded on a previous reading. Returns plain text.
    pub async fn continue_chat(
        &self,
        history: &[ChatMessage],
        new_message: &str,
        context: &AnalysisResponse,
        credential: Option<&str>,
    ) -> OracleResult<String> {
        let credential = self.config.resolve_credential(credential)?;
        if new_message.trim().is_empty() {
            return Err(OracleError::InvalidRequest("提問內容不可為空".to_string()));
        }

        let instruction = self.planner.chat_instruction(context);
        let candidates = self.ranked_models(&credential).await;
        let backend = self.backend.as_ref();
        let credential = credential.as_str();

        let (reply, model) = self
            .executor
            .execute(candidates, |model| {
                let request = GenerateRequest {
                    system_instruction: Some(instruction.clone()),
                    history: history.to_vec(),
                    ..GenerateRequest::new(model, new_message)
                };
                async move {
                    let text = backend.generate(credential, &request).await?;
                    if text.trim().is_empty() {
                        return Err(OracleError::EmptyResponse);
                    }
                    Ok(text)
                }
            })
            .await?;

        info!("對話回覆完成，使用模型: {}", model);
        Ok(reply)
    }

    /// Today's draw, using the configured daily model only.
    pub async fn draw_daily_fortune(&self, credential: Option<&str>) -> OracleResult<DailyFortune> {
        let today = chrono::Local::now().date_naive();
        self.draw_daily_fortune_on(today, credential).await
    }

    pub async fn draw_daily_fortune_on(
        &self,
        date: NaiveDate,
        credential: Option<&str>,
    ) -> OracleResult<DailyFortune> {
        let credential = self.config.resolve_credential(credential)?;
        let plan = self.planner.daily_plan(date);
        let backend = self.backend.as_ref();
        let credential = credential.as_str();

        // 每日灵签不走模型目录，只用固定模型
        let (fortune, _) = self
            .executor
            .execute(vec![self.config.models.daily_model().to_string()], |model| {
                let request = structured_request(model, &plan);
                async move {
                    let text = backend.generate(credential, &request).await?;
                    parse_payload::<DailyFortune>(&text)
                }
            })
            .await?;
        Ok(fortune)
    }
}

fn structured_request(model: String, plan: &QueryPlan) -> GenerateRequest {
    GenerateRequest {
        system_instruction: Some(plan.system_instruction.clone()),
        response_schema: Some(plan.schema.clone()),
        json_output: true,
        temperature: plan.temperature,
        ..GenerateRequest::new(model, plan.prompt.clone())
    }
}

// 提取JSON部分，容忍模型在前后加上说明文字或代码块
pub fn extract_json(content: &str) -> &str {
    let json_start = content.find('{');
    let json_end = content.rfind('}').map(|i| i + 1);
    match (json_start, json_end) {
        (Some(start), Some(end)) if start < end => &content[start..end],
        _ => content.trim(),
    }
}

fn parse_payload<T: DeserializeOwned>(text: &str) -> OracleResult<T> {
    if text.trim().is_empty() {
        return Err(OracleError::EmptyResponse);
    }
    let json_content = extract_json(text);
    serde_json::from_str(json_content).map_err(|e| {
        OracleError::MalformedPayload(format!("解析 API 響應失敗: {}\n響應內容: {}", e, json_content))
    })
}

/// Parse a structured reading and enforce the per-mode shape.
pub fn parse_analysis(text: &str, mode: AnalysisMode) -> OracleResult<AnalysisResponse> {
    let response: AnalysisResponse = parse_payload(text)?;

    let chart2 = match (mode.is_pair(), response.chart2) {
        (true, None) => {
            return Err(OracleError::MalformedPayload("合盤結果缺少乙方命盤 chart2".to_string()));
        }
        (true, chart2) => chart2,
        (false, _) => None,
    };

    Ok(AnalysisResponse {
        chart2,
        score: clamp_score(response.score),
        radar: response.radar.clamped(),
        ..response
    })
}
