use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// 时辰不详时代入的固定时间，仅供占位，不参与论断
pub const UNKNOWN_TIME_PLACEHOLDER: &str = "12:00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    #[serde(alias = "男")]
    Male,
    #[serde(alias = "女")]
    Female,
}

impl Gender {
    pub fn label(&self) -> &'static str {
        match self {
            Gender::Male => "男",
            Gender::Female => "女",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarType {
    #[default]
    #[serde(alias = "國曆", alias = "solar")]
    Gregorian,
    #[serde(alias = "農曆")]
    Lunar,
}

impl CalendarType {
    pub fn label(&self) -> &'static str {
        match self {
            CalendarType::Gregorian => "國曆",
            CalendarType::Lunar => "農曆",
        }
    }
}

/// 命主出生资料。构造后不再修改，编辑时生成新值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInput {
    pub birth_date: String,
    #[serde(default)]
    pub birth_time: Option<String>,
    pub gender: Gender,
    #[serde(default, rename = "calendarType")]
    pub calendar: CalendarType,
    #[serde(default)]
    pub is_leap_month: bool,
    #[serde(default)]
    pub is_time_unknown: bool,
}

impl UserInput {
    pub fn new(birth_date: impl Into<String>, birth_time: impl Into<String>, gender: Gender) -> Self {
        Self {
            birth_date: birth_date.into(),
            birth_time: Some(birth_time.into()),
            gender,
            calendar: CalendarType::Gregorian,
            is_leap_month: false,
            is_time_unknown: false,
        }
    }

    /// Switch to the lunar calendar, optionally flagging a leap month.
    pub fn lunar(mut self, leap_month: bool) -> Self {
        self.calendar = CalendarType::Lunar;
        self.is_leap_month = leap_month;
        self
    }

    pub fn with_unknown_time(mut self) -> Self {
        self.is_time_unknown = true;
        self
    }

    /// A missing or blank time is treated the same as an explicit unknown flag.
    pub fn time_unknown(&self) -> bool {
        self.is_time_unknown
            || self
                .birth_time
                .as_deref()
                .map(|t| t.trim().is_empty())
                .unwrap_or(true)
    }

    pub fn effective_time(&self) -> &str {
        if self.time_unknown() {
            UNKNOWN_TIME_PLACEHOLDER
        } else {
            self.birth_time.as_deref().unwrap_or(UNKNOWN_TIME_PLACEHOLDER)
        }
    }

    /// 闰月标记只在农历下有意义
    pub fn leap_month_applies(&self) -> bool {
        self.calendar == CalendarType::Lunar && self.is_leap_month
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    Basic,
    Yearly,
    Scholarly,
    Compatibility,
}

impl AnalysisMode {
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisMode::Basic => "八字正宗",
            AnalysisMode::Yearly => "流年運勢",
            AnalysisMode::Scholarly => "古籍考據",
            AnalysisMode::Compatibility => "雙人合盤",
        }
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, AnalysisMode::Compatibility)
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" | "八字正宗" => Ok(AnalysisMode::Basic),
            "yearly" | "流年運勢" => Ok(AnalysisMode::Yearly),
            "scholarly" | "古籍考據" => Ok(AnalysisMode::Scholarly),
            "compat" | "compatibility" | "雙人合盤" => Ok(AnalysisMode::Compatibility),
            other => Err(format!("未知的分析模式: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pillar {
    #[serde(default)]
    pub stem: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
}

/// 四柱命盘
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    #[serde(default)]
    pub year: Pillar,
    #[serde(default)]
    pub month: Pillar,
    #[serde(default)]
    pub day: Pillar,
    // 时辰不详时模型可能返回 null
    #[serde(default)]
    pub hour: Option<Pillar>,
    #[serde(default, rename = "currentDaYun")]
    pub current_luck_period: String,
    #[serde(default, rename = "me")]
    pub day_master: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RadarScores {
    pub career: f64,
    pub wealth: f64,
    pub love: f64,
    pub health: f64,
    pub social: f64,
    pub family: f64,
}

impl RadarScores {
    pub fn clamped(self) -> Self {
        Self {
            career: clamp_score(self.career),
            wealth: clamp_score(self.wealth),
            love: clamp_score(self.love),
            health: clamp_score(self.health),
            social: clamp_score(self.social),
            family: clamp_score(self.family),
        }
    }
}

pub(crate) fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LuckTip {
    pub title: String,
    pub content: String,
}

/// 论命结果，所有模式共用同一形状
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub chart: Chart,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart2: Option<Chart>,
    pub classical: String,
    pub modern: String,
    pub summary: String,
    pub score: f64,
    pub radar: RadarScores,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub luck_tips: Vec<LuckTip>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Model, content: content.into() }
    }
}

/// 每日灵签
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyFortune {
    pub lucky_color: String,
    #[serde(deserialize_with = "string_or_number")]
    pub lucky_number: String,
    pub lucky_direction: String,
    pub quote: String,
    pub advice: String,
}

// 模型有时把幸运数字返回成数字而不是字符串
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "luckyNumber 应为字符串或数字, 实际为 {}",
            other
        ))),
    }
}
