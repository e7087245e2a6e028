use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure classes used by the fallback loop to decide whether to try the next model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Invalid API key or permission denied. Never retried.
    Credential,
    NotFound,
    RateLimited,
    Overloaded,
    BadRequest,
    EmptyResponse,
    MalformedPayload,
    Transport,
    Unclassified,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Credential => "credential",
            FaultKind::NotFound => "not_found",
            FaultKind::RateLimited => "rate_limited",
            FaultKind::Overloaded => "overloaded",
            FaultKind::BadRequest => "bad_request",
            FaultKind::EmptyResponse => "empty_response",
            FaultKind::MalformedPayload => "malformed_payload",
            FaultKind::Transport => "transport",
            FaultKind::Unclassified => "unclassified",
        };
        write!(f, "{}", name)
    }
}

impl FaultKind {
    /// Classify a provider failure from its HTTP status and the Google error envelope.
    pub fn from_provider(http_status: u16, status: Option<&str>, message: &str) -> Self {
        if message.contains("API key not valid")
            || message.contains("API_KEY_INVALID")
            || status == Some("PERMISSION_DENIED")
            || status == Some("UNAUTHENTICATED")
            || http_status == 401
            || http_status == 403
        {
            return FaultKind::Credential;
        }

        match (http_status, status) {
            (404, _) | (_, Some("NOT_FOUND")) => FaultKind::NotFound,
            (429, _) | (_, Some("RESOURCE_EXHAUSTED")) => FaultKind::RateLimited,
            (500 | 502 | 503 | 504, _) | (_, Some("UNAVAILABLE")) | (_, Some("INTERNAL")) => {
                FaultKind::Overloaded
            }
            (400, _) | (_, Some("INVALID_ARGUMENT")) | (_, Some("FAILED_PRECONDITION")) => {
                FaultKind::BadRequest
            }
            _ => FaultKind::Unclassified,
        }
    }
}

/// Implemented by every error the fallback loop can observe.
pub trait Classify {
    fn fault_kind(&self) -> FaultKind;
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("尚未提供 Google Gemini API Key，請輸入金鑰或設定環境變數 GEMINI_API_KEY")]
    MissingCredential,

    #[error("API Key 無效或權限不足: {0}")]
    InvalidCredential(String),

    #[error("模型未回傳任何內容")]
    EmptyResponse,

    #[error("模型服務暫時失敗 ({kind}): {message}")]
    TransientProvider { kind: FaultKind, message: String },

    #[error("模型回傳格式不符: {0}")]
    MalformedPayload(String),

    #[error("網路請求失敗: {0}")]
    Transport(String),

    #[error("大師正在沉思中，所有模型目前皆無法回應，請稍後再試")]
    AllCandidatesExhausted {
        tried: Vec<String>,
        #[source]
        last: Box<OracleError>,
    },

    #[error("請求參數錯誤: {0}")]
    InvalidRequest(String),

    #[error("配置錯誤: {0}")]
    Config(String),
}

impl OracleError {
    /// Build the right variant for a non-success provider response.
    pub fn from_provider(http_status: u16, status: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        match FaultKind::from_provider(http_status, status, &message) {
            FaultKind::Credential => OracleError::InvalidCredential(message),
            kind => OracleError::TransientProvider { kind, message },
        }
    }

    /// The error observed on the final candidate when every candidate failed.
    pub fn last_error(&self) -> Option<&OracleError> {
        match self {
            OracleError::AllCandidatesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

impl Classify for OracleError {
    fn fault_kind(&self) -> FaultKind {
        match self {
            OracleError::MissingCredential | OracleError::InvalidCredential(_) => FaultKind::Credential,
            OracleError::EmptyResponse => FaultKind::EmptyResponse,
            OracleError::TransientProvider { kind, .. } => *kind,
            OracleError::MalformedPayload(_) => FaultKind::MalformedPayload,
            OracleError::Transport(_) => FaultKind::Transport,
            OracleError::AllCandidatesExhausted { last, .. } => last.fault_kind(),
            OracleError::InvalidRequest(_) => FaultKind::BadRequest,
            OracleError::Config(_) => FaultKind::Unclassified,
        }
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(e: reqwest::Error) -> Self {
        OracleError::Transport(e.to_string())
    }
}

pub type OracleResult<T> = Result<T, OracleError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_invalid_key_is_credential_fault() {
        let err = OracleError::from_provider(
            400,
            Some("INVALID_ARGUMENT"),
            "API key not valid. Please pass a valid API key.",
        );
        assert!(matches!(err, OracleError::InvalidCredential(_)));
        assert_eq!(err.fault_kind(), FaultKind::Credential);

        let denied = OracleError::from_provider(403, Some("PERMISSION_DENIED"), "denied");
        assert_eq!(denied.fault_kind(), FaultKind::Credential);
    }

    #[test]
    fn test_transient_faults_classified() {
        assert_eq!(FaultKind::from_provider(404, Some("NOT_FOUND"), "model not found"), FaultKind::NotFound);
        assert_eq!(FaultKind::from_provider(429, None, "quota"), FaultKind::RateLimited);
        assert_eq!(FaultKind::from_provider(200, Some("RESOURCE_EXHAUSTED"), ""), FaultKind::RateLimited);
        assert_eq!(FaultKind::from_provider(503, Some("UNAVAILABLE"), "overloaded"), FaultKind::Overloaded);
        assert_eq!(FaultKind::from_provider(400, Some("INVALID_ARGUMENT"), "bad field"), FaultKind::BadRequest);
        assert_eq!(FaultKind::from_provider(418, None, "teapot"), FaultKind::Unclassified);
    }

    #[test]
    fn test_exhausted_exposes_last_error() {
        let err = OracleError::AllCandidatesExhausted {
            tried: vec!["a".to_string(), "b".to_string()],
            last: Box::new(OracleError::EmptyResponse),
        };
        assert!(matches!(err.last_error(), Some(OracleError::EmptyResponse)));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("請稍後再試"));
        assert_eq!(err.fault_kind(), FaultKind::EmptyResponse);
    }

    #[test]
    fn test_fault_kind_display() {
        assert_eq!(FaultKind::RateLimited.to_string(), "rate_limited");
        assert_eq!(FaultKind::Credential.to_string(), "credential");
    }
}
