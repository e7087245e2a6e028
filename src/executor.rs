//! Resilient Executor
//!
//! Runs an action against a ranked list of models, one at a time, and
//! returns the first success. Credential failures abort immediately; the
//! retry policy decides whether any other fault advances to the next model.

use std::fmt;
use std::future::Future;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::{RetryConfig, RetryPolicyKind};
use crate::error::{Classify, FaultKind, OracleError};

/// Which faults move the loop on to the next candidate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Every fault except a credential failure.
    #[default]
    Broad,
    /// Only the listed faults, plus empty replies. Anything else aborts the loop.
    AllowList(Vec<FaultKind>),
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        match config.policy {
            RetryPolicyKind::Broad => RetryPolicy::Broad,
            RetryPolicyKind::AllowList => RetryPolicy::AllowList(config.retryable.clone()),
        }
    }

    pub fn should_advance(&self, kind: FaultKind) -> bool {
        match kind {
            FaultKind::Credential => return false,
            FaultKind::EmptyResponse => return true,
            _ => {}
        }
        match self {
            RetryPolicy::Broad => true,
            RetryPolicy::AllowList(kinds) => kinds.contains(&kind),
        }
    }
}

/// Record of a candidate that failed without stopping the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAttempt {
    pub model: String,
    pub fault: FaultKind,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub enum FallbackFailure<E> {
    /// A fault the policy does not retry; later candidates were not tried.
    Aborted { model: String, error: E },
    /// Every candidate failed. `last` is the final candidate's error.
    Exhausted { attempts: Vec<FailedAttempt>, last: E },
}

impl<E: fmt::Display> fmt::Display for FallbackFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackFailure::Aborted { model, error } => write!(f, "{} 中止: {}", model, error),
            FallbackFailure::Exhausted { attempts, last } => {
                write!(f, "{} 個模型皆失敗, 最後錯誤: {}", attempts.len(), last)
            }
        }
    }
}

impl From<FallbackFailure<OracleError>> for OracleError {
    fn from(failure: FallbackFailure<OracleError>) -> Self {
        match failure {
            FallbackFailure::Aborted { error, .. } => error,
            FallbackFailure::Exhausted { attempts, last } => OracleError::AllCandidatesExhausted {
                tried: attempts.into_iter().map(|a| a.model).collect(),
                last: Box::new(last),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResilientExecutor {
    policy: RetryPolicy,
    fallback_model: String,
}

impl ResilientExecutor {
    pub fn new(policy: RetryPolicy, fallback_model: impl Into<String>) -> Self {
        Self {
            policy,
            fallback_model: fallback_model.into(),
        }
    }

    /// Try `action` once per candidate, in order, and return the first
    /// success together with the model that produced it.
    ///
    /// Attempts are strictly sequential. An empty list is padded with the
    /// fallback model so at least one attempt is always made.
    pub async fn execute<T, E, F, Fut>(
        &self,
        mut candidates: Vec<String>,
        mut action: F,
    ) -> Result<(T, String), FallbackFailure<E>>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let final_model = candidates
            .pop()
            .unwrap_or_else(|| self.fallback_model.clone());
        let mut attempts = Vec::new();

        for model in candidates {
            match self.attempt(&mut action, model, &mut attempts).await {
                Attempt::Succeeded(result) => return Ok(result),
                Attempt::Aborted(failure) => return Err(failure),
                Attempt::Failed(_) => {}
            }
        }

        match self.attempt(&mut action, final_model, &mut attempts).await {
            Attempt::Succeeded(result) => Ok(result),
            Attempt::Aborted(failure) => Err(failure),
            Attempt::Failed(last) => {
                error!("所有候選模型皆失敗 (共 {} 個)", attempts.len());
                Err(FallbackFailure::Exhausted { attempts, last })
            }
        }
    }

    async fn attempt<T, E, F, Fut>(
        &self,
        action: &mut F,
        model: String,
        attempts: &mut Vec<FailedAttempt>,
    ) -> Attempt<T, E>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        info!("嘗試模型: {}", model);
        let started = Instant::now();

        match action(model.clone()).await {
            Ok(result) => {
                if !attempts.is_empty() {
                    info!("模型 {} 成功 (前 {} 個模型失敗)", model, attempts.len());
                }
                Attempt::Succeeded((result, model))
            }
            Err(e) => {
                let fault = e.fault_kind();
                if !self.policy.should_advance(fault) {
                    error!("模型 {} 發生不可重試錯誤 ({}): {}", model, fault, e);
                    return Attempt::Aborted(FallbackFailure::Aborted { model, error: e });
                }

                warn!("模型 {} 失敗 ({}): {}", model, fault, e);
                attempts.push(FailedAttempt {
                    model,
                    fault,
                    message: e.to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                Attempt::Failed(e)
            }
        }
    }
}

enum Attempt<T, E> {
    Succeeded((T, String)),
    Aborted(FallbackFailure<E>),
    Failed(E),
}
