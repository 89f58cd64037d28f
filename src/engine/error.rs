// ==========================================
// 成衣工序流转系统 - 引擎层错误类型
// ==========================================
// 分类:
// - Validation: 模板非法、环依赖、未知ID (变更前同步拒绝)
// - StateConflict: 抢单失败、状态不符、操作工不符 (无任何变更)
// - Repository: 持久化失败 (当前工序保持转换前状态)
// ==========================================

use crate::domain::types::StepStatus;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("校验失败: {0}")]
    Validation(String),

    #[error("未知{entity}: {id}")]
    UnknownEntity { entity: &'static str, id: String },

    #[error("状态冲突: step_id={step_id}, 当前状态={actual}, {reason}")]
    StateConflict {
        step_id: String,
        actual: StepStatus,
        reason: String,
    },

    #[error("锁获取失败: {0}")]
    LockPoisoned(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn conflict(step_id: &str, actual: StepStatus, reason: impl Into<String>) -> Self {
        EngineError::StateConflict {
            step_id: step_id.to_string(),
            actual,
            reason: reason.into(),
        }
    }

    pub fn is_state_conflict(&self) -> bool {
        matches!(self, EngineError::StateConflict { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::UnknownEntity { .. }
        )
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
