// ==========================================
// 成衣工序流转系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，将引擎/仓储错误转换为调用方可处理的分类
// 分类: 校验失败 / 状态冲突 / 资源未找到 / 持久化失败 / 内部错误
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 调用方错误 (变更前同步拒绝)
    // ==========================================
    #[error("数据验证失败: {0}")]
    ValidationError(String),

    /// 抢单失败、状态不符、操作工不符; 无任何变更,调用方不应重试同一步骤
    #[error("状态冲突: step_id={step_id}, 当前状态={actual}, {reason}")]
    StateConflict {
        step_id: String,
        actual: String,
        reason: String,
    },

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ==========================================
    // 系统错误
    // ==========================================
    #[error("持久化失败: {0}")]
    PersistenceError(String),

    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, ApiError::StateConflict { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ApiError::ValidationError(_))
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::ValidationError(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::DatabaseBusy(msg)
            | RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg)
            | RepositoryError::SerializationError(msg) => ApiError::PersistenceError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::PersistenceError(format!("数据库锁获取失败: {}", msg))
            }
            e @ RepositoryError::CorruptRecord { .. } => ApiError::InternalError(e.to_string()),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => ApiError::ValidationError(msg),
            EngineError::UnknownEntity { entity, id } => {
                ApiError::ValidationError(format!("未知{}: {}", entity, id))
            }
            EngineError::StateConflict {
                step_id,
                actual,
                reason,
            } => ApiError::StateConflict {
                step_id,
                actual: actual.to_string(),
                reason,
            },
            EngineError::LockPoisoned(msg) => {
                ApiError::InternalError(format!("锁获取失败: {}", msg))
            }
            EngineError::Repository(e) => e.into(),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StepStatus;

    #[test]
    fn test_engine_error_conversion() {
        let api_err: ApiError = EngineError::conflict("S-1", StepStatus::Completed, "需要 IN_PROGRESS 状态").into();
        match api_err {
            ApiError::StateConflict { step_id, actual, .. } => {
                assert_eq!(step_id, "S-1");
                assert_eq!(actual, "COMPLETED");
            }
            other => panic!("Expected StateConflict, got {:?}", other),
        }

        let api_err: ApiError = EngineError::UnknownEntity {
            entity: "操作工",
            id: "O404".to_string(),
        }
        .into();
        assert!(api_err.is_validation());
        assert!(api_err.to_string().contains("O404"));
    }

    #[test]
    fn test_repository_error_conversion() {
        let api_err: ApiError = RepositoryError::CorruptRecord {
            column: 3,
            message: "未知工序状态: DONE".to_string(),
        }
        .into();
        match api_err {
            ApiError::InternalError(msg) => assert!(msg.contains("DONE")),
            other => panic!("Expected InternalError, got {:?}", other),
        }

        let api_err: ApiError =
            EngineError::Repository(RepositoryError::DatabaseQueryError("disk I/O error".into())).into();
        assert!(matches!(api_err, ApiError::PersistenceError(_)));

        let api_err: ApiError = RepositoryError::UniqueConstraintViolation("step_id".into()).into();
        assert!(api_err.is_validation());
    }
}
