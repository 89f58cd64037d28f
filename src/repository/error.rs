// ==========================================
// 成衣工序流转系统 - 仓储层错误类型
// ==========================================
// 任一变体出现时,调用方均视为本次写入未生效
// ==========================================

use rusqlite::ErrorCode;
use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    // ===== 数据库错误 =====
    #[error("数据库繁忙: {0}")]
    DatabaseBusy(String),

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("数据库查询失败: {0}")]
    DatabaseQueryError(String),

    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    // ===== 数据格式错误 =====
    #[error("序列化失败: {0}")]
    SerializationError(String),

    /// 库中记录无法还原为领域对象 (列序号从 0 开始)
    #[error("记录内容损坏 (column={column}): {message}")]
    CorruptRecord { column: usize, message: String },
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, msg) => {
                let msg = msg.unwrap_or_else(|| code.to_string());
                match code.code {
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                        RepositoryError::DatabaseBusy(msg)
                    }
                    ErrorCode::ConstraintViolation if msg.contains("UNIQUE") => {
                        RepositoryError::UniqueConstraintViolation(msg)
                    }
                    _ => RepositoryError::DatabaseQueryError(msg),
                }
            }
            rusqlite::Error::FromSqlConversionFailure(column, _, cause) => {
                RepositoryError::CorruptRecord {
                    column,
                    message: cause.to_string(),
                }
            }
            other => RepositoryError::DatabaseQueryError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::SerializationError(err.to_string())
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;
