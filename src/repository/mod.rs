// ==========================================
// 成衣工序流转系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供持久化网关接口及其实现,屏蔽存储细节
// ==========================================

pub mod error;
pub mod gateway;
pub mod memory_store;
pub mod sqlite_store;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use gateway::PersistenceGateway;
pub use memory_store::InMemoryStore;
pub use sqlite_store::SqliteStore;
