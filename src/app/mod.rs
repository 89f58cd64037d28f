// ==========================================
// 成衣工序流转系统 - 应用层
// ==========================================
// 职责: 组装各层并管理后台任务生命周期
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState, BackgroundWorkers};
