// ==========================================
// 成衣工序流转系统 - API 层
// ==========================================
// 职责: 对外暴露入站命令与出站查询,统一错误分类
// ==========================================

pub mod dto;
pub mod error;
pub mod workflow_api;

// 重导出核心类型
pub use dto::{OperatorWorkloadView, StepStatusView, WorkflowStatusView};
pub use error::{ApiError, ApiResult};
pub use workflow_api::WorkflowApi;
