// ==========================================
// 成衣工序流转系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务规则接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod capacity;
pub mod step;
pub mod template;
pub mod types;

// 重导出核心类型
pub use capacity::{CapacityConstraint, OperatorCapacity};
pub use step::WorkflowStep;
pub use template::{ArticleTemplate, OperationTemplate};
pub use types::{AssignmentPolicy, NotificationKind, Shift, StepPriority, StepStatus};
