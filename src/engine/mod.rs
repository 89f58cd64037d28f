// ==========================================
// 成衣工序流转系统 - 引擎层
// ==========================================
// 职责: 模板依赖图、产能登记、分派选择、批次实例、完工级联
// 红线: Engine 不拼 SQL, 持久化一律经 PersistenceGateway
// ==========================================

pub mod capacity_registry;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod expiry;
pub mod orchestrator;
pub mod selector;
pub mod template_graph;
pub mod workflow_instance;

// 重导出核心引擎
pub use capacity_registry::{CapacityRegistry, WorkloadChange, WorkloadUpdate};
pub use dispatcher::{DispatchStats, NotificationDispatcher};
pub use error::{EngineError, EngineResult};
pub use events::{
    NoOpNotificationGateway, NotificationError, NotificationGateway, NotificationOutbox,
    NotificationReceiver, StepNotification, TracingNotificationGateway,
};
pub use expiry::ExpirySweeper;
pub use orchestrator::{CompletionReport, OperatorWorkload, WorkflowOrchestrator};
pub use selector::{AssignmentSelector, SelectionOutcome};
pub use template_graph::{OperationTemplateGraph, TemplateGraph};
pub use workflow_instance::BundleWorkflowInstance;
