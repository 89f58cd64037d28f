// ==========================================
// 成衣工序流转系统 - 持久化网关接口
// ==========================================
// 职责: 模板、工序步骤、操作工产能的加载与保存
// 红线: 网关不含业务逻辑,不承诺事务语义 (save_steps 除外)
// 说明: 一致性由编排器按批次串行化保证
// ==========================================

use crate::domain::{ArticleTemplate, OperatorCapacity, WorkflowStep};
use crate::repository::error::RepositoryResult;
use std::collections::BTreeSet;

/// 持久化网关
///
/// 实现者: `InMemoryStore` (测试/嵌入), `SqliteStore` (落库)
pub trait PersistenceGateway: Send + Sync {
    // ===== 工序模板 =====

    /// 按模板ID加载
    fn load_template(&self, template_id: &str) -> RepositoryResult<Option<ArticleTemplate>>;

    /// 保存模板
    ///
    /// 模板注册后不可变: 同ID已存在时返回 `UniqueConstraintViolation`
    fn save_template(&self, template: &ArticleTemplate) -> RepositoryResult<()>;

    // ===== 工序步骤 =====

    fn load_step(&self, step_id: &str) -> RepositoryResult<Option<WorkflowStep>>;

    fn save_step(&self, step: &WorkflowStep) -> RepositoryResult<()>;

    /// 批量保存工序步骤
    ///
    /// 全部成功或全部不生效
    fn save_steps(&self, steps: &[WorkflowStep]) -> RepositoryResult<()>;

    /// 按批次列出工序步骤 (按 sequence_number, operation_id 排序)
    fn list_steps_by_bundle(&self, bundle_id: &str) -> RepositoryResult<Vec<WorkflowStep>>;

    /// 列出尚有未完成工序的批次ID (按批次ID排序)
    fn list_open_bundle_ids(&self) -> RepositoryResult<Vec<String>>;

    // ===== 操作工产能 =====

    fn load_operator(&self, operator_id: &str) -> RepositoryResult<Option<OperatorCapacity>>;

    fn save_operator(&self, operator: &OperatorCapacity) -> RepositoryResult<()>;

    /// 按机型与技能列出操作工
    ///
    /// # 参数
    /// - machine_type: None 表示不过滤机型
    /// - required_skills: 操作工技能须为其超集; 空集不过滤
    fn list_operators(
        &self,
        machine_type: Option<&str>,
        required_skills: &BTreeSet<String>,
    ) -> RepositoryResult<Vec<OperatorCapacity>>;
}
