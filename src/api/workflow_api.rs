// ==========================================
// 成衣工序流转系统 - 工序流转 API
// ==========================================
// 职责: 入站命令与出站查询,参数校验后委托编排器
// 命令: CreateWorkflow / ClaimStep / StartStep / CompleteStep /
//       UpdateOperatorCapacity / BlockStep / ResolveBlock
// 查询: GetWorkflowStatus / GetOperatorWorkload
// ==========================================

use std::sync::Arc;
use tracing::debug;

use crate::api::dto::{OperatorWorkloadView, StepStatusView, WorkflowStatusView};
use crate::api::error::{ApiError, ApiResult};
use crate::domain::{ArticleTemplate, OperatorCapacity, StepPriority, StepStatus};
use crate::engine::{
    CompletionReport, EngineError, WorkflowOrchestrator, WorkloadChange, WorkloadUpdate,
};

fn require(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::ValidationError(format!("{}不能为空", field)));
    }
    Ok(())
}

/// 查询场景下未知ID视为资源不存在
fn not_found_on_unknown(err: EngineError) -> ApiError {
    match err {
        EngineError::UnknownEntity { entity, id } => {
            ApiError::NotFound(format!("{}(id={})不存在", entity, id))
        }
        other => other.into(),
    }
}

// ==========================================
// WorkflowApi
// ==========================================
pub struct WorkflowApi {
    orchestrator: Arc<WorkflowOrchestrator>,
}

impl WorkflowApi {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<WorkflowOrchestrator> {
        &self.orchestrator
    }

    // ==========================================
    // 主数据
    // ==========================================

    /// 注册款式工序模板
    pub fn register_template(&self, template: ArticleTemplate) -> ApiResult<()> {
        require("模板ID", &template.template_id)?;
        self.orchestrator.register_template(template)?;
        Ok(())
    }

    /// 操作工入职
    pub fn register_operator(&self, operator: OperatorCapacity) -> ApiResult<()> {
        require("操作工ID", &operator.operator_id)?;
        self.orchestrator.register_operator(operator)?;
        Ok(())
    }

    /// 设置操作工休息状态
    ///
    /// # 返回
    /// 是否因结束休息而重新可接活
    pub fn set_operator_break(&self, operator_id: &str, on_break: bool) -> ApiResult<bool> {
        require("操作工ID", operator_id)?;
        Ok(self.orchestrator.set_operator_break(operator_id, on_break)?)
    }

    /// 操作工离职
    pub fn deactivate_operator(&self, operator_id: &str) -> ApiResult<()> {
        require("操作工ID", operator_id)?;
        Ok(self.orchestrator.deactivate_operator(operator_id)?)
    }

    // ==========================================
    // 入站命令
    // ==========================================

    /// CreateWorkflow
    ///
    /// # 参数
    /// - priority: low | normal | high | urgent, 缺省为 normal
    pub fn create_workflow(
        &self,
        bundle_id: &str,
        template_id: &str,
        piece_count: u32,
        priority: Option<&str>,
    ) -> ApiResult<WorkflowStatusView> {
        require("批次ID", bundle_id)?;
        require("模板ID", template_id)?;
        if piece_count == 0 {
            return Err(ApiError::ValidationError("批次件数必须大于 0".to_string()));
        }
        let priority = match priority {
            Some(raw) => StepPriority::parse(raw)
                .ok_or_else(|| ApiError::ValidationError(format!("未知优先级: {}", raw)))?,
            None => StepPriority::default(),
        };

        let steps = self.orchestrator.create_workflow(
            bundle_id.trim(),
            template_id.trim(),
            piece_count,
            priority,
        )?;
        Ok(WorkflowStatusView::from_steps(bundle_id.trim(), &steps))
    }

    /// ClaimStep (仅 BROADCAST_CLAIM)
    pub fn claim_step(&self, step_id: &str, operator_id: &str) -> ApiResult<StepStatusView> {
        require("步骤ID", step_id)?;
        require("操作工ID", operator_id)?;
        let step = self.orchestrator.claim_step(step_id, operator_id)?;
        Ok(StepStatusView::from(&step))
    }

    /// StartStep
    pub fn start_step(&self, step_id: &str, operator_id: &str) -> ApiResult<StepStatusView> {
        require("步骤ID", step_id)?;
        require("操作工ID", operator_id)?;
        let step = self.orchestrator.start_step(step_id, operator_id)?;
        Ok(StepStatusView::from(&step))
    }

    /// CompleteStep
    pub fn complete_step(
        &self,
        step_id: &str,
        operator_id: &str,
        pieces_completed: u32,
    ) -> ApiResult<CompletionReport> {
        require("步骤ID", step_id)?;
        require("操作工ID", operator_id)?;
        Ok(self
            .orchestrator
            .complete_step(step_id, operator_id, pieces_completed)?)
    }

    /// UpdateOperatorCapacity (增量或绝对值)
    pub fn update_operator_capacity(
        &self,
        operator_id: &str,
        change: WorkloadChange,
    ) -> ApiResult<WorkloadUpdate> {
        require("操作工ID", operator_id)?;
        Ok(self.orchestrator.update_operator_capacity(operator_id, change)?)
    }

    /// BlockStep
    pub fn block_step(&self, step_id: &str, reason: &str) -> ApiResult<StepStatusView> {
        require("步骤ID", step_id)?;
        require("阻断原因", reason)?;
        let step = self.orchestrator.block_step(step_id, reason)?;
        Ok(StepStatusView::from(&step))
    }

    /// ResolveBlock
    ///
    /// # 参数
    /// - target_status: AVAILABLE | LOCKED
    pub fn resolve_block(&self, step_id: &str, target_status: &str) -> ApiResult<StepStatusView> {
        require("步骤ID", step_id)?;
        let target = StepStatus::parse(target_status).ok_or_else(|| {
            ApiError::ValidationError(format!("未知目标状态: {}", target_status))
        })?;
        let step = self.orchestrator.resolve_block(step_id, target)?;
        Ok(StepStatusView::from(&step))
    }

    // ==========================================
    // 出站查询
    // ==========================================

    /// GetWorkflowStatus
    pub fn get_workflow_status(&self, bundle_id: &str) -> ApiResult<WorkflowStatusView> {
        require("批次ID", bundle_id)?;
        let steps = self
            .orchestrator
            .get_workflow_status(bundle_id)
            .map_err(not_found_on_unknown)?;
        debug!(bundle_id = %bundle_id, steps = steps.len(), "查询批次进度");
        Ok(WorkflowStatusView::from_steps(bundle_id, &steps))
    }

    /// GetOperatorWorkload
    pub fn get_operator_workload(&self, operator_id: &str) -> ApiResult<OperatorWorkloadView> {
        require("操作工ID", operator_id)?;
        let workload = self
            .orchestrator
            .get_operator_workload(operator_id)
            .map_err(not_found_on_unknown)?;
        Ok(OperatorWorkloadView::from(workload))
    }
}
