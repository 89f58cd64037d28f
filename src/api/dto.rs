// ==========================================
// 成衣工序流转系统 - API 视图对象
// ==========================================
// 职责: 对外查询结果的序列化视图 (状态/优先级以字符串输出)
// ==========================================

use crate::domain::{CapacityConstraint, StepStatus, WorkflowStep};
use crate::engine::OperatorWorkload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// StepStatusView - 工序步骤视图
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStatusView {
    pub step_id: String,
    pub bundle_id: String,
    pub operation_id: String,
    pub sequence_number: u32,
    pub status: String,
    pub priority: String,
    pub pieces: u32,
    pub completed_pieces: u32,
    pub assigned_operator_id: Option<String>,
    pub blocked_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&WorkflowStep> for StepStatusView {
    fn from(step: &WorkflowStep) -> Self {
        Self {
            step_id: step.step_id.clone(),
            bundle_id: step.bundle_id.clone(),
            operation_id: step.operation_id.clone(),
            sequence_number: step.sequence_number,
            status: step.status.to_db_str().to_string(),
            priority: step.priority.to_db_str().to_string(),
            pieces: step.pieces,
            completed_pieces: step.completed_pieces,
            assigned_operator_id: step.assigned_operator_id.clone(),
            blocked_reason: step.blocked_reason.clone(),
            updated_at: step.updated_at,
        }
    }
}

// ==========================================
// WorkflowStatusView - 批次进度视图
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatusView {
    pub bundle_id: String,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub finished: bool,
    /// 按展示序号排列
    pub steps: Vec<StepStatusView>,
}

impl WorkflowStatusView {
    pub fn from_steps(bundle_id: &str, steps: &[WorkflowStep]) -> Self {
        let completed_steps = steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        Self {
            bundle_id: bundle_id.to_string(),
            total_steps: steps.len(),
            completed_steps,
            finished: !steps.is_empty() && completed_steps == steps.len(),
            steps: steps.iter().map(StepStatusView::from).collect(),
        }
    }

    /// 按工序ID查找步骤
    pub fn step(&self, operation_id: &str) -> Option<&StepStatusView> {
        self.steps.iter().find(|s| s.operation_id == operation_id)
    }
}

// ==========================================
// OperatorWorkloadView - 操作工负荷视图
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorWorkloadView {
    pub operator_id: String,
    pub machine_type: String,
    pub current_workload: u32,
    pub max_capacity_per_hour: u32,
    pub available_capacity_percent: f64,
    /// 距上限尚可接的件数
    pub remaining_pieces: u32,
    pub on_break: bool,
    pub active: bool,
    pub assigned_steps: Vec<StepStatusView>,
    pub eligible_steps: Vec<StepStatusView>,
}

impl From<OperatorWorkload> for OperatorWorkloadView {
    fn from(w: OperatorWorkload) -> Self {
        Self {
            available_capacity_percent: w.operator.available_capacity_percent(),
            remaining_pieces: w.operator.remaining_pieces(),
            operator_id: w.operator.operator_id,
            machine_type: w.operator.machine_type,
            current_workload: w.operator.current_workload,
            max_capacity_per_hour: w.operator.max_capacity_per_hour,
            on_break: w.operator.on_break,
            active: w.operator.active,
            assigned_steps: w.assigned_steps.iter().map(StepStatusView::from).collect(),
            eligible_steps: w.eligible_steps.iter().map(StepStatusView::from).collect(),
        }
    }
}
