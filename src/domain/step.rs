// ==========================================
// 成衣工序流转系统 - 批次工序步骤
// ==========================================
// 职责: 单个批次(bundle)内某道工序的实例
// 红线: dependencies 创建后不可变; 同一时刻至多一名操作工
// ==========================================

use crate::domain::types::{StepPriority, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ==========================================
// WorkflowStep - 工序步骤
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    // ===== 主键 =====
    pub step_id: String,
    pub bundle_id: String,
    pub template_id: String, // 实例化所用模板,重启恢复时据此重建 DAG
    pub operation_id: String,

    // ===== 状态 =====
    pub status: StepStatus,
    pub pieces: u32,           // 批次件数
    pub completed_pieces: u32, // 完工件数
    pub assigned_operator_id: Option<String>,
    pub blocked_reason: Option<String>,

    // ===== 依赖 (实例化时由模板边解析为 step_id) =====
    pub dependencies: BTreeSet<String>,

    // ===== 展示/通知 =====
    pub priority: StepPriority,
    pub sequence_number: u32,

    // ===== 时间戳 =====
    pub created_at: DateTime<Utc>,
    pub available_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowStep {
    /// 是否可被领取 (AVAILABLE 且无人认领)
    pub fn is_claimable(&self) -> bool {
        self.status == StepStatus::Available && self.assigned_operator_id.is_none()
    }

    /// 是否已被指定操作工持有
    pub fn is_held_by(&self, operator_id: &str) -> bool {
        self.assigned_operator_id.as_deref() == Some(operator_id)
    }

    /// 当前占用的工作量 (ASSIGNED / IN_PROGRESS 时为批次件数)
    pub fn reserved_workload(&self) -> u32 {
        match self.status {
            StepStatus::Assigned | StepStatus::InProgress => self.pieces,
            _ => 0,
        }
    }
}
