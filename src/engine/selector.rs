// ==========================================
// 成衣工序流转系统 - 分派选择器
// ==========================================
// 职责: 为单个 AVAILABLE 工序挑选/广播合格操作工
// 策略:
// - AUTO_ASSIGN: 可用产能降序、操作工ID升序,首位占用成功者中选
// - BROADCAST_CLAIM: 返回全部合格操作工,由其抢单
// 红线: 不选可用产能低于 (100 - 阈值) 的操作工
// ==========================================

use crate::domain::{
    AssignmentPolicy, CapacityConstraint, OperationTemplate, OperatorCapacity, WorkflowStep,
};
use crate::engine::capacity_registry::{CapacityRegistry, WorkloadUpdate};
use crate::engine::error::EngineResult;
use std::cmp::Ordering;
use tracing::{debug, info};

/// 选择结果
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    /// 已直接指派并占用产能
    Assigned {
        operator_id: String,
        reservation: WorkloadUpdate,
    },
    /// 广播给合格操作工 (已排序)
    Broadcast { operator_ids: Vec<String> },
    /// 暂无合格操作工,工序保持 AVAILABLE
    CapacityExhausted,
}

// ==========================================
// AssignmentSelector
// ==========================================
#[derive(Debug, Clone)]
pub struct AssignmentSelector {
    policy: AssignmentPolicy,
    capacity_threshold_pct: f64,
}

impl AssignmentSelector {
    pub fn new(policy: AssignmentPolicy, capacity_threshold_pct: f64) -> Self {
        Self {
            policy,
            capacity_threshold_pct,
        }
    }

    pub fn policy(&self) -> AssignmentPolicy {
        self.policy
    }

    pub fn capacity_threshold_pct(&self) -> f64 {
        self.capacity_threshold_pct
    }

    /// 候选排序: 可用产能降序, 操作工ID升序
    pub fn rank_candidates(mut candidates: Vec<OperatorCapacity>) -> Vec<OperatorCapacity> {
        candidates.sort_by(|a, b| {
            b.available_capacity_percent()
                .partial_cmp(&a.available_capacity_percent())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.operator_id.cmp(&b.operator_id))
        });
        candidates
    }

    /// 为工序选择操作工
    ///
    /// # 参数
    /// - step: 待分派工序 (AVAILABLE)
    /// - operation: 对应工序模板 (机型/技能)
    /// - registry: 产能登记表
    /// - exclude: 排除的操作工 (如刚因未到岗被收回的人)
    ///
    /// # 返回
    /// AUTO_ASSIGN 下返回 Assigned 时产能已占用,调用方落库失败须释放
    pub fn select(
        &self,
        step: &WorkflowStep,
        operation: &OperationTemplate,
        registry: &CapacityRegistry,
        exclude: Option<&str>,
    ) -> EngineResult<SelectionOutcome> {
        let qualified = registry.query_qualified(
            &operation.machine_type,
            &operation.required_skills,
            self.capacity_threshold_pct,
        )?;
        let ranked: Vec<OperatorCapacity> = Self::rank_candidates(qualified)
            .into_iter()
            .filter(|op| exclude.map_or(true, |ex| op.operator_id != ex))
            .collect();

        debug!(
            step_id = %step.step_id,
            operation_id = %operation.operation_id,
            candidates = ranked.len(),
            policy = %self.policy,
            "分派候选已计算"
        );

        let outcome = match self.policy {
            AssignmentPolicy::AutoAssign => {
                let mut assigned = None;
                for candidate in &ranked {
                    // 并发下候选可能已被占满,逐个在锁内复核
                    if let Some(reservation) = registry.try_reserve(
                        &candidate.operator_id,
                        step.pieces,
                        &operation.machine_type,
                        &operation.required_skills,
                    )? {
                        assigned = Some(SelectionOutcome::Assigned {
                            operator_id: candidate.operator_id.clone(),
                            reservation,
                        });
                        break;
                    }
                }
                assigned.unwrap_or(SelectionOutcome::CapacityExhausted)
            }
            AssignmentPolicy::BroadcastClaim => {
                if ranked.is_empty() {
                    SelectionOutcome::CapacityExhausted
                } else {
                    SelectionOutcome::Broadcast {
                        operator_ids: ranked.into_iter().map(|op| op.operator_id).collect(),
                    }
                }
            }
        };

        if outcome == SelectionOutcome::CapacityExhausted {
            info!(
                step_id = %step.step_id,
                bundle_id = %step.bundle_id,
                machine_type = %operation.machine_type,
                "暂无合格操作工,工序保持可领取"
            );
        }
        Ok(outcome)
    }
}
