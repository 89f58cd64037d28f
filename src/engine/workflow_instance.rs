// ==========================================
// 成衣工序流转系统 - 批次工序实例
// ==========================================
// 职责: 将模板 DAG 实例化为单个批次的工序步骤集合
// 红线: 步骤依赖创建后不可变; 状态只经状态机前进
// 说明: 实例本身不持久化,变更以 "暂存 → 持久化 → 提交" 两段式完成
// ==========================================

use crate::domain::{OperationTemplate, StepPriority, StepStatus, WorkflowStep};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::template_graph::TemplateGraph;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

// ==========================================
// BundleWorkflowInstance - 批次工序实例
// ==========================================
#[derive(Debug)]
pub struct BundleWorkflowInstance {
    bundle_id: String,
    template: Arc<TemplateGraph>,
    steps: HashMap<String, WorkflowStep>,
    step_by_operation: HashMap<String, String>,
    ordered: Vec<String>,
}

impl BundleWorkflowInstance {
    /// 实例化批次
    ///
    /// # 参数
    /// - bundle_id: 批次ID
    /// - template: 已注册的模板依赖图
    /// - piece_count: 批次件数 (> 0)
    /// - priority: 批次优先级,复制到每个步骤
    /// - now: 创建时间
    ///
    /// # 返回
    /// 无前置的工序直接为 AVAILABLE,其余为 LOCKED
    pub fn instantiate(
        bundle_id: &str,
        template: Arc<TemplateGraph>,
        piece_count: u32,
        priority: StepPriority,
        now: DateTime<Utc>,
    ) -> EngineResult<Self> {
        if bundle_id.trim().is_empty() {
            return Err(EngineError::validation("批次ID不能为空"));
        }
        if piece_count == 0 {
            return Err(EngineError::validation(format!(
                "批次 {} 件数必须大于 0",
                bundle_id
            )));
        }

        let step_by_operation: HashMap<String, String> = template
            .template()
            .operations
            .iter()
            .map(|op| (op.operation_id.clone(), Uuid::new_v4().to_string()))
            .collect();

        let mut steps = HashMap::with_capacity(step_by_operation.len());
        for op in &template.template().operations {
            let step_id = step_by_operation[&op.operation_id].clone();
            let dependencies: BTreeSet<String> = op
                .depends_on
                .iter()
                .filter_map(|dep| step_by_operation.get(dep).cloned())
                .collect();
            let status = if dependencies.is_empty() {
                StepStatus::Available
            } else {
                StepStatus::Locked
            };

            steps.insert(
                step_id.clone(),
                WorkflowStep {
                    step_id,
                    bundle_id: bundle_id.to_string(),
                    template_id: template.template().template_id.clone(),
                    operation_id: op.operation_id.clone(),
                    status,
                    pieces: piece_count,
                    completed_pieces: 0,
                    assigned_operator_id: None,
                    blocked_reason: None,
                    dependencies,
                    priority,
                    sequence_number: op.sequence_number,
                    created_at: now,
                    available_at: (status == StepStatus::Available).then_some(now),
                    assigned_at: None,
                    started_at: None,
                    completed_at: None,
                    updated_at: now,
                },
            );
        }

        let ordered = display_order(&steps);
        Ok(Self {
            bundle_id: bundle_id.to_string(),
            template,
            steps,
            step_by_operation,
            ordered,
        })
    }

    /// 由已落库的步骤重建批次实例 (进程重启后恢复)
    ///
    /// # 参数
    /// - template: 步骤记录的 template_id 对应的依赖图
    /// - steps: 该批次的全部步骤
    ///
    /// # 返回
    /// - Err(Validation): 步骤为空、跨批次、与模板工序不一一对应
    pub fn restore(template: Arc<TemplateGraph>, steps: Vec<WorkflowStep>) -> EngineResult<Self> {
        let bundle_id = match steps.first() {
            Some(first) => first.bundle_id.clone(),
            None => return Err(EngineError::validation("无可恢复的工序步骤")),
        };

        let mut step_by_operation = HashMap::with_capacity(steps.len());
        let mut by_id = HashMap::with_capacity(steps.len());
        for step in steps {
            if step.bundle_id != bundle_id {
                return Err(EngineError::validation(format!(
                    "步骤 {} 不属于批次 {}",
                    step.step_id, bundle_id
                )));
            }
            if template.operation(&step.operation_id).is_none() {
                return Err(EngineError::validation(format!(
                    "批次 {} 的工序 {} 不在模板 {} 中",
                    bundle_id,
                    step.operation_id,
                    template.template().template_id
                )));
            }
            if step_by_operation
                .insert(step.operation_id.clone(), step.step_id.clone())
                .is_some()
            {
                return Err(EngineError::validation(format!(
                    "批次 {} 的工序 {} 重复",
                    bundle_id, step.operation_id
                )));
            }
            by_id.insert(step.step_id.clone(), step);
        }

        if step_by_operation.len() != template.template().operations.len() {
            return Err(EngineError::validation(format!(
                "批次 {} 步骤数与模板 {} 不一致",
                bundle_id,
                template.template().template_id
            )));
        }

        let ordered = display_order(&by_id);
        Ok(Self {
            bundle_id,
            template,
            steps: by_id,
            step_by_operation,
            ordered,
        })
    }

    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    pub fn template(&self) -> &Arc<TemplateGraph> {
        &self.template
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.get(step_id)
    }

    /// 按展示序号排列的步骤ID
    pub fn step_ids(&self) -> &[String] {
        &self.ordered
    }

    /// 按展示序号排列的步骤快照
    pub fn steps_ordered(&self) -> Vec<WorkflowStep> {
        self.ordered
            .iter()
            .filter_map(|id| self.steps.get(id).cloned())
            .collect()
    }

    pub fn step_for_operation(&self, operation_id: &str) -> Option<&WorkflowStep> {
        self.step_by_operation
            .get(operation_id)
            .and_then(|id| self.steps.get(id))
    }

    /// 步骤对应的工序模板
    pub fn operation_for(&self, step_id: &str) -> Option<&OperationTemplate> {
        self.steps
            .get(step_id)
            .and_then(|s| self.template.operation(&s.operation_id))
    }

    /// 直接后继步骤 (经模板反向索引)
    pub fn dependents_of(&self, step_id: &str) -> Vec<String> {
        let Some(step) = self.steps.get(step_id) else {
            return Vec::new();
        };
        self.template
            .dependents_of(&step.operation_id)
            .map(|ops| {
                ops.iter()
                    .filter_map(|op| self.step_by_operation.get(op).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 全部前置步骤是否已完成
    pub fn dependencies_satisfied(&self, step_id: &str) -> bool {
        self.steps.get(step_id).map_or(false, |step| {
            step.dependencies.iter().all(|dep| {
                self.steps
                    .get(dep)
                    .map_or(false, |d| d.status == StepStatus::Completed)
            })
        })
    }

    /// 视 `completing` 为已完成时,前置是否全部满足
    ///
    /// 级联在提交完工前判定后继是否解锁
    pub fn dependencies_satisfied_with(&self, step_id: &str, completing: &str) -> bool {
        self.steps.get(step_id).map_or(false, |step| {
            step.dependencies.iter().all(|dep| {
                dep == completing
                    || self
                        .steps
                        .get(dep)
                        .map_or(false, |d| d.status == StepStatus::Completed)
            })
        })
    }

    /// 当前可领取的步骤ID (按展示序号)
    pub fn available_step_ids(&self) -> Vec<String> {
        self.ordered
            .iter()
            .filter(|id| self.steps.get(*id).map_or(false, |s| s.is_claimable()))
            .cloned()
            .collect()
    }

    /// 指定操作工持有的步骤
    pub fn steps_held_by(&self, operator_id: &str) -> Vec<WorkflowStep> {
        self.ordered
            .iter()
            .filter_map(|id| self.steps.get(id))
            .filter(|s| s.is_held_by(operator_id))
            .cloned()
            .collect()
    }

    /// 是否全部完工
    pub fn is_finished(&self) -> bool {
        self.steps.values().all(|s| s.status == StepStatus::Completed)
    }

    /// 暂存状态转换
    ///
    /// 校验状态机后返回转换后的副本,实例本身不变;
    /// 调用方持久化成功后再 `commit`
    ///
    /// # 返回
    /// - Err(StateConflict): 状态机不允许该转换
    pub fn stage_transition(
        &self,
        step_id: &str,
        to: StepStatus,
        now: DateTime<Utc>,
    ) -> EngineResult<WorkflowStep> {
        let current = self
            .steps
            .get(step_id)
            .ok_or_else(|| EngineError::UnknownEntity {
                entity: "工序步骤",
                id: step_id.to_string(),
            })?;

        if !current.status.can_transition_to(to) {
            return Err(EngineError::conflict(
                step_id,
                current.status,
                format!("不允许转换为 {}", to),
            ));
        }

        let mut next = current.clone();
        next.status = to;
        next.updated_at = now;
        match to {
            StepStatus::Locked | StepStatus::Available => {
                next.assigned_operator_id = None;
                next.assigned_at = None;
                next.started_at = None;
                next.blocked_reason = None;
                if to == StepStatus::Available {
                    next.available_at = Some(now);
                }
            }
            StepStatus::Assigned => next.assigned_at = Some(now),
            StepStatus::InProgress => next.started_at = Some(now),
            StepStatus::Completed => next.completed_at = Some(now),
            StepStatus::Blocked => {}
        }
        Ok(next)
    }

    /// 提交已持久化的步骤
    pub fn commit(&mut self, step: WorkflowStep) -> EngineResult<()> {
        match self.steps.get_mut(&step.step_id) {
            Some(slot) => {
                *slot = step;
                Ok(())
            }
            None => Err(EngineError::UnknownEntity {
                entity: "工序步骤",
                id: step.step_id,
            }),
        }
    }
}

/// 展示顺序: sequence_number, 再按 operation_id
fn display_order(steps: &HashMap<String, WorkflowStep>) -> Vec<String> {
    let mut ordered: Vec<&WorkflowStep> = steps.values().collect();
    ordered.sort_by(|a, b| {
        a.sequence_number
            .cmp(&b.sequence_number)
            .then_with(|| a.operation_id.cmp(&b.operation_id))
    });
    ordered.into_iter().map(|s| s.step_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArticleTemplate, OperationTemplate};

    fn diamond() -> Arc<TemplateGraph> {
        let template = ArticleTemplate::new(
            "TPL-DIAMOND",
            "ART-01",
            vec![
                OperationTemplate::new("A", "裁剪", "cutter").with_sequence(1),
                OperationTemplate::new("B", "锁边", "overlock")
                    .with_sequence(2)
                    .with_depends_on(["A"]),
                OperationTemplate::new("C", "绣花", "embroidery")
                    .with_sequence(3)
                    .with_depends_on(["A"]),
                OperationTemplate::new("D", "整烫", "press")
                    .with_sequence(4)
                    .with_depends_on(["B", "C"]),
            ],
        );
        Arc::new(TemplateGraph::build(template).unwrap())
    }

    fn op_of(instance: &BundleWorkflowInstance, step_id: &str) -> String {
        instance.step(step_id).unwrap().operation_id.clone()
    }

    #[test]
    fn test_instantiate_roots_available_others_locked() {
        let instance =
            BundleWorkflowInstance::instantiate("B-1", diamond(), 20, StepPriority::High, Utc::now())
                .unwrap();

        let statuses: Vec<(String, StepStatus)> = instance
            .steps_ordered()
            .into_iter()
            .map(|s| (s.operation_id, s.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("A".to_string(), StepStatus::Available),
                ("B".to_string(), StepStatus::Locked),
                ("C".to_string(), StepStatus::Locked),
                ("D".to_string(), StepStatus::Locked),
            ]
        );

        let d = instance.step_for_operation("D").unwrap();
        let dep_ops: BTreeSet<String> = d.dependencies.iter().map(|id| op_of(&instance, id)).collect();
        let expected: BTreeSet<String> = ["B", "C"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dep_ops, expected);
        assert!(instance.steps_ordered().iter().all(|s| s.pieces == 20 && s.priority == StepPriority::High));
        assert_eq!(instance.available_step_ids().len(), 1);
    }

    #[test]
    fn test_dependents_follow_reverse_index() {
        let instance =
            BundleWorkflowInstance::instantiate("B-1", diamond(), 5, StepPriority::Normal, Utc::now())
                .unwrap();
        let a = instance.step_for_operation("A").unwrap().step_id.clone();

        let mut ops: Vec<String> = instance
            .dependents_of(&a)
            .iter()
            .map(|id| op_of(&instance, id))
            .collect();
        ops.sort();
        assert_eq!(ops, vec!["B", "C"]);
    }

    #[test]
    fn test_stage_does_not_mutate_until_commit() {
        let mut instance =
            BundleWorkflowInstance::instantiate("B-1", diamond(), 5, StepPriority::Normal, Utc::now())
                .unwrap();
        let a = instance.step_for_operation("A").unwrap().step_id.clone();
        let d = instance.step_for_operation("D").unwrap().step_id.clone();

        let staged = instance.stage_transition(&a, StepStatus::Assigned, Utc::now()).unwrap();
        assert_eq!(instance.step(&a).unwrap().status, StepStatus::Available);
        assert!(staged.assigned_at.is_some());

        instance.commit(staged).unwrap();
        assert_eq!(instance.step(&a).unwrap().status, StepStatus::Assigned);

        let err = instance
            .stage_transition(&d, StepStatus::InProgress, Utc::now())
            .unwrap_err();
        assert!(err.is_state_conflict());
        assert!(!instance.dependencies_satisfied(&d));
    }

    #[test]
    fn test_dependencies_satisfied_after_all_prerequisites_complete() {
        let mut instance =
            BundleWorkflowInstance::instantiate("B-1", diamond(), 5, StepPriority::Normal, Utc::now())
                .unwrap();
        let d = instance.step_for_operation("D").unwrap().step_id.clone();

        for op in ["B", "C"] {
            let mut step = instance.step_for_operation(op).unwrap().clone();
            step.status = StepStatus::Completed;
            instance.commit(step).unwrap();
            if op == "B" {
                assert!(!instance.dependencies_satisfied(&d));
            }
        }
        assert!(instance.dependencies_satisfied(&d));
        assert!(!instance.is_finished());
    }

    #[test]
    fn test_instantiate_rejects_empty_bundle() {
        assert!(BundleWorkflowInstance::instantiate("B-1", diamond(), 0, StepPriority::Normal, Utc::now())
            .unwrap_err()
            .is_validation());
        assert!(BundleWorkflowInstance::instantiate(" ", diamond(), 3, StepPriority::Normal, Utc::now())
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_restore_rebuilds_indexes_from_saved_steps() {
        let mut original =
            BundleWorkflowInstance::instantiate("B-9", diamond(), 8, StepPriority::Normal, Utc::now())
                .unwrap();
        let a = original.step_for_operation("A").unwrap().clone();
        let mut done = a.clone();
        done.status = StepStatus::Completed;
        original.commit(done).unwrap();

        let mut saved = original.steps_ordered();
        saved.reverse();
        let restored = BundleWorkflowInstance::restore(diamond(), saved).unwrap();

        assert_eq!(restored.bundle_id(), "B-9");
        assert_eq!(restored.step_ids(), original.step_ids());
        assert_eq!(restored.step_for_operation("A").unwrap().status, StepStatus::Completed);
        assert_eq!(restored.dependents_of(&a.step_id).len(), 2);
        assert!(restored.steps_ordered().iter().all(|s| s.template_id == "TPL-DIAMOND"));
    }

    #[test]
    fn test_restore_rejects_steps_not_matching_template() {
        let instance =
            BundleWorkflowInstance::instantiate("B-9", diamond(), 8, StepPriority::Normal, Utc::now())
                .unwrap();

        let mut partial = instance.steps_ordered();
        partial.pop();
        assert!(BundleWorkflowInstance::restore(diamond(), partial)
            .unwrap_err()
            .is_validation());

        let mut foreign = instance.steps_ordered();
        foreign[0].operation_id = "dyeing".to_string();
        assert!(BundleWorkflowInstance::restore(diamond(), foreign)
            .unwrap_err()
            .is_validation());

        assert!(BundleWorkflowInstance::restore(diamond(), Vec::new())
            .unwrap_err()
            .is_validation());
    }
}
