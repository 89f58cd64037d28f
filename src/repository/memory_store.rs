// ==========================================
// 成衣工序流转系统 - 内存持久化网关
// ==========================================
// 用途: 单元/集成测试、嵌入式部署
// 说明: 显式注入编排器,不做进程级单例
// ==========================================

use crate::domain::{ArticleTemplate, OperatorCapacity, StepStatus, WorkflowStep};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::gateway::PersistenceGateway;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

/// 内存仓储
#[derive(Default)]
pub struct InMemoryStore {
    templates: Mutex<HashMap<String, ArticleTemplate>>,
    steps: Mutex<HashMap<String, WorkflowStep>>,
    operators: Mutex<HashMap<String, OperatorCapacity>>,
}

fn lock<T>(m: &Mutex<T>) -> RepositoryResult<MutexGuard<'_, T>> {
    m.lock().map_err(|e| RepositoryError::LockError(e.to_string()))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前保存的工序步骤数
    pub fn step_count(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl PersistenceGateway for InMemoryStore {
    fn load_template(&self, template_id: &str) -> RepositoryResult<Option<ArticleTemplate>> {
        Ok(lock(&self.templates)?.get(template_id).cloned())
    }

    fn save_template(&self, template: &ArticleTemplate) -> RepositoryResult<()> {
        let mut templates = lock(&self.templates)?;
        if templates.contains_key(&template.template_id) {
            return Err(RepositoryError::UniqueConstraintViolation(format!(
                "article_template.template_id={}",
                template.template_id
            )));
        }
        templates.insert(template.template_id.clone(), template.clone());
        Ok(())
    }

    fn load_step(&self, step_id: &str) -> RepositoryResult<Option<WorkflowStep>> {
        Ok(lock(&self.steps)?.get(step_id).cloned())
    }

    fn save_step(&self, step: &WorkflowStep) -> RepositoryResult<()> {
        lock(&self.steps)?.insert(step.step_id.clone(), step.clone());
        Ok(())
    }

    fn save_steps(&self, steps: &[WorkflowStep]) -> RepositoryResult<()> {
        // 单锁内批量写入,天然原子
        let mut guard = lock(&self.steps)?;
        for step in steps {
            guard.insert(step.step_id.clone(), step.clone());
        }
        Ok(())
    }

    fn list_steps_by_bundle(&self, bundle_id: &str) -> RepositoryResult<Vec<WorkflowStep>> {
        let mut steps: Vec<WorkflowStep> = lock(&self.steps)?
            .values()
            .filter(|s| s.bundle_id == bundle_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| {
            a.sequence_number
                .cmp(&b.sequence_number)
                .then_with(|| a.operation_id.cmp(&b.operation_id))
        });
        Ok(steps)
    }

    fn list_open_bundle_ids(&self) -> RepositoryResult<Vec<String>> {
        let ids: BTreeSet<String> = lock(&self.steps)?
            .values()
            .filter(|s| s.status != StepStatus::Completed)
            .map(|s| s.bundle_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    fn load_operator(&self, operator_id: &str) -> RepositoryResult<Option<OperatorCapacity>> {
        Ok(lock(&self.operators)?.get(operator_id).cloned())
    }

    fn save_operator(&self, operator: &OperatorCapacity) -> RepositoryResult<()> {
        lock(&self.operators)?.insert(operator.operator_id.clone(), operator.clone());
        Ok(())
    }

    fn list_operators(
        &self,
        machine_type: Option<&str>,
        required_skills: &BTreeSet<String>,
    ) -> RepositoryResult<Vec<OperatorCapacity>> {
        let mut operators: Vec<OperatorCapacity> = lock(&self.operators)?
            .values()
            .filter(|op| machine_type.map_or(true, |mt| op.machine_type == mt))
            .filter(|op| op.skills.is_superset(required_skills))
            .cloned()
            .collect();
        operators.sort_by(|a, b| a.operator_id.cmp(&b.operator_id));
        Ok(operators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OperationTemplate;

    #[test]
    fn test_list_operators_filters_machine_and_skills() {
        let store = InMemoryStore::new();
        store
            .save_operator(&OperatorCapacity::new("O2", "overlock", 30).with_skills(["serging"]))
            .unwrap();
        store
            .save_operator(&OperatorCapacity::new("O1", "overlock", 30).with_skills(["serging", "binding"]))
            .unwrap();
        store
            .save_operator(&OperatorCapacity::new("O3", "cutting", 30))
            .unwrap();

        let all = store.list_operators(None, &BTreeSet::new()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].operator_id, "O1");

        let binding: BTreeSet<String> = ["binding".to_string()].into_iter().collect();
        let found = store.list_operators(Some("overlock"), &binding).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].operator_id, "O1");
    }

    #[test]
    fn test_duplicate_template_rejected() {
        let store = InMemoryStore::new();
        let template = ArticleTemplate::new(
            "TPL-1",
            "TEE",
            vec![OperationTemplate::new("cutting", "裁剪", "cutter")],
        );
        store.save_template(&template).unwrap();

        let err = store.save_template(&template).unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));
    }
}
