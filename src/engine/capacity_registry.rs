// ==========================================
// 成衣工序流转系统 - 操作工产能登记表
// ==========================================
// 职责: 实时跟踪操作工负荷、在岗状态与可用产能
// 并发: 不同操作工互不阻塞 (每人一把锁);
//       同一操作工的负荷读改写在其锁内完成
// 持久化: 先写网关,成功后再落内存 (全有或全无)
// ==========================================

use crate::domain::capacity::{CapacityConstraint, OperatorCapacity};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::PersistenceGateway;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, instrument};

/// 负荷变更方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadChange {
    /// 增量 (正为占用,负为释放),结果截断到 ≥ 0
    Delta(i64),
    /// 直接设定
    Absolute(u32),
}

/// 负荷变更结果
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadUpdate {
    pub operator_id: String,
    pub previous_workload: u32,
    pub current_workload: u32,
    pub available_capacity_percent: f64,
    /// 是否由低于阈值跨越到阈值及以上 (触发重扫)
    pub crossed_threshold: bool,
}

// ==========================================
// CapacityRegistry - 产能登记表
// ==========================================
pub struct CapacityRegistry {
    operators: RwLock<HashMap<String, Arc<Mutex<OperatorCapacity>>>>,
    store: Arc<dyn PersistenceGateway>,
    capacity_threshold_pct: f64,
}

impl CapacityRegistry {
    /// 创建登记表
    ///
    /// # 参数
    /// - store: 持久化网关
    /// - capacity_threshold_pct: 负荷阈值 (如 80 表示可用产能须 ≥ 20%)
    pub fn new(store: Arc<dyn PersistenceGateway>, capacity_threshold_pct: f64) -> Self {
        Self {
            operators: RwLock::new(HashMap::new()),
            store,
            capacity_threshold_pct,
        }
    }

    pub fn capacity_threshold_pct(&self) -> f64 {
        self.capacity_threshold_pct
    }

    /// 从网关加载全部操作工 (启动时调用)
    pub fn hydrate(&self) -> EngineResult<usize> {
        let loaded = self.store.list_operators(None, &BTreeSet::new())?;
        let mut operators = self
            .operators
            .write()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;

        let count = loaded.len();
        for op in loaded {
            operators.insert(op.operator_id.clone(), Arc::new(Mutex::new(op)));
        }
        info!(operators = count, "产能登记表已加载");
        Ok(count)
    }

    /// 操作工入职登记
    pub fn register(&self, operator: OperatorCapacity) -> EngineResult<()> {
        if operator.operator_id.trim().is_empty() {
            return Err(EngineError::validation("操作工ID不能为空"));
        }
        if operator.machine_type.trim().is_empty() {
            return Err(EngineError::validation(format!(
                "操作工 {} 未指定机型",
                operator.operator_id
            )));
        }
        if operator.max_capacity_per_hour == 0 {
            return Err(EngineError::validation(format!(
                "操作工 {} 每小时产能必须大于 0",
                operator.operator_id
            )));
        }

        let mut operators = self
            .operators
            .write()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        if operators.contains_key(&operator.operator_id) {
            return Err(EngineError::validation(format!(
                "操作工已登记: {}",
                operator.operator_id
            )));
        }

        self.store.save_operator(&operator)?;
        info!(
            operator_id = %operator.operator_id,
            machine_type = %operator.machine_type,
            skills = ?operator.skills,
            "操作工已登记"
        );
        operators.insert(operator.operator_id.clone(), Arc::new(Mutex::new(operator)));
        Ok(())
    }

    fn entry(&self, operator_id: &str) -> EngineResult<Arc<Mutex<OperatorCapacity>>> {
        let operators = self
            .operators
            .read()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        operators
            .get(operator_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEntity {
                entity: "操作工",
                id: operator_id.to_string(),
            })
    }

    /// 在操作工锁内计算新值,持久化成功后替换
    ///
    /// `f` 返回 None 表示不做变更
    fn mutate<F>(
        &self,
        operator_id: &str,
        f: F,
    ) -> EngineResult<Option<(OperatorCapacity, OperatorCapacity)>>
    where
        F: FnOnce(&OperatorCapacity) -> Option<OperatorCapacity>,
    {
        let entry = self.entry(operator_id)?;
        let mut guard = entry
            .lock()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;

        match f(&guard) {
            Some(next) => {
                self.store.save_operator(&next)?;
                let before = std::mem::replace(&mut *guard, next.clone());
                Ok(Some((before, next)))
            }
            None => Ok(None),
        }
    }

    fn to_update(&self, before: &OperatorCapacity, after: &OperatorCapacity) -> WorkloadUpdate {
        WorkloadUpdate {
            operator_id: after.operator_id.clone(),
            previous_workload: before.current_workload,
            current_workload: after.current_workload,
            available_capacity_percent: after.available_capacity_percent(),
            crossed_threshold: !before.meets_threshold(self.capacity_threshold_pct)
                && after.meets_threshold(self.capacity_threshold_pct),
        }
    }

    /// 原子调整负荷
    ///
    /// # 返回
    /// - WorkloadUpdate.crossed_threshold: 是否由低于阈值跨越到阈值及以上
    #[instrument(skip(self))]
    pub fn update_workload(
        &self,
        operator_id: &str,
        change: WorkloadChange,
    ) -> EngineResult<WorkloadUpdate> {
        let (before, after) = self
            .mutate(operator_id, |current| {
                let mut next = current.clone();
                next.current_workload = match change {
                    WorkloadChange::Delta(delta) => {
                        (current.current_workload as i64 + delta).clamp(0, u32::MAX as i64) as u32
                    }
                    WorkloadChange::Absolute(value) => value,
                };
                Some(next)
            })?
            .ok_or_else(|| EngineError::validation("负荷变更未生效"))?;

        let update = self.to_update(&before, &after);
        debug!(
            operator_id = %operator_id,
            previous = update.previous_workload,
            current = update.current_workload,
            available_pct = update.available_capacity_percent,
            crossed = update.crossed_threshold,
            "操作工负荷已更新"
        );
        Ok(update)
    }

    /// 条件占用: 在操作工锁内复核资格与阈值后占用件数
    ///
    /// # 返回
    /// - Ok(Some): 占用成功
    /// - Ok(None): 复核不通过 (并发下已被其他指派占满/下线)
    pub fn try_reserve(
        &self,
        operator_id: &str,
        pieces: u32,
        machine_type: &str,
        required_skills: &BTreeSet<String>,
    ) -> EngineResult<Option<WorkloadUpdate>> {
        let threshold = self.capacity_threshold_pct;
        let result = self.mutate(operator_id, |current| {
            if !current.is_on_duty()
                || !current.is_qualified_for(machine_type, required_skills)
                || !current.meets_threshold(threshold)
            {
                return None;
            }
            let mut next = current.clone();
            next.current_workload = current.current_workload.saturating_add(pieces);
            Some(next)
        })?;

        Ok(result.map(|(before, after)| self.to_update(&before, &after)))
    }

    /// 设置休息状态
    ///
    /// # 返回
    /// - true: 结束休息且可用产能满足阈值 (可触发重扫)
    pub fn set_on_break(&self, operator_id: &str, on_break: bool) -> EngineResult<bool> {
        let threshold = self.capacity_threshold_pct;
        let result = self.mutate(operator_id, |current| {
            if current.on_break == on_break {
                return None;
            }
            let mut next = current.clone();
            next.on_break = on_break;
            Some(next)
        })?;

        match result {
            Some((before, after)) => {
                info!(operator_id = %operator_id, on_break, "操作工休息状态变更");
                Ok(!before.is_on_duty() && after.is_on_duty() && after.meets_threshold(threshold))
            }
            None => Ok(false),
        }
    }

    /// 操作工离职/停用
    pub fn deactivate(&self, operator_id: &str) -> EngineResult<()> {
        self.mutate(operator_id, |current| {
            if !current.active {
                return None;
            }
            let mut next = current.clone();
            next.active = false;
            Some(next)
        })?;
        info!(operator_id = %operator_id, "操作工已停用");
        Ok(())
    }

    /// 操作工快照
    pub fn get(&self, operator_id: &str) -> EngineResult<OperatorCapacity> {
        let entry = self.entry(operator_id)?;
        let guard = entry
            .lock()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        Ok(guard.clone())
    }

    /// 查询合格操作工
    ///
    /// 条件: 机型一致、技能为超集、在岗未休息、可用产能 ≥ 100 - 阈值
    pub fn query_qualified(
        &self,
        machine_type: &str,
        required_skills: &BTreeSet<String>,
        capacity_threshold_pct: f64,
    ) -> EngineResult<Vec<OperatorCapacity>> {
        let entries: Vec<Arc<Mutex<OperatorCapacity>>> = {
            let operators = self
                .operators
                .read()
                .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
            operators.values().cloned().collect()
        };

        let mut qualified = Vec::new();
        for entry in entries {
            let op = entry
                .lock()
                .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
            if op.is_on_duty()
                && op.is_qualified_for(machine_type, required_skills)
                && op.meets_threshold(capacity_threshold_pct)
            {
                qualified.push(op.clone());
            }
        }
        Ok(qualified)
    }
}
