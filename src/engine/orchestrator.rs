// ==========================================
// 成衣工序流转系统 - 工序编排器 (完工级联)
// ==========================================
// 职责: 状态转换、产能释放、后继解锁、触发分派与通知
// 并发:
// - 每个批次一把锁,批次内所有转换串行,级联对后续读者原子可见
// - 不同批次完全并行,无跨批次锁
// - 锁顺序固定为 批次 → 操作工; 重扫在释放批次锁后进行
// - 投产时先在 pending 集合预留批次ID,网关读写期间不持有批次表锁
// 持久化: 暂存 → 网关写入 → 内存提交; 写入失败时步骤保持转换前状态
// 通知: 仅投递到出站队列,失败不影响任何转换
// ==========================================

use crate::config::EngineConfig;
use crate::domain::{
    ArticleTemplate, AssignmentPolicy, CapacityConstraint, NotificationKind, OperatorCapacity,
    StepPriority, StepStatus, WorkflowStep,
};
use crate::engine::capacity_registry::{CapacityRegistry, WorkloadChange, WorkloadUpdate};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{NotificationOutbox, StepNotification};
use crate::engine::selector::{AssignmentSelector, SelectionOutcome};
use crate::engine::template_graph::{OperationTemplateGraph, TemplateGraph};
use crate::engine::workflow_instance::BundleWorkflowInstance;
use crate::repository::{PersistenceGateway, RepositoryError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};

type SharedBundle = Arc<Mutex<BundleWorkflowInstance>>;

// ==========================================
// 结果类型
// ==========================================

/// 完工级联结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    /// 已完工步骤
    pub completed_step: WorkflowStep,
    /// 本次解锁为 AVAILABLE 的后继步骤
    pub unlocked_step_ids: Vec<String>,
    /// 批次是否全部完工 (已归档)
    pub bundle_finished: bool,
    /// 产能释放是否跨越阈值并触发重扫
    pub rescan_triggered: bool,
}

/// 操作工负荷视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorWorkload {
    pub operator: OperatorCapacity,
    /// 已指派/加工中的步骤
    pub assigned_steps: Vec<WorkflowStep>,
    /// 具备资格但未指派的 AVAILABLE 步骤
    pub eligible_steps: Vec<WorkflowStep>,
}

// ==========================================
// WorkflowOrchestrator
// ==========================================
pub struct WorkflowOrchestrator {
    store: Arc<dyn PersistenceGateway>,
    graph: OperationTemplateGraph,
    registry: CapacityRegistry,
    selector: AssignmentSelector,
    outbox: NotificationOutbox,
    assignment_expiry: Duration,
    bundles: RwLock<HashMap<String, SharedBundle>>,
    step_index: RwLock<HashMap<String, String>>,
    pending_bundles: Mutex<HashSet<String>>,
}

/// 投产中的批次ID预留,drop 时释放
struct PendingBundle<'a> {
    pending: &'a Mutex<HashSet<String>>,
    bundle_id: String,
}

impl Drop for PendingBundle<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.bundle_id);
        }
    }
}

fn lock_bundle(bundle: &SharedBundle) -> EngineResult<MutexGuard<'_, BundleWorkflowInstance>> {
    bundle
        .lock()
        .map_err(|e| EngineError::LockPoisoned(e.to_string()))
}

impl WorkflowOrchestrator {
    /// 创建编排器
    ///
    /// # 参数
    /// - config: 引擎配置 (非法时返回 Validation)
    /// - store: 持久化网关
    /// - outbox: 通知出站队列
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn PersistenceGateway>,
        outbox: NotificationOutbox,
    ) -> EngineResult<Self> {
        config.validate().map_err(EngineError::Validation)?;

        let expiry_secs = i64::try_from(config.assignment_expiry_secs)
            .map_err(|_| EngineError::validation("指派超时时长过大"))?;

        info!(
            policy = %config.assignment_policy,
            capacity_threshold_pct = config.capacity_threshold_pct,
            assignment_expiry_secs = config.assignment_expiry_secs,
            "工序编排器初始化"
        );

        Ok(Self {
            registry: CapacityRegistry::new(store.clone(), config.capacity_threshold_pct),
            selector: AssignmentSelector::new(
                config.assignment_policy,
                config.capacity_threshold_pct,
            ),
            store,
            graph: OperationTemplateGraph::new(),
            outbox,
            assignment_expiry: Duration::seconds(expiry_secs),
            bundles: RwLock::new(HashMap::new()),
            step_index: RwLock::new(HashMap::new()),
            pending_bundles: Mutex::new(HashSet::new()),
        })
    }

    pub fn registry(&self) -> &CapacityRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &OperationTemplateGraph {
        &self.graph
    }

    pub fn policy(&self) -> AssignmentPolicy {
        self.selector.policy()
    }

    // ==========================================
    // 模板
    // ==========================================

    /// 注册款式模板 (校验 + 持久化 + 入图)
    #[instrument(skip(self, template), fields(template_id = %template.template_id))]
    pub fn register_template(&self, template: ArticleTemplate) -> EngineResult<Arc<TemplateGraph>> {
        let graph = TemplateGraph::build(template)?;
        if self.graph.get(graph.template_id())?.is_some() {
            return Err(EngineError::validation(format!(
                "模板已注册: {}",
                graph.template_id()
            )));
        }

        match self.store.save_template(graph.template()) {
            Ok(()) => {}
            // 已落库 (重启后或并发注册): 模板不可变
            Err(RepositoryError::UniqueConstraintViolation(_)) => {
                return Err(EngineError::validation(format!(
                    "模板已注册: {}",
                    graph.template_id()
                )));
            }
            Err(e) => return Err(e.into()),
        }
        self.graph.insert(graph)
    }

    /// 按ID取模板,未在内存时从网关加载并注册
    pub fn resolve_template(&self, template_id: &str) -> EngineResult<Arc<TemplateGraph>> {
        if let Some(graph) = self.graph.get(template_id)? {
            return Ok(graph);
        }

        let template = self
            .store
            .load_template(template_id)?
            .ok_or_else(|| EngineError::UnknownEntity {
                entity: "模板",
                id: template_id.to_string(),
            })?;

        debug!(template_id = %template_id, "从持久化加载模板");
        match self.graph.insert(TemplateGraph::build(template)?) {
            Ok(graph) => Ok(graph),
            // 并发加载时由先到者注册
            Err(e) => self.graph.get(template_id)?.ok_or(e),
        }
    }

    // ==========================================
    // 操作工
    // ==========================================

    /// 操作工入职,随后为其重扫可领取工序
    #[instrument(skip(self, operator), fields(operator_id = %operator.operator_id))]
    pub fn register_operator(&self, operator: OperatorCapacity) -> EngineResult<()> {
        let operator_id = operator.operator_id.clone();
        self.registry.register(operator)?;
        self.rescan_logged(&operator_id);
        Ok(())
    }

    /// 设置休息状态; 结束休息且产能满足阈值时触发重扫
    #[instrument(skip(self))]
    pub fn set_operator_break(&self, operator_id: &str, on_break: bool) -> EngineResult<bool> {
        let became_available = self.registry.set_on_break(operator_id, on_break)?;
        if became_available {
            self.rescan_logged(operator_id);
        }
        Ok(became_available)
    }

    /// 操作工离职
    ///
    /// 已持有的 ASSIGNED 步骤由超时巡检收回
    #[instrument(skip(self))]
    pub fn deactivate_operator(&self, operator_id: &str) -> EngineResult<()> {
        self.registry.deactivate(operator_id)
    }

    /// 调整操作工负荷; 跨越阈值时触发重扫
    #[instrument(skip(self))]
    pub fn update_operator_capacity(
        &self,
        operator_id: &str,
        change: WorkloadChange,
    ) -> EngineResult<WorkloadUpdate> {
        let update = self.registry.update_workload(operator_id, change)?;
        if update.crossed_threshold {
            self.rescan_logged(operator_id);
        }
        Ok(update)
    }

    // ==========================================
    // 批次
    // ==========================================

    /// 批次投产: 实例化全部工序并分派起始工序
    ///
    /// # 返回
    /// 分派完成后的步骤快照 (按展示序号)
    #[instrument(skip(self))]
    pub fn create_workflow(
        &self,
        bundle_id: &str,
        template_id: &str,
        piece_count: u32,
        priority: StepPriority,
    ) -> EngineResult<Vec<WorkflowStep>> {
        let template = self.resolve_template(template_id)?;
        let now = Utc::now();
        let instance =
            BundleWorkflowInstance::instantiate(bundle_id, template, piece_count, priority, now)?;

        let _reservation = self.reserve_bundle_id(bundle_id)?;
        if !self.store.list_steps_by_bundle(bundle_id)?.is_empty() {
            return Err(EngineError::validation(format!("批次已存在: {}", bundle_id)));
        }
        self.store.save_steps(&instance.steps_ordered())?;
        let shared = self.install_bundle(instance)?;

        let mut guard = lock_bundle(&shared)?;
        info!(
            bundle_id = %bundle_id,
            template_id = %template_id,
            piece_count,
            steps = guard.step_ids().len(),
            "批次已投产"
        );

        for step_id in guard.available_step_ids() {
            self.dispatch_logged(&mut guard, &step_id, None, now);
        }
        Ok(guard.steps_ordered())
    }

    /// 进程启动时恢复未完工批次
    ///
    /// 由网关中的步骤记录与其模板重建实例,随后为 AVAILABLE 步骤重新分派;
    /// 单个批次恢复失败时记录告警并跳过
    ///
    /// # 返回
    /// 恢复的批次数
    #[instrument(skip(self))]
    pub fn recover_bundles(&self) -> EngineResult<usize> {
        let now = Utc::now();
        let mut recovered = 0;

        for bundle_id in self.store.list_open_bundle_ids()? {
            let bundle = match self.load_bundle(&bundle_id) {
                Ok(Some(bundle)) => bundle,
                Ok(None) => continue,
                Err(e) => {
                    warn!(bundle_id = %bundle_id, error = %e, "批次恢复失败");
                    continue;
                }
            };
            recovered += 1;

            let mut guard = lock_bundle(&bundle)?;
            for step_id in guard.available_step_ids() {
                self.dispatch_logged(&mut guard, &step_id, None, now);
            }
        }

        info!(recovered, "未完工批次已恢复");
        Ok(recovered)
    }

    // ==========================================
    // 步骤命令
    // ==========================================

    /// 抢单 (仅 BROADCAST_CLAIM)
    ///
    /// 在批次锁内比较并交换 (AVAILABLE, 无人) → (ASSIGNED, operator);
    /// 并发抢单仅一人成功,其余返回 StateConflict 且无任何变更
    #[instrument(skip(self))]
    pub fn claim_step(&self, step_id: &str, operator_id: &str) -> EngineResult<WorkflowStep> {
        if self.policy() != AssignmentPolicy::BroadcastClaim {
            return Err(EngineError::validation("当前分派策略为直接指派,不支持抢单"));
        }
        let operator = self.registry.get(operator_id)?;

        let bundle = self.locate_step(step_id)?;
        let mut guard = lock_bundle(&bundle)?;
        let current = guard
            .step(step_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEntity {
                entity: "工序步骤",
                id: step_id.to_string(),
            })?;
        if !current.is_claimable() {
            return Err(EngineError::conflict(step_id, current.status, "工序不可领取"));
        }

        let operation = guard
            .operation_for(step_id)
            .cloned()
            .ok_or_else(|| EngineError::validation(format!("步骤 {} 缺少工序模板", step_id)))?;
        if !operator.is_on_duty()
            || !operator.is_qualified_for(&operation.machine_type, &operation.required_skills)
        {
            return Err(EngineError::validation(format!(
                "操作工 {} 不具备工序 {} 的资格或不在岗",
                operator_id, operation.operation_id
            )));
        }

        let now = Utc::now();
        let mut staged = guard.stage_transition(step_id, StepStatus::Assigned, now)?;
        staged.assigned_operator_id = Some(operator_id.to_string());

        let reserved = self.registry.try_reserve(
            operator_id,
            current.pieces,
            &operation.machine_type,
            &operation.required_skills,
        )?;
        if reserved.is_none() {
            return Err(EngineError::validation(format!(
                "操作工 {} 可用产能不足",
                operator_id
            )));
        }

        if let Err(e) = self.store.save_step(&staged) {
            self.release_logged(operator_id, current.pieces);
            return Err(e.into());
        }
        guard.commit(staged.clone())?;

        info!(
            step_id = %step_id,
            bundle_id = %staged.bundle_id,
            operator_id = %operator_id,
            from = %StepStatus::Available,
            to = %StepStatus::Assigned,
            "抢单成功"
        );
        Ok(staged)
    }

    /// 开工: 仅 ASSIGNED 且操作工一致时转为 IN_PROGRESS
    #[instrument(skip(self))]
    pub fn start_step(&self, step_id: &str, operator_id: &str) -> EngineResult<WorkflowStep> {
        let bundle = self.locate_step(step_id)?;
        let mut guard = lock_bundle(&bundle)?;
        let current = self.held_step(&guard, step_id, operator_id, StepStatus::Assigned)?;

        let staged = guard.stage_transition(step_id, StepStatus::InProgress, Utc::now())?;
        self.store.save_step(&staged)?;
        guard.commit(staged.clone())?;

        info!(
            step_id = %step_id,
            bundle_id = %current.bundle_id,
            operator_id = %operator_id,
            from = %current.status,
            to = %staged.status,
            "工序开工"
        );
        Ok(staged)
    }

    /// 完工级联
    ///
    /// 1) 校验 IN_PROGRESS 且操作工一致
    /// 2) 释放完工件数对应产能
    /// 3) 经反向索引找出前置已全部完成的 LOCKED 后继
    /// 4) 完工步骤与解锁后继同批持久化,成功后一并提交
    /// 5) 逐个分派解锁的后继; 批次全部完工则归档
    /// 6) 释放批次锁后,若产能跨越阈值则重扫
    #[instrument(skip(self))]
    pub fn complete_step(
        &self,
        step_id: &str,
        operator_id: &str,
        pieces_completed: u32,
    ) -> EngineResult<CompletionReport> {
        let bundle = self.locate_step(step_id)?;
        let mut guard = lock_bundle(&bundle)?;
        let current = self.held_step(&guard, step_id, operator_id, StepStatus::InProgress)?;

        if pieces_completed > current.pieces {
            return Err(EngineError::validation(format!(
                "完工件数 {} 超过批次件数 {}",
                pieces_completed, current.pieces
            )));
        }

        let now = Utc::now();
        let mut completed = guard.stage_transition(step_id, StepStatus::Completed, now)?;
        completed.completed_pieces = pieces_completed;

        let mut batch = vec![completed.clone()];
        for dependent_id in guard.dependents_of(step_id) {
            let is_locked = guard
                .step(&dependent_id)
                .map_or(false, |s| s.status == StepStatus::Locked);
            if is_locked && guard.dependencies_satisfied_with(&dependent_id, step_id) {
                batch.push(guard.stage_transition(&dependent_id, StepStatus::Available, now)?);
            }
        }

        let release = self
            .registry
            .update_workload(operator_id, WorkloadChange::Delta(-i64::from(pieces_completed)))?;

        if let Err(e) = self.store.save_steps(&batch) {
            if let Err(undo) = self
                .registry
                .update_workload(operator_id, WorkloadChange::Delta(i64::from(pieces_completed)))
            {
                warn!(operator_id = %operator_id, error = %undo, "产能释放回补失败");
            }
            return Err(e.into());
        }

        let unlocked_step_ids: Vec<String> =
            batch.iter().skip(1).map(|s| s.step_id.clone()).collect();
        for step in batch {
            guard.commit(step)?;
        }

        info!(
            step_id = %step_id,
            bundle_id = %current.bundle_id,
            operator_id = %operator_id,
            from = %current.status,
            to = %StepStatus::Completed,
            pieces_completed,
            unlocked = unlocked_step_ids.len(),
            "工序完工"
        );

        for dependent_id in &unlocked_step_ids {
            info!(
                step_id = %dependent_id,
                bundle_id = %current.bundle_id,
                from = %StepStatus::Locked,
                to = %StepStatus::Available,
                "后继工序解锁"
            );
            self.dispatch_logged(&mut guard, dependent_id, None, now);
        }

        let bundle_finished = guard.is_finished();
        let bundle_id = guard.bundle_id().to_string();
        drop(guard);

        if bundle_finished {
            self.archive_bundle(&bundle_id)?;
        }
        if release.crossed_threshold {
            self.rescan_logged(operator_id);
        }

        Ok(CompletionReport {
            completed_step: completed,
            unlocked_step_ids,
            bundle_finished,
            rescan_triggered: release.crossed_threshold,
        })
    }

    /// 阻断: 任意非终态 → BLOCKED
    ///
    /// ASSIGNED / IN_PROGRESS 步骤释放占用产能并清除操作工
    #[instrument(skip(self))]
    pub fn block_step(&self, step_id: &str, reason: &str) -> EngineResult<WorkflowStep> {
        if reason.trim().is_empty() {
            return Err(EngineError::validation("阻断原因不能为空"));
        }

        let bundle = self.locate_step(step_id)?;
        let mut guard = lock_bundle(&bundle)?;
        let current = guard
            .step(step_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEntity {
                entity: "工序步骤",
                id: step_id.to_string(),
            })?;

        let mut staged = guard.stage_transition(step_id, StepStatus::Blocked, Utc::now())?;
        staged.blocked_reason = Some(reason.trim().to_string());
        staged.assigned_operator_id = None;
        staged.assigned_at = None;
        staged.started_at = None;

        let held = current.reserved_workload();
        let release = match (&current.assigned_operator_id, held) {
            (Some(op), pieces) if pieces > 0 => Some((
                op.clone(),
                self.registry
                    .update_workload(op, WorkloadChange::Delta(-i64::from(pieces)))?,
            )),
            _ => None,
        };

        if let Err(e) = self.store.save_step(&staged) {
            if let Some((op, _)) = &release {
                if let Err(undo) = self
                    .registry
                    .update_workload(op, WorkloadChange::Delta(i64::from(held)))
                {
                    warn!(operator_id = %op, error = %undo, "产能释放回补失败");
                }
            }
            return Err(e.into());
        }
        guard.commit(staged.clone())?;
        drop(guard);

        info!(
            step_id = %step_id,
            bundle_id = %staged.bundle_id,
            from = %current.status,
            to = %StepStatus::Blocked,
            reason = %reason,
            "工序阻断"
        );

        if let Some((op, update)) = release {
            if update.crossed_threshold {
                self.rescan_logged(&op);
            }
        }
        Ok(staged)
    }

    /// 解除阻断: BLOCKED → AVAILABLE | LOCKED
    ///
    /// 目标状态须与前置完成情况一致; AVAILABLE 时立即分派
    #[instrument(skip(self))]
    pub fn resolve_block(&self, step_id: &str, target: StepStatus) -> EngineResult<WorkflowStep> {
        if !matches!(target, StepStatus::Available | StepStatus::Locked) {
            return Err(EngineError::validation(format!(
                "解除阻断的目标状态只能是 AVAILABLE 或 LOCKED: {}",
                target
            )));
        }

        let bundle = self.locate_step(step_id)?;
        let mut guard = lock_bundle(&bundle)?;
        let current = guard
            .step(step_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEntity {
                entity: "工序步骤",
                id: step_id.to_string(),
            })?;
        if current.status != StepStatus::Blocked {
            return Err(EngineError::conflict(step_id, current.status, "工序未处于阻断状态"));
        }

        let satisfied = guard.dependencies_satisfied(step_id);
        if satisfied != (target == StepStatus::Available) {
            return Err(EngineError::validation(format!(
                "目标状态 {} 与前置完成情况不符 (前置已全部完成: {})",
                target, satisfied
            )));
        }

        let now = Utc::now();
        let staged = guard.stage_transition(step_id, target, now)?;
        self.store.save_step(&staged)?;
        guard.commit(staged.clone())?;

        info!(
            step_id = %step_id,
            bundle_id = %staged.bundle_id,
            from = %StepStatus::Blocked,
            to = %target,
            "工序解除阻断"
        );

        if target == StepStatus::Available {
            self.dispatch_logged(&mut guard, step_id, None, now);
        }
        Ok(guard.step(step_id).cloned().unwrap_or(staged))
    }

    // ==========================================
    // 超时巡检
    // ==========================================

    /// 收回超时未开工的指派
    ///
    /// ASSIGNED 且指派时间早于 (now - 超时时长) 的步骤回到 AVAILABLE,
    /// 释放占用产能,通知原操作工并在排除其后重新分派
    ///
    /// # 返回
    /// 被收回的步骤ID
    #[instrument(skip(self))]
    pub fn expire_stale_assignments(&self, now: DateTime<Utc>) -> EngineResult<Vec<String>> {
        let cutoff = now - self.assignment_expiry;
        let mut expired = Vec::new();

        for bundle in self.active_bundles()? {
            let mut guard = lock_bundle(&bundle)?;
            let stale: Vec<WorkflowStep> = guard
                .steps_ordered()
                .into_iter()
                .filter(|s| {
                    s.status == StepStatus::Assigned && s.assigned_at.map_or(false, |t| t <= cutoff)
                })
                .collect();

            for step in stale {
                match self.expire_one(&mut guard, &step, now) {
                    Ok(()) => expired.push(step.step_id.clone()),
                    Err(e) => warn!(step_id = %step.step_id, error = %e, "超时收回失败"),
                }
            }
        }

        if !expired.is_empty() {
            info!(expired = expired.len(), "超时指派已收回");
        }
        Ok(expired)
    }

    fn expire_one(
        &self,
        instance: &mut BundleWorkflowInstance,
        step: &WorkflowStep,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let Some(operator_id) = step.assigned_operator_id.clone() else {
            return Err(EngineError::conflict(&step.step_id, step.status, "指派缺少操作工"));
        };

        let staged = instance.stage_transition(&step.step_id, StepStatus::Available, now)?;
        self.registry
            .update_workload(&operator_id, WorkloadChange::Delta(-i64::from(step.pieces)))?;

        if let Err(e) = self.store.save_step(&staged) {
            self.reserve_back_logged(&operator_id, step.pieces);
            return Err(e.into());
        }
        instance.commit(staged)?;

        info!(
            step_id = %step.step_id,
            bundle_id = %step.bundle_id,
            operator_id = %operator_id,
            from = %StepStatus::Assigned,
            to = %StepStatus::Available,
            "指派超时收回"
        );
        self.notify(&operator_id, step, NotificationKind::Expired);
        self.dispatch_logged(instance, &step.step_id, Some(&operator_id), now);
        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 批次工序状态 (按展示序号); 已归档批次从网关读取
    pub fn get_workflow_status(&self, bundle_id: &str) -> EngineResult<Vec<WorkflowStep>> {
        let active = {
            let bundles = self
                .bundles
                .read()
                .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
            bundles.get(bundle_id).cloned()
        };

        if let Some(bundle) = active {
            return Ok(lock_bundle(&bundle)?.steps_ordered());
        }

        let steps = self.store.list_steps_by_bundle(bundle_id)?;
        if steps.is_empty() {
            return Err(EngineError::UnknownEntity {
                entity: "批次",
                id: bundle_id.to_string(),
            });
        }
        Ok(steps)
    }

    /// 操作工负荷: 已持有步骤 + 可领取但未指派的合格步骤
    pub fn get_operator_workload(&self, operator_id: &str) -> EngineResult<OperatorWorkload> {
        let operator = self.registry.get(operator_id)?;
        let mut assigned_steps = Vec::new();
        let mut eligible_steps = Vec::new();

        for bundle in self.active_bundles()? {
            let guard = lock_bundle(&bundle)?;
            assigned_steps.extend(
                guard
                    .steps_held_by(operator_id)
                    .into_iter()
                    .filter(|s| s.reserved_workload() > 0),
            );

            for step_id in guard.available_step_ids() {
                let qualified = guard.operation_for(&step_id).map_or(false, |op| {
                    operator.is_qualified_for(&op.machine_type, &op.required_skills)
                });
                if qualified {
                    if let Some(step) = guard.step(&step_id) {
                        eligible_steps.push(step.clone());
                    }
                }
            }
        }

        Ok(OperatorWorkload {
            operator,
            assigned_steps,
            eligible_steps,
        })
    }

    // ==========================================
    // 重扫
    // ==========================================

    /// 为操作工重扫可领取工序
    ///
    /// - AUTO_ASSIGN: 对其具备资格的每个 AVAILABLE 步骤重新运行选择器
    /// - BROADCAST_CLAIM: 仅向该操作工补发可领取通知
    ///
    /// # 返回
    /// 处理的步骤数
    #[instrument(skip(self))]
    pub fn rescan_for_operator(&self, operator_id: &str) -> EngineResult<usize> {
        let operator = self.registry.get(operator_id)?;
        if !operator.is_on_duty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut processed = 0;
        for bundle in self.active_bundles()? {
            let mut guard = lock_bundle(&bundle)?;
            for step_id in guard.available_step_ids() {
                let qualified = guard.operation_for(&step_id).map_or(false, |op| {
                    operator.is_qualified_for(&op.machine_type, &op.required_skills)
                });
                if !qualified {
                    continue;
                }

                processed += 1;
                match self.policy() {
                    AssignmentPolicy::AutoAssign => {
                        self.dispatch_logged(&mut guard, &step_id, None, now);
                    }
                    AssignmentPolicy::BroadcastClaim => {
                        let still_has_capacity = self
                            .registry
                            .get(operator_id)?
                            .meets_threshold(self.selector.capacity_threshold_pct());
                        if !still_has_capacity {
                            return Ok(processed);
                        }
                        if let Some(step) = guard.step(&step_id) {
                            self.notify(operator_id, step, NotificationKind::SequentialReady);
                        }
                    }
                }
            }
        }

        debug!(operator_id = %operator_id, processed, "操作工重扫完成");
        Ok(processed)
    }

    // ==========================================
    // 内部
    // ==========================================

    /// 对单个 AVAILABLE 步骤运行选择器并落实结果
    fn dispatch(
        &self,
        instance: &mut BundleWorkflowInstance,
        step_id: &str,
        exclude: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<SelectionOutcome>> {
        let Some(step) = instance.step(step_id).filter(|s| s.is_claimable()).cloned() else {
            return Ok(None);
        };
        let operation = instance
            .operation_for(step_id)
            .cloned()
            .ok_or_else(|| EngineError::validation(format!("步骤 {} 缺少工序模板", step_id)))?;
        let mut staged = instance.stage_transition(step_id, StepStatus::Assigned, now)?;

        let outcome = self
            .selector
            .select(&step, &operation, &self.registry, exclude)?;
        match &outcome {
            SelectionOutcome::Assigned { operator_id, .. } => {
                staged.assigned_operator_id = Some(operator_id.clone());
                if let Err(e) = self.store.save_step(&staged) {
                    self.release_logged(operator_id, step.pieces);
                    return Err(e.into());
                }
                instance.commit(staged)?;

                info!(
                    step_id = %step_id,
                    bundle_id = %step.bundle_id,
                    operator_id = %operator_id,
                    from = %StepStatus::Available,
                    to = %StepStatus::Assigned,
                    "工序已指派"
                );
                self.notify(operator_id, &step, NotificationKind::NewAssignment);
            }
            SelectionOutcome::Broadcast { operator_ids } => {
                debug!(step_id = %step_id, recipients = operator_ids.len(), "广播可领取工序");
                for operator_id in operator_ids {
                    self.notify(operator_id, &step, NotificationKind::SequentialReady);
                }
            }
            SelectionOutcome::CapacityExhausted => {}
        }
        Ok(Some(outcome))
    }

    /// 提交后的分派: 失败只记日志,步骤保持 AVAILABLE
    fn dispatch_logged(
        &self,
        instance: &mut BundleWorkflowInstance,
        step_id: &str,
        exclude: Option<&str>,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = self.dispatch(instance, step_id, exclude, now) {
            warn!(step_id = %step_id, error = %e, "分派失败,工序保持可领取");
        }
    }

    fn rescan_logged(&self, operator_id: &str) {
        if let Err(e) = self.rescan_for_operator(operator_id) {
            warn!(operator_id = %operator_id, error = %e, "操作工重扫失败");
        }
    }

    fn release_logged(&self, operator_id: &str, pieces: u32) {
        if let Err(e) = self
            .registry
            .update_workload(operator_id, WorkloadChange::Delta(-i64::from(pieces)))
        {
            warn!(operator_id = %operator_id, error = %e, "产能占用回退失败");
        }
    }

    fn reserve_back_logged(&self, operator_id: &str, pieces: u32) {
        if let Err(e) = self
            .registry
            .update_workload(operator_id, WorkloadChange::Delta(i64::from(pieces)))
        {
            warn!(operator_id = %operator_id, error = %e, "产能释放回补失败");
        }
    }

    fn notify(&self, operator_id: &str, step: &WorkflowStep, kind: NotificationKind) {
        self.outbox.publish(StepNotification {
            operator_id: operator_id.to_string(),
            step_id: step.step_id.clone(),
            bundle_id: step.bundle_id.clone(),
            kind,
            priority: step.priority,
            emitted_at: Utc::now(),
        });
    }

    /// 校验步骤处于 `expected` 且由 `operator_id` 持有
    fn held_step(
        &self,
        instance: &BundleWorkflowInstance,
        step_id: &str,
        operator_id: &str,
        expected: StepStatus,
    ) -> EngineResult<WorkflowStep> {
        let step = instance
            .step(step_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEntity {
                entity: "工序步骤",
                id: step_id.to_string(),
            })?;
        if step.status != expected {
            return Err(EngineError::conflict(
                step_id,
                step.status,
                format!("需要 {} 状态", expected),
            ));
        }
        if !step.is_held_by(operator_id) {
            return Err(EngineError::conflict(
                step_id,
                step.status,
                format!("操作工不符: {}", operator_id),
            ));
        }
        Ok(step)
    }

    /// 定位步骤所属的活跃批次
    ///
    /// 已归档批次中的步骤返回 StateConflict (其状态已终结)
    fn locate_step(&self, step_id: &str) -> EngineResult<SharedBundle> {
        let bundle_id = {
            let index = self
                .step_index
                .read()
                .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
            index.get(step_id).cloned()
        };

        if let Some(bundle_id) = bundle_id {
            let bundles = self
                .bundles
                .read()
                .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
            if let Some(bundle) = bundles.get(&bundle_id) {
                return Ok(bundle.clone());
            }
        }

        // 索引未命中: 批次尚未载入,或已全部完工归档
        match self.store.load_step(step_id)? {
            Some(step) => match self.load_bundle(&step.bundle_id)? {
                Some(bundle) => Ok(bundle),
                None => Err(EngineError::conflict(step_id, step.status, "所属批次已归档")),
            },
            None => Err(EngineError::UnknownEntity {
                entity: "工序步骤",
                id: step_id.to_string(),
            }),
        }
    }

    /// 从网关载入批次; 已全部完工或无记录时返回 None
    fn load_bundle(&self, bundle_id: &str) -> EngineResult<Option<SharedBundle>> {
        let existing = self
            .bundles
            .read()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?
            .get(bundle_id)
            .cloned();
        if existing.is_some() {
            return Ok(existing);
        }

        let steps = self.store.list_steps_by_bundle(bundle_id)?;
        if steps.iter().all(|s| s.status == StepStatus::Completed) {
            return Ok(None);
        }

        let template = self.resolve_template(&steps[0].template_id)?;
        let instance = BundleWorkflowInstance::restore(template, steps)?;
        debug!(bundle_id = %bundle_id, "批次从持久化载入");
        self.install_bundle(instance).map(Some)
    }

    /// 批次ID预留: 活跃或投产中的ID返回 Validation
    fn reserve_bundle_id(&self, bundle_id: &str) -> EngineResult<PendingBundle<'_>> {
        let mut pending = self
            .pending_bundles
            .lock()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        let active = self
            .bundles
            .read()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?
            .contains_key(bundle_id);
        if active || !pending.insert(bundle_id.to_string()) {
            return Err(EngineError::validation(format!("批次已存在: {}", bundle_id)));
        }

        Ok(PendingBundle {
            pending: &self.pending_bundles,
            bundle_id: bundle_id.to_string(),
        })
    }

    /// 批次实例写入活跃集合与步骤索引; 已存在时返回现有实例
    fn install_bundle(&self, instance: BundleWorkflowInstance) -> EngineResult<SharedBundle> {
        let mut bundles = self
            .bundles
            .write()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        if let Some(existing) = bundles.get(instance.bundle_id()) {
            return Ok(existing.clone());
        }

        let mut index = self
            .step_index
            .write()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        for step_id in instance.step_ids() {
            index.insert(step_id.clone(), instance.bundle_id().to_string());
        }

        let bundle_id = instance.bundle_id().to_string();
        let shared = Arc::new(Mutex::new(instance));
        bundles.insert(bundle_id, shared.clone());
        Ok(shared)
    }

    fn active_bundles(&self) -> EngineResult<Vec<SharedBundle>> {
        let bundles = self
            .bundles
            .read()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        let mut ordered: Vec<(&String, &SharedBundle)> = bundles.iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(b.0));
        Ok(ordered.into_iter().map(|(_, b)| b.clone()).collect())
    }

    /// 全部完工的批次移出活跃集合
    fn archive_bundle(&self, bundle_id: &str) -> EngineResult<()> {
        let removed = self
            .bundles
            .write()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?
            .remove(bundle_id);

        if let Some(bundle) = removed {
            let step_ids: Vec<String> = lock_bundle(&bundle)?.step_ids().to_vec();
            let mut index = self
                .step_index
                .write()
                .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
            for step_id in step_ids {
                index.remove(&step_id);
            }
            info!(bundle_id = %bundle_id, "批次全部完工,已归档");
        }
        Ok(())
    }

    /// 当前活跃批次数
    pub fn active_bundle_count(&self) -> usize {
        self.bundles.read().map(|b| b.len()).unwrap_or(0)
    }
}
