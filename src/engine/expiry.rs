// ==========================================
// 成衣工序流转系统 - 指派超时巡检
// ==========================================
// 职责: 周期性收回超时未开工的指派 (操作工未到岗)
// 说明: 不在关键路径上执行; 编排器为同步接口,
//       经 spawn_blocking 调用,避免占用异步工作线程
// ==========================================

use crate::engine::orchestrator::WorkflowOrchestrator;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

// ==========================================
// ExpirySweeper
// ==========================================
pub struct ExpirySweeper {
    orchestrator: Arc<WorkflowOrchestrator>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// 执行一次巡检
    ///
    /// # 返回
    /// 本次收回的步骤数
    pub async fn sweep_once(&self) -> usize {
        let orchestrator = self.orchestrator.clone();
        match tokio::task::spawn_blocking(move || orchestrator.expire_stale_assignments(Utc::now()))
            .await
        {
            Ok(Ok(expired)) => expired.len(),
            Ok(Err(e)) => {
                warn!(error = %e, "超时巡检失败");
                0
            }
            Err(e) => {
                error!(error = %e, "超时巡检任务异常退出");
                0
            }
        }
    }

    /// 运行巡检循环,直到收到 shutdown 信号
    ///
    /// # 返回
    /// 累计收回的步骤数
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut total = 0;

        info!(interval_secs = self.interval.as_secs(), "超时巡检启动");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    total += self.sweep_once().await;
                }
            }
        }

        info!(total_expired = total, "超时巡检已停止");
        total
    }
}
