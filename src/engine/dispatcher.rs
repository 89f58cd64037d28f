// ==========================================
// 成衣工序流转系统 - 通知分发器
// ==========================================
// 职责: 消费出站队列,批量调用通知网关
// 说明: 投递失败只记日志,不回写编排器
// 停止: shutdown 信号到达后排空队列再退出
// ==========================================

use crate::engine::events::{NotificationGateway, NotificationReceiver, StepNotification};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 单批最大消息数
pub const DEFAULT_MAX_BATCH: usize = 64;

/// 分发统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
}

// ==========================================
// NotificationDispatcher
// ==========================================
pub struct NotificationDispatcher {
    receiver: NotificationReceiver,
    gateway: Arc<dyn NotificationGateway>,
    max_batch: usize,
}

impl NotificationDispatcher {
    pub fn new(receiver: NotificationReceiver, gateway: Arc<dyn NotificationGateway>) -> Self {
        Self {
            receiver,
            gateway,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// 运行分发循环
    ///
    /// # 返回
    /// 退出时的累计统计
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        info!(max_batch = self.max_batch, "通知分发器启动");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.receiver.recv() => {
                    let Some(first) = received else {
                        break;
                    };
                    let batch = self.fill_batch(first);
                    self.deliver(batch, &mut stats).await;
                }
            }
        }

        // 排空剩余消息
        self.receiver.close();
        while let Ok(first) = self.receiver.try_recv() {
            let batch = self.fill_batch(first);
            self.deliver(batch, &mut stats).await;
        }

        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            "通知分发器已停止"
        );
        stats
    }

    fn fill_batch(&mut self, first: StepNotification) -> Vec<StepNotification> {
        let mut batch = vec![first];
        while batch.len() < self.max_batch {
            match self.receiver.try_recv() {
                Ok(next) => batch.push(next),
                Err(_) => break,
            }
        }
        batch
    }

    async fn deliver(&self, batch: Vec<StepNotification>, stats: &mut DispatchStats) {
        debug!(batch_size = batch.len(), "投递通知批次");
        let results = join_all(batch.iter().map(|n| self.gateway.notify(n))).await;

        for (notification, result) in batch.iter().zip(results) {
            match result {
                Ok(()) => stats.delivered += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(
                        operator_id = %notification.operator_id,
                        step_id = %notification.step_id,
                        kind = %notification.kind,
                        error = %e,
                        "通知投递失败"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NotificationKind, StepPriority};
    use crate::engine::events::{NotificationError, NotificationOutbox};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGateway {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationGateway for RecordingGateway {
        async fn notify(&self, n: &StepNotification) -> Result<(), NotificationError> {
            self.seen.lock().unwrap().push(n.operator_id.clone());
            if n.operator_id == "bad" {
                return Err(NotificationError::DeliveryFailed {
                    operator_id: n.operator_id.clone(),
                    message: "设备离线".to_string(),
                });
            }
            Ok(())
        }
    }

    fn notification(operator_id: &str) -> StepNotification {
        StepNotification {
            operator_id: operator_id.to_string(),
            step_id: "S-1".to_string(),
            bundle_id: "B-1".to_string(),
            kind: NotificationKind::SequentialReady,
            priority: StepPriority::Normal,
            emitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_drains_queue_on_shutdown_and_counts_failures() {
        let (outbox, rx) = NotificationOutbox::channel();
        let gateway = Arc::new(RecordingGateway::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        for op in ["O1", "bad", "O2"] {
            outbox.publish(notification(op));
        }
        shutdown_tx.send(true).unwrap();

        let stats = NotificationDispatcher::new(rx, gateway.clone())
            .with_max_batch(2)
            .run(shutdown_rx)
            .await;

        assert_eq!(stats, DispatchStats { delivered: 2, failed: 1 });
        assert_eq!(gateway.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_stops_when_all_senders_dropped() {
        let (outbox, rx) = NotificationOutbox::channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        outbox.publish(notification("O1"));
        drop(outbox);

        let stats = NotificationDispatcher::new(rx, Arc::new(RecordingGateway::default()))
            .run(shutdown_rx)
            .await;
        assert_eq!(stats.delivered, 1);
    }
}
