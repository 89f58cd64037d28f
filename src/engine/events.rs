// ==========================================
// 成衣工序流转系统 - 引擎层通知出站
// ==========================================
// 职责: 定义通知网关 trait 与出站队列,实现依赖倒置
// 说明: 编排器只向出站队列投递,投递本身不会失败;
//       由 NotificationDispatcher 异步消费并调用网关
// 红线: 通知失败不得回滚或阻塞任何状态转换
// ==========================================

use crate::domain::{NotificationKind, StepPriority};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

// ==========================================
// 通知消息
// ==========================================

/// 发给单个操作工的工序通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNotification {
    pub operator_id: String,
    pub step_id: String,
    pub bundle_id: String,
    pub kind: NotificationKind,
    pub priority: StepPriority,
    pub emitted_at: DateTime<Utc>,
}

/// 通知投递失败
///
/// 仅在网关自身的错误通道内出现
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("通知投递失败: operator_id={operator_id}, {message}")]
    DeliveryFailed { operator_id: String, message: String },

    #[error("通知网关不可用: {0}")]
    Unavailable(String),
}

// ==========================================
// 通知网关 Trait
// ==========================================

/// 通知网关
///
/// 推送/短信/站内信等具体通道由外部实现
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// 投递通知 (尽力而为)
    async fn notify(&self, notification: &StepNotification) -> Result<(), NotificationError>;
}

/// 空操作网关
///
/// 用于不需要通知的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpNotificationGateway;

#[async_trait]
impl NotificationGateway for NoOpNotificationGateway {
    async fn notify(&self, notification: &StepNotification) -> Result<(), NotificationError> {
        tracing::debug!(
            "NoOpNotificationGateway: 跳过通知 - operator_id={}, step_id={}, kind={}",
            notification.operator_id,
            notification.step_id,
            notification.kind
        );
        Ok(())
    }
}

/// 日志网关: 以结构化日志输出通知,用于未接入通道的部署
#[derive(Debug, Clone, Default)]
pub struct TracingNotificationGateway;

#[async_trait]
impl NotificationGateway for TracingNotificationGateway {
    async fn notify(&self, notification: &StepNotification) -> Result<(), NotificationError> {
        tracing::info!(
            operator_id = %notification.operator_id,
            step_id = %notification.step_id,
            bundle_id = %notification.bundle_id,
            kind = %notification.kind,
            priority = %notification.priority,
            "工序通知"
        );
        Ok(())
    }
}

// ==========================================
// 出站队列
// ==========================================

/// 通知出站队列 (发送端)
///
/// 克隆后共享同一队列; `disabled()` 构造的实例丢弃所有消息
#[derive(Debug, Clone)]
pub struct NotificationOutbox {
    sender: Option<mpsc::UnboundedSender<StepNotification>>,
}

/// 通知出站队列 (接收端)
pub type NotificationReceiver = mpsc::UnboundedReceiver<StepNotification>;

impl NotificationOutbox {
    /// 创建出站队列
    pub fn channel() -> (Self, NotificationReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    /// 不投递任何消息的出站队列
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// 投递通知
    ///
    /// 接收端已关闭时仅记录日志
    pub fn publish(&self, notification: StepNotification) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.send(notification) {
            tracing::warn!(
                operator_id = %e.0.operator_id,
                step_id = %e.0.step_id,
                "通知出站队列已关闭,消息丢弃"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(operator_id: &str) -> StepNotification {
        StepNotification {
            operator_id: operator_id.to_string(),
            step_id: "S-1".to_string(),
            bundle_id: "B-1".to_string(),
            kind: NotificationKind::NewAssignment,
            priority: StepPriority::Urgent,
            emitted_at: Utc::now(),
        }
    }

    #[test]
    fn test_outbox_delivers_in_order() {
        let (outbox, mut rx) = NotificationOutbox::channel();
        outbox.publish(sample("O1"));
        outbox.clone().publish(sample("O2"));

        assert_eq!(rx.try_recv().unwrap().operator_id, "O1");
        assert_eq!(rx.try_recv().unwrap().operator_id, "O2");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_after_receiver_dropped_does_not_panic() {
        let (outbox, rx) = NotificationOutbox::channel();
        drop(rx);
        outbox.publish(sample("O1"));
        NotificationOutbox::disabled().publish(sample("O1"));
    }

    #[tokio::test]
    async fn test_noop_gateway_accepts() {
        assert!(NoOpNotificationGateway.notify(&sample("O1")).await.is_ok());
        assert!(TracingNotificationGateway.notify(&sample("O1")).await.is_ok());
    }
}
