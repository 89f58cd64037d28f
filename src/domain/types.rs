// ==========================================
// 成衣工序流转系统 - 领域类型定义
// ==========================================
// 职责: 工序状态机、优先级、分派策略、通知类型
// 红线: 状态只能前进,阻断/解除阻断为唯一旁路
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 工序步骤状态 (Step Status)
// ==========================================
// 主线: LOCKED → AVAILABLE → ASSIGNED → IN_PROGRESS → COMPLETED
// 旁路: 任意非终态 → BLOCKED → (AVAILABLE | LOCKED)
// 回退: ASSIGNED → AVAILABLE 仅限未到岗过期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Locked,     // 前置工序未完成
    Available,  // 可分派
    Assigned,   // 已分派待开工
    InProgress, // 加工中
    Completed,  // 已完成(终态)
    Blocked,    // 质量冻结等人工阻断
}

impl StepStatus {
    /// 是否终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed)
    }

    /// 状态机校验
    ///
    /// 穷举所有 (from, to) 组合,新增状态时编译器会强制补全分支
    pub fn can_transition_to(&self, to: StepStatus) -> bool {
        use StepStatus::*;
        match (*self, to) {
            (Completed, _) => false,
            (Blocked, Available) | (Blocked, Locked) => true,
            (Blocked, _) => false,
            (_, Blocked) => true,
            (Locked, Available) => true,
            (Available, Assigned) => true,
            (Assigned, InProgress) => true,
            (Assigned, Available) => true,
            (InProgress, Completed) => true,
            (Locked, _) | (Available, _) | (Assigned, _) | (InProgress, _) => false,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            StepStatus::Locked => "LOCKED",
            StepStatus::Available => "AVAILABLE",
            StepStatus::Assigned => "ASSIGNED",
            StepStatus::InProgress => "IN_PROGRESS",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Blocked => "BLOCKED",
        }
    }

    /// 从字符串解析状态,未知值返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "LOCKED" => Some(StepStatus::Locked),
            "AVAILABLE" => Some(StepStatus::Available),
            "ASSIGNED" => Some(StepStatus::Assigned),
            "IN_PROGRESS" => Some(StepStatus::InProgress),
            "COMPLETED" => Some(StepStatus::Completed),
            "BLOCKED" => Some(StepStatus::Blocked),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 优先级 (Step Priority)
// ==========================================
// 不改变分派排序公式,仅随通知下发供外部 SLA 处理
// 顺序: Low < Normal < High < Urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for StepPriority {
    fn default() -> Self {
        StepPriority::Normal
    }
}

impl StepPriority {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            StepPriority::Low => "low",
            StepPriority::Normal => "normal",
            StepPriority::High => "high",
            StepPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(StepPriority::Low),
            "normal" => Some(StepPriority::Normal),
            "high" => Some(StepPriority::High),
            "urgent" => Some(StepPriority::Urgent),
            _ => None,
        }
    }
}

impl fmt::Display for StepPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 分派策略 (Assignment Policy)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentPolicy {
    AutoAssign,     // 系统直接指派产能最充裕的操作工
    BroadcastClaim, // 广播给所有合格操作工,先抢先得
}

impl Default for AssignmentPolicy {
    fn default() -> Self {
        AssignmentPolicy::AutoAssign
    }
}

impl AssignmentPolicy {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AssignmentPolicy::AutoAssign => "AUTO_ASSIGN",
            AssignmentPolicy::BroadcastClaim => "BROADCAST_CLAIM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "AUTO_ASSIGN" => Some(AssignmentPolicy::AutoAssign),
            "BROADCAST_CLAIM" => Some(AssignmentPolicy::BroadcastClaim),
            _ => None,
        }
    }
}

impl fmt::Display for AssignmentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 通知类型 (Notification Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    NewAssignment,   // 新指派
    SequentialReady, // 前序完成,工序可领取
    Expired,         // 指派超时未开工已收回
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewAssignment => "NEW_ASSIGNMENT",
            NotificationKind::SequentialReady => "SEQUENTIAL_READY",
            NotificationKind::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 班次 (Shift)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Shift {
    Day,     // 白班
    Evening, // 中班
    Night,   // 夜班
}

impl Shift {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Shift::Day => "DAY",
            Shift::Evening => "EVENING",
            Shift::Night => "NIGHT",
        }
    }

    /// 从字符串解析班次,未知值按白班处理
    pub fn from_db_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "EVENING" => Shift::Evening,
            "NIGHT" => Shift::Night,
            _ => Shift::Day,
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}
