// ==========================================
// 成衣工序流转系统 - 引擎配置
// ==========================================
// 职责: 分派策略、负荷阈值、指派超时、巡检周期、数据库路径
// 默认: AUTO_ASSIGN / 80% / 900 秒 / 60 秒
// ==========================================

use crate::domain::AssignmentPolicy;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CAPACITY_THRESHOLD_PCT: f64 = 80.0;
pub const DEFAULT_ASSIGNMENT_EXPIRY_SECS: u64 = 900;
pub const DEFAULT_EXPIRY_SWEEP_INTERVAL_SECS: u64 = 60;

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 分派策略
    pub assignment_policy: AssignmentPolicy,
    /// 负荷阈值 (%),可用产能须 ≥ 100 - 阈值
    pub capacity_threshold_pct: f64,
    /// 指派后未开工的超时时长 (秒)
    pub assignment_expiry_secs: u64,
    /// 超时巡检周期 (秒)
    pub expiry_sweep_interval_secs: u64,
    /// 数据库路径; 为空时使用平台数据目录下的默认路径
    pub db_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            assignment_policy: AssignmentPolicy::default(),
            capacity_threshold_pct: DEFAULT_CAPACITY_THRESHOLD_PCT,
            assignment_expiry_secs: DEFAULT_ASSIGNMENT_EXPIRY_SECS,
            expiry_sweep_interval_secs: DEFAULT_EXPIRY_SWEEP_INTERVAL_SECS,
            db_path: String::new(),
        }
    }
}

impl EngineConfig {
    /// 以指定策略构造 (其余取默认)
    pub fn with_policy(policy: AssignmentPolicy) -> Self {
        Self {
            assignment_policy: policy,
            ..Self::default()
        }
    }

    /// 实际使用的数据库路径
    ///
    /// 未配置时才解析默认路径 (会创建数据目录)
    pub fn resolved_db_path(&self) -> String {
        if self.db_path.trim().is_empty() {
            crate::app::get_default_db_path()
        } else {
            self.db_path.clone()
        }
    }

    /// 校验配置
    ///
    /// # 返回
    /// - Err(String): 不合法的配置项说明
    pub fn validate(&self) -> Result<(), String> {
        let t = self.capacity_threshold_pct;
        if !t.is_finite() || t <= 0.0 || t > 100.0 {
            return Err(format!("负荷阈值必须在 (0, 100] 区间内: {}", t));
        }
        if self.assignment_expiry_secs == 0 {
            return Err("指派超时时长必须大于 0".to_string());
        }
        if self.expiry_sweep_interval_secs == 0 {
            return Err("超时巡检周期必须大于 0".to_string());
        }
        Ok(())
    }
}
