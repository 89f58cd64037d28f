// ==========================================
// 成衣工序流转系统 - 操作工产能领域模型
// ==========================================
// 职责: 操作工机型、技能、班次、在岗状态与负荷
// 红线: current_workload 不得为负
// ==========================================

use crate::domain::types::Shift;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ==========================================
// OperatorCapacity - 操作工产能
// ==========================================
// 用途: 分派时的资格与负荷判定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorCapacity {
    // ===== 主键 =====
    pub operator_id: String,

    // ===== 资格 =====
    pub machine_type: String,     // 操作机型
    pub skills: BTreeSet<String>, // 技能集

    // ===== 产能 =====
    pub max_capacity_per_hour: u32, // 每小时最大件数
    pub current_workload: u32,      // 当前负荷 (件)

    // ===== 在岗 =====
    pub shift: Shift,
    pub on_break: bool,
    pub active: bool, // 离职/停用后为 false
}

impl OperatorCapacity {
    /// 新入职操作工 (空负荷、在岗、白班)
    pub fn new(
        operator_id: impl Into<String>,
        machine_type: impl Into<String>,
        max_capacity_per_hour: u32,
    ) -> Self {
        Self {
            operator_id: operator_id.into(),
            machine_type: machine_type.into(),
            skills: BTreeSet::new(),
            max_capacity_per_hour,
            current_workload: 0,
            shift: Shift::Day,
            on_break: false,
            active: true,
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_shift(mut self, shift: Shift) -> Self {
        self.shift = shift;
        self
    }

    pub fn with_workload(mut self, current_workload: u32) -> Self {
        self.current_workload = current_workload;
        self
    }

    /// 是否在岗可接活
    pub fn is_on_duty(&self) -> bool {
        self.active && !self.on_break
    }

    /// 机型与技能是否满足工序要求 (skills ⊇ required)
    pub fn is_qualified_for(&self, machine_type: &str, required_skills: &BTreeSet<String>) -> bool {
        self.machine_type == machine_type && self.skills.is_superset(required_skills)
    }
}

// ==========================================
// Trait: CapacityConstraint
// ==========================================
// 用途: 分派器负荷约束检查接口
pub trait CapacityConstraint {
    /// 可用产能百分比 = max(0, 100 - 负荷/上限*100)
    fn available_capacity_percent(&self) -> f64;

    /// 可用产能是否达到阈值下限 (≥ 100 - threshold)
    fn meets_threshold(&self, capacity_threshold_pct: f64) -> bool;

    /// 剩余可接件数
    fn remaining_pieces(&self) -> u32;
}

impl CapacityConstraint for OperatorCapacity {
    fn available_capacity_percent(&self) -> f64 {
        if self.max_capacity_per_hour == 0 {
            return 0.0;
        }
        let used = self.current_workload as f64 / self.max_capacity_per_hour as f64 * 100.0;
        (100.0 - used).max(0.0)
    }

    fn meets_threshold(&self, capacity_threshold_pct: f64) -> bool {
        if self.max_capacity_per_hour == 0 {
            return capacity_threshold_pct >= 100.0;
        }
        // 100 - used% >= 100 - T  <=>  used * 100 <= T * max (不做除法,边界精确)
        let used = self.current_workload.min(self.max_capacity_per_hour);
        f64::from(used) * 100.0 <= capacity_threshold_pct * f64::from(self.max_capacity_per_hour)
    }

    fn remaining_pieces(&self) -> u32 {
        self.max_capacity_per_hour.saturating_sub(self.current_workload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_capacity_percent() {
        let op = OperatorCapacity::new("O1", "overlock", 40).with_workload(10);
        assert!((op.available_capacity_percent() - 75.0).abs() < 1e-9);

        // 超负荷时截断为 0
        let over = OperatorCapacity::new("O2", "overlock", 40).with_workload(60);
        assert_eq!(over.available_capacity_percent(), 0.0);
        assert_eq!(over.remaining_pieces(), 0);

        let zero_max = OperatorCapacity::new("O3", "overlock", 0);
        assert_eq!(zero_max.available_capacity_percent(), 0.0);
    }

    #[test]
    fn test_meets_threshold_boundary() {
        // 阈值 80% → 可用产能须 ≥ 20%
        let op = OperatorCapacity::new("O1", "lockstitch", 50).with_workload(40);
        assert!(op.meets_threshold(80.0));

        let op = OperatorCapacity::new("O1", "lockstitch", 50).with_workload(41);
        assert!(!op.meets_threshold(80.0));
    }

    #[test]
    fn test_meets_threshold_exact_at_low_threshold() {
        // 7/100 在浮点下算得可用 92.99999999999999%,须按 93% 处理
        let op = OperatorCapacity::new("O1", "lockstitch", 100).with_workload(7);
        assert!(op.meets_threshold(7.0));
        assert!(!op.with_workload(8).meets_threshold(7.0));

        // 超负荷截断为 0% 可用,仅阈值 100% 时放行
        let over = OperatorCapacity::new("O2", "lockstitch", 40).with_workload(60);
        assert!(over.meets_threshold(100.0));
        assert!(!over.meets_threshold(99.0));

        let zero_max = OperatorCapacity::new("O3", "lockstitch", 0);
        assert!(!zero_max.meets_threshold(80.0));
        assert!(zero_max.meets_threshold(100.0));
    }

    #[test]
    fn test_qualification_requires_skill_superset() {
        let op = OperatorCapacity::new("O1", "overlock", 30).with_skills(["serging", "hemming"]);
        let required: BTreeSet<String> = ["serging".to_string()].into_iter().collect();
        assert!(op.is_qualified_for("overlock", &required));
        assert!(!op.is_qualified_for("cutting", &required));

        let required: BTreeSet<String> =
            ["serging".to_string(), "binding".to_string()].into_iter().collect();
        assert!(!op.is_qualified_for("overlock", &required));
    }
}
