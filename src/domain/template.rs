// ==========================================
// 成衣工序流转系统 - 工序模板领域模型
// ==========================================
// 职责: 款式(article)级工序定义,含技能/机型/工时/前置依赖
// 红线: 已有批次实例化后模板只读
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ==========================================
// OperationTemplate - 单道工序模板
// ==========================================
// sequence_number 仅用于展示,真实门控只看 depends_on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationTemplate {
    pub operation_id: String,              // 工序ID (款式内唯一)
    pub name: String,                      // 工序名称 (裁剪/锁边/缝制/整烫...)
    pub machine_type: String,              // 所需机型
    pub required_skills: BTreeSet<String>, // 所需技能
    pub estimated_minutes_per_piece: f64,  // 单件标准工时 (分钟)
    pub sequence_number: u32,              // 展示序号
    pub depends_on: BTreeSet<String>,      // 前置工序ID
}

impl OperationTemplate {
    /// 创建无技能要求、无前置的工序
    pub fn new(
        operation_id: impl Into<String>,
        name: impl Into<String>,
        machine_type: impl Into<String>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            name: name.into(),
            machine_type: machine_type.into(),
            required_skills: BTreeSet::new(),
            estimated_minutes_per_piece: 0.0,
            sequence_number: 0,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sequence(mut self, sequence_number: u32) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    pub fn with_minutes_per_piece(mut self, minutes: f64) -> Self {
        self.estimated_minutes_per_piece = minutes;
        self
    }

    /// 是否为起始工序(无前置)
    pub fn is_root(&self) -> bool {
        self.depends_on.is_empty()
    }
}

// ==========================================
// ArticleTemplate - 款式工序模板
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleTemplate {
    pub template_id: String,                // 模板ID (含版本)
    pub article_code: String,               // 款号
    pub operations: Vec<OperationTemplate>, // 工序列表
}

impl ArticleTemplate {
    pub fn new(
        template_id: impl Into<String>,
        article_code: impl Into<String>,
        operations: Vec<OperationTemplate>,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            article_code: article_code.into(),
            operations,
        }
    }

    pub fn operation(&self, operation_id: &str) -> Option<&OperationTemplate> {
        self.operations.iter().find(|op| op.operation_id == operation_id)
    }
}
