// ==========================================
// 成衣工序流转系统 - 工序模板依赖图
// ==========================================
// 职责: 模板注册校验 (依赖存在性 + 无环) 与反向索引预计算
// 红线: 校验失败时不做任何部分注册; 注册后模板只读
// ==========================================
// 反向索引: operation_id → 直接后继工序集合
// 级联时按索引 O(1) 取后继,不再线性扫描所有工序
// ==========================================

use crate::domain::{ArticleTemplate, OperationTemplate};
use crate::engine::error::{EngineError, EngineResult};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

// ==========================================
// TemplateGraph - 单个模板的已校验依赖图
// ==========================================
#[derive(Debug)]
pub struct TemplateGraph {
    template: ArticleTemplate,
    index: HashMap<String, usize>,
    dependents: HashMap<String, BTreeSet<String>>,
    topological_order: Vec<String>,
}

impl TemplateGraph {
    /// 校验模板并构建依赖图
    ///
    /// 校验项:
    /// 1) template_id / 工序列表非空
    /// 2) operation_id 唯一且非空, machine_type 非空
    /// 3) depends_on 引用的工序均存在, 且不自依赖
    /// 4) 依赖关系无环 (Kahn 拓扑排序)
    pub fn build(template: ArticleTemplate) -> EngineResult<Self> {
        if template.template_id.trim().is_empty() {
            return Err(EngineError::validation("模板ID不能为空"));
        }
        if template.operations.is_empty() {
            return Err(EngineError::validation(format!(
                "模板 {} 未定义任何工序",
                template.template_id
            )));
        }

        let mut index = HashMap::with_capacity(template.operations.len());
        for (i, op) in template.operations.iter().enumerate() {
            if op.operation_id.trim().is_empty() {
                return Err(EngineError::validation(format!(
                    "模板 {} 第 {} 道工序ID为空",
                    template.template_id,
                    i + 1
                )));
            }
            if op.machine_type.trim().is_empty() {
                return Err(EngineError::validation(format!(
                    "工序 {} 未指定机型",
                    op.operation_id
                )));
            }
            if index.insert(op.operation_id.clone(), i).is_some() {
                return Err(EngineError::validation(format!(
                    "模板 {} 工序ID重复: {}",
                    template.template_id, op.operation_id
                )));
            }
        }

        let mut dependents: HashMap<String, BTreeSet<String>> = template
            .operations
            .iter()
            .map(|op| (op.operation_id.clone(), BTreeSet::new()))
            .collect();
        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(index.len());

        for op in &template.operations {
            for dep in &op.depends_on {
                if dep == &op.operation_id {
                    return Err(EngineError::validation(format!(
                        "工序 {} 不能依赖自身",
                        op.operation_id
                    )));
                }
                match dependents.get_mut(dep) {
                    Some(set) => {
                        set.insert(op.operation_id.clone());
                    }
                    None => {
                        return Err(EngineError::validation(format!(
                            "工序 {} 依赖的前置工序不存在: {}",
                            op.operation_id, dep
                        )));
                    }
                }
            }
            in_degree.insert(op.operation_id.as_str(), op.depends_on.len());
        }

        // Kahn: 就绪集合按 (sequence_number, operation_id) 排序,保证输出稳定
        let mut ready: BTreeSet<(u32, &str)> = template
            .operations
            .iter()
            .filter(|op| op.depends_on.is_empty())
            .map(|op| (op.sequence_number, op.operation_id.as_str()))
            .collect();
        let mut topological_order = Vec::with_capacity(index.len());

        while let Some(first) = ready.iter().next().copied() {
            ready.remove(&first);
            let (_, op_id) = first;
            topological_order.push(op_id.to_string());

            if let Some(children) = dependents.get(op_id) {
                for child in children {
                    if let Some(deg) = in_degree.get_mut(child.as_str()) {
                        *deg -= 1;
                        if *deg == 0 {
                            let seq = template.operations[index[child]].sequence_number;
                            ready.insert((seq, child.as_str()));
                        }
                    }
                }
            }
        }

        if topological_order.len() != template.operations.len() {
            let sorted: HashSet<&str> = topological_order.iter().map(String::as_str).collect();
            let mut cyclic: Vec<&str> = template
                .operations
                .iter()
                .map(|op| op.operation_id.as_str())
                .filter(|id| !sorted.contains(id))
                .collect();
            cyclic.sort_unstable();
            return Err(EngineError::validation(format!(
                "模板 {} 存在环依赖: {}",
                template.template_id,
                cyclic.join(", ")
            )));
        }

        debug!(
            template_id = %template.template_id,
            operations = template.operations.len(),
            "模板依赖图校验通过"
        );

        Ok(Self {
            template,
            index,
            dependents,
            topological_order,
        })
    }

    pub fn template_id(&self) -> &str {
        &self.template.template_id
    }

    pub fn template(&self) -> &ArticleTemplate {
        &self.template
    }

    pub fn operation(&self, operation_id: &str) -> Option<&OperationTemplate> {
        self.index
            .get(operation_id)
            .map(|&i| &self.template.operations[i])
    }

    /// 直接后继工序 (反向索引)
    pub fn dependents_of(&self, operation_id: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(operation_id)
    }

    /// 起始工序 (无前置)
    pub fn roots(&self) -> impl Iterator<Item = &OperationTemplate> {
        self.template.operations.iter().filter(|op| op.is_root())
    }

    /// 拓扑序 (同层按 sequence_number 排列)
    pub fn topological_order(&self) -> &[String] {
        &self.topological_order
    }

    pub fn len(&self) -> usize {
        self.template.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.template.operations.is_empty()
    }
}

// ==========================================
// OperationTemplateGraph - 模板注册表
// ==========================================
#[derive(Default)]
pub struct OperationTemplateGraph {
    graphs: RwLock<HashMap<String, Arc<TemplateGraph>>>,
}

impl OperationTemplateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 校验并注册模板
    pub fn register(&self, template: ArticleTemplate) -> EngineResult<Arc<TemplateGraph>> {
        let graph = TemplateGraph::build(template)?;
        self.insert(graph)
    }

    /// 注册已校验的依赖图
    ///
    /// 同ID模板已存在时拒绝 (模板版本化后用新ID注册)
    pub fn insert(&self, graph: TemplateGraph) -> EngineResult<Arc<TemplateGraph>> {
        let mut graphs = self
            .graphs
            .write()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;

        if graphs.contains_key(graph.template_id()) {
            return Err(EngineError::validation(format!(
                "模板已注册且不可变: {}",
                graph.template_id()
            )));
        }

        let graph = Arc::new(graph);
        graphs.insert(graph.template_id().to_string(), graph.clone());
        info!(
            template_id = %graph.template_id(),
            article_code = %graph.template().article_code,
            operations = graph.len(),
            "工序模板已注册"
        );
        Ok(graph)
    }

    pub fn get(&self, template_id: &str) -> EngineResult<Option<Arc<TemplateGraph>>> {
        let graphs = self
            .graphs
            .read()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        Ok(graphs.get(template_id).cloned())
    }

    pub fn template_ids(&self) -> EngineResult<Vec<String>> {
        let graphs = self
            .graphs
            .read()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        let mut ids: Vec<String> = graphs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> ArticleTemplate {
        ArticleTemplate::new(
            "TPL-DIAMOND",
            "POLO",
            vec![
                OperationTemplate::new("A", "裁剪", "cutter").with_sequence(1),
                OperationTemplate::new("B", "锁边", "overlock")
                    .with_depends_on(["A"])
                    .with_sequence(2),
                OperationTemplate::new("C", "领口", "lockstitch")
                    .with_depends_on(["A"])
                    .with_sequence(3),
                OperationTemplate::new("D", "整烫", "press")
                    .with_depends_on(["B", "C"])
                    .with_sequence(4),
            ],
        )
    }

    #[test]
    fn test_reverse_index_and_order() {
        let graph = TemplateGraph::build(diamond()).unwrap();

        let a: Vec<&String> = graph.dependents_of("A").unwrap().iter().collect();
        assert_eq!(a, vec!["B", "C"]);
        assert_eq!(graph.dependents_of("B").unwrap().len(), 1);
        assert!(graph.dependents_of("D").unwrap().is_empty());

        assert_eq!(graph.topological_order(), &["A", "B", "C", "D"]);
        let roots: Vec<&str> = graph.roots().map(|op| op.operation_id.as_str()).collect();
        assert_eq!(roots, vec!["A"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let template = ArticleTemplate::new(
            "TPL-CYCLE",
            "SHIRT",
            vec![
                OperationTemplate::new("A", "裁剪", "cutter"),
                OperationTemplate::new("B", "锁边", "overlock").with_depends_on(["A", "C"]),
                OperationTemplate::new("C", "缝合", "lockstitch").with_depends_on(["B"]),
            ],
        );
        let err = TemplateGraph::build(template).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("环依赖"), "{}", err);
        assert!(err.to_string().contains("B, C"), "{}", err);
    }

    #[test]
    fn test_unknown_and_self_dependency_rejected() {
        let unknown = ArticleTemplate::new(
            "TPL-X",
            "X",
            vec![OperationTemplate::new("A", "裁剪", "cutter").with_depends_on(["Z"])],
        );
        assert!(TemplateGraph::build(unknown).unwrap_err().is_validation());

        let self_dep = ArticleTemplate::new(
            "TPL-Y",
            "Y",
            vec![OperationTemplate::new("A", "裁剪", "cutter").with_depends_on(["A"])],
        );
        assert!(TemplateGraph::build(self_dep).unwrap_err().is_validation());
    }

    #[test]
    fn test_duplicate_operation_and_empty_template_rejected() {
        let dup = ArticleTemplate::new(
            "TPL-DUP",
            "DUP",
            vec![
                OperationTemplate::new("A", "裁剪", "cutter"),
                OperationTemplate::new("A", "再裁剪", "cutter"),
            ],
        );
        assert!(TemplateGraph::build(dup).is_err());
        assert!(TemplateGraph::build(ArticleTemplate::new("TPL-E", "E", vec![])).is_err());
    }

    #[test]
    fn test_registry_rejects_cycle_without_partial_registration() {
        let registry = OperationTemplateGraph::new();
        let cyclic = ArticleTemplate::new(
            "TPL-CYCLE",
            "SHIRT",
            vec![
                OperationTemplate::new("A", "裁剪", "cutter").with_depends_on(["B"]),
                OperationTemplate::new("B", "锁边", "overlock").with_depends_on(["A"]),
            ],
        );
        assert!(registry.register(cyclic).is_err());
        assert!(registry.get("TPL-CYCLE").unwrap().is_none());

        registry.register(diamond()).unwrap();
        assert!(registry.get("TPL-DIAMOND").unwrap().is_some());
        // 已注册模板不可覆盖
        assert!(registry.register(diamond()).is_err());
        assert_eq!(registry.template_ids().unwrap(), vec!["TPL-DIAMOND"]);
    }

    #[test]
    fn test_parallel_branches_without_strict_order() {
        // 两条独立分支共享同一 sequence_number 也可注册
        let template = ArticleTemplate::new(
            "TPL-PAR",
            "JACKET",
            vec![
                OperationTemplate::new("sleeve", "袖片", "lockstitch").with_sequence(1),
                OperationTemplate::new("body", "衣身", "lockstitch").with_sequence(1),
                OperationTemplate::new("join", "合缝", "overlock")
                    .with_depends_on(["sleeve", "body"])
                    .with_sequence(2),
            ],
        );
        let graph = TemplateGraph::build(template).unwrap();
        assert_eq!(graph.roots().count(), 2);
        assert_eq!(graph.topological_order(), &["body", "sleeve", "join"]);
    }
}
