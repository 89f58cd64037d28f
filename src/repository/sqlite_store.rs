// ==========================================
// 成衣工序流转系统 - SQLite 持久化网关
// ==========================================
// 红线: Repository 不含业务逻辑
// 约束: 所有查询使用参数化
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::types::{Shift, StepPriority, StepStatus};
use crate::domain::{ArticleTemplate, OperationTemplate, OperatorCapacity, WorkflowStep};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::gateway::PersistenceGateway;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

const STEP_COLUMNS: &str = r#"
    step_id, bundle_id, template_id, operation_id, status, pieces, completed_pieces,
    assigned_operator_id, blocked_reason, dependencies_json, priority,
    sequence_number, created_at, available_at, assigned_at, started_at,
    completed_at, updated_at
"#;

const UPSERT_STEP_SQL: &str = r#"
    INSERT OR REPLACE INTO workflow_step (
        step_id, bundle_id, template_id, operation_id, status, pieces, completed_pieces,
        assigned_operator_id, blocked_reason, dependencies_json, priority,
        sequence_number, created_at, available_at, assigned_at, started_at,
        completed_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
"#;

// ==========================================
// SqliteStore - SQLite 仓储
// ==========================================

/// SQLite 仓储
/// 职责: article_template / workflow_step / operator_capacity 表的读写
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// 打开数据库并确保 schema 存在
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例 (调用方负责 schema)
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 共享底层连接 (供 ConfigManager 复用)
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn write_step(conn: &Connection, step: &WorkflowStep) -> RepositoryResult<()> {
        let deps_json = serde_json::to_string(&step.dependencies)?;
        conn.execute(
            UPSERT_STEP_SQL,
            params![
                step.step_id,
                step.bundle_id,
                step.template_id,
                step.operation_id,
                step.status.to_db_str(),
                step.pieces,
                step.completed_pieces,
                step.assigned_operator_id,
                step.blocked_reason,
                deps_json,
                step.priority.to_db_str(),
                step.sequence_number,
                step.created_at,
                step.available_at,
                step.assigned_at,
                step.started_at,
                step.completed_at,
                step.updated_at,
            ],
        )?;
        Ok(())
    }

    fn map_step(row: &Row<'_>) -> rusqlite::Result<WorkflowStep> {
        let status_str: String = row.get(4)?;
        let deps_json: String = row.get(9)?;
        let priority_str: String = row.get(10)?;

        let status = StepStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("未知工序状态: {}", status_str).into(),
            )
        })?;
        let dependencies: BTreeSet<String> = serde_json::from_str(&deps_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(WorkflowStep {
            step_id: row.get(0)?,
            bundle_id: row.get(1)?,
            template_id: row.get(2)?,
            operation_id: row.get(3)?,
            status,
            pieces: row.get(5)?,
            completed_pieces: row.get(6)?,
            assigned_operator_id: row.get(7)?,
            blocked_reason: row.get(8)?,
            dependencies,
            priority: StepPriority::parse(&priority_str).unwrap_or_default(),
            sequence_number: row.get(11)?,
            created_at: row.get(12)?,
            available_at: row.get(13)?,
            assigned_at: row.get(14)?,
            started_at: row.get(15)?,
            completed_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }

    fn map_operator(row: &Row<'_>) -> rusqlite::Result<OperatorCapacity> {
        let skills_json: String = row.get(2)?;
        let shift_str: String = row.get(5)?;
        let skills: BTreeSet<String> = serde_json::from_str(&skills_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(OperatorCapacity {
            operator_id: row.get(0)?,
            machine_type: row.get(1)?,
            skills,
            max_capacity_per_hour: row.get(3)?,
            current_workload: row.get(4)?,
            shift: Shift::from_db_str(&shift_str),
            on_break: row.get::<_, i32>(6)? != 0,
            active: row.get::<_, i32>(7)? != 0,
        })
    }
}

impl PersistenceGateway for SqliteStore {
    fn load_template(&self, template_id: &str) -> RepositoryResult<Option<ArticleTemplate>> {
        let conn = self.get_conn()?;

        let row = conn
            .query_row(
                "SELECT template_id, article_code, operations_json FROM article_template WHERE template_id = ?1",
                params![template_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((template_id, article_code, operations_json)) => {
                let operations: Vec<OperationTemplate> = serde_json::from_str(&operations_json)?;
                Ok(Some(ArticleTemplate {
                    template_id,
                    article_code,
                    operations,
                }))
            }
            None => Ok(None),
        }
    }

    fn save_template(&self, template: &ArticleTemplate) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let operations_json = serde_json::to_string(&template.operations)?;

        // 模板注册后不可变,重复ID由主键约束拒绝
        conn.execute(
            r#"
            INSERT INTO article_template (template_id, article_code, operations_json)
            VALUES (?1, ?2, ?3)
            "#,
            params![template.template_id, template.article_code, operations_json],
        )?;
        Ok(())
    }

    fn load_step(&self, step_id: &str) -> RepositoryResult<Option<WorkflowStep>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM workflow_step WHERE step_id = ?1", STEP_COLUMNS);
        let step = conn
            .query_row(&sql, params![step_id], Self::map_step)
            .optional()?;
        Ok(step)
    }

    fn save_step(&self, step: &WorkflowStep) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::write_step(&conn, step)
    }

    fn save_steps(&self, steps: &[WorkflowStep]) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        for step in steps {
            // 任一失败时 tx 被 drop,自动回滚
            Self::write_step(&tx, step)?;
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    fn list_steps_by_bundle(&self, bundle_id: &str) -> RepositoryResult<Vec<WorkflowStep>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM workflow_step WHERE bundle_id = ?1 ORDER BY sequence_number, operation_id",
            STEP_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let steps = stmt
            .query_map(params![bundle_id], Self::map_step)?
            .collect::<rusqlite::Result<Vec<WorkflowStep>>>()?;
        Ok(steps)
    }

    fn list_open_bundle_ids(&self) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT bundle_id FROM workflow_step WHERE status <> ?1 ORDER BY bundle_id",
        )?;
        let ids = stmt
            .query_map(params![StepStatus::Completed.to_db_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn load_operator(&self, operator_id: &str) -> RepositoryResult<Option<OperatorCapacity>> {
        let conn = self.get_conn()?;
        let operator = conn
            .query_row(
                r#"
                SELECT operator_id, machine_type, skills_json, max_capacity_per_hour,
                       current_workload, shift, on_break, active
                FROM operator_capacity
                WHERE operator_id = ?1
                "#,
                params![operator_id],
                Self::map_operator,
            )
            .optional()?;
        Ok(operator)
    }

    fn save_operator(&self, operator: &OperatorCapacity) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let skills_json = serde_json::to_string(&operator.skills)?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO operator_capacity (
                operator_id, machine_type, skills_json, max_capacity_per_hour,
                current_workload, shift, on_break, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                operator.operator_id,
                operator.machine_type,
                skills_json,
                operator.max_capacity_per_hour,
                operator.current_workload,
                operator.shift.to_db_str(),
                operator.on_break as i32,
                operator.active as i32,
            ],
        )?;
        Ok(())
    }

    fn list_operators(
        &self,
        machine_type: Option<&str>,
        required_skills: &BTreeSet<String>,
    ) -> RepositoryResult<Vec<OperatorCapacity>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT operator_id, machine_type, skills_json, max_capacity_per_hour,
                   current_workload, shift, on_break, active
            FROM operator_capacity
            WHERE (?1 IS NULL OR machine_type = ?1)
            ORDER BY operator_id
            "#,
        )?;

        let operators = stmt
            .query_map(params![machine_type], Self::map_operator)?
            .collect::<rusqlite::Result<Vec<OperatorCapacity>>>()?;

        // 技能为 JSON 集合,超集判断在内存中完成
        Ok(operators
            .into_iter()
            .filter(|op| op.skills.is_superset(required_skills))
            .collect())
    }
}
