// ==========================================
// 成衣工序流转系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 回退: 缺失或无法解析的值使用默认值并告警
// ==========================================

use crate::config::engine_config::EngineConfig;
use crate::db::open_sqlite_connection;
use crate::domain::AssignmentPolicy;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        crate::db::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入 global scope 配置值 (存在则覆盖)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有 global 配置
    pub fn get_config_snapshot(&self) -> Result<HashMap<String, String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }
        Ok(config_map)
    }

    /// 读取并解析数值配置,缺失或非法时回退默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>>
    where
        T: FromStr + Copy,
    {
        match self.get_global_config_value(key)? {
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    warn!(config_key = key, value = %raw, "配置值无法解析,使用默认值");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    /// 加载引擎配置
    ///
    /// # 参数
    /// - db_path: 写入结果配置的数据库路径 (不从表内读取)
    pub fn load_engine_config(&self, db_path: &str) -> Result<EngineConfig, Box<dyn Error>> {
        let defaults = EngineConfig::default();

        let assignment_policy = match self.get_global_config_value(config_keys::ASSIGNMENT_POLICY)? {
            Some(raw) => AssignmentPolicy::parse(&raw).unwrap_or_else(|| {
                warn!(
                    config_key = config_keys::ASSIGNMENT_POLICY,
                    value = %raw,
                    "未知分派策略,使用默认值"
                );
                defaults.assignment_policy
            }),
            None => defaults.assignment_policy,
        };

        Ok(EngineConfig {
            assignment_policy,
            capacity_threshold_pct: self.get_parsed_or_default(
                config_keys::CAPACITY_THRESHOLD_PCT,
                defaults.capacity_threshold_pct,
            )?,
            assignment_expiry_secs: self.get_parsed_or_default(
                config_keys::ASSIGNMENT_EXPIRY_SECS,
                defaults.assignment_expiry_secs,
            )?,
            expiry_sweep_interval_secs: self.get_parsed_or_default(
                config_keys::EXPIRY_SWEEP_INTERVAL_SECS,
                defaults.expiry_sweep_interval_secs,
            )?,
            db_path: db_path.to_string(),
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 分派
    pub const ASSIGNMENT_POLICY: &str = "assignment_policy"; // auto_assign | broadcast_claim
    pub const CAPACITY_THRESHOLD_PCT: &str = "capacity_threshold_pct";

    // 超时
    pub const ASSIGNMENT_EXPIRY_SECS: &str = "assignment_expiry_secs";
    pub const EXPIRY_SWEEP_INTERVAL_SECS: &str = "expiry_sweep_interval_secs";
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn manager() -> (ConfigManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let manager = ConfigManager::new(file.path().to_str().unwrap()).unwrap();
        (manager, file)
    }

    #[test]
    fn test_defaults_when_table_empty() {
        let (manager, file) = manager();
        let path = file.path().to_str().unwrap();
        let config = manager.load_engine_config(path).unwrap();

        assert_eq!(config.assignment_policy, AssignmentPolicy::AutoAssign);
        assert_eq!(config.capacity_threshold_pct, 80.0);
        assert_eq!(config.assignment_expiry_secs, 900);
        assert_eq!(config.db_path, path);
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let (manager, file) = manager();
        manager
            .set_global_config_value(config_keys::ASSIGNMENT_POLICY, "broadcast_claim")
            .unwrap();
        manager
            .set_global_config_value(config_keys::CAPACITY_THRESHOLD_PCT, "70")
            .unwrap();
        manager
            .set_global_config_value(config_keys::ASSIGNMENT_EXPIRY_SECS, "abc")
            .unwrap();

        let config = manager
            .load_engine_config(file.path().to_str().unwrap())
            .unwrap();
        assert_eq!(config.assignment_policy, AssignmentPolicy::BroadcastClaim);
        assert_eq!(config.capacity_threshold_pct, 70.0);
        assert_eq!(config.assignment_expiry_secs, 900);

        // 覆盖写入
        manager
            .set_global_config_value(config_keys::CAPACITY_THRESHOLD_PCT, "90")
            .unwrap();
        assert_eq!(
            manager.get_config_snapshot().unwrap()[config_keys::CAPACITY_THRESHOLD_PCT],
            "90"
        );
    }
}
