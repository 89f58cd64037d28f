// ==========================================
// 成衣工序流转系统 - 应用状态
// ==========================================
// 职责: 组装持久化、编排器、API 与后台任务
// 后台任务: 通知分发器 + 超时巡检,共用一个 shutdown 信号
// ==========================================

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::WorkflowApi;
use crate::config::EngineConfig;
use crate::engine::{
    DispatchStats, ExpirySweeper, NotificationDispatcher, NotificationGateway, NotificationOutbox,
    NotificationReceiver, WorkflowOrchestrator,
};
use crate::repository::{PersistenceGateway, SqliteStore};

/// 应用状态
///
/// 包含编排器、API 实例和通知出站队列
pub struct AppState {
    /// 生效配置
    pub config: EngineConfig,

    /// 工序编排器
    pub orchestrator: Arc<WorkflowOrchestrator>,

    /// 工序流转API
    pub workflow_api: Arc<WorkflowApi>,

    /// 通知出站队列接收端 (启动分发器时取走)
    receiver: Mutex<Option<NotificationReceiver>>,
}

impl AppState {
    /// 以 SQLite 持久化创建 AppState
    ///
    /// # 参数
    /// - config: 引擎配置 (db_path 指向数据库文件)
    ///
    /// # 返回
    /// - Ok(AppState): 初始化成功 (产能登记表与未完工批次已从库中加载)
    /// - Err(String): 初始化错误
    pub fn new(config: EngineConfig) -> Result<Self, String> {
        let db_path = config.resolved_db_path();
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let store: Arc<dyn PersistenceGateway> = Arc::new(
            SqliteStore::new(&db_path).map_err(|e| format!("无法创建SqliteStore: {}", e))?,
        );
        let state = Self::with_store(config, store)?;

        let loaded = state
            .orchestrator
            .registry()
            .hydrate()
            .map_err(|e| format!("加载操作工产能失败: {}", e))?;
        tracing::info!("已加载 {} 名操作工", loaded);

        let recovered = state
            .orchestrator
            .recover_bundles()
            .map_err(|e| format!("恢复未完工批次失败: {}", e))?;
        tracing::info!("已恢复 {} 个未完工批次", recovered);
        Ok(state)
    }

    /// 以任意持久化网关创建 AppState (测试/嵌入)
    pub fn with_store(config: EngineConfig, store: Arc<dyn PersistenceGateway>) -> Result<Self, String> {
        let (outbox, receiver) = NotificationOutbox::channel();
        let orchestrator = Arc::new(
            WorkflowOrchestrator::new(&config, store, outbox)
                .map_err(|e| format!("无法创建WorkflowOrchestrator: {}", e))?,
        );
        let workflow_api = Arc::new(WorkflowApi::new(orchestrator.clone()));

        Ok(Self {
            config,
            orchestrator,
            workflow_api,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// 启动后台任务 (需在 tokio 运行时内调用,且仅能调用一次)
    ///
    /// # 参数
    /// - gateway: 通知网关
    pub fn spawn_background_workers(
        &self,
        gateway: Arc<dyn NotificationGateway>,
    ) -> Result<BackgroundWorkers, String> {
        let receiver = self
            .receiver
            .lock()
            .map_err(|e| format!("锁获取失败: {}", e))?
            .take()
            .ok_or_else(|| "后台任务已启动".to_string())?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = tokio::spawn(
            NotificationDispatcher::new(receiver, gateway).run(shutdown_rx.clone()),
        );
        let sweeper = tokio::spawn(
            ExpirySweeper::new(
                self.orchestrator.clone(),
                Duration::from_secs(self.config.expiry_sweep_interval_secs),
            )
            .run(shutdown_rx),
        );

        tracing::info!("后台任务已启动");
        Ok(BackgroundWorkers {
            shutdown: shutdown_tx,
            dispatcher,
            sweeper,
        })
    }
}

// ==========================================
// BackgroundWorkers - 后台任务句柄
// ==========================================
pub struct BackgroundWorkers {
    shutdown: watch::Sender<bool>,
    dispatcher: JoinHandle<DispatchStats>,
    sweeper: JoinHandle<usize>,
}

impl BackgroundWorkers {
    /// 发送停止信号并等待任务退出
    ///
    /// # 返回
    /// (通知分发统计, 累计收回的超时指派数)
    pub async fn shutdown(self) -> (DispatchStats, usize) {
        let _ = self.shutdown.send(true);

        let stats = self.dispatcher.await.unwrap_or_else(|e| {
            tracing::error!("通知分发器异常退出: {}", e);
            DispatchStats::default()
        });
        let expired = self.sweeper.await.unwrap_or_else(|e| {
            tracing::error!("超时巡检异常退出: {}", e);
            0
        });
        (stats, expired)
    }
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 GARMENT_FLOW_DB_PATH > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    // 允许通过环境变量显式指定 DB 路径（便于调试/测试/CI）
    if let Ok(path) = std::env::var("GARMENT_FLOW_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./garment_flow.db");

    if let Some(data_dir) = dirs::data_dir() {
        // 开发环境使用独立目录，避免污染生产数据
        #[cfg(debug_assertions)]
        let dir = data_dir.join("garment-flow-dev");

        #[cfg(not(debug_assertions))]
        let dir = data_dir.join("garment-flow");

        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("garment_flow.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NoOpNotificationGateway;
    use crate::repository::InMemoryStore;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[tokio::test]
    async fn test_workers_start_once_and_stop() {
        let state =
            AppState::with_store(EngineConfig::default(), Arc::new(InMemoryStore::new())).unwrap();

        let workers = state
            .spawn_background_workers(Arc::new(NoOpNotificationGateway))
            .unwrap();
        assert!(state
            .spawn_background_workers(Arc::new(NoOpNotificationGateway))
            .is_err());

        let (stats, expired) = workers.shutdown().await;
        assert_eq!(stats, DispatchStats::default());
        assert_eq!(expired, 0);
    }
}
