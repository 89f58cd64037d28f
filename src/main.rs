// ==========================================
// 成衣工序流转系统 - 服务主入口
// ==========================================
// 流程: 日志 → 配置 → AppState (SQLite + 产能登记表 + 未完工批次) → 后台任务 → 等待 Ctrl-C
// ==========================================

use std::sync::Arc;

use garment_flow::app::{get_default_db_path, AppState};
use garment_flow::config::ConfigManager;
use garment_flow::engine::TracingNotificationGateway;
use garment_flow::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", garment_flow::APP_NAME);
    tracing::info!("系统版本: {}", garment_flow::VERSION);
    tracing::info!("==================================================");

    // 获取数据库路径并加载配置
    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let config = ConfigManager::new(&db_path)
        .and_then(|manager| manager.load_engine_config(&db_path))
        .map_err(|e| anyhow::anyhow!("加载配置失败: {}", e))?;
    tracing::info!(
        policy = %config.assignment_policy,
        capacity_threshold_pct = config.capacity_threshold_pct,
        "配置已加载"
    );

    // 创建AppState
    let app_state = AppState::new(config).map_err(anyhow::Error::msg)?;
    let workers = app_state
        .spawn_background_workers(Arc::new(TracingNotificationGateway))
        .map_err(anyhow::Error::msg)?;

    tracing::info!("服务已启动，按 Ctrl-C 退出");
    tokio::signal::ctrl_c().await?;

    tracing::info!("收到退出信号，正在停止后台任务...");
    let (stats, expired) = workers.shutdown().await;
    tracing::info!(
        delivered = stats.delivered,
        failed = stats.failed,
        expired,
        "服务已退出"
    );
    Ok(())
}
