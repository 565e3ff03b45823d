/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use std::fs;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::QueueStats;

/// 安装全局日志订阅者
///
/// 级别由 `RUST_LOG` 控制，未设置时为 `info`（详细模式为 `debug`）。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n自动投递日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 多 worker 自动投递模式");
    info!("📊 worker 数量: {}", config.worker_count);
    info!(
        "💰 打码预算: ${:.2}/天, {} 次/小时",
        config.daily_cost_ceiling_usd, config.hourly_attempt_ceiling
    );
    info!(
        "🗄️ 队列存储: {}",
        if config.database_url.is_some() {
            "PostgreSQL"
        } else {
            "内存"
        }
    );
    info!("{}", "=".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `stats`: 队列中各状态的职位数量
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(stats: &QueueStats, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 已投递: {}/{}", stats.applied, stats.total());
    info!("🙋 转人工: {}", stats.needs_manual);
    info!("❌ 失败: {}", stats.failed);
    info!("🗑️ 已过期: {}", stats.expired);
    info!("📥 仍在队列: {}", stats.queued + stats.pending);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
