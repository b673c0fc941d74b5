/// 日志工具模块
///
/// 提供日志初始化和批处理日志输出的辅助函数
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::BatchResult;

/// 初始化日志
///
/// 优先读取 `RUST_LOG`，未设置时按 `config.verbose_logging` 选择级别。
/// 重复调用返回错误，不会覆盖已安装的 subscriber。
pub fn init(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(config)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("日志初始化失败: {}", e))?;

    Ok(())
}

/// 未设置 `RUST_LOG` 时的日志级别
fn default_level(config: &Config) -> &'static str {
    if config.verbose_logging {
        "debug"
    } else {
        "info"
    }
}

/// 记录客户端启动信息
pub fn log_startup(endpoints: usize, max_concurrent: usize, chunk_deadline: Duration) {
    info!("{}", "=".repeat(60));
    info!("🚀 客户端启动 - 多端点批处理模式");
    info!("🖥️ 工作节点: {} 个", endpoints);
    info!("📊 最大并发请求数: {}", max_concurrent);
    info!("⏱️ 单分片最长耗时: {:?}", chunk_deadline);
    info!("{}", "=".repeat(60));
}

/// 记录批次开始信息
///
/// # 参数
/// - `language`: 当前语言
/// - `total`: 条目总数
/// - `chunks`: 分片数量
/// - `endpoints`: 参与分片的健康端点数
pub fn log_batch_start(language: &str, total: usize, chunks: usize, endpoints: usize) {
    info!("{}", "=".repeat(60));
    info!("📦 开始处理批次 [语言: {}]", language);
    info!(
        "📄 共 {} 条，切分为 {} 个分片，分配到 {} 个健康端点",
        total, chunks, endpoints
    );
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(result: &BatchResult, elapsed: Duration) {
    info!("{}", "─".repeat(60));
    info!(
        "✓ 批次完成 ({}): 成功 {}/{}，耗时 {:.2?}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        result.success_count(),
        result.len(),
        elapsed
    );

    let failed_over = result.chunks().iter().filter(|c| c.failed_over).count();
    if result.total_retries() > 0 || failed_over > 0 {
        info!(
            "🔁 重试 {} 次，故障转移 {} 个分片",
            result.total_retries(),
            failed_over
        );
    }

    if !result.is_complete() {
        warn!(
            "❌ 失败 {} 条，下标: {}",
            result.failed_indices().len(),
            truncate_text(&format!("{:?}", result.failed_indices()), 200)
        );
    }
    info!("{}", "─".repeat(60));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("短文本", 10), "短文本");
        assert_eq!(truncate_text("这是一段很长的文本", 4), "这是一段...");
    }

    #[test]
    fn test_verbose_logging_selects_debug_level() {
        let verbose = Config {
            verbose_logging: true,
            ..Config::default()
        };
        assert_eq!(default_level(&verbose), "debug");
        assert_eq!(default_level(&Config::default()), "info");
    }

    #[test]
    fn test_init_twice_fails_without_panicking() {
        let config = Config::default();
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
