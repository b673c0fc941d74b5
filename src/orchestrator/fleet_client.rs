//! 客户端门面 - 编排层
//!
//! 对外暴露 `select_language` / `process_one` / `process_batch`，
//! 持有当前语言和整个生命周期内共享的连接池。

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::clients::{HttpWorkerClient, WorkerTransport};
use crate::config::Config;
use crate::error::{FleetError, Result};
use crate::infrastructure::EndpointRegistry;
use crate::models::BatchResult;
use crate::orchestrator::BatchCoordinator;
use crate::services::RetryPolicy;
use crate::utils::logging;

/// 批处理客户端
///
/// 使用方式：先 `select_language`，再调用处理方法。
/// 连接池随客户端一起释放（包括出错或取消的情况），无需手动关闭。
///
/// ```no_run
/// # use stanza_fleet::{Config, FleetClient};
/// # async fn example() -> stanza_fleet::Result<()> {
/// let config = Config::from_env();
/// let _ = stanza_fleet::utils::logging::init(&config);
///
/// let mut client = FleetClient::new(config)?;
/// client.select_language("hu");
///
/// let result = client.process_batch(["Valakinek vagy valaminek a ismerete."]).await?;
/// if !result.is_complete() {
///     println!("失败下标: {:?}", result.failed_indices());
/// }
/// # Ok(())
/// # }
/// ```
pub struct FleetClient<T: WorkerTransport = HttpWorkerClient> {
    language: Option<String>,
    registry: Arc<EndpointRegistry>,
    coordinator: BatchCoordinator<T>,
}

impl FleetClient<HttpWorkerClient> {
    /// 使用 HTTP 连接池创建客户端
    pub fn new(config: Config) -> Result<Self> {
        let transport = HttpWorkerClient::new(&config)?;
        Self::with_transport(config, transport)
    }
}

impl<T: WorkerTransport> FleetClient<T> {
    /// 使用自定义传输层创建客户端
    pub fn with_transport(config: Config, transport: T) -> Result<Self> {
        let endpoints = config.validate()?;
        logging::log_startup(
            endpoints.len(),
            config.max_concurrent_requests,
            RetryPolicy::from_config(&config).worst_case(),
        );

        let registry = Arc::new(EndpointRegistry::new(endpoints));
        let coordinator = BatchCoordinator::new(&config, Arc::new(transport), registry.clone())?;

        Ok(Self {
            language: None,
            registry,
            coordinator,
        })
    }

    /// 选择语言，覆盖之前的选择
    pub fn select_language(&mut self, code: impl Into<String>) -> bool {
        let code = code.into();
        info!("🌐 选择语言: {}", code);
        self.language = Some(code);
        true
    }

    pub fn current_language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// 处理一批文本，结果按提交顺序排列
    pub async fn process_batch<I, S>(&self, texts: I) -> Result<BatchResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let texts: Vec<String> = texts.into_iter().map(Into::into).collect();
        self.coordinator
            .process_batch(self.current_language(), texts)
            .await
    }

    /// 处理单条文本
    pub async fn process_one(&self, text: impl Into<String>) -> Result<Value> {
        // 单条失败时整批失败，已由 process_batch 返回 AllChunksFailed
        let result = self.process_batch([text.into()]).await?;

        result
            .into_values()
            .and_then(|values| values.into_iter().next())
            .ok_or(FleetError::Reassembly { index: 0 })
    }

    /// 端点注册表（只读查询与手动标记）
    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// 将所有端点重新标记为健康
    pub fn reset_health(&self) {
        self.registry.reset();
    }
}
