//! 批处理协调器 - 编排层
//!
//! ## 职责
//!
//! 1. **分片**：每次调用都按当前健康端点重新分片，不缓存
//! 2. **并发分发**：所有分片同时分发，用 Semaphore 限制同时进行的请求数
//! 3. **等待终态**：每个分片都到达 `Succeeded` 或 `Failed` 后才继续
//! 4. **重组**：按条目的原始下标放回结果，完成顺序不影响输出顺序
//! 5. **判定**：部分失败作为数据返回，只有全部分片失败才返回错误
//!
//! 分发用 `join_all` 组织成一个整体：整批超时或调用方 drop 掉这个 future 时，
//! 所有进行中的请求随之取消，已收集的部分结果一并丢弃。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::warn;

use crate::clients::WorkerTransport;
use crate::config::Config;
use crate::error::{FleetError, Result};
use crate::infrastructure::EndpointRegistry;
use crate::models::{BatchResult, Chunk, ItemFailure, ItemOutcome, WorkItem};
use crate::services::{ChunkOutcome, Dispatcher, Partitioner, RetryPolicy, WeightTable};
use crate::utils::logging;

/// 批处理协调器
pub struct BatchCoordinator<T> {
    registry: Arc<EndpointRegistry>,
    partitioner: Partitioner,
    weights: WeightTable,
    dispatcher: Dispatcher<T>,
    semaphore: Arc<Semaphore>,
    batch_timeout: Option<Duration>,
}

impl<T: WorkerTransport> BatchCoordinator<T> {
    pub fn new(config: &Config, transport: Arc<T>, registry: Arc<EndpointRegistry>) -> Result<Self> {
        let weights = WeightTable::from_config(config)?;
        let dispatcher = Dispatcher::new(
            transport,
            registry.clone(),
            RetryPolicy::from_config(config),
        );

        Ok(Self {
            registry,
            partitioner: Partitioner::new(config.max_chunk_size),
            weights,
            dispatcher,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            batch_timeout: config.batch_timeout(),
        })
    }

    /// 处理一批文本
    ///
    /// # 返回
    /// - 未选择语言：`LanguageNotSelected`
    /// - 分片时没有健康端点：`NoCapacity`
    /// - 全部分片失败：`AllChunksFailed`
    /// - 超过整批超时：`BatchTimedOut`，不返回部分结果
    /// - 其余情况返回按原始顺序排列的结果，失败条目列在 `failed_indices` 中
    pub async fn process_batch(
        &self,
        language: Option<&str>,
        texts: Vec<String>,
    ) -> Result<BatchResult> {
        let language = language
            .filter(|code| !code.trim().is_empty())
            .ok_or(FleetError::LanguageNotSelected)?;

        match self.batch_timeout {
            Some(limit) => timeout(limit, self.run(language, texts))
                .await
                .map_err(|_| {
                    warn!("⏱️ 批处理超过 {:?}，已取消全部进行中的请求", limit);
                    FleetError::BatchTimedOut { timeout: limit }
                })?,
            None => self.run(language, texts).await,
        }
    }

    async fn run(&self, language: &str, texts: Vec<String>) -> Result<BatchResult> {
        let items = WorkItem::from_texts(texts);
        let total = items.len();
        if total == 0 {
            return Ok(BatchResult::default());
        }

        let healthy = self.registry.healthy_endpoints();
        let chunks = self.partitioner.partition(items, &healthy, &self.weights)?;

        logging::log_batch_start(language, total, chunks.len(), healthy.len());
        let started = Instant::now();

        let outcomes = join_all(
            chunks
                .into_iter()
                .map(|chunk| self.dispatch(chunk, language)),
        )
        .await;

        let result = reassemble(total, outcomes)?;
        logging::log_batch_complete(&result, started.elapsed());

        Ok(result)
    }

    async fn dispatch(&self, chunk: Chunk, language: &str) -> ChunkOutcome {
        // Semaphore 从不关闭，acquire 不会失败
        let _permit = self.semaphore.acquire().await.ok();
        self.dispatcher.send(chunk, language).await
    }
}

/// 按原始下标放回每个分片的结果
fn reassemble(total: usize, outcomes: Vec<ChunkOutcome>) -> Result<BatchResult> {
    let mut slots: Vec<Option<ItemOutcome>> = vec![None; total];
    let mut failures = Vec::new();
    let mut reports = Vec::with_capacity(outcomes.len());

    for ChunkOutcome {
        chunk,
        report,
        result,
    } in outcomes
    {
        match result {
            Ok(values) => {
                for (item, value) in chunk.items.into_iter().zip(values) {
                    place(&mut slots, item.index, ItemOutcome::Success(value))?;
                }
            }
            Err(failure) => {
                let reason = failure
                    .last_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "没有可用端点".to_string());
                for item in &chunk.items {
                    let outcome = ItemOutcome::Failed(ItemFailure {
                        chunk_id: failure.chunk_id,
                        endpoint: failure.endpoint.clone(),
                        attempts: failure.attempts,
                        reason: reason.clone(),
                    });
                    place(&mut slots, item.index, outcome)?;
                }
                failures.push(failure);
            }
        }
        reports.push(report);
    }

    if !reports.is_empty() && failures.len() == reports.len() {
        return Err(FleetError::AllChunksFailed { failures });
    }

    let outcomes = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.ok_or(FleetError::Reassembly { index }))
        .collect::<Result<Vec<_>>>()?;

    Ok(BatchResult::new(outcomes, reports))
}

/// 每个下标只能放一次
fn place(slots: &mut [Option<ItemOutcome>], index: usize, outcome: ItemOutcome) -> Result<()> {
    match slots.get_mut(index) {
        Some(slot) if slot.is_none() => {
            *slot = Some(outcome);
            Ok(())
        }
        _ => Err(FleetError::Reassembly { index }),
    }
}
