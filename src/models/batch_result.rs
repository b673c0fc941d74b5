//! 批处理结果
//!
//! 无论各分片以什么顺序完成，结果始终按提交顺序排列。

use std::fmt;

use serde_json::Value;

use crate::error::TransientError;

/// 分片状态机的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    InFlight,
    Retrying,
    Failover,
    Succeeded,
    Failed,
}

impl ChunkState {
    /// 是否已到终态
    pub fn is_terminal(self) -> bool {
        matches!(self, ChunkState::Succeeded | ChunkState::Failed)
    }
}

/// 尝试发生在原端点还是故障转移后的端点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    Primary,
    Failover,
}

/// 一次请求尝试
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub endpoint: String,
    /// 在当前阶段内的序号，从 1 开始
    pub attempt: usize,
    pub phase: AttemptPhase,
    /// `None` 表示成功
    pub error: Option<TransientError>,
}

/// 单个分片的处理报告
#[derive(Debug, Clone)]
pub struct ChunkReport {
    pub chunk_id: usize,
    pub indices: Vec<usize>,
    pub state: ChunkState,
    /// 最后一次尝试所用的端点
    pub endpoint: String,
    /// 原端点上的重试次数（不含首次请求）
    pub retries: usize,
    pub failed_over: bool,
    pub attempts: Vec<AttemptRecord>,
}

/// 分片最终失败的信息
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub chunk_id: usize,
    pub indices: Vec<usize>,
    pub endpoint: String,
    pub attempts: usize,
    pub last_error: Option<TransientError>,
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "分片 #{} (下标 {:?}) 在端点 {} 共尝试 {} 次",
            self.chunk_id, self.indices, self.endpoint, self.attempts
        )?;
        if let Some(err) = &self.last_error {
            write!(f, ", 最后错误: {}", err)?;
        }
        Ok(())
    }
}

/// 单条失败的原因
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub chunk_id: usize,
    pub endpoint: String,
    pub attempts: usize,
    pub reason: String,
}

/// 单条结果
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Success(Value),
    Failed(ItemFailure),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            ItemOutcome::Success(value) => Some(value),
            ItemOutcome::Failed(_) => None,
        }
    }
}

/// 按提交顺序重组后的批处理结果
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    outcomes: Vec<ItemOutcome>,
    failed_indices: Vec<usize>,
    chunks: Vec<ChunkReport>,
}

impl BatchResult {
    /// `outcomes` 必须已按原始下标排好
    pub fn new(outcomes: Vec<ItemOutcome>, mut chunks: Vec<ChunkReport>) -> Self {
        let failed_indices = outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(index, _)| index)
            .collect();
        chunks.sort_by_key(|report| report.chunk_id);

        Self {
            outcomes,
            failed_indices,
            chunks,
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcomes(&self) -> &[ItemOutcome] {
        &self.outcomes
    }

    pub fn get(&self, index: usize) -> Option<&ItemOutcome> {
        self.outcomes.get(index)
    }

    /// 失败条目的原始下标（升序）
    pub fn failed_indices(&self) -> &[usize] {
        &self.failed_indices
    }

    pub fn chunks(&self) -> &[ChunkReport] {
        &self.chunks
    }

    /// 是否全部成功
    pub fn is_complete(&self) -> bool {
        self.failed_indices.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.len() - self.failed_indices.len()
    }

    /// 所有分片在原端点上的重试总数
    pub fn total_retries(&self) -> usize {
        self.chunks.iter().map(|report| report.retries).sum()
    }

    pub fn into_outcomes(self) -> Vec<ItemOutcome> {
        self.outcomes
    }

    /// 全部成功时返回按顺序排列的结果，否则返回 `None`
    pub fn into_values(self) -> Option<Vec<Value>> {
        self.outcomes
            .into_iter()
            .map(|outcome| match outcome {
                ItemOutcome::Success(value) => Some(value),
                ItemOutcome::Failed(_) => None,
            })
            .collect()
    }
}
