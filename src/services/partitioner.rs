//! 分片服务 - 业务能力层
//!
//! 只负责"把一批条目切成连续分片并分配给端点"，不发请求
//!
//! ## 份额规则
//!
//! 1. 优先端点按固定比例取 `floor(n * fraction)` 条
//! 2. 其余端点平分剩余条目，除不尽的部分从最前面的端点开始每个多分 1 条
//! 3. 全部健康端点都是优先端点时，剩余条目按同样方式分给最前面的优先端点
//! 4. 份额为 0 的端点从当前份额最大的端点借 1 条，保证不被饿死
//!
//! 分片按端点顺序切出原始列表的连续区间，拼接后即原始列表。

use tracing::debug;

use crate::config::Config;
use crate::error::{ConfigError, FleetError, Result};
use crate::models::{Chunk, Endpoint, WorkItem};

/// 修正 `n * fraction` 的浮点误差，例如 0.29 * 100 = 28.999999999999996
const FRACTION_EPSILON: f64 = 1e-9;

/// 端点份额表
///
/// 只记录固定比例的优先端点，未出现的端点平分剩余部分。
#[derive(Debug, Clone, Default)]
pub struct WeightTable {
    pinned: Vec<(Endpoint, f64)>,
}

impl WeightTable {
    /// 所有端点平分
    pub fn uniform() -> Self {
        Self::default()
    }

    pub fn new(pinned: Vec<(Endpoint, f64)>) -> std::result::Result<Self, ConfigError> {
        let mut total = 0.0;
        for (endpoint, fraction) in &pinned {
            if !(*fraction > 0.0 && *fraction <= 1.0) {
                return Err(ConfigError::InvalidFraction {
                    endpoint: endpoint.to_string(),
                    fraction: *fraction,
                });
            }
            total += fraction;
        }
        if total > 1.0 + FRACTION_EPSILON {
            return Err(ConfigError::FractionsExceedOne { total });
        }
        Ok(Self { pinned })
    }

    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        let pinned = config
            .priority_weights
            .iter()
            .map(|weight| Ok((Endpoint::parse(&weight.endpoint)?, weight.fraction)))
            .collect::<std::result::Result<Vec<_>, ConfigError>>()?;
        Self::new(pinned)
    }

    pub fn pinned_fraction(&self, endpoint: &Endpoint) -> Option<f64> {
        self.pinned
            .iter()
            .find(|(pinned, _)| pinned == endpoint)
            .map(|(_, fraction)| *fraction)
    }

    pub fn is_uniform(&self) -> bool {
        self.pinned.is_empty()
    }
}

/// 分片器
#[derive(Debug, Clone, Default)]
pub struct Partitioner {
    max_chunk_size: Option<usize>,
}

impl Partitioner {
    /// `max_chunk_size` 为 `None` 时每个端点只有一个分片
    pub fn new(max_chunk_size: Option<usize>) -> Self {
        Self {
            max_chunk_size: max_chunk_size.filter(|size| *size > 0),
        }
    }

    /// 将条目切成分片
    ///
    /// # 返回
    /// - 条目为空时返回空列表
    /// - 没有健康端点时返回 `NoCapacity`
    pub fn partition(
        &self,
        items: Vec<WorkItem>,
        healthy: &[Endpoint],
        weights: &WeightTable,
    ) -> Result<Vec<Chunk>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        if healthy.is_empty() {
            return Err(FleetError::NoCapacity {
                requested: items.len(),
            });
        }

        let shares = compute_shares(items.len(), healthy, weights);
        debug!("分片份额: {:?}", shares);

        let mut chunks = Vec::new();
        let mut remaining = items.into_iter();

        for (endpoint, share) in healthy.iter().zip(shares) {
            if share == 0 {
                continue;
            }
            let mut slice: Vec<WorkItem> = remaining.by_ref().take(share).collect();
            let limit = self.max_chunk_size.unwrap_or(slice.len());

            while !slice.is_empty() {
                let rest = slice.split_off(limit.min(slice.len()));
                chunks.push(Chunk::new(chunks.len(), slice, endpoint.clone()));
                slice = rest;
            }
        }

        Ok(chunks)
    }
}

/// 计算每个健康端点分到的条数，总和恒等于 `total`
pub fn compute_shares(total: usize, healthy: &[Endpoint], weights: &WeightTable) -> Vec<usize> {
    let mut shares = vec![0usize; healthy.len()];
    if total == 0 || healthy.is_empty() {
        return shares;
    }

    let mut assigned = 0;
    let mut free = Vec::new();

    for (i, endpoint) in healthy.iter().enumerate() {
        match weights.pinned_fraction(endpoint) {
            Some(fraction) => {
                let share = (total as f64 * fraction + FRACTION_EPSILON).floor() as usize;
                let share = share.min(total - assigned);
                shares[i] = share;
                assigned += share;
            }
            None => free.push(i),
        }
    }

    let receivers: Vec<usize> = if free.is_empty() {
        (0..healthy.len()).collect()
    } else {
        free
    };
    let rest = total - assigned;
    let base = rest / receivers.len();
    let extra = rest % receivers.len();
    for (pos, &i) in receivers.iter().enumerate() {
        shares[i] += base + usize::from(pos < extra);
    }

    for i in 0..shares.len() {
        if shares[i] > 0 {
            continue;
        }
        let donor = shares
            .iter()
            .enumerate()
            .filter(|(_, share)| **share > 1)
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(j, _)| j);
        match donor {
            Some(j) => {
                shares[j] -= 1;
                shares[i] += 1;
            }
            None => break,
        }
    }

    shares
}
