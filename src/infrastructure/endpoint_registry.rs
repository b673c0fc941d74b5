//! 端点注册表 - 基础设施层
//!
//! 持有全部端点及各自的健康标记，只暴露查询和标记能力

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::models::Endpoint;

struct EndpointSlot {
    endpoint: Endpoint,
    healthy: AtomicBool,
}

/// 端点注册表
///
/// 职责：
/// - 持有进程启动时配置的全部端点，运行期间不增不删
/// - 每个端点一个原子健康标记，并发写入互不影响
/// - 健康状态只反映最近一次尝试的结果，不是熔断器
pub struct EndpointRegistry {
    slots: Vec<EndpointSlot>,
}

impl EndpointRegistry {
    /// 创建注册表，所有端点初始为健康
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        let mut slots: Vec<EndpointSlot> = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if slots.iter().any(|slot| slot.endpoint == endpoint) {
                warn!("⚠️ 端点 {} 重复配置，已忽略", endpoint);
                continue;
            }
            slots.push(EndpointSlot {
                endpoint,
                healthy: AtomicBool::new(true),
            });
        }
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 全部端点（按配置顺序）
    pub fn all_endpoints(&self) -> Vec<Endpoint> {
        self.slots.iter().map(|slot| slot.endpoint.clone()).collect()
    }

    /// 当前健康的端点，顺序稳定，作为分片顺序
    pub fn healthy_endpoints(&self) -> Vec<Endpoint> {
        self.slots
            .iter()
            .filter(|slot| slot.healthy.load(Ordering::Acquire))
            .map(|slot| slot.endpoint.clone())
            .collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.healthy.load(Ordering::Acquire))
            .count()
    }

    pub fn is_healthy(&self, endpoint: &Endpoint) -> bool {
        self.slot(endpoint)
            .map(|slot| slot.healthy.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn mark_healthy(&self, endpoint: &Endpoint) {
        if self.set_health(endpoint, true) {
            info!("✓ 端点 {} 恢复健康", endpoint);
        }
    }

    pub fn mark_unhealthy(&self, endpoint: &Endpoint) {
        if self.set_health(endpoint, false) {
            warn!("⚠️ 端点 {} 标记为不健康", endpoint);
        }
    }

    /// 将所有端点重新标记为健康
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.healthy.store(true, Ordering::Release);
        }
        info!("🔄 已重置 {} 个端点的健康状态", self.slots.len());
    }

    /// 返回状态是否发生变化
    fn set_health(&self, endpoint: &Endpoint, healthy: bool) -> bool {
        match self.slot(endpoint) {
            Some(slot) => slot.healthy.swap(healthy, Ordering::AcqRel) != healthy,
            None => {
                debug!("忽略未注册端点的健康标记: {}", endpoint);
                false
            }
        }
    }

    fn slot(&self, endpoint: &Endpoint) -> Option<&EndpointSlot> {
        self.slots.iter().find(|slot| slot.endpoint == *endpoint)
    }
}
