//! # Stanza Fleet
//!
//! 把大量文本分发到一组无状态 HTTP 文本处理节点的批处理客户端
//!
//! 单个节点变慢、不可达或返回错误时，整批仍能完成：
//! 失败的分片先在原节点上退避重试，再转移到其他健康节点，
//! 最终结果始终按提交顺序排列。
//!
//! ## 架构设计
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有共享资源，只暴露能力
//! - `EndpointRegistry` - 端点列表与原子健康标记
//!
//! ### ② 客户端层（Clients）
//! - `clients/` - 与工作节点的 HTTP 交互
//! - `WorkerTransport` - 传输能力（`/process`、`/batch_process`）
//! - `HttpWorkerClient` - 基于共享连接池的实现
//!
//! ### ③ 业务能力层（Services）
//! - `services/` - 只处理单个分片或单次切分
//! - `Partitioner` - 按份额表切出连续分片
//! - `Dispatcher` - 重试、退避、故障转移
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_coordinator` - 并发分发与按序重组
//! - `orchestrator/fleet_client` - 对外门面
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use clients::{HttpWorkerClient, WorkerTransport};
pub use config::{Config, PriorityWeight};
pub use error::{ConfigError, FleetError, Result, TransientError, TransientKind};
pub use infrastructure::EndpointRegistry;
pub use models::{BatchResult, ChunkReport, Endpoint, ItemFailure, ItemOutcome};
pub use orchestrator::{BatchCoordinator, FleetClient};
pub use services::{Partitioner, RetryPolicy, WeightTable};
