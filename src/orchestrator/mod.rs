//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `fleet_client` - 客户端门面
//! - 持有当前语言（先选择、后处理）
//! - 持有连接池和端点注册表，生命周期与客户端一致
//!
//! ### `batch_coordinator` - 批处理协调器
//! - 每次调用重新分片
//! - 并发分发所有分片，等待全部到达终态
//! - 按原始下标重组结果，判定整批成败
//!
//! ## 层次关系
//!
//! ```text
//! fleet_client (select_language / process_batch / process_one)
//!     ↓
//! batch_coordinator (处理 Vec<Chunk>)
//!     ↓
//! services::Partitioner / services::Dispatcher (处理单个 Chunk)
//!     ↓
//! clients::WorkerTransport + infrastructure::EndpointRegistry
//! ```

pub mod batch_coordinator;
pub mod fleet_client;

pub use batch_coordinator::BatchCoordinator;
pub use fleet_client::FleetClient;
