//! 数据模型
//!
//! - `endpoint` - 工作节点地址
//! - `work` - 待处理条目与分片
//! - `batch_result` - 按原始顺序重组后的批处理结果

pub mod batch_result;
pub mod endpoint;
pub mod work;

pub use batch_result::{
    AttemptPhase, AttemptRecord, BatchResult, ChunkFailure, ChunkReport, ChunkState, ItemFailure,
    ItemOutcome,
};
pub use endpoint::Endpoint;
pub use work::{Chunk, WorkItem};
