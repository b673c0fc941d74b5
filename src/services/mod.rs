pub mod dispatcher;
pub mod partitioner;

pub use dispatcher::{ChunkOutcome, Dispatcher, RetryPolicy};
pub use partitioner::{Partitioner, WeightTable};
