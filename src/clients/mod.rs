pub mod worker_client;

pub use worker_client::{HttpWorkerClient, WorkerTransport};
