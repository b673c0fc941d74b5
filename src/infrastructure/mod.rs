//! 基础设施层（Infrastructure Layer）
//!
//! 持有共享资源，只暴露能力：
//! - `endpoint_registry` - 端点列表与健康标记

pub mod endpoint_registry;

pub use endpoint_registry::EndpointRegistry;
