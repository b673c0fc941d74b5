//! 错误类型
//!
//! 分两层：
//! - [`TransientError`]：单次请求失败（超时 / 连接失败 / 非 200 等），由分发器的重试与故障转移吸收，
//!   只出现在尝试记录里，不会单独抛给调用方
//! - [`FleetError`]：调用级错误，只有前置条件不满足或整批失败时才返回

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::models::ChunkFailure;

/// 调用级错误
#[derive(Debug, Error)]
pub enum FleetError {
    /// 未选择语言就开始处理
    #[error("未选择语言，请先调用 select_language")]
    LanguageNotSelected,

    /// 分片时没有任何健康端点
    #[error("没有可用的健康端点 (待处理 {requested} 条)")]
    NoCapacity { requested: usize },

    /// 所有分片在重试和故障转移后都失败了
    #[error("全部 {} 个分片均失败: {}", .failures.len(), summarize(.failures))]
    AllChunksFailed { failures: Vec<ChunkFailure> },

    /// 整批处理超时，已取消所有进行中的请求
    #[error("批处理超时 ({timeout:?})，已取消全部进行中的请求")]
    BatchTimedOut { timeout: Duration },

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// HTTP 客户端构建失败
    #[error("HTTP 客户端初始化失败: {0}")]
    Http(#[from] reqwest::Error),

    /// 结果重组时某个下标缺失或重复
    #[error("结果重组失败: 下标 {index} 缺失或重复")]
    Reassembly { index: usize },
}

fn summarize(failures: &[ChunkFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("端点列表为空")]
    NoEndpoints,

    #[error("无效的端点地址 '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("优先端点 '{endpoint}' 的权重 {fraction} 不在 (0, 1] 范围内")]
    InvalidFraction { endpoint: String, fraction: f64 },

    #[error("优先端点权重之和 {total} 超过 1")]
    FractionsExceedOne { total: f64 },

    #[error("优先端点 '{endpoint}' 不在端点列表中")]
    UnknownPriorityEndpoint { endpoint: String },

    #[error("配置项 {field} 必须大于 0")]
    ZeroValue { field: &'static str },

    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML 解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 单次请求失败的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientKind {
    /// 超过单次请求超时
    Timeout,
    /// 连接失败或请求未发出
    Connect(String),
    /// 非 200 状态码
    Status(u16),
    /// 响应体无法解析
    Decode(String),
    /// 返回的结果条数与分片条数不一致
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::Timeout => write!(f, "请求超时"),
            TransientKind::Connect(msg) => write!(f, "连接失败: {}", msg),
            TransientKind::Status(code) => write!(f, "HTTP 状态码 {}", code),
            TransientKind::Decode(msg) => write!(f, "响应解析失败: {}", msg),
            TransientKind::LengthMismatch { expected, actual } => {
                write!(f, "结果条数不匹配: 期望 {}, 实际 {}", expected, actual)
            }
        }
    }
}

/// 端点的一次失败尝试
///
/// `attempt` 由分发器填写（从 1 开始），传输层产生错误时先置 0。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("端点 {endpoint} 第 {attempt} 次尝试失败: {kind}")]
pub struct TransientError {
    pub endpoint: String,
    pub attempt: usize,
    pub kind: TransientKind,
}

impl TransientError {
    pub fn new(endpoint: impl Into<String>, kind: TransientKind) -> Self {
        Self {
            endpoint: endpoint.into(),
            attempt: 0,
            kind,
        }
    }

    /// 标记为第几次尝试
    pub fn at_attempt(mut self, attempt: usize) -> Self {
        self.attempt = attempt;
        self
    }

    /// 将 reqwest 错误归类
    pub fn from_reqwest(endpoint: impl Into<String>, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransientKind::Timeout
        } else if let Some(status) = err.status() {
            TransientKind::Status(status.as_u16())
        } else if err.is_decode() {
            TransientKind::Decode(err.to_string())
        } else {
            TransientKind::Connect(err.to_string())
        };
        Self::new(endpoint, kind)
    }
}

/// 应用程序结果类型
pub type Result<T> = std::result::Result<T, FleetError>;
