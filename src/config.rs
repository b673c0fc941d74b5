use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;
use crate::models::Endpoint;

/// 优先端点的固定份额
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PriorityWeight {
    /// 端点地址，需出现在 `endpoints` 中
    pub endpoint: String,
    /// 占整批条目的比例，(0, 1]
    pub fraction: f64,
}

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 工作节点地址（顺序即分片顺序）
    pub endpoints: Vec<String>,
    /// 单次请求超时（毫秒）
    pub request_timeout_ms: u64,
    /// 同一端点的最大尝试次数（含首次）
    pub max_retries: usize,
    /// 退避基数（毫秒），第 n 次失败后等待 base * 2^(n-1)
    pub backoff_base_ms: u64,
    /// 故障转移端点上的尝试次数
    pub failover_retries: usize,
    /// 优先端点的固定份额，其余端点平分剩余部分
    pub priority_weights: Vec<PriorityWeight>,
    /// 单个分片的最大条数，超出时继续切分
    pub max_chunk_size: Option<usize>,
    /// 同时进行的请求数
    pub max_concurrent_requests: usize,
    /// 整批超时（毫秒），超时后取消全部请求
    pub batch_timeout_ms: Option<u64>,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://localhost:5004".to_string()],
            request_timeout_ms: 30_000,
            max_retries: 3,
            backoff_base_ms: 500,
            failover_retries: 1,
            priority_weights: Vec::new(),
            max_chunk_size: None,
            max_concurrent_requests: 32,
            batch_timeout_ms: None,
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 从环境变量读取，未设置或无法解析的项使用默认值
    ///
    /// - `STANZA_ENDPOINTS`: 逗号分隔的地址列表
    /// - `STANZA_PRIORITY_WEIGHTS`: `地址=比例` 逗号分隔
    /// - 其余为 `STANZA_` 前缀加大写字段名，`VERBOSE_LOGGING` 不带前缀
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            endpoints: std::env::var("STANZA_ENDPOINTS")
                .ok()
                .map(|v| split_list(&v))
                .filter(|v| !v.is_empty())
                .unwrap_or(default.endpoints),
            request_timeout_ms: env_or("STANZA_REQUEST_TIMEOUT_MS", default.request_timeout_ms),
            max_retries: env_or("STANZA_MAX_RETRIES", default.max_retries),
            backoff_base_ms: env_or("STANZA_BACKOFF_BASE_MS", default.backoff_base_ms),
            failover_retries: env_or("STANZA_FAILOVER_RETRIES", default.failover_retries),
            priority_weights: std::env::var("STANZA_PRIORITY_WEIGHTS")
                .ok()
                .map(|v| parse_priority_weights(&v))
                .unwrap_or(default.priority_weights),
            max_chunk_size: env_opt("STANZA_MAX_CHUNK_SIZE").or(default.max_chunk_size),
            max_concurrent_requests: env_or(
                "STANZA_MAX_CONCURRENT_REQUESTS",
                default.max_concurrent_requests,
            ),
            batch_timeout_ms: env_opt("STANZA_BATCH_TIMEOUT_MS").or(default.batch_timeout_ms),
            verbose_logging: env_or("VERBOSE_LOGGING", default.verbose_logging),
        }
    }

    /// 从 TOML 文件读取，缺省字段使用默认值
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|err| match err {
            ConfigError::TomlParseFailed { source, .. } => ConfigError::TomlParseFailed {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::TomlParseFailed {
            path: String::new(),
            source,
        })
    }

    /// 检查配置，并解析出端点列表
    pub fn validate(&self) -> Result<Vec<Endpoint>, ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue {
                field: "request_timeout_ms",
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroValue {
                field: "max_retries",
            });
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::ZeroValue {
                field: "max_concurrent_requests",
            });
        }
        if self.max_chunk_size == Some(0) {
            return Err(ConfigError::ZeroValue {
                field: "max_chunk_size",
            });
        }
        if self.batch_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroValue {
                field: "batch_timeout_ms",
            });
        }

        let endpoints = self.parse_endpoints()?;

        for weight in &self.priority_weights {
            if !endpoints.iter().any(|e| e.matches(&weight.endpoint)) {
                return Err(ConfigError::UnknownPriorityEndpoint {
                    endpoint: weight.endpoint.clone(),
                });
            }
        }

        Ok(endpoints)
    }

    pub fn parse_endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        self.endpoints.iter().map(|raw| Endpoint::parse(raw)).collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_ms.map(Duration::from_millis)
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_opt(name).unwrap_or(default)
}

fn env_opt<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("环境变量 {} 的值 '{}' 无法解析，使用默认值", name, value);
            None
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_priority_weights(value: &str) -> Vec<PriorityWeight> {
    split_list(value)
        .into_iter()
        .filter_map(|pair| {
            let (endpoint, fraction) = pair.rsplit_once('=')?;
            match fraction.trim().parse::<f64>() {
                Ok(fraction) => Some(PriorityWeight {
                    endpoint: endpoint.trim().to_string(),
                    fraction,
                }),
                Err(_) => {
                    warn!("忽略无法解析的优先端点权重: {}", pair);
                    None
                }
            }
        })
        .collect()
}
