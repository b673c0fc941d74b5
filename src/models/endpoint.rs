//! 工作节点端点
//!
//! 端点身份由基础 URL 决定，健康状态不在这里，由 `EndpointRegistry` 持有

use std::fmt;

use reqwest::Url;

use crate::error::ConfigError;

const PROCESS_PATH: &str = "process";
const BATCH_PROCESS_PATH: &str = "batch_process";

/// 工作节点端点
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    base_url: Url,
    process_url: Url,
    batch_process_url: Url,
    host: String,
    port: u16,
}

impl Endpoint {
    /// 从配置中的地址解析端点
    ///
    /// 只接受 http / https，路径统一补上结尾的 `/`，保证 `process` 与 `batch_process`
    /// 拼接在基础路径之下。
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidEndpoint {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut base_url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(invalid("仅支持 http / https"));
        }

        let host = base_url
            .host_str()
            .ok_or_else(|| invalid("缺少主机名"))?
            .to_string();
        let port = base_url
            .port_or_known_default()
            .ok_or_else(|| invalid("无法确定端口"))?;

        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let process_url = base_url
            .join(PROCESS_PATH)
            .map_err(|e| invalid(&e.to_string()))?;
        let batch_process_url = base_url
            .join(BATCH_PROCESS_PATH)
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            base_url,
            process_url,
            batch_process_url,
            host,
            port,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `POST {endpoint}/process`
    pub fn process_url(&self) -> &Url {
        &self.process_url
    }

    /// `POST {endpoint}/batch_process`
    pub fn batch_process_url(&self) -> &Url {
        &self.batch_process_url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 判断配置中的地址是否指向本端点
    pub fn matches(&self, raw: &str) -> bool {
        Endpoint::parse(raw).map(|other| other == *self).unwrap_or(false)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
