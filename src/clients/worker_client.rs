/// 工作节点 HTTP 客户端
///
/// 封装与工作节点 `/process`、`/batch_process` 两个接口的交互，
/// 并持有整个客户端生命周期内共享的连接池
use std::future::Future;

use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{TransientError, TransientKind};
use crate::models::Endpoint;

/// 与工作节点通信的能力
///
/// 分发器只依赖这个 trait，测试中可以替换为内存实现。
/// 返回的错误都属于可重试的瞬时错误。
pub trait WorkerTransport: Send + Sync + 'static {
    /// `POST {endpoint}/process`
    fn process(
        &self,
        endpoint: &Endpoint,
        language: &str,
        text: &str,
    ) -> impl Future<Output = Result<Value, TransientError>> + Send;

    /// `POST {endpoint}/batch_process`，结果与输入顺序一一对应
    fn batch_process(
        &self,
        endpoint: &Endpoint,
        language: &str,
        texts: &[&str],
    ) -> impl Future<Output = Result<Vec<Value>, TransientError>> + Send;
}

#[derive(Debug, Serialize)]
struct ProcessRequest<'a> {
    language: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchProcessRequest<'a> {
    language: &'a str,
    texts: &'a [&'a str],
}

/// 基于 reqwest 的工作节点客户端
///
/// `reqwest::Client` 内部是 `Arc`，clone 只复制句柄，所有分发任务共用同一个连接池，
/// 不需要加锁。最后一个句柄被 drop 时连接池随之释放。
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    client: Client,
}

impl HttpWorkerClient {
    /// 创建新的工作节点客户端
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.max_concurrent_requests)
            .build()?;
        Ok(Self { client })
    }

    /// 使用已有的 reqwest 客户端
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        endpoint: &Endpoint,
        url: &Url,
        body: &B,
    ) -> Result<Value, TransientError> {
        debug!("POST {}", url);

        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| TransientError::from_reqwest(endpoint.to_string(), &e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(TransientError::new(
                endpoint.to_string(),
                TransientKind::Status(status.as_u16()),
            ));
        }

        response.json::<Value>().await.map_err(|e| {
            TransientError::new(endpoint.to_string(), TransientKind::Decode(e.to_string()))
        })
    }
}

impl WorkerTransport for HttpWorkerClient {
    async fn process(
        &self,
        endpoint: &Endpoint,
        language: &str,
        text: &str,
    ) -> Result<Value, TransientError> {
        let body = ProcessRequest { language, text };
        self.post_json(endpoint, endpoint.process_url(), &body).await
    }

    async fn batch_process(
        &self,
        endpoint: &Endpoint,
        language: &str,
        texts: &[&str],
    ) -> Result<Vec<Value>, TransientError> {
        let body = BatchProcessRequest { language, texts };
        let value = self
            .post_json(endpoint, endpoint.batch_process_url(), &body)
            .await?;
        into_annotations(endpoint, value)
    }
}

/// `/batch_process` 必须返回数组
fn into_annotations(endpoint: &Endpoint, value: Value) -> Result<Vec<Value>, TransientError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(TransientError::new(
            endpoint.to_string(),
            TransientKind::Decode(format!("期望 JSON 数组，实际为: {}", type_name(&other))),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
