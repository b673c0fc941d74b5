//! 分发服务 - 业务能力层
//!
//! 只负责"把一个分片送到一个端点并拿回结果"，包括重试、退避和故障转移。
//!
//! ## 分片状态机
//!
//! ```text
//! Pending → InFlight ─成功→ Succeeded
//!              │
//!              └失败→ Retrying ─还有次数→ InFlight（同一端点，等待 base * 2^(n-1)）
//!                        │
//!                        └次数用尽→ Failover ─→ InFlight（另一个健康端点）
//!                                      │
//!                                      └无候选 / 仍失败→ Failed
//! ```
//!
//! 单次失败只记录在尝试历史中，不向上抛出；只有分片进入 `Failed` 才由协调器汇总。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::clients::WorkerTransport;
use crate::config::Config;
use crate::error::{TransientError, TransientKind};
use crate::infrastructure::EndpointRegistry;
use crate::models::{
    AttemptPhase, AttemptRecord, Chunk, ChunkFailure, ChunkReport, ChunkState, Endpoint,
};

/// 重试与故障转移策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 原端点上的最大尝试次数（含首次）
    pub max_attempts: usize,
    pub backoff_base: Duration,
    /// 故障转移端点上的尝试次数
    pub failover_attempts: usize,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            backoff_base: config.backoff_base(),
            failover_attempts: config.failover_retries,
            request_timeout: config.request_timeout(),
        }
    }

    /// 第 `attempt` 次失败后的等待时间：`base * 2^(attempt-1)`
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        self.backoff_base.saturating_mul(1u32 << exponent)
    }

    /// 单个分片最长耗时：所有尝试的超时加上所有退避
    pub fn worst_case(&self) -> Duration {
        let attempts = (self.max_attempts + self.failover_attempts) as u32;
        let backoff: Duration = (1..self.max_attempts)
            .chain(1..self.failover_attempts)
            .map(|attempt| self.backoff_delay(attempt))
            .sum();
        self.request_timeout.saturating_mul(attempts) + backoff
    }
}

/// 单个分片的最终结果
#[derive(Debug)]
pub struct ChunkOutcome {
    /// 分片（`endpoint` 为最后一次尝试所用的端点）
    pub chunk: Chunk,
    pub report: ChunkReport,
    /// 成功时结果与分片内条目一一对应
    pub result: Result<Vec<Value>, ChunkFailure>,
}

impl ChunkOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// 单个分片的运行记录
struct ChunkRun {
    chunk_id: usize,
    state: ChunkState,
    attempts: Vec<AttemptRecord>,
}

impl ChunkRun {
    fn new(chunk_id: usize) -> Self {
        Self {
            chunk_id,
            state: ChunkState::Pending,
            attempts: Vec::new(),
        }
    }

    fn transition(&mut self, next: ChunkState) {
        debug!("[分片 #{}] {:?} → {:?}", self.chunk_id, self.state, next);
        self.state = next;
    }

    fn record(
        &mut self,
        endpoint: &Endpoint,
        attempt: usize,
        phase: AttemptPhase,
        error: Option<TransientError>,
    ) {
        self.attempts.push(AttemptRecord {
            endpoint: endpoint.to_string(),
            attempt,
            phase,
            error,
        });
    }

    fn primary_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.phase == AttemptPhase::Primary)
            .count()
    }

    fn failed_over(&self) -> bool {
        self.attempts.iter().any(|a| a.phase == AttemptPhase::Failover)
    }

    fn last_error(&self) -> Option<TransientError> {
        self.attempts.iter().rev().find_map(|a| a.error.clone())
    }
}

/// 分发器
///
/// 职责：
/// - 对单个分片执行请求、重试、退避、故障转移
/// - 每次尝试后更新注册表中的端点健康状态
/// - 不关心整批的拆分与重组
pub struct Dispatcher<T> {
    transport: Arc<T>,
    registry: Arc<EndpointRegistry>,
    policy: RetryPolicy,
}

impl<T: WorkerTransport> Dispatcher<T> {
    /// 创建新的分发器
    pub fn new(transport: Arc<T>, registry: Arc<EndpointRegistry>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            registry,
            policy,
        }
    }

    /// 发送一个分片，直到成功或进入 `Failed`
    pub async fn send(&self, mut chunk: Chunk, language: &str) -> ChunkOutcome {
        let mut run = ChunkRun::new(chunk.id);
        let primary = chunk.endpoint.clone();

        if let Some(values) = self
            .run_phase(&chunk, language, AttemptPhase::Primary, self.policy.max_attempts, &mut run)
            .await
        {
            return self.finish(chunk, run, Some(values));
        }

        // 原端点次数用尽，寻找另一个健康端点
        let candidate = self
            .registry
            .healthy_endpoints()
            .into_iter()
            .find(|endpoint| *endpoint != primary);

        match candidate {
            Some(next) if self.policy.failover_attempts > 0 => {
                run.transition(ChunkState::Failover);
                info!(
                    "[分片 #{}] 🔀 端点 {} 重试 {} 次均失败，转移到 {}",
                    chunk.id, primary, self.policy.max_attempts, next
                );
                chunk.reassign(next);

                if let Some(values) = self
                    .run_phase(
                        &chunk,
                        language,
                        AttemptPhase::Failover,
                        self.policy.failover_attempts,
                        &mut run,
                    )
                    .await
                {
                    return self.finish(chunk, run, Some(values));
                }
            }
            Some(_) => {
                debug!("[分片 #{}] 未启用故障转移", chunk.id);
            }
            None => {
                warn!(
                    "[分片 #{}] ⚠️ 端点 {} 失败后没有其他健康端点可用",
                    chunk.id, primary
                );
            }
        }

        self.finish(chunk, run, None)
    }

    /// 在当前端点上最多尝试 `budget` 次，成功返回结果
    async fn run_phase(
        &self,
        chunk: &Chunk,
        language: &str,
        phase: AttemptPhase,
        budget: usize,
        run: &mut ChunkRun,
    ) -> Option<Vec<Value>> {
        for attempt in 1..=budget {
            run.transition(ChunkState::InFlight);

            match self.attempt(chunk, language).await {
                Ok(values) => {
                    self.registry.mark_healthy(&chunk.endpoint);
                    run.record(&chunk.endpoint, attempt, phase, None);
                    return Some(values);
                }
                Err(err) => {
                    let err = err.at_attempt(attempt);
                    self.registry.mark_unhealthy(&chunk.endpoint);
                    warn!(
                        "[分片 #{}] ⚠️ {} (尝试 {}/{}, 下标 {}..={})",
                        chunk.id,
                        err,
                        attempt,
                        budget,
                        first_index(chunk),
                        last_index(chunk)
                    );
                    run.record(&chunk.endpoint, attempt, phase, Some(err));

                    if attempt < budget {
                        run.transition(ChunkState::Retrying);
                        let delay = self.policy.backoff_delay(attempt);
                        debug!("[分片 #{}] 等待 {:?} 后重试", chunk.id, delay);
                        sleep(delay).await;
                    }
                }
            }
        }
        None
    }

    /// 单次请求，受单次超时约束
    async fn attempt(&self, chunk: &Chunk, language: &str) -> Result<Vec<Value>, TransientError> {
        let endpoint = &chunk.endpoint;
        let texts = chunk.texts();

        let call = async {
            if let [text] = texts[..] {
                self.transport
                    .process(endpoint, language, text)
                    .await
                    .map(|value| vec![value])
            } else {
                self.transport.batch_process(endpoint, language, &texts).await
            }
        };

        let values = timeout(self.policy.request_timeout, call)
            .await
            .map_err(|_| TransientError::new(endpoint.to_string(), TransientKind::Timeout))??;

        if values.len() != chunk.len() {
            return Err(TransientError::new(
                endpoint.to_string(),
                TransientKind::LengthMismatch {
                    expected: chunk.len(),
                    actual: values.len(),
                },
            ));
        }

        Ok(values)
    }

    fn finish(
        &self,
        chunk: Chunk,
        mut run: ChunkRun,
        values: Option<Vec<Value>>,
    ) -> ChunkOutcome {
        let state = if values.is_some() {
            ChunkState::Succeeded
        } else {
            ChunkState::Failed
        };
        run.transition(state);

        let indices = chunk.indices();
        let endpoint = chunk.endpoint.to_string();

        let result = values.ok_or_else(|| {
            let failure = ChunkFailure {
                chunk_id: chunk.id,
                indices: indices.clone(),
                endpoint: endpoint.clone(),
                attempts: run.attempts.len(),
                last_error: run.last_error(),
            };
            error!("[分片 #{}] ❌ {}", chunk.id, failure);
            failure
        });

        let report = ChunkReport {
            chunk_id: chunk.id,
            indices,
            state,
            endpoint,
            retries: run.primary_attempts().saturating_sub(1),
            failed_over: run.failed_over(),
            attempts: run.attempts,
        };

        ChunkOutcome {
            chunk,
            report,
            result,
        }
    }
}

fn first_index(chunk: &Chunk) -> usize {
    chunk.items.first().map(|item| item.index).unwrap_or_default()
}

fn last_index(chunk: &Chunk) -> usize {
    chunk.items.last().map(|item| item.index).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkItem;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// 按端点预设每次调用的结果，预设用完后一律成功
    #[derive(Default)]
    struct ScriptedTransport {
        failures: Mutex<HashMap<String, VecDeque<TransientKind>>>,
        calls: Mutex<Vec<String>>,
        hang: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn fail(self, endpoint: &str, kinds: Vec<TransientKind>) -> Self {
            self.failures
                .lock()
                .unwrap()
                .insert(endpoint.to_string(), kinds.into());
            self
        }

        fn hang_on(self, endpoint: &str) -> Self {
            self.hang.lock().unwrap().push(endpoint.to_string());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn respond(
            &self,
            endpoint: &Endpoint,
            texts: &[&str],
        ) -> Result<Vec<Value>, TransientError> {
            let key = endpoint.to_string();
            self.calls.lock().unwrap().push(key.clone());

            let hangs = self.hang.lock().unwrap().contains(&key);
            if hangs {
                std::future::pending::<()>().await;
            }

            let scripted = self
                .failures
                .lock()
                .unwrap()
                .get_mut(&key)
                .and_then(VecDeque::pop_front);
            match scripted {
                Some(kind) => Err(TransientError::new(key, kind)),
                None => Ok(texts
                    .iter()
                    .map(|t| json!({"text": t, "endpoint": key}))
                    .collect()),
            }
        }
    }

    impl WorkerTransport for ScriptedTransport {
        async fn process(
            &self,
            endpoint: &Endpoint,
            _language: &str,
            text: &str,
        ) -> Result<Value, TransientError> {
            let mut values = self.respond(endpoint, &[text]).await?;
            Ok(values.remove(0))
        }

        async fn batch_process(
            &self,
            endpoint: &Endpoint,
            _language: &str,
            texts: &[&str],
        ) -> Result<Vec<Value>, TransientError> {
            self.respond(endpoint, texts).await
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            failover_attempts: 1,
            request_timeout: Duration::from_millis(200),
        }
    }

    fn setup(
        transport: ScriptedTransport,
        urls: &[&str],
    ) -> (Dispatcher<ScriptedTransport>, Arc<ScriptedTransport>, Arc<EndpointRegistry>, Vec<Endpoint>) {
        let endpoints: Vec<Endpoint> = urls.iter().map(|u| Endpoint::parse(u).unwrap()).collect();
        let registry = Arc::new(EndpointRegistry::new(endpoints.clone()));
        let transport = Arc::new(transport);
        let dispatcher = Dispatcher::new(transport.clone(), registry.clone(), policy());
        (dispatcher, transport, registry, endpoints)
    }

    fn chunk(endpoint: &Endpoint, n: usize) -> Chunk {
        Chunk::new(
            0,
            WorkItem::from_texts((0..n).map(|i| format!("t{}", i))),
            endpoint.clone(),
        )
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_millis(500),
            ..policy()
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_worst_case_covers_all_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            failover_attempts: 1,
            request_timeout: Duration::from_secs(10),
        };
        // 4 次超时 + 0.5s + 1s 退避
        assert_eq!(policy.worst_case(), Duration::from_millis(41_500));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let (dispatcher, transport, registry, endpoints) =
            setup(ScriptedTransport::default(), &["http://a:1", "http://b:1"]);

        let outcome = dispatcher.send(chunk(&endpoints[0], 3), "en").await;

        assert!(outcome.is_success());
        assert_eq!(outcome.report.state, ChunkState::Succeeded);
        assert_eq!(outcome.report.retries, 0);
        assert_eq!(outcome.result.unwrap().len(), 3);
        assert_eq!(transport.calls(), vec!["a:1"]);
        assert!(registry.is_healthy(&endpoints[0]));
    }

    #[tokio::test]
    async fn test_two_failures_then_success_records_two_retries() {
        let transport = ScriptedTransport::default().fail(
            "a:1",
            vec![TransientKind::Status(500), TransientKind::Timeout],
        );
        let (dispatcher, transport, registry, endpoints) =
            setup(transport, &["http://a:1", "http://b:1"]);

        let outcome = dispatcher.send(chunk(&endpoints[0], 2), "en").await;

        assert!(outcome.is_success());
        assert_eq!(outcome.report.retries, 2);
        assert!(!outcome.report.failed_over);
        assert_eq!(outcome.report.attempts.len(), 3);
        assert_eq!(outcome.chunk.endpoint, endpoints[0]);
        assert_eq!(transport.calls(), vec!["a:1", "a:1", "a:1"]);
        // 最后一次成功后恢复健康
        assert!(registry.is_healthy(&endpoints[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_waits_backoff_between_retries() {
        let transport = ScriptedTransport::default().fail(
            "a:1",
            vec![TransientKind::Status(503), TransientKind::Status(503)],
        );
        let endpoints: Vec<Endpoint> = ["http://a:1", "http://b:1"]
            .iter()
            .map(|u| Endpoint::parse(u).unwrap())
            .collect();
        let registry = Arc::new(EndpointRegistry::new(endpoints.clone()));
        let base = Duration::from_millis(500);
        let dispatcher = Dispatcher::new(
            Arc::new(transport),
            registry,
            RetryPolicy {
                backoff_base: base,
                ..policy()
            },
        );

        let started = tokio::time::Instant::now();
        let outcome = dispatcher.send(chunk(&endpoints[0], 2), "en").await;
        let elapsed = started.elapsed();

        assert!(outcome.is_success());
        assert_eq!(outcome.report.retries, 2);
        // 0.5s + 1s
        assert!(elapsed >= base * 3, "elapsed {:?}", elapsed);
        assert!(elapsed < base * 4, "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_over_once() {
        let transport = ScriptedTransport::default().fail(
            "a:1",
            vec![TransientKind::Status(503); 3],
        );
        let (dispatcher, transport, registry, endpoints) =
            setup(transport, &["http://a:1", "http://b:1"]);

        let outcome = dispatcher.send(chunk(&endpoints[0], 4), "en").await;

        assert!(outcome.is_success());
        assert!(outcome.report.failed_over);
        assert_eq!(outcome.report.retries, 2);
        assert_eq!(outcome.report.endpoint, "b:1");
        assert_eq!(transport.calls(), vec!["a:1", "a:1", "a:1", "b:1"]);
        assert!(!registry.is_healthy(&endpoints[0]));

        let values = outcome.result.unwrap();
        assert_eq!(values[0]["endpoint"], "b:1");
    }

    #[tokio::test]
    async fn test_failover_failure_is_terminal() {
        let transport = ScriptedTransport::default()
            .fail("a:1", vec![TransientKind::Status(500); 3])
            .fail("b:1", vec![TransientKind::Connect("refused".into())]);
        let (dispatcher, transport, _registry, endpoints) =
            setup(transport, &["http://a:1", "http://b:1", "http://c:1"]);

        let outcome = dispatcher.send(chunk(&endpoints[0], 2), "en").await;

        assert_eq!(outcome.report.state, ChunkState::Failed);
        // 故障转移只尝试一次，不会继续换到 c
        assert_eq!(transport.calls(), vec!["a:1", "a:1", "a:1", "b:1"]);

        let failure = outcome.result.unwrap_err();
        assert_eq!(failure.indices, vec![0, 1]);
        assert_eq!(failure.endpoint, "b:1");
        assert_eq!(failure.attempts, 4);
        let last = failure.last_error.unwrap();
        assert_eq!(last.attempt, 1);
        assert!(matches!(last.kind, TransientKind::Connect(_)));
    }

    #[tokio::test]
    async fn test_no_alternate_endpoint_fails() {
        let transport =
            ScriptedTransport::default().fail("a:1", vec![TransientKind::Status(500); 3]);
        let (dispatcher, transport, _registry, endpoints) = setup(transport, &["http://a:1"]);

        let outcome = dispatcher.send(chunk(&endpoints[0], 1), "en").await;

        assert!(!outcome.is_success());
        assert!(!outcome.report.failed_over);
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_failover_skips_unhealthy_endpoints() {
        let transport =
            ScriptedTransport::default().fail("a:1", vec![TransientKind::Status(500); 3]);
        let (dispatcher, transport, registry, endpoints) =
            setup(transport, &["http://a:1", "http://b:1", "http://c:1"]);
        registry.mark_unhealthy(&endpoints[1]);

        let outcome = dispatcher.send(chunk(&endpoints[0], 2), "en").await;

        assert!(outcome.is_success());
        assert_eq!(outcome.chunk.endpoint, endpoints[2]);
        assert_eq!(transport.calls().last().unwrap(), "c:1");
    }

    #[tokio::test]
    async fn test_hanging_endpoint_times_out_per_attempt() {
        let transport = ScriptedTransport::default().hang_on("a:1");
        let (dispatcher, _transport, _registry, endpoints) =
            setup(transport, &["http://a:1", "http://b:1"]);

        let outcome = dispatcher.send(chunk(&endpoints[0], 2), "en").await;

        assert!(outcome.is_success());
        assert!(outcome.report.failed_over);
        let timeouts = outcome
            .report
            .attempts
            .iter()
            .filter(|a| matches!(a.error.as_ref().map(|e| &e.kind), Some(TransientKind::Timeout)))
            .count();
        assert_eq!(timeouts, 3);
    }

    /// 返回条数不对的节点
    struct ShortTransport;

    impl WorkerTransport for ShortTransport {
        async fn process(
            &self,
            _endpoint: &Endpoint,
            _language: &str,
            _text: &str,
        ) -> Result<Value, TransientError> {
            Ok(json!({}))
        }

        async fn batch_process(
            &self,
            _endpoint: &Endpoint,
            _language: &str,
            _texts: &[&str],
        ) -> Result<Vec<Value>, TransientError> {
            Ok(vec![json!({})])
        }
    }

    #[tokio::test]
    async fn test_length_mismatch_is_retried() {
        let endpoint = Endpoint::parse("http://a:1").unwrap();
        let registry = Arc::new(EndpointRegistry::new(vec![endpoint.clone()]));
        let dispatcher = Dispatcher::new(Arc::new(ShortTransport), registry, policy());

        let outcome = dispatcher.send(chunk(&endpoint, 3), "en").await;

        let failure = outcome.result.unwrap_err();
        assert_eq!(
            failure.last_error.unwrap().kind,
            TransientKind::LengthMismatch {
                expected: 3,
                actual: 1
            }
        );
        assert_eq!(outcome.report.attempts.len(), 3);
    }
}
