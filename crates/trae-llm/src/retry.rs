//! Retry decorator for model gateways
//!
//! Wraps any [`ModelGateway`], bounding every attempt with a timeout and
//! retrying retryable failures with capped exponential backoff plus a
//! uniform jitter of at most 10% either way.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{LlmError, ModelError, ModelErrorKind};
use crate::gateway::{ModelGateway, ModelSettings};
use crate::message::{Message, ToolDefinition};
use crate::metrics::{MetricsSink, NoopMetrics};

/// Default bound on a single model call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Fraction of the backoff delay used as jitter amplitude
const JITTER_RATIO: f64 = 0.1;

/// Backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// `min(max_delay, base_delay * multiplier^attempt)`, attempt is zero-based
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let raw = self.base_delay.as_secs_f64() * exp;
        let capped = raw.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Backoff with a uniform jitter in [-10%, +10%] of the capped delay
    pub fn jittered_backoff<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.backoff(attempt).as_secs_f64();
        let factor = 1.0 + rng.gen_range(-JITTER_RATIO..=JITTER_RATIO);
        Duration::from_secs_f64((delay * factor).max(0.0))
    }
}

/// Decides whether a failed attempt may be repeated
pub type RetryCondition = Arc<dyn Fn(&LlmError) -> bool + Send + Sync>;
/// Called before waiting: (attempt about to be retried, error)
pub type BeforeRetry = Arc<dyn Fn(u32, &LlmError) + Send + Sync>;
/// Called after waiting: (attempt, error, delay waited)
pub type AfterRetry = Arc<dyn Fn(u32, &LlmError, Duration) + Send + Sync>;

/// Default classifier: only plain backend failures with a transient kind
pub fn is_retryable(err: &LlmError) -> bool {
    match err {
        LlmError::Model(e) => e.is_retryable(),
        _ => false,
    }
}

/// Gateway decorator adding timeouts, retries and backoff
pub struct RetryingGateway<G> {
    inner: G,
    config: RetryConfig,
    call_timeout: Duration,
    condition: RetryCondition,
    before_retry: Option<BeforeRetry>,
    after_retry: Option<AfterRetry>,
    metrics: Arc<dyn MetricsSink>,
}

impl<G: ModelGateway> RetryingGateway<G> {
    pub fn new(inner: G, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            condition: Arc::new(is_retryable),
            before_retry: None,
            after_retry: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Replace the default retryability classifier
    pub fn with_retry_condition(mut self, condition: impl Fn(&LlmError) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Arc::new(condition);
        self
    }

    pub fn on_before_retry(mut self, callback: impl Fn(u32, &LlmError) + Send + Sync + 'static) -> Self {
        self.before_retry = Some(Arc::new(callback));
        self
    }

    pub fn on_after_retry(mut self, callback: impl Fn(u32, &LlmError, Duration) + Send + Sync + 'static) -> Self {
        self.after_retry = Some(Arc::new(callback));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    async fn attempt(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        settings: &dyn ModelSettings,
        cancel: &CancellationToken,
    ) -> Result<Message, LlmError> {
        match tokio::time::timeout(self.call_timeout, self.inner.chat(messages, tools, settings, cancel)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::new(
                ModelErrorKind::TransientNetwork,
                format!("model call timed out after {}s", self.call_timeout.as_secs_f64()),
            )
            .into()),
        }
    }
}

impl<G> std::fmt::Debug for RetryingGateway<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingGateway")
            .field("config", &self.config)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

#[async_trait]
impl<G: ModelGateway> ModelGateway for RetryingGateway<G> {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    fn supports_tool_calling(&self) -> bool {
        self.inner.supports_tool_calling()
    }

    #[instrument(skip_all, fields(provider = %self.inner.provider(), model = %settings.model()))]
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        settings: &dyn ModelSettings,
        cancel: &CancellationToken,
    ) -> Result<Message, LlmError> {
        let mut attempt: u32 = 0;

        loop {
            self.metrics.increment("llm.attempts", 1);

            let err = match self.attempt(messages, tools, settings, cancel).await {
                Ok(message) => {
                    if attempt > 0 {
                        debug!(attempt, "Model call succeeded after retry");
                    }
                    return Ok(message);
                }
                Err(e) => e,
            };

            if err.is_cancelled() {
                return Err(err);
            }

            if !(self.condition)(&err) {
                self.metrics.increment("llm.non_retryable", 1);
                warn!(error = %err, "Model call failed with non-retryable error");
                return Err(LlmError::NonRetryable(Box::new(err)));
            }

            if attempt >= self.config.max_retries {
                self.metrics.increment("llm.retries_exhausted", 1);
                warn!(attempts = attempt + 1, error = %err, "Model call retries exhausted");
                return Err(LlmError::RetryExhausted {
                    attempts: attempt + 1,
                    last: Box::new(err),
                });
            }

            let delay = self.config.jittered_backoff(attempt, &mut rand::thread_rng());
            let next = attempt + 1;

            if let Some(ref cb) = self.before_retry {
                cb(next, &err);
            }
            warn!(
                provider = %self.inner.provider(),
                attempt = next,
                max_attempts = self.config.max_retries + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying model call"
            );
            self.metrics.increment("llm.retries", 1);

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Cancelled during retry backoff");
                    return Err(LlmError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if let Some(ref cb) = self.after_retry {
                cb(next, &err, delay);
            }
            attempt = next;
        }
    }
}
