//! Reasoning-service seam: one trait, one production adapter, one retry loop.
//!
//! Both passes (page extraction and candidate classification) talk to the
//! service through [`ServiceClient`], which owns the retry/backoff policy,
//! the per-call timeout and the global in-flight limit. The extractor and
//! classifier only build requests and parse text.
//!
//! ## Retry Strategy
//!
//! Transient failures (429, 5xx, connection resets) are retried with
//! exponential backoff (`retry_backoff_ms * 2^(attempt-1)`): with the
//! 500 ms default and 3 retries the waits are 500 ms → 1 s → 2 s.
//! Rejected requests and timeouts are returned immediately: a timed-out
//! call is handled by the caller exactly like an unusable response.

use crate::config::AnalysisConfig;
use crate::error::ServiceError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// One request to the reasoning service.
#[derive(Clone)]
pub struct ServiceRequest {
    /// Optional system message.
    pub system: Option<String>,
    /// User instruction text.
    pub prompt: String,
    /// Page image for vision requests.
    pub image: Option<ImageData>,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl fmt::Debug for ServiceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRequest")
            .field("system", &self.system)
            .field("prompt_len", &self.prompt.len())
            .field("image", &self.image.as_ref().map(|i| i.data.len()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// A chat-completion backend able to read images.
///
/// Implemented by [`LlmService`] for real providers and by scripted stubs in
/// tests. Returns the raw response text; parsing is the caller's job.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(&self, request: &ServiceRequest) -> Result<String, ServiceError>;
}

/// [`ReasoningService`] backed by an `edgequake_llm` provider.
pub struct LlmService {
    provider: Arc<dyn LLMProvider>,
}

impl LlmService {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

/// Build the chat transcript for a request.
///
/// Layout: optional system message, then one user turn carrying the prompt
/// and (for vision requests) the page image.
fn build_messages(request: &ServiceRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(ref system) = request.system {
        messages.push(ChatMessage::system(system.as_str()));
    }
    match request.image {
        Some(ref image) => messages.push(ChatMessage::user_with_images(
            request.prompt.as_str(),
            vec![image.clone()],
        )),
        None => messages.push(ChatMessage::user(request.prompt.as_str())),
    }
    messages
}

fn build_options(request: &ServiceRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: Some(request.max_tokens),
        ..Default::default()
    }
}

#[async_trait]
impl ReasoningService for LlmService {
    async fn complete(&self, request: &ServiceRequest) -> Result<String, ServiceError> {
        let messages = build_messages(request);
        let options = build_options(request);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(ServiceError::from)?;

        debug!(
            "{} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Upper bound on a single backoff wait.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Retry and timeout settings for service calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Delay before `attempt` (1-based retry number), capped at
    /// [`MAX_RETRY_DELAY`].
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff
            .checked_mul(factor)
            .map_or(MAX_RETRY_DELAY, |d| d.min(MAX_RETRY_DELAY))
    }
}

/// Shared handle to the reasoning service used by both passes.
///
/// Cloning is cheap; clones share the in-flight limit.
#[derive(Clone)]
pub struct ServiceClient {
    service: Arc<dyn ReasoningService>,
    permits: Arc<Semaphore>,
    policy: RetryPolicy,
}

impl ServiceClient {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        concurrency: usize,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `request`, retrying transient failures.
    ///
    /// `label` identifies the call in log lines ("page 3 of report.pdf").
    /// A permit is held only while a call is in flight, not during backoff.
    pub async fn call(
        &self,
        request: &ServiceRequest,
        label: &str,
    ) -> Result<String, ServiceError> {
        let mut last_err: Option<ServiceError> = None;

        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                let backoff = self.policy.delay(attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    label,
                    attempt,
                    self.policy.max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }

            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| ServiceError::Rejected("service client shut down".into()))?;

            match timeout(self.policy.call_timeout, self.service.complete(request)).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) if e.is_retryable() => {
                    warn!("{}: attempt {} failed — {}", label, attempt + 1, e);
                    last_err = Some(e);
                }
                Ok(Err(e)) => {
                    warn!("{}: request rejected — {}", label, e);
                    return Err(e);
                }
                Err(_) => {
                    let secs = self.policy.call_timeout.as_secs().max(1);
                    warn!("{}: timed out after {}s", label, secs);
                    return Err(ServiceError::Timeout { secs });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ServiceError::Transient("unknown error".into())))
    }
}
