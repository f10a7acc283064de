//! Configuration types for defect analysis.
//!
//! All analysis behaviour is controlled through [`AnalysisConfig`], built via
//! its [`AnalysisConfigBuilder`]. One struct holds every knob so a config can
//! be shared across tasks, logged, and compared between runs.

use crate::error::InspectError;
use crate::pipeline::llm::ReasoningService;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Model used when neither the caller nor the environment picks one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for an analysis run.
///
/// Built via [`AnalysisConfig::builder()`] or [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_defects::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .concurrency(4)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Linear scale applied to native page units when rasterising. Default: 4.0.
    ///
    /// PDF pages are measured in points (1/72 in). A factor of 4 renders at
    /// roughly 300 DPI, enough for the vision model to read small print in
    /// scanned defect tables.
    pub render_scale: f32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 4096.
    ///
    /// A4 and Letter pages stay below this at 4×; the cap only bites on
    /// oversized drawings or posters attached to a report.
    pub max_rendered_pixels: u32,

    /// Maximum number of reasoning-service calls in flight. Default: 1.
    ///
    /// 1 processes pages and candidates strictly one after another. Higher
    /// values overlap calls; output order is unaffected.
    pub concurrency: usize,

    /// LLM model identifier. If None, [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    /// If None along with `provider`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed reasoning service. Takes precedence over `provider`.
    pub service: Option<Arc<dyn ReasoningService>>,

    /// Sampling temperature for page extraction. Default: 0.1.
    pub extraction_temperature: f32,

    /// Sampling temperature for classification. Default: 0.3.
    pub classification_temperature: f32,

    /// Maximum tokens generated per page extraction. Default: 2500.
    ///
    /// A dense defect table can list 30+ entries; each costs 40–80 tokens
    /// of JSON.
    pub extraction_max_tokens: usize,

    /// Maximum tokens generated per classification. Default: 300.
    pub classification_max_tokens: usize,

    /// Maximum retry attempts on a transient service failure. Default: 3.
    ///
    /// Timeouts and rejected requests (bad key, 403) are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom extraction instructions. If None, uses the built-in prompt.
    pub extraction_prompt: Option<String>,

    /// Custom classification instructions. If None, uses the built-in prompt.
    pub classification_prompt: Option<String>,

    /// Observer for per-page and per-document progress.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            render_scale: 4.0,
            max_rendered_pixels: 4096,
            concurrency: 1,
            model: None,
            provider_name: None,
            provider: None,
            service: None,
            extraction_temperature: 0.1,
            classification_temperature: 0.3,
            extraction_max_tokens: 2500,
            classification_max_tokens: 300,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            password: None,
            extraction_prompt: None,
            classification_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("render_scale", &self.render_scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("service", &self.service.as_ref().map(|_| "<dyn ReasoningService>"))
            .field("extraction_temperature", &self.extraction_temperature)
            .field("classification_temperature", &self.classification_temperature)
            .field("extraction_max_tokens", &self.extraction_max_tokens)
            .field("classification_max_tokens", &self.classification_max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn AnalysisProgressCallback>"),
            )
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model name requests are made with.
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`AnalysisConfig`].
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl fmt::Debug for AnalysisConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl AnalysisConfigBuilder {
    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(1.0, 8.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn service(mut self, service: Arc<dyn ReasoningService>) -> Self {
        self.config.service = Some(service);
        self
    }

    pub fn extraction_temperature(mut self, t: f32) -> Self {
        self.config.extraction_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn classification_temperature(mut self, t: f32) -> Self {
        self.config.classification_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn extraction_max_tokens(mut self, n: usize) -> Self {
        self.config.extraction_max_tokens = n;
        self
    }

    pub fn classification_max_tokens(mut self, n: usize) -> Self {
        self.config.classification_max_tokens = n;
        self
    }

    /// Clamped to 0–10.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(10);
        self
    }

    /// Clamped to at most 60 000 ms.
    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms.min(60_000);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn classification_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.classification_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, InspectError> {
        let c = &self.config;
        if !(1.0..=8.0).contains(&c.render_scale) {
            return Err(InspectError::InvalidConfig(format!(
                "Render scale must be 1–8, got {}",
                c.render_scale
            )));
        }
        if c.concurrency == 0 {
            return Err(InspectError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.extraction_max_tokens == 0 || c.classification_max_tokens == 0 {
            return Err(InspectError::InvalidConfig(
                "Token limits must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(InspectError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = AnalysisConfig::default();
        assert_eq!(c.render_scale, 4.0);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.extraction_max_tokens, 2500);
        assert_eq!(c.classification_max_tokens, 300);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.model_or_default(), DEFAULT_MODEL);
    }

    #[test]
    fn builder_clamps_values() {
        let c = AnalysisConfig::builder()
            .render_scale(20.0)
            .concurrency(0)
            .max_rendered_pixels(3)
            .classification_temperature(9.0)
            .max_retries(u32::MAX)
            .retry_backoff_ms(u64::MAX)
            .build()
            .unwrap();
        assert_eq!(c.render_scale, 8.0);
        assert_eq!(c.max_retries, 10);
        assert_eq!(c.retry_backoff_ms, 60_000);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.max_rendered_pixels, 100);
        assert_eq!(c.classification_temperature, 2.0);
    }

    #[test]
    fn build_rejects_zero_tokens_and_timeout() {
        assert!(AnalysisConfig::builder().extraction_max_tokens(0).build().is_err());
        assert!(AnalysisConfig::builder().api_timeout_secs(0).build().is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let c = AnalysisConfig::builder().password("hunter2").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }
}
