//! Configuration types for invoice extraction.
//!
//! All batch behaviour is controlled through [`ExtractionConfig`], built via
//! its [`ExtractionConfigBuilder`]. The business rules that shape rows
//! (placeholder products, accepted date formats, markup rate) live in
//! [`RowRules`] and the retry schedule in [`RetryPolicy`]; both are plain
//! values handed to the pipeline stages, so a test or a one-off run can
//! override them without touching any global state.

use crate::error::InvoiceError;
use crate::pipeline::llm::VisionModel;
use crate::progress::ProgressCallback;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a batch extraction run.
///
/// # Example
/// ```rust
/// use invoice_extract::ExtractionConfig;
/// use rust_decimal::Decimal;
///
/// let config = ExtractionConfig::builder()
///     .concurrency(8)
///     .markup_rate(Decimal::new(30, 2))
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.rules.markup_rate, Decimal::new(30, 2));
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Number of documents processed at once. Default: 4.
    ///
    /// Each document is one model call; they share nothing but the final
    /// merge, so this only bounds how hard the provider is hit.
    pub concurrency: usize,

    /// Model identifier, e.g. "gpt-4.1-mini", "claude-3-7-sonnet-20250219".
    /// If None, a per-provider default is used.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "gemini").
    /// If None along with `model_client`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed model client. Takes precedence over `provider_name`.
    pub model_client: Option<Arc<dyn VisionModel>>,

    /// Sampling temperature. Default: 0.0 (extraction, not generation).
    pub temperature: f32,

    /// Maximum tokens the model may generate per document. Default: 8192.
    pub max_tokens: usize,

    /// Retry schedule for transient model failures.
    pub retry: RetryPolicy,

    /// Per-call timeout in seconds; a timeout counts as a transient failure. Default: 120.
    pub api_timeout_secs: u64,

    /// Row filtering, coercion and pricing rules.
    pub rules: RowRules,

    /// Upper bound on rows taken from one response. Default: None (unbounded).
    pub max_rows: Option<usize>,

    /// Custom extraction prompt. If None, uses [`crate::prompts::DEFAULT_EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// Longest edge, in pixels, of each rasterised PDF page. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            model: None,
            provider_name: None,
            model_client: None,
            temperature: 0.0,
            max_tokens: 8192,
            retry: RetryPolicy::default(),
            api_timeout_secs: 120,
            rules: RowRules::default(),
            max_rows: None,
            prompt: None,
            max_rendered_pixels: 2000,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field(
                "model_client",
                &self.model_client.as_ref().map(|_| "<dyn VisionModel>"),
            )
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("retry", &self.retry)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("rules", &self.rules)
            .field("max_rows", &self.max_rows)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
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

    pub fn model_client(mut self, client: Arc<dyn VisionModel>) -> Self {
        self.config.model_client = Some(client);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn rules(mut self, rules: RowRules) -> Self {
        self.config.rules = rules;
        self
    }

    pub fn markup_rate(mut self, rate: Decimal) -> Self {
        self.config.rules.markup_rate = rate;
        self
    }

    pub fn placeholders<I, S>(mut self, placeholders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.rules.placeholders = placeholders.into_iter().map(Into::into).collect();
        self
    }

    pub fn date_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.rules.date_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_rows(mut self, n: usize) -> Self {
        self.config.max_rows = Some(n);
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, InvoiceError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(InvoiceError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.retry.max_attempts == 0 {
            return Err(InvoiceError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.rules.markup_rate.is_sign_negative() {
            return Err(InvoiceError::InvalidConfig(format!(
                "Markup rate must not be negative, got {}",
                c.rules.markup_rate
            )));
        }
        if c.rules.date_formats.is_empty() {
            return Err(InvoiceError::InvalidConfig(
                "At least one date format is required".into(),
            ));
        }
        if c.max_rows == Some(0) {
            return Err(InvoiceError::InvalidConfig("max_rows must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Row rules ────────────────────────────────────────────────────────────

/// Business rules applied by the validator and the pricing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRules {
    /// Product strings that mark a row as extraction noise.
    /// Compared trimmed and case-insensitively.
    pub placeholders: Vec<String>,

    /// chrono `strftime` patterns tried in order. Day-first patterns come
    /// before month-first ones, matching UK-style invoices.
    pub date_formats: Vec<String>,

    /// Fractional markup applied to unit price. Default: 0.25.
    pub markup_rate: Decimal,
}

impl Default for RowRules {
    fn default() -> Self {
        Self {
            placeholders: [
                "N/A", "NA", "-", "--", "—", "TBD", "null", "none", "unknown", "?",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            date_formats: [
                "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y/%m/%d", "%d %b %Y",
                "%d %B %Y", "%b %d, %Y", "%B %d, %Y", "%d/%m/%y",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            markup_rate: Decimal::new(25, 2),
        }
    }
}

impl RowRules {
    /// True if `product` (already trimmed) is one of the placeholders.
    pub fn is_placeholder(&self, product: &str) -> bool {
        self.placeholders
            .iter()
            .any(|p| p.trim().eq_ignore_ascii_case(product))
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────

/// Exponential backoff schedule shared by every model backend.
///
/// Retry `k` (1-based) waits `min(base_delay_ms · 2^(k-1), max_delay_ms)`,
/// scaled by a random factor in `[0.5, 1.0]` when `jitter` is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Default: 3.
    pub max_attempts: u32,
    /// Delay before the first retry. Default: 1000 ms.
    pub base_delay_ms: u64,
    /// Cap on any single delay. Default: 30 s.
    pub max_delay_ms: u64,
    /// Spread concurrent retries apart. Default: true.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once and never sleeps.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }

    /// Un-jittered delay before retry `retry` (1-based).
    pub fn base_backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Delay before retry `retry` (1-based), jitter applied.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_backoff(retry);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        base.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.retry.max_attempts, 3);
        assert_eq!(c.rules.markup_rate, dec!(0.25));
        assert!(c.max_rows.is_none());
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        let err = ExtractionConfig::builder().max_attempts(0).build();
        assert!(matches!(err, Err(InvoiceError::InvalidConfig(_))));
    }

    #[test]
    fn builder_rejects_negative_markup() {
        let err = ExtractionConfig::builder().markup_rate(dec!(-0.1)).build();
        assert!(matches!(err, Err(InvoiceError::InvalidConfig(_))));
    }

    #[test]
    fn builder_clamps_concurrency() {
        let c = ExtractionConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn placeholder_match_is_case_insensitive() {
        let rules = RowRules::default();
        assert!(rules.is_placeholder("n/a"));
        assert!(rules.is_placeholder("TBD"));
        assert!(!rules.is_placeholder("Widget"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 500,
            max_delay_ms: 3000,
            jitter: false,
        };
        assert_eq!(p.base_backoff(1), Duration::from_millis(500));
        assert_eq!(p.base_backoff(2), Duration::from_millis(1000));
        assert_eq!(p.base_backoff(3), Duration::from_millis(2000));
        assert_eq!(p.base_backoff(4), Duration::from_millis(3000));
        assert_eq!(p.backoff(9), Duration::from_millis(3000));
    }

    #[test]
    fn jitter_stays_within_half_to_full() {
        let p = RetryPolicy {
            jitter: true,
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let d = p.backoff(2);
            assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(2000));
        }
    }
}
