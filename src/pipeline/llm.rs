//! Vision-model interaction: the model seam, the edgequake-llm backend, and
//! the retry loop shared by every backend.
//!
//! The rest of the pipeline only ever sees [`VisionModel::invoke_model`]:
//! document in, raw text out. Everything provider-specific (rasterising PDFs,
//! building multimodal messages, classifying provider errors) stays in
//! [`LlmVisionModel`], and retry policy stays in [`invoke_with_retry`], so a
//! test double never has to reimplement either.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient and frequent when several documents
//! run at once. Retry `k` waits `min(base · 2^(k-1), max)` scaled by a random
//! factor, so concurrent documents that hit a rate limit together do not
//! retry in lock-step. Permanent errors are never retried.

use crate::config::{ExtractionConfig, RetryPolicy};
use crate::error::{DocumentError, InvoiceError, ModelError};
use crate::pipeline::encode::{encode_image_bytes, encode_page};
use crate::pipeline::input::{ContentKind, DocumentPayload};
use crate::pipeline::render::render_pdf_pages;
use crate::prompts::SYSTEM_INSTRUCTION;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// A vision model that turns one document into raw response text.
///
/// Implementations report failures as [`ModelError::Transient`] (worth
/// retrying) or [`ModelError::Permanent`]. They must not retry internally;
/// [`invoke_with_retry`] owns the schedule.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn invoke_model(&self, payload: &DocumentPayload, prompt: &str) -> Result<String, ModelError>;
}

/// Successful model output plus the retries it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    pub retries: u32,
}

/// Call `model` until it succeeds, fails permanently, or the policy runs out.
///
/// Each attempt is bounded by `call_timeout`; a timeout counts as a
/// transient failure. No lock is held across the backoff sleep.
///
/// # Errors
/// * [`DocumentError::ModelRejected`] — the first permanent error.
/// * [`DocumentError::ModelFailed`] — transient errors on every attempt.
pub async fn invoke_with_retry(
    model: &dyn VisionModel,
    payload: &DocumentPayload,
    prompt: &str,
    policy: &RetryPolicy,
    call_timeout: Duration,
) -> Result<ModelReply, DocumentError> {
    let name = payload.name();
    let attempts = policy.max_attempts.max(1);
    let mut last_err = String::new();

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = policy.backoff(attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                name,
                attempt,
                attempts - 1,
                delay.as_millis()
            );
            sleep(delay).await;
        }

        let outcome = match timeout(call_timeout, model.invoke_model(payload, prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Transient(format!(
                "no response within {}s",
                call_timeout.as_secs_f32()
            ))),
        };

        match outcome {
            Ok(text) => {
                return Ok(ModelReply {
                    text,
                    retries: attempt,
                })
            }
            Err(ModelError::Permanent(detail)) => {
                warn!("{}: model rejected the request: {}", name, detail);
                return Err(DocumentError::ModelRejected {
                    document: name.to_string(),
                    detail,
                });
            }
            Err(ModelError::Transient(detail)) => {
                warn!("{}: attempt {} failed: {}", name, attempt + 1, detail);
                last_err = detail;
            }
        }
    }

    Err(DocumentError::ModelFailed {
        document: name.to_string(),
        retries: attempts - 1,
        detail: last_err,
    })
}

// ── Provider error classification ────────────────────────────────────────

static RE_TRANSIENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(429|5\d\d)\b|rate.?limit|too many requests|timed?.?out|overloaded|unavailable|bad gateway|temporar|connection (reset|refused|closed|error)|broken pipe",
    )
    .unwrap()
});

/// Classify a provider error by its message.
pub fn classify_provider_error(message: &str) -> ModelError {
    if RE_TRANSIENT.is_match(message) {
        ModelError::Transient(message.to_string())
    } else {
        ModelError::Permanent(message.to_string())
    }
}

// ── edgequake-llm backend ────────────────────────────────────────────────

/// [`VisionModel`] backed by any `edgequake_llm` provider.
///
/// PDFs are rasterised page by page and sent as one multi-image request;
/// image files are sent as a single image. The extraction prompt rides in
/// the user turn alongside the images.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_rendered_pixels: u32,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_rendered_pixels: config.max_rendered_pixels,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    async fn images(&self, payload: &DocumentPayload) -> Result<Vec<ImageData>, ModelError> {
        match payload.kind() {
            ContentKind::Image => encode_image_bytes(&payload.bytes, &payload.mime_type)
                .map(|img| vec![img])
                .map_err(|e| ModelError::Permanent(format!("cannot encode image: {e}"))),
            ContentKind::Document => {
                let pages = render_pdf_pages(payload.bytes.clone(), self.max_rendered_pixels)
                    .await
                    .map_err(ModelError::Permanent)?;
                pages
                    .iter()
                    .map(encode_page)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ModelError::Permanent(format!("cannot encode page: {e}")))
            }
        }
    }
}

impl fmt::Debug for LlmVisionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmVisionModel")
            .field("provider", &"<dyn LLMProvider>")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .finish()
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    async fn invoke_model(&self, payload: &DocumentPayload, prompt: &str) -> Result<String, ModelError> {
        let start = Instant::now();
        let images = self.images(payload).await?;
        let image_count = images.len();

        let messages = vec![
            ChatMessage::system(SYSTEM_INSTRUCTION),
            ChatMessage::user_with_images(prompt, images),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        debug!(
            "{}: {} image(s), {} input tokens, {} output tokens, {:?}",
            payload.name(),
            image_count,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Default vision model for a named provider.
pub fn default_model_for(provider: &str) -> &'static str {
    match provider.to_ascii_lowercase().as_str() {
        "anthropic" | "claude" => "claude-3-7-sonnet-20250219",
        "gemini" | "google" | "vertexai" => "gemini-2.0-flash",
        _ => "gpt-4.1-mini",
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InvoiceError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the provider, from most-specific to least-specific:
///
/// 1. `provider_name` (+ `model`, or the provider's default model)
/// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
/// 3. OpenAI, when `OPENAI_API_KEY` is set
/// 4. whatever `ProviderFactory::from_env` detects
fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(default_model_for(name));
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(default_model_for("openai"));
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| InvoiceError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be detected from the environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(llm_provider)
}

/// The model the batch will call: the injected client, or an
/// [`LlmVisionModel`] over the resolved provider.
pub fn resolve_model(config: &ExtractionConfig) -> Result<Arc<dyn VisionModel>, InvoiceError> {
    if let Some(ref client) = config.model_client {
        return Ok(Arc::clone(client));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmVisionModel::new(provider, config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::input::SourceDocument;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<Result<String, ModelError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, ModelError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl VisionModel for Scripted {
        async fn invoke_model(&self, _: &DocumentPayload, _: &str) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(ModelError::Permanent("script exhausted".into())))
        }
    }

    struct Slow;

    #[async_trait]
    impl VisionModel for Slow {
        async fn invoke_model(&self, _: &DocumentPayload, _: &str) -> Result<String, ModelError> {
            sleep(Duration::from_secs(5)).await;
            Ok("{}".into())
        }
    }

    fn payload() -> DocumentPayload {
        let source = SourceDocument::from_path("inv.png").unwrap();
        DocumentPayload::new(source, vec![], "image/png")
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
        }
    }

    const T: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn transient_then_success_counts_retries() {
        let model = Scripted::new(vec![
            Err(ModelError::Transient("429".into())),
            Err(ModelError::Transient("503".into())),
            Ok("{\"product\": []}".into()),
        ]);
        let reply = invoke_with_retry(&model, &payload(), "p", &fast_policy(3), T)
            .await
            .unwrap();
        assert_eq!(reply.retries, 2);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let model = Scripted::new(vec![Err(ModelError::Permanent("401".into()))]);
        let err = invoke_with_retry(&model, &payload(), "p", &fast_policy(3), T)
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::ModelRejected { .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_model_failed() {
        let model = Scripted::new(vec![
            Err(ModelError::Transient("timeout".into())),
            Err(ModelError::Transient("timeout".into())),
        ]);
        let err = invoke_with_retry(&model, &payload(), "p", &fast_policy(2), T)
            .await
            .unwrap_err();
        match err {
            DocumentError::ModelFailed { retries, document, .. } => {
                assert_eq!(retries, 1);
                assert_eq!(document, "inv.png");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn call_timeout_is_transient() {
        let err = invoke_with_retry(
            &Slow,
            &payload(),
            "p",
            &fast_policy(2),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DocumentError::ModelFailed { retries: 1, .. }));
    }

    #[test]
    fn provider_errors_are_classified() {
        for msg in [
            "HTTP 429 Too Many Requests",
            "rate limit exceeded",
            "request timed out",
            "502 Bad Gateway",
            "Service Unavailable",
            "connection reset by peer",
            "model is overloaded",
        ] {
            assert!(classify_provider_error(msg).is_retryable(), "{msg}");
        }
        for msg in [
            "401 Unauthorized: invalid api key",
            "400 Bad Request: image too large",
            "model not found",
        ] {
            assert!(!classify_provider_error(msg).is_retryable(), "{msg}");
        }
    }

    #[test]
    fn default_models() {
        assert_eq!(default_model_for("Anthropic"), "claude-3-7-sonnet-20250219");
        assert_eq!(default_model_for("gemini"), "gemini-2.0-flash");
        assert_eq!(default_model_for("openai"), "gpt-4.1-mini");
    }

    #[test]
    fn injected_client_wins() {
        let client: Arc<dyn VisionModel> = Arc::new(Slow);
        let config = ExtractionConfig::builder()
            .model_client(Arc::clone(&client))
            .build()
            .unwrap();
        let resolved = resolve_model(&config).unwrap();
        assert!(Arc::ptr_eq(&resolved, &client));
    }
}
