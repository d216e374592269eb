//! Model adapter: the single capability the pipeline needs from a VLM.
//!
//! [`VisionModel::complete`] takes one page image plus the optional prior-page
//! Markdown and returns text with token counts. Anything implementing it can
//! drive a run; [`LlmVisionModel`] adapts any `edgequake_llm::LLMProvider`.
//!
//! ## Message Layout
//!
//! 1. **System message**: the transcription prompt (or caller override)
//! 2. **Format-continuity message** *(only with prior page)*: previous page Markdown
//! 3. **User message**: the page PNG as an image attachment with empty text

use crate::config::{ConversionConfig, ProviderOptions, DEFAULT_MODEL};
use crate::error::{ModelError, PagemarkError};
use crate::pipeline::encode::DEFAULT_IMAGE_DETAIL;
use crate::prompts::{maintain_format_context, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory, ProviderType,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Text and usage returned by one completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A vision model that transcribes one page image.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// The instruction prompt sent with every page.
    fn system_prompt(&self) -> &str;

    /// `detail` hint to attach to page images.
    fn image_detail(&self) -> &str {
        DEFAULT_IMAGE_DETAIL
    }

    /// Transcribe one page. `prior_page` is the previous page's Markdown in
    /// maintain-format mode and `None` otherwise.
    async fn complete(
        &self,
        image: ImageData,
        prior_page: Option<&str>,
    ) -> Result<Completion, ModelError>;
}

/// [`VisionModel`] backed by an `edgequake_llm` provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    image_detail: String,
}

impl LlmVisionModel {
    /// Wrap a provider. Passthrough options are validated here and nowhere else.
    ///
    /// Every key that `CompletionOptions` can carry is forwarded; the provider
    /// decides what the values mean. `image_detail` sets the attachment hint.
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        system_prompt: Option<String>,
        temperature: f32,
        max_tokens: usize,
        extra: &ProviderOptions,
    ) -> Result<Self, PagemarkError> {
        let mut options = CompletionOptions {
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
            ..Default::default()
        };
        let mut image_detail = DEFAULT_IMAGE_DETAIL.to_string();

        for (key, value) in extra {
            apply_option(&mut options, &mut image_detail, key, value).map_err(|reason| {
                PagemarkError::InvalidProviderOption {
                    key: key.clone(),
                    reason,
                }
            })?;
        }

        if system_prompt.is_some() {
            warn!("Custom system prompt set; it replaces the default transcription prompt");
        }

        Ok(Self {
            provider,
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options,
            image_detail,
        })
    }

    /// Build the adapter described by a run's config.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, PagemarkError> {
        let provider = resolve_provider(config)?;
        Self::new(
            provider,
            config.system_prompt.clone(),
            config.temperature,
            config.max_tokens,
            &config.provider_options,
        )
    }

    pub fn options(&self) -> &CompletionOptions {
        &self.options
    }
}

/// Keys accepted in [`ProviderOptions`].
pub const PROVIDER_OPTION_KEYS: &[&str] = &[
    "temperature",
    "max_tokens",
    "top_p",
    "stop",
    "frequency_penalty",
    "presence_penalty",
    "response_format",
    "image_detail",
];

fn apply_option(
    options: &mut CompletionOptions,
    image_detail: &mut String,
    key: &str,
    value: &Value,
) -> Result<(), String> {
    let number = || {
        value
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| "expected a number".to_string())
    };
    match key {
        "temperature" => options.temperature = Some(number()?),
        "top_p" => options.top_p = Some(number()?),
        "frequency_penalty" => options.frequency_penalty = Some(number()?),
        "presence_penalty" => options.presence_penalty = Some(number()?),
        "max_tokens" => {
            let n = value
                .as_u64()
                .ok_or_else(|| "expected a positive integer".to_string())?;
            options.max_tokens = Some(n as usize);
        }
        "stop" => {
            let stops = match value {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| "expected a string or a list of strings".to_string())?,
                _ => return Err("expected a string or a list of strings".into()),
            };
            options.stop = Some(stops);
        }
        "response_format" => {
            let f = value.as_str().ok_or_else(|| "expected a string".to_string())?;
            options.response_format = Some(f.to_string());
        }
        "image_detail" => {
            let d = value.as_str().ok_or_else(|| "expected a string".to_string())?;
            if !matches!(d, "low" | "high" | "auto") {
                return Err("expected one of: low, high, auto".into());
            }
            *image_detail = d.to_string();
        }
        _ => {
            return Err(format!(
                "not a completion option; accepted keys are {}",
                PROVIDER_OPTION_KEYS.join(", ")
            ))
        }
    }
    Ok(())
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn image_detail(&self) -> &str {
        &self.image_detail
    }

    async fn complete(
        &self,
        image: ImageData,
        prior_page: Option<&str>,
    ) -> Result<Completion, ModelError> {
        let messages = build_messages(&self.system_prompt, prior_page, image);
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ModelError::Provider(e.to_string()))?;

        debug!(
            "Completion: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );

        Ok(Completion {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Assemble the chat request for one page.
pub fn build_messages(
    system_prompt: &str,
    prior_page: Option<&str>,
    image: ImageData,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];

    if let Some(prior) = prior_page.filter(|p| !p.is_empty()) {
        messages.push(ChatMessage::system(maintain_format_context(prior)));
    }

    messages.push(ChatMessage::user_with_images("", vec![image]));
    messages
}

/// Resolve the vision model for a run: an injected [`VisionModel`] wins,
/// otherwise an [`LlmVisionModel`] is built from the provider settings.
pub fn resolve_vision_model(
    config: &ConversionConfig,
) -> Result<Arc<dyn VisionModel>, PagemarkError> {
    if let Some(ref model) = config.vision_model {
        if config.system_prompt.is_some() {
            warn!("system_prompt is ignored when a VisionModel is injected");
        }
        return Ok(Arc::clone(model));
    }
    Ok(Arc::new(LlmVisionModel::from_config(config)?))
}

/// Where a run's provider comes from when none is injected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderChoice {
    /// A provider named explicitly, with the model to ask it for.
    Named { provider: String, model: String },
    /// Let `ProviderFactory::from_env` pick the provider; `model` overrides
    /// its default model when set.
    Detect { model: Option<String> },
}

/// Pick the provider source, from most-specific to least-specific:
///
/// 1. **Named provider** (`config.provider_name`)
/// 2. **Environment** `PAGEMARK_PROVIDER` (model from `PAGEMARK_MODEL`)
/// 3. **OpenAI** when `OPENAI_API_KEY` is set
/// 4. **Auto-detection** via `ProviderFactory::from_env`
///
/// An explicit `config.model` is used whichever source wins; otherwise
/// named providers get `PAGEMARK_MODEL` (step 2 only) or [`DEFAULT_MODEL`].
pub fn choose_provider(
    config: &ConversionConfig,
    env: impl Fn(&str) -> Option<String>,
) -> ProviderChoice {
    let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());
    let explicit = config.model.clone();
    let named = |provider: String, fallback: Option<String>| ProviderChoice::Named {
        provider,
        model: explicit
            .clone()
            .or(fallback)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
    };

    if let Some(ref name) = config.provider_name {
        return named(name.clone(), None);
    }
    if let Some(provider) = var("PAGEMARK_PROVIDER") {
        return named(provider, var("PAGEMARK_MODEL"));
    }
    if var("OPENAI_API_KEY").is_some() {
        return named("openai".to_string(), None);
    }
    ProviderChoice::Detect { model: explicit }
}

/// Resolve the LLM provider: a pre-built `config.provider` wins, otherwise
/// see [`choose_provider`].
pub fn resolve_provider(config: &ConversionConfig) -> Result<Arc<dyn LLMProvider>, PagemarkError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    match choose_provider(config, |key| std::env::var(key).ok()) {
        ProviderChoice::Named { provider, model } => create_vision_provider(&provider, &model),
        ProviderChoice::Detect { model } => detect_provider(model.as_deref()),
    }
}

fn detect_provider(model: Option<&str>) -> Result<Arc<dyn LLMProvider>, PagemarkError> {
    let not_configured = |e: edgequake_llm::LlmError| PagemarkError::ProviderNotConfigured {
        provider: "auto".to_string(),
        hint: format!(
            "No LLM provider could be auto-detected from environment.\n\
            Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
            Error: {}",
            e
        ),
    };

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(not_configured)?;

    let Some(model) = model else {
        return Ok(llm_provider);
    };
    if llm_provider.model() == model {
        return Ok(llm_provider);
    }

    let provider_type = ProviderType::from_str(llm_provider.name()).ok_or_else(|| {
        PagemarkError::ProviderNotConfigured {
            provider: llm_provider.name().to_string(),
            hint: format!(
                "Auto-detected provider cannot be re-created with model '{}'; pass --provider",
                model
            ),
        }
    })?;
    debug!(
        "Auto-detected provider '{}', using model '{}'",
        llm_provider.name(),
        model
    );
    let (llm_provider, _embedding) =
        ProviderFactory::create_with_model(provider_type, Some(model)).map_err(not_configured)?;
    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PagemarkError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PagemarkError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn image() -> ImageData {
        ImageData::new("aGVsbG8=".to_string(), "image/png")
    }

    #[test]
    fn messages_without_prior_page() {
        let msgs = build_messages("prompt", None, image());
        assert_eq!(msgs.len(), 2);
    }

    #[test]
    fn messages_with_prior_page() {
        let msgs = build_messages("prompt", Some("# Page 1"), image());
        assert_eq!(msgs.len(), 3);
    }

    #[test]
    fn empty_prior_page_adds_no_context() {
        let msgs = build_messages("prompt", Some(""), image());
        assert_eq!(msgs.len(), 2);
    }

    fn provider() -> Arc<dyn LLMProvider> {
        Arc::new(edgequake_llm::MockProvider::new())
    }

    #[test]
    fn typed_defaults_become_completion_options() {
        let m = LlmVisionModel::new(provider(), None, 0.1, 4096, &ProviderOptions::new()).unwrap();
        assert_eq!(m.options().temperature, Some(0.1));
        assert_eq!(m.options().max_tokens, Some(4096));
        assert_eq!(m.options().top_p, None);
        assert_eq!(m.system_prompt(), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(m.image_detail(), "high");
    }

    #[test]
    fn passthrough_options_override_defaults() {
        let mut extra = ProviderOptions::new();
        extra.insert("temperature".into(), json!(0.0));
        extra.insert("max_tokens".into(), json!(1024));
        extra.insert("image_detail".into(), json!("low"));
        let m = LlmVisionModel::new(provider(), Some("custom".into()), 0.1, 4096, &extra).unwrap();
        assert_eq!(m.options().temperature, Some(0.0));
        assert_eq!(m.options().max_tokens, Some(1024));
        assert_eq!(m.image_detail(), "low");
        assert_eq!(m.system_prompt(), "custom");
    }

    #[test]
    fn sampling_and_format_options_are_forwarded() {
        let mut extra = ProviderOptions::new();
        extra.insert("top_p".into(), json!(0.9));
        extra.insert("frequency_penalty".into(), json!(0.5));
        extra.insert("presence_penalty".into(), json!(-0.5));
        extra.insert("stop".into(), json!(["</page>", "END"]));
        extra.insert("response_format".into(), json!("text"));
        let m = LlmVisionModel::new(provider(), None, 0.1, 4096, &extra).unwrap();
        let o = m.options();
        assert_eq!(o.top_p, Some(0.9));
        assert_eq!(o.frequency_penalty, Some(0.5));
        assert_eq!(o.presence_penalty, Some(-0.5));
        assert_eq!(
            o.stop.as_deref(),
            Some(&["</page>".to_string(), "END".to_string()][..])
        );
        assert_eq!(o.response_format.as_deref(), Some("text"));
    }

    #[test]
    fn single_stop_string_becomes_a_list() {
        let mut extra = ProviderOptions::new();
        extra.insert("stop".into(), json!("END"));
        let m = LlmVisionModel::new(provider(), None, 0.1, 4096, &extra).unwrap();
        assert_eq!(m.options().stop, Some(vec!["END".to_string()]));
    }

    #[test]
    fn unknown_option_is_rejected() {
        let mut extra = ProviderOptions::new();
        extra.insert("top_k".into(), json!(5));
        let err = LlmVisionModel::new(provider(), None, 0.1, 4096, &extra)
            .err()
            .expect("unknown key must fail");
        assert!(matches!(err, PagemarkError::InvalidProviderOption { ref key, .. } if key == "top_k"));
    }

    #[test]
    fn mistyped_option_is_rejected() {
        for (key, value) in [
            ("max_tokens", json!("lots")),
            ("stop", json!(5)),
            ("stop", json!(["ok", 1])),
            ("top_p", json!("high")),
            ("image_detail", json!("medium")),
        ] {
            let mut extra = ProviderOptions::new();
            extra.insert(key.into(), value);
            let err = LlmVisionModel::new(provider(), None, 0.1, 4096, &extra)
                .err()
                .unwrap_or_else(|| panic!("{key} should be rejected"));
            assert!(matches!(err, PagemarkError::InvalidProviderOption { .. }));
        }
    }

    #[tokio::test]
    async fn complete_returns_provider_text() {
        let mock = Arc::new(edgequake_llm::MockProvider::new());
        mock.add_response("# Title").await;
        let m = LlmVisionModel::new(mock, None, 0.1, 4096, &ProviderOptions::new()).unwrap();

        let first = m.complete(image(), None).await.unwrap();
        assert_eq!(first.content, "# Title");
        let second = m.complete(image(), Some("# Title")).await.unwrap();
        assert_eq!(second.content, "Mock response");
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn named(provider: &str, model: &str) -> ProviderChoice {
        ProviderChoice::Named {
            provider: provider.into(),
            model: model.into(),
        }
    }

    #[test]
    fn explicit_model_beats_environment_model() {
        let config = ConversionConfig::builder().model("llava").build().unwrap();
        let choice = choose_provider(
            &config,
            env(&[("PAGEMARK_PROVIDER", "ollama"), ("PAGEMARK_MODEL", "bakllava")]),
        );
        assert_eq!(choice, named("ollama", "llava"));
    }

    #[test]
    fn environment_pair_applies_without_explicit_model() {
        let config = ConversionConfig::default();
        let choice = choose_provider(
            &config,
            env(&[("PAGEMARK_PROVIDER", "ollama"), ("PAGEMARK_MODEL", "bakllava")]),
        );
        assert_eq!(choice, named("ollama", "bakllava"));
    }

    #[test]
    fn explicit_model_reaches_auto_detection() {
        let config = ConversionConfig::builder().model("claude-sonnet").build().unwrap();
        assert_eq!(
            choose_provider(&config, env(&[])),
            ProviderChoice::Detect {
                model: Some("claude-sonnet".into())
            }
        );
        assert_eq!(
            choose_provider(&ConversionConfig::default(), env(&[])),
            ProviderChoice::Detect { model: None }
        );
    }

    #[test]
    fn openai_key_uses_default_model() {
        let choice = choose_provider(&ConversionConfig::default(), env(&[("OPENAI_API_KEY", "sk-x")]));
        assert_eq!(choice, named("openai", DEFAULT_MODEL));
    }

    #[test]
    fn named_provider_wins_over_environment() {
        let config = ConversionConfig::builder()
            .provider_name("gemini")
            .model("gemini-2.0-flash")
            .build()
            .unwrap();
        let choice = choose_provider(
            &config,
            env(&[("PAGEMARK_PROVIDER", "ollama"), ("OPENAI_API_KEY", "sk-x")]),
        );
        assert_eq!(choice, named("gemini", "gemini-2.0-flash"));
    }

    #[test]
    fn blank_environment_values_are_ignored() {
        let choice = choose_provider(
            &ConversionConfig::default(),
            env(&[("PAGEMARK_PROVIDER", " "), ("OPENAI_API_KEY", "")]),
        );
        assert_eq!(choice, ProviderChoice::Detect { model: None });
    }

    #[test]
    fn injected_provider_skips_resolution() {
        let config = ConversionConfig::builder().provider(provider()).build().unwrap();
        let p = resolve_provider(&config).unwrap();
        assert_eq!(p.name(), "mock");
    }
}
