//! Provider registry.
//!
//! Constructs and holds all configured LLM provider instances and the
//! tier → model routing table. Callers address providers by id or by
//! [`ModelTier`]; tool-call shapes are normalized on the way out.

use std::collections::HashMap;
use std::sync::Arc;

use osa_domain::config::{LlmConfig, ModelTier, ProviderConfig, ProviderKind};
use osa_domain::error::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::normalize::extract_embedded_tool_call;
use crate::openai_compat::OpenAiCompatProvider;
use crate::scripted::ScriptedProvider;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::mask_secrets;

/// Records a provider that failed to initialize. Surfaced in the health
/// endpoint so operators can diagnose missing keys without scraping logs.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub kind: String,
    /// Error message with any potential secrets masked.
    pub error: String,
}

/// Holds all instantiated LLM providers and tier assignments.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_provider: Option<String>,
    /// `(tier, provider_id) → model_name`.
    tiers: HashMap<ModelTier, HashMap<String, String>>,
    init_errors: Vec<ProviderInitError>,
}

impl ProviderRegistry {
    /// Build the registry from [`LlmConfig`]. Providers that fail to
    /// initialize are logged and skipped rather than aborting startup;
    /// an empty registry is legal (LLM-dependent paths fall back).
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors = Vec::new();

        for pc in &config.providers {
            match instantiate(pc, config.provider_timeout_ms) {
                Ok(provider) => {
                    tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered LLM provider");
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    let safe_error = mask_secrets(&e.to_string());
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %safe_error,
                        "failed to initialize LLM provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        provider_id: pc.id.clone(),
                        kind: format!("{:?}", pc.kind),
                        error: safe_error,
                    });
                }
            }
        }

        let default_provider = config
            .default_provider
            .clone()
            .filter(|id| providers.contains_key(id))
            .or_else(|| {
                let mut ids: Vec<&String> = providers.keys().collect();
                ids.sort();
                ids.first().map(|s| (*s).clone())
            });

        Self {
            providers,
            default_provider,
            tiers: config.tiers.clone(),
            init_errors,
        }
    }

    /// Registry with a single in-process provider (tests, offline demos).
    pub fn single(id: &str, provider: Arc<dyn LlmProvider>) -> Self {
        let mut providers = HashMap::new();
        providers.insert(id.to_owned(), provider);
        Self {
            providers,
            default_provider: Some(id.to_owned()),
            tiers: HashMap::new(),
            init_errors: Vec::new(),
        }
    }

    /// Insert or replace a provider after construction.
    pub fn insert(&mut self, id: &str, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(id.to_owned(), provider);
        if self.default_provider.is_none() {
            self.default_provider = Some(id.to_owned());
        }
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn default_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        self.default_provider
            .as_deref()
            .and_then(|id| self.get(id))
    }

    pub fn default_provider_id(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }

    /// The model configured for `(tier, default provider)`.
    pub fn model_for_tier(&self, tier: ModelTier) -> Option<String> {
        let provider_id = self.default_provider.as_deref()?;
        self.tiers.get(&tier)?.get(provider_id).cloned()
    }

    /// One chat call through the default provider. `req.model` overrides
    /// the provider default. Tool calls embedded in free-form content are
    /// extracted once (best-effort) when the structured list is empty.
    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let provider = self.default_provider().ok_or_else(|| Error::Provider {
            provider: "registry".into(),
            message: "no LLM provider configured".into(),
        })?;
        let resp = provider.chat(req).await?;
        Ok(normalize_response(resp))
    }

    /// Chat addressed by tier: resolves the tier's model for the default
    /// provider and sets it on the request (explicit `req.model` wins).
    pub async fn chat_tier(&self, tier: ModelTier, mut req: ChatRequest) -> Result<ChatResponse> {
        if req.model.is_none() {
            req.model = self.model_for_tier(tier);
        }
        self.chat(req).await
    }
}

fn instantiate(pc: &ProviderConfig, timeout_ms: u64) -> Result<Arc<dyn LlmProvider>> {
    Ok(match pc.kind {
        ProviderKind::OpenaiCompat => {
            Arc::new(OpenAiCompatProvider::from_config(pc, timeout_ms)?)
        }
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::from_config(pc, timeout_ms)?),
        ProviderKind::Scripted => Arc::new(ScriptedProvider::default()),
    })
}

fn normalize_response(mut resp: ChatResponse) -> ChatResponse {
    if resp.tool_calls.is_empty() {
        if let Some((call, remainder)) = extract_embedded_tool_call(&resp.content) {
            tracing::debug!(tool = %call.name, "extracted embedded tool call from content");
            resp.tool_calls.push(call);
            resp.content = remainder;
        }
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedProvider, Step};
    use osa_domain::message::{Message, Usage};

    fn registry_with_script(steps: Vec<Step>) -> ProviderRegistry {
        ProviderRegistry::single("scripted", Arc::new(ScriptedProvider::new(steps)))
    }

    #[tokio::test]
    async fn chat_routes_to_default_provider() {
        let reg = registry_with_script(vec![Step::text("hello")]);
        let resp = reg
            .chat(ChatRequest {
                messages: vec![Message::user("hi")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.content, "hello");
    }

    #[tokio::test]
    async fn embedded_tool_call_is_normalized() {
        let reg = registry_with_script(vec![Step::Reply(ChatResponse {
            content: r#"{"name": "echo", "arguments": {"text": "x"}}"#.into(),
            tool_calls: Vec::new(),
            usage: Usage::default(),
        })]);
        let resp = reg.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "echo");
        assert!(resp.content.is_empty());
    }

    #[tokio::test]
    async fn empty_registry_reports_no_provider() {
        let reg = ProviderRegistry::from_config(&LlmConfig::default());
        assert!(reg.is_empty());
        let err = reg.chat(ChatRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }

    #[test]
    fn tier_resolution_uses_default_provider() {
        let mut cfg = LlmConfig::default();
        cfg.providers.push(ProviderConfig {
            id: "local".into(),
            kind: ProviderKind::Scripted,
            base_url: None,
            api_key_env: None,
            api_key: None,
            default_model: None,
        });
        cfg.default_provider = Some("local".into());
        cfg.tiers.insert(
            ModelTier::Utility,
            [("local".to_owned(), "small".to_owned())].into(),
        );
        let reg = ProviderRegistry::from_config(&cfg);
        assert_eq!(reg.model_for_tier(ModelTier::Utility).as_deref(), Some("small"));
        assert_eq!(reg.model_for_tier(ModelTier::Elite), None);
    }
}
