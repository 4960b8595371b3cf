use crate::config::{BackendConfig, BackendKind};
use crate::error::{BackendErrorKind, BenchError};
use crate::models::Turn;
use anyhow::{Context, Result};
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_openai::{Client, config::OpenAIConfig};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Proxy settings handed in by the CLI layer
#[derive(Debug, Clone, Default)]
pub struct ProxySettings {
    pub http: Option<String>,
    pub https: Option<String>,
}

impl ProxySettings {
    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }
}

/// A completed backend call
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub text: String,
    pub latency: Duration,
}

/// Uniform entry point to one vendor chat API.
///
/// Adapters translate the prior turn history into the vendor's role-tagged
/// format and hold no conversation state of their own; failed prior turns
/// contribute their prompt but no assistant message. Adapters never retry —
/// retry policy belongs to whoever drives the session.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn id(&self) -> &str;

    /// Whether the backend accepts image content.
    fn supports_vision(&self) -> bool {
        false
    }

    /// Send one prompt with the full prior history, returning the response
    /// text and the wall-clock latency of the network call.
    async fn send(
        &self,
        history: &[Turn],
        prompt: &str,
        image_ref: Option<&str>,
        system_message: Option<&str>,
    ) -> Result<BackendReply, BenchError>;
}

fn check_vision(backend: &dyn ChatBackend, prompt: &str, image_ref: Option<&str>) -> Result<(), BenchError> {
    if image_ref.is_some() && !backend.supports_vision() {
        return Err(BenchError::UnsupportedCapability {
            backend_id: backend.id().to_string(),
            prompt: prompt.to_string(),
        });
    }
    Ok(())
}

/// Adapter for any endpoint speaking the OpenAI chat-completions shape.
pub struct OpenAiBackend {
    id: String,
    client: Client<OpenAIConfig>,
    model: String,
    vision: bool,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(config: &BackendConfig, api_key: String) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.api_endpoint);

        Self {
            id: config.id.clone(),
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            vision: config.vision,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn user_message(
        &self,
        prompt: &str,
        image_ref: Option<&str>,
    ) -> Result<ChatCompletionRequestMessage, OpenAIError> {
        let message = match image_ref {
            Some(url) => {
                let text_part: ChatCompletionRequestUserMessageContentPart =
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(prompt.to_string())
                        .build()?
                        .into();
                let image_part: ChatCompletionRequestUserMessageContentPart =
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(ImageUrlArgs::default().url(url.to_string()).build()?)
                        .build()?
                        .into();
                ChatCompletionRequestUserMessageArgs::default()
                    .content(vec![text_part, image_part])
                    .build()?
            }
            None => ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.to_string())
                .build()?,
        };
        Ok(message.into())
    }

    /// Coalesce the turn history plus the new prompt into a role-tagged
    /// message list, in request order.
    fn build_messages(
        &self,
        history: &[Turn],
        prompt: &str,
        image_ref: Option<&str>,
        system_message: Option<&str>,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages = Vec::with_capacity(history.len() * 2 + 2);

        if let Some(system) = system_message {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.to_string())
                    .build()?
                    .into(),
            );
        }

        for turn in history {
            // A capability-rejected turn keeps its image_ref in the record;
            // never replay image content to a backend that cannot take it.
            let image_ref = if self.vision {
                turn.image_ref.as_deref()
            } else {
                None
            };
            messages.push(self.user_message(&turn.prompt, image_ref)?);
            if let Some(response) = &turn.response {
                messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(response.clone())
                        .build()?
                        .into(),
                );
            }
        }

        messages.push(self.user_message(prompt, image_ref)?);
        Ok(messages)
    }

    fn map_error(&self, prompt: &str, error: OpenAIError) -> BenchError {
        let kind = match &error {
            OpenAIError::ApiError(_) => BackendErrorKind::Api,
            OpenAIError::JSONDeserialize(_) => BackendErrorKind::MalformedPayload,
            _ => BackendErrorKind::Transport,
        };
        BenchError::Backend {
            backend_id: self.id.clone(),
            prompt: prompt.to_string(),
            kind,
            message: error.to_string(),
        }
    }

    fn malformed(&self, prompt: &str, message: &str) -> BenchError {
        BenchError::Backend {
            backend_id: self.id.clone(),
            prompt: prompt.to_string(),
            kind: BackendErrorKind::MalformedPayload,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }

    async fn send(
        &self,
        history: &[Turn],
        prompt: &str,
        image_ref: Option<&str>,
        system_message: Option<&str>,
    ) -> Result<BackendReply, BenchError> {
        check_vision(self, prompt, image_ref)?;

        let messages = self
            .build_messages(history, prompt, image_ref, system_message)
            .map_err(|e| self.map_error(prompt, e))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature as f32)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(|e| self.map_error(prompt, e))?;

        let started = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| BenchError::timeout(&self.id, prompt, self.timeout))?
            .map_err(|e| self.map_error(prompt, e))?;
        let latency = started.elapsed();

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| self.malformed(prompt, "response carried no message content"))?;

        Ok(BackendReply { text, latency })
    }
}

/// Adapter for the Gemini generateContent API.
///
/// History roles map user/assistant to user/model; image references are
/// fetched and inlined as base64 since the API takes no external URLs.
pub struct GeminiBackend {
    id: String,
    client: reqwest::Client,
    api_endpoint: String,
    api_key: String,
    model: String,
    vision: bool,
    temperature: f64,
    max_tokens: u32,
}

impl GeminiBackend {
    pub fn new(config: &BackendConfig, api_key: String, proxy: &ProxySettings) -> Result<Self> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(url) = &proxy.http {
            builder = builder.proxy(reqwest::Proxy::http(url).context("Invalid HTTP proxy")?);
        }
        if let Some(url) = &proxy.https {
            builder = builder.proxy(reqwest::Proxy::https(url).context("Invalid HTTPS proxy")?);
        }

        Ok(Self {
            id: config.id.clone(),
            client: builder.build().context("Failed to build HTTP client")?,
            api_endpoint: config.api_endpoint.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            vision: config.vision,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn backend_error(&self, prompt: &str, kind: BackendErrorKind, message: String) -> BenchError {
        BenchError::Backend {
            backend_id: self.id.clone(),
            prompt: prompt.to_string(),
            kind,
            message,
        }
    }

    fn transport_error(&self, prompt: &str, error: reqwest::Error) -> BenchError {
        let kind = if error.is_timeout() {
            BackendErrorKind::Timeout
        } else {
            BackendErrorKind::Transport
        };
        self.backend_error(prompt, kind, error.to_string())
    }

    /// Fetch an image and inline it as base64 part data.
    async fn inline_image(&self, prompt: &str, url: &str) -> Result<Value, BenchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(prompt, e))?;
        if !response.status().is_success() {
            return Err(self.backend_error(
                prompt,
                BackendErrorKind::Api,
                format!("image fetch returned status {}", response.status()),
            ));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(prompt, e))?;

        Ok(json!({
            "inline_data": {
                "mime_type": mime_type,
                "data": base64::engine::general_purpose::STANDARD.encode(&bytes),
            }
        }))
    }

    async fn user_parts(&self, prompt: &str, image_ref: Option<&str>) -> Result<Value, BenchError> {
        let mut parts = vec![json!({"text": prompt})];
        if let Some(url) = image_ref {
            parts.push(self.inline_image(prompt, url).await?);
        }
        Ok(Value::Array(parts))
    }

    async fn build_body(
        &self,
        history: &[Turn],
        prompt: &str,
        image_ref: Option<&str>,
        system_message: Option<&str>,
    ) -> Result<Value, BenchError> {
        let mut contents = Vec::with_capacity(history.len() * 2 + 1);
        for turn in history {
            // Same rule as the OpenAI adapter: history images are only
            // replayed to a backend that accepts image content.
            let image_ref = if self.vision {
                turn.image_ref.as_deref()
            } else {
                None
            };
            contents.push(json!({
                "role": "user",
                "parts": self.user_parts(&turn.prompt, image_ref).await?,
            }));
            if let Some(response) = &turn.response {
                contents.push(json!({
                    "role": "model",
                    "parts": [{"text": response}],
                }));
            }
        }
        contents.push(json!({
            "role": "user",
            "parts": self.user_parts(prompt, image_ref).await?,
        }));

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_tokens,
            }
        });
        if let Some(system) = system_message {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        Ok(body)
    }

    fn extract_text(&self, prompt: &str, payload: &Value) -> Result<String, BenchError> {
        let parts = payload
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .ok_or_else(|| {
                self.backend_error(
                    prompt,
                    BackendErrorKind::MalformedPayload,
                    "response carried no candidate parts".to_string(),
                )
            })?;

        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(self.backend_error(
                prompt,
                BackendErrorKind::MalformedPayload,
                "candidate parts carried no text".to_string(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }

    async fn send(
        &self,
        history: &[Turn],
        prompt: &str,
        image_ref: Option<&str>,
        system_message: Option<&str>,
    ) -> Result<BackendReply, BenchError> {
        check_vision(self, prompt, image_ref)?;

        let body = self
            .build_body(history, prompt, image_ref, system_message)
            .await?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.api_endpoint, self.model
        );

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(prompt, e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(self.backend_error(
                prompt,
                BackendErrorKind::Api,
                format!("status {status}: {detail}"),
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| self.backend_error(prompt, BackendErrorKind::MalformedPayload, e.to_string()))?;
        let latency = started.elapsed();

        let text = self.extract_text(prompt, &payload)?;
        Ok(BackendReply { text, latency })
    }
}

/// Construct the adapter an entry in the run configuration asks for, reading
/// its API key from the configured environment variable.
pub fn build_backend(
    config: &BackendConfig,
    proxy: &ProxySettings,
) -> Result<Arc<dyn ChatBackend>> {
    let api_key = std::env::var(&config.env_var_api_key)
        .with_context(|| format!("Environment variable {} not found", config.env_var_api_key))?;

    let backend: Arc<dyn ChatBackend> = match config.kind {
        BackendKind::Openai => Arc::new(OpenAiBackend::new(config, api_key)),
        BackendKind::Gemini => Arc::new(GeminiBackend::new(config, api_key, proxy)?),
    };
    Ok(backend)
}
