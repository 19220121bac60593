//! Client for the local NIRA backend REST API.

use anyhow::{anyhow, Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::agent_api::{ChatMessage, Conversation};
use shared::settings::BackendSettings;
use std::time::Duration;
use url::Url;

/// Long enough for a local model to finish a reply.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Wire shape of one transcript message.
#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(msg: &'a ChatMessage) -> Self {
        Self {
            role: msg.role.as_str(),
            content: &msg.content,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    history: Vec<WireMessage<'a>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub tts_url: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SttResponse {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OllamaHealth {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    models: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocalModel {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LocalModelsResponse {
    #[serde(default)]
    models: Vec<LocalModel>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PullStart {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PullStatus {
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// How the avatar panel should render an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarMedia {
    Video(String),
    Image(String),
}

impl AvatarMedia {
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        // Ignore any query string when looking at the extension
        let path = url.split(['?', '#']).next().unwrap_or_default();
        if path.to_ascii_lowercase().ends_with(".mp4") {
            AvatarMedia::Video(url)
        } else {
            AvatarMedia::Image(url)
        }
    }

    pub fn url(&self) -> &str {
        match self {
            AvatarMedia::Video(url) | AvatarMedia::Image(url) => url,
        }
    }
}

/// Result of one chat turn, with asset paths already made absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub reply: Option<String>,
    pub tts_url: Option<String>,
    pub avatar: Option<AvatarMedia>,
}

#[derive(Clone)]
pub struct NiraClient {
    http: Client,
    base: String,
}

impl NiraClient {
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(2)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Talk to the same backend the supervisor launches.
    pub fn from_settings(backend: &BackendSettings) -> Result<Self> {
        Self::new(backend.base_url())
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Absolute URL for a backend-relative asset path (avatar, TTS audio).
    pub fn asset_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            self.url(path)
        } else {
            format!("{}/{}", self.base, path)
        }
    }

    pub async fn health(&self) -> Result<bool> {
        let resp = self.http.get(self.url("/health")).send().await?;
        Ok(resp.status() == reqwest::StatusCode::OK)
    }

    pub async fn ollama_health(&self) -> Result<OllamaHealth> {
        let resp = self.http.get(self.url("/ollama/health")).send().await?;
        read_json(resp, "ollama health").await
    }

    pub async fn chat(&self, history: &[ChatMessage], model: Option<&str>) -> Result<ChatResponse> {
        let mut url = Url::parse(&self.url("/chat"))?;
        if let Some(model) = model.filter(|m| !m.is_empty()) {
            url.query_pairs_mut().append_pair("model_name", model);
        }
        let req = ChatRequest {
            history: history.iter().map(WireMessage::from).collect(),
        };
        tracing::debug!(messages = req.history.len(), model = ?model, "sending chat request");
        let resp = self.http.post(url).json(&req).send().await?;
        read_json(resp, "chat").await
    }

    /// Append `text` as a user turn, ask the backend, append the reply.
    ///
    /// The user turn stays in the transcript when the backend fails.
    pub async fn send_message(
        &self,
        conversation: &mut Conversation,
        text: &str,
        model: Option<&str>,
    ) -> Result<ChatTurn> {
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow!("message is empty"));
        }
        conversation.push_user(text);

        let res = self.chat(conversation.history(), model).await?;
        if let Some(err) = res.error {
            return Err(anyhow!("chat error: {}", err));
        }
        if let Some(reply) = &res.reply {
            conversation.push_assistant(reply.clone());
        }

        Ok(ChatTurn {
            reply: res.reply,
            tts_url: res.tts_url.as_deref().map(|p| self.asset_url(p)),
            avatar: res
                .avatar_url
                .as_deref()
                .map(|p| AvatarMedia::from_url(self.asset_url(p))),
        })
    }

    /// Transcribe recorded audio.
    pub async fn stt(&self, audio: Vec<u8>) -> Result<SttResponse> {
        let part = Part::bytes(audio)
            .file_name("mic.webm")
            .mime_str("audio/webm")?;
        let form = Form::new().part("file", part);
        let resp = self.http.post(self.url("/stt")).multipart(form).send().await?;
        read_json(resp, "stt").await
    }

    /// Transcribe `audio` and send the text as a user turn.
    ///
    /// Returns `None` when nothing was transcribed; the transcript is untouched then.
    pub async fn send_voice(
        &self,
        conversation: &mut Conversation,
        audio: Vec<u8>,
        model: Option<&str>,
    ) -> Result<Option<ChatTurn>> {
        let res = self.stt(audio).await?;
        if let Some(err) = res.error {
            return Err(anyhow!("stt error: {}", err));
        }
        match res.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                tracing::debug!(chars = text.len(), "voice input transcribed");
                self.send_message(conversation, text, model).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    pub async fn catalog(&self) -> Result<Vec<String>> {
        let resp = self.http.get(self.url("/models/catalog")).send().await?;
        let body: CatalogResponse = read_json(resp, "model catalog").await?;
        Ok(body.models)
    }

    pub async fn local_models(&self) -> Result<Vec<LocalModel>> {
        let resp = self.http.get(self.url("/models/local")).send().await?;
        let body: LocalModelsResponse = read_json(resp, "local models").await?;
        if let Some(err) = body.error {
            return Err(anyhow!("local models error: {}", err));
        }
        Ok(body.models)
    }

    pub async fn pull_start(&self, model: &str) -> Result<PullStart> {
        let resp = self
            .http
            .post(self.url("/models/pull"))
            .json(&serde_json::json!({ "model": model }))
            .send()
            .await?;
        read_json(resp, "model pull").await
    }

    pub async fn pull_status(&self, job_id: &str) -> Result<PullStatus> {
        let resp = self
            .http
            .get(self.url(&format!("/models/pull/{}", job_id)))
            .send()
            .await?;
        read_json(resp, "model pull status").await
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow!("{} request failed: {} {}", what, status, body.trim()));
    }
    resp.json::<T>()
        .await
        .with_context(|| format!("invalid {} response", what))
}
