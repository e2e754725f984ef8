//! HTTP client for the Nova backend
//!
//! Wire contract:
//! - `POST /chat` `{ text, conversation_history }` → `{ text, emotion? }`
//! - `POST /text-to-speech` `{ text, emotion }` → `{ audio_url }`
//! - `POST /speech-to-text` multipart `file` → `{ text }`
//! - `GET /system-status` → 2xx when reachable

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::conversation::ConversationTurn;
use crate::dispatch::InferenceBackend;
use crate::monitor::StatusEndpoint;
use crate::{Error, NetworkError, Result};

/// Reply from the chat endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    /// Assistant text
    pub text: String,
    /// Emotion label chosen by the backend, possibly outside the local set
    #[serde(default)]
    pub emotion: Option<String>,
}

/// Body of the status endpoint; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SystemStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub current_emotion: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    text: &'a str,
    conversation_history: &'a [ConversationTurn],
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    emotion: &'a str,
}

#[derive(Deserialize)]
struct SpeechResponse {
    audio_url: String,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for the remote inference, speech and status endpoints
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: Url,
}

impl BackendClient {
    /// Create a client for a backend base URL
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid backend url {base_url}: {e}")))?;

        // Keep a trailing slash so joins stay under any path prefix
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    /// Backend base URL
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, NetworkError> {
        self.base_url.join(path).map_err(|e| {
            tracing::warn!(path, error = %e, "cannot build backend url");
            NetworkError::Unreachable
        })
    }

    /// Ask the inference endpoint for a reply
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-2xx status or a malformed body
    pub async fn chat(
        &self,
        text: &str,
        history: &[ConversationTurn],
    ) -> std::result::Result<ChatReply, NetworkError> {
        let request = ChatRequest {
            text,
            conversation_history: history,
        };

        let response = self
            .client
            .post(self.endpoint("chat")?)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::BadStatus(status.as_u16()));
        }

        response
            .json::<ChatReply>()
            .await
            .map_err(|_| NetworkError::BadStatus(status.as_u16()))
    }

    /// Request synthesized speech and return the absolute audio URL
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-2xx status or a malformed body
    pub async fn synthesize(
        &self,
        text: &str,
        emotion: &str,
    ) -> std::result::Result<Url, NetworkError> {
        let response = self
            .client
            .post(self.endpoint("text-to-speech")?)
            .json(&SpeechRequest { text, emotion })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::BadStatus(status.as_u16()));
        }

        let body: SpeechResponse = response
            .json()
            .await
            .map_err(|_| NetworkError::BadStatus(status.as_u16()))?;

        // audio_url is usually root-relative ("/static/audio/…")
        self.base_url.join(&body.audio_url).map_err(|e| {
            tracing::warn!(audio_url = %body.audio_url, error = %e, "bad audio url");
            NetworkError::BadStatus(status.as_u16())
        })
    }

    /// Download synthesized audio
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or non-2xx status
    pub async fn fetch_audio(&self, url: &Url) -> std::result::Result<Vec<u8>, NetworkError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::BadStatus(status.as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Transcribe a WAV utterance
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-2xx status or a malformed body
    pub async fn transcribe(&self, wav: Vec<u8>) -> std::result::Result<String, NetworkError> {
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.endpoint("speech-to-text")?)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::BadStatus(status.as_u16()));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|_| NetworkError::BadStatus(status.as_u16()))?;
        Ok(body.text)
    }

    /// Query backend liveness
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or non-2xx status
    pub async fn system_status(&self) -> std::result::Result<SystemStatus, NetworkError> {
        let response = self
            .client
            .get(self.endpoint("system-status")?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::BadStatus(status.as_u16()));
        }

        // Reachability only depends on the status code
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body).unwrap_or_default())
    }
}

#[async_trait]
impl InferenceBackend for BackendClient {
    async fn chat(
        &self,
        text: &str,
        history: &[ConversationTurn],
    ) -> std::result::Result<ChatReply, NetworkError> {
        Self::chat(self, text, history).await
    }
}

#[async_trait]
impl StatusEndpoint for BackendClient {
    async fn system_status(&self) -> std::result::Result<SystemStatus, NetworkError> {
        Self::system_status(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_keeps_prefix() {
        let client = BackendClient::new("http://localhost:8000/api", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:8000/api/");
        assert_eq!(
            client.endpoint("chat").unwrap().as_str(),
            "http://localhost:8000/api/chat"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = BackendClient::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_chat_request_shape() {
        let history = vec![ConversationTurn::user("hi")];
        let body = serde_json::to_value(ChatRequest {
            text: "how are you",
            conversation_history: &history,
        })
        .unwrap();
        assert_eq!(body["text"], "how are you");
        assert_eq!(body["conversation_history"][0]["role"], "user");
    }

    #[test]
    fn test_chat_reply_without_emotion() {
        let reply: ChatReply = serde_json::from_str(r#"{"text":"ok"}"#).unwrap();
        assert_eq!(reply.emotion, None);
    }
}
