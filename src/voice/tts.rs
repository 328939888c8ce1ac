//! Remote text-to-speech (TTS) synthesis

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{SynthesisConfig, TtsProvider};
use crate::{Error, Result};

const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Longest error body kept in error messages
const MAX_ERROR_BODY: usize = 200;

/// Turns text into audio bytes
///
/// Implementations must not touch the artifact store; caching is the
/// orchestrator's job.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` into encoded audio
    ///
    /// # Errors
    ///
    /// Returns `Unconfigured`, `RateLimited`, `Service` or `Timeout`
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Whether credentials are present
    fn is_configured(&self) -> bool;
}

/// Synthesizes speech through ElevenLabs or `OpenAI`
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    voice: String,
    speed: f32,
    model: String,
    base_url: String,
    provider: TtsProvider,
    timeout: Duration,
}

impl TextToSpeech {
    /// Create a client from configuration
    ///
    /// A missing API key is not an error here; every call then fails fast
    /// with `Error::Unconfigured`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let default_base = match config.provider {
            TtsProvider::ElevenLabs => ELEVENLABS_BASE_URL,
            TtsProvider::OpenAi => OPENAI_BASE_URL,
        };
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(default_base)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            voice: config.voice.clone(),
            speed: config.speed,
            model: config.model.clone(),
            base_url,
            provider: config.provider,
            timeout: config.timeout,
        })
    }

    /// Provider in use
    #[must_use]
    pub const fn provider(&self) -> TtsProvider {
        self.provider
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(&self, api_key: &str, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let result = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await;

        self.read_audio("OpenAI", result).await
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, api_key: &str, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct VoiceSettings {
            stability: f32,
            similarity_boost: f32,
            style: f32,
            use_speaker_boost: bool,
        }

        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            voice_settings: VoiceSettings,
        }

        let url = format!("{}/v1/text-to-speech/{}", self.base_url, self.voice);

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
                style: 0.0,
                use_speaker_boost: true,
            },
        };

        let result = self
            .client
            .post(&url)
            .header("xi-api-key", api_key)
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await;

        self.read_audio("ElevenLabs", result).await
    }

    /// Turn a provider response into audio bytes or a classified error
    async fn read_audio(
        &self,
        provider: &str,
        result: reqwest::Result<reqwest::Response>,
    ) -> Result<Vec<u8>> {
        let response = result.map_err(|e| self.transport_error(provider, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(provider, status, &body));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(provider, &e))?;
        if audio.is_empty() {
            return Err(Error::Service(format!("{provider} returned empty audio")));
        }

        Ok(audio.to_vec())
    }

    fn transport_error(&self, provider: &str, err: &reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Service(format!("{provider} request failed: {err}"))
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let Some(api_key) = &self.api_key else {
            return Err(Error::Unconfigured(format!(
                "no API key for {:?} TTS",
                self.provider
            )));
        };

        tracing::debug!(provider = ?self.provider, chars = text.len(), "requesting synthesis");

        match self.provider {
            TtsProvider::OpenAi => self.synthesize_openai(api_key.expose_secret(), text).await,
            TtsProvider::ElevenLabs => {
                self.synthesize_elevenlabs(api_key.expose_secret(), text)
                    .await
            }
        }
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Map a non-success HTTP status to an error kind
#[must_use]
pub fn classify_status(provider: &str, status: StatusCode, body: &str) -> Error {
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    if status == StatusCode::TOO_MANY_REQUESTS {
        Error::RateLimited(format!("{provider} TTS error {status}: {body}"))
    } else {
        Error::Service(format!("{provider} TTS error {status}: {body}"))
    }
}
