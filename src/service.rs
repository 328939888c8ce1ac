//! Wiring of the voice guidance components from configuration

use std::sync::Arc;

use serde::Serialize;

use crate::config::{Config, TtsProvider};
use crate::voice::{
    AudioOutput, CacheOrchestrator, CacheStats, EvictionReport, FsArtifactStore,
    PlaybackController, SpeechFallback, SpeechSynthesizer, SystemSpeech, TextToSpeech,
};
use crate::Result;

/// Component readiness, mirroring the backend `/health` response
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub provider: &'static str,
    pub synthesis_configured: bool,
    pub fallback_available: bool,
    pub cache: Option<CacheStats>,
}

/// Fully wired voice guidance stack
pub struct VoiceService {
    config: Config,
    store: Arc<FsArtifactStore>,
    synthesizer: Arc<TextToSpeech>,
    fallback: Arc<SystemSpeech>,
    orchestrator: Arc<CacheOrchestrator>,
}

impl VoiceService {
    /// Build every component from `config`
    ///
    /// # Errors
    ///
    /// Returns error if the cache directory or HTTP client cannot be created
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(FsArtifactStore::open(
            &config.cache.dir,
            config.cache.max_bytes,
        )?);
        let synthesizer = Arc::new(TextToSpeech::new(&config.synthesis)?);
        let fallback = Arc::new(SystemSpeech::new(
            config.speech.program.clone(),
            config.speech.words_per_minute,
        ));

        if !synthesizer.is_configured() {
            tracing::info!(
                provider = ?config.synthesis.provider,
                "no TTS API key; guidance will use local speech"
            );
        }

        let orchestrator = Arc::new(CacheOrchestrator::new(
            Arc::clone(&store) as _,
            Arc::clone(&synthesizer) as _,
            Arc::clone(&fallback) as _,
        ));

        Ok(Self {
            config,
            store,
            synthesizer,
            fallback,
            orchestrator,
        })
    }

    /// Loaded configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Shared cache orchestrator
    #[must_use]
    pub fn orchestrator(&self) -> Arc<CacheOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    /// Artifact store
    #[must_use]
    pub fn store(&self) -> &FsArtifactStore {
        &self.store
    }

    /// Create a playback controller over `output`
    #[must_use]
    pub fn controller(&self, output: Arc<dyn AudioOutput>) -> PlaybackController {
        PlaybackController::new(
            self.orchestrator(),
            output,
            self.config.playback.progress_interval,
        )
    }

    /// Report component readiness
    pub async fn health(&self) -> HealthReport {
        let cache = match self.store.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read cache stats");
                None
            }
        };

        HealthReport {
            status: "ok",
            provider: match self.synthesizer.provider() {
                TtsProvider::ElevenLabs => "elevenlabs",
                TtsProvider::OpenAi => "openai",
            },
            synthesis_configured: self.synthesizer.is_configured(),
            fallback_available: self.fallback.is_available(),
            cache,
        }
    }

    /// Apply the cache size cap now
    ///
    /// # Errors
    ///
    /// Returns error if the cache directory cannot be listed
    pub async fn prune(&self) -> Result<EvictionReport> {
        self.store.prune().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;

    fn test_config(dir: &std::path::Path) -> Config {
        let dir = dir.to_string_lossy().into_owned();
        Config::from_sources(FileConfig::default(), move |name| {
            (name == "TIDESENSE_AUDIO_CACHE_DIR").then(|| dir.clone())
        })
        .unwrap()
    }

    #[tokio::test]
    async fn health_reports_unconfigured_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let service = VoiceService::new(test_config(dir.path())).unwrap();

        let health = service.health().await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.provider, "elevenlabs");
        assert!(!health.synthesis_configured);
        assert_eq!(health.cache, Some(CacheStats::default()));
    }

    #[tokio::test]
    async fn health_serializes_like_backend() {
        let dir = tempfile::tempdir().unwrap();
        let service = VoiceService::new(test_config(dir.path())).unwrap();

        let json = serde_json::to_value(service.health().await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["synthesis_configured"], false);
        assert_eq!(json["cache"]["entries"], 0);
    }
}
