//! Cache orchestration for voice guidance
//!
//! Resolves guidance text to something playable: a stored artifact, a freshly
//! synthesized one, or the local speech fallback. Synthesis and storage
//! failures never escape; only a missing local speech engine does.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use super::fallback::{DeviceSpeechHandle, SpeechFallback};
use super::key::{ContentKey, GuidanceText};
use super::store::{ArtifactStore, AudioArtifact};
use super::tts::SpeechSynthesizer;
use crate::{Error, Result};

/// Outcome shared by every caller waiting on one synthesis
type SynthesisOutcome = std::result::Result<AudioArtifact, Arc<Error>>;

/// Receiver for an in-flight synthesis; `None` until it finishes
type Pending = watch::Receiver<Option<SynthesisOutcome>>;

/// Something the playback layer can play
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Synthesized audio
    Artifact(AudioArtifact),
    /// Utterance for the device speech engine
    Device(DeviceSpeechHandle),
}

impl AudioSource {
    /// Which kind of source this is
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        match self {
            Self::Artifact(_) => SourceKind::Artifact,
            Self::Device(_) => SourceKind::Device,
        }
    }
}

/// Discriminant of [`AudioSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Artifact,
    Device,
}

/// Which path produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    Cached,
    Synthesized,
    Fallback,
    Failed,
}

/// Tagged result of resolving guidance text
#[derive(Debug)]
pub enum Resolution {
    /// Served from the artifact store without synthesis
    Cached(AudioArtifact),
    /// Synthesized now; `persisted` is false if the store write failed
    Synthesized {
        artifact: AudioArtifact,
        persisted: bool,
    },
    /// Remote synthesis failed; local speech stands in
    Fallback {
        handle: DeviceSpeechHandle,
        cause: Arc<Error>,
    },
    /// Nothing playable could be produced
    Failed(Error),
}

impl Resolution {
    /// Path taken
    #[must_use]
    pub const fn path(&self) -> ResolutionPath {
        match self {
            Self::Cached(_) => ResolutionPath::Cached,
            Self::Synthesized { .. } => ResolutionPath::Synthesized,
            Self::Fallback { .. } => ResolutionPath::Fallback,
            Self::Failed(_) => ResolutionPath::Failed,
        }
    }

    /// Collapse into the public contract
    ///
    /// # Errors
    ///
    /// Returns the terminal error of a `Failed` resolution
    pub fn into_source(self) -> Result<AudioSource> {
        match self {
            Self::Cached(artifact) | Self::Synthesized { artifact, .. } => {
                Ok(AudioSource::Artifact(artifact))
            }
            Self::Fallback { handle, .. } => Ok(AudioSource::Device(handle)),
            Self::Failed(e) => Err(e),
        }
    }
}

/// Either an artifact that appeared meanwhile, or a synthesis to wait on
enum Attach {
    Stored(AudioArtifact),
    Wait(Pending),
}

/// Resolves guidance text to playable audio
///
/// Holds its own in-flight registry: for any content key at most one
/// synthesis call is outstanding, and later callers wait on its result.
pub struct CacheOrchestrator {
    store: Arc<dyn ArtifactStore>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    fallback: Arc<dyn SpeechFallback>,
    in_flight: Arc<Mutex<HashMap<ContentKey, Pending>>>,
}

impl CacheOrchestrator {
    /// Create an orchestrator over the given components
    #[must_use]
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        fallback: Arc<dyn SpeechFallback>,
    ) -> Self {
        Self {
            store,
            synthesizer,
            fallback,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve `text` to a playable source
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyText` for blank input, or `Error::Playback` when
    /// neither synthesis nor local speech is available
    pub async fn resolve_playable_audio(&self, text: &str) -> Result<AudioSource> {
        self.resolve(text).await.into_source()
    }

    /// Resolve `text`, reporting which path was taken
    pub async fn resolve(&self, text: &str) -> Resolution {
        let text = match GuidanceText::new(text) {
            Ok(text) => text,
            Err(e) => return Resolution::Failed(e),
        };
        let key = text.key();

        if let Some(artifact) = self.lookup(key).await {
            tracing::debug!(key = %key, "voice cache hit");
            return Resolution::Cached(artifact);
        }

        let pending = match self.attach(&text).await {
            Attach::Stored(artifact) => return Resolution::Cached(artifact),
            Attach::Wait(pending) => pending,
        };

        match wait(pending).await {
            Ok(artifact) => Resolution::Synthesized {
                persisted: artifact.is_persisted(),
                artifact,
            },
            Err(cause) => match self.fallback.speak(text.as_str()).await {
                Ok(handle) => Resolution::Fallback { handle, cause },
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "local speech fallback failed");
                    Resolution::Failed(e)
                }
            },
        }
    }

    /// Number of syntheses currently running
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Store lookup; storage errors count as a miss
    async fn lookup(&self, key: &ContentKey) -> Option<AudioArtifact> {
        match self.store.get(key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "artifact lookup failed, treating as miss");
                None
            }
        }
    }

    /// Join the running synthesis for this key, or start one
    async fn attach(&self, text: &GuidanceText) -> Attach {
        let key = text.key();
        let mut in_flight = self.in_flight.lock().await;

        if let Some(pending) = in_flight.get(key) {
            tracing::debug!(key = %key, "joining in-flight synthesis");
            return Attach::Wait(pending.clone());
        }

        // A synthesis may have finished between the first lookup and the lock
        if let Some(artifact) = self.lookup(key).await {
            return Attach::Stored(artifact);
        }

        let pending = self.spawn_synthesis(text.clone());
        in_flight.insert(key.clone(), pending.clone());
        Attach::Wait(pending)
    }

    /// Run synthesis on its own task so it outlives impatient callers
    fn spawn_synthesis(&self, text: GuidanceText) -> Pending {
        let (tx, rx) = watch::channel(None);
        let store = Arc::clone(&self.store);
        let synthesizer = Arc::clone(&self.synthesizer);
        let in_flight = Arc::clone(&self.in_flight);

        tokio::spawn(async move {
            let key = text.key().clone();
            let work = tokio::spawn(async move {
                synthesize_and_store(&*synthesizer, &*store, &text).await
            });

            // A panicking synthesizer or store must still clear the registry
            let outcome = match work.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "synthesis task aborted");
                    Err(Arc::new(Error::Service(format!("synthesis task failed: {e}"))))
                }
            };

            in_flight.lock().await.remove(&key);
            // No receivers left is fine; the store already has the result
            let _ = tx.send(Some(outcome));
        });

        rx
    }
}

async fn synthesize_and_store(
    synthesizer: &dyn SpeechSynthesizer,
    store: &dyn ArtifactStore,
    text: &GuidanceText,
) -> SynthesisOutcome {
    let key = text.key();

    let bytes = match synthesizer.synthesize(text.as_str()).await {
        Ok(bytes) if bytes.is_empty() => Err(Error::Service("synthesis returned no audio".into())),
        other => other,
    };

    let bytes = match bytes {
        Ok(bytes) => bytes,
        Err(e) => {
            if matches!(e, Error::Unconfigured(_)) {
                tracing::debug!(key = %key, reason = %e, "synthesis unavailable");
            } else {
                tracing::warn!(key = %key, error = %e, "synthesis failed");
            }
            return Err(Arc::new(e));
        }
    };

    match store.put(key, &bytes).await {
        Ok(artifact) => {
            tracing::info!(key = %key, bytes = artifact.size_bytes, "voice guidance cached");
            Ok(artifact)
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "failed to cache synthesized audio");
            Ok(AudioArtifact::in_memory(key.clone(), bytes))
        }
    }
}

async fn wait(mut pending: Pending) -> SynthesisOutcome {
    let outcome = match pending.wait_for(Option::is_some).await {
        Ok(value) => value.clone(),
        Err(_) => None,
    };
    outcome.unwrap_or_else(|| {
        Err(Arc::new(Error::Service(
            "synthesis task ended without a result".to_string(),
        )))
    })
}
