//! Voice guidance module
//!
//! Resolves guidance text to audio through the artifact cache, remote
//! synthesis, or local speech, and plays it under a single-session
//! state machine.

mod controller;
mod fallback;
mod key;
mod orchestrator;
mod playback;
mod store;
mod tts;

pub use controller::{PlaybackController, PlaybackSnapshot, PlaybackState};
pub use fallback::{DeviceSpeechHandle, SpeechFallback, SystemSpeech, estimate_duration_ms};
pub use key::{ContentKey, GuidanceText, KEY_LEN, derive_key, normalize};
pub use orchestrator::{AudioSource, CacheOrchestrator, Resolution, ResolutionPath, SourceKind};
pub use playback::{
    AudioOutput, DecodedAudio, HandleStatus, PlaybackHandle, SpeakerOutput, decode_mp3,
};
pub use store::{
    ArtifactLocation, ArtifactStore, AudioArtifact, CacheStats, EvictionReport, FsArtifactStore,
};
pub use tts::{SpeechSynthesizer, TextToSpeech, classify_status};
