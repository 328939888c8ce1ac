//! TideSense voice guidance
//!
//! Speaks beach safety guidance aloud:
//! - Content-keyed cache of synthesized audio
//! - Remote TTS (ElevenLabs or `OpenAI`) with at most one call per message in flight
//! - Local speech fallback when the remote service is missing or failing
//! - Single-session playback state machine with progress updates
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                        UI                           │
//! │        request / toggle / stop  ·  subscribe        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Playback Controller                   │
//! │   Idle · Loading · Playing · Paused · Completed     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Cache Orchestrator                    │
//! │   Artifact Store  │  Remote TTS  │  Local Speech    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod service;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use service::{HealthReport, VoiceService};
pub use voice::{
    AudioSource, CacheOrchestrator, ContentKey, GuidanceText, PlaybackController,
    PlaybackSnapshot, PlaybackState, Resolution, ResolutionPath, derive_key,
};
