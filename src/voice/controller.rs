//! Playback state machine
//!
//! ```text
//! Idle ─request─▶ Loading ─▶ Playing ⇄ Paused
//!                              │
//!                              ▼
//!                          Completed        (any state) ─▶ Failed
//! ```
//!
//! Exactly one session exists at a time. A new request tears down the
//! previous one; a request for the text already playing toggles pause.
//! Observers subscribe to [`PlaybackSnapshot`] updates, published on every
//! transition and at the progress interval while playing.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;

use super::key::{ContentKey, GuidanceText};
use super::orchestrator::{CacheOrchestrator, SourceKind};
use super::playback::{AudioOutput, HandleStatus, PlaybackHandle};
use crate::{Error, Result};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Completed,
    Failed,
}

impl PlaybackState {
    /// Playing or paused
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

/// What observers see
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub key: Option<ContentKey>,
    pub source: Option<SourceKind>,
    pub error: Option<String>,
}

#[derive(Default)]
struct Session {
    /// Bumped whenever a session is replaced or stopped
    generation: u64,
    state: PlaybackState,
    key: Option<ContentKey>,
    source: Option<SourceKind>,
    handle: Option<Box<dyn PlaybackHandle>>,
    position_ms: u64,
    duration_ms: u64,
    error: Option<String>,
}

impl Session {
    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: self.state,
            position_ms: self.position_ms,
            duration_ms: self.duration_ms,
            key: self.key.clone(),
            source: self.source,
            error: self.error.clone(),
        }
    }

    /// Silence and forget the current session
    fn teardown(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
        }
        self.generation += 1;
        self.state = PlaybackState::Idle;
        self.key = None;
        self.source = None;
        self.position_ms = 0;
        self.duration_ms = 0;
        self.error = None;
    }

    fn fail(&mut self, error: &Error) {
        tracing::error!(key = ?self.key, error = %error, "playback failed");
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
        }
        self.state = PlaybackState::Failed;
        self.error = Some(error.to_string());
    }

    fn complete(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
        }
        self.state = PlaybackState::Completed;
        self.position_ms = self.duration_ms;
        tracing::debug!(key = ?self.key, "playback completed");
    }

    /// Flip between playing and paused
    fn toggle(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        let result = match self.state {
            PlaybackState::Playing => handle.pause().map(|()| PlaybackState::Paused),
            PlaybackState::Paused => handle.play().map(|()| PlaybackState::Playing),
            _ => return,
        };
        match result {
            Ok(state) => {
                self.position_ms = handle.position_ms();
                self.state = state;
            }
            Err(e) => self.fail(&e),
        }
    }
}

struct Shared {
    orchestrator: Arc<CacheOrchestrator>,
    output: Arc<dyn AudioOutput>,
    progress_interval: Duration,
    session: Mutex<Session>,
    updates: watch::Sender<PlaybackSnapshot>,
}

impl Shared {
    fn publish(&self, session: &Session) -> PlaybackSnapshot {
        let snapshot = session.snapshot();
        self.updates.send_replace(snapshot.clone());
        snapshot
    }
}

/// Drives playback of resolved guidance
pub struct PlaybackController {
    shared: Arc<Shared>,
}

impl PlaybackController {
    /// Create a controller publishing progress every `progress_interval`
    #[must_use]
    pub fn new(
        orchestrator: Arc<CacheOrchestrator>,
        output: Arc<dyn AudioOutput>,
        progress_interval: Duration,
    ) -> Self {
        let (updates, _) = watch::channel(PlaybackSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                orchestrator,
                output,
                progress_interval,
                session: Mutex::new(Session::default()),
                updates,
            }),
        }
    }

    /// Subscribe to state and progress updates
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.shared.updates.subscribe()
    }

    /// Latest published snapshot
    #[must_use]
    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.shared.updates.borrow().clone()
    }

    /// Play `text`, or toggle pause if it is already the active session
    ///
    /// Playback failures do not error; they land in `PlaybackState::Failed`.
    /// Artifacts resume where they paused. Device speech cannot seek, so a
    /// resumed utterance starts over and its position restarts at zero.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyText` for blank input, leaving the current
    /// session untouched
    pub async fn request(&self, text: &str) -> Result<PlaybackSnapshot> {
        let guidance = GuidanceText::new(text)?;
        let key = guidance.key().clone();

        let generation = {
            let mut session = self.shared.session.lock().await;
            if session.state.is_active() && session.key.as_ref() == Some(&key) {
                session.toggle();
                return Ok(self.shared.publish(&session));
            }

            session.teardown();
            session.key = Some(key.clone());
            session.state = PlaybackState::Loading;
            self.shared.publish(&session);
            tracing::debug!(key = %key, "playback loading");
            session.generation
        };

        let opened = self.load(&guidance).await;

        let mut session = self.shared.session.lock().await;
        if session.generation != generation {
            // Superseded while loading
            if let Ok((_, mut handle)) = opened {
                handle.stop();
            }
            tracing::debug!(key = %key, "discarding superseded playback");
            return Ok(session.snapshot());
        }

        match opened {
            Ok((kind, mut handle)) => match handle.play() {
                Ok(()) => {
                    session.source = Some(kind);
                    session.duration_ms = handle.duration_ms();
                    session.position_ms = handle.position_ms();
                    session.handle = Some(handle);
                    session.state = PlaybackState::Playing;
                    tracing::info!(key = %key, source = ?kind, "playback started");
                    spawn_sampler(Arc::downgrade(&self.shared), generation);
                }
                Err(e) => {
                    session.source = Some(kind);
                    session.fail(&e);
                }
            },
            Err(e) => session.fail(&e),
        }

        Ok(self.shared.publish(&session))
    }

    /// Resolve and open `guidance` on the output
    ///
    /// An artifact that vanishes between resolve and open (evicted by a
    /// concurrent write) is resolved once more instead of failing.
    async fn load(
        &self,
        guidance: &GuidanceText,
    ) -> Result<(SourceKind, Box<dyn PlaybackHandle>)> {
        let orchestrator = &self.shared.orchestrator;
        let output = &self.shared.output;

        let source = orchestrator.resolve_playable_audio(guidance.as_str()).await?;
        match output.open(&source).await {
            Ok(handle) => Ok((source.kind(), handle)),
            Err(Error::Storage(e)) if source.kind() == SourceKind::Artifact => {
                tracing::warn!(
                    key = %guidance.key(),
                    error = %e,
                    "cached audio unreadable, resolving again"
                );
                let source = orchestrator.resolve_playable_audio(guidance.as_str()).await?;
                let handle = output.open(&source).await?;
                Ok((source.kind(), handle))
            }
            Err(e) => Err(e),
        }
    }

    /// Pause or resume the active session; no-op otherwise
    pub async fn toggle(&self) -> PlaybackSnapshot {
        let mut session = self.shared.session.lock().await;
        session.toggle();
        self.shared.publish(&session)
    }

    /// End any session and return to `Idle`
    pub async fn stop(&self) -> PlaybackSnapshot {
        let mut session = self.shared.session.lock().await;
        if session.key.is_some() {
            tracing::debug!(key = ?session.key, "playback stopped");
        }
        session.teardown();
        self.shared.publish(&session)
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if let Ok(mut session) = self.shared.session.try_lock() {
            session.teardown();
        }
    }
}

/// Sample progress for one session until it ends or is replaced
fn spawn_sampler(shared: Weak<Shared>, generation: u64) {
    let Some(interval) = shared.upgrade().map(|s| s.progress_interval) else {
        return;
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            let mut session = shared.session.lock().await;
            if session.generation != generation {
                break;
            }
            match session.state {
                PlaybackState::Playing => {}
                PlaybackState::Paused => continue,
                _ => break,
            }
            let Some(handle) = session.handle.as_mut() else {
                break;
            };

            let status = handle.status();
            let duration = handle.duration_ms();
            let position = handle.position_ms().min(duration);
            session.duration_ms = duration;
            session.position_ms = position;

            match status {
                HandleStatus::Failed(msg) => session.fail(&Error::Playback(msg)),
                HandleStatus::Finished => session.complete(),
                _ if duration > 0 && position >= duration => session.complete(),
                _ => {}
            }

            shared.publish(&session);
            if !session.state.is_active() {
                break;
            }
        }
    });
}
