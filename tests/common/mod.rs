//! Shared test utilities

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tidesense_voice::voice::{
    ArtifactLocation, ArtifactStore, AudioArtifact, AudioOutput, AudioSource, ContentKey,
    DeviceSpeechHandle, FsArtifactStore, HandleStatus, PlaybackHandle, SpeechFallback,
    SpeechSynthesizer,
};
use tidesense_voice::{
    CacheOrchestrator, Error, PlaybackController, PlaybackSnapshot, PlaybackState, Result,
};
use tokio::sync::watch;

/// Fake MP3 payload returned by the mock synthesizer
pub const AUDIO: &[u8] = b"ID3 synthesized guidance";

/// How the mock synthesizer answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Succeed,
    Unconfigured,
    RateLimited,
    ServiceError,
    Panic,
}

/// Counting synthesizer with a switchable outcome
pub struct MockSynthesizer {
    calls: AtomicUsize,
    mode: Mutex<Mode>,
    delay: Duration,
}

impl MockSynthesizer {
    pub fn new(mode: Mode) -> Arc<Self> {
        Self::with_delay(mode, Duration::ZERO)
    }

    pub fn with_delay(mode: Mode, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            mode: Mutex::new(mode),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mode = *self.mode.lock().unwrap();
        match mode {
            Mode::Succeed => Ok(AUDIO.to_vec()),
            Mode::Unconfigured => Err(Error::Unconfigured("no key".to_string())),
            Mode::RateLimited => Err(Error::RateLimited("429".to_string())),
            Mode::ServiceError => Err(Error::Service("500".to_string())),
            Mode::Panic => panic!("synthesizer crashed"),
        }
    }

    fn is_configured(&self) -> bool {
        *self.mode.lock().unwrap() != Mode::Unconfigured
    }
}

/// Local speech that is either present or missing
pub struct MockSpeech {
    calls: AtomicUsize,
    available: AtomicBool,
}

impl MockSpeech {
    pub fn new(available: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            available: AtomicBool::new(available),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechFallback for MockSpeech {
    async fn speak(&self, text: &str) -> Result<DeviceSpeechHandle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.is_available() {
            Ok(DeviceSpeechHandle::new("mock-speech", text, 175))
        } else {
            Err(Error::Playback("no speech engine".to_string()))
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// Store whose writes always fail
pub struct ReadOnlyStore;

#[async_trait]
impl ArtifactStore for ReadOnlyStore {
    async fn get(&self, _key: &ContentKey) -> Result<Option<AudioArtifact>> {
        Ok(None)
    }

    async fn put(&self, _key: &ContentKey, _bytes: &[u8]) -> Result<AudioArtifact> {
        Err(Error::Storage("read-only filesystem".to_string()))
    }
}

/// State behind a [`ManualHandle`], driven by the test
#[derive(Debug, Default)]
pub struct ManualState {
    pub position_ms: u64,
    pub duration_ms: u64,
    pub playing: bool,
    pub stopped: bool,
    pub finished: bool,
    pub failure: Option<String>,
    pub plays: usize,
    pub pauses: usize,
}

/// Playback handle that only moves when the test moves it
pub struct ManualHandle(Arc<Mutex<ManualState>>);

impl PlaybackHandle for ManualHandle {
    fn play(&mut self) -> Result<()> {
        let mut s = self.0.lock().unwrap();
        s.playing = true;
        s.plays += 1;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut s = self.0.lock().unwrap();
        s.playing = false;
        s.pauses += 1;
        Ok(())
    }

    fn stop(&mut self) {
        let mut s = self.0.lock().unwrap();
        s.playing = false;
        s.stopped = true;
    }

    fn position_ms(&self) -> u64 {
        self.0.lock().unwrap().position_ms
    }

    fn duration_ms(&self) -> u64 {
        self.0.lock().unwrap().duration_ms
    }

    fn status(&mut self) -> HandleStatus {
        let s = self.0.lock().unwrap();
        if let Some(msg) = &s.failure {
            HandleStatus::Failed(msg.clone())
        } else if s.finished {
            HandleStatus::Finished
        } else if s.playing {
            HandleStatus::Playing
        } else {
            HandleStatus::Paused
        }
    }
}

/// Output that hands out [`ManualHandle`]s and remembers them
#[derive(Default)]
pub struct MockOutput {
    opened: Mutex<Vec<(AudioSource, Arc<Mutex<ManualState>>)>>,
    fail_open: AtomicBool,
    evict_before_open: AtomicBool,
}

impl MockOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Delete the next stored artifact just before reading it
    pub fn evict_before_next_open(&self) {
        self.evict_before_open.store(true, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    /// State of the n-th opened handle
    pub fn handle(&self, index: usize) -> Arc<Mutex<ManualState>> {
        Arc::clone(&self.opened.lock().unwrap()[index].1)
    }

    /// Source of the n-th opened handle
    pub fn source(&self, index: usize) -> AudioSource {
        self.opened.lock().unwrap()[index].0.clone()
    }

    pub fn last(&self) -> Arc<Mutex<ManualState>> {
        let opened = self.opened.lock().unwrap();
        Arc::clone(&opened.last().expect("nothing opened").1)
    }
}

#[async_trait]
impl AudioOutput for MockOutput {
    async fn open(&self, source: &AudioSource) -> Result<Box<dyn PlaybackHandle>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Playback("audio device busy".to_string()));
        }
        if let AudioSource::Artifact(artifact) = source {
            if let ArtifactLocation::File(path) = &artifact.location {
                if self.evict_before_open.swap(false, Ordering::SeqCst) {
                    std::fs::remove_file(path).unwrap();
                    artifact.read_bytes().await?;
                }
            }
        }
        let state = Arc::new(Mutex::new(ManualState {
            duration_ms: 1000,
            ..ManualState::default()
        }));
        self.opened
            .lock()
            .unwrap()
            .push((source.clone(), Arc::clone(&state)));
        Ok(Box::new(ManualHandle(state)))
    }
}

/// Orchestrator over a real store in `dir`
pub fn orchestrator(
    dir: &Path,
    synth: &Arc<MockSynthesizer>,
    speech: &Arc<MockSpeech>,
) -> (Arc<CacheOrchestrator>, Arc<FsArtifactStore>) {
    let store = Arc::new(FsArtifactStore::open(dir, None).expect("failed to open store"));
    let orchestrator = Arc::new(CacheOrchestrator::new(
        Arc::clone(&store) as _,
        Arc::clone(synth) as _,
        Arc::clone(speech) as _,
    ));
    (orchestrator, store)
}

/// Controller sampling every 10ms over a mock output
pub fn controller(
    orchestrator: Arc<CacheOrchestrator>,
    output: &Arc<MockOutput>,
) -> PlaybackController {
    PlaybackController::new(
        orchestrator,
        Arc::clone(output) as _,
        Duration::from_millis(10),
    )
}

/// Wait until a snapshot matches, failing after two seconds
pub async fn wait_until(
    updates: &mut watch::Receiver<PlaybackSnapshot>,
    predicate: impl FnMut(&PlaybackSnapshot) -> bool,
) -> PlaybackSnapshot {
    tokio::time::timeout(Duration::from_secs(2), updates.wait_for(predicate))
        .await
        .expect("timed out waiting for playback update")
        .expect("controller dropped")
        .clone()
}

/// Wait for a specific state
pub async fn wait_for_state(
    updates: &mut watch::Receiver<PlaybackSnapshot>,
    state: PlaybackState,
) -> PlaybackSnapshot {
    wait_until(updates, |s| s.state == state).await
}
