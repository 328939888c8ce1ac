//! Audio output for resolved guidance
//!
//! Artifacts are decoded from MP3 and played on the default output device.
//! Device speech runs the local speech program as a child process.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use super::fallback::DeviceSpeechHandle;
use super::orchestrator::AudioSource;
use crate::{Error, Result};

/// What an active handle is doing right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleStatus {
    Playing,
    Paused,
    Finished,
    Failed(String),
}

/// One opened source, ready to play
///
/// Dropping a handle must silence it.
pub trait PlaybackHandle: Send {
    /// Start or resume
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if the device refuses
    fn play(&mut self) -> Result<()>;

    /// Pause, keeping the position where supported
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if the device refuses
    fn pause(&mut self) -> Result<()>;

    /// Stop for good
    fn stop(&mut self);

    fn position_ms(&self) -> u64;

    fn duration_ms(&self) -> u64;

    fn status(&mut self) -> HandleStatus;
}

/// Opens sources on an output device
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Prepare `source` for playback without starting it
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` or `Error::Storage` if the source cannot be opened
    async fn open(&self, source: &AudioSource) -> Result<Box<dyn PlaybackHandle>>;
}

/// Default output device plus the local speech program
#[derive(Debug, Default, Clone, Copy)]
pub struct SpeakerOutput;

#[async_trait]
impl AudioOutput for SpeakerOutput {
    async fn open(&self, source: &AudioSource) -> Result<Box<dyn PlaybackHandle>> {
        match source {
            AudioSource::Artifact(artifact) => {
                let bytes = artifact.read_bytes().await?;
                let decoded = tokio::task::spawn_blocking(move || decode_mp3(&bytes))
                    .await
                    .map_err(|e| Error::Playback(format!("decode task failed: {e}")))??;
                let handle = StreamHandle::start(decoded).await?;
                Ok(Box::new(handle))
            }
            AudioSource::Device(speech) => Ok(Box::new(SpeechProcess::new(speech.clone()))),
        }
    }
}

/// Decoded mono PCM
#[derive(Debug)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    fn ms_at(&self, frames: usize) -> u64 {
        frames as u64 * 1000 / u64::from(self.sample_rate.max(1))
    }
}

/// State shared with the output callback
#[derive(Debug, Default)]
struct StreamState {
    position: AtomicUsize,
    paused: AtomicBool,
    error: Mutex<Option<String>>,
}

/// Artifact playing on the output device
///
/// The cpal stream is not `Send`, so it lives on its own thread until
/// the stop channel fires or the handle is dropped.
struct StreamHandle {
    audio: Arc<DecodedAudio>,
    state: Arc<StreamState>,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl StreamHandle {
    async fn start(audio: DecodedAudio) -> Result<Self> {
        let audio = Arc::new(audio);
        let state = Arc::new(StreamState {
            paused: AtomicBool::new(true),
            ..StreamState::default()
        });
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<()>>();

        let thread_audio = Arc::clone(&audio);
        let thread_state = Arc::clone(&state);
        std::thread::Builder::new()
            .name("tidesense-playback".to_string())
            .spawn(move || {
                let stream = match open_stream(thread_audio, thread_state) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Either an explicit stop or the handle being dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| Error::Playback(format!("failed to spawn playback thread: {e}")))?;

        ready_rx
            .await
            .map_err(|_| Error::Playback("playback thread exited".to_string()))??;

        tracing::debug!(
            sample_rate = audio.sample_rate,
            samples = audio.samples.len(),
            "audio stream ready"
        );

        Ok(Self {
            audio,
            state,
            stop_tx: Some(stop_tx),
        })
    }
}

impl PlaybackHandle for StreamHandle {
    fn play(&mut self) -> Result<()> {
        if self.stop_tx.is_none() {
            return Err(Error::Playback("stream already stopped".to_string()));
        }
        self.state.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.state.paused.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.paused.store(true, Ordering::Relaxed);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    fn position_ms(&self) -> u64 {
        self.audio.ms_at(self.state.position.load(Ordering::Relaxed))
    }

    fn duration_ms(&self) -> u64 {
        self.audio.ms_at(self.audio.samples.len())
    }

    fn status(&mut self) -> HandleStatus {
        if let Some(err) = self.state.error.lock().ok().and_then(|e| e.clone()) {
            return HandleStatus::Failed(err);
        }
        if self.state.position.load(Ordering::Relaxed) >= self.audio.samples.len() {
            HandleStatus::Finished
        } else if self.state.paused.load(Ordering::Relaxed) {
            HandleStatus::Paused
        } else {
            HandleStatus::Playing
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build and start an output stream that reads from `audio`
fn open_stream(audio: Arc<DecodedAudio>, state: Arc<StreamState>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

    let config = output_config(&device, audio.sample_rate)?;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = audio.sample_rate,
        channels,
        "opening audio output"
    );

    let error_state = Arc::clone(&state);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if state.paused.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }

                let samples = &audio.samples;
                let mut pos = state.position.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let sample = samples.get(pos).copied().unwrap_or(0.0);
                    frame.fill(sample);
                    if pos < samples.len() {
                        pos += 1;
                    }
                }
                state.position.store(pos, Ordering::Relaxed);
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                if let Ok(mut slot) = error_state.error.lock() {
                    *slot = Some(err.to_string());
                }
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;
    Ok(stream)
}

/// Pick a mono (or stereo) output config at `sample_rate`
fn output_config(device: &Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
    };

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .find(|c| supports(c, 1))
        .or_else(|| {
            // Fallback: try stereo
            device
                .supported_output_configs()
                .ok()?
                .find(|c| supports(c, 2))
        })
        .ok_or_else(|| {
            Error::Playback(format!("no output config supports {sample_rate} Hz"))
        })?;

    Ok(supported.with_sample_rate(rate).config())
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns `Error::Playback` if the bytes are not decodable MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                }

                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::Playback("no audio frames in artifact".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Local speech program run as a child process
///
/// Pausing stops the process; resuming speaks the utterance again from the
/// start, since speech programs cannot seek.
struct SpeechProcess {
    speech: DeviceSpeechHandle,
    child: Option<tokio::process::Child>,
    started: Option<Instant>,
    paused_at: Option<Duration>,
    done: Option<HandleStatus>,
}

impl SpeechProcess {
    const fn new(speech: DeviceSpeechHandle) -> Self {
        Self {
            speech,
            child: None,
            started: None,
            paused_at: None,
            done: None,
        }
    }

    fn elapsed(&self) -> Duration {
        self.paused_at
            .or_else(|| self.started.as_ref().map(Instant::elapsed))
            .unwrap_or_default()
    }
}

impl PlaybackHandle for SpeechProcess {
    fn play(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        let child = tokio::process::Command::new(&self.speech.program)
            .args(self.speech.args())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Playback(format!(
                    "failed to start {}: {e}",
                    self.speech.program.display()
                ))
            })?;

        self.child = Some(child);
        self.started = Some(Instant::now());
        self.paused_at = None;
        self.done = None;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.paused_at = Some(self.elapsed());
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }

    fn position_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX);
        if matches!(self.done, Some(HandleStatus::Finished)) {
            self.duration_ms()
        } else {
            // Estimated; never claim completion before the process exits
            elapsed.min(self.duration_ms().saturating_sub(1))
        }
    }

    fn duration_ms(&self) -> u64 {
        self.speech.estimated_duration_ms
    }

    fn status(&mut self) -> HandleStatus {
        if let Some(done) = &self.done {
            return done.clone();
        }
        let Some(child) = self.child.as_mut() else {
            return HandleStatus::Paused;
        };

        let status = match child.try_wait() {
            Ok(None) => return HandleStatus::Playing,
            Ok(Some(exit)) if exit.success() => HandleStatus::Finished,
            Ok(Some(exit)) => HandleStatus::Failed(format!("speech program exited with {exit}")),
            Err(e) => HandleStatus::Failed(format!("speech program wait failed: {e}")),
        };
        self.child = None;
        self.done = Some(status.clone());
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_mp3(b"definitely not an mp3"),
            Err(Error::Playback(_))
        ));
    }

    #[test]
    fn decoded_duration() {
        let audio = DecodedAudio {
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
        };
        assert_eq!(audio.ms_at(audio.samples.len()), 1000);
        assert_eq!(audio.ms_at(12_000), 500);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn speech_process_runs_to_completion() {
        // `true` ignores its arguments and exits 0
        let Ok(program) = which::which("true") else {
            return;
        };
        let mut handle = SpeechProcess::new(DeviceSpeechHandle::new(program, "Stay calm", 175));
        assert_eq!(handle.status(), HandleStatus::Paused);

        handle.play().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.status() == HandleStatus::Playing && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(handle.status(), HandleStatus::Finished);
        assert_eq!(handle.position_ms(), handle.duration_ms());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn speech_process_reports_failure_exit() {
        let Ok(program) = which::which("false") else {
            return;
        };
        let mut handle = SpeechProcess::new(DeviceSpeechHandle::new(program, "Stay calm", 175));
        handle.play().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.status() == HandleStatus::Playing && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(handle.status(), HandleStatus::Failed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn speech_process_resume_starts_over() {
        // `sleep 5` stands in for a long utterance
        let Ok(program) = which::which("sleep") else {
            return;
        };
        let mut handle = SpeechProcess::new(DeviceSpeechHandle::new(program, "5", 175));

        handle.play().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.pause().unwrap();
        let paused_at = handle.position_ms();
        assert!(paused_at >= 100);
        assert_eq!(handle.status(), HandleStatus::Paused);

        // Frozen while paused
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.position_ms(), paused_at);

        handle.play().unwrap();
        assert_eq!(handle.status(), HandleStatus::Playing);
        assert!(handle.position_ms() < paused_at);
        handle.stop();
    }

    #[tokio::test]
    async fn missing_program_fails_to_play() {
        let mut handle = SpeechProcess::new(DeviceSpeechHandle::new(
            "/nonexistent/tidesense-speech",
            "Stay calm",
            175,
        ));
        assert!(matches!(handle.play(), Err(Error::Playback(_))));
    }
}
