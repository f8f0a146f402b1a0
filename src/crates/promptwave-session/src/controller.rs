//! Playback session lifecycle
//!
//! Two locks guard the controller. The async `lifecycle` lock serializes
//! user transitions, including their network round trips. The `playback`
//! lock covers the scheduler, the open sink and the current state; it is
//! shared with the chunk pump and only ever held for short synchronous
//! sections. Every opened session gets a new generation number, and work
//! tagged with an older generation is dropped.

use crate::events::EventHub;
use crate::pump;
use crate::{
    Action, ControllerError, ControllerSettings, GenerationConfig, GenerationPrompt, MusicService,
    MusicSession, PlaybackState, Result, SessionError, StatusEvent,
};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use promptwave_audio::{
    clamp_gain, decode_chunk, AudioError, OutputDevice, OutputSink, PushOutcome, Scheduler,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// Point-in-time view of playback, for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub volume: f32,
    pub queued_blocks: usize,
    pub queued_seconds: f64,
    /// Start time the next block will be scheduled at
    pub cursor: f64,
    /// Output clock, when an output is open
    pub device_time: Option<f64>,
}

/// Drives one music session at a time from prompt to speakers
///
/// Cheap to clone; clones control the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    service: Arc<dyn MusicService>,
    device: Arc<dyn OutputDevice>,
    settings: ControllerSettings,
    lifecycle: AsyncMutex<Lifecycle>,
    playback: Mutex<Playback>,
    events: EventHub,
}

#[derive(Default)]
struct Lifecycle {
    session: Option<Box<dyn MusicSession>>,
    pump: Option<JoinHandle<()>>,
}

struct Playback {
    state: PlaybackState,
    scheduler: Scheduler,
    sink: Option<Box<dyn OutputSink>>,
    volume: f32,
    generation: u64,
}

impl Playback {
    fn schedule(&mut self) -> std::result::Result<usize, AudioError> {
        match self.sink.as_mut() {
            Some(sink) => self.scheduler.schedule(&mut **sink),
            None => Ok(0),
        }
    }

    fn device_time(&self) -> Option<f64> {
        self.sink.as_ref().map(|sink| sink.now())
    }

    /// Deactivate, drop the backlog and invalidate the running pump
    fn halt(&mut self) -> usize {
        let now = self.device_time().unwrap_or_else(|| self.scheduler.cursor());
        self.generation += 1;
        self.scheduler.reset(now)
    }
}

impl SessionController {
    pub fn new(
        service: Arc<dyn MusicService>,
        device: Arc<dyn OutputDevice>,
        settings: ControllerSettings,
    ) -> Self {
        let playback = Playback {
            state: PlaybackState::Idle,
            scheduler: Scheduler::new(settings.new_queue()),
            sink: None,
            volume: clamp_gain(settings.initial_volume),
            generation: 0,
        };
        SessionController {
            inner: Arc::new(Inner {
                service,
                device,
                events: EventHub::new(settings.event_capacity),
                settings,
                lifecycle: AsyncMutex::new(Lifecycle::default()),
                playback: Mutex::new(playback),
            }),
        }
    }

    /// Receive status events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.state()
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.inner.settings
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let playback = self.inner.playback.lock();
        let queue = playback.scheduler.queue();
        PlaybackSnapshot {
            state: playback.state,
            volume: playback.volume,
            queued_blocks: queue.len(),
            queued_seconds: queue.queued_duration(),
            cursor: playback.scheduler.cursor(),
            device_time: playback.device_time(),
        }
    }

    /// Open an output and a session for `prompt`, then start generating
    ///
    /// Allowed from `Idle`, and from `Stopped` after a full reset. On
    /// failure everything opened so far is closed and the state is `Idle`.
    pub async fn start(&self, prompt: GenerationPrompt, config: GenerationConfig) -> Result<()> {
        self.start_with_prompts(vec![prompt], config).await
    }

    /// Like [`start`](Self::start) with several weighted prompts
    pub async fn start_with_prompts(
        &self,
        prompts: Vec<GenerationPrompt>,
        config: GenerationConfig,
    ) -> Result<()> {
        let result = self.inner.start(prompts, config).await;
        self.inner.report(result)
    }

    /// Ask the service to pause and stop scheduling new audio
    ///
    /// Queued blocks are kept and play gaplessly after `resume`.
    pub async fn pause(&self) -> Result<()> {
        let result = self.inner.pause().await;
        self.inner.report(result)
    }

    pub async fn resume(&self) -> Result<()> {
        let result = self.inner.resume().await;
        self.inner.report(result)
    }

    /// Stop scheduling at once, then close the session and the output
    ///
    /// Safe to call in any state; a no-op when nothing is open. Cleanup
    /// always completes; the first cleanup failure is returned.
    pub async fn stop(&self) -> Result<()> {
        let result = self.inner.stop().await;
        self.inner.report(result)
    }

    /// Set the output gain; `level` must be in [0.0, 1.0]
    ///
    /// Never touches the queue, the schedule or the state.
    pub fn set_volume(&self, level: f32) -> Result<()> {
        let result = self.inner.set_volume(level);
        self.inner.report(result)
    }
}

impl Inner {
    fn state(&self) -> PlaybackState {
        self.playback.lock().state
    }

    fn check(&self, action: Action) -> Result<PlaybackState> {
        let from = self.state();
        if from.permits(action) {
            Ok(from)
        } else {
            Err(ControllerError::InvalidTransition { from, action })
        }
    }

    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.events.emit(StatusEvent::Error {
                message: err.to_string(),
            });
        }
        result
    }

    fn set_state(&self, to: PlaybackState) {
        let from = std::mem::replace(&mut self.playback.lock().state, to);
        if from != to {
            info!("Playback {} -> {}", from, to);
            self.events.emit(StatusEvent::StateChanged { from, to });
        }
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.playback.lock().generation == generation
    }

    async fn start(
        self: &Arc<Self>,
        prompts: Vec<GenerationPrompt>,
        config: GenerationConfig,
    ) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let from = self.check(Action::Start)?;

        if prompts.is_empty() {
            return Err(ControllerError::Config("Please enter a music prompt".to_string()));
        }
        for prompt in &prompts {
            prompt.validate()?;
        }
        config.validate()?;

        if from == PlaybackState::Stopped {
            self.set_state(PlaybackState::Idle);
        }

        self.events.emit(StatusEvent::Connecting {
            device: self.device.name(),
        });
        if let Err(err) = self.open(&mut lifecycle, &prompts, &config).await {
            error!("Failed to start session: {}", err);
            if let Err(cleanup) = self.teardown(&mut lifecycle, PlaybackState::Idle).await {
                warn!("Cleanup after failed start: {}", cleanup);
            }
            return Err(err);
        }
        Ok(())
    }

    async fn open(
        self: &Arc<Self>,
        lifecycle: &mut Lifecycle,
        prompts: &[GenerationPrompt],
        config: &GenerationConfig,
    ) -> Result<()> {
        let opening = self.playback.lock().generation;
        let device = Arc::clone(&self.device);
        let mut sink = tokio::task::spawn_blocking(move || device.open())
            .await
            .map_err(|e| AudioError::Device(format!("Output open task failed: {}", e)))??;

        let generation = {
            let mut playback = self.playback.lock();
            if playback.generation != opening {
                Err(sink)
            } else {
                sink.set_gain(playback.volume);
                let mut scheduler = Scheduler::new(self.settings.new_queue());
                scheduler.reset(sink.now());
                playback.scheduler = scheduler;
                playback.sink = Some(sink);
                playback.generation += 1;
                Ok(playback.generation)
            }
        };
        let generation = match generation {
            Ok(generation) => generation,
            Err(sink) => {
                // Stopped while the output was opening
                info!("Start abandoned before connecting");
                close_sink(sink).await?;
                self.set_state(PlaybackState::Stopped);
                return Ok(());
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = self.service.connect(events_tx).await?;
        lifecycle.pump = Some(tokio::spawn(pump::run(
            Arc::downgrade(self),
            generation,
            events_rx,
        )));
        let session = lifecycle.session.insert(session);

        info!(
            "Starting session {} with {} prompt(s), temperature {}, {} bpm",
            generation,
            prompts.len(),
            config.temperature,
            config.bpm
        );
        session.start(prompts, config).await?;

        let scheduled = {
            let mut playback = self.playback.lock();
            playback.scheduler.set_active(true);
            playback.schedule()
        };
        self.set_state(PlaybackState::Generating);
        scheduled?;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.check(Action::Pause)?;

        let paused = Self::session(&mut lifecycle)?.pause().await;
        if let Err(err) = paused {
            return Err(self.fail_locked(&mut lifecycle, err.into()).await);
        }

        let suspended = {
            let mut playback = self.playback.lock();
            playback.scheduler.set_active(false);
            match playback.sink.as_mut() {
                Some(sink) if self.settings.suspend_output_on_pause => sink.suspend(),
                _ => Ok(()),
            }
        };
        self.set_state(PlaybackState::Paused);
        if let Err(err) = suspended {
            return Err(self.fail_locked(&mut lifecycle, err.into()).await);
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.check(Action::Resume)?;

        let resumed = Self::session(&mut lifecycle)?.resume().await;
        if let Err(err) = resumed {
            return Err(self.fail_locked(&mut lifecycle, err.into()).await);
        }

        let scheduled = {
            let mut playback = self.playback.lock();
            let resumed = match playback.sink.as_mut() {
                Some(sink) if self.settings.suspend_output_on_pause => sink.resume(),
                _ => Ok(()),
            };
            playback.scheduler.set_active(true);
            resumed.and_then(|_| playback.schedule())
        };
        self.set_state(PlaybackState::Generating);
        if let Err(err) = scheduled {
            return Err(self.fail_locked(&mut lifecycle, err.into()).await);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // Silence new scheduling before waiting on any in-flight transition
        let dropped = self.playback.lock().halt();
        if dropped > 0 {
            debug!("Stop discarded {} queued blocks", dropped);
        }

        let mut lifecycle = self.lifecycle.lock().await;
        let has_sink = self.playback.lock().sink.is_some();
        if lifecycle.session.is_none() && !has_sink {
            return Ok(());
        }
        info!("Stopping session");
        self.teardown(&mut lifecycle, PlaybackState::Stopped).await
    }

    fn set_volume(&self, level: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&level) {
            return Err(ControllerError::Config(format!(
                "Volume must be between 0 and 1, got {}",
                level
            )));
        }
        {
            let mut playback = self.playback.lock();
            if !playback.state.permits(Action::SetVolume) {
                return Err(ControllerError::InvalidTransition {
                    from: playback.state,
                    action: Action::SetVolume,
                });
            }
            playback.volume = level;
            if let Some(sink) = playback.sink.as_mut() {
                sink.set_gain(level);
            }
        }
        self.events.emit(StatusEvent::VolumeChanged { level });
        Ok(())
    }

    fn session(lifecycle: &mut Lifecycle) -> Result<&mut Box<dyn MusicSession>> {
        lifecycle
            .session
            .as_mut()
            .ok_or_else(|| SessionError::new("No open session").into())
    }

    /// Decode one chunk from the current session and schedule it
    ///
    /// Malformed chunks are dropped with a warning. Only output failures
    /// are returned.
    pub(crate) fn accept_chunk(
        &self,
        generation: u64,
        data: &str,
    ) -> std::result::Result<(), AudioError> {
        let block = match decode_chunk(data) {
            Ok(block) => block,
            Err(err) => {
                warn!("Dropping malformed chunk: {}", err);
                self.events.emit(StatusEvent::Warning {
                    message: format!("Dropped malformed audio chunk: {}", err),
                });
                return Ok(());
            }
        };

        let (outcome, scheduled) = {
            let mut playback = self.playback.lock();
            if playback.generation != generation {
                return Ok(());
            }
            let outcome = playback.scheduler.enqueue(block);
            (outcome, playback.schedule())
        };

        match outcome {
            PushOutcome::Queued => {}
            PushOutcome::DroppedOldest(dropped) => {
                warn!("Playback queue full, dropped oldest block ({:.3}s)", dropped.duration());
                self.events.emit(StatusEvent::Warning {
                    message: format!(
                        "Playback queue full, skipped {:.2}s of audio",
                        dropped.duration()
                    ),
                });
            }
            PushOutcome::Rejected(rejected) => {
                warn!("Playback queue full, rejected block ({:.3}s)", rejected.duration());
                self.events.emit(StatusEvent::Warning {
                    message: format!(
                        "Playback queue full, skipped {:.2}s of audio",
                        rejected.duration()
                    ),
                });
            }
        }
        scheduled.map(|_| ())
    }

    /// Tear down after the current session failed outside a user call
    pub(crate) async fn fail_session(self: Arc<Self>, generation: u64, err: ControllerError) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !self.is_current(generation) {
            debug!("Ignoring failure from finished session {}: {}", generation, err);
            return;
        }
        error!("Session {} failed: {}", generation, err);
        self.events.emit(StatusEvent::Error {
            message: err.to_string(),
        });
        if let Err(cleanup) = self.teardown(&mut lifecycle, PlaybackState::Stopped).await {
            warn!("Cleanup after session failure: {}", cleanup);
        }
    }

    async fn fail_locked(
        &self,
        lifecycle: &mut Lifecycle,
        err: ControllerError,
    ) -> ControllerError {
        error!("{}", err);
        if let Err(cleanup) = self.teardown(lifecycle, PlaybackState::Stopped).await {
            warn!("Cleanup after failure: {}", cleanup);
        }
        err
    }

    /// Close everything and land in `target`, whatever fails on the way
    async fn teardown(&self, lifecycle: &mut Lifecycle, target: PlaybackState) -> Result<()> {
        if let Some(pump) = lifecycle.pump.take() {
            pump.abort();
        }
        let dropped = self.playback.lock().halt();
        if dropped > 0 {
            debug!("Teardown discarded {} queued blocks", dropped);
        }

        let mut first_error: Option<ControllerError> = None;
        if let Some(mut session) = lifecycle.session.take() {
            if let Err(err) = session.stop().await {
                warn!("Failed to stop session: {}", err);
                first_error.get_or_insert(err.into());
            }
            if let Err(err) = session.close().await {
                warn!("Failed to close session: {}", err);
                first_error.get_or_insert(err.into());
            }
        }

        let sink = self.playback.lock().sink.take();
        if let Some(sink) = sink {
            if let Err(err) = close_sink(sink).await {
                warn!("Failed to close output: {}", err);
                first_error.get_or_insert(err.into());
            }
        }

        self.playback.lock().scheduler = Scheduler::new(self.settings.new_queue());
        self.set_state(target);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Close an output off the async workers; closing may join a device thread
async fn close_sink(mut sink: Box<dyn OutputSink>) -> std::result::Result<(), AudioError> {
    tokio::task::spawn_blocking(move || sink.close())
        .await
        .map_err(|e| AudioError::Device(format!("Output close task failed: {}", e)))?
}
