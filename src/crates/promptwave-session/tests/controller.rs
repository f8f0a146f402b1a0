use async_trait::async_trait;
use parking_lot::Mutex;
use promptwave_audio::{
    encode_chunk, MemoryDevice, OutputDevice, OutputSink, OverflowPolicy, RenderRecord, SAMPLE_RATE,
};
use promptwave_session::{
    Action, ControllerError, ControllerSettings, GenerationConfig, GenerationPrompt, MusicService,
    MusicSession, PlaybackState, SessionController, SessionError, SessionEvent, SessionEvents,
    StatusEvent,
};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

const EPS: f64 = 1e-9;

#[derive(Default)]
struct Script {
    calls: Vec<String>,
    sender: Option<SessionEvents>,
    prompts: Vec<GenerationPrompt>,
    config: Option<GenerationConfig>,
    fail_connect: bool,
    fail_start: bool,
    fail_pause: bool,
    fail_resume: bool,
    fail_stop: bool,
    chunks_on_start: Vec<String>,
    start_gate: Option<Arc<Notify>>,
}

/// Music service driven by the test through shared state
#[derive(Clone, Default)]
struct FakeService {
    script: Arc<Mutex<Script>>,
}

struct FakeSession {
    script: Arc<Mutex<Script>>,
}

impl FakeService {
    fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    fn send(&self, event: SessionEvent) {
        let sender = self.script.lock().sender.clone();
        if let Some(sender) = sender {
            let _ = sender.send(event);
        }
    }

    fn send_chunk(&self, frames: usize, marker: i16) {
        self.send(SessionEvent::Chunk(chunk(frames, marker)));
    }
}

#[async_trait]
impl MusicService for FakeService {
    async fn connect(&self, events: SessionEvents) -> Result<Box<dyn MusicSession>, SessionError> {
        let mut script = self.script.lock();
        script.calls.push("connect".to_string());
        if script.fail_connect {
            return Err(SessionError::new("connection refused"));
        }
        script.sender = Some(events);
        Ok(Box::new(FakeSession {
            script: Arc::clone(&self.script),
        }))
    }
}

#[async_trait]
impl MusicSession for FakeSession {
    async fn start(
        &mut self,
        prompts: &[GenerationPrompt],
        config: &GenerationConfig,
    ) -> Result<(), SessionError> {
        let gate = {
            let mut guard = self.script.lock();
            let script = &mut *guard;
            script.calls.push("start".to_string());
            script.prompts = prompts.to_vec();
            script.config = Some(*config);
            if let Some(sender) = &script.sender {
                for data in script.chunks_on_start.drain(..) {
                    let _ = sender.send(SessionEvent::Chunk(data));
                }
            }
            if script.fail_start {
                return Err(SessionError::new("prompt rejected"));
            }
            script.start_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), SessionError> {
        let mut script = self.script.lock();
        script.calls.push("pause".to_string());
        if script.fail_pause {
            return Err(SessionError::new("pause not acknowledged"));
        }
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), SessionError> {
        let mut script = self.script.lock();
        script.calls.push("resume".to_string());
        if script.fail_resume {
            return Err(SessionError::new("resume not acknowledged"));
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        let mut script = self.script.lock();
        script.calls.push("stop".to_string());
        if script.fail_stop {
            return Err(SessionError::new("stop not acknowledged"));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let mut script = self.script.lock();
        script.calls.push("close".to_string());
        script.sender = None;
        Ok(())
    }
}

/// Output device whose `open` blocks until the test releases it
struct GatedDevice {
    inner: MemoryDevice,
    entered: Arc<AtomicBool>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl OutputDevice for GatedDevice {
    fn open(&self) -> promptwave_audio::Result<Box<dyn OutputSink>> {
        self.entered.store(true, Ordering::SeqCst);
        let _ = self.release.lock().recv();
        self.inner.open()
    }

    fn name(&self) -> String {
        self.inner.name()
    }
}

fn chunk(frames: usize, marker: i16) -> String {
    encode_chunk(&vec![marker; frames * 2])
}

fn marker_of(record: &RenderRecord) -> i16 {
    (record.first_frame.0 * 32768.0).round() as i16
}

fn secs(frames: usize) -> f64 {
    frames as f64 / SAMPLE_RATE as f64
}

fn setup(settings: ControllerSettings) -> (SessionController, FakeService, MemoryDevice) {
    let service = FakeService::default();
    let device = MemoryDevice::manual();
    let controller = SessionController::new(
        Arc::new(service.clone()),
        Arc::new(device.clone()),
        settings,
    );
    (controller, service, device)
}

fn prompt() -> GenerationPrompt {
    GenerationPrompt::new("warm analog synthwave")
}

/// Let spawned tasks run until `done` holds
async fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn drain(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_chunks_play_back_to_back_in_arrival_order() {
    let (controller, service, device) = setup(ControllerSettings::default());
    let mut events = controller.subscribe();

    let config = GenerationConfig { temperature: 1.4, bpm: 96 };
    controller.start(prompt(), config).await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Generating);
    assert_eq!(service.calls(), vec!["connect", "start"]);
    assert_eq!(service.script.lock().config, Some(config));
    assert_eq!(service.script.lock().prompts, vec![prompt()]);

    service.send_chunk(4_410, 1);
    service.send_chunk(8_820, 2);
    service.send_chunk(2_205, 3);
    wait_for(|| device.log().renders.len() == 3).await;

    let renders = device.log().renders;
    assert_eq!(renders.iter().map(marker_of).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(renders[0].start_time.abs() < EPS);
    assert!((renders[1].start_time - 0.1).abs() < EPS);
    assert!((renders[2].start_time - 0.3).abs() < EPS);
    assert!(renders.iter().all(|r| r.sink_id == 1));

    let events = drain(&mut events);
    assert!(matches!(events[0], StatusEvent::Connecting { .. }));
    assert!(events.contains(&StatusEvent::StateChanged {
        from: PlaybackState::Idle,
        to: PlaybackState::Generating,
    }));
}

#[tokio::test]
async fn test_chunks_arriving_during_start_are_played_first() {
    let (controller, service, device) = setup(ControllerSettings::default());
    service.script.lock().chunks_on_start = vec![chunk(441, 7), chunk(441, 8)];

    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    service.send_chunk(441, 9);
    wait_for(|| device.log().renders.len() == 3).await;

    let renders = device.log().renders;
    assert_eq!(renders.iter().map(marker_of).collect::<Vec<_>>(), vec![7, 8, 9]);
    for pair in renders.windows(2) {
        assert!((pair[1].start_time - (pair[0].start_time + pair[0].duration)).abs() < EPS);
    }
}

#[tokio::test]
async fn test_late_chunk_starts_at_device_clock() {
    let (controller, service, device) = setup(ControllerSettings::default());
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();

    service.send_chunk(4_410, 1);
    wait_for(|| device.log().renders.len() == 1).await;

    device.advance(2.0);
    service.send_chunk(4_410, 2);
    wait_for(|| device.log().renders.len() == 2).await;

    let renders = device.log().renders;
    let late = &renders[1];
    assert!((late.start_time - 2.0).abs() < EPS);
}

#[tokio::test]
async fn test_pause_keeps_backlog_for_resume() {
    let (controller, service, device) = setup(ControllerSettings::default());
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    controller.pause().await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Paused);

    service.send_chunk(4_410, 1);
    service.send_chunk(4_410, 2);
    wait_for(|| controller.snapshot().queued_blocks == 2).await;
    assert!(device.log().renders.is_empty());
    assert!((controller.snapshot().queued_seconds - 0.2).abs() < EPS);

    device.advance(5.0);
    controller.resume().await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Generating);

    let renders = device.log().renders;
    assert_eq!(renders.len(), 2);
    assert!((renders[0].start_time - 5.0).abs() < EPS);
    assert!((renders[1].start_time - 5.1).abs() < EPS);
    assert_eq!(controller.snapshot().queued_blocks, 0);
    assert_eq!(service.calls(), vec!["connect", "start", "pause", "resume"]);
}

#[tokio::test]
async fn test_suspend_output_on_pause() {
    let settings = ControllerSettings {
        suspend_output_on_pause: true,
        ..ControllerSettings::default()
    };
    let (controller, _service, device) = setup(settings);
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();

    controller.pause().await.unwrap();
    device.advance(3.0);
    assert_eq!(device.log().suspends, 1);
    assert_eq!(controller.snapshot().device_time, Some(0.0));

    controller.resume().await.unwrap();
    assert_eq!(device.log().resumes, 1);
}

#[tokio::test]
async fn test_stop_clears_everything_and_restart_is_fresh() {
    let (controller, service, device) = setup(ControllerSettings::default());
    let mut events = controller.subscribe();
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    controller.pause().await.unwrap();

    service.send_chunk(4_410, 1);
    service.send_chunk(4_410, 2);
    wait_for(|| controller.snapshot().queued_blocks == 2).await;
    let old_sender = service.script.lock().sender.clone();

    controller.stop().await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Stopped);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.queued_blocks, 0);
    assert_eq!(snapshot.cursor, 0.0);
    assert_eq!(snapshot.device_time, None);
    assert_eq!(device.log().closed, 1);
    assert_eq!(service.calls(), vec!["connect", "start", "pause", "stop", "close"]);
    assert!(drain(&mut events).contains(&StatusEvent::StateChanged {
        from: PlaybackState::Paused,
        to: PlaybackState::Stopped,
    }));

    // Stragglers from the closed session go nowhere
    if let Some(sender) = old_sender {
        let _ = sender.send(SessionEvent::Chunk(chunk(441, 9)));
    }
    settle().await;
    assert!(device.log().renders.is_empty());

    device.advance(10.0);
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Generating);
    service.send_chunk(4_410, 3);
    wait_for(|| device.log().renders.len() == 1).await;

    let renders = device.log().renders;
    let render = &renders[0];
    assert_eq!(render.sink_id, 2);
    assert_eq!(marker_of(render), 3);
    assert!(render.start_time.abs() < EPS);
    assert!(drain(&mut events).contains(&StatusEvent::StateChanged {
        from: PlaybackState::Stopped,
        to: PlaybackState::Idle,
    }));
}

#[tokio::test]
async fn test_stop_is_a_noop_when_nothing_is_open() {
    let (controller, service, device) = setup(ControllerSettings::default());
    let mut events = controller.subscribe();

    controller.stop().await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Idle);
    assert!(drain(&mut events).is_empty());

    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    controller.stop().await.unwrap();
    controller.stop().await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert_eq!(device.log().closed, 1);
    assert_eq!(service.calls().iter().filter(|c| *c == "close").count(), 1);
}

#[tokio::test]
async fn test_volume_only_changes_gain() {
    let (controller, service, device) = setup(ControllerSettings::default());

    controller.set_volume(0.3).unwrap();
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    assert_eq!(device.log().gains, vec![0.3]);

    service.send_chunk(4_410, 1);
    wait_for(|| device.log().renders.len() == 1).await;
    let before = controller.snapshot();

    controller.set_volume(0.8).unwrap();
    controller.set_volume(0.8).unwrap();
    let after = controller.snapshot();
    assert_eq!(device.log().gains, vec![0.3, 0.8, 0.8]);
    assert_eq!(after.state, before.state);
    assert_eq!(after.cursor, before.cursor);
    assert_eq!(after.queued_blocks, before.queued_blocks);
    assert_eq!(after.volume, 0.8);
    assert_eq!(device.log().renders.len(), 1);

    assert!(matches!(controller.set_volume(1.5), Err(ControllerError::Config(_))));
    assert!(controller.set_volume(f32::NAN).is_err());

    controller.stop().await.unwrap();
    assert!(matches!(
        controller.set_volume(0.5),
        Err(ControllerError::InvalidTransition {
            from: PlaybackState::Stopped,
            action: Action::SetVolume,
        })
    ));
}

#[tokio::test]
async fn test_invalid_transitions_are_rejected() {
    let (controller, _service, _device) = setup(ControllerSettings::default());

    assert!(matches!(
        controller.pause().await,
        Err(ControllerError::InvalidTransition { from: PlaybackState::Idle, action: Action::Pause })
    ));
    assert!(controller.resume().await.is_err());

    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    assert!(matches!(
        controller.start(prompt(), GenerationConfig::default()).await,
        Err(ControllerError::InvalidTransition {
            from: PlaybackState::Generating,
            action: Action::Start,
        })
    ));
    assert!(controller.resume().await.is_err());
    assert_eq!(controller.state(), PlaybackState::Generating);

    controller.pause().await.unwrap();
    assert!(controller.pause().await.is_err());
    assert_eq!(controller.state(), PlaybackState::Paused);
}

#[tokio::test]
async fn test_blank_prompt_opens_nothing() {
    let (controller, service, device) = setup(ControllerSettings::default());
    let mut events = controller.subscribe();

    let err = controller
        .start(GenerationPrompt::new("  "), GenerationConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Config(_)));
    assert_eq!(controller.state(), PlaybackState::Idle);
    assert_eq!(device.log().opened, 0);
    assert!(service.calls().is_empty());
    assert_eq!(
        drain(&mut events),
        vec![StatusEvent::Error { message: "Please enter a music prompt".to_string() }]
    );

    let bad_config = GenerationConfig { temperature: 1.0, bpm: 300 };
    assert!(controller.start(prompt(), bad_config).await.is_err());
    assert_eq!(device.log().opened, 0);
}

#[tokio::test]
async fn test_device_failure_on_start_returns_to_idle() {
    let (controller, service, device) = setup(ControllerSettings::default());
    device.fail_open(true);

    let err = controller.start(prompt(), GenerationConfig::default()).await.unwrap_err();
    assert!(matches!(err, ControllerError::Device(_)));
    assert_eq!(controller.state(), PlaybackState::Idle);
    assert!(service.calls().is_empty());

    device.fail_open(false);
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Generating);
}

#[tokio::test]
async fn test_connect_failure_closes_the_output() {
    let (controller, service, device) = setup(ControllerSettings::default());
    service.script.lock().fail_connect = true;

    let err = controller.start(prompt(), GenerationConfig::default()).await.unwrap_err();
    assert!(matches!(err, ControllerError::Session(_)));
    assert_eq!(controller.state(), PlaybackState::Idle);
    let log = device.log();
    assert_eq!((log.opened, log.closed), (1, 1));
}

#[tokio::test]
async fn test_start_failure_closes_session_and_output() {
    let (controller, service, device) = setup(ControllerSettings::default());
    service.script.lock().fail_start = true;
    let mut events = controller.subscribe();

    assert!(controller.start(prompt(), GenerationConfig::default()).await.is_err());
    assert_eq!(controller.state(), PlaybackState::Idle);
    assert_eq!(service.calls(), vec!["connect", "start", "stop", "close"]);
    assert_eq!(device.log().closed, 1);

    let events = drain(&mut events);
    assert!(events.contains(&StatusEvent::Error {
        message: "Session error: prompt rejected".to_string()
    }));
}

#[tokio::test]
async fn test_session_error_tears_down() {
    let (controller, service, device) = setup(ControllerSettings::default());
    let mut events = controller.subscribe();
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    controller.pause().await.unwrap();
    service.send_chunk(4_410, 1);
    wait_for(|| controller.snapshot().queued_blocks == 1).await;

    service.send(SessionEvent::Error("quota exceeded".to_string()));
    wait_for(|| controller.state() == PlaybackState::Stopped).await;

    assert_eq!(controller.snapshot().queued_blocks, 0);
    assert_eq!(device.log().closed, 1);
    assert!(service.calls().ends_with(&["stop".to_string(), "close".to_string()]));
    let events = drain(&mut events);
    assert!(events.contains(&StatusEvent::Error {
        message: "Session error: quota exceeded".to_string()
    }));

    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Generating);
}

#[tokio::test]
async fn test_service_closing_the_session_stops_playback() {
    let (controller, service, device) = setup(ControllerSettings::default());
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();

    service.send(SessionEvent::Closed);
    wait_for(|| controller.state() == PlaybackState::Stopped).await;
    assert_eq!(device.log().closed, 1);
}

#[tokio::test]
async fn test_pause_failure_tears_down() {
    let (controller, service, device) = setup(ControllerSettings::default());
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    service.script.lock().fail_pause = true;

    assert!(matches!(controller.pause().await, Err(ControllerError::Session(_))));
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert_eq!(device.log().closed, 1);
}

#[tokio::test]
async fn test_resume_failure_tears_down() {
    let (controller, service, device) = setup(ControllerSettings::default());
    let mut events = controller.subscribe();
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    controller.pause().await.unwrap();
    service.send_chunk(441, 1);
    wait_for(|| controller.snapshot().queued_blocks == 1).await;
    service.script.lock().fail_resume = true;

    assert!(matches!(controller.resume().await, Err(ControllerError::Session(_))));
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert_eq!(controller.snapshot().queued_blocks, 0);
    assert_eq!(device.log().closed, 1);
    assert!(device.log().renders.is_empty());
    assert_eq!(
        service.calls(),
        vec!["connect", "start", "pause", "resume", "stop", "close"]
    );
    assert!(drain(&mut events).contains(&StatusEvent::Error {
        message: "Session error: resume not acknowledged".to_string()
    }));
}

#[tokio::test]
async fn test_resume_render_failure_tears_down() {
    let (controller, service, device) = setup(ControllerSettings::default());
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    controller.pause().await.unwrap();
    service.send_chunk(441, 1);
    wait_for(|| controller.snapshot().queued_blocks == 1).await;

    device.fail_render(true);
    assert!(matches!(controller.resume().await, Err(ControllerError::Device(_))));
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert_eq!(device.log().closed, 1);
}

#[tokio::test]
async fn test_failing_session_stop_still_closes_everything() {
    let (controller, service, device) = setup(ControllerSettings::default());
    let mut events = controller.subscribe();
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    service.script.lock().fail_stop = true;

    assert!(matches!(controller.stop().await, Err(ControllerError::Session(_))));
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert_eq!(device.log().closed, 1);
    assert!(service.calls().ends_with(&["stop".to_string(), "close".to_string()]));
    assert!(drain(&mut events).contains(&StatusEvent::Error {
        message: "Session error: stop not acknowledged".to_string()
    }));

    service.script.lock().fail_stop = false;
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    assert_eq!(controller.state(), PlaybackState::Generating);
}

#[tokio::test]
async fn test_render_failure_tears_down() {
    let (controller, service, device) = setup(ControllerSettings::default());
    let mut events = controller.subscribe();
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();

    device.fail_render(true);
    service.send_chunk(441, 1);
    wait_for(|| controller.state() == PlaybackState::Stopped).await;

    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, StatusEvent::Error { message } if message.contains("rejected"))));
}

#[tokio::test]
async fn test_malformed_chunk_is_skipped() {
    let (controller, service, device) = setup(ControllerSettings::default());
    let mut events = controller.subscribe();
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();

    service.send_chunk(441, 1);
    // Three bytes: not a whole frame
    service.send(SessionEvent::Chunk("AAAA".to_string()));
    service.send(SessionEvent::Chunk("not base64!".to_string()));
    service.send_chunk(441, 2);
    wait_for(|| device.log().renders.len() == 2).await;

    let renders = device.log().renders;
    assert_eq!(renders.iter().map(marker_of).collect::<Vec<_>>(), vec![1, 2]);
    assert!((renders[1].start_time - secs(441)).abs() < EPS);
    assert_eq!(controller.state(), PlaybackState::Generating);

    let warnings = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, StatusEvent::Warning { .. }))
        .count();
    assert_eq!(warnings, 2);
}

#[tokio::test]
async fn test_queue_ceiling_drops_oldest() {
    let settings = ControllerSettings {
        max_queued_blocks: Some(2),
        overflow: OverflowPolicy::DropOldest,
        ..ControllerSettings::default()
    };
    let (controller, service, device) = setup(settings);
    let mut events = controller.subscribe();
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();
    controller.pause().await.unwrap();

    for marker in 1..=3 {
        service.send_chunk(441, marker);
    }
    wait_for(|| {
        device.log().renders.is_empty()
            && drain(&mut events)
                .iter()
                .any(|e| matches!(e, StatusEvent::Warning { .. }))
    })
    .await;
    assert_eq!(controller.snapshot().queued_blocks, 2);

    controller.resume().await.unwrap();
    let markers: Vec<i16> = device.log().renders.iter().map(marker_of).collect();
    assert_eq!(markers, vec![2, 3]);
}

#[tokio::test]
async fn test_stop_during_start_wins() {
    let (controller, service, device) = setup(ControllerSettings::default());
    let gate = Arc::new(Notify::new());
    service.script.lock().start_gate = Some(Arc::clone(&gate));

    let starting = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start(prompt(), GenerationConfig::default()).await }
    });
    wait_for(|| service.calls().contains(&"start".to_string())).await;

    let stopping = tokio::spawn({
        let controller = controller.clone();
        async move { controller.stop().await }
    });
    settle().await;
    gate.notify_one();

    starting.await.unwrap().unwrap();
    stopping.await.unwrap().unwrap();
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert_eq!(device.log().closed, 1);
    assert!(service.calls().ends_with(&["stop".to_string(), "close".to_string()]));
}

#[tokio::test]
async fn test_stop_while_output_opens_leaves_nothing_running() {
    let service = FakeService::default();
    let memory = MemoryDevice::manual();
    let entered = Arc::new(AtomicBool::new(false));
    let (release, gate) = mpsc::channel();
    let device = GatedDevice {
        inner: memory.clone(),
        entered: Arc::clone(&entered),
        release: Mutex::new(gate),
    };
    let controller = SessionController::new(
        Arc::new(service.clone()),
        Arc::new(device),
        ControllerSettings::default(),
    );

    let starting = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start(prompt(), GenerationConfig::default()).await }
    });
    wait_for(|| entered.load(Ordering::SeqCst)).await;

    let stopping = tokio::spawn({
        let controller = controller.clone();
        async move { controller.stop().await }
    });
    settle().await;
    release.send(()).unwrap();

    starting.await.unwrap().unwrap();
    stopping.await.unwrap().unwrap();
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert!(service.calls().is_empty());
    let log = memory.log();
    assert_eq!((log.opened, log.closed), (1, 1));
    assert_eq!(controller.snapshot().device_time, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_chunks_and_transitions_stay_ordered() {
    let (controller, service, device) = setup(ControllerSettings::default());
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();

    let producer = tokio::spawn({
        let service = service.clone();
        async move {
            for marker in 0..200i16 {
                service.send_chunk(100 + marker as usize, marker);
                tokio::task::yield_now().await;
            }
        }
    });
    let toggler = tokio::spawn({
        let controller = controller.clone();
        async move {
            for i in 0..20 {
                controller.pause().await.unwrap();
                controller.set_volume(i as f32 / 20.0).unwrap();
                tokio::task::yield_now().await;
                controller.resume().await.unwrap();
            }
        }
    });
    producer.await.unwrap();
    toggler.await.unwrap();

    for _ in 0..1_000 {
        if device.log().renders.len() == 200 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let renders = device.log().renders;
    assert_eq!(renders.len(), 200);
    for (i, render) in renders.iter().enumerate() {
        assert_eq!(marker_of(render), i as i16);
        assert_eq!(render.frames, 100 + i);
    }
    for pair in renders.windows(2) {
        assert!((pair[1].start_time - (pair[0].start_time + pair[0].duration)).abs() < 1e-6);
    }
}

#[derive(Debug, Clone)]
enum Step {
    Chunk(usize),
    Pause,
    Resume,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (1usize..2_000).prop_map(Step::Chunk),
        1 => Just(Step::Pause),
        1 => Just(Step::Resume),
    ]
}

/// Play `steps` through a fresh controller; returns the renders after a final resume
async fn play_steps(steps: Vec<Step>) -> (Vec<RenderRecord>, Vec<usize>) {
    let (controller, service, device) = setup(ControllerSettings::default());
    controller.start(prompt(), GenerationConfig::default()).await.unwrap();

    let mut sent = Vec::new();
    for step in steps {
        match step {
            Step::Chunk(frames) => {
                service.send_chunk(frames, sent.len() as i16);
                sent.push(frames);
                let expected = sent.len();
                wait_for(|| {
                    device.log().renders.len() + controller.snapshot().queued_blocks == expected
                })
                .await;
            }
            Step::Pause if controller.state() == PlaybackState::Generating => {
                controller.pause().await.unwrap();
            }
            Step::Resume if controller.state() == PlaybackState::Paused => {
                controller.resume().await.unwrap();
            }
            Step::Pause => assert!(controller.pause().await.is_err()),
            Step::Resume => assert!(controller.resume().await.is_err()),
        }
    }
    if controller.state() == PlaybackState::Paused {
        controller.resume().await.unwrap();
    }
    let renders = device.log().renders;
    controller.stop().await.unwrap();
    (renders, sent)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_pause_and_resume_keep_chunks_ordered_and_gapless(
        steps in prop::collection::vec(step(), 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (renders, sent) = runtime.block_on(play_steps(steps));

        prop_assert_eq!(renders.len(), sent.len());
        for (i, (render, frames)) in renders.iter().zip(&sent).enumerate() {
            prop_assert_eq!(marker_of(render), i as i16);
            prop_assert_eq!(render.frames, *frames);
        }
        for pair in renders.windows(2) {
            let expected = pair[0].start_time + pair[0].duration;
            prop_assert!((pair[1].start_time - expected).abs() < 1e-6);
        }
    }
}
