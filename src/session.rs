use std::ops::ControlFlow;

use tokio::sync::{mpsc, watch};

use roleplay_realtime_types::audio::{
    self, Voice, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE,
};
use roleplay_realtime_types::{ClientMessage, InboundEvent, Setup};

use crate::client;

mod io;
mod scheduler;

pub use io::{CaptureSource, Connect, Endpoint, PlaybackId, PlaybackSink};
pub use scheduler::PlaybackScheduler;

/// Outbound audio is transmitted in fixed windows of this many samples.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

const FRAME_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle of one voice conversation. `Closed` and `Error` are terminal;
/// retrying means constructing a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
}

/// Coarse UI-visible condition of a session. `active` mirrors whether the
/// remote side still considers the conversation live; the endpoint closing
/// clears it without changing `state`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Status {
    pub state: SessionState,
    pub active: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A capture device, playback sink, or the remote connection could not
    /// be acquired while connecting. Fatal to the attempt; everything
    /// already acquired has been released.
    #[error("failed to acquire session resources: {0}")]
    Acquisition(#[from] anyhow::Error),

    /// The remote endpoint reported an unrecoverable error mid-session.
    #[error("live endpoint error: {0}")]
    Transport(String),
}

/// What a roleplay conversation is configured with: the model, the persona
/// the model plays, and its synthesized voice.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub system_instruction: String,
    pub voice: Voice,
}

impl SessionConfig {
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            model: client::consts::DEFAULT_MODEL.to_string(),
            system_instruction: system_instruction.into(),
            voice: Voice::Puck,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.voice = voice;
        self
    }

    fn to_setup(&self) -> Setup {
        Setup::new()
            .with_model(&self.model)
            .with_voice(self.voice)
            .with_system_instruction(&self.system_instruction)
            .build()
    }
}

#[derive(Debug, Clone, Copy)]
enum Ctrl {
    Stop,
}

enum SessionEvent {
    Inbound(InboundEvent),
    Frame(Vec<f32>),
    PlaybackEnded(PlaybackId),
    Ctrl(Ctrl),
}

/// One realtime voice conversation, start to stop.
///
/// Owns every resource it acquires: the capture device, the playback sink,
/// and the endpoint connection. All mutable session state is touched only
/// from [`VoiceSession::run`]'s event loop (or from `&mut self` methods
/// between loop turns), so handlers are serialized and never reentrant.
pub struct VoiceSession<C, S, N>
where
    C: CaptureSource,
    S: PlaybackSink,
    N: Connect,
{
    config: SessionConfig,
    state: SessionState,
    active: bool,
    last_error: Option<SessionError>,

    capture: C,
    sink: S,
    connector: N,

    scheduler: PlaybackScheduler,
    /// Captured samples not yet filling a whole outbound frame.
    pending: Vec<f32>,

    outbound: Option<mpsc::Sender<ClientMessage>>,
    inbound: Option<mpsc::Receiver<InboundEvent>>,

    frames_tx: mpsc::Sender<Vec<f32>>,
    frames_rx: mpsc::Receiver<Vec<f32>>,
    ended_tx: mpsc::Sender<PlaybackId>,
    ended_rx: mpsc::Receiver<PlaybackId>,
    ctrl_tx: mpsc::Sender<Ctrl>,
    ctrl_rx: mpsc::Receiver<Ctrl>,
    status_tx: watch::Sender<Status>,
    status_rx: watch::Receiver<Status>,
}

/// Cloneable remote control for a running session: request a stop, observe
/// the status.
#[derive(Clone)]
pub struct SessionHandle {
    ctrl: mpsc::Sender<Ctrl>,
    status: watch::Receiver<Status>,
}

impl SessionHandle {
    /// Requests a stop. A no-op once the session has already shut down.
    pub fn stop(&self) {
        let _ = self.ctrl.try_send(Ctrl::Stop);
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// Resolves whenever the status changes; returns the new value.
    pub async fn changed(&mut self) -> Option<Status> {
        self.status.changed().await.ok()?;
        Some(*self.status.borrow())
    }
}

impl<C, S, N> VoiceSession<C, S, N>
where
    C: CaptureSource,
    S: PlaybackSink,
    N: Connect,
{
    pub fn new(config: SessionConfig, capture: C, sink: S, connector: N) -> Self {
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (ended_tx, ended_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(8);
        let (status_tx, status_rx) = watch::channel(Status {
            state: SessionState::Idle,
            active: false,
        });
        Self {
            config,
            state: SessionState::Idle,
            active: false,
            last_error: None,
            capture,
            sink,
            connector,
            scheduler: PlaybackScheduler::new(),
            pending: Vec::new(),
            outbound: None,
            inbound: None,
            frames_tx,
            frames_rx,
            ended_tx,
            ended_rx,
            ctrl_tx,
            ctrl_rx,
            status_tx,
            status_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            ctrl: self.ctrl_tx.clone(),
            status: self.status_rx.clone(),
        }
    }

    /// Acquires the capture device, the playback sink, and the remote
    /// connection, in that order. Valid only from `Idle`; calling it in any
    /// other state acquires nothing and leaves the session untouched. On any
    /// acquisition failure every step already taken is rolled back and the
    /// session lands in `Error`.
    ///
    /// Success means the session is `Connecting`; it becomes `Open` when the
    /// endpoint acknowledges the setup message, which [`Self::run`] observes.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            tracing::debug!("ignoring start: session is already {:?}", self.state);
            return Ok(());
        }
        self.set_state(SessionState::Connecting);

        match self.acquire().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("session setup failed: {}", e);
                self.release_resources();
                self.set_state(SessionState::Error);
                Err(e)
            }
        }
    }

    async fn acquire(&mut self) -> Result<(), SessionError> {
        self.capture
            .open(CAPTURE_SAMPLE_RATE, self.frames_tx.clone())?;
        self.sink.open(PLAYBACK_SAMPLE_RATE, self.ended_tx.clone())?;
        let endpoint = self.connector.connect(self.config.to_setup()).await?;
        self.outbound = Some(endpoint.outbound);
        self.inbound = Some(endpoint.inbound);
        Ok(())
    }

    /// Drives the session until it stops: inbound endpoint events, capture
    /// frames, playback completions, and control messages are handled one at
    /// a time on this task.
    pub async fn run(&mut self) {
        let Some(mut inbound) = self.inbound.take() else {
            tracing::debug!("run called without a connected endpoint");
            return;
        };
        let mut inbound_live = true;

        loop {
            let event = tokio::select! {
                maybe = inbound.recv(), if inbound_live => match maybe {
                    Some(event) => SessionEvent::Inbound(event),
                    None => {
                        inbound_live = false;
                        continue;
                    }
                },
                Some(samples) = self.frames_rx.recv() => SessionEvent::Frame(samples),
                Some(id) = self.ended_rx.recv() => SessionEvent::PlaybackEnded(id),
                Some(ctrl) = self.ctrl_rx.recv() => SessionEvent::Ctrl(ctrl),
                else => break,
            };
            if self.dispatch(event).await.is_break() {
                break;
            }
        }
    }

    async fn dispatch(&mut self, event: SessionEvent) -> ControlFlow<()> {
        match event {
            SessionEvent::Inbound(InboundEvent::Open) => {
                if self.state == SessionState::Connecting {
                    tracing::info!("live session open");
                    self.set_state(SessionState::Open);
                    self.set_active(true);
                }
            }
            SessionEvent::Inbound(InboundEvent::AudioFragment { data }) => {
                if self.state == SessionState::Open {
                    self.on_audio_fragment(&data);
                }
            }
            SessionEvent::Inbound(InboundEvent::TextFragment { text }) => {
                tracing::debug!("model text: {}", text);
            }
            SessionEvent::Inbound(InboundEvent::Interrupted) => {
                if self.state == SessionState::Open {
                    tracing::debug!(
                        "interrupted; discarding {} queued playbacks",
                        self.scheduler.active_len()
                    );
                    self.scheduler.interrupt(&mut self.sink);
                }
            }
            SessionEvent::Inbound(InboundEvent::Error { detail }) => {
                tracing::error!("live endpoint error: {}", detail);
                // Release everything rather than leave a dead session holding
                // the microphone; the caller still owns the retry decision.
                self.last_error = Some(SessionError::Transport(detail));
                self.release_resources();
                self.set_state(SessionState::Error);
                return ControlFlow::Break(());
            }
            SessionEvent::Inbound(InboundEvent::Closed { reason }) => {
                tracing::info!("live endpoint closed: {:?}", reason);
                self.set_active(false);
            }
            SessionEvent::Frame(samples) => {
                self.on_capture_frame(samples).await;
            }
            SessionEvent::PlaybackEnded(id) => {
                self.scheduler.on_ended(id);
            }
            SessionEvent::Ctrl(Ctrl::Stop) => {
                self.stop();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn on_audio_fragment(&mut self, data: &str) {
        let samples = match audio::decode(data) {
            Ok(samples) => samples,
            Err(e) => {
                // a bad chunk is dropped; the stream as a whole keeps going
                tracing::warn!("dropping undecodable audio chunk: {}", e);
                return;
            }
        };
        if samples.is_empty() {
            return;
        }
        if let Err(e) = self
            .scheduler
            .schedule(&mut self.sink, samples, PLAYBACK_SAMPLE_RATE)
        {
            tracing::warn!("failed to schedule playback: {}", e);
        }
    }

    async fn on_capture_frame(&mut self, samples: Vec<f32>) {
        // capture may already be running while connecting; frames only flow
        // to the endpoint once the session is open
        if self.state != SessionState::Open {
            return;
        }
        self.pending.extend(samples);
        while self.pending.len() >= CAPTURE_FRAME_SAMPLES {
            let frame: Vec<f32> = self.pending.drain(..CAPTURE_FRAME_SAMPLES).collect();
            let message = ClientMessage::audio_frame(audio::encode(&frame));
            let Some(outbound) = self.outbound.as_ref() else {
                return;
            };
            if outbound.send(message).await.is_err() {
                tracing::warn!("endpoint unavailable; dropping outbound audio");
                self.outbound = None;
                return;
            }
        }
    }

    /// Shuts the session down. Valid from any state and idempotent; every
    /// release step is attempted even if an earlier one fails.
    pub fn stop(&mut self) {
        self.release_resources();
        self.set_state(SessionState::Closed);
    }

    fn release_resources(&mut self) {
        // dropping the sender lets the connection close best-effort
        self.outbound = None;
        self.inbound = None;
        if let Err(e) = self.capture.close() {
            tracing::warn!("failed to release capture device: {}", e);
        }
        self.scheduler.interrupt(&mut self.sink);
        if let Err(e) = self.sink.close() {
            tracing::warn!("failed to close playback sink: {}", e);
        }
        self.pending.clear();
        self.set_active(false);
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.publish();
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(Status {
            state: self.state,
            active: self.active,
        });
    }
}

/// Connects over WebSocket via [`crate::client`] and adapts its broadcast
/// event stream to the session's single-consumer channel.
pub struct WsConnect {
    capacity: usize,
    config: client::Config,
}

impl WsConnect {
    pub fn new(config: client::Config) -> Self {
        Self {
            capacity: EVENT_CHANNEL_CAPACITY,
            config,
        }
    }
}

impl Connect for WsConnect {
    async fn connect(&mut self, setup: Setup) -> anyhow::Result<Endpoint> {
        let connected =
            client::connect_with_config(self.capacity, self.config.clone(), setup).await?;
        let mut events = connected.server_events()?;
        let outbound = connected.sender()?;

        let (in_tx, in_rx) = mpsc::channel(self.capacity);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let closed = matches!(event, InboundEvent::Closed { .. });
                        if in_tx.send(event).await.is_err() {
                            break;
                        }
                        if closed {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("inbound event stream lagged by {} messages", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        let _ = in_tx.send(InboundEvent::Closed { reason: None }).await;
                        break;
                    }
                }
            }
        });

        Ok(Endpoint {
            outbound,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct FakeCapture {
        opens: Arc<Mutex<u32>>,
        closes: Arc<Mutex<u32>>,
        fail_open: bool,
    }

    impl FakeCapture {
        fn failing() -> Self {
            Self {
                fail_open: true,
                ..Self::default()
            }
        }

        fn opens(&self) -> u32 {
            *self.opens.lock().unwrap()
        }

        fn closes(&self) -> u32 {
            *self.closes.lock().unwrap()
        }
    }

    impl CaptureSource for FakeCapture {
        fn open(&mut self, _rate: u32, _frames: mpsc::Sender<Vec<f32>>) -> anyhow::Result<()> {
            if self.fail_open {
                anyhow::bail!("microphone permission denied");
            }
            *self.opens.lock().unwrap() += 1;
            Ok(())
        }

        fn close(&mut self) -> anyhow::Result<()> {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeSink {
        now: Arc<Mutex<f64>>,
        scheduled: Arc<Mutex<Vec<(PlaybackId, f64, usize)>>>,
        stopped: Arc<Mutex<Vec<PlaybackId>>>,
        closes: Arc<Mutex<u32>>,
        next_id: Arc<Mutex<PlaybackId>>,
    }

    impl FakeSink {
        fn set_time(&self, t: f64) {
            *self.now.lock().unwrap() = t;
        }

        fn starts(&self) -> Vec<f64> {
            self.scheduled.lock().unwrap().iter().map(|s| s.1).collect()
        }

        fn stopped(&self) -> Vec<PlaybackId> {
            self.stopped.lock().unwrap().clone()
        }

        fn closes(&self) -> u32 {
            *self.closes.lock().unwrap()
        }
    }

    impl PlaybackSink for FakeSink {
        fn open(&mut self, _rate: u32, _ended: mpsc::Sender<PlaybackId>) -> anyhow::Result<()> {
            Ok(())
        }

        fn current_time(&self) -> f64 {
            *self.now.lock().unwrap()
        }

        fn schedule(&mut self, samples: Vec<f32>, start: f64) -> anyhow::Result<PlaybackId> {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            self.scheduled
                .lock()
                .unwrap()
                .push((*next, start, samples.len()));
            Ok(*next)
        }

        fn stop(&mut self, id: PlaybackId) {
            self.stopped.lock().unwrap().push(id);
        }

        fn close(&mut self) -> anyhow::Result<()> {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    struct FakeConnect {
        endpoint: Option<Endpoint>,
        fail: bool,
        connects: u32,
    }

    impl FakeConnect {
        fn new() -> (
            Self,
            mpsc::Receiver<ClientMessage>,
            mpsc::Sender<InboundEvent>,
        ) {
            let (out_tx, out_rx) = mpsc::channel(64);
            let (in_tx, in_rx) = mpsc::channel(64);
            let connector = Self {
                endpoint: Some(Endpoint {
                    outbound: out_tx,
                    inbound: in_rx,
                }),
                fail: false,
                connects: 0,
            };
            (connector, out_rx, in_tx)
        }

        fn failing() -> Self {
            Self {
                endpoint: None,
                fail: true,
                connects: 0,
            }
        }
    }

    impl Connect for FakeConnect {
        async fn connect(&mut self, _setup: Setup) -> anyhow::Result<Endpoint> {
            self.connects += 1;
            if self.fail {
                anyhow::bail!("endpoint unreachable");
            }
            self.endpoint
                .take()
                .ok_or_else(|| anyhow::anyhow!("already connected"))
        }
    }

    type TestSession = VoiceSession<FakeCapture, FakeSink, FakeConnect>;

    fn session(connector: FakeConnect) -> (TestSession, FakeCapture, FakeSink) {
        let capture = FakeCapture::default();
        let sink = FakeSink::default();
        let session = VoiceSession::new(
            SessionConfig::new("You are Alex, a skeptical prospect."),
            capture.clone(),
            sink.clone(),
            connector,
        );
        (session, capture, sink)
    }

    async fn open_session() -> (
        TestSession,
        FakeCapture,
        FakeSink,
        mpsc::Receiver<ClientMessage>,
    ) {
        let (connector, out_rx, _in_tx) = FakeConnect::new();
        let (mut s, capture, sink) = session(connector);
        s.start().await.unwrap();
        s.feed(InboundEvent::Open).await;
        assert_eq!(s.state(), SessionState::Open);
        (s, capture, sink, out_rx)
    }

    fn pcm_chunk(seconds: f64) -> String {
        audio::encode(&vec![0.0; (seconds * 24_000.0) as usize])
    }

    #[tokio::test]
    async fn start_is_a_noop_outside_idle() {
        let (connector, _out_rx, _in_tx) = FakeConnect::new();
        let (mut s, capture, _sink) = session(connector);

        s.start().await.unwrap();
        assert_eq!(s.state(), SessionState::Connecting);

        // second start: no new acquisition, state untouched
        s.start().await.unwrap();
        assert_eq!(s.connector.connects, 1);
        assert_eq!(capture.opens(), 1);
        assert_eq!(s.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn connect_failure_releases_every_resource() {
        let (mut s, capture, sink) = session(FakeConnect::failing());

        let err = s.start().await.unwrap_err();
        assert!(matches!(err, SessionError::Acquisition(_)));
        assert_eq!(s.state(), SessionState::Error);
        assert_eq!(capture.closes(), 1);
        assert_eq!(sink.closes(), 1);
        assert!(s.outbound.is_none());
        assert!(s.inbound.is_none());
    }

    #[tokio::test]
    async fn capture_failure_still_releases_the_sink() {
        let (connector, _out_rx, _in_tx) = FakeConnect::new();
        let sink = FakeSink::default();
        let mut s = VoiceSession::new(
            SessionConfig::new("persona"),
            FakeCapture::failing(),
            sink.clone(),
            connector,
        );

        assert!(s.start().await.is_err());
        assert_eq!(s.state(), SessionState::Error);
        assert_eq!(sink.closes(), 1);
        assert_eq!(s.connector.connects, 0);
    }

    #[tokio::test]
    async fn chunks_play_gapless_and_in_order() {
        let (mut s, _capture, sink, _out_rx) = open_session().await;
        sink.set_time(10.0);

        for seconds in [0.5, 0.3, 0.1] {
            s.feed(InboundEvent::AudioFragment {
                data: pcm_chunk(seconds),
            })
            .await;
        }

        let starts = sink.starts();
        assert!((starts[0] - 10.0).abs() < 1e-9);
        assert!((starts[1] - 10.5).abs() < 1e-9);
        assert!((starts[2] - 10.8).abs() < 1e-9);
        assert_eq!(s.scheduler.active_len(), 3);
    }

    #[tokio::test]
    async fn interruption_silences_and_resets_the_clock() {
        let (mut s, _capture, sink, _out_rx) = open_session().await;
        sink.set_time(10.0);
        s.feed(InboundEvent::AudioFragment {
            data: pcm_chunk(0.5),
        })
        .await;
        s.feed(InboundEvent::AudioFragment {
            data: pcm_chunk(0.3),
        })
        .await;

        sink.set_time(10.2);
        s.feed(InboundEvent::Interrupted).await;

        assert_eq!(sink.stopped().len(), 2);
        assert_eq!(s.scheduler.active_len(), 0);
        assert_eq!(s.state(), SessionState::Open);

        // a fresh chunk starts at the present, not behind the stale queue
        s.feed(InboundEvent::AudioFragment {
            data: pcm_chunk(0.2),
        })
        .await;
        assert!((sink.starts()[2] - 10.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn completed_playback_leaves_the_active_set() {
        let (mut s, _capture, sink, _out_rx) = open_session().await;
        sink.set_time(1.0);
        s.feed(InboundEvent::AudioFragment {
            data: pcm_chunk(0.5),
        })
        .await;
        let id = s.scheduled_first(&sink);

        s.feed_ended(id).await;
        assert_eq!(s.scheduler.active_len(), 0);

        // a later interruption must not double-stop the finished handle
        s.feed(InboundEvent::Interrupted).await;
        assert!(sink.stopped().is_empty());
    }

    #[tokio::test]
    async fn bad_chunks_are_dropped_without_killing_the_session() {
        let (mut s, _capture, sink, _out_rx) = open_session().await;

        s.feed(InboundEvent::AudioFragment {
            data: "not base64!!".to_string(),
        })
        .await;
        assert!(sink.starts().is_empty());
        assert_eq!(s.state(), SessionState::Open);

        s.feed(InboundEvent::AudioFragment {
            data: pcm_chunk(0.1),
        })
        .await;
        assert_eq!(sink.starts().len(), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_releases_everything() {
        let (mut s, capture, sink, mut out_rx) = open_session().await;
        s.feed(InboundEvent::AudioFragment {
            data: pcm_chunk(0.5),
        })
        .await;

        s.stop();
        s.stop();

        assert_eq!(s.state(), SessionState::Closed);
        assert!(!s.is_active());
        assert!(capture.closes() >= 1);
        assert!(sink.closes() >= 2);
        assert_eq!(sink.stopped().len(), 1);
        // the outbound side is gone, which closes the connection
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn stop_works_from_any_state() {
        // never started
        let (connector, _out_rx, _in_tx) = FakeConnect::new();
        let (mut s, capture, sink) = session(connector);
        s.stop();
        assert_eq!(s.state(), SessionState::Closed);
        assert!(!s.is_active());
        assert_eq!(capture.closes(), 1);
        assert_eq!(sink.closes(), 1);

        // still connecting, before the endpoint acknowledges setup
        let (connector, mut out_rx, _in_tx) = FakeConnect::new();
        let (mut s, _capture, _sink) = session(connector);
        s.start().await.unwrap();
        assert_eq!(s.state(), SessionState::Connecting);
        s.stop();
        assert_eq!(s.state(), SessionState::Closed);
        assert!(out_rx.recv().await.is_none());

        // after a failed start
        let (mut s, _capture, _sink) = session(FakeConnect::failing());
        assert!(s.start().await.is_err());
        s.stop();
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn transport_error_releases_resources_and_surfaces_error_state() {
        let (mut s, capture, sink, _out_rx) = open_session().await;

        let flow = s
            .dispatch(SessionEvent::Inbound(InboundEvent::Error {
                detail: "quota exceeded".to_string(),
            }))
            .await;
        assert!(flow.is_break());
        assert_eq!(s.state(), SessionState::Error);
        assert!(matches!(
            s.last_error(),
            Some(SessionError::Transport(detail)) if detail == "quota exceeded"
        ));
        assert_eq!(capture.closes(), 1);
        assert_eq!(sink.closes(), 1);

        // an explicit stop afterwards is still safe
        s.stop();
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn endpoint_close_marks_inactive_without_changing_state() {
        let (mut s, _capture, _sink, _out_rx) = open_session().await;

        s.feed(InboundEvent::Closed {
            reason: Some("going away".to_string()),
        })
        .await;

        assert!(!s.is_active());
        assert_eq!(s.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn capture_frames_are_windowed_and_encoded() {
        let (mut s, _capture, _sink, mut out_rx) = open_session().await;

        s.feed_frame(vec![0.25; 5000]).await;
        let message = out_rx.try_recv().expect("one full frame");
        let ClientMessage::RealtimeInput(input) = message else {
            panic!("expected realtime input");
        };
        assert_eq!(input.media_chunks.len(), 1);
        assert_eq!(input.media_chunks[0].mime_type, "audio/pcm;rate=16000");
        let samples = audio::decode(&input.media_chunks[0].data).unwrap();
        assert_eq!(samples.len(), CAPTURE_FRAME_SAMPLES);
        assert!((samples[0] - 0.25).abs() <= 1.0 / 32768.0);

        // 904 samples left over: not enough for a second frame yet
        assert!(out_rx.try_recv().is_err());
        s.feed_frame(vec![0.25; 3200]).await;
        assert!(out_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn frames_before_open_are_discarded() {
        let (connector, mut out_rx, _in_tx) = FakeConnect::new();
        let (mut s, _capture, _sink) = session(connector);
        s.start().await.unwrap();
        assert_eq!(s.state(), SessionState::Connecting);

        s.feed_frame(vec![0.0; CAPTURE_FRAME_SAMPLES]).await;
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_loop_schedules_audio_and_honors_stop() {
        let (connector, _out_rx, in_tx) = FakeConnect::new();
        let (mut s, _capture, sink) = session(connector);
        s.start().await.unwrap();
        let handle = s.handle();

        in_tx.send(InboundEvent::Open).await.unwrap();
        in_tx
            .send(InboundEvent::AudioFragment {
                data: pcm_chunk(0.2),
            })
            .await
            .unwrap();

        let task = tokio::spawn(async move {
            s.run().await;
            s
        });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while sink.starts().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "no playback scheduled");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        handle.stop();
        let s = task.await.unwrap();
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(handle.status().state, SessionState::Closed);
        assert!(!handle.status().active);
    }

    impl TestSession {
        async fn feed(&mut self, event: InboundEvent) {
            let _ = self.dispatch(SessionEvent::Inbound(event)).await;
        }

        async fn feed_frame(&mut self, samples: Vec<f32>) {
            let _ = self.dispatch(SessionEvent::Frame(samples)).await;
        }

        async fn feed_ended(&mut self, id: PlaybackId) {
            let _ = self.dispatch(SessionEvent::PlaybackEnded(id)).await;
        }

        fn scheduled_first(&self, sink: &FakeSink) -> PlaybackId {
            sink.scheduled.lock().unwrap()[0].0
        }
    }
}
