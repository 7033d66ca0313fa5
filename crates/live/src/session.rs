//! Session lifecycle orchestration.
//!
//! A single actor task owns the state machine: connect, handshake, retry
//! with linear backoff, resumption-token tracking, and the swap from an old
//! connection to its replacement. Each connection attempt runs as a
//! generation-tagged task; events from a generation that is no longer
//! current are inert, so a stale socket's failure can never be mistaken for
//! the current one's.

use crate::config::LiveConfig;
use crate::hooks::{SessionHooks, SessionSetup};
use crate::liveness;
use crate::mux::{ControlEvent, StreamMux};
use crate::protocol::{
    self, ClientMessage, ContextWindowCompression, GenerationConfig, Part, PrebuiltVoiceConfig,
    SessionResumption, Setup, SlidingWindow, SpeechConfig, SystemInstruction, VoiceConfig,
};
use crate::transport::{TransportEvent, TransportHandle};
use anyhow::{Context as _, bail};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Session-level state, derived from socket state plus retry and resumption
/// bookkeeping. This is what the rest of the application observes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal until the caller explicitly starts again.
    Error(String),
}

/// Connect-attempt budget with linear backoff.
#[derive(Debug)]
struct RetryBudget {
    attempt: u32,
    max: u32,
}

impl RetryBudget {
    fn new(max: u32) -> Self {
        Self { attempt: 0, max }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Counts a failure. Returns the wait before the next attempt, or
    /// `None` once the budget is spent.
    fn next_delay(&mut self, base: Duration) -> Option<Duration> {
        self.attempt += 1;
        (self.attempt <= self.max).then(|| base * self.attempt)
    }
}

enum Command {
    Start,
    Stop,
    Audio(Bytes),
    Video(Bytes),
}

enum Internal {
    Ready {
        generation: u64,
        transport: TransportHandle,
        mux: StreamMux,
    },
    ConnectFailed {
        generation: u64,
        error: String,
    },
    ResumeToken {
        generation: u64,
        token: String,
    },
    GoAway {
        generation: u64,
    },
    Down {
        generation: u64,
        reason: String,
    },
    RetryElapsed {
        epoch: u64,
    },
}

/// Handle to a running live session. Cheap to clone; dropping every clone
/// stops the session.
#[derive(Clone)]
pub struct LiveSession {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionState>,
    delayed_rx: watch::Receiver<bool>,
}

impl LiveSession {
    /// Spawns the session actor. Must be called inside a tokio runtime.
    pub fn spawn(config: LiveConfig, hooks: SessionHooks) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (delayed_tx, delayed_rx) = watch::channel(false);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let retry = RetryBudget::new(config.max_retries);
        let actor = Actor {
            config: Arc::new(config),
            hooks,
            state_tx,
            delayed_tx: Arc::new(delayed_tx),
            commands: command_rx,
            internal_tx,
            internal_rx,
            generation: 0,
            retry_epoch: 0,
            retry_timer: None,
            resume_token: None,
            retry,
            frames: VecDeque::new(),
            active: None,
            pending: None,
        };
        tokio::spawn(actor.run());

        Self {
            commands: command_tx,
            state_rx,
            delayed_rx,
        }
    }

    /// Starts the session. A no-op while already connecting or connected.
    pub fn start(&self) {
        let _ = self.commands.send(Command::Start);
    }

    /// Stops the session and resets it to idle. Idempotent.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Queues one microphone PCM chunk. Dropped unless connected.
    pub fn send_audio(&self, pcm: Bytes) {
        let _ = self.commands.send(Command::Audio(pcm));
    }

    /// Queues one encoded camera frame. Dropped unless connected; the most
    /// recent frames are also kept for the end-of-session hook.
    pub fn send_video_frame(&self, jpeg: Bytes) {
        let _ = self.commands.send(Command::Video(jpeg));
    }

    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Observes the liveness monitor's informational stall flag.
    pub fn watch_response_delayed(&self) -> watch::Receiver<bool> {
        self.delayed_rx.clone()
    }
}

/// One connection attempt, pending or promoted.
struct Conn {
    generation: u64,
    cancel: CancellationToken,
    last_inbound: watch::Receiver<Instant>,
    transport: Option<TransportHandle>,
    mux: Option<StreamMux>,
    liveness: Option<CancellationToken>,
}

struct Actor {
    config: Arc<LiveConfig>,
    hooks: SessionHooks,
    state_tx: watch::Sender<SessionState>,
    delayed_tx: Arc<watch::Sender<bool>>,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    generation: u64,
    retry_epoch: u64,
    retry_timer: Option<JoinHandle<()>>,
    resume_token: Option<String>,
    retry: RetryBudget,
    frames: VecDeque<Bytes>,
    active: Option<Conn>,
    pending: Option<Conn>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        // Every session handle is gone.
                        self.shutdown("session handle dropped");
                        return;
                    }
                },
                internal = self.internal_rx.recv() => {
                    if let Some(event) = internal {
                        self.handle_internal(event);
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => self.handle_start(),
            Command::Stop => self.shutdown("stopped by caller"),
            Command::Audio(pcm) => {
                if let Some(mux) = self.connected_mux() {
                    mux.send_audio(&pcm);
                }
            }
            Command::Video(jpeg) => {
                if self.connected_mux().is_some() {
                    if self.config.recent_frame_capacity > 0 {
                        if self.frames.len() == self.config.recent_frame_capacity {
                            self.frames.pop_front();
                        }
                        self.frames.push_back(jpeg.clone());
                    }
                    if let Some(mux) = self.connected_mux() {
                        mux.send_video_frame(&jpeg);
                    }
                }
            }
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Ready {
                generation,
                transport,
                mux,
            } => self.handle_ready(generation, transport, mux),
            Internal::ConnectFailed { generation, error } => {
                self.handle_connect_failed(generation, error);
            }
            Internal::ResumeToken { generation, token } => {
                if self.is_live_generation(generation) {
                    debug!(generation, "resumption token updated");
                    self.resume_token = Some(token);
                }
            }
            Internal::GoAway { generation } => self.handle_go_away(generation),
            Internal::Down { generation, reason } => self.handle_down(generation, reason),
            Internal::RetryElapsed { epoch } => {
                if epoch == self.retry_epoch && self.pending.is_none() && self.active.is_none() {
                    self.begin_connect();
                }
            }
        }
    }

    // Media gating on the socket state itself lives in the mux; this only
    // picks the promoted connection. During a go-away handover the old
    // connection keeps streaming until the replacement takes over.
    fn connected_mux(&self) -> Option<&StreamMux> {
        self.active.as_ref().and_then(|conn| conn.mux.as_ref())
    }

    fn is_live_generation(&self, generation: u64) -> bool {
        let matches_conn = |conn: &Option<Conn>| {
            conn.as_ref()
                .is_some_and(|conn| conn.generation == generation)
        };
        matches_conn(&self.active) || matches_conn(&self.pending)
    }

    fn handle_start(&mut self) {
        if matches!(
            *self.state_tx.borrow(),
            SessionState::Connecting | SessionState::Connected
        ) {
            debug!("start ignored; session already active");
            return;
        }
        if self.pending.is_some() || self.active.is_some() {
            debug!("start ignored; a connection is already in flight");
            return;
        }
        self.cancel_retry_timer();
        self.retry.reset();
        self.state_tx.send_replace(SessionState::Connecting);
        self.begin_connect();
    }

    fn begin_connect(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let (last_inbound_tx, last_inbound_rx) = watch::channel(Instant::now());
        let cancel = CancellationToken::new();
        tokio::spawn(run_connection(
            generation,
            Arc::clone(&self.config),
            ConnShared::from_hooks(&self.hooks),
            self.resume_token.clone(),
            self.internal_tx.clone(),
            last_inbound_tx,
            cancel.clone(),
        ));
        debug!(generation, "connection attempt started");
        self.pending = Some(Conn {
            generation,
            cancel,
            last_inbound: last_inbound_rx,
            transport: None,
            mux: None,
            liveness: None,
        });
    }

    fn handle_ready(&mut self, generation: u64, transport: TransportHandle, mux: StreamMux) {
        let Some(mut conn) = self
            .pending
            .take_if(|conn| conn.generation == generation)
        else {
            // An abandoned attempt finished anyway; it gets no session.
            transport.close(1000, "superseded");
            return;
        };
        conn.transport = Some(transport);
        conn.mux = Some(mux);

        let liveness_cancel = CancellationToken::new();
        tokio::spawn(liveness::run_monitor(
            self.config.liveness_interval,
            self.config.response_delay_threshold,
            conn.last_inbound.clone(),
            self.state_tx.subscribe(),
            Arc::clone(&self.delayed_tx),
            liveness_cancel.clone(),
        ));
        conn.liveness = Some(liveness_cancel);

        // Promote first, then tear the old connection down: the other order
        // would let the old socket's disconnect read as a failure of the
        // connection that just came up.
        let previous = self.active.take();
        self.active = Some(conn);
        self.state_tx.send_replace(SessionState::Connected);
        self.retry.reset();
        info!(generation, "session connected");

        if let Some(previous) = previous {
            self.teardown_conn(previous, "replaced by a newer connection");
        }
    }

    fn handle_connect_failed(&mut self, generation: u64, error: String) {
        if self
            .pending
            .take_if(|conn| conn.generation == generation)
            .is_none()
        {
            return;
        }
        warn!(generation, %error, "connection attempt failed");
        self.schedule_retry(&error);
    }

    fn handle_go_away(&mut self, generation: u64) {
        let is_active = self
            .active
            .as_ref()
            .is_some_and(|conn| conn.generation == generation);
        if !is_active || self.pending.is_some() {
            return;
        }
        info!("service announced an imminent disconnect; reconnecting ahead of it");
        self.state_tx.send_replace(SessionState::Reconnecting);
        // The old connection keeps serving until the replacement is
        // promoted.
        self.begin_connect();
    }

    fn handle_down(&mut self, generation: u64, reason: String) {
        let Some(conn) = self
            .active
            .take_if(|conn| conn.generation == generation)
        else {
            debug!(generation, "ignoring transport loss from a stale connection");
            return;
        };
        self.teardown_conn(conn, "connection lost");
        if self.resume_token.is_some() {
            // A held token bypasses the retry budget: reconnect immediately.
            warn!(%reason, "connection lost; resuming with the held token");
            self.state_tx.send_replace(SessionState::Reconnecting);
            if self.pending.is_none() {
                self.begin_connect();
            }
        } else {
            warn!(%reason, "connection lost without a resumption token");
            self.schedule_retry(&reason);
        }
    }

    fn schedule_retry(&mut self, cause: &str) {
        self.delayed_tx.send_replace(false);
        match self.retry.next_delay(self.config.base_delay) {
            Some(delay) => {
                info!(
                    attempt = self.retry.attempt,
                    max_retries = self.config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying connection"
                );
                self.state_tx.send_replace(SessionState::Reconnecting);
                self.retry_epoch += 1;
                let epoch = self.retry_epoch;
                let internal_tx = self.internal_tx.clone();
                self.retry_timer = Some(tokio::spawn(async move {
                    time::sleep(delay).await;
                    let _ = internal_tx.send(Internal::RetryElapsed { epoch });
                }));
            }
            None => {
                error!(cause, "giving up after exhausting retries");
                self.state_tx.send_replace(SessionState::Error(format!(
                    "connection failed after {} retries: {cause}; check the network and start again",
                    self.config.max_retries
                )));
            }
        }
    }

    fn shutdown(&mut self, reason: &str) {
        self.retry_epoch += 1;
        self.cancel_retry_timer();
        if let Some(conn) = self.pending.take() {
            self.teardown_conn(conn, reason);
        }
        if let Some(conn) = self.active.take() {
            self.teardown_conn(conn, reason);
        }
        let frames: Vec<Bytes> = self.frames.drain(..).collect();
        if !frames.is_empty() {
            if let Some(hook) = &self.hooks.end_hook {
                let hook = Arc::clone(hook);
                tokio::spawn(async move { hook.on_session_end(frames).await });
            }
        }
        self.resume_token = None;
        self.retry.reset();
        self.delayed_tx.send_replace(false);
        if !matches!(*self.state_tx.borrow(), SessionState::Idle) {
            self.state_tx.send_replace(SessionState::Idle);
        }
    }

    fn teardown_conn(&self, conn: Conn, reason: &str) {
        if let Some(liveness) = conn.liveness {
            liveness.cancel();
        }
        conn.cancel.cancel();
        if let Some(transport) = conn.transport {
            transport.close(1000, reason);
        }
    }

    fn cancel_retry_timer(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }
}

/// The slice of the hooks a connection task needs.
struct ConnShared {
    transport: Arc<dyn crate::transport::Transport>,
    setup: Arc<dyn crate::hooks::SetupSource>,
    functions: Arc<dyn crate::hooks::FunctionHandler>,
    playback: mpsc::UnboundedSender<Bytes>,
}

impl ConnShared {
    fn from_hooks(hooks: &SessionHooks) -> Self {
        Self {
            transport: Arc::clone(&hooks.transport),
            setup: Arc::clone(&hooks.setup),
            functions: Arc::clone(&hooks.functions),
            playback: hooks.playback.clone(),
        }
    }
}

async fn run_connection(
    generation: u64,
    config: Arc<LiveConfig>,
    shared: ConnShared,
    resume_token: Option<String>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    last_inbound_tx: watch::Sender<Instant>,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = connection_main(
            generation,
            config,
            shared,
            resume_token,
            internal_tx,
            last_inbound_tx,
        ) => {}
    }
}

async fn connection_main(
    generation: u64,
    config: Arc<LiveConfig>,
    shared: ConnShared,
    resume_token: Option<String>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    last_inbound_tx: watch::Sender<Instant>,
) {
    let established = time::timeout(
        config.connect_timeout,
        establish(
            generation,
            &config,
            &shared,
            resume_token,
            &internal_tx,
            &last_inbound_tx,
        ),
    )
    .await;

    let (transport, mux, events) = match established {
        Ok(Ok(parts)) => parts,
        Ok(Err(e)) => {
            let _ = internal_tx.send(Internal::ConnectFailed {
                generation,
                error: format!("{e:#}"),
            });
            return;
        }
        Err(_) => {
            let _ = internal_tx.send(Internal::ConnectFailed {
                generation,
                error: format!(
                    "no setup confirmation within {}s",
                    config.connect_timeout.as_secs()
                ),
            });
            return;
        }
    };

    let _ = internal_tx.send(Internal::Ready {
        generation,
        transport,
        mux: mux.clone(),
    });
    pump(generation, mux, events, internal_tx, last_inbound_tx).await;
}

/// Dials the socket and drives the handshake through setup confirmation.
async fn establish(
    generation: u64,
    config: &LiveConfig,
    shared: &ConnShared,
    resume_token: Option<String>,
    internal_tx: &mpsc::UnboundedSender<Internal>,
    last_inbound_tx: &watch::Sender<Instant>,
) -> anyhow::Result<(
    TransportHandle,
    StreamMux,
    mpsc::UnboundedReceiver<TransportEvent>,
)> {
    let setup = shared
        .setup
        .load()
        .await
        .context("loading session setup")?;
    let (transport, mut events) = shared.transport.connect();

    loop {
        let event = events
            .recv()
            .await
            .context("transport closed before the socket opened")?;
        match event {
            TransportEvent::Open => break,
            TransportEvent::Failed { error } => bail!("transport failed: {error}"),
            TransportEvent::Closed { code, reason } => {
                bail!("socket closed while connecting: {code} {reason}")
            }
            TransportEvent::Message(_) => {}
        }
    }

    let encoded = protocol::encode(&build_setup(config, setup, resume_token))?;
    if !transport.send(encoded) {
        bail!("setup message could not be sent");
    }

    let mux = StreamMux::new(
        transport.clone(),
        shared.playback.clone(),
        Arc::clone(&shared.functions),
    );

    // The session is not usable until the service confirms the setup.
    loop {
        let event = events
            .recv()
            .await
            .context("transport closed during the handshake")?;
        match event {
            TransportEvent::Message(raw) => {
                last_inbound_tx.send_replace(Instant::now());
                match mux.route(&raw) {
                    Some(ControlEvent::SetupComplete) => return Ok((transport, mux, events)),
                    Some(ControlEvent::ResumptionUpdate {
                        new_handle: Some(token),
                        ..
                    }) => {
                        let _ = internal_tx.send(Internal::ResumeToken { generation, token });
                    }
                    Some(other) => debug!(?other, "control message before setup completed"),
                    None => {}
                }
            }
            TransportEvent::Failed { error } => {
                bail!("transport failed during the handshake: {error}")
            }
            TransportEvent::Closed { code, reason } => {
                bail!("socket closed during the handshake: {code} {reason}")
            }
            TransportEvent::Open => {}
        }
    }
}

/// Pumps a promoted connection until the socket goes away.
async fn pump(
    generation: u64,
    mux: StreamMux,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    last_inbound_tx: watch::Sender<Instant>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(raw) => {
                last_inbound_tx.send_replace(Instant::now());
                match mux.route(&raw) {
                    Some(ControlEvent::ResumptionUpdate {
                        new_handle: Some(token),
                        resumable,
                    }) => {
                        debug!(generation, resumable, "resumption token received");
                        let _ = internal_tx.send(Internal::ResumeToken { generation, token });
                    }
                    Some(ControlEvent::GoAway { time_left }) => {
                        info!(generation, ?time_left, "go-away received");
                        let _ = internal_tx.send(Internal::GoAway { generation });
                    }
                    _ => {}
                }
            }
            TransportEvent::Closed { code, reason } => {
                let _ = internal_tx.send(Internal::Down {
                    generation,
                    reason: format!("socket closed: {code} {reason}"),
                });
                return;
            }
            TransportEvent::Failed { error } => {
                let _ = internal_tx.send(Internal::Down {
                    generation,
                    reason: format!("transport failure: {error}"),
                });
                return;
            }
            TransportEvent::Open => {}
        }
    }
    let _ = internal_tx.send(Internal::Down {
        generation,
        reason: "transport event stream ended".to_string(),
    });
}

fn build_setup(
    config: &LiveConfig,
    setup: SessionSetup,
    resume_token: Option<String>,
) -> ClientMessage {
    let compression = config
        .enable_compression
        .then(|| ContextWindowCompression {
            sliding_window: SlidingWindow::default(),
        });
    ClientMessage::Setup(Setup {
        model: config.qualified_model(),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: setup.voice_name,
                    },
                },
            }),
        },
        system_instruction: Some(SystemInstruction {
            parts: vec![Part {
                text: setup.system_instruction,
            }],
        }),
        tools: (!setup.tools.is_empty()).then_some(setup.tools),
        context_window_compression: compression,
        // Always offered so the service hands out resumption tokens; the
        // handle is only present on an actual resume.
        session_resumption: Some(SessionResumption {
            handle: resume_token,
        }),
    })
}
