//! Ride session: the async driver around [`RideController`].
//!
//! One task runs the control loop. It waits on the tick timer, on events from
//! session-scoped helper tasks (frame forwarders, the outbound worker and
//! reconnection) and on requests from a [`SessionHandle`]. Every helper task
//! lives in a single `JoinSet` that is aborted when the session ends.

use crate::ride::control::{ControlConfig, ControlError, RideController};
use crate::ride::outbound::{run_worker, OutboundQueue};
use crate::ride::state::{ride_state, RideSnapshot, RideStateReader};
use crate::ride::summary::RideSummary;
use crate::sensors::ftms::{decode_telemetry, encode_command, ControlCommand};
use crate::sensors::transport::TrainerTransport;
use crate::sensors::types::ReconnectPolicy;
use crate::storage::config::AppConfig;
use crate::world::route::RouteProfile;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Events delivered to the control loop by session tasks.
#[derive(Debug)]
pub enum SessionEvent {
    /// A raw telemetry frame from subscription `generation`
    Frame { generation: u64, bytes: Vec<u8> },
    /// Subscription `generation` closed
    LinkLost { generation: u64 },
    /// Reconnection attempt `attempt` is pending
    ReconnectAttempt { attempt: u32 },
    /// The transport reconnected
    Reconnected,
    /// Reconnection gave up
    ReconnectExhausted,
    /// The outbound worker dropped a command
    CommandFailed {
        command: ControlCommand,
        error: String,
    },
}

/// Operations a client can request from a running session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RideCommand {
    ToggleDemoLive,
    EnterErg { watts: u16 },
    SetErgTarget { watts: u16 },
    EnterSim,
    ExitControl,
    SetResistanceScale(f64),
    Pause,
    Resume,
    EmergencyStop,
    StartRecording,
    StopRecording,
    End,
}

struct SessionRequest {
    command: RideCommand,
    reply: oneshot::Sender<Result<(), ControlError>>,
}

/// Session errors seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("ride session is no longer running")]
    Closed,

    #[error("request rejected: {0}")]
    Rejected(#[from] ControlError),
}

/// Client side of a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<SessionRequest>,
    reader: RideStateReader,
}

impl SessionHandle {
    /// Send a request and wait until the control loop applied it.
    pub async fn request(&self, command: RideCommand) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(SessionRequest { command, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)??;
        Ok(())
    }

    pub async fn toggle_demo_live(&self) -> Result<(), SessionError> {
        self.request(RideCommand::ToggleDemoLive).await
    }

    pub async fn enter_erg(&self, watts: u16) -> Result<(), SessionError> {
        self.request(RideCommand::EnterErg { watts }).await
    }

    pub async fn set_erg_target(&self, watts: u16) -> Result<(), SessionError> {
        self.request(RideCommand::SetErgTarget { watts }).await
    }

    pub async fn enter_sim(&self) -> Result<(), SessionError> {
        self.request(RideCommand::EnterSim).await
    }

    pub async fn exit_control(&self) -> Result<(), SessionError> {
        self.request(RideCommand::ExitControl).await
    }

    pub async fn set_resistance_scale(&self, scale: f64) -> Result<(), SessionError> {
        self.request(RideCommand::SetResistanceScale(scale)).await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.request(RideCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(RideCommand::Resume).await
    }

    pub async fn emergency_stop(&self) -> Result<(), SessionError> {
        self.request(RideCommand::EmergencyStop).await
    }

    /// Ask the session to end. The summary is the result of the session task.
    pub async fn end(&self) -> Result<(), SessionError> {
        self.request(RideCommand::End).await
    }

    pub fn reader(&self) -> RideStateReader {
        self.reader.clone()
    }

    pub fn snapshot(&self) -> Arc<RideSnapshot> {
        self.reader.snapshot()
    }
}

/// Session-level settings taken from the app configuration.
#[derive(Debug, Clone)]
struct SessionSettings {
    tick_interval: Duration,
    auto_reconnect: bool,
    reconnect: ReconnectPolicy,
    auto_record: bool,
}

/// A ride in progress.
pub struct RideSession {
    controller: RideController,
    transport: Option<Arc<dyn TrainerTransport>>,
    settings: SessionSettings,
    requests: mpsc::Receiver<SessionRequest>,
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl RideSession {
    /// Set up a session on `route`; without a transport it rides in Demo mode.
    pub fn new(
        config: &AppConfig,
        route: Arc<dyn RouteProfile>,
        transport: Option<Arc<dyn TrainerTransport>>,
    ) -> (Self, SessionHandle) {
        let (writer, reader) = ride_state(RideSnapshot::default());
        let connected = transport.as_ref().is_some_and(|t| t.is_connected());
        let controller =
            RideController::new(ControlConfig::from(config), route, writer, connected, now());

        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let session = Self {
            controller,
            transport,
            settings: SessionSettings {
                tick_interval: config.control.tick_interval(),
                auto_reconnect: config.trainer.auto_reconnect,
                reconnect: config.trainer.reconnect_policy(),
                auto_record: config.recording.auto_record,
            },
            requests: requests_rx,
        };
        let handle = SessionHandle {
            requests: requests_tx,
            reader,
        };
        (session, handle)
    }

    /// Run the session on its own task.
    pub fn spawn(self) -> JoinHandle<RideSummary> {
        tokio::spawn(self.run())
    }

    /// Drive the ride until it completes, is ended, or every handle is dropped.
    pub async fn run(self) -> RideSummary {
        let RideSession {
            mut controller,
            transport,
            settings,
            mut requests,
        } = self;

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut tasks = JoinSet::new();
        let queue = Arc::new(OutboundQueue::new());
        let mut generation = 0u64;

        if let Some(transport) = &transport {
            tasks.spawn(run_worker(queue.clone(), transport.clone(), events_tx.clone()));
            if transport.is_connected() {
                if let Err(e) =
                    subscribe(transport, generation, &events_tx, &mut tasks).await
                {
                    tracing::warn!("Telemetry subscription failed: {}", e);
                    handle_link_lost(&mut controller, transport, &settings, &events_tx, &mut tasks);
                }
            } else {
                tracing::warn!("Trainer not connected at session start");
                handle_link_lost(&mut controller, transport, &settings, &events_tx, &mut tasks);
            }
        }

        if settings.auto_record {
            controller.start_recording();
        }

        let mut ticker = tokio::time::interval(settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = controller.tick(now());
                    queue.push_all(outcome.commands);
                    if outcome.completed {
                        break;
                    }
                }
                Some(event) = events_rx.recv() => {
                    let completed = handle_event(
                        event,
                        &mut controller,
                        &transport,
                        &settings,
                        &queue,
                        &events_tx,
                        &mut tasks,
                        &mut generation,
                    )
                    .await;
                    if completed {
                        break;
                    }
                }
                request = requests.recv() => {
                    let Some(SessionRequest { command, reply }) = request else {
                        tracing::info!("All session handles dropped, ending ride");
                        break;
                    };
                    if command == RideCommand::End {
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    let result =
                        handle_request(command, &mut controller, &transport, &queue).await;
                    if let Err(e) = &result {
                        tracing::warn!("Rejected {:?}: {}", command, e);
                    }
                    let _ = reply.send(result);
                }
            }
        }

        let (summary, commands) = controller.finish(now());
        queue.clear();
        if let Some(transport) = &transport {
            for command in commands {
                if let Err(e) = transport.write(&encode_command(&command)).await {
                    tracing::warn!("Failed to release trainer: {}", e);
                }
            }
        }

        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        summary
    }
}

async fn subscribe(
    transport: &Arc<dyn TrainerTransport>,
    generation: u64,
    events: &mpsc::Sender<SessionEvent>,
    tasks: &mut JoinSet<()>,
) -> Result<(), crate::sensors::types::TransportError> {
    let frames = transport.subscribe().await?;
    tasks.spawn(forward_frames(frames, generation, events.clone()));
    tracing::debug!("Subscribed to telemetry (generation {})", generation);
    Ok(())
}

/// Tag frames with their subscription generation and report when they stop.
async fn forward_frames(
    mut frames: mpsc::Receiver<Vec<u8>>,
    generation: u64,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(bytes) = frames.recv().await {
        if events
            .send(SessionEvent::Frame { generation, bytes })
            .await
            .is_err()
        {
            return;
        }
    }
    let _ = events.send(SessionEvent::LinkLost { generation }).await;
}

/// Retry the link with capped exponential backoff.
async fn reconnect(
    transport: Arc<dyn TrainerTransport>,
    policy: ReconnectPolicy,
    events: mpsc::Sender<SessionEvent>,
) {
    for attempt in 1..=policy.max_attempts {
        if events
            .send(SessionEvent::ReconnectAttempt { attempt })
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(policy.delay_for(attempt)).await;

        match transport.reconnect().await {
            Ok(()) => {
                let _ = events.send(SessionEvent::Reconnected).await;
                return;
            }
            Err(e) => tracing::warn!("Reconnect attempt {} failed: {}", attempt, e),
        }
    }
    let _ = events.send(SessionEvent::ReconnectExhausted).await;
}

fn handle_link_lost(
    controller: &mut RideController,
    transport: &Arc<dyn TrainerTransport>,
    settings: &SessionSettings,
    events: &mpsc::Sender<SessionEvent>,
    tasks: &mut JoinSet<()>,
) {
    controller.on_connection_lost(now(), settings.auto_reconnect);
    if settings.auto_reconnect {
        tasks.spawn(reconnect(
            transport.clone(),
            settings.reconnect,
            events.clone(),
        ));
    }
}

/// Apply one session event. Returns true when the ride completed.
#[allow(clippy::too_many_arguments)]
async fn handle_event(
    event: SessionEvent,
    controller: &mut RideController,
    transport: &Option<Arc<dyn TrainerTransport>>,
    settings: &SessionSettings,
    queue: &OutboundQueue,
    events: &mpsc::Sender<SessionEvent>,
    tasks: &mut JoinSet<()>,
    generation: &mut u64,
) -> bool {
    match event {
        SessionEvent::Frame {
            generation: g,
            bytes,
        } if g == *generation => match decode_telemetry(&bytes) {
            Ok(sample) => {
                tracing::trace!("Telemetry {:?}", sample);
                let outcome = controller.on_telemetry(&sample, now());
                queue.push_all(outcome.commands);
                return outcome.completed;
            }
            Err(e) => {
                tracing::warn!("Dropping telemetry frame: {}", e);
                controller.on_decode_error();
            }
        },
        SessionEvent::Frame { generation: g, .. } => {
            tracing::trace!("Ignoring frame from stale subscription {}", g);
        }
        SessionEvent::LinkLost { generation: g } if g == *generation => {
            if let Some(transport) = transport {
                queue.clear();
                handle_link_lost(controller, transport, settings, events, tasks);
            }
        }
        SessionEvent::LinkLost { .. } => {}
        SessionEvent::ReconnectAttempt { attempt } => {
            tracing::info!("Reconnecting to trainer (attempt {})", attempt);
            controller.on_reconnect_attempt(attempt);
        }
        SessionEvent::Reconnected => {
            let Some(transport) = transport else {
                return false;
            };
            *generation += 1;
            match subscribe(transport, *generation, events, tasks).await {
                Ok(()) => {
                    let commands = controller.on_reconnected(now());
                    queue.push_all(commands);
                }
                Err(e) => {
                    tracing::warn!("Resubscribe after reconnect failed: {}", e);
                    handle_link_lost(controller, transport, settings, events, tasks);
                }
            }
        }
        SessionEvent::ReconnectExhausted => {
            controller.on_reconnect_exhausted(now());
        }
        SessionEvent::CommandFailed { command, error } => {
            tracing::debug!("Command {:?} was not delivered: {}", command, error);
        }
    }
    false
}

async fn handle_request(
    command: RideCommand,
    controller: &mut RideController,
    transport: &Option<Arc<dyn TrainerTransport>>,
    queue: &OutboundQueue,
) -> Result<(), ControlError> {
    let at = now();
    let commands = match command {
        RideCommand::ToggleDemoLive => controller.toggle_demo_live(at).map(|()| Vec::new())?,
        RideCommand::EnterErg { watts } => controller.enter_erg(watts, at)?,
        RideCommand::SetErgTarget { watts } => controller.set_erg_target(watts, at)?,
        RideCommand::EnterSim => controller.enter_sim(at)?,
        RideCommand::ExitControl => controller.exit_control(at)?,
        RideCommand::SetResistanceScale(scale) => {
            controller.set_resistance_scale(scale).map(|()| Vec::new())?
        }
        RideCommand::Pause => controller.pause(at),
        RideCommand::Resume => {
            controller.resume(at);
            Vec::new()
        }
        RideCommand::StartRecording => {
            controller.start_recording();
            Vec::new()
        }
        RideCommand::StopRecording => {
            controller.stop_recording();
            Vec::new()
        }
        RideCommand::EmergencyStop => {
            let commands = controller.emergency_stop(at);
            queue.clear();
            emergency_write(transport, &commands).await;
            Vec::new()
        }
        RideCommand::End => Vec::new(),
    };
    queue.push_all(commands);
    Ok(())
}

/// Write emergency commands directly, skipping the queue.
async fn emergency_write(transport: &Option<Arc<dyn TrainerTransport>>, commands: &[ControlCommand]) {
    let Some(transport) = transport else {
        tracing::error!("Emergency stop requested without a trainer");
        return;
    };
    for command in commands {
        if let Err(e) = transport.write(&encode_command(command)).await {
            tracing::error!("Emergency stop write {:?} failed: {}", command, e);
            return;
        }
    }
}
