//! In-memory trainer used for demo runs and tests.
//!
//! Frames are injected with [`SimulatedTrainer::push_sample`] /
//! [`SimulatedTrainer::push_frame`]; every control point write is recorded.
//! Link loss and failing reconnects can be scripted.

use crate::sensors::ftms::{decode_command, encode_telemetry, ControlCommand, TelemetrySample};
use crate::sensors::transport::{TrainerTransport, FRAME_CHANNEL_CAPACITY};
use crate::sensors::types::TransportError;
use futures::future::BoxFuture;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    frame_tx: Option<mpsc::Sender<Vec<u8>>>,
    failing_reconnects: u32,
    fail_writes: bool,
    writes: Vec<Vec<u8>>,
    reconnect_attempts: u32,
}

/// Scriptable trainer implementing [`TrainerTransport`].
#[derive(Debug)]
pub struct SimulatedTrainer {
    state: Mutex<SimState>,
}

impl SimulatedTrainer {
    /// A connected trainer with no subscription yet.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                connected: true,
                ..SimState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a raw Indoor Bike Data frame to the current subscriber.
    ///
    /// Returns false when there is no live subscription.
    pub async fn push_frame(&self, frame: Vec<u8>) -> bool {
        let tx = self.state().frame_tx.clone();
        match tx {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    /// Encode and deliver a telemetry sample.
    pub async fn push_sample(&self, sample: TelemetrySample) -> bool {
        self.push_frame(encode_telemetry(&sample)).await
    }

    /// Drop the link: the subscriber's channel closes and writes start failing.
    pub fn drop_link(&self) {
        let mut state = self.state();
        state.connected = false;
        state.frame_tx = None;
    }

    /// Make the next `n` reconnect attempts fail.
    pub fn fail_next_reconnects(&self, n: u32) {
        self.state().failing_reconnects = n;
    }

    /// Make every write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Raw frames written so far, oldest first.
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// Written frames decoded back into commands.
    pub fn written_commands(&self) -> Vec<ControlCommand> {
        self.state()
            .writes
            .iter()
            .filter_map(|frame| decode_command(frame).ok())
            .collect()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.state().reconnect_attempts
    }
}

impl Default for SimulatedTrainer {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainerTransport for SimulatedTrainer {
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Vec<u8>>, TransportError>> {
        Box::pin(async move {
            let mut state = self.state();
            if !state.connected {
                return Err(TransportError::Disconnected);
            }
            let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
            state.frame_tx = Some(tx);
            Ok(rx)
        })
    }

    fn write<'a>(&'a self, frame: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let mut state = self.state();
            if !state.connected {
                return Err(TransportError::Disconnected);
            }
            if state.fail_writes {
                return Err(TransportError::WriteFailed("simulated failure".to_string()));
            }
            state.writes.push(frame.to_vec());
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn reconnect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let mut state = self.state();
            state.reconnect_attempts += 1;
            if state.failing_reconnects > 0 {
                state.failing_reconnects -= 1;
                return Err(TransportError::ConnectionFailed(
                    "simulated reconnect failure".to_string(),
                ));
            }
            state.connected = true;
            Ok(())
        })
    }
}
