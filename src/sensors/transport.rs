//! Trainer transport: the link the control loop talks through.
//!
//! [`TrainerTransport`] is object-safe so a session can hold either the BLE
//! implementation or the in-memory [`SimulatedTrainer`](super::simulated::SimulatedTrainer).

use crate::sensors::ftms::{
    decode_control_response, FTMS_CONTROL_POINT_UUID, FTMS_SERVICE_UUID, INDOOR_BIKE_DATA_UUID,
};
use crate::sensors::types::TransportError;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::future::BoxFuture;
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Capacity of the frame channel handed out by `subscribe`.
pub const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Link to a single smart trainer.
pub trait TrainerTransport: Send + Sync {
    /// Start delivering Indoor Bike Data frames.
    ///
    /// The returned receiver closes when the link is lost.
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Vec<u8>>, TransportError>>;

    /// Write one control point frame, resolving once the trainer acknowledged it.
    fn write<'a>(&'a self, frame: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool;

    /// Re-establish a lost link. Subscriptions must be renewed afterwards.
    fn reconnect(&self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// FTMS trainer reached through btleplug.
pub struct BleTrainer {
    adapter: Adapter,
    device_id: String,
    connection_timeout: Duration,
    peripheral: Mutex<Option<Peripheral>>,
    connected: Arc<AtomicBool>,
}

impl BleTrainer {
    /// Connect to an already-known trainer by device id.
    pub async fn connect(
        device_id: &str,
        connection_timeout: Duration,
    ) -> Result<Self, TransportError> {
        tracing::info!("Initializing BLE adapter");

        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::BleError(e.to_string()))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| TransportError::BleError(e.to_string()))?
            .into_iter()
            .next()
            .ok_or(TransportError::AdapterNotFound)?;

        let trainer = Self {
            adapter,
            device_id: device_id.to_string(),
            connection_timeout,
            peripheral: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        };

        let peripheral = trainer.open().await?;
        *trainer.peripheral.lock().await = Some(peripheral);
        trainer.connected.store(true, Ordering::SeqCst);

        tracing::info!("Connected to trainer: {}", device_id);
        Ok(trainer)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Locate the trainer with an FTMS-filtered scan and connect to it.
    async fn open(&self) -> Result<Peripheral, TransportError> {
        tracing::info!("Connecting to trainer: {}", self.device_id);

        let scan_filter = ScanFilter {
            services: vec![FTMS_SERVICE_UUID],
        };
        self.adapter
            .start_scan(scan_filter)
            .await
            .map_err(|e| TransportError::BleError(e.to_string()))?;

        let found = tokio::time::timeout(self.connection_timeout, self.find_peripheral()).await;

        if let Err(e) = self.adapter.stop_scan().await {
            tracing::debug!("Failed to stop scan: {}", e);
        }

        let peripheral = match found {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::ConnectionTimeout),
        };

        tokio::time::timeout(self.connection_timeout, peripheral.connect())
            .await
            .map_err(|_| TransportError::ConnectionTimeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(peripheral)
    }

    async fn find_peripheral(&self) -> Result<Peripheral, TransportError> {
        loop {
            let peripherals = self
                .adapter
                .peripherals()
                .await
                .map_err(|e| TransportError::BleError(e.to_string()))?;

            if let Some(peripheral) = peripherals
                .into_iter()
                .find(|p| p.id().to_string() == self.device_id)
            {
                return Ok(peripheral);
            }

            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn current_peripheral(&self) -> Result<Peripheral, TransportError> {
        self.peripheral
            .lock()
            .await
            .clone()
            .ok_or(TransportError::Disconnected)
    }

    fn characteristic(
        peripheral: &Peripheral,
        uuid: uuid::Uuid,
    ) -> Result<Characteristic, TransportError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::MissingCharacteristic(uuid))
    }

    async fn subscribe_frames(&self) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let peripheral = self.current_peripheral().await?;

        for uuid in [INDOOR_BIKE_DATA_UUID, FTMS_CONTROL_POINT_UUID] {
            let characteristic = Self::characteristic(&peripheral, uuid)?;
            peripheral
                .subscribe(&characteristic)
                .await
                .map_err(|e| TransportError::SubscriptionFailed(e.to_string()))?;
            tracing::debug!("Subscribed to characteristic: {}", uuid);
        }

        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::SubscriptionFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let connected = self.connected.clone();
        let device_id = self.device_id.clone();

        tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == INDOOR_BIKE_DATA_UUID {
                    if tx.send(notification.value).await.is_err() {
                        // Subscriber went away; keep the link state untouched.
                        return;
                    }
                } else if notification.uuid == FTMS_CONTROL_POINT_UUID {
                    log_control_response(&notification.value);
                }
            }

            // Stream ended - trainer disconnected
            connected.store(false, Ordering::SeqCst);
            tracing::warn!("Trainer {} notification stream ended", device_id);
        });

        Ok(rx)
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let peripheral = self.current_peripheral().await?;
        let control_point = Self::characteristic(&peripheral, FTMS_CONTROL_POINT_UUID)?;

        peripheral
            .write(&control_point, frame, WriteType::WithResponse)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        tracing::trace!("Wrote control point frame {:02x?}", frame);
        Ok(())
    }

    async fn reopen(&self) -> Result<(), TransportError> {
        let stale = self.peripheral.lock().await.take();
        if let Some(stale) = stale {
            if let Err(e) = stale.disconnect().await {
                tracing::debug!("Ignoring disconnect error on stale link: {}", e);
            }
        }

        let peripheral = self.open().await?;
        *self.peripheral.lock().await = Some(peripheral);
        self.connected.store(true, Ordering::SeqCst);

        tracing::info!("Reconnected to trainer: {}", self.device_id);
        Ok(())
    }
}

fn log_control_response(data: &[u8]) {
    match decode_control_response(data) {
        Ok(response) if response.is_success() => {
            tracing::trace!("Control point accepted opcode {:#04x}", response.request_opcode);
        }
        Ok(response) => {
            tracing::warn!(
                "Trainer rejected opcode {:#04x}: {:?}",
                response.request_opcode,
                response.result
            );
        }
        Err(e) => tracing::debug!("Unparseable control point indication: {}", e),
    }
}

impl TrainerTransport for BleTrainer {
    fn subscribe(&self) -> BoxFuture<'_, Result<mpsc::Receiver<Vec<u8>>, TransportError>> {
        Box::pin(self.subscribe_frames())
    }

    fn write<'a>(&'a self, frame: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(self.write_frame(frame))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn reconnect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(self.reopen())
    }
}
