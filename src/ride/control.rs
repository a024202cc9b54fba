//! Ride control loop state machine.
//!
//! [`RideController`] owns the ride: it ingests telemetry, integrates distance
//! and time, runs the grade smoother in SIM mode and decides which control
//! commands go to the trainer. It performs no I/O and takes the current
//! instant as an argument, so a session (or a test) drives it with its own
//! clock. Commands it returns are handed to the outbound queue by the caller.

use crate::ride::demo::DemoTrajectory;
use crate::ride::state::{RideMode, RideSnapshot, RideStateReader, RideStateWriter};
use crate::ride::summary::{RideSummary, SummaryAccumulator};
use crate::sensors::ftms::{ControlCommand, TelemetrySample};
use crate::sensors::incline::{apply_resistance_scale, GradeSmoother, RESISTANCE_SCALE_RANGE};
use crate::sensors::types::ConnectionStatus;
use crate::storage::config::AppConfig;
use crate::world::physics::{distance_increment, PhysicsModel};
use crate::world::route::RouteProfile;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Longest clock step integrated in one tick.
pub const MAX_TICK_DT: Duration = Duration::from_secs(5);

/// Control loop parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlConfig {
    pub mass_kg: f64,
    pub physics: PhysicsModel,
    pub sim_interval: Duration,
    pub erg_refresh: Duration,
    pub smoothing_window_m: f64,
    pub max_grade_rate_pct_per_s: f64,
    pub resistance_scale: f64,
    pub rolling_resistance: f64,
    pub wind_resistance: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ControlConfig {
    fn from(config: &AppConfig) -> Self {
        let control = &config.control;
        Self {
            mass_kg: config.rider.total_mass_kg(),
            physics: control.physics(),
            sim_interval: control.sim_command_interval(),
            erg_refresh: control.erg_refresh_interval(),
            smoothing_window_m: control.smoothing_window_m,
            max_grade_rate_pct_per_s: control.max_grade_rate_pct_per_s,
            resistance_scale: control.resistance_scale,
            rolling_resistance: control.rolling_resistance,
            wind_resistance: control.wind_resistance,
        }
    }
}

/// Rejected mode transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("no trainer connected")]
    NotConnected,

    #[error("leave {0} mode first")]
    ControlModeActive(&'static str),

    #[error("not in ERG mode")]
    NotInErg,

    #[error("ride has ended")]
    SessionEnded,

    #[error("resistance scale must be a finite number")]
    InvalidResistanceScale,
}

/// Where power, cadence and speed come from outside ERG/SIM control.
#[derive(Debug, Clone, Copy)]
enum PowerSource {
    Synthetic(DemoTrajectory),
    Trainer,
}

/// Commands produced by a tick, and whether the route end was reached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub commands: Vec<ControlCommand>,
    pub completed: bool,
}

/// The ride's mode state machine.
pub struct RideController {
    config: ControlConfig,
    route: Arc<dyn RouteProfile>,
    writer: RideStateWriter,
    ride: RideSnapshot,
    source: PowerSource,
    last_tick: Instant,
    smoother: Option<GradeSmoother>,
    next_sim_at: Instant,
    next_erg_at: Instant,
    control_held: bool,
    reported_speed: Option<f64>,
    last_known_power: Option<f64>,
    summary: SummaryAccumulator,
    ended: bool,
}

impl RideController {
    /// Start a ride at `now`.
    ///
    /// With a connected trainer the ride starts in Live mode, otherwise in Demo.
    pub fn new(
        config: ControlConfig,
        route: Arc<dyn RouteProfile>,
        mut writer: RideStateWriter,
        trainer_connected: bool,
        now: Instant,
    ) -> Self {
        let (mode, source, connection_status) = if trainer_connected {
            (RideMode::Live, PowerSource::Trainer, ConnectionStatus::Connected)
        } else {
            (
                RideMode::Demo,
                PowerSource::Synthetic(DemoTrajectory::starting_at(0.0)),
                ConnectionStatus::Disconnected,
            )
        };

        let ride = RideSnapshot {
            mode,
            connection_status,
            resistance_scale: config.resistance_scale,
            grade_pct: route.grade_at(0.0),
            elevation_m: route.elevation_at(0.0),
            ..RideSnapshot::default()
        };
        writer.publish(ride.clone());

        let mut summary = SummaryAccumulator::new();
        summary.record(0.0, 0.0, ride.elevation_m);

        tracing::info!("Ride on '{}' started in {} mode", route.name(), mode);

        Self {
            config,
            route,
            writer,
            ride,
            source,
            last_tick: now,
            smoother: None,
            next_sim_at: now,
            next_erg_at: now,
            control_held: false,
            reported_speed: None,
            last_known_power: None,
            summary,
            ended: false,
        }
    }

    pub fn reader(&self) -> RideStateReader {
        self.writer.reader()
    }

    /// Current (last published) ride state.
    pub fn snapshot(&self) -> &RideSnapshot {
        &self.ride
    }

    pub fn route(&self) -> &Arc<dyn RouteProfile> {
        &self.route
    }

    fn link_up(&self) -> bool {
        self.ride.connection_status.is_connected()
    }

    fn publish(&mut self) {
        self.writer.publish(self.ride.clone());
        self.ride = self.writer.current().clone();
    }

    fn guard_active(&self) -> Result<(), ControlError> {
        if self.ended {
            Err(ControlError::SessionEnded)
        } else {
            Ok(())
        }
    }

    /// Session commands that must precede a target command.
    fn ensure_control(&mut self, commands: &mut Vec<ControlCommand>) {
        if !self.control_held && self.link_up() {
            commands.push(ControlCommand::RequestControl);
            commands.push(ControlCommand::StartOrResume);
            self.control_held = true;
        }
    }

    fn sim_command(&self, grade_pct: f64) -> ControlCommand {
        ControlCommand::SetSimulationParameters {
            grade_pct,
            rolling_resistance: self.config.rolling_resistance,
            wind_resistance: self.config.wind_resistance,
        }
    }

    /// Ingest a decoded telemetry sample, then tick.
    pub fn on_telemetry(&mut self, sample: &TelemetrySample, now: Instant) -> TickOutcome {
        if !self.ended && matches!(self.source, PowerSource::Trainer) {
            let power = sample.power_w.map(f64::from);
            if let Some(power) = power {
                self.ride.power_w = power;
                self.last_known_power = Some(power);
            }
            if let Some(cadence) = sample.cadence_rpm {
                self.ride.cadence_rpm = cadence;
            }
            if let Some(hr) = sample.heart_rate_bpm {
                self.ride.heart_rate_bpm = Some(hr);
            }
            if matches!(self.ride.mode, RideMode::Live) {
                if let Some(speed) = sample.speed_mps {
                    self.reported_speed = Some(speed);
                }
            }
        }
        self.tick(now)
    }

    /// Count a frame that failed to decode.
    pub fn on_decode_error(&mut self) {
        self.ride.dropped_frames += 1;
    }

    /// Whether integration is suspended by the link state.
    fn frozen(&self) -> bool {
        if matches!(self.source, PowerSource::Synthetic(_)) && !self.ride.mode.is_controlled() {
            return false;
        }
        match self.ride.connection_status {
            ConnectionStatus::Connected => false,
            ConnectionStatus::Reconnecting { .. } => true,
            ConnectionStatus::Disconnected => match self.source {
                PowerSource::Synthetic(_) => false,
                PowerSource::Trainer => {
                    !(self.ride.mode.is_controlled() && self.last_known_power.is_some())
                }
            },
        }
    }

    /// Advance the ride to `now`.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let dt = now
            .saturating_duration_since(self.last_tick)
            .min(MAX_TICK_DT)
            .as_secs_f64();
        self.last_tick = self.last_tick.max(now);

        let mut outcome = TickOutcome {
            commands: Vec::new(),
            completed: self.ride.completed,
        };
        if self.ended || self.ride.completed {
            return outcome;
        }
        if self.ride.paused || self.frozen() {
            self.publish();
            return outcome;
        }

        // Power, cadence and speed for this step
        let speed = match self.source {
            PowerSource::Synthetic(trajectory) => {
                let demo = trajectory.sample(self.ride.elapsed_time_s);
                self.ride.power_w = demo.power_w;
                self.ride.cadence_rpm = demo.cadence_rpm;
                if self.ride.mode.is_controlled() {
                    self.physics_speed(demo.power_w)
                } else {
                    demo.speed_mps
                }
            }
            PowerSource::Trainer if self.ride.mode.is_controlled() => {
                let power = if self.link_up() {
                    self.ride.power_w
                } else {
                    self.last_known_power.unwrap_or(0.0)
                };
                self.physics_speed(power)
            }
            PowerSource::Trainer => match self.reported_speed {
                Some(speed) => speed,
                None => self.physics_speed(self.ride.power_w),
            },
        };

        self.ride.speed_mps = speed;
        self.ride.elapsed_time_s += dt;
        self.ride.distance_m += distance_increment(speed, dt);

        let total = self.route.total_distance_m();
        if self.ride.distance_m >= total {
            self.ride.distance_m = total;
            self.ride.completed = true;
            outcome.completed = true;
            tracing::info!(
                "Route '{}' completed in {:.1}s",
                self.route.name(),
                self.ride.elapsed_time_s
            );
        }

        self.ride.grade_pct = self.route.grade_at(self.ride.distance_m);
        self.ride.elevation_m = self.route.elevation_at(self.ride.distance_m);
        self.summary.record(self.ride.power_w, dt, self.ride.elevation_m);

        match self.ride.mode {
            RideMode::Sim => {
                let (distance, grade) = (self.ride.distance_m, self.ride.grade_pct);
                if let Some(smoother) = self.smoother.as_mut() {
                    smoother.push(distance, grade);
                }
                if now >= self.next_sim_at && !outcome.completed {
                    self.next_sim_at = now + self.config.sim_interval;
                    if let Some(target) = self.smoother.as_mut().map(|s| s.current_target(now)) {
                        let grade = apply_resistance_scale(target, self.ride.resistance_scale);
                        self.ride.target_grade_pct = grade;
                        if self.link_up() {
                            tracing::debug!("SIM grade {:.2}%", grade);
                            outcome.commands.push(self.sim_command(grade));
                        }
                    }
                }
            }
            RideMode::Erg { target_watts } => {
                if now >= self.next_erg_at && !outcome.completed {
                    self.next_erg_at = now + self.config.erg_refresh;
                    if self.link_up() {
                        tracing::debug!("Refreshing ERG target {}W", target_watts);
                        outcome
                            .commands
                            .push(ControlCommand::SetTargetPower(i32::from(target_watts)));
                    }
                }
            }
            RideMode::Demo | RideMode::Live => {}
        }

        self.publish();
        outcome
    }

    fn physics_speed(&self, power_w: f64) -> f64 {
        self.config.physics.virtual_speed(
            power_w,
            self.ride.grade_pct,
            self.config.mass_kg,
            self.ride.speed_mps,
        )
    }

    /// Switch between Demo and Live.
    pub fn toggle_demo_live(&mut self, _now: Instant) -> Result<(), ControlError> {
        self.guard_active()?;
        match self.ride.mode {
            RideMode::Demo => {
                if !self.link_up() {
                    return Err(ControlError::NotConnected);
                }
                self.source = PowerSource::Trainer;
                self.reported_speed = None;
                self.ride.mode = RideMode::Live;
            }
            RideMode::Live => {
                self.source =
                    PowerSource::Synthetic(DemoTrajectory::starting_at(self.ride.elapsed_time_s));
                self.ride.mode = RideMode::Demo;
            }
            mode => return Err(ControlError::ControlModeActive(mode.label())),
        }
        tracing::info!("Switched to {} mode", self.ride.mode);
        self.publish();
        Ok(())
    }

    /// Enter ERG mode holding `watts`.
    pub fn enter_erg(
        &mut self,
        watts: u16,
        now: Instant,
    ) -> Result<Vec<ControlCommand>, ControlError> {
        self.guard_active()?;
        self.smoother = None;
        self.ride.target_grade_pct = 0.0;
        self.ride.mode = RideMode::Erg {
            target_watts: watts,
        };
        tracing::info!("Entering ERG mode at {}W", watts);
        let commands = self.send_erg_target(watts, now);
        self.publish();
        Ok(commands)
    }

    /// Change the ERG target.
    pub fn set_erg_target(
        &mut self,
        watts: u16,
        now: Instant,
    ) -> Result<Vec<ControlCommand>, ControlError> {
        self.guard_active()?;
        if !matches!(self.ride.mode, RideMode::Erg { .. }) {
            return Err(ControlError::NotInErg);
        }
        self.ride.mode = RideMode::Erg {
            target_watts: watts,
        };
        let commands = self.send_erg_target(watts, now);
        self.publish();
        Ok(commands)
    }

    fn send_erg_target(&mut self, watts: u16, now: Instant) -> Vec<ControlCommand> {
        self.next_erg_at = now + self.config.erg_refresh;
        let mut commands = Vec::new();
        if self.link_up() {
            self.ensure_control(&mut commands);
            commands.push(ControlCommand::SetTargetPower(i32::from(watts)));
        }
        commands
    }

    /// Enter SIM mode. The first grade goes out one SIM interval later.
    pub fn enter_sim(&mut self, now: Instant) -> Result<Vec<ControlCommand>, ControlError> {
        self.guard_active()?;
        let mut commands = Vec::new();
        if matches!(self.ride.mode, RideMode::Sim) {
            return Ok(commands);
        }

        self.ride.mode = RideMode::Sim;
        self.smoother = Some(GradeSmoother::new(
            self.config.smoothing_window_m,
            self.config.max_grade_rate_pct_per_s,
            now,
        ));
        self.ride.target_grade_pct = 0.0;
        self.next_sim_at = now + self.config.sim_interval;
        self.ensure_control(&mut commands);

        tracing::info!("Entering SIM mode");
        self.publish();
        Ok(commands)
    }

    /// Leave ERG/SIM and return to Live or Demo.
    pub fn exit_control(&mut self, _now: Instant) -> Result<Vec<ControlCommand>, ControlError> {
        self.guard_active()?;
        let mut commands = Vec::new();
        if !self.ride.mode.is_controlled() {
            return Ok(commands);
        }

        self.ride.mode = match self.source {
            PowerSource::Trainer => RideMode::Live,
            PowerSource::Synthetic(_) => RideMode::Demo,
        };
        self.smoother = None;
        self.ride.target_grade_pct = 0.0;
        commands.extend(self.release_control());

        tracing::info!("Left resistance control, now in {} mode", self.ride.mode);
        self.publish();
        Ok(commands)
    }

    fn release_control(&mut self) -> Option<ControlCommand> {
        let held = std::mem::replace(&mut self.control_held, false);
        (held && self.link_up()).then_some(ControlCommand::Reset)
    }

    /// Change the SIM difficulty multiplier.
    ///
    /// The value is clamped to the supported range; the clamped value is what
    /// the ride state and ride log report.
    pub fn set_resistance_scale(&mut self, scale: f64) -> Result<(), ControlError> {
        self.guard_active()?;
        if !scale.is_finite() {
            return Err(ControlError::InvalidResistanceScale);
        }
        let (min, max) = RESISTANCE_SCALE_RANGE;
        self.ride.resistance_scale = scale.clamp(min, max);
        self.publish();
        Ok(())
    }

    /// Freeze the ride. Returns commands that fell due up to the pause instant.
    pub fn pause(&mut self, now: Instant) -> Vec<ControlCommand> {
        if self.ended || self.ride.paused {
            return Vec::new();
        }
        let outcome = self.tick(now);
        self.ride.paused = true;
        tracing::info!("Ride paused at {:.1}s", self.ride.elapsed_time_s);
        self.publish();
        outcome.commands
    }

    pub fn resume(&mut self, now: Instant) {
        if self.ended || !self.ride.paused {
            return;
        }
        self.ride.paused = false;
        self.last_tick = now;
        if let Some(smoother) = self.smoother.as_mut() {
            smoother.reset_baseline(now);
        }
        tracing::info!("Ride resumed");
        self.publish();
    }

    /// Zero the trainer's load immediately.
    ///
    /// Always returns the commands to write, even when the link looks down,
    /// so the caller can attempt them.
    pub fn emergency_stop(&mut self, now: Instant) -> Vec<ControlCommand> {
        let mut commands = Vec::new();
        if !self.control_held {
            commands.push(ControlCommand::RequestControl);
            commands.push(ControlCommand::StartOrResume);
            self.control_held = true;
        }
        commands.push(ControlCommand::SetTargetPower(0));

        self.smoother = None;
        self.ride.target_grade_pct = 0.0;
        self.ride.mode = RideMode::Erg { target_watts: 0 };
        self.next_erg_at = now + self.config.erg_refresh;

        tracing::warn!("Emergency stop");
        self.publish();
        commands
    }

    /// The trainer link dropped. `retrying` tells whether reconnection follows.
    pub fn on_connection_lost(&mut self, _now: Instant, retrying: bool) {
        self.ride.connection_status = if retrying {
            ConnectionStatus::Reconnecting { attempt: 1 }
        } else {
            ConnectionStatus::Disconnected
        };
        self.control_held = false;
        self.reported_speed = None;
        tracing::warn!(
            "Trainer link lost at {:.1} m / {:.1} s",
            self.ride.distance_m,
            self.ride.elapsed_time_s
        );
        self.publish();
    }

    pub fn on_reconnect_attempt(&mut self, attempt: u32) {
        self.ride.connection_status = ConnectionStatus::Reconnecting { attempt };
        self.publish();
    }

    /// The link is back. Integration restarts from `now`.
    pub fn on_reconnected(&mut self, now: Instant) -> Vec<ControlCommand> {
        self.ride.connection_status = ConnectionStatus::Connected;
        self.last_tick = now;
        self.control_held = false;

        let mut commands = Vec::new();
        match self.ride.mode {
            RideMode::Erg { target_watts } if !self.ended => {
                commands = self.send_erg_target(target_watts, now);
            }
            RideMode::Sim if !self.ended => {
                if let Some(smoother) = self.smoother.as_mut() {
                    smoother.reset_baseline(now);
                }
                self.ensure_control(&mut commands);
            }
            _ => {}
        }

        tracing::info!("Trainer link restored");
        self.publish();
        commands
    }

    /// Reconnection gave up.
    pub fn on_reconnect_exhausted(&mut self, now: Instant) {
        self.ride.connection_status = ConnectionStatus::Disconnected;
        self.last_tick = now;
        tracing::warn!("Giving up on the trainer link; ride continues degraded");
        self.publish();
    }

    pub fn start_recording(&mut self) {
        self.ride.recording = true;
        self.publish();
    }

    pub fn stop_recording(&mut self) {
        self.ride.recording = false;
        self.publish();
    }

    /// End the session: produce the summary, reset the shared state and
    /// return any command needed to release the trainer.
    pub fn finish(&mut self, _now: Instant) -> (RideSummary, Vec<ControlCommand>) {
        let summary = self.summary.finish(self.route.name(), &self.ride);
        let commands = self.release_control().into_iter().collect();

        self.ended = true;
        self.smoother = None;
        self.writer.reset();
        self.ride = self.writer.current().clone();

        tracing::info!(
            "Ride ended: {:.0} m in {:.0} s, avg {:.0} W",
            summary.distance_m,
            summary.elapsed_time_s,
            summary.avg_power_w
        );
        (summary, commands)
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}
