//! Motion controller: the main loop and every producer-side operation.
//!
//! [`Controller`] owns the planner, the pulse engine, the spindle and
//! coolant drivers and the protocol state machine, all on top of one
//! [`MotionHal`]. The pulse engine only advances inside [`Controller::tick`];
//! realtime requests raised through a [`RealtimeHandle`] are acted on in
//! [`Controller::execute_realtime`] (see [`protocol`]).
//!
//! ## Waiting
//!
//! Operations that must wait (a full ring, a synchronize, a dwell) keep
//! the machine alive by calling [`Controller::poll`], which runs one
//! polling interval of ticks and then one realtime pass. A reset during
//! the wait ends it with [`ControlError::Aborted`]; a critical alarm with
//! [`ControlError::Locked`].

pub mod protocol;

use std::sync::Arc;

use cnc_common::axis::AxisMask;
use cnc_common::config::ConfigError;
use cnc_common::consts::{BLOCK_BUFFER_SIZE, N_AXIS, REPORT_QUEUE_DEPTH};
use cnc_common::error::{Alarm, StatusCode};
use cnc_common::pins::ControlPins;
use cnc_common::settings::Settings;
use cnc_common::state::{CoolantState, MachineState, SpindleState};
use heapless::Deque;
use tracing::{debug, info, warn};

use crate::buffer::{BlockCondition, SegmentBuffer};
use crate::config::{ControllerConfig, validate_against_timing};
use crate::coolant::Coolant;
use crate::error::ControlError;
use crate::hal::MotionHal;
use crate::planner::{PlanLine, Planner, Submit};
use crate::realtime::RealtimeHandle;
use crate::report::{
    DebugReport, MSG_CAUTION_UNLOCKED, MSG_DISABLED, MSG_ENABLED, MSG_UNLOCK, Report,
    StatusReport,
};
use crate::spindle::Spindle;
use crate::state::machine::{MachineEvent, ProtocolStateMachine};
use crate::state::overrides::Overrides;
use crate::stepper::{Stepper, StepperConfig};
use crate::system::{ExecState, SystemState};

/// Spindle command captured before a suspend stops it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SpindleSnapshot {
    pub state: SpindleState,
    pub rpm: f32,
}

/// Accessory outputs captured when the door opens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct AccessorySnapshot {
    pub spindle: SpindleSnapshot,
    pub coolant: CoolantState,
}

/// Hook run after every poll, for transports that stream reports while
/// a producer operation is blocked.
pub trait PollObserver {
    /// `reports` drains the queue; whatever is not consumed stays queued.
    fn after_poll(&mut self, elapsed_ticks: u64, reports: &mut dyn Iterator<Item = Report>);
}

/// The motion core on top of one hardware implementation.
pub struct Controller<H: MotionHal> {
    config: ControllerConfig,
    hal: H,
    system: Arc<SystemState>,
    realtime: RealtimeHandle,
    machine: ProtocolStateMachine,
    planner: Planner<BLOCK_BUFFER_SIZE>,
    stepper: Stepper<BLOCK_BUFFER_SIZE>,
    overrides: Overrides,
    spindle: Spindle,
    coolant: Coolant,
    reports: Deque<Report, REPORT_QUEUE_DEPTH>,

    elapsed_ticks: u64,
    /// Completed soft resets; waits compare it to notice an abort.
    resets: u64,
    /// Critical alarm waiting for a reset.
    latched_alarm: Option<Alarm>,
    /// Outputs to restore when the door closes and the cycle resumes.
    door_restore: Option<AccessorySnapshot>,
    /// Spindle stopped by the spindle-stop override during a hold.
    spindle_stop_restore: Option<SpindleSnapshot>,
    sleep_complete: bool,

    last_limit_pins: AxisMask,
    last_control_pins: ControlPins,
    observer: Option<Box<dyn PollObserver + Send>>,
}

impl<H: MotionHal> Controller<H> {
    /// Validate `config` and power the machine up.
    ///
    /// With homing enabled the position is unknown at power-up, so the
    /// controller starts in `Alarm` until homed or unlocked.
    pub fn new(config: ControllerConfig, hal: H) -> Result<Self, ConfigError> {
        config.validate()?;

        let system = Arc::new(SystemState::new());
        let (producer, consumer) = SegmentBuffer::<BLOCK_BUFFER_SIZE>::new();
        let planner = Planner::new(producer, Arc::clone(&system), &config.settings);
        let stepper = Stepper::new(
            consumer,
            Arc::clone(&system),
            StepperConfig::new(&config.settings, &config.timing),
        );
        let locked = config.settings.homing_enable;
        let machine = ProtocolStateMachine::new(locked);
        system.set_state(machine.state());
        system.set_hard_limits_enabled(config.settings.hard_limits);

        let spindle = Spindle::from_settings(&config.settings.spindle);
        let mut controller = Self {
            realtime: RealtimeHandle::new(Arc::clone(&system)),
            config,
            hal,
            system,
            machine,
            planner,
            stepper,
            overrides: Overrides::default(),
            spindle,
            coolant: Coolant::new(),
            reports: Deque::new(),
            elapsed_ticks: 0,
            resets: 0,
            latched_alarm: None,
            door_restore: None,
            spindle_stop_restore: None,
            sleep_complete: false,
            last_limit_pins: AxisMask::empty(),
            last_control_pins: ControlPins::empty(),
            observer: None,
        };

        controller.stepper.power_on(&mut controller.hal);
        controller.spindle.stop(&mut controller.hal);
        controller.coolant.stop(&mut controller.hal);
        if locked {
            controller.push_report(Report::feedback(MSG_UNLOCK));
        }

        info!(
            machine = %controller.config.shared.machine_name,
            state = controller.machine.state().name(),
            pulse_hz = controller.config.timing.pulse_frequency_hz,
            "Controller initialized"
        );
        Ok(controller)
    }

    // ─── Main Loop ──────────────────────────────────────────────────

    /// One pulse-engine tick, preceded by input sampling.
    pub fn tick(&mut self) {
        self.sample_inputs();
        self.stepper.tick(&mut self.hal);
        self.elapsed_ticks += 1;
    }

    /// One polling interval of ticks, then one realtime pass.
    pub fn poll(&mut self) {
        for _ in 0..self.config.timing.ticks_per_poll {
            self.tick();
        }
        self.execute_realtime();
        if let Some(observer) = self.observer.as_mut() {
            let reports = &mut self.reports;
            let mut drain = std::iter::from_fn(|| reports.pop_front());
            observer.after_poll(self.elapsed_ticks, &mut drain);
        }
    }

    pub fn set_observer(&mut self, observer: Box<dyn PollObserver + Send>) {
        self.observer = Some(observer);
    }

    /// Poll until `done` holds or `max_polls` intervals have passed.
    ///
    /// Returns whether `done` was reached.
    pub fn poll_until<F>(&mut self, max_polls: usize, mut done: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        for _ in 0..max_polls {
            if done(self) {
                return true;
            }
            self.poll();
        }
        done(self)
    }

    /// Edge-detect limit switches and control inputs, the way the pin
    /// change interrupts would.
    fn sample_inputs(&mut self) {
        let mut limits = self.hal.limit_pins();
        if self.config.settings.invert_limit_pins {
            limits ^= AxisMask::all();
        }
        let tripped = limits & !self.last_limit_pins;
        self.last_limit_pins = limits;
        self.realtime.on_limit_pins(tripped);

        let control = self.hal.control_pins();
        let asserted = control & !self.last_control_pins;
        self.last_control_pins = control;
        if !asserted.is_empty() {
            self.realtime.on_control_pins(asserted);
        }
    }

    /// One wait step for a blocked producer operation.
    fn wait_poll(&mut self) -> Result<(), ControlError> {
        let resets = self.resets;
        self.poll();
        if let Some(alarm) = self.latched_alarm {
            return Err(ControlError::Locked(alarm));
        }
        if self.resets != resets {
            return Err(ControlError::Aborted);
        }
        Ok(())
    }

    // ─── Motion ─────────────────────────────────────────────────────

    /// Queue a program move to `target` [mm, machine coordinates].
    ///
    /// Blocks while the ring is full. Queuing from `Idle` starts the cycle.
    /// Moves shorter than one step are accepted and dropped.
    pub fn buffer_line(
        &mut self,
        target: &[f32; N_AXIS],
        line: PlanLine,
    ) -> Result<(), ControlError> {
        self.execute_realtime();
        self.ensure_unlocked()?;
        if self.state() == MachineState::Jog {
            self.buffer_synchronize()?;
        }

        if self.config.settings.soft_limits
            && !line.condition.contains(BlockCondition::JOG)
            && self.exceeds_travel(target)
        {
            warn!(?target, "Soft limit exceeded");
            self.system.set_alarm(Alarm::SoftLimit);
            self.system.request_reset();
            self.execute_realtime();
            return Err(ControlError::Locked(Alarm::SoftLimit));
        }

        if self.state() == MachineState::CheckMode {
            return Ok(());
        }

        self.queue_line(target, line)?;
        self.auto_cycle_start();
        Ok(())
    }

    /// Queue a jog move to `target` at `feed_rate` [mm/min].
    ///
    /// Jogs are only accepted from `Idle` or while already jogging, and a
    /// target outside the travel envelope is refused instead of alarming.
    pub fn jog_line(&mut self, target: &[f32; N_AXIS], feed_rate: f32) -> Result<(), ControlError> {
        self.execute_realtime();
        if let Some(alarm) = self.latched_alarm {
            return Err(ControlError::Locked(alarm));
        }
        match self.state() {
            MachineState::Idle | MachineState::Jog => {}
            MachineState::Alarm | MachineState::Sleep => {
                return Err(StatusCode::SystemLocked.into());
            }
            _ => return Err(StatusCode::IdleError.into()),
        }
        if feed_rate.is_nan() || feed_rate <= 0.0 {
            return Err(StatusCode::InvalidJogCommand.into());
        }
        if self.config.settings.soft_limits && self.exceeds_travel(target) {
            return Err(StatusCode::TravelExceeded.into());
        }

        let line = PlanLine {
            feed_rate,
            condition: BlockCondition::JOG,
        };
        if self.queue_line(target, line)? != Submit::Queued {
            return Ok(());
        }
        match self.state() {
            MachineState::Idle => {
                self.transition(MachineEvent::JogStart);
                self.stepper.wake_up(&mut self.hal);
            }
            MachineState::Jog if self.stepper.is_idle() => self.stepper.wake_up(&mut self.hal),
            _ => {}
        }
        Ok(())
    }

    /// Wait until every queued move has executed and the machine is idle.
    pub fn buffer_synchronize(&mut self) -> Result<(), ControlError> {
        loop {
            self.execute_realtime();
            if let Some(alarm) = self.latched_alarm {
                return Err(ControlError::Locked(alarm));
            }
            let moving = matches!(self.state(), MachineState::Run | MachineState::Jog);
            if !moving && !self.stepper.has_pending_motion() {
                return Ok(());
            }
            self.auto_cycle_start();
            self.wait_poll()?;
        }
    }

    /// Hand the move to the planner, polling while the ring is full.
    fn queue_line(&mut self, target: &[f32; N_AXIS], line: PlanLine) -> Result<Submit, ControlError> {
        loop {
            match self.planner.buffer_line(target, line) {
                Submit::Full => {
                    self.auto_cycle_start();
                    self.wait_poll()?;
                }
                Submit::OutOfRange => return Err(StatusCode::InvalidStatement.into()),
                submit => return Ok(submit),
            }
        }
    }

    /// Start a cycle when motion is waiting in `Idle`.
    fn auto_cycle_start(&mut self) {
        if self.state() == MachineState::Idle && self.stepper.has_pending_motion() {
            self.system.exec_state.set(ExecState::CYCLE_START);
        }
    }

    fn exceeds_travel(&self, target: &[f32; N_AXIS]) -> bool {
        target
            .iter()
            .zip(self.config.settings.axes.iter())
            .any(|(&position, axis)| position > 0.0 || position < -axis.max_travel)
    }

    /// Program commands are refused while an alarm or sleep holds the
    /// machine.
    fn ensure_unlocked(&self) -> Result<(), ControlError> {
        if let Some(alarm) = self.latched_alarm {
            return Err(ControlError::Locked(alarm));
        }
        if self.machine.is_locked() {
            Err(StatusCode::SystemLocked.into())
        } else if !self.machine.accepts_motion() {
            Err(StatusCode::IdleError.into())
        } else {
            Ok(())
        }
    }

    // ─── Accessories ────────────────────────────────────────────────

    /// Synchronize, then switch the spindle.
    pub fn spindle_sync(&mut self, state: SpindleState, rpm: f32) -> Result<(), ControlError> {
        self.execute_realtime();
        self.ensure_unlocked()?;
        if self.state() == MachineState::CheckMode {
            return Ok(());
        }
        self.buffer_synchronize()?;
        self.spindle
            .set_state(&mut self.hal, state, rpm, self.overrides.spindle);
        debug!(?state, rpm, "Spindle set");
        Ok(())
    }

    /// Synchronize, then switch the coolant outputs.
    pub fn coolant_sync(&mut self, coolant: CoolantState) -> Result<(), ControlError> {
        self.execute_realtime();
        self.ensure_unlocked()?;
        if self.state() == MachineState::CheckMode {
            return Ok(());
        }
        self.buffer_synchronize()?;
        self.coolant.set_state(&mut self.hal, coolant);
        debug!(?coolant, "Coolant set");
        Ok(())
    }

    /// Synchronize, then pause for `seconds` while staying responsive.
    pub fn dwell(&mut self, seconds: f32) -> Result<(), ControlError> {
        self.execute_realtime();
        self.ensure_unlocked()?;
        if seconds < 0.0 {
            return Err(StatusCode::NegativeValue.into());
        }
        if self.state() == MachineState::CheckMode {
            return Ok(());
        }
        self.buffer_synchronize()?;
        let ticks = (seconds * self.config.timing.pulse_frequency_hz as f32).ceil() as u64;
        let polls = ticks.div_ceil(u64::from(self.config.timing.ticks_per_poll.max(1)));
        for _ in 0..polls {
            self.wait_poll()?;
        }
        Ok(())
    }

    // ─── System Commands ────────────────────────────────────────────

    /// `$n=value`: validate and apply one global setting.
    ///
    /// Settings change only while idle. The new set must still fit the
    /// tick rate; otherwise nothing changes.
    pub fn store_setting(&mut self, parameter: u16, value: f32) -> Result<(), ControlError> {
        self.execute_realtime();
        if self.state() != MachineState::Idle {
            return Err(StatusCode::IdleError.into());
        }
        let mut settings = self.config.settings.clone();
        settings.store_global_setting(parameter, value)?;
        if let Err(reason) = settings
            .validate()
            .and_then(|()| validate_against_timing(&settings, &self.config.timing))
        {
            warn!(parameter, value, %reason, "Setting rejected");
            return Err(StatusCode::InvalidStatement.into());
        }
        self.config.settings = settings;
        self.apply_settings();
        info!(parameter, value, "Setting stored");
        Ok(())
    }

    fn apply_settings(&mut self) {
        let settings = &self.config.settings;
        self.planner.update_settings(settings);
        self.stepper
            .update_config(StepperConfig::new(settings, &self.config.timing));
        self.spindle.update_settings(&settings.spindle);
        self.system.set_hard_limits_enabled(settings.hard_limits);
        self.stepper.power_on(&mut self.hal);
    }

    /// `$X`: leave `Alarm` without homing.
    pub fn unlock(&mut self) -> Result<(), ControlError> {
        self.execute_realtime();
        if let Some(alarm) = self.latched_alarm {
            return Err(ControlError::Locked(alarm));
        }
        if self.hal.control_pins().contains(ControlPins::SAFETY_DOOR) {
            return Err(StatusCode::CheckDoor.into());
        }
        match self.state() {
            MachineState::Alarm => {
                self.transition(MachineEvent::Unlock);
                self.push_report(Report::feedback(MSG_CAUTION_UNLOCKED));
                warn!("Alarm lock overridden");
                Ok(())
            }
            MachineState::Sleep => Err(StatusCode::SystemLocked.into()),
            _ => Ok(()),
        }
    }

    /// `$C`: toggle check mode.
    pub fn toggle_check_mode(&mut self) -> Result<(), ControlError> {
        self.execute_realtime();
        match self.state() {
            MachineState::Idle => {
                self.transition(MachineEvent::ToggleCheckMode);
                self.push_report(Report::feedback(MSG_ENABLED));
                Ok(())
            }
            MachineState::CheckMode => {
                self.transition(MachineEvent::ToggleCheckMode);
                self.planner.reset();
                self.push_report(Report::feedback(MSG_DISABLED));
                Ok(())
            }
            _ => Err(StatusCode::IdleError.into()),
        }
    }

    /// `$SLP`: hold, then de-energize everything until reset.
    pub fn sleep(&mut self) {
        self.system.exec_state.set(ExecState::SLEEP);
        self.execute_realtime();
    }

    /// Enter `Homing`. Limit switches are latched instead of alarming
    /// until [`Controller::finish_homing`].
    pub fn begin_homing(&mut self) -> Result<(), ControlError> {
        self.execute_realtime();
        if let Some(alarm) = self.latched_alarm {
            return Err(ControlError::Locked(alarm));
        }
        if !self.config.settings.homing_enable {
            return Err(StatusCode::SettingDisabled.into());
        }
        if self.hal.control_pins().contains(ControlPins::SAFETY_DOOR) {
            return Err(StatusCode::CheckDoor.into());
        }
        match self.state() {
            MachineState::Idle | MachineState::Alarm => {
                self.system.take_homing_limits();
                self.transition(MachineEvent::HomingStart);
                Ok(())
            }
            _ => Err(StatusCode::IdleError.into()),
        }
    }

    /// Limit switches seen since homing began.
    pub fn homing_limits(&self) -> AxisMask {
        self.system.take_homing_limits()
    }

    /// Finish homing: adopt `machine_position` [mm] as the current position.
    pub fn finish_homing(&mut self, machine_position: &[f32; N_AXIS]) -> Result<(), ControlError> {
        self.execute_realtime();
        if self.state() != MachineState::Homing {
            return Err(StatusCode::IdleError.into());
        }
        let steps_per_mm = self.config.settings.steps_per_mm();
        let steps = std::array::from_fn(|i| (machine_position[i] * steps_per_mm[i]).round() as i32);
        self.system.set_position(steps);
        self.planner.reset();
        self.transition(MachineEvent::HomingComplete);
        info!(?machine_position, "Homing complete");
        Ok(())
    }

    // ─── Reports ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> StatusReport {
        StatusReport {
            state: self.state(),
            machine_position: self.machine_position(),
            feed_rate: self.system.realtime_rate(),
            spindle: self.spindle.status(),
            coolant: self.coolant.state(),
            overrides: self.overrides,
            planner_blocks_free: self.planner.available(),
        }
    }

    pub fn debug_snapshot(&self) -> DebugReport {
        let (buffer_head, buffer_tail) = self.stepper.buffer_indices();
        DebugReport {
            status: self.snapshot(),
            phase: self.stepper.phase(),
            step_rate: self.stepper.rate(),
            buffer_head,
            buffer_tail,
            steppers_enabled: self.stepper.steppers_enabled(),
            suspend: self.system.suspend.load().bits(),
        }
    }

    /// Take every queued report, oldest first.
    pub fn drain_reports(&mut self) -> impl Iterator<Item = Report> + '_ {
        std::iter::from_fn(move || self.reports.pop_front())
    }

    /// Queue a report, dropping the oldest when full.
    pub(crate) fn push_report(&mut self, report: Report) {
        if self.reports.is_full() {
            self.reports.pop_front();
        }
        let _ = self.reports.push_back(report);
    }

    // ─── Accessors ──────────────────────────────────────────────────

    #[inline]
    pub fn state(&self) -> MachineState {
        self.machine.state()
    }

    /// Handle for interrupt-style producers (serial bytes, pins, signals).
    pub fn realtime(&self) -> RealtimeHandle {
        self.realtime.clone()
    }

    pub fn system(&self) -> &Arc<SystemState> {
        &self.system
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    pub fn overrides(&self) -> Overrides {
        self.overrides
    }

    /// Critical alarm waiting for a reset, if any.
    pub fn latched_alarm(&self) -> Option<Alarm> {
        self.latched_alarm
    }

    /// Machine position [mm].
    pub fn machine_position(&self) -> [f32; N_AXIS] {
        let steps = self.system.position();
        let steps_per_mm = self.config.settings.steps_per_mm();
        std::array::from_fn(|i| steps[i] as f32 / steps_per_mm[i])
    }

    /// Whether motion is queued or executing.
    pub fn is_busy(&self) -> bool {
        self.stepper.has_pending_motion() || self.state().is_motion()
    }

    pub fn planner_blocks_free(&self) -> usize {
        self.planner.available()
    }

    pub fn elapsed_ticks(&self) -> u64 {
        self.elapsed_ticks
    }

    /// Simulated time since power-up [s].
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_ticks as f64 / f64::from(self.config.timing.pulse_frequency_hz)
    }
}
