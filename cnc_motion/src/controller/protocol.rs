//! Realtime execution: acting on the flags raised by interrupt contexts.
//!
//! Runs from the main loop only, once per poll and at every point where a
//! producer operation waits. Ordering within one pass:
//!
//! 1. Alarms. A critical alarm latches and swallows everything but reset.
//! 2. Reset.
//! 3. Hold-type requests (feed hold, jog cancel, safety door, sleep).
//! 4. Cycle stop from the pulse engine.
//! 5. Cycle start, unless a hold arrived in the same pass.
//! 6. Override requests.
//! 7. Suspend bookkeeping (door and sleep de-energize).
//! 8. Reports.

use cnc_common::error::Alarm;
use cnc_common::pins::ControlPins;
use cnc_common::state::{CoolantState, MachineState};
use tracing::{debug, error, info, warn};

use super::{AccessorySnapshot, Controller, SpindleSnapshot};
use crate::hal::MotionHal;
use crate::report::{MSG_CHECK_DOOR, MSG_RESET_TO_CONTINUE, MSG_SLEEPING, MSG_UNLOCK, Report};
use crate::state::machine::{MachineEvent, TransitionResult};
use crate::state::overrides::Overrides;
use crate::system::{AccessoryOverride, ExecState, StepControl, Suspend};

/// Requests that bring motion to a controlled stop.
const HOLD_REQUESTS: ExecState = ExecState::FEED_HOLD
    .union(ExecState::MOTION_CANCEL)
    .union(ExecState::SAFETY_DOOR)
    .union(ExecState::SLEEP);

impl<H: MotionHal> Controller<H> {
    /// One pass over every pending realtime request.
    pub fn execute_realtime(&mut self) {
        if let Some(alarm) = self.system.take_alarm() {
            self.raise_alarm(alarm);
        }

        if self.latched_alarm.is_some() {
            // Only a fresh reset leaves a latched alarm.
            let exec = self.system.exec_state.take();
            self.system.motion_override.take();
            self.system.accessory_override.take();
            if exec.contains(ExecState::RESET) {
                self.soft_reset();
            }
            return;
        }

        let exec = self.system.exec_state.take();
        if exec.contains(ExecState::RESET) {
            self.soft_reset();
            return;
        }

        if exec.intersects(HOLD_REQUESTS) {
            self.request_hold(exec);
        }
        if exec.contains(ExecState::CYCLE_STOP) {
            self.cycle_stop();
        }
        if exec.contains(ExecState::CYCLE_START) && !exec.intersects(HOLD_REQUESTS) {
            self.cycle_start();
        }

        self.apply_override_requests();
        self.update_suspend();

        if exec.contains(ExecState::STATUS_REPORT) {
            let report = Report::Status(self.snapshot());
            self.push_report(report);
        }
        if exec.contains(ExecState::DEBUG_REPORT) {
            let report = Report::Debug(self.debug_snapshot());
            self.push_report(report);
        }
    }

    /// Apply one machine event and mirror the result into the shared state.
    pub(crate) fn transition(&mut self, event: MachineEvent) -> bool {
        let from = self.machine.state();
        match self.machine.handle_event(event) {
            TransitionResult::Ok(to) => {
                self.system.set_state(to);
                if to != from {
                    info!(from = from.name(), to = to.name(), ?event, "State transition");
                    self.push_report(Report::State { state: to });
                }
                true
            }
            TransitionResult::Rejected(reason) => {
                debug!(state = from.name(), ?event, reason, "Transition rejected");
                false
            }
        }
    }

    // ─── Alarms / Reset ─────────────────────────────────────────────

    fn raise_alarm(&mut self, alarm: Alarm) {
        error!(code = alarm.code(), %alarm, "Alarm");
        self.transition(MachineEvent::Alarm);
        self.push_report(Report::alarm(alarm));
        if alarm.is_critical() {
            // The reset that accompanied the alarm does not clear it.
            self.system.exec_state.clear(ExecState::RESET);
            self.latched_alarm = Some(alarm);
            self.spindle.stop(&mut self.hal);
            self.coolant.stop(&mut self.hal);
            self.push_report(Report::feedback(MSG_RESET_TO_CONTINUE));
        }
    }

    /// Soft reset: stop everything, drop all motion, keep the position.
    ///
    /// Interrupting motion loses the position, so the machine comes back
    /// locked in `Alarm`.
    fn soft_reset(&mut self) {
        let prior = self.machine.state();
        let moving =
            prior.is_motion() || self.system.step_control.contains(StepControl::EXECUTE_HOLD);
        let mut locked = matches!(prior, MachineState::Alarm | MachineState::Sleep);
        if moving {
            let alarm = if prior == MachineState::Homing {
                Alarm::HomingFailReset
            } else {
                Alarm::AbortCycle
            };
            warn!(code = alarm.code(), %alarm, state = prior.name(), "Reset during motion");
            self.push_report(Report::alarm(alarm));
            locked = true;
        }

        self.spindle.stop(&mut self.hal);
        self.coolant.stop(&mut self.hal);
        self.stepper.reset(&mut self.hal);
        self.system.step_control.take();
        self.system.suspend.take();
        self.system.exec_state.take();
        self.system.motion_override.take();
        self.system.accessory_override.take();
        self.system.take_homing_limits();

        self.overrides = Overrides::default();
        self.store_overrides();
        self.planner.reset();

        self.latched_alarm = None;
        self.door_restore = None;
        self.spindle_stop_restore = None;
        self.sleep_complete = false;
        self.resets += 1;

        self.transition(MachineEvent::Reset { locked });
        if locked {
            self.push_report(Report::feedback(MSG_UNLOCK));
        }
        info!(from = prior.name(), to = self.machine.state().name(), "Soft reset");
    }

    // ─── Hold / Cycle ───────────────────────────────────────────────

    fn request_hold(&mut self, exec: ExecState) {
        let state = self.machine.state();
        let suspend = &self.system.suspend;

        if state == MachineState::Homing {
            if exec.contains(ExecState::SAFETY_DOOR) {
                self.system.set_alarm(Alarm::HomingFailDoor);
                self.system.request_reset();
            }
            return;
        }

        let sleep = exec.contains(ExecState::SLEEP);
        if state == MachineState::CheckMode || (state == MachineState::Alarm && !sleep) {
            return;
        }

        match state {
            MachineState::Run | MachineState::Jog => {
                if self.stepper.is_idle() {
                    suspend.set(Suspend::HOLD_COMPLETE);
                } else {
                    self.system.step_control.set(StepControl::EXECUTE_HOLD);
                }
                // Any hold during a jog cancels it, except sleep.
                if state == MachineState::Jog && !sleep {
                    suspend.set(Suspend::JOG_CANCEL);
                }
            }
            MachineState::Idle | MachineState::Alarm => suspend.set(Suspend::HOLD_COMPLETE),
            _ => {}
        }

        if exec.contains(ExecState::FEED_HOLD)
            && matches!(state, MachineState::Idle | MachineState::Run)
        {
            self.transition(MachineEvent::FeedHold);
        }
        if exec.contains(ExecState::SAFETY_DOOR)
            && state != MachineState::Sleep
            && self.transition(MachineEvent::DoorOpened)
        {
            info!(state = state.name(), "Safety door opened");
            self.system.suspend.set(Suspend::SAFETY_DOOR_AJAR);
        }
        if sleep {
            self.transition(MachineEvent::Sleep);
        }
    }

    /// The pulse engine stopped: the queue drained or a hold completed.
    fn cycle_stop(&mut self) {
        let state = self.machine.state();
        let suspend = self.system.suspend.load();

        if matches!(
            state,
            MachineState::Hold | MachineState::Door | MachineState::Sleep
        ) && !suspend.contains(Suspend::JOG_CANCEL)
        {
            // Hold complete: replan the rest of the queue from standstill.
            self.planner
                .cycle_reinitialize(self.stepper.remaining_millimeters());
            if self.system.step_control.contains(StepControl::EXECUTE_HOLD) {
                self.system.suspend.set(Suspend::HOLD_COMPLETE);
            }
            self.system.step_control.clear(StepControl::EXECUTE_HOLD);
            debug!(state = state.name(), "Hold complete");
            return;
        }

        if suspend.contains(Suspend::JOG_CANCEL) {
            self.system.step_control.clear(StepControl::EXECUTE_HOLD);
            self.stepper.flush();
            self.planner.reset();
            debug!("Jog cancelled");
        }

        if suspend.contains(Suspend::SAFETY_DOOR_AJAR) {
            // Door opened during the jog: stay in Door.
            self.system.suspend.clear(Suspend::JOG_CANCEL);
            self.system.suspend.set(Suspend::HOLD_COMPLETE);
            return;
        }

        if matches!(state, MachineState::Run | MachineState::Jog) {
            self.system.suspend.take();
            self.transition(MachineEvent::MotionComplete);
        }
    }

    fn cycle_start(&mut self) {
        let held = self.system.suspend.contains(Suspend::HOLD_COMPLETE);
        match self.machine.state() {
            MachineState::Idle if self.stepper.has_pending_motion() => {
                self.transition(MachineEvent::CycleStart);
                self.stepper.wake_up(&mut self.hal);
            }
            MachineState::Hold if held => {
                if let Some(snapshot) = self.spindle_stop_restore.take() {
                    self.restore_spindle(snapshot);
                }
                self.resume_motion(MachineEvent::CycleStart);
            }
            MachineState::Door => {
                if self.hal.control_pins().contains(ControlPins::SAFETY_DOOR) {
                    self.push_report(Report::feedback(MSG_CHECK_DOOR));
                    return;
                }
                if !held {
                    return;
                }
                if let Some(snapshot) = self.door_restore.take() {
                    self.restore_spindle(snapshot.spindle);
                    if !snapshot.coolant.is_empty() {
                        self.coolant.set_state(&mut self.hal, snapshot.coolant);
                    }
                }
                info!("Safety door closed, resuming");
                self.resume_motion(MachineEvent::DoorResume);
            }
            _ => {}
        }
    }

    fn resume_motion(&mut self, event: MachineEvent) {
        self.system.step_control.clear(StepControl::EXECUTE_HOLD);
        self.system.suspend.take();
        self.transition(event);
        self.stepper.resume(&mut self.hal);
        if !self.stepper.has_pending_motion() {
            self.transition(MachineEvent::MotionComplete);
        }
    }

    fn restore_spindle(&mut self, snapshot: SpindleSnapshot) {
        if snapshot.state.is_enabled() {
            self.spindle.set_state(
                &mut self.hal,
                snapshot.state,
                snapshot.rpm,
                self.overrides.spindle,
            );
        }
    }

    fn spindle_snapshot(&self) -> SpindleSnapshot {
        SpindleSnapshot {
            state: self.spindle.state(),
            rpm: self.spindle.programmed_rpm(),
        }
    }

    // ─── Overrides ──────────────────────────────────────────────────

    fn apply_override_requests(&mut self) {
        let motion = self.system.motion_override.take();
        if !motion.is_empty() && self.overrides.apply_motion(motion, &self.config.overrides) {
            self.store_overrides();
            self.planner.update_velocity_profile();
            debug!(
                feed = self.overrides.feed,
                rapid = self.overrides.rapid,
                "Motion override"
            );
        }

        let accessory = self.system.accessory_override.take();
        if accessory.is_empty() {
            return;
        }
        if self.overrides.apply_spindle(accessory, &self.config.overrides) {
            self.store_overrides();
            self.spindle
                .apply_override(&mut self.hal, self.overrides.spindle);
            debug!(spindle = self.overrides.spindle, "Spindle override");
        }
        if accessory.contains(AccessoryOverride::SPINDLE_STOP) {
            self.toggle_spindle_stop();
        }

        let toggle = CoolantState::from_outputs(
            accessory.contains(AccessoryOverride::FLOOD_TOGGLE),
            accessory.contains(AccessoryOverride::MIST_TOGGLE),
        );
        if !toggle.is_empty()
            && matches!(
                self.machine.state(),
                MachineState::Idle | MachineState::Run | MachineState::Hold
            )
        {
            self.coolant.toggle(&mut self.hal, toggle);
            debug!(coolant = ?self.coolant.state(), "Coolant toggled");
        }
    }

    /// Spindle stop override: only while a feed hold is complete.
    fn toggle_spindle_stop(&mut self) {
        if self.machine.state() != MachineState::Hold
            || !self.system.suspend.contains(Suspend::HOLD_COMPLETE)
        {
            return;
        }
        match self.spindle_stop_restore.take() {
            Some(snapshot) => {
                self.restore_spindle(snapshot);
                self.system.suspend.clear(Suspend::SPINDLE_STOP_OVR);
            }
            None if self.spindle.state().is_enabled() => {
                self.spindle_stop_restore = Some(self.spindle_snapshot());
                self.spindle.stop(&mut self.hal);
                self.system.suspend.set(Suspend::SPINDLE_STOP_OVR);
            }
            None => {}
        }
    }

    pub(crate) fn store_overrides(&self) {
        self.system.store_overrides(
            self.overrides.feed,
            self.overrides.rapid,
            self.overrides.spindle,
        );
    }

    // ─── Suspend ────────────────────────────────────────────────────

    /// De-energize once a door or sleep hold has come to rest.
    fn update_suspend(&mut self) {
        if !self.system.suspend.contains(Suspend::HOLD_COMPLETE) {
            return;
        }
        match self.machine.state() {
            MachineState::Door if self.door_restore.is_none() => {
                let spindle = self
                    .spindle_stop_restore
                    .take()
                    .unwrap_or_else(|| self.spindle_snapshot());
                self.door_restore = Some(AccessorySnapshot {
                    spindle,
                    coolant: self.coolant.state(),
                });
                self.spindle.stop(&mut self.hal);
                self.coolant.stop(&mut self.hal);
                info!("Door open: spindle and coolant stopped");
            }
            MachineState::Sleep if !self.sleep_complete => {
                self.spindle.stop(&mut self.hal);
                self.coolant.stop(&mut self.hal);
                self.stepper.disable_drivers(&mut self.hal);
                self.sleep_complete = true;
                self.push_report(Report::feedback(MSG_SLEEPING));
                info!("Sleeping");
            }
            _ => {}
        }
    }
}
