//! The controller record: owns the hardware ends, the stage machine, the
//! coulomb counter, and the safety supervisor. One `tick()` per second in
//! the strict order sample → safety → stage step → PWM.

use std::sync::Arc;
use std::time::Instant;

use charger_traits::{
    AnalogInput, Clock, LoadSwitch, MonotonicClock, PowerMonitor, PwmChannel, StatusLed,
};
use eyre::WrapErr;

use crate::coulomb::{CoulombCounter, restore_accumulated_ah};
use crate::error::{ChargerError, Result};
use crate::machine::{self, ChargeState};
use crate::pwm::PwmRegulator;
use crate::safety::{SafetySupervisor, lvd_lvr_target, reconnect_allowed};
use crate::signals::{self, Signals};
use crate::snapshot::Snapshot;
use crate::soc::soc_from_voltage;
use crate::tunables::{
    ERROR_TICKLE_DUTY, LVD_VOLTS, LVR_VOLTS, MAX_BATTERY_VOLTAGE, MAX_LOAD_OFF_SECONDS,
    TEMP_SHUTDOWN_C, Tunables,
};

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Panel current above which the solar indicator LED is lit.
const SOLAR_LED_THRESHOLD_MA: f32 = 50.0;
const ERROR_BLINK_INTERVAL_MS: u64 = 500;
const PANEL_RECHECK_MS: u64 = 60_000;
const MS_PER_HOUR: f32 = 3.6e6;

/// Per-cycle stage bookkeeping (persisted on the flush cadence).
#[derive(Debug, Clone)]
pub struct CycleState {
    pub state: ChargeState,
    pub bulk_start_ms: u64,
    pub absorption_start_ms: u64,
    pub calculated_absorption_hours: f32,
    /// Lithium taper latch: set once the absorption-termination condition
    /// first holds; never hands off to Float.
    pub li_taper: bool,
}

impl Default for CycleState {
    fn default() -> Self {
        Self {
            state: ChargeState::Bulk,
            bulk_start_ms: 0,
            absorption_start_ms: 0,
            calculated_absorption_hours: 0.0,
            li_taper: false,
        }
    }
}

/// Cycle values recovered from the persistence store at boot (best-effort).
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoredCycle {
    pub accumulated_ah: Option<f32>,
    pub bulk_start_ms: Option<u64>,
}

/// Values a web `/update` submission carries (the whole tunable set minus
/// the factor divider, which only the serial protocol exposes).
#[derive(Debug, Clone, Copy)]
pub struct TunableUpdate {
    pub battery_capacity_ah: f32,
    pub threshold_percentage: f32,
    pub max_allowed_current_ma: f32,
    pub bulk_voltage: f32,
    pub absorption_voltage: f32,
    pub float_voltage: f32,
    pub is_lithium: bool,
    pub use_dc_source: bool,
    pub dc_source_amps: f32,
}

/// Hardware ends handed to [`build_controller`].
pub struct ControllerParts<B, P, A, W, L> {
    pub battery_monitor: B,
    pub panel_monitor: Option<P>,
    pub thermistor: A,
    pub pwm: W,
    pub load_switch: L,
    pub solar_led: Option<Box<dyn StatusLed + Send>>,
    pub error_led: Option<Box<dyn StatusLed + Send>>,
}

pub struct Controller<B, P, A, W, L>
where
    B: PowerMonitor,
    P: PowerMonitor,
    A: AnalogInput,
    W: PwmChannel,
    L: LoadSwitch,
{
    battery_monitor: B,
    panel_monitor: Option<P>,
    thermistor: A,
    pwm: PwmRegulator<W>,
    load: L,
    solar_led: Option<Box<dyn StatusLed + Send>>,
    error_led: Option<Box<dyn StatusLed + Send>>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    tunables: Tunables,
    coulomb: CoulombCounter,
    safety: SafetySupervisor,
    cycle: CycleState,
    signals: Signals,
    panel_sensor_available: bool,
    last_panel_probe_ms: u64,
    note: String,
    persist_requested: bool,
    error_led_on: bool,
    last_blink_ms: u64,
}

/// Validate the tunables, probe the sensors, and assemble a controller in
/// its boot state. An unreachable battery sensor is fatal; a missing or
/// unreachable panel sensor degrades to `panel_current = 0` with periodic
/// reachability rechecks.
pub fn build_controller<B, P, A, W, L>(
    parts: ControllerParts<B, P, A, W, L>,
    tunables: Tunables,
    restored: RestoredCycle,
    clock: Option<Box<dyn Clock + Send + Sync>>,
) -> Result<Controller<B, P, A, W, L>>
where
    B: PowerMonitor,
    P: PowerMonitor,
    A: AnalogInput,
    W: PwmChannel,
    L: LoadSwitch,
{
    tunables.validate().map_err(eyre::Report::new)?;

    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(b) => Arc::from(b),
        None => Arc::new(MonotonicClock::new()),
    };
    let epoch = clock.now();

    let ControllerParts {
        mut battery_monitor,
        mut panel_monitor,
        thermistor,
        pwm,
        load_switch,
        solar_led,
        error_led,
    } = parts;

    battery_monitor
        .probe()
        .map_err(|e| eyre::Report::new(ChargerError::BatterySensor(e.to_string())))
        .wrap_err("battery sensor init")?;

    let panel_sensor_available = match panel_monitor.as_mut() {
        Some(m) => match m.probe() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "panel sensor unreachable; continuing without it");
                false
            }
        },
        None => false,
    };

    let mut controller = Controller {
        battery_monitor,
        panel_monitor,
        thermistor,
        pwm: PwmRegulator::new(pwm),
        load: load_switch,
        solar_led,
        error_led,
        clock,
        epoch,
        tunables,
        coulomb: CoulombCounter::default(),
        safety: SafetySupervisor::new(),
        cycle: CycleState::default(),
        signals: Signals::default(),
        panel_sensor_available,
        last_panel_probe_ms: 0,
        note: String::from("Controller started"),
        persist_requested: false,
        error_led_on: false,
        last_blink_ms: 0,
    };

    controller.pwm.set_duty(0)?;
    let now_ms = controller.now_ms();
    controller.sample();
    let volts = controller.signals.battery_voltage;
    let celsius = controller.signals.battery_temperature_c;

    controller.coulomb = CoulombCounter::new(restore_accumulated_ah(
        restored.accumulated_ah,
        controller.tunables.battery_capacity_ah,
        volts,
    ));

    if volts >= MAX_BATTERY_VOLTAGE || celsius >= TEMP_SHUTDOWN_C {
        controller.cycle.state = ChargeState::Error;
        controller.set_load(false)?;
        controller.pwm.set_duty(i32::from(ERROR_TICKLE_DUTY))?;
        controller.note = String::from("Unsafe conditions at boot; starting in error state");
        tracing::error!(volts, celsius, "unsafe boot conditions");
    } else {
        controller.cycle.state = machine::initial_state(volts, controller.tunables.is_lithium);
        match controller.cycle.state {
            ChargeState::Bulk => {
                // Monotonic stamps do not survive a reboot; a restored stamp
                // ahead of the clock resets to now.
                controller.cycle.bulk_start_ms = restored
                    .bulk_start_ms
                    .filter(|&ms| ms <= now_ms)
                    .unwrap_or(now_ms);
            }
            ChargeState::Absorption => controller.cycle.absorption_start_ms = now_ms,
            ChargeState::Float | ChargeState::Error => {}
        }
        let load_on = lvd_lvr_target(volts).unwrap_or(false);
        controller.set_load(load_on)?;
        tracing::info!(
            state = controller.cycle.state.as_wire(),
            volts,
            "boot state selected"
        );
    }

    Ok(controller)
}

impl<B, P, A, W, L> Controller<B, P, A, W, L>
where
    B: PowerMonitor,
    P: PowerMonitor,
    A: AnalogInput,
    W: PwmChannel,
    L: LoadSwitch,
{
    pub fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    pub fn clock(&self) -> Arc<dyn Clock + Send + Sync> {
        Arc::clone(&self.clock)
    }

    pub fn state(&self) -> ChargeState {
        self.cycle.state
    }

    pub fn duty(&self) -> u8 {
        self.pwm.duty()
    }

    pub fn load_enabled(&self) -> bool {
        self.load.is_enabled()
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn cycle(&self) -> &CycleState {
        &self.cycle
    }

    pub fn accumulated_ah(&self) -> f32 {
        self.coulomb.accumulated_ah()
    }

    pub fn panel_sensor_available(&self) -> bool {
        self.panel_sensor_available
    }

    pub fn temporary_load_off(&self) -> bool {
        self.safety.load_off.is_active()
    }

    /// True once when a stage change or accepted command wants an immediate
    /// persistence write.
    pub fn take_persist_request(&mut self) -> bool {
        std::mem::take(&mut self.persist_requested)
    }

    // ── The 1 s tick ─────────────────────────────────────────────────────

    pub fn tick(&mut self, now_ms: u64) -> Result<()> {
        self.sample();
        self.run_safety(now_ms)?;
        self.step_stage(now_ms)?;
        self.update_error_led(now_ms);
        tracing::debug!(
            state = self.cycle.state.as_wire(),
            duty = self.pwm.duty(),
            battery_v = self.signals.battery_voltage,
            panel_ma = self.signals.panel_current_ma,
            load_ma = self.signals.load_current_ma,
            temp_c = self.signals.battery_temperature_c,
            soc = self.coulomb.soc_percent(self.tunables.battery_capacity_ah),
            "tick"
        );
        Ok(())
    }

    fn sample(&mut self) {
        let max_ma = self.tunables.max_allowed_current_ma;
        let (panel_ma, panel_v) = match self.panel_monitor.as_mut() {
            Some(m) if self.panel_sensor_available => {
                (signals::read_average_current(m, max_ma), signals::read_voltage(m))
            }
            _ => (0.0, 0.0),
        };
        let load_ma = signals::read_average_current(&mut self.battery_monitor, max_ma);
        let battery_v = signals::read_voltage(&mut self.battery_monitor);
        let celsius = signals::read_temperature(&mut self.thermistor);
        self.signals = Signals {
            panel_current_ma: panel_ma,
            load_current_ma: load_ma,
            panel_voltage: panel_v,
            battery_voltage: battery_v,
            battery_temperature_c: celsius,
        };
        if let Some(led) = self.solar_led.as_mut() {
            led.set(panel_ma > SOLAR_LED_THRESHOLD_MA);
        }
    }

    fn run_safety(&mut self, now_ms: u64) -> Result<()> {
        let volts = self.signals.battery_voltage;
        let celsius = self.signals.battery_temperature_c;

        let overvoltage = self.safety.overvoltage_confirmed(now_ms, volts);
        let overtemp = self.safety.overtemp_confirmed(now_ms, celsius);
        if self.cycle.state != ChargeState::Error && (overvoltage || overtemp) {
            let note = if overvoltage {
                "Over-voltage confirmed; charging halted"
            } else {
                "Over-temperature confirmed; charging halted"
            };
            self.enter_error(note)?;
        }

        if self.cycle.state == ChargeState::Error
            && self.safety.error_cleared(now_ms, volts, celsius)
        {
            self.cycle.state = ChargeState::Absorption;
            self.cycle.absorption_start_ms = now_ms;
            self.cycle.li_taper = false;
            self.coulomb.reset_for_new_stage(
                ChargeState::Absorption,
                volts,
                self.tunables.battery_capacity_ah,
            );
            if !self.safety.load_off.is_active() {
                self.set_load(true)?;
            }
            self.note = String::from("Safety conditions cleared; resuming absorption");
            self.persist_requested = true;
            tracing::info!("error cleared; resuming absorption");
        }

        if self
            .safety
            .panel_loss_confirmed(now_ms, self.signals.panel_current_ma, self.pwm.duty())
        {
            self.pwm.set_duty(0)?;
            self.note = String::from("Panel current lost; PWM forced to zero");
            tracing::warn!("panel current loss confirmed; duty forced to 0");
        }

        if self.safety.load_off.expired(now_ms) {
            self.safety.load_off.cancel();
            if self.cycle.state != ChargeState::Error && reconnect_allowed(volts) {
                self.set_load(true)?;
                self.note =
                    String::from("Load re-enabled automatically after the requested time");
            } else {
                self.note = String::from(
                    "Load-off window elapsed but battery voltage is out of range; load stays off",
                );
                tracing::warn!(volts, "load-off expiry without reconnect");
            }
        }

        if self.safety.load_off.is_active() {
            if self.load.is_enabled() {
                self.set_load(false)?;
            }
        } else if self.cycle.state == ChargeState::Error {
            if self.load.is_enabled() {
                self.set_load(false)?;
            }
        } else if let Some(on) = lvd_lvr_target(volts) {
            if on != self.load.is_enabled() {
                self.set_load(on)?;
                self.note = String::from(if on {
                    "Load reconnected (LVR)"
                } else {
                    "Load disconnected (LVD)"
                });
                tracing::info!(volts, load_on = on, "LVD/LVR load switch");
            }
        }

        let eligible = matches!(
            self.cycle.state,
            ChargeState::Absorption | ChargeState::Float
        );
        if self.safety.bulk_reentry_due(now_ms, volts, eligible) {
            self.enter_bulk(now_ms, "Battery sagged below 12.6 V; returning to bulk")?;
        }
        Ok(())
    }

    fn step_stage(&mut self, now_ms: u64) -> Result<()> {
        let volts = self.signals.battery_voltage;
        let capacity = self.tunables.battery_capacity_ah;

        match self.cycle.state {
            ChargeState::Error => {
                self.pwm.set_duty(i32::from(ERROR_TICKLE_DUTY))?;
                return Ok(());
            }
            ChargeState::Absorption => {
                let net_amps = self.signals.net_current_ma() / 1000.0;
                self.cycle.calculated_absorption_hours = machine::absorption_hours(
                    net_amps,
                    self.coulomb.accumulated_ah(),
                    capacity,
                );
            }
            ChargeState::Bulk | ChargeState::Float => {}
        }

        let delta = machine::duty_delta(
            self.cycle.state,
            &self.signals,
            &self.tunables,
            self.cycle.li_taper,
        );
        self.pwm.adjust(delta)?;

        // Transitions are evaluated after the tick's duty application.
        match self.cycle.state {
            ChargeState::Bulk => {
                let by_voltage = volts >= self.tunables.bulk_voltage;
                let max_bulk_hours = self.tunables.max_bulk_hours();
                let by_time = self.tunables.use_dc_source && max_bulk_hours > 0.0 && {
                    let hours =
                        now_ms.saturating_sub(self.cycle.bulk_start_ms) as f32 / MS_PER_HOUR;
                    hours >= max_bulk_hours
                };
                if by_voltage || by_time {
                    self.cycle.state = ChargeState::Absorption;
                    self.cycle.absorption_start_ms = now_ms;
                    self.cycle.bulk_start_ms = 0;
                    self.cycle.li_taper = false;
                    self.coulomb
                        .reset_for_new_stage(ChargeState::Absorption, volts, capacity);
                    self.note = String::from("Absorption stage started");
                    self.persist_requested = true;
                    tracing::info!(by_voltage, by_time, "bulk -> absorption");
                }
            }
            ChargeState::Absorption => {
                let net_ma = self.signals.net_current_ma();
                let elapsed_hours =
                    now_ms.saturating_sub(self.cycle.absorption_start_ms) as f32 / MS_PER_HOUR;
                let terminated = net_ma <= self.tunables.absorption_current_threshold_ma()
                    || elapsed_hours >= self.cycle.calculated_absorption_hours;
                if terminated {
                    if self.tunables.is_lithium {
                        if !self.cycle.li_taper {
                            self.cycle.li_taper = true;
                            self.note = String::from("Lithium taper hold engaged");
                            tracing::info!("lithium absorption taper engaged");
                        }
                    } else {
                        self.cycle.state = ChargeState::Float;
                        self.coulomb
                            .reset_for_new_stage(ChargeState::Float, volts, capacity);
                        self.note = String::from("Float stage started");
                        self.persist_requested = true;
                        tracing::info!("absorption -> float");
                    }
                }
            }
            ChargeState::Float | ChargeState::Error => {}
        }
        Ok(())
    }

    fn enter_bulk(&mut self, now_ms: u64, note: &str) -> Result<()> {
        let volts = self.signals.battery_voltage;
        self.cycle.state = ChargeState::Bulk;
        self.cycle.bulk_start_ms = now_ms;
        self.cycle.absorption_start_ms = 0;
        self.cycle.li_taper = false;
        self.coulomb.reset_for_new_stage(
            ChargeState::Bulk,
            volts,
            self.tunables.battery_capacity_ah,
        );
        self.note = String::from(note);
        self.persist_requested = true;
        tracing::info!(volts, "re-entering bulk");
        Ok(())
    }

    fn enter_error(&mut self, note: &str) -> Result<()> {
        self.cycle.state = ChargeState::Error;
        self.safety.reset_fault_counters();
        self.pwm.set_duty(i32::from(ERROR_TICKLE_DUTY))?;
        self.set_load(false)?;
        self.note = String::from(note);
        self.persist_requested = true;
        tracing::error!(note, "entering error state");
        Ok(())
    }

    fn update_error_led(&mut self, now_ms: u64) {
        let Some(led) = self.error_led.as_mut() else {
            return;
        };
        if self.cycle.state == ChargeState::Error {
            if now_ms.saturating_sub(self.last_blink_ms) >= ERROR_BLINK_INTERVAL_MS {
                self.error_led_on = !self.error_led_on;
                self.last_blink_ms = now_ms;
                led.set(self.error_led_on);
            }
        } else if self.error_led_on {
            self.error_led_on = false;
            led.set(false);
        }
    }

    fn set_load(&mut self, on: bool) -> Result<()> {
        self.load
            .set_enabled(on)
            .map_err(|e| eyre::Report::new(ChargerError::Hardware(e.to_string())))
            .wrap_err("load switch")
    }

    // ── Continuous (every loop iteration) tasks ──────────────────────────

    pub fn update_coulomb(&mut self, now_ms: u64) {
        self.coulomb.update(
            now_ms,
            self.signals.panel_current_ma,
            self.signals.load_current_ma,
            self.tunables.battery_capacity_ah,
        );
    }

    pub fn maybe_recheck_panel(&mut self, now_ms: u64) {
        if self.panel_sensor_available || self.panel_monitor.is_none() {
            return;
        }
        if now_ms.saturating_sub(self.last_panel_probe_ms) < PANEL_RECHECK_MS {
            return;
        }
        self.last_panel_probe_ms = now_ms;
        if let Some(m) = self.panel_monitor.as_mut()
            && m.probe().is_ok()
        {
            self.panel_sensor_available = true;
            self.note = String::from("Panel sensor back online");
            tracing::info!("panel sensor reachable again");
        }
    }

    // ── Command mutations (applied between ticks) ────────────────────────

    /// Apply one `SET_<param>` with its range check. Returns the
    /// persistence key to write on success (`None` for the non-persisted
    /// factor divider), or a reason string for `ERROR:` framing.
    pub fn set_param(
        &mut self,
        param: &str,
        raw: &str,
    ) -> std::result::Result<Option<&'static str>, String> {
        use crate::persist::keys;

        let mut candidate = self.tunables.clone();
        let key = match param {
            "batteryCapacity" => {
                candidate.battery_capacity_ah = parse_f32(param, raw)?;
                Some(keys::BATTERY_CAP)
            }
            "thresholdPercentage" => {
                candidate.threshold_percentage = parse_f32(param, raw)?;
                Some(keys::THRESHOLD_PERC)
            }
            "maxAllowedCurrent" => {
                candidate.max_allowed_current_ma = parse_f32(param, raw)?;
                Some(keys::MAX_CURRENT)
            }
            "bulkVoltage" => {
                candidate.bulk_voltage = parse_f32(param, raw)?;
                Some(keys::BULK_V)
            }
            "absorptionVoltage" => {
                candidate.absorption_voltage = parse_f32(param, raw)?;
                Some(keys::ABS_V)
            }
            "floatVoltage" => {
                candidate.float_voltage = parse_f32(param, raw)?;
                Some(keys::FLOAT_V)
            }
            "isLithium" => {
                candidate.is_lithium = parse_bool(param, raw)?;
                Some(keys::IS_LITHIUM)
            }
            "useFuenteDC" => {
                candidate.use_dc_source = parse_bool(param, raw)?;
                Some(keys::USE_DC_SOURCE)
            }
            "fuenteDC_Amps" => {
                candidate.dc_source_amps = parse_f32(param, raw)?;
                Some(keys::DC_SOURCE_AMPS)
            }
            "factorDivider" => {
                let v = parse_f32(param, raw)?;
                if v.fract() != 0.0 || !(1.0..=10.0).contains(&v) {
                    return Err(format!("Invalid value for {param}"));
                }
                candidate.factor_divider = v as u8;
                None
            }
            _ => return Err(format!("Unknown parameter {param}")),
        };
        candidate
            .validate()
            .map_err(|_| format!("Invalid value for {param}"))?;

        let capacity_changed =
            candidate.battery_capacity_ah != self.tunables.battery_capacity_ah;
        self.tunables = candidate;
        if capacity_changed {
            // Stored energy is preserved; only the 110 % ceiling moves.
            let ah = self.coulomb.accumulated_ah();
            self.coulomb
                .set_accumulated_ah(ah, self.tunables.battery_capacity_ah);
        }
        self.note = format!("{param} updated to {raw}");
        self.persist_requested = true;
        tracing::info!(param, value = raw, "tunable updated");
        Ok(key)
    }

    /// Apply a full web `/update` submission atomically.
    pub fn apply_update(&mut self, update: &TunableUpdate) -> std::result::Result<(), String> {
        let candidate = Tunables {
            battery_capacity_ah: update.battery_capacity_ah,
            threshold_percentage: update.threshold_percentage,
            max_allowed_current_ma: update.max_allowed_current_ma,
            bulk_voltage: update.bulk_voltage,
            absorption_voltage: update.absorption_voltage,
            float_voltage: update.float_voltage,
            is_lithium: update.is_lithium,
            use_dc_source: update.use_dc_source,
            dc_source_amps: update.dc_source_amps,
            factor_divider: self.tunables.factor_divider,
        };
        candidate.validate().map_err(|e| e.to_string())?;
        let capacity_changed =
            candidate.battery_capacity_ah != self.tunables.battery_capacity_ah;
        self.tunables = candidate;
        if capacity_changed {
            let ah = self.coulomb.accumulated_ah();
            self.coulomb
                .set_accumulated_ah(ah, self.tunables.battery_capacity_ah);
        }
        self.note = String::from("Charge parameters updated");
        self.persist_requested = true;
        tracing::info!("tunables updated via web form");
        Ok(())
    }

    /// Arm the temporary load-off window; returns the clamped duration in
    /// seconds.
    pub fn toggle_load(&mut self, now_ms: u64, seconds: u64) -> Result<u64> {
        let clamped = self.safety.load_off.activate(now_ms, seconds);
        self.set_load(false)?;
        self.note = format!("Load switched off for {clamped} seconds");
        tracing::info!(seconds = clamped, "temporary load-off armed");
        Ok(clamped)
    }

    /// Clear the load-off window and re-enable the load, subject to LVD and
    /// the Error state.
    pub fn cancel_temp_off(&mut self) -> Result<()> {
        self.safety.load_off.cancel();
        let volts = self.signals.battery_voltage;
        if self.cycle.state != ChargeState::Error && lvd_lvr_target(volts) != Some(false) {
            self.set_load(true)?;
            self.note = String::from("Temporary load-off cancelled; load re-enabled");
        } else {
            self.note =
                String::from("Temporary load-off cancelled; load stays off (voltage out of range)");
        }
        tracing::info!("temporary load-off cancelled");
        Ok(())
    }

    // ── Snapshot ─────────────────────────────────────────────────────────

    pub fn snapshot(&self, now_ms: u64) -> Snapshot {
        let s = &self.signals;
        let t = &self.tunables;
        let non_negative = |x: f32| if x.is_finite() && x > 0.0 { x } else { 0.0 };
        let current_bulk_hours = if self.cycle.state == ChargeState::Bulk {
            now_ms.saturating_sub(self.cycle.bulk_start_ms) as f32 / MS_PER_HOUR
        } else {
            0.0
        };
        Snapshot {
            panel_to_battery_current: non_negative(s.panel_current_ma),
            battery_to_load_current: non_negative(s.load_current_ma),
            voltage_panel: non_negative(s.panel_voltage),
            voltage_battery_sensor2: non_negative(s.battery_voltage),
            current_pwm: self.pwm.duty(),
            temperature: if s.battery_temperature_c.is_finite() {
                s.battery_temperature_c
            } else {
                0.0
            },
            charge_state: self.cycle.state.as_wire(),
            bulk_voltage: t.bulk_voltage,
            absorption_voltage: t.absorption_voltage,
            float_voltage: t.float_voltage,
            lvd: LVD_VOLTS,
            lvr: LVR_VOLTS,
            battery_capacity: t.battery_capacity_ah,
            threshold_percentage: t.threshold_percentage,
            max_allowed_current: t.max_allowed_current_ma,
            is_lithium: t.is_lithium,
            max_battery_voltage_allowed: MAX_BATTERY_VOLTAGE,
            absorption_current_threshold_ma: t.absorption_current_threshold_ma(),
            current_limit_into_float_stage: t.current_limit_into_float_ma(),
            calculated_absorption_hours: non_negative(self.cycle.calculated_absorption_hours),
            accumulated_ah: self.coulomb.accumulated_ah(),
            estimated_soc: soc_from_voltage(s.battery_voltage),
            net_current: s.net_current_ma(),
            factor_divider: t.factor_divider,
            use_fuente_dc: t.use_dc_source,
            fuente_dc_amps: t.dc_source_amps,
            max_bulk_hours: t.max_bulk_hours(),
            current_bulk_hours,
            panel_sensor_available: self.panel_sensor_available,
            temporary_load_off: self.safety.load_off.is_active(),
            load_off_remaining_seconds: self.safety.load_off.remaining_seconds(now_ms),
            load_off_duration: self.safety.load_off.duration_seconds(),
            load_off_max_duration: MAX_LOAD_OFF_SECONDS,
            load_control_state: if self.load.is_enabled() { "ON" } else { "OFF" },
            nota_personalizada: self.note.clone(),
            connected: true,
            firmware_version: FIRMWARE_VERSION,
            uptime: now_ms / 1000,
        }
    }

    /// Cycle values the runner persists on the flush cadence.
    pub fn persisted_cycle(&self) -> (f32, u64) {
        (self.coulomb.accumulated_ah(), self.cycle.bulk_start_ms)
    }

    pub fn battery_voltage(&self) -> f32 {
        self.signals.battery_voltage
    }
}

fn parse_f32(param: &str, raw: &str) -> std::result::Result<f32, String> {
    raw.trim()
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("Invalid value for {param}"))
}

fn parse_bool(param: &str, raw: &str) -> std::result::Result<bool, String> {
    match raw.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(format!("Invalid value for {param}")),
    }
}
