//! Charge stages and their per-tick duty laws.

use crate::signals::Signals;
use crate::tunables::{CHARGED_REST_VOLTAGE, MAX_ABSORPTION_HOURS, Tunables};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeState {
    Bulk,
    Absorption,
    Float,
    Error,
}

impl ChargeState {
    /// Wire name used in the JSON snapshot and diagnostics.
    pub fn as_wire(self) -> &'static str {
        match self {
            ChargeState::Bulk => "BULK_CHARGE",
            ChargeState::Absorption => "ABSORPTION_CHARGE",
            ChargeState::Float => "FLOAT_CHARGE",
            ChargeState::Error => "ERROR",
        }
    }
}

/// Stage selected at boot from the resting battery voltage and chemistry.
/// The boot-time safety gate (over-voltage / over-temperature) overrides
/// this with `Error` in the builder.
pub fn initial_state(battery_voltage: f32, is_lithium: bool) -> ChargeState {
    if battery_voltage >= CHARGED_REST_VOLTAGE {
        if is_lithium {
            ChargeState::Absorption
        } else {
            ChargeState::Float
        }
    } else {
        ChargeState::Bulk
    }
}

/// Duty adjustment for one tick. Exactly one step is emitted per tick;
/// `li_taper` selects the lithium tail law once the absorption-termination
/// condition has latched. `Error` holds a fixed tickle duty and never
/// adjusts.
pub fn duty_delta(
    state: ChargeState,
    signals: &Signals,
    tunables: &Tunables,
    li_taper: bool,
) -> i32 {
    let charge_ma = signals.panel_current_ma;
    let volts = signals.battery_voltage;
    match state {
        ChargeState::Bulk => {
            if charge_ma > tunables.max_allowed_current_ma {
                -5
            } else if volts < tunables.bulk_voltage {
                1
            } else {
                -1
            }
        }
        ChargeState::Absorption => {
            if tunables.is_lithium && li_taper {
                if charge_ma > signals.load_current_ma {
                    -3
                } else {
                    1
                }
            } else if volts > tunables.absorption_voltage {
                -1
            } else if volts < tunables.absorption_voltage {
                if charge_ma < tunables.max_allowed_current_ma {
                    1
                } else {
                    -2
                }
            } else {
                0
            }
        }
        ChargeState::Float => {
            let limit = tunables.current_limit_into_float_ma() + signals.load_current_ma;
            if charge_ma <= limit {
                if volts > tunables.float_voltage {
                    -1
                } else if volts < tunables.float_voltage {
                    1
                } else {
                    0
                }
            } else {
                -2
            }
        }
        ChargeState::Error => 0,
    }
}

/// Absorption duration recomputed every Absorption tick: the time to push
/// the remaining capacity (with 10 % headroom) at the present net current,
/// capped at [`MAX_ABSORPTION_HOURS`]. Zero or reverse net current yields
/// half the cap.
pub fn absorption_hours(net_amps: f32, accumulated_ah: f32, capacity_ah: f32) -> f32 {
    if !(net_amps > 0.0) {
        return MAX_ABSORPTION_HOURS / 2.0;
    }
    let charged_pct = if capacity_ah > 0.0 {
        (accumulated_ah / capacity_ah * 100.0).clamp(0.0, 110.0)
    } else {
        0.0
    };
    let remaining_ah = capacity_ah * (100.0 - charged_pct).max(0.0) / 100.0 * 1.1;
    (remaining_ah / net_amps).min(MAX_ABSORPTION_HOURS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::Signals;

    fn signals(panel_ma: f32, load_ma: f32, volts: f32) -> Signals {
        Signals {
            panel_current_ma: panel_ma,
            load_current_ma: load_ma,
            panel_voltage: 18.0,
            battery_voltage: volts,
            battery_temperature_c: 25.0,
        }
    }

    #[test]
    fn boot_state_selection() {
        assert_eq!(initial_state(12.3, false), ChargeState::Bulk);
        assert_eq!(initial_state(12.88, false), ChargeState::Float);
        assert_eq!(initial_state(13.0, true), ChargeState::Absorption);
    }

    #[test]
    fn bulk_law() {
        let t = Tunables::default();
        assert_eq!(duty_delta(ChargeState::Bulk, &signals(7000.0, 0.0, 13.0), &t, false), -5);
        assert_eq!(duty_delta(ChargeState::Bulk, &signals(2000.0, 0.0, 13.0), &t, false), 1);
        assert_eq!(duty_delta(ChargeState::Bulk, &signals(2000.0, 0.0, 14.5), &t, false), -1);
    }

    #[test]
    fn absorption_gel_law() {
        let t = Tunables::default();
        assert_eq!(
            duty_delta(ChargeState::Absorption, &signals(500.0, 0.0, 14.5), &t, false),
            -1
        );
        assert_eq!(
            duty_delta(ChargeState::Absorption, &signals(500.0, 0.0, 14.3), &t, false),
            1
        );
        assert_eq!(
            duty_delta(ChargeState::Absorption, &signals(6500.0, 0.0, 14.3), &t, false),
            -2
        );
    }

    #[test]
    fn absorption_li_taper_law() {
        let t = Tunables {
            is_lithium: true,
            ..Tunables::default()
        };
        assert_eq!(
            duty_delta(ChargeState::Absorption, &signals(900.0, 400.0, 14.0), &t, true),
            -3
        );
        assert_eq!(
            duty_delta(ChargeState::Absorption, &signals(300.0, 400.0, 14.0), &t, true),
            1
        );
        // Before the taper latches, the constant-voltage law applies.
        assert_eq!(
            duty_delta(ChargeState::Absorption, &signals(900.0, 400.0, 14.0), &t, false),
            1
        );
    }

    #[test]
    fn float_law() {
        let t = Tunables::default();
        // limit = 100 mA + load
        assert_eq!(duty_delta(ChargeState::Float, &signals(90.0, 0.0, 13.7), &t, false), -1);
        assert_eq!(duty_delta(ChargeState::Float, &signals(90.0, 0.0, 13.5), &t, false), 1);
        assert_eq!(duty_delta(ChargeState::Float, &signals(400.0, 0.0, 13.5), &t, false), -2);
    }

    #[test]
    fn absorption_hours_bounds() {
        assert_eq!(absorption_hours(0.0, 10.0, 50.0), MAX_ABSORPTION_HOURS / 2.0);
        assert_eq!(absorption_hours(-1.0, 10.0, 50.0), MAX_ABSORPTION_HOURS / 2.0);
        // Nearly full bank at high net current: tiny remainder
        let h = absorption_hours(5.0, 49.0, 50.0);
        assert!(h > 0.0 && h < MAX_ABSORPTION_HOURS);
        // Empty bank: capped at the max
        assert_eq!(absorption_hours(0.5, 0.0, 50.0), MAX_ABSORPTION_HOURS);
    }
}
