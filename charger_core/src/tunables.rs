//! Persisted charge parameters and the constants of the charge profile.

use crate::error::BuildError;

/// Low-voltage disconnect threshold for the load pin.
pub const LVD_VOLTS: f32 = 12.0;
/// Low-voltage reconnect threshold for the load pin.
pub const LVR_VOLTS: f32 = 12.5;
/// Absolute battery voltage ceiling; sustained readings at or above this
/// confirm an over-voltage fault.
pub const MAX_BATTERY_VOLTAGE: f32 = 15.0;
/// Resting voltage above which a battery is considered fully charged at boot.
pub const CHARGED_REST_VOLTAGE: f32 = 12.88;
/// Temperature shutdown threshold in °C (deployment choice; see DESIGN.md).
pub const TEMP_SHUTDOWN_C: f32 = 90.0;
/// Hard cap on the computed absorption stage duration, in hours.
pub const MAX_ABSORPTION_HOURS: f32 = 1.0;
/// Longest accepted temporary load-off request.
pub const MAX_LOAD_OFF_SECONDS: u64 = 28_800;
pub const MAX_LOAD_OFF_MS: u64 = MAX_LOAD_OFF_SECONDS * 1000;
/// PWM register value held while in the Error state.
pub const ERROR_TICKLE_DUTY: u8 = 20;
/// Battery voltage below which a sustained sag forces re-entry into Bulk.
pub const BULK_REENTRY_VOLTS: f32 = 12.6;
/// How long the sag must persist before re-entry fires.
pub const BULK_REENTRY_HOLD_MS: u64 = 30_000;
/// Panel current at or below this (with non-zero duty) counts as panel loss.
pub const PANEL_LOSS_CURRENT_MA: f32 = 10.0;

/// Runtime-tunable charge parameters. Persisted under the `charger`
/// namespace; every mutation goes through the range checks in
/// [`Tunables::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Tunables {
    /// Battery bank capacity in Ah, (0, 1000].
    pub battery_capacity_ah: f32,
    /// C-rate percentage at which absorption terminates, [0.1, 5.0].
    pub threshold_percentage: f32,
    /// Charge current ceiling in mA, [1000, 15000].
    pub max_allowed_current_ma: f32,
    /// Stage voltages in volts, each [12.0, 15.0] with
    /// float ≤ absorption ≤ bulk.
    pub bulk_voltage: f32,
    pub absorption_voltage: f32,
    pub float_voltage: f32,
    /// Battery chemistry: lithium never enters Float.
    pub is_lithium: bool,
    /// Charging from a bench DC source instead of a panel.
    pub use_dc_source: bool,
    /// Rated source current in A, [0, 50]; bounds the Bulk stage duration.
    pub dc_source_amps: f32,
    /// Divider applied to the absorption threshold to get the Float
    /// over-current limit, [1, 10].
    pub factor_divider: u8,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            battery_capacity_ah: 50.0,
            threshold_percentage: 1.0,
            max_allowed_current_ma: 6000.0,
            bulk_voltage: 14.4,
            absorption_voltage: 14.4,
            float_voltage: 13.6,
            is_lithium: false,
            use_dc_source: false,
            dc_source_amps: 0.0,
            factor_divider: 5,
        }
    }
}

impl Tunables {
    /// Validate every range plus the stage-voltage ordering invariant.
    pub fn validate(&self) -> Result<(), BuildError> {
        if !(self.battery_capacity_ah > 0.0 && self.battery_capacity_ah <= 1000.0) {
            return Err(BuildError::InvalidConfig(
                "battery capacity must be in (0, 1000] Ah",
            ));
        }
        if !(0.1..=5.0).contains(&self.threshold_percentage) {
            return Err(BuildError::InvalidConfig(
                "threshold percentage must be in [0.1, 5.0]",
            ));
        }
        if !(1000.0..=15000.0).contains(&self.max_allowed_current_ma) {
            return Err(BuildError::InvalidConfig(
                "max allowed current must be in [1000, 15000] mA",
            ));
        }
        for v in [self.bulk_voltage, self.absorption_voltage, self.float_voltage] {
            if !(12.0..=MAX_BATTERY_VOLTAGE).contains(&v) {
                return Err(BuildError::InvalidConfig(
                    "stage voltages must be in [12.0, 15.0] V",
                ));
            }
        }
        if self.float_voltage > self.absorption_voltage
            || self.absorption_voltage > self.bulk_voltage
        {
            return Err(BuildError::InvalidConfig(
                "stage voltages must satisfy float <= absorption <= bulk",
            ));
        }
        if !(0.0..=50.0).contains(&self.dc_source_amps) {
            return Err(BuildError::InvalidConfig(
                "DC source amps must be in [0, 50]",
            ));
        }
        if !(1..=10).contains(&self.factor_divider) {
            return Err(BuildError::InvalidConfig(
                "factor divider must be in [1, 10]",
            ));
        }
        Ok(())
    }

    /// Net charge current below which absorption terminates, in mA.
    pub fn absorption_current_threshold_ma(&self) -> f32 {
        self.battery_capacity_ah * self.threshold_percentage * 10.0
    }

    /// Over-current limit while holding Float, in mA.
    pub fn current_limit_into_float_ma(&self) -> f32 {
        self.absorption_current_threshold_ma() / f32::from(self.factor_divider)
    }

    /// Time bound for Bulk when charging from a rated DC source, in hours.
    /// Zero when no bound applies.
    pub fn max_bulk_hours(&self) -> f32 {
        if self.use_dc_source && self.dc_source_amps > 0.0 {
            self.battery_capacity_ah / self.dc_source_amps
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Tunables;

    #[test]
    fn defaults_are_valid() {
        Tunables::default().validate().unwrap();
    }

    #[test]
    fn derived_thresholds() {
        let t = Tunables::default();
        assert_eq!(t.absorption_current_threshold_ma(), 500.0);
        assert_eq!(t.current_limit_into_float_ma(), 100.0);
        assert_eq!(t.max_bulk_hours(), 0.0);

        let dc = Tunables {
            use_dc_source: true,
            dc_source_amps: 10.0,
            ..Tunables::default()
        };
        assert_eq!(dc.max_bulk_hours(), 5.0);
    }

    #[test]
    fn voltage_ordering_enforced() {
        let bad = Tunables {
            float_voltage: 14.8,
            absorption_voltage: 14.4,
            ..Tunables::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn capacity_range_enforced() {
        let bad = Tunables {
            battery_capacity_ah: 0.0,
            ..Tunables::default()
        };
        assert!(bad.validate().is_err());
        let bad = Tunables {
            battery_capacity_ah: 1001.0,
            ..Tunables::default()
        };
        assert!(bad.validate().is_err());
    }
}
