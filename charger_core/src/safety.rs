//! Confirmed fault detection, LVD/LVR, and the temporary load-off timer.

use crate::confirm::Confirmation;
use crate::tunables::{
    BULK_REENTRY_HOLD_MS, BULK_REENTRY_VOLTS, LVD_VOLTS, LVR_VOLTS, MAX_BATTERY_VOLTAGE,
    MAX_LOAD_OFF_MS, MAX_LOAD_OFF_SECONDS, PANEL_LOSS_CURRENT_MA, TEMP_SHUTDOWN_C,
};

pub const OVERVOLTAGE_CONFIRMATIONS: u8 = 5;
pub const OVERVOLTAGE_INTERVAL_MS: u64 = 1000;
pub const OVERTEMP_CONFIRMATIONS: u8 = 5;
pub const OVERTEMP_INTERVAL_MS: u64 = 2000;
pub const PANEL_LOSS_CONFIRMATIONS: u8 = 5;
pub const PANEL_LOSS_INTERVAL_MS: u64 = 100;
/// Error state clears after safety signals stay normal this long.
pub const ERROR_RECHECK_MS: u64 = 2000;

/// Externally commanded load-off window. The load pin is forced OFF while
/// active, independent of LVD/LVR.
#[derive(Debug, Clone, Default)]
pub struct LoadOffTimer {
    active: bool,
    start_ms: u64,
    duration_ms: u64,
}

impl LoadOffTimer {
    /// Arm (or re-arm) the timer. The requested duration is clamped to
    /// [1, MAX_LOAD_OFF_SECONDS]; the clamped value is returned.
    pub fn activate(&mut self, now_ms: u64, seconds: u64) -> u64 {
        let clamped = seconds.clamp(1, MAX_LOAD_OFF_SECONDS);
        self.active = true;
        self.start_ms = now_ms;
        self.duration_ms = clamped * 1000;
        clamped
    }

    pub fn cancel(&mut self) {
        self.active = false;
        self.duration_ms = 0;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_ms / 1000
    }

    pub fn remaining_seconds(&self, now_ms: u64) -> u64 {
        if !self.active {
            return 0;
        }
        let elapsed = now_ms.saturating_sub(self.start_ms);
        self.duration_ms.saturating_sub(elapsed).div_ceil(1000)
    }

    pub fn expired(&self, now_ms: u64) -> bool {
        self.active
            && now_ms.saturating_sub(self.start_ms) >= self.duration_ms.min(MAX_LOAD_OFF_MS)
    }
}

/// LVD/LVR decision for the load pin. `None` means the voltage sits in the
/// hysteresis band and the pin keeps its current state.
pub fn lvd_lvr_target(volts: f32) -> Option<bool> {
    if volts < LVD_VOLTS || volts > MAX_BATTERY_VOLTAGE {
        Some(false)
    } else if volts > LVR_VOLTS && volts < MAX_BATTERY_VOLTAGE {
        Some(true)
    } else {
        None
    }
}

/// Voltage window in which an expired load-off timer may re-enable the pin.
pub fn reconnect_allowed(volts: f32) -> bool {
    volts > LVR_VOLTS && volts < MAX_BATTERY_VOLTAGE
}

/// All confirmation state for the supervisor, updated once per tick before
/// the state machine runs.
#[derive(Debug, Clone)]
pub struct SafetySupervisor {
    overvoltage: Confirmation,
    overtemp: Confirmation,
    panel_loss: Confirmation,
    reentry_since_ms: Option<u64>,
    error_clear_since_ms: Option<u64>,
    pub load_off: LoadOffTimer,
}

impl Default for SafetySupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetySupervisor {
    pub fn new() -> Self {
        Self {
            overvoltage: Confirmation::new(OVERVOLTAGE_CONFIRMATIONS, OVERVOLTAGE_INTERVAL_MS),
            overtemp: Confirmation::new(OVERTEMP_CONFIRMATIONS, OVERTEMP_INTERVAL_MS),
            panel_loss: Confirmation::new(PANEL_LOSS_CONFIRMATIONS, PANEL_LOSS_INTERVAL_MS),
            reentry_since_ms: None,
            error_clear_since_ms: None,
            load_off: LoadOffTimer::default(),
        }
    }

    /// Battery over-voltage, confirmed over consecutive 1 s observations.
    pub fn overvoltage_confirmed(&mut self, now_ms: u64, volts: f32) -> bool {
        self.overvoltage.observe(now_ms, volts >= MAX_BATTERY_VOLTAGE)
    }

    /// Over-temperature, confirmed at the slower 2 s cadence.
    pub fn overtemp_confirmed(&mut self, now_ms: u64, celsius: f32) -> bool {
        self.overtemp.observe(now_ms, celsius >= TEMP_SHUTDOWN_C)
    }

    /// Panel-current loss while the stage is driving the gate. Confirmed
    /// detections reset the sequence so the forced duty drop fires once.
    pub fn panel_loss_confirmed(&mut self, now_ms: u64, panel_ma: f32, duty: u8) -> bool {
        let active = panel_ma <= PANEL_LOSS_CURRENT_MA && duty != 0;
        let confirmed = self.panel_loss.observe(now_ms, active);
        if confirmed {
            self.panel_loss.reset();
        }
        confirmed
    }

    /// Clear fault counters (entering Error; they re-arm for the next
    /// incident after recovery).
    pub fn reset_fault_counters(&mut self) {
        self.overvoltage.reset();
        self.overtemp.reset();
    }

    /// Sustained sag below the re-entry voltage forces the machine back to
    /// Bulk. `eligible` is false in Bulk and Error.
    pub fn bulk_reentry_due(&mut self, now_ms: u64, volts: f32, eligible: bool) -> bool {
        if !eligible || volts >= BULK_REENTRY_VOLTS {
            self.reentry_since_ms = None;
            return false;
        }
        let since = *self.reentry_since_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(since) >= BULK_REENTRY_HOLD_MS {
            self.reentry_since_ms = None;
            true
        } else {
            false
        }
    }

    /// Error recovery predicate: all safety signals normal for one 2 s
    /// recheck window and the battery back above LVD.
    pub fn error_cleared(&mut self, now_ms: u64, volts: f32, celsius: f32) -> bool {
        let normal =
            volts < MAX_BATTERY_VOLTAGE && celsius < TEMP_SHUTDOWN_C && volts >= LVD_VOLTS;
        if !normal {
            self.error_clear_since_ms = None;
            return false;
        }
        let since = *self.error_clear_since_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(since) >= ERROR_RECHECK_MS {
            self.error_clear_since_ms = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_off_clamps_to_eight_hours() {
        let mut t = LoadOffTimer::default();
        assert_eq!(t.activate(0, 50_000), MAX_LOAD_OFF_SECONDS);
        assert_eq!(t.duration_seconds(), MAX_LOAD_OFF_SECONDS);
        assert_eq!(t.remaining_seconds(0), MAX_LOAD_OFF_SECONDS);
        assert!(!t.expired(MAX_LOAD_OFF_MS - 1));
        assert!(t.expired(MAX_LOAD_OFF_MS));
    }

    #[test]
    fn load_off_rearm_refreshes() {
        let mut t = LoadOffTimer::default();
        t.activate(0, 10);
        t.activate(5_000, 10);
        assert!(!t.expired(14_999));
        assert!(t.expired(15_000));
    }

    #[test]
    fn lvd_lvr_hysteresis() {
        assert_eq!(lvd_lvr_target(11.9), Some(false));
        assert_eq!(lvd_lvr_target(15.1), Some(false));
        assert_eq!(lvd_lvr_target(12.2), None);
        assert_eq!(lvd_lvr_target(12.5), None);
        assert_eq!(lvd_lvr_target(12.6), Some(true));
        assert_eq!(lvd_lvr_target(15.0), None);
    }

    #[test]
    fn bulk_reentry_needs_sustained_sag() {
        let mut s = SafetySupervisor::new();
        assert!(!s.bulk_reentry_due(0, 12.5, true));
        assert!(!s.bulk_reentry_due(15_000, 12.5, true));
        // Recovery above the threshold resets the window
        assert!(!s.bulk_reentry_due(20_000, 12.7, true));
        assert!(!s.bulk_reentry_due(25_000, 12.5, true));
        assert!(!s.bulk_reentry_due(40_000, 12.5, true));
        assert!(s.bulk_reentry_due(55_000, 12.5, true));
    }

    #[test]
    fn error_recovery_needs_two_second_window_and_lvd() {
        let mut s = SafetySupervisor::new();
        assert!(!s.error_cleared(0, 13.8, 25.0));
        assert!(!s.error_cleared(1_000, 13.8, 25.0));
        assert!(s.error_cleared(2_000, 13.8, 25.0));

        // Below LVD never recovers
        let mut s = SafetySupervisor::new();
        assert!(!s.error_cleared(0, 11.5, 25.0));
        assert!(!s.error_cleared(5_000, 11.5, 25.0));
    }
}
