//! The JSON state snapshot served over the supervisor link and `/data`.

use serde::Serialize;

/// Field names are the wire contract; supervisor-side tooling matches them
/// verbatim.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Snapshot {
    #[serde(rename = "panelToBatteryCurrent")]
    pub panel_to_battery_current: f32,
    #[serde(rename = "batteryToLoadCurrent")]
    pub battery_to_load_current: f32,
    #[serde(rename = "voltagePanel")]
    pub voltage_panel: f32,
    #[serde(rename = "voltageBatterySensor2")]
    pub voltage_battery_sensor2: f32,
    #[serde(rename = "currentPWM")]
    pub current_pwm: u8,
    pub temperature: f32,
    #[serde(rename = "chargeState")]
    pub charge_state: &'static str,
    #[serde(rename = "bulkVoltage")]
    pub bulk_voltage: f32,
    #[serde(rename = "absorptionVoltage")]
    pub absorption_voltage: f32,
    #[serde(rename = "floatVoltage")]
    pub float_voltage: f32,
    #[serde(rename = "LVD")]
    pub lvd: f32,
    #[serde(rename = "LVR")]
    pub lvr: f32,
    #[serde(rename = "batteryCapacity")]
    pub battery_capacity: f32,
    #[serde(rename = "thresholdPercentage")]
    pub threshold_percentage: f32,
    #[serde(rename = "maxAllowedCurrent")]
    pub max_allowed_current: f32,
    #[serde(rename = "isLithium")]
    pub is_lithium: bool,
    #[serde(rename = "maxBatteryVoltageAllowed")]
    pub max_battery_voltage_allowed: f32,
    #[serde(rename = "absorptionCurrentThreshold_mA")]
    pub absorption_current_threshold_ma: f32,
    #[serde(rename = "currentLimitIntoFloatStage")]
    pub current_limit_into_float_stage: f32,
    #[serde(rename = "calculatedAbsorptionHours")]
    pub calculated_absorption_hours: f32,
    #[serde(rename = "accumulatedAh")]
    pub accumulated_ah: f32,
    #[serde(rename = "estimatedSOC")]
    pub estimated_soc: f32,
    #[serde(rename = "netCurrent")]
    pub net_current: f32,
    #[serde(rename = "factorDivider")]
    pub factor_divider: u8,
    #[serde(rename = "useFuenteDC")]
    pub use_fuente_dc: bool,
    #[serde(rename = "fuenteDC_Amps")]
    pub fuente_dc_amps: f32,
    #[serde(rename = "maxBulkHours")]
    pub max_bulk_hours: f32,
    #[serde(rename = "currentBulkHours")]
    pub current_bulk_hours: f32,
    #[serde(rename = "panelSensorAvailable")]
    pub panel_sensor_available: bool,
    #[serde(rename = "temporaryLoadOff")]
    pub temporary_load_off: bool,
    #[serde(rename = "loadOffRemainingSeconds")]
    pub load_off_remaining_seconds: u64,
    #[serde(rename = "loadOffDuration")]
    pub load_off_duration: u64,
    #[serde(rename = "loadOffMaxDuration")]
    pub load_off_max_duration: u64,
    #[serde(rename = "loadControlState")]
    pub load_control_state: &'static str,
    #[serde(rename = "notaPersonalizada")]
    pub nota_personalizada: String,
    pub connected: bool,
    pub firmware_version: &'static str,
    /// Seconds since boot; the one field expected to differ between
    /// otherwise-idle snapshots.
    pub uptime: u64,
}

impl Snapshot {
    /// Single-line JSON body, ready for `DATA:` framing or the HTTP reply.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}
