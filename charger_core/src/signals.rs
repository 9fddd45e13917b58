//! Averaged, validity-filtered sensor reads.

use charger_traits::{AnalogInput, PowerMonitor};

/// Samples taken per averaged read.
pub const SAMPLES_PER_READ: usize = 20;
/// 10 mΩ shunt convention: raw sensor counts are one tenth of the real mA.
pub const SHUNT_SCALE: f32 = 10.0;

// NTC divider (10 kΩ series, 10 kΩ @ 25 °C thermistor, 12-bit ADC).
const SERIES_RESISTOR: f32 = 10_000.0;
const NOMINAL_RESISTANCE: f32 = 10_000.0;
const NOMINAL_TEMPERATURE_C: f32 = 25.0;
const BETA: f32 = 3984.0;
const ADC_RESOLUTION: f32 = 4095.0;
const KELVIN_OFFSET: f32 = 273.15;

/// One tick's worth of sampled signals. Recreated every tick; read-only
/// downstream of the sampler.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Signals {
    pub panel_current_ma: f32,
    pub load_current_ma: f32,
    pub panel_voltage: f32,
    pub battery_voltage: f32,
    pub battery_temperature_c: f32,
}

impl Signals {
    pub fn net_current_ma(&self) -> f32 {
        self.panel_current_ma - self.load_current_ma
    }
}

/// Average of [`SAMPLES_PER_READ`] shunt samples. Samples outside
/// [0, max_allowed_ma] (after shunt scaling) are rejected; zero valid
/// samples yield 0.
pub fn read_average_current<M: PowerMonitor + ?Sized>(monitor: &mut M, max_allowed_ma: f32) -> f32 {
    let mut sum = 0.0f32;
    let mut valid = 0u32;
    for _ in 0..SAMPLES_PER_READ {
        let Ok(raw) = monitor.shunt_current_raw() else {
            continue;
        };
        let ma = raw * SHUNT_SCALE;
        if !ma.is_finite() || ma < 0.0 || ma > max_allowed_ma {
            continue;
        }
        sum += ma;
        valid += 1;
    }
    if valid == 0 { 0.0 } else { sum / valid as f32 }
}

/// Bus voltage with NaN/∞ (and negative glitches) sanitized to 0.
pub fn read_voltage<M: PowerMonitor + ?Sized>(monitor: &mut M) -> f32 {
    match monitor.bus_voltage() {
        Ok(v) if v.is_finite() && v >= 0.0 => v,
        _ => 0.0,
    }
}

/// Averaged thermistor read: 20-sample ADC mean, divider arithmetic, then
/// the beta-parameter Steinhart–Hart form. NaN sanitizes to 0.
pub fn read_temperature<A: AnalogInput + ?Sized>(adc: &mut A) -> f32 {
    let mut sum = 0.0f32;
    let mut valid = 0u32;
    for _ in 0..SAMPLES_PER_READ {
        if let Ok(counts) = adc.read_counts() {
            sum += f32::from(counts);
            valid += 1;
        }
    }
    if valid == 0 {
        return 0.0;
    }
    thermistor_celsius(sum / valid as f32)
}

/// Convert an averaged ADC reading into °C.
pub fn thermistor_celsius(avg_counts: f32) -> f32 {
    if !(avg_counts > 0.0) || avg_counts >= ADC_RESOLUTION {
        return 0.0;
    }
    let resistance = SERIES_RESISTOR / (ADC_RESOLUTION / avg_counts - 1.0);
    let inv_t = (resistance / NOMINAL_RESISTANCE).ln() / BETA
        + 1.0 / (NOMINAL_TEMPERATURE_C + KELVIN_OFFSET);
    let celsius = 1.0 / inv_t - KELVIN_OFFSET;
    if celsius.is_finite() { celsius } else { 0.0 }
}

/// Inverse of [`thermistor_celsius`]; used by the simulation backends to
/// synthesize ADC counts for a wanted temperature.
pub fn thermistor_counts(celsius: f32) -> f32 {
    let t_kelvin = celsius + KELVIN_OFFSET;
    let nominal_kelvin = NOMINAL_TEMPERATURE_C + KELVIN_OFFSET;
    let resistance = NOMINAL_RESISTANCE * (BETA * (1.0 / t_kelvin - 1.0 / nominal_kelvin)).exp();
    ADC_RESOLUTION / (SERIES_RESISTOR / resistance + 1.0)
}
