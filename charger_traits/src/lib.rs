pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Result alias shared by all hardware-facing traits.
pub type HwResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// High-side current/voltage sensor (one per rail: panel and battery).
pub trait PowerMonitor {
    /// Cheap reachability check (bus handshake). Used at boot and for the
    /// periodic panel-sensor recheck.
    fn probe(&mut self) -> HwResult<()>;
    /// One raw shunt current sample in mA, before shunt-convention scaling.
    fn shunt_current_raw(&mut self) -> HwResult<f32>;
    /// Instantaneous bus voltage in volts.
    fn bus_voltage(&mut self) -> HwResult<f32>;
}

/// ADC channel delivering raw counts (NTC thermistor divider).
pub trait AnalogInput {
    fn read_counts(&mut self) -> HwResult<u16>;
}

/// 8-bit PWM gate channel. The value written here is the already-inverted
/// register value; inversion happens in the regulator, not the driver.
pub trait PwmChannel {
    fn write_raw(&mut self, value: u8) -> HwResult<()>;
}

/// Load-disconnect switch (active-high enables the downstream load).
pub trait LoadSwitch {
    fn set_enabled(&mut self, on: bool) -> HwResult<()>;
    fn is_enabled(&self) -> bool;
}

/// Indicator LED (solar activity, error blink).
pub trait StatusLed {
    fn set(&mut self, on: bool);
}

/// Hardware watchdog; fed once per loop iteration.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Line-oriented supervisor link (serial in production, stdio/loopback in
/// simulation). Reads must never block the control loop.
pub trait SupervisorLink {
    /// Next pending byte, or `None` when the link is idle.
    fn read_byte(&mut self) -> HwResult<Option<u8>>;
    /// Write one line; the implementation appends the terminator.
    fn write_line(&mut self, line: &str) -> HwResult<()>;
}

impl<T: Watchdog + ?Sized> Watchdog for Box<T> {
    fn feed(&mut self) {
        (**self).feed();
    }
}

impl<T: SupervisorLink + ?Sized> SupervisorLink for Box<T> {
    fn read_byte(&mut self) -> HwResult<Option<u8>> {
        (**self).read_byte()
    }

    fn write_line(&mut self, line: &str) -> HwResult<()> {
        (**self).write_line(line)
    }
}

/// Typed non-volatile key/value store (namespace `charger`).
pub trait KvStore {
    fn get_f32(&self, key: &str) -> Option<f32>;
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn get_u64(&self, key: &str) -> Option<u64>;
    fn put_f32(&mut self, key: &str, value: f32) -> HwResult<()>;
    fn put_bool(&mut self, key: &str, value: bool) -> HwResult<()>;
    fn put_u64(&mut self, key: &str, value: u64) -> HwResult<()>;
    /// Persist buffered writes to the backing medium.
    fn flush(&mut self) -> HwResult<()>;
}
