//! Simulation hardware and a manually-advanced clock for tests.
//!
//! Every mock hands out cloneable handles backed by shared state so tests
//! can steer signals while the controller owns the other end.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use charger_traits::{
    AnalogInput, Clock, HwResult, KvStore, LoadSwitch, PowerMonitor, PwmChannel, StatusLed,
    SupervisorLink, Watchdog,
};

use crate::signals::{SHUNT_SCALE, thermistor_counts};

/// Deterministic clock; `sleep` advances simulated time instead of blocking.
#[derive(Debug, Clone)]
pub struct SimClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
        self.origin + off
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

#[derive(Debug)]
struct PowerState {
    current_ma: f32,
    voltage: f32,
    reachable: bool,
}

/// Settable current/voltage source standing in for an INA219.
#[derive(Debug, Clone)]
pub struct SimPowerMonitor {
    state: Arc<Mutex<PowerState>>,
}

impl SimPowerMonitor {
    pub fn new(current_ma: f32, voltage: f32) -> Self {
        Self {
            state: Arc::new(Mutex::new(PowerState {
                current_ma,
                voltage,
                reachable: true,
            })),
        }
    }

    pub fn unreachable() -> Self {
        let m = Self::new(0.0, 0.0);
        m.set_reachable(false);
        m
    }

    pub fn set_current_ma(&self, ma: f32) {
        if let Ok(mut s) = self.state.lock() {
            s.current_ma = ma;
        }
    }

    pub fn set_voltage(&self, volts: f32) {
        if let Ok(mut s) = self.state.lock() {
            s.voltage = volts;
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        if let Ok(mut s) = self.state.lock() {
            s.reachable = reachable;
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&PowerState) -> T) -> HwResult<T> {
        let s = self
            .state
            .lock()
            .map_err(|_| Box::<dyn std::error::Error + Send + Sync>::from("poisoned"))?;
        if !s.reachable {
            return Err("sensor offline".into());
        }
        Ok(f(&s))
    }
}

impl PowerMonitor for SimPowerMonitor {
    fn probe(&mut self) -> HwResult<()> {
        self.with_state(|_| ())
    }

    fn shunt_current_raw(&mut self) -> HwResult<f32> {
        self.with_state(|s| s.current_ma / SHUNT_SCALE)
    }

    fn bus_voltage(&mut self) -> HwResult<f32> {
        self.with_state(|s| s.voltage)
    }
}

/// NTC stand-in: tests set a temperature, the controller reads synthetic
/// ADC counts.
#[derive(Debug, Clone)]
pub struct SimThermistor {
    counts: Arc<Mutex<f32>>,
}

impl Default for SimThermistor {
    fn default() -> Self {
        Self::at_celsius(25.0)
    }
}

impl SimThermistor {
    pub fn at_celsius(celsius: f32) -> Self {
        Self {
            counts: Arc::new(Mutex::new(thermistor_counts(celsius))),
        }
    }

    pub fn set_celsius(&self, celsius: f32) {
        if let Ok(mut c) = self.counts.lock() {
            *c = thermistor_counts(celsius);
        }
    }
}

impl AnalogInput for SimThermistor {
    fn read_counts(&mut self) -> HwResult<u16> {
        let c = self
            .counts
            .lock()
            .map_err(|_| Box::<dyn std::error::Error + Send + Sync>::from("poisoned"))?;
        Ok(c.round().clamp(0.0, 4095.0) as u16)
    }
}

/// Records the raw (inverted) register writes.
#[derive(Debug, Clone, Default)]
pub struct SimPwm {
    last_raw: Arc<Mutex<Option<u8>>>,
}

impl SimPwm {
    pub fn last_raw(&self) -> Option<u8> {
        self.last_raw.lock().ok().and_then(|g| *g)
    }
}

impl PwmChannel for SimPwm {
    fn write_raw(&mut self, value: u8) -> HwResult<()> {
        if let Ok(mut g) = self.last_raw.lock() {
            *g = Some(value);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimLoadSwitch {
    on: Arc<AtomicBool>,
}

impl SimLoadSwitch {
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }
}

impl LoadSwitch for SimLoadSwitch {
    fn set_enabled(&mut self, on: bool) -> HwResult<()> {
        self.on.store(on, Ordering::Relaxed);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimLed {
    on: Arc<AtomicBool>,
}

impl SimLed {
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }
}

impl StatusLed for SimLed {
    fn set(&mut self, on: bool) {
        self.on.store(on, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum KvValue {
    F32(f32),
    Bool(bool),
    U64(u64),
}

/// In-memory `KvStore`.
#[derive(Debug, Clone, Default)]
pub struct SimKv {
    map: Arc<Mutex<HashMap<String, KvValue>>>,
}

impl KvStore for SimKv {
    fn get_f32(&self, key: &str) -> Option<f32> {
        match self.map.lock().ok()?.get(key)? {
            KvValue::F32(v) => Some(*v),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.map.lock().ok()?.get(key)? {
            KvValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        match self.map.lock().ok()?.get(key)? {
            KvValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    fn put_f32(&mut self, key: &str, value: f32) -> HwResult<()> {
        if let Ok(mut m) = self.map.lock() {
            m.insert(key.to_string(), KvValue::F32(value));
        }
        Ok(())
    }

    fn put_bool(&mut self, key: &str, value: bool) -> HwResult<()> {
        if let Ok(mut m) = self.map.lock() {
            m.insert(key.to_string(), KvValue::Bool(value));
        }
        Ok(())
    }

    fn put_u64(&mut self, key: &str, value: u64) -> HwResult<()> {
        if let Ok(mut m) = self.map.lock() {
            m.insert(key.to_string(), KvValue::U64(value));
        }
        Ok(())
    }

    fn flush(&mut self) -> HwResult<()> {
        Ok(())
    }
}

/// Loopback supervisor link: tests queue inbound lines and collect written
/// responses.
#[derive(Debug, Clone, Default)]
pub struct SimLink {
    inbound: Arc<Mutex<VecDeque<u8>>>,
    written: Arc<Mutex<Vec<String>>>,
}

impl SimLink {
    pub fn push_line(&self, line: &str) {
        if let Ok(mut q) = self.inbound.lock() {
            q.extend(line.as_bytes());
            q.push_back(b'\n');
        }
    }

    pub fn take_writes(&self) -> Vec<String> {
        self.written
            .lock()
            .map(|mut g| std::mem::take(&mut *g))
            .unwrap_or_default()
    }
}

impl SupervisorLink for SimLink {
    fn read_byte(&mut self) -> HwResult<Option<u8>> {
        Ok(self.inbound.lock().ok().and_then(|mut q| q.pop_front()))
    }

    fn write_line(&mut self, line: &str) -> HwResult<()> {
        if let Ok(mut g) = self.written.lock() {
            g.push(line.to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn feed(&mut self) {}
}
