//! charger_hardware: hardware and simulation backends behind `charger_traits`.
//!
//! Features:
//! - `hardware`: enable Raspberry-Pi-class backends (rppal I²C INA219
//!   monitors, GPIO load switch and LEDs, hardware PWM, serialport
//!   supervisor link).
//! - (default) no `hardware` feature: simulation types that satisfy the
//!   traits, so CI on x86 builds without GPIO or libudev.
//!
//! The TOML-backed key/value store, the stdio link, and the watchdog
//! feeders are platform-neutral and always available.

pub mod error;
pub mod kv_file;
pub mod stdio_link;
pub mod watchdog;

pub use kv_file::FileKvStore;
pub use stdio_link::StdioLink;
pub use watchdog::{DisabledWatchdog, FileWatchdog};

#[cfg(feature = "hardware")]
mod ina219;
#[cfg(feature = "hardware")]
mod mcp3208;

#[cfg(not(feature = "hardware"))]
pub mod sim {
    use std::sync::{Arc, Mutex};

    use charger_traits::{
        AnalogInput, HwResult, LoadSwitch, PowerMonitor, PwmChannel, StatusLed,
    };

    // Mirror of the controller's NTC divider (10 kΩ series, β = 3984,
    // 12-bit ADC) so the rig can synthesize counts for a temperature.
    const SERIES_RESISTOR: f32 = 10_000.0;
    const NOMINAL_RESISTANCE: f32 = 10_000.0;
    const NOMINAL_TEMPERATURE_C: f32 = 25.0;
    const BETA: f32 = 3984.0;
    const ADC_RESOLUTION: f32 = 4095.0;
    const KELVIN_OFFSET: f32 = 273.15;

    #[derive(Debug)]
    struct RigState {
        battery_volts: f32,
        insolation_ma: f32,
        load_ma: f32,
        temperature_c: f32,
        duty_raw: u8,
        load_on: bool,
    }

    /// A first-order charging rig: panel current follows the commanded
    /// duty, and the battery voltage drifts with the net current a little
    /// on every read. Good enough to watch the stage machine walk through
    /// bulk → absorption → float in a demo run.
    #[derive(Clone)]
    pub struct SimulatedRig {
        state: Arc<Mutex<RigState>>,
    }

    impl Default for SimulatedRig {
        fn default() -> Self {
            Self::new(12.3, 2000.0, 300.0, 25.0)
        }
    }

    impl SimulatedRig {
        pub fn new(battery_volts: f32, insolation_ma: f32, load_ma: f32, temperature_c: f32) -> Self {
            Self {
                state: Arc::new(Mutex::new(RigState {
                    battery_volts,
                    insolation_ma,
                    load_ma,
                    temperature_c,
                    duty_raw: 255, // inverted register: 255 = gate closed
                    load_on: false,
                })),
            }
        }

        /// Initial conditions from `CHARGER_SIM_*` environment variables
        /// (handy for CLI integration tests).
        pub fn from_env() -> Self {
            let get = |key: &str, default: f32| {
                std::env::var(key)
                    .ok()
                    .and_then(|v| v.parse::<f32>().ok())
                    .unwrap_or(default)
            };
            Self::new(
                get("CHARGER_SIM_BATTERY_V", 12.3),
                get("CHARGER_SIM_PANEL_MA", 2000.0),
                get("CHARGER_SIM_LOAD_MA", 300.0),
                get("CHARGER_SIM_TEMP_C", 25.0),
            )
        }

        pub fn panel_monitor(&self) -> RigPanelMonitor {
            RigPanelMonitor { rig: self.clone() }
        }

        pub fn battery_monitor(&self) -> RigBatteryMonitor {
            RigBatteryMonitor { rig: self.clone() }
        }

        pub fn thermistor(&self) -> RigThermistor {
            RigThermistor { rig: self.clone() }
        }

        pub fn pwm(&self) -> RigPwm {
            RigPwm { rig: self.clone() }
        }

        pub fn load_switch(&self) -> RigLoadSwitch {
            RigLoadSwitch { rig: self.clone() }
        }

        pub fn led(&self) -> RigLed {
            RigLed
        }

        fn panel_ma(&self) -> f32 {
            let s = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let duty = f32::from(255 - s.duty_raw) / 255.0;
            s.insolation_ma * duty
        }

        fn drift(&self) {
            let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let duty = f32::from(255 - s.duty_raw) / 255.0;
            let charge_ma = s.insolation_ma * duty;
            let drain_ma = if s.load_on { s.load_ma } else { 0.0 };
            let net_a = (charge_ma - drain_ma) / 1000.0;
            s.battery_volts = (s.battery_volts + net_a * 5e-4).clamp(11.0, 15.5);
        }
    }

    #[derive(Clone)]
    pub struct RigPanelMonitor {
        rig: SimulatedRig,
    }

    impl PowerMonitor for RigPanelMonitor {
        fn probe(&mut self) -> HwResult<()> {
            Ok(())
        }

        fn shunt_current_raw(&mut self) -> HwResult<f32> {
            // The controller applies the 10 mΩ shunt scaling itself.
            Ok(self.rig.panel_ma() / 10.0)
        }

        fn bus_voltage(&mut self) -> HwResult<f32> {
            let s = self.rig.state.lock().unwrap_or_else(|e| e.into_inner());
            Ok(if s.insolation_ma > 0.0 { 18.0 } else { 0.0 })
        }
    }

    #[derive(Clone)]
    pub struct RigBatteryMonitor {
        rig: SimulatedRig,
    }

    impl PowerMonitor for RigBatteryMonitor {
        fn probe(&mut self) -> HwResult<()> {
            Ok(())
        }

        fn shunt_current_raw(&mut self) -> HwResult<f32> {
            let s = self.rig.state.lock().unwrap_or_else(|e| e.into_inner());
            let drain = if s.load_on { s.load_ma } else { 0.0 };
            Ok(drain / 10.0)
        }

        fn bus_voltage(&mut self) -> HwResult<f32> {
            self.rig.drift();
            let s = self.rig.state.lock().unwrap_or_else(|e| e.into_inner());
            Ok(s.battery_volts)
        }
    }

    #[derive(Clone)]
    pub struct RigThermistor {
        rig: SimulatedRig,
    }

    impl AnalogInput for RigThermistor {
        fn read_counts(&mut self) -> HwResult<u16> {
            let celsius = {
                let s = self.rig.state.lock().unwrap_or_else(|e| e.into_inner());
                s.temperature_c
            };
            let t_kelvin = celsius + KELVIN_OFFSET;
            let nominal_kelvin = NOMINAL_TEMPERATURE_C + KELVIN_OFFSET;
            let resistance =
                NOMINAL_RESISTANCE * (BETA * (1.0 / t_kelvin - 1.0 / nominal_kelvin)).exp();
            let counts = ADC_RESOLUTION / (SERIES_RESISTOR / resistance + 1.0);
            Ok(counts.round().clamp(0.0, 4095.0) as u16)
        }
    }

    #[derive(Clone)]
    pub struct RigPwm {
        rig: SimulatedRig,
    }

    impl PwmChannel for RigPwm {
        fn write_raw(&mut self, value: u8) -> HwResult<()> {
            let mut s = self.rig.state.lock().unwrap_or_else(|e| e.into_inner());
            s.duty_raw = value;
            Ok(())
        }
    }

    #[derive(Clone)]
    pub struct RigLoadSwitch {
        rig: SimulatedRig,
    }

    impl LoadSwitch for RigLoadSwitch {
        fn set_enabled(&mut self, on: bool) -> HwResult<()> {
            let mut s = self.rig.state.lock().unwrap_or_else(|e| e.into_inner());
            s.load_on = on;
            Ok(())
        }

        fn is_enabled(&self) -> bool {
            let s = self.rig.state.lock().unwrap_or_else(|e| e.into_inner());
            s.load_on
        }
    }

    #[derive(Clone, Default)]
    pub struct RigLed;

    impl StatusLed for RigLed {
        fn set(&mut self, _on: bool) {}
    }
}

#[cfg(feature = "hardware")]
pub mod hardware {
    use charger_traits::{HwResult, LoadSwitch, PowerMonitor, PwmChannel, StatusLed, SupervisorLink};
    use rppal::gpio::{Gpio, OutputPin};
    use rppal::pwm::{Channel, Polarity, Pwm};
    use std::io::{Read, Write};
    use std::time::Duration;
    use tracing::info;

    use crate::error::{HwError, Result};
    use crate::ina219::Ina219;

    pub use crate::mcp3208::Mcp3208;

    /// Gate PWM frequency. The 8-bit register value maps onto this
    /// carrier; the driver stage inverts.
    const PWM_FREQUENCY_HZ: f64 = 40_000.0;

    /// INA219-backed power monitor.
    pub struct InaPowerMonitor {
        ina: Ina219,
    }

    impl InaPowerMonitor {
        pub fn try_new(bus: u8, addr: u8) -> Result<Self> {
            Ok(Self {
                ina: Ina219::new(bus, addr)?,
            })
        }
    }

    impl PowerMonitor for InaPowerMonitor {
        fn probe(&mut self) -> HwResult<()> {
            self.ina.probe().map_err(boxed)
        }

        fn shunt_current_raw(&mut self) -> HwResult<f32> {
            self.ina.current_ma().map_err(boxed)
        }

        fn bus_voltage(&mut self) -> HwResult<f32> {
            self.ina.bus_voltage_v().map_err(boxed)
        }
    }

    /// Active-high load disconnect on a GPIO pin.
    pub struct GpioLoadSwitch {
        pin: OutputPin,
        enabled: bool,
    }

    impl GpioLoadSwitch {
        pub fn try_new(pin: u8) -> Result<Self> {
            let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
            let pin = gpio
                .get(pin)
                .map_err(|e| HwError::Gpio(e.to_string()))?
                .into_output_low();
            Ok(Self {
                pin,
                enabled: false,
            })
        }
    }

    impl LoadSwitch for GpioLoadSwitch {
        fn set_enabled(&mut self, on: bool) -> HwResult<()> {
            if on {
                self.pin.set_high();
            } else {
                self.pin.set_low();
            }
            self.enabled = on;
            Ok(())
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }
    }

    impl Drop for GpioLoadSwitch {
        fn drop(&mut self) {
            // Leave the load disconnected on teardown.
            self.pin.set_low();
        }
    }

    pub struct GpioLed {
        pin: OutputPin,
    }

    impl GpioLed {
        pub fn try_new(pin: u8) -> Result<Self> {
            let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
            let pin = gpio
                .get(pin)
                .map_err(|e| HwError::Gpio(e.to_string()))?
                .into_output_low();
            Ok(Self { pin })
        }
    }

    impl StatusLed for GpioLed {
        fn set(&mut self, on: bool) {
            if on {
                self.pin.set_high();
            } else {
                self.pin.set_low();
            }
        }
    }

    /// Hardware PWM gate channel. The raw register value maps straight to
    /// the pin duty; the inverting gate driver restores the logical sense.
    pub struct HardwarePwm {
        pwm: Pwm,
    }

    impl HardwarePwm {
        pub fn try_new(channel: u8) -> Result<Self> {
            let channel = match channel {
                0 => Channel::Pwm0,
                _ => Channel::Pwm1,
            };
            let pwm = Pwm::with_frequency(channel, PWM_FREQUENCY_HZ, 1.0, Polarity::Normal, true)
                .map_err(|e| HwError::Gpio(e.to_string()))?;
            info!(frequency_hz = PWM_FREQUENCY_HZ, "gate PWM started");
            Ok(Self { pwm })
        }
    }

    impl PwmChannel for HardwarePwm {
        fn write_raw(&mut self, value: u8) -> HwResult<()> {
            self.pwm
                .set_duty_cycle(f64::from(value) / 255.0)
                .map_err(|e| boxed(HwError::Gpio(e.to_string())))
        }
    }

    /// 9600-8N1 serial supervisor link. Reads use a short timeout so the
    /// control loop never blocks on an idle peer.
    pub struct SerialLink {
        port: Box<dyn serialport::SerialPort>,
    }

    impl SerialLink {
        pub fn open(device: &str, baud: u32) -> Result<Self> {
            let port = serialport::new(device, baud)
                .timeout(Duration::from_millis(1))
                .open()
                .map_err(|e| HwError::Serial(e.to_string()))?;
            Ok(Self { port })
        }
    }

    impl SupervisorLink for SerialLink {
        fn read_byte(&mut self) -> HwResult<Option<u8>> {
            let mut buf = [0u8; 1];
            match self.port.read(&mut buf) {
                Ok(1) => Ok(Some(buf[0])),
                Ok(_) => Ok(None),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
                Err(e) => Err(boxed(HwError::Io(e))),
            }
        }

        fn write_line(&mut self, line: &str) -> HwResult<()> {
            self.port
                .write_all(line.as_bytes())
                .and_then(|()| self.port.write_all(b"\n"))
                .map_err(|e| boxed(HwError::Io(e)))
        }
    }

    fn boxed(e: HwError) -> Box<dyn std::error::Error + Send + Sync> {
        Box::new(e)
    }
}

#[cfg(not(feature = "hardware"))]
pub use sim::SimulatedRig;
