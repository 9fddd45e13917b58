//! Deployment configuration (TOML). Runtime-tunable charge parameters are
//! NOT here; they live in the persistence store and move over the command
//! protocol.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Link {
    /// Serial device of the supervisor link; empty selects the stdio link.
    pub device: String,
    pub baud: u32,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud: 9600,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Web {
    pub enabled: bool,
    pub bind: String,
}

impl Default for Web {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: String::from("0.0.0.0:8080"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Sensors {
    pub i2c_bus: u8,
    /// 7-bit I²C address of the panel-side monitor; the panel sensor is
    /// optional at runtime but its address must be configured.
    pub panel_addr: u8,
    pub battery_addr: u8,
    pub ntc_adc_channel: u8,
}

impl Default for Sensors {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            panel_addr: 0x40,
            battery_addr: 0x41,
            ntc_adc_channel: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Pins {
    pub load_control: u8,
    pub solar_led: u8,
    pub error_led: u8,
    pub pwm_channel: u8,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            load_control: 7,
            solar_led: 3,
            error_led: 4,
            pwm_channel: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Store {
    /// TOML file backing the `charger` key/value namespace.
    pub path: String,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            path: String::from("etc/charger_store.toml"),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct WatchdogCfg {
    /// Watchdog device path (e.g. /dev/watchdog); empty disables feeding.
    pub device: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,
    /// "error" | "warn" | "info" | "debug" | "trace"
    pub level: Option<String>,
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub link: Link,
    pub web: Web,
    pub sensors: Sensors,
    pub pins: Pins,
    pub store: Store,
    pub watchdog: WatchdogCfg,
    pub logging: Logging,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.link.baud == 0 {
            return Err(String::from("link.baud must be > 0"));
        }
        if self.web.enabled && self.web.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("web.bind is not a socket address: {}", self.web.bind));
        }
        for (name, addr) in [
            ("sensors.panel_addr", self.sensors.panel_addr),
            ("sensors.battery_addr", self.sensors.battery_addr),
        ] {
            if !(0x08..=0x77).contains(&addr) {
                return Err(format!("{name} out of 7-bit I2C range: {addr:#x}"));
            }
        }
        if self.sensors.panel_addr == self.sensors.battery_addr {
            return Err(String::from("panel and battery sensors share an address"));
        }
        if self.store.path.is_empty() {
            return Err(String::from("store.path must not be empty"));
        }
        Ok(())
    }
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}
