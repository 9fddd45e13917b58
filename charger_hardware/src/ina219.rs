//! Minimal INA219 high-side monitor driver over rppal I²C.
//!
//! Configured for the 32 V / ±2 A range: current LSB 0.1 mA, calibration
//! 4096, shunt ADC in 12-bit continuous mode.

use rppal::i2c::I2c;
use tracing::trace;

use crate::error::{HwError, Result};

const REG_CONFIG: u8 = 0x00;
const REG_BUS_VOLTAGE: u8 = 0x02;
const REG_CURRENT: u8 = 0x04;
const REG_CALIBRATION: u8 = 0x05;

/// 32 V range, gain /8, 12-bit ADCs, shunt+bus continuous.
const CONFIG_32V_2A: u16 = 0x399F;
const CALIBRATION_32V_2A: u16 = 4096;
/// Current register LSB with the calibration above.
const CURRENT_LSB_MA: f32 = 0.1;
/// Bus voltage register LSB (register is left-shifted by 3).
const BUS_LSB_V: f32 = 0.004;

pub struct Ina219 {
    i2c: I2c,
}

impl Ina219 {
    pub fn new(bus: u8, addr: u8) -> Result<Self> {
        let mut i2c = I2c::with_bus(bus).map_err(|e| HwError::I2c(e.to_string()))?;
        i2c.set_slave_address(u16::from(addr))
            .map_err(|e| HwError::I2c(e.to_string()))?;
        let mut ina = Self { i2c };
        ina.write_reg(REG_CALIBRATION, CALIBRATION_32V_2A)?;
        ina.write_reg(REG_CONFIG, CONFIG_32V_2A)?;
        Ok(ina)
    }

    /// Reachability handshake: the config register must read back as
    /// programmed.
    pub fn probe(&mut self) -> Result<()> {
        let cfg = self.read_reg(REG_CONFIG)?;
        if cfg == CONFIG_32V_2A {
            Ok(())
        } else {
            Err(HwError::I2c(format!("unexpected config readback {cfg:#06x}")))
        }
    }

    /// Signed current in mA (before any shunt-convention scaling).
    pub fn current_ma(&mut self) -> Result<f32> {
        let raw = self.read_reg(REG_CURRENT)? as i16;
        let ma = f32::from(raw) * CURRENT_LSB_MA;
        trace!(raw, ma, "ina219 current");
        Ok(ma)
    }

    pub fn bus_voltage_v(&mut self) -> Result<f32> {
        let raw = self.read_reg(REG_BUS_VOLTAGE)?;
        Ok(f32::from(raw >> 3) * BUS_LSB_V)
    }

    fn write_reg(&mut self, reg: u8, value: u16) -> Result<()> {
        let [hi, lo] = value.to_be_bytes();
        self.i2c
            .write(&[reg, hi, lo])
            .map_err(|e| HwError::I2c(e.to_string()))?;
        Ok(())
    }

    fn read_reg(&mut self, reg: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(&[reg], &mut buf)
            .map_err(|e| HwError::I2c(e.to_string()))?;
        Ok(u16::from_be_bytes(buf))
    }
}
