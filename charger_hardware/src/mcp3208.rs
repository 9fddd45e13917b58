//! MCP3208 12-bit SPI ADC (NTC thermistor channel).

use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use crate::error::{HwError, Result};

const SPI_CLOCK_HZ: u32 = 1_000_000;

pub struct Mcp3208 {
    spi: Spi,
    channel: u8,
}

impl Mcp3208 {
    pub fn try_new(channel: u8) -> Result<Self> {
        if channel > 7 {
            return Err(HwError::Gpio(format!("mcp3208 channel out of range: {channel}")));
        }
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)
            .map_err(|e| HwError::Gpio(e.to_string()))?;
        Ok(Self { spi, channel })
    }

    /// Single-ended conversion: start bit, SGL, 3 channel bits, then 12
    /// result bits straddling the last two response bytes.
    pub fn read(&mut self) -> Result<u16> {
        let tx = [0x06 | (self.channel >> 2), (self.channel & 0x03) << 6, 0x00];
        let mut rx = [0u8; 3];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|e| HwError::Gpio(e.to_string()))?;
        Ok((u16::from(rx[1] & 0x0F) << 8) | u16::from(rx[2]))
    }
}

impl charger_traits::AnalogInput for Mcp3208 {
    fn read_counts(&mut self) -> charger_traits::HwResult<u16> {
        self.read()
            .map_err(|e| Box::<dyn std::error::Error + Send + Sync>::from(e.to_string()))
    }
}
