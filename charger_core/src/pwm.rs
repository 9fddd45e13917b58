//! Duty clamping and the inverted gate-driver write.

use charger_traits::PwmChannel;
use eyre::WrapErr;

use crate::error::{ChargerError, Result};

pub const DUTY_MAX: u8 = 255;

/// Owns the gate PWM channel. Duty is tracked in the logical 0..=255 range;
/// the register value written is `255 - duty` (the driver inverts).
pub struct PwmRegulator<W: PwmChannel> {
    channel: W,
    duty: u8,
}

impl<W: PwmChannel> PwmRegulator<W> {
    pub fn new(channel: W) -> Self {
        Self { channel, duty: 0 }
    }

    pub fn duty(&self) -> u8 {
        self.duty
    }

    /// Clamp to [0, 255] and apply.
    pub fn set_duty(&mut self, duty: i32) -> Result<()> {
        let clamped = duty.clamp(0, i32::from(DUTY_MAX)) as u8;
        self.duty = clamped;
        self.channel
            .write_raw(DUTY_MAX - clamped)
            .map_err(|e| eyre::Report::new(ChargerError::Hardware(e.to_string())))
            .wrap_err("pwm write")
    }

    /// Step the duty by `delta` and re-clamp.
    pub fn adjust(&mut self, delta: i32) -> Result<()> {
        self.set_duty(i32::from(self.duty) + delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingPwm(Arc<Mutex<Vec<u8>>>);
    impl PwmChannel for RecordingPwm {
        fn write_raw(&mut self, value: u8) -> charger_traits::HwResult<()> {
            self.0.lock().unwrap().push(value);
            Ok(())
        }
    }

    #[test]
    fn clamps_and_inverts() {
        let rec = RecordingPwm::default();
        let mut pwm = PwmRegulator::new(rec.clone());
        pwm.set_duty(300).unwrap();
        assert_eq!(pwm.duty(), 255);
        pwm.set_duty(-4).unwrap();
        assert_eq!(pwm.duty(), 0);
        pwm.set_duty(20).unwrap();
        assert_eq!(*rec.0.lock().unwrap(), vec![0, 255, 235]);
    }

    #[test]
    fn adjust_reclamps() {
        let rec = RecordingPwm::default();
        let mut pwm = PwmRegulator::new(rec);
        pwm.set_duty(250).unwrap();
        pwm.adjust(10).unwrap();
        assert_eq!(pwm.duty(), 255);
        pwm.adjust(-300).unwrap();
        assert_eq!(pwm.duty(), 0);
    }
}
