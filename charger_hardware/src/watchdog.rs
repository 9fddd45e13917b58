//! Watchdog feeders.

use std::fs::{File, OpenOptions};
use std::io::Write;

use charger_traits::Watchdog;
use tracing::warn;

use crate::error::Result;

/// Feeds a kernel watchdog device (e.g. /dev/watchdog). If the device
/// stops being fed the hardware resets the board, which is the intended
/// response to a wedged loop iteration.
pub struct FileWatchdog {
    file: File,
}

impl FileWatchdog {
    pub fn open(device: &str) -> Result<Self> {
        let file = OpenOptions::new().write(true).open(device)?;
        Ok(Self { file })
    }
}

impl Watchdog for FileWatchdog {
    fn feed(&mut self) {
        if let Err(e) = self.file.write_all(b"k").and_then(|()| self.file.flush()) {
            warn!(error = %e, "watchdog feed failed");
        }
    }
}

/// Placeholder when no watchdog device is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledWatchdog;

impl Watchdog for DisabledWatchdog {
    fn feed(&mut self) {}
}
