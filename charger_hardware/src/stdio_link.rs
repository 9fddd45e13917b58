//! Stdin/stdout supervisor link for bench and simulation runs.
//!
//! Stdin has no portable non-blocking read, so a reader thread feeds a
//! bounded channel and the control loop polls it.

use std::io::{BufRead, Write};
use std::thread;

use charger_traits::{HwResult, SupervisorLink};
use crossbeam_channel as xch;
use tracing::debug;

pub struct StdioLink {
    rx: xch::Receiver<u8>,
}

impl Default for StdioLink {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioLink {
    pub fn new() -> Self {
        let (tx, rx) = xch::bounded(4096);
        thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut locked = stdin.lock();
            let mut line = String::new();
            loop {
                line.clear();
                match locked.read_line(&mut line) {
                    Ok(0) => {
                        debug!("stdin closed; link reader exiting");
                        break;
                    }
                    Ok(_) => {
                        for b in line.bytes() {
                            if tx.send(b).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "stdin read failed; link reader exiting");
                        break;
                    }
                }
            }
        });
        Self { rx }
    }
}

impl SupervisorLink for StdioLink {
    fn read_byte(&mut self) -> HwResult<Option<u8>> {
        Ok(self.rx.try_recv().ok())
    }

    fn write_line(&mut self, line: &str) -> HwResult<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
        Ok(())
    }
}
