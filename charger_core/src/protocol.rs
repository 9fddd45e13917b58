//! Supervisor-link command protocol: line framing, parsing, and dispatch.

use charger_traits::{AnalogInput, LoadSwitch, PowerMonitor, PwmChannel};

use crate::controller::Controller;

/// Lines longer than this are discarded wholesale (overflow guard).
pub const MAX_LINE_BYTES: usize = 200;

/// Accumulates link bytes into newline-terminated commands. Oversized input
/// is dropped up to and including its terminator.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    overflowed: bool,
}

impl LineBuffer {
    /// Feed one byte; returns a complete line (without terminator, CR
    /// stripped) when one is available.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if byte == b'\n' {
            if self.overflowed {
                self.overflowed = false;
                self.buf.clear();
                return None;
            }
            let line = String::from_utf8_lossy(&self.buf)
                .trim_end_matches('\r')
                .to_string();
            self.buf.clear();
            return Some(line);
        }
        if self.overflowed {
            return None;
        }
        if self.buf.len() >= MAX_LINE_BYTES {
            self.overflowed = true;
            self.buf.clear();
            return None;
        }
        self.buf.push(byte);
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetData,
    Set { param: String, value: String },
    ToggleLoad { seconds: u64 },
    CancelTempOff,
}

/// Parse one framed line. Errors carry the reason for `ERROR:` framing;
/// parsing never mutates state.
pub fn parse_line(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix("CMD:") else {
        return Err(String::from("Expected CMD: prefix"));
    };
    if rest == "GET_DATA" {
        return Ok(Command::GetData);
    }
    if rest == "CANCEL_TEMP_OFF" {
        return Ok(Command::CancelTempOff);
    }
    if let Some(assignment) = rest.strip_prefix("SET_") {
        let Some((param, value)) = assignment.split_once(':') else {
            return Err(String::from("Malformed SET command"));
        };
        if param.is_empty() || value.is_empty() {
            return Err(String::from("Malformed SET command"));
        }
        return Ok(Command::Set {
            param: param.to_string(),
            value: value.to_string(),
        });
    }
    if let Some(arg) = rest.strip_prefix("TOGGLE_LOAD:") {
        let seconds = arg
            .trim()
            .parse::<u64>()
            .map_err(|_| String::from("Invalid seconds for TOGGLE_LOAD"))?;
        return Ok(Command::ToggleLoad { seconds });
    }
    Err(format!("Unknown command {rest}"))
}

/// Outcome of a dispatched line: the response to write back, plus the
/// persistence key to store immediately when a `SET_` was accepted.
pub struct Dispatched {
    pub response: String,
    pub persist_key: Option<&'static str>,
}

/// Apply one line against the shared state. Runs between ticks; every
/// mutation is visible to the next tick.
pub fn dispatch<B, P, A, W, L>(
    controller: &mut Controller<B, P, A, W, L>,
    line: &str,
    now_ms: u64,
) -> Dispatched
where
    B: PowerMonitor,
    P: PowerMonitor,
    A: AnalogInput,
    W: PwmChannel,
    L: LoadSwitch,
{
    let (response, persist_key) = match parse_line(line) {
        Err(reason) => (format!("ERROR:{reason}"), None),
        Ok(Command::GetData) => (
            format!("DATA:{}", controller.snapshot(now_ms).to_json()),
            None,
        ),
        Ok(Command::Set { param, value }) => match controller.set_param(&param, &value) {
            Ok(key) => (format!("OK:{param} set to {value}"), key),
            Err(reason) => (format!("ERROR:{reason}"), None),
        },
        Ok(Command::ToggleLoad { seconds }) => match controller.toggle_load(now_ms, seconds) {
            Ok(clamped) => (format!("OK:Load off for {clamped} seconds"), None),
            Err(e) => (format!("ERROR:{e}"), None),
        },
        Ok(Command::CancelTempOff) => match controller.cancel_temp_off() {
            Ok(()) => (String::from("OK:Temporary load-off cancelled"), None),
            Err(e) => (format!("ERROR:{e}"), None),
        },
    };
    Dispatched {
        response,
        persist_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_lines_and_strips_cr() {
        let mut b = LineBuffer::default();
        let mut out = None;
        for byte in b"CMD:GET_DATA\r\n" {
            out = b.push(*byte).or(out);
        }
        assert_eq!(out.as_deref(), Some("CMD:GET_DATA"));
    }

    #[test]
    fn discards_oversized_lines() {
        let mut b = LineBuffer::default();
        for _ in 0..300 {
            assert!(b.push(b'x').is_none());
        }
        // Terminator of the oversized line yields nothing
        assert!(b.push(b'\n').is_none());
        // The buffer is usable again afterwards
        let mut out = None;
        for byte in b"CMD:CANCEL_TEMP_OFF\n" {
            out = b.push(*byte).or(out);
        }
        assert_eq!(out.as_deref(), Some("CMD:CANCEL_TEMP_OFF"));
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_line("CMD:GET_DATA"), Ok(Command::GetData));
        assert_eq!(parse_line("CMD:CANCEL_TEMP_OFF"), Ok(Command::CancelTempOff));
        assert_eq!(
            parse_line("CMD:SET_bulkVoltage:14.2"),
            Ok(Command::Set {
                param: String::from("bulkVoltage"),
                value: String::from("14.2"),
            })
        );
        assert_eq!(
            parse_line("CMD:TOGGLE_LOAD:60"),
            Ok(Command::ToggleLoad { seconds: 60 })
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_line("GET_DATA").is_err());
        assert!(parse_line("CMD:SET_:1").is_err());
        assert!(parse_line("CMD:SET_bulkVoltage").is_err());
        assert!(parse_line("CMD:TOGGLE_LOAD:-5").is_err());
        assert!(parse_line("CMD:TOGGLE_LOAD:abc").is_err());
        assert!(parse_line("CMD:REBOOT").is_err());
    }
}
