#![no_main]
use libfuzzer_sys::fuzz_target;

use charger_core::protocol::{LineBuffer, parse_line};

fuzz_target!(|data: &[u8]| {
    // Arbitrary link bytes must frame without panicking, and every framed
    // line must either parse or be rejected gracefully.
    let mut buffer = LineBuffer::default();
    for &byte in data {
        if let Some(line) = buffer.push(byte) {
            let _ = parse_line(&line);
        }
    }
    // The same bytes as one lossy line through the parser directly.
    let text = String::from_utf8_lossy(data);
    let _ = parse_line(&text);
});
