//! The cooperative super-loop.
//!
//! Per iteration: feed the watchdog, drain supervisor-link bytes, drain the
//! web mailbox, recheck panel reachability, update the coulomb counter,
//! flush persistence on its cadence, emit the idle heartbeat, and run the
//! 1 s tick when due. Commands accepted here are visible to the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use charger_traits::{
    AnalogInput, KvStore, LoadSwitch, PowerMonitor, PwmChannel, SupervisorLink, Watchdog,
};
use crossbeam_channel::{Receiver, Sender};

use crate::controller::{Controller, TunableUpdate};
use crate::error::{ChargerError, Result};
use crate::persist;
use crate::protocol::{self, LineBuffer};

pub const TICK_MS: u64 = 1000;
pub const HEARTBEAT_MS: u64 = 30_000;
pub const FLUSH_MS: u64 = 300_000;
/// An iteration stuck longer than this is a fault; the loop aborts and the
/// hardware watchdog resets the device.
pub const MAX_ITERATION_MS: u64 = 15_000;
pub const HEARTBEAT_LINE: &str = "HEARTBEAT:ESP32 Online";

const IDLE_SLEEP: Duration = Duration::from_millis(10);
/// Upper bound on link bytes consumed per iteration, so a chattering peer
/// cannot starve the tick.
const MAX_LINK_BYTES_PER_ITERATION: usize = 256;

/// Requests bridged in from the HTTP endpoint. Replies go back over
/// bounded channels; the sender side never blocks the loop.
pub enum WebRequest {
    Data {
        reply: Sender<String>,
    },
    Update {
        update: TunableUpdate,
        reply: Sender<std::result::Result<(), String>>,
    },
    ToggleLoad {
        seconds: u64,
        reply: Sender<std::result::Result<u64, String>>,
    },
}

/// Drive the controller until `shutdown` is raised (or a fault).
#[allow(clippy::too_many_arguments)]
pub fn run<B, P, A, W, L, K, S, D>(
    controller: &mut Controller<B, P, A, W, L>,
    link: &mut K,
    kv: &mut S,
    watchdog: &mut D,
    web_rx: Option<&Receiver<WebRequest>>,
    shutdown: Option<&AtomicBool>,
) -> Result<()>
where
    B: PowerMonitor,
    P: PowerMonitor,
    A: AnalogInput,
    W: PwmChannel,
    L: LoadSwitch,
    K: SupervisorLink,
    S: KvStore,
    D: Watchdog,
{
    let clock = controller.clock();
    let mut line_buffer = LineBuffer::default();
    let mut last_tick_ms = 0u64;
    let mut last_flush_ms = 0u64;
    let mut last_link_write_ms = 0u64;

    loop {
        if shutdown.map(|s| s.load(Ordering::Relaxed)).unwrap_or(false) {
            let (ah, bulk_start) = controller.persisted_cycle();
            persist::store_cycle(kv, ah, bulk_start)?;
            tracing::info!("shutdown requested; cycle state persisted");
            return Ok(());
        }

        watchdog.feed();
        let iteration_start_ms = controller.now_ms();

        // 1) Supervisor link drain
        let mut consumed = 0usize;
        loop {
            if consumed >= MAX_LINK_BYTES_PER_ITERATION {
                break;
            }
            let byte = match link.read_byte() {
                Ok(Some(b)) => b,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "link read failed");
                    break;
                }
            };
            consumed += 1;
            if let Some(line) = line_buffer.push(byte) {
                let now_ms = controller.now_ms();
                let outcome = protocol::dispatch(controller, &line, now_ms);
                if let Some(key) = outcome.persist_key
                    && let Err(e) = persist::store_tunable_key(kv, controller.tunables(), key)
                {
                    tracing::error!(error = %e, key, "persisting accepted SET failed");
                }
                if let Err(e) = link.write_line(&outcome.response) {
                    tracing::warn!(error = %e, "link write failed");
                } else {
                    last_link_write_ms = now_ms;
                }
            }
        }

        // 2) Web mailbox drain
        if let Some(rx) = web_rx {
            for request in rx.try_iter() {
                let now_ms = controller.now_ms();
                match request {
                    WebRequest::Data { reply } => {
                        let _ = reply.send(controller.snapshot(now_ms).to_json());
                    }
                    WebRequest::Update { update, reply } => {
                        let outcome = controller.apply_update(&update);
                        if outcome.is_ok()
                            && let Err(e) = persist::store_tunables(kv, controller.tunables())
                        {
                            tracing::error!(error = %e, "persisting web update failed");
                        }
                        let _ = reply.send(outcome);
                    }
                    WebRequest::ToggleLoad { seconds, reply } => {
                        let outcome = controller
                            .toggle_load(now_ms, seconds)
                            .map_err(|e| e.to_string());
                        let _ = reply.send(outcome);
                    }
                }
            }
        }

        let now_ms = controller.now_ms();

        // 3) Panel sensor reachability recheck
        controller.maybe_recheck_panel(now_ms);

        // 4) Coulomb counter
        controller.update_coulomb(now_ms);

        // 5) Persistence flush (cadence or stage-change request)
        if controller.take_persist_request()
            || now_ms.saturating_sub(last_flush_ms) >= FLUSH_MS
        {
            let (ah, bulk_start) = controller.persisted_cycle();
            if let Err(e) = persist::store_cycle(kv, ah, bulk_start) {
                tracing::error!(error = %e, "cycle persistence failed");
            }
            last_flush_ms = now_ms;
        }

        // 6) Idle heartbeat
        if now_ms.saturating_sub(last_link_write_ms) >= HEARTBEAT_MS {
            if let Err(e) = link.write_line(HEARTBEAT_LINE) {
                tracing::warn!(error = %e, "heartbeat write failed");
            }
            last_link_write_ms = now_ms;
        }

        // 7) The 1 s tick
        if now_ms.saturating_sub(last_tick_ms) >= TICK_MS {
            controller.tick(now_ms)?;
            last_tick_ms = now_ms;
        }

        let iteration_ms = controller.now_ms().saturating_sub(iteration_start_ms);
        if iteration_ms > MAX_ITERATION_MS {
            tracing::error!(iteration_ms, "loop iteration overran; aborting for watchdog reset");
            return Err(eyre::Report::new(ChargerError::IterationOverrun(
                iteration_ms,
            )));
        }

        clock.sleep(IDLE_SLEEP);
    }
}
