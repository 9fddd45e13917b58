#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core charge-control logic (hardware-agnostic).
//!
//! All hardware interactions go through the `charger_traits` seams; the
//! default backends live in `charger_hardware` and the test mocks in
//! [`mocks`].
//!
//! ## Architecture
//!
//! - **Signals**: averaged, validity-filtered sensor reads (`signals`)
//! - **Coulomb counter**: Ah integration and SOC reconciliation (`coulomb`)
//! - **Safety**: confirmed faults, LVD/LVR, load-off timer (`safety`)
//! - **Stages**: bulk/absorption/float/error laws and transitions
//!   (`machine`, `controller`)
//! - **Protocol**: supervisor-link framing and dispatch (`protocol`)
//! - **Runner**: the cooperative super-loop (`runner`)

pub mod confirm;
pub mod controller;
pub mod coulomb;
pub mod error;
pub mod machine;
pub mod mocks;
pub mod persist;
pub mod protocol;
pub mod pwm;
pub mod runner;
pub mod safety;
pub mod signals;
pub mod snapshot;
pub mod soc;
pub mod tunables;

pub use controller::{
    Controller, ControllerParts, CycleState, FIRMWARE_VERSION, RestoredCycle, TunableUpdate,
    build_controller,
};
pub use error::{BuildError, ChargerError, Result};
pub use machine::ChargeState;
pub use signals::Signals;
pub use snapshot::Snapshot;
pub use tunables::Tunables;
