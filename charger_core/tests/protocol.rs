//! Command protocol behavior against a live controller.

mod common;

use charger_core::persist::keys;
use charger_core::{Tunables, protocol};
use common::rig;
use rstest::rstest;
use serde_json::Value;

fn dispatch(rig: &mut common::TestRig, line: &str) -> protocol::Dispatched {
    let now = rig.controller.now_ms();
    protocol::dispatch(&mut rig.controller, line, now)
}

#[rstest]
fn get_data_returns_well_formed_snapshot() {
    let mut rig = rig(12.8, 1500.0, 300.0, Tunables::default());
    rig.tick();

    let outcome = dispatch(&mut rig, "CMD:GET_DATA");
    let json = outcome.response.strip_prefix("DATA:").expect("DATA: prefix");
    let value: Value = serde_json::from_str(json).expect("valid JSON");

    assert_eq!(value["chargeState"], "BULK_CHARGE");
    assert_eq!(value["batteryCapacity"], 50.0);
    assert_eq!(value["absorptionCurrentThreshold_mA"], 500.0);
    assert_eq!(value["currentLimitIntoFloatStage"], 100.0);
    assert_eq!(value["LVD"], 12.0);
    assert_eq!(value["LVR"], 12.5);
    assert_eq!(value["netCurrent"], 1200.0);
    assert_eq!(value["loadControlState"], "ON");
    assert_eq!(value["connected"], true);
    assert!(value["notaPersonalizada"].is_string());
}

#[rstest]
fn get_data_is_idempotent_except_uptime() {
    // Float at boot: no bulk-hours counter ticking between the two reads
    let mut rig = rig(13.0, 1500.0, 300.0, Tunables::default());
    rig.tick();

    let first = dispatch(&mut rig, "CMD:GET_DATA").response;
    rig.clock.advance_ms(3000);
    let second = dispatch(&mut rig, "CMD:GET_DATA").response;

    let mut a: Value = serde_json::from_str(first.strip_prefix("DATA:").unwrap()).unwrap();
    let mut b: Value = serde_json::from_str(second.strip_prefix("DATA:").unwrap()).unwrap();
    assert_ne!(a["uptime"], b["uptime"]);
    a["uptime"] = Value::Null;
    b["uptime"] = Value::Null;
    // No sample ran between the two reads, so everything else matches.
    // (loadOffRemainingSeconds is 0 with no timer armed.)
    assert_eq!(a, b);
}

#[rstest]
#[case("CMD:SET_bulkVoltage:14.2", "OK:bulkVoltage set to 14.2", Some(keys::BULK_V))]
#[case("CMD:SET_isLithium:true", "OK:isLithium set to true", Some(keys::IS_LITHIUM))]
#[case("CMD:SET_factorDivider:4", "OK:factorDivider set to 4", None)]
#[case(
    "CMD:SET_fuenteDC_Amps:12.5",
    "OK:fuenteDC_Amps set to 12.5",
    Some(keys::DC_SOURCE_AMPS)
)]
fn set_accepts_valid_parameters(
    #[case] line: &str,
    #[case] expected: &str,
    #[case] persist_key: Option<&'static str>,
) {
    let mut rig = rig(12.8, 1500.0, 300.0, Tunables::default());
    rig.tick();
    let outcome = dispatch(&mut rig, line);
    assert_eq!(outcome.response, expected);
    assert_eq!(outcome.persist_key, persist_key);
}

#[rstest]
#[case("CMD:SET_batteryCapacity:0")]
#[case("CMD:SET_batteryCapacity:1001")]
#[case("CMD:SET_thresholdPercentage:0.05")]
#[case("CMD:SET_maxAllowedCurrent:500")]
#[case("CMD:SET_maxAllowedCurrent:20000")]
#[case("CMD:SET_bulkVoltage:15.5")]
#[case("CMD:SET_bulkVoltage:abc")]
#[case("CMD:SET_fuenteDC_Amps:99")]
#[case("CMD:SET_factorDivider:0")]
#[case("CMD:SET_isLithium:maybe")]
fn set_rejects_out_of_range_values(#[case] line: &str) {
    let mut rig = rig(12.8, 1500.0, 300.0, Tunables::default());
    rig.tick();
    let before = rig.controller.tunables().clone();
    let outcome = dispatch(&mut rig, line);
    assert!(
        outcome.response.starts_with("ERROR:Invalid value"),
        "got {}",
        outcome.response
    );
    assert_eq!(outcome.persist_key, None);
    assert_eq!(rig.controller.tunables(), &before);
}

#[rstest]
fn set_enforces_stage_voltage_ordering() {
    let mut rig = rig(12.8, 1500.0, 300.0, Tunables::default());
    rig.tick();
    // float (default 13.6) may not rise above absorption (14.4)
    let outcome = dispatch(&mut rig, "CMD:SET_floatVoltage:14.8");
    assert!(outcome.response.starts_with("ERROR:"));

    let outcome = dispatch(&mut rig, "CMD:SET_floatVoltage:13.8");
    assert!(outcome.response.starts_with("OK:"));
}

#[rstest]
fn unknown_parameter_and_unknown_command_are_rejected() {
    let mut rig = rig(12.8, 1500.0, 300.0, Tunables::default());
    rig.tick();
    let outcome = dispatch(&mut rig, "CMD:SET_LVD:11.5");
    assert_eq!(outcome.response, "ERROR:Unknown parameter LVD");

    let outcome = dispatch(&mut rig, "CMD:REBOOT");
    assert!(outcome.response.starts_with("ERROR:Unknown command"));

    let outcome = dispatch(&mut rig, "garbage");
    assert_eq!(outcome.response, "ERROR:Expected CMD: prefix");
}

#[rstest]
fn capacity_change_preserves_stored_energy() {
    // Boot at 12.8 V: restored SOC is 60 % of 50 Ah = 30 Ah
    let mut rig = rig(12.8, 1500.0, 300.0, Tunables::default());
    rig.tick();
    let before = rig.controller.accumulated_ah();
    assert!((before - 30.0).abs() < 0.5, "unexpected boot Ah {before}");

    let outcome = dispatch(&mut rig, "CMD:SET_batteryCapacity:100");
    assert!(outcome.response.starts_with("OK:"));
    assert_eq!(rig.controller.accumulated_ah(), before);

    // Shrinking the bank clamps to the new 110 % ceiling
    let outcome = dispatch(&mut rig, "CMD:SET_batteryCapacity:20");
    assert!(outcome.response.starts_with("OK:"));
    assert!(rig.controller.accumulated_ah() <= 22.0 + f32::EPSILON);
}

#[rstest]
fn toggle_load_always_refreshes_the_window() {
    let mut rig = rig(12.8, 1500.0, 0.0, Tunables::default());
    rig.tick();
    let outcome = dispatch(&mut rig, "CMD:TOGGLE_LOAD:100");
    assert_eq!(outcome.response, "OK:Load off for 100 seconds");
    assert!(!rig.controller.load_enabled());

    // Re-issue while already off: the window restarts
    rig.tick_n(50);
    let outcome = dispatch(&mut rig, "CMD:TOGGLE_LOAD:100");
    assert!(outcome.response.starts_with("OK:"));
    let snapshot = rig.controller.snapshot(rig.controller.now_ms());
    assert!(snapshot.load_off_remaining_seconds >= 99);
}
