//! Safety supervisor behavior through the full controller.

mod common;

use charger_core::mocks::{
    SimLoadSwitch, SimPowerMonitor, SimPwm, SimThermistor,
};
use charger_core::tunables::ERROR_TICKLE_DUTY;
use charger_core::{
    ChargeState, ControllerParts, RestoredCycle, Tunables, build_controller, protocol,
};
use common::rig;
use rstest::rstest;

#[rstest]
fn overtemperature_confirms_at_two_second_cadence() {
    let mut rig = rig(12.8, 1000.0, 0.0, Tunables::default());
    rig.thermistor.set_celsius(95.0);

    // Confirmations land at t=1,3,5,7,9 s; the fifth trips the fault.
    rig.tick_n(8);
    assert_eq!(rig.controller.state(), ChargeState::Bulk);
    rig.tick();
    assert_eq!(rig.controller.state(), ChargeState::Error);
    assert!(!rig.controller.load_enabled());
    assert_eq!(rig.controller.duty(), ERROR_TICKLE_DUTY);
}

#[rstest]
fn single_normal_reading_resets_overvoltage_count() {
    let mut rig = rig(13.8, 1000.0, 0.0, Tunables::default());
    rig.set_battery_volts(15.2);
    rig.tick_n(4);
    assert_ne!(rig.controller.state(), ChargeState::Error);

    // One good reading wipes the streak; four more bad ones still don't trip.
    rig.set_battery_volts(13.8);
    rig.tick();
    rig.set_battery_volts(15.2);
    rig.tick_n(4);
    assert_ne!(rig.controller.state(), ChargeState::Error);
    rig.tick();
    assert_eq!(rig.controller.state(), ChargeState::Error);
}

#[rstest]
fn panel_current_loss_forces_duty_to_zero() {
    let mut rig = rig(12.3, 2000.0, 0.0, Tunables::default());
    rig.tick_n(5);
    assert_eq!(rig.controller.duty(), 5);

    // Panel dies; five spaced confirmations later the gate is forced shut
    // (the bulk law then restarts its climb from zero).
    rig.set_panel_ma(0.0);
    rig.tick_n(4);
    assert_eq!(rig.controller.duty(), 9);
    rig.tick();
    assert_eq!(rig.controller.duty(), 1);
    assert_eq!(rig.controller.state(), ChargeState::Bulk);
}

#[rstest]
fn lvd_and_lvr_hysteresis_through_ticks() {
    let mut rig = rig(12.8, 500.0, 200.0, Tunables::default());
    rig.tick();
    assert!(rig.controller.load_enabled());

    rig.set_battery_volts(11.9);
    rig.tick();
    assert!(!rig.controller.load_enabled());

    // Hysteresis band: stays off
    rig.set_battery_volts(12.3);
    rig.tick();
    assert!(!rig.controller.load_enabled());

    rig.set_battery_volts(12.6);
    rig.tick();
    assert!(rig.controller.load_enabled());
}

#[rstest]
fn load_off_expiry_requires_healthy_voltage_to_reconnect() {
    let mut rig = rig(12.8, 500.0, 0.0, Tunables::default());
    rig.tick();
    let now = rig.controller.now_ms();
    protocol::dispatch(&mut rig.controller, "CMD:TOGGLE_LOAD:10", now);
    assert!(!rig.controller.load_enabled());

    // Battery sags during the window; expiry must not reconnect.
    rig.set_battery_volts(12.3);
    rig.tick_n(11);
    assert!(!rig.controller.temporary_load_off());
    assert!(!rig.controller.load_enabled());
    assert!(rig.controller.note().contains("out of range"));
}

#[rstest]
fn load_off_expiry_reconnects_at_healthy_voltage() {
    let mut rig = rig(12.8, 500.0, 0.0, Tunables::default());
    rig.tick();
    let now = rig.controller.now_ms();
    protocol::dispatch(&mut rig.controller, "CMD:TOGGLE_LOAD:10", now);
    assert!(!rig.controller.load_enabled());

    rig.tick_n(11);
    assert!(!rig.controller.temporary_load_off());
    assert!(rig.controller.load_enabled());
}

#[rstest]
fn cancel_temp_off_reenables_subject_to_lvd() {
    let mut rig = rig(12.8, 500.0, 0.0, Tunables::default());
    rig.tick();
    let now = rig.controller.now_ms();
    protocol::dispatch(&mut rig.controller, "CMD:TOGGLE_LOAD:600", now);
    assert!(!rig.controller.load_enabled());

    let outcome = protocol::dispatch(&mut rig.controller, "CMD:CANCEL_TEMP_OFF", now);
    assert_eq!(outcome.response, "OK:Temporary load-off cancelled");
    assert!(rig.controller.load_enabled());
    assert!(!rig.controller.temporary_load_off());
}

#[rstest]
fn cancel_temp_off_keeps_load_off_below_lvd() {
    let mut rig = rig(12.8, 500.0, 0.0, Tunables::default());
    rig.tick();
    let now = rig.controller.now_ms();
    protocol::dispatch(&mut rig.controller, "CMD:TOGGLE_LOAD:600", now);

    rig.set_battery_volts(11.5);
    rig.tick();
    let now = rig.controller.now_ms();
    let outcome = protocol::dispatch(&mut rig.controller, "CMD:CANCEL_TEMP_OFF", now);
    assert!(outcome.response.starts_with("OK:"));
    assert!(!rig.controller.load_enabled());
}

#[rstest]
fn unsafe_boot_conditions_start_in_error() {
    let rig = rig(15.2, 0.0, 0.0, Tunables::default());
    assert_eq!(rig.controller.state(), ChargeState::Error);
    assert!(!rig.controller.load_enabled());
    assert_eq!(rig.controller.duty(), ERROR_TICKLE_DUTY);
}

#[rstest]
fn unreachable_battery_sensor_is_fatal() {
    let parts = ControllerParts {
        battery_monitor: SimPowerMonitor::unreachable(),
        panel_monitor: Some(SimPowerMonitor::new(0.0, 18.0)),
        thermistor: SimThermistor::default(),
        pwm: SimPwm::default(),
        load_switch: SimLoadSwitch::default(),
        solar_led: None,
        error_led: None,
    };
    let result = build_controller(
        parts,
        Tunables::default(),
        RestoredCycle::default(),
        None,
    );
    assert!(result.is_err());
}

#[rstest]
fn panel_sensor_recovers_after_reachability_recheck() {
    let clock = charger_core::mocks::SimClock::new();
    let battery = SimPowerMonitor::new(0.0, 12.8);
    let panel = SimPowerMonitor::unreachable();
    let parts = ControllerParts {
        battery_monitor: battery,
        panel_monitor: Some(panel.clone()),
        thermistor: SimThermistor::default(),
        pwm: SimPwm::default(),
        load_switch: SimLoadSwitch::default(),
        solar_led: None,
        error_led: None,
    };
    let mut controller = build_controller(
        parts,
        Tunables::default(),
        RestoredCycle::default(),
        Some(Box::new(clock.clone())),
    )
    .unwrap();
    assert!(!controller.panel_sensor_available());
    assert_eq!(controller.signals().panel_current_ma, 0.0);

    // Sensor comes back, but the recheck only runs on its 60 s cadence.
    panel.set_reachable(true);
    panel.set_current_ma(1500.0);
    clock.advance_ms(30_000);
    controller.maybe_recheck_panel(controller.now_ms());
    assert!(!controller.panel_sensor_available());

    clock.advance_ms(30_000);
    controller.maybe_recheck_panel(controller.now_ms());
    assert!(controller.panel_sensor_available());

    controller.tick(controller.now_ms()).unwrap();
    assert!(controller.signals().panel_current_ma > 1000.0);
}
