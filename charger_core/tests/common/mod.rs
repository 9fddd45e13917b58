#![allow(dead_code)]

use charger_core::mocks::{
    SimClock, SimLoadSwitch, SimPowerMonitor, SimPwm, SimThermistor,
};
use charger_core::{Controller, ControllerParts, RestoredCycle, Tunables, build_controller};

pub type TestController =
    Controller<SimPowerMonitor, SimPowerMonitor, SimThermistor, SimPwm, SimLoadSwitch>;

/// Simulated bench: the battery monitor carries the load current and the
/// battery voltage, the panel monitor carries the panel current.
pub struct TestRig {
    pub clock: SimClock,
    pub battery: SimPowerMonitor,
    pub panel: SimPowerMonitor,
    pub thermistor: SimThermistor,
    pub pwm: SimPwm,
    pub load: SimLoadSwitch,
    pub controller: TestController,
}

pub fn rig(battery_volts: f32, panel_ma: f32, load_ma: f32, tunables: Tunables) -> TestRig {
    rig_with_restored(
        battery_volts,
        panel_ma,
        load_ma,
        tunables,
        RestoredCycle::default(),
    )
}

pub fn rig_with_restored(
    battery_volts: f32,
    panel_ma: f32,
    load_ma: f32,
    tunables: Tunables,
    restored: RestoredCycle,
) -> TestRig {
    let clock = SimClock::new();
    let battery = SimPowerMonitor::new(load_ma, battery_volts);
    let panel = SimPowerMonitor::new(panel_ma, 18.0);
    let thermistor = SimThermistor::at_celsius(25.0);
    let pwm = SimPwm::default();
    let load = SimLoadSwitch::default();
    let parts = ControllerParts {
        battery_monitor: battery.clone(),
        panel_monitor: Some(panel.clone()),
        thermistor: thermistor.clone(),
        pwm: pwm.clone(),
        load_switch: load.clone(),
        solar_led: None,
        error_led: None,
    };
    let controller = build_controller(parts, tunables, restored, Some(Box::new(clock.clone())))
        .expect("controller build");
    TestRig {
        clock,
        battery,
        panel,
        thermistor,
        pwm,
        load,
        controller,
    }
}

impl TestRig {
    /// Advance one second of simulated time and run the tick.
    pub fn tick(&mut self) {
        self.clock.advance_ms(1000);
        let now = self.controller.now_ms();
        self.controller.tick(now).expect("tick");
    }

    pub fn tick_n(&mut self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }

    pub fn set_battery_volts(&self, volts: f32) {
        self.battery.set_voltage(volts);
    }

    pub fn set_panel_ma(&self, ma: f32) {
        self.panel.set_current_ma(ma);
    }

    pub fn set_load_ma(&self, ma: f32) {
        self.battery.set_current_ma(ma);
    }
}
