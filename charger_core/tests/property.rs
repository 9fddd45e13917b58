mod common;

use charger_core::coulomb::CoulombCounter;
use charger_core::pwm::DUTY_MAX;
use charger_core::soc::soc_from_voltage;
use charger_core::Tunables;
use common::rig;
use proptest::prelude::*;

prop_compose! {
    fn signal_trace()(
        steps in prop::collection::vec(
            (0.0f32..20_000.0, 0.0f32..10_000.0, 0.0f32..20.0),
            1..120,
        ),
    ) -> Vec<(f32, f32, f32)> {
        steps
    }
}

proptest! {
    /// The duty register never leaves [0, 255] and the raw write is always
    /// its inversion, for any sequence of signal readings.
    #[test]
    fn duty_stays_in_range_for_any_signals(trace in signal_trace()) {
        let mut rig = rig(12.5, 1000.0, 0.0, Tunables::default());
        for (panel_ma, load_ma, volts) in trace {
            rig.set_panel_ma(panel_ma);
            rig.set_load_ma(load_ma);
            rig.set_battery_volts(volts);
            rig.tick();
            let duty = rig.controller.duty();
            let raw = rig.pwm.last_raw().expect("raw written every tick");
            prop_assert_eq!(raw, DUTY_MAX - duty);
        }
    }

    /// Coulomb accumulation is rate-limited to 1C regardless of the
    /// reported currents and interval lengths.
    #[test]
    fn accumulated_ah_is_rate_bounded(
        capacity in 1.0f32..200.0,
        // Intervals above the 0.36 s accrual floor and below the 1 h
        // clock-jump guard, so every step integrates.
        steps in prop::collection::vec(
            (400u64..3_600_000, -50_000.0f32..50_000.0, 0.0f32..50_000.0),
            1..60,
        ),
    ) {
        let mut counter = CoulombCounter::new(capacity / 2.0);
        let mut now_ms = 1u64;
        counter.update(now_ms, 0.0, 0.0, capacity);
        for (dt_ms, panel_ma, load_ma) in steps {
            let before = counter.accumulated_ah();
            now_ms += dt_ms;
            counter.update(now_ms, panel_ma, load_ma, capacity);
            let dt_hours = dt_ms as f32 / 3.6e6;
            let bound = capacity * dt_hours + 1e-3;
            prop_assert!(
                (counter.accumulated_ah() - before).abs() <= bound,
                "delta {} exceeds 1C bound {}",
                (counter.accumulated_ah() - before).abs(),
                bound
            );
            prop_assert!(counter.accumulated_ah() >= 0.0);
            prop_assert!(counter.accumulated_ah() <= 1.1 * capacity + 1e-3);
        }
    }

    /// The SOC lookup is non-decreasing in voltage.
    #[test]
    fn soc_lut_is_monotone(a in 0.0f32..20.0, b in 0.0f32..20.0) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(soc_from_voltage(lo) <= soc_from_voltage(hi));
    }

    /// Sustained over-voltage always lands in Error with the load shed,
    /// within five 1 s confirmations.
    #[test]
    fn sustained_overvoltage_always_faults(volts in 15.0f32..20.0, prelude in 0usize..8) {
        let mut rig = rig(12.5, 1500.0, 0.0, Tunables::default());
        rig.tick_n(prelude);
        rig.set_battery_volts(volts);
        rig.tick_n(5);
        prop_assert_eq!(rig.controller.state(), charger_core::ChargeState::Error);
        prop_assert!(!rig.controller.load_enabled());
    }
}
