//! Typed load/store of tunables and cycle state over the `KvStore` seam.

use charger_traits::KvStore;
use eyre::WrapErr;

use crate::controller::RestoredCycle;
use crate::error::{ChargerError, Result};
use crate::tunables::Tunables;

/// Keys in the `charger` namespace. Names are the wire contract with
/// pre-existing stores.
pub mod keys {
    pub const BATTERY_CAP: &str = "batteryCap";
    pub const THRESHOLD_PERC: &str = "thresholdPerc";
    pub const MAX_CURRENT: &str = "maxCurrent";
    pub const BULK_V: &str = "bulkV";
    pub const ABS_V: &str = "absV";
    pub const FLOAT_V: &str = "floatV";
    pub const IS_LITHIUM: &str = "isLithium";
    pub const USE_DC_SOURCE: &str = "useFuenteDC";
    pub const DC_SOURCE_AMPS: &str = "fuenteDC_Amps";
    pub const ACCUMULATED_AH: &str = "accumulatedAh";
    pub const BULK_START_TIME: &str = "bulkStartTime";
}

fn kv_err(e: Box<dyn std::error::Error + Send + Sync>) -> eyre::Report {
    eyre::Report::new(ChargerError::Persistence(e.to_string()))
}

/// Load tunables, falling back to defaults for missing keys. A stored set
/// that fails validation (corrupt or hand-edited) is discarded wholesale.
pub fn load_tunables(kv: &dyn KvStore) -> Tunables {
    let d = Tunables::default();
    let loaded = Tunables {
        battery_capacity_ah: kv.get_f32(keys::BATTERY_CAP).unwrap_or(d.battery_capacity_ah),
        threshold_percentage: kv
            .get_f32(keys::THRESHOLD_PERC)
            .unwrap_or(d.threshold_percentage),
        max_allowed_current_ma: kv
            .get_f32(keys::MAX_CURRENT)
            .unwrap_or(d.max_allowed_current_ma),
        bulk_voltage: kv.get_f32(keys::BULK_V).unwrap_or(d.bulk_voltage),
        absorption_voltage: kv.get_f32(keys::ABS_V).unwrap_or(d.absorption_voltage),
        float_voltage: kv.get_f32(keys::FLOAT_V).unwrap_or(d.float_voltage),
        is_lithium: kv.get_bool(keys::IS_LITHIUM).unwrap_or(d.is_lithium),
        use_dc_source: kv.get_bool(keys::USE_DC_SOURCE).unwrap_or(d.use_dc_source),
        dc_source_amps: kv.get_f32(keys::DC_SOURCE_AMPS).unwrap_or(d.dc_source_amps),
        factor_divider: d.factor_divider,
    };
    if loaded.validate().is_ok() {
        loaded
    } else {
        tracing::warn!("persisted tunables invalid; using defaults");
        Tunables::default()
    }
}

/// Write the whole tunable set and flush.
pub fn store_tunables(kv: &mut dyn KvStore, t: &Tunables) -> Result<()> {
    kv.put_f32(keys::BATTERY_CAP, t.battery_capacity_ah).map_err(kv_err)?;
    kv.put_f32(keys::THRESHOLD_PERC, t.threshold_percentage).map_err(kv_err)?;
    kv.put_f32(keys::MAX_CURRENT, t.max_allowed_current_ma).map_err(kv_err)?;
    kv.put_f32(keys::BULK_V, t.bulk_voltage).map_err(kv_err)?;
    kv.put_f32(keys::ABS_V, t.absorption_voltage).map_err(kv_err)?;
    kv.put_f32(keys::FLOAT_V, t.float_voltage).map_err(kv_err)?;
    kv.put_bool(keys::IS_LITHIUM, t.is_lithium).map_err(kv_err)?;
    kv.put_bool(keys::USE_DC_SOURCE, t.use_dc_source).map_err(kv_err)?;
    kv.put_f32(keys::DC_SOURCE_AMPS, t.dc_source_amps).map_err(kv_err)?;
    kv.flush().map_err(kv_err).wrap_err("flush tunables")
}

/// Write a single accepted `SET_` key and flush immediately.
pub fn store_tunable_key(kv: &mut dyn KvStore, t: &Tunables, key: &str) -> Result<()> {
    match key {
        keys::BATTERY_CAP => kv.put_f32(key, t.battery_capacity_ah),
        keys::THRESHOLD_PERC => kv.put_f32(key, t.threshold_percentage),
        keys::MAX_CURRENT => kv.put_f32(key, t.max_allowed_current_ma),
        keys::BULK_V => kv.put_f32(key, t.bulk_voltage),
        keys::ABS_V => kv.put_f32(key, t.absorption_voltage),
        keys::FLOAT_V => kv.put_f32(key, t.float_voltage),
        keys::IS_LITHIUM => kv.put_bool(key, t.is_lithium),
        keys::USE_DC_SOURCE => kv.put_bool(key, t.use_dc_source),
        keys::DC_SOURCE_AMPS => kv.put_f32(key, t.dc_source_amps),
        other => {
            return Err(eyre::Report::new(ChargerError::Persistence(format!(
                "unknown key {other}"
            ))));
        }
    }
    .map_err(kv_err)?;
    kv.flush().map_err(kv_err).wrap_err("flush tunable")
}

/// Best-effort cycle restore; sanitization happens in the builder.
pub fn load_restored_cycle(kv: &dyn KvStore) -> RestoredCycle {
    RestoredCycle {
        accumulated_ah: kv.get_f32(keys::ACCUMULATED_AH),
        bulk_start_ms: kv.get_u64(keys::BULK_START_TIME),
    }
}

/// Persist the cycle state (flush cadence and stage changes).
pub fn store_cycle(kv: &mut dyn KvStore, accumulated_ah: f32, bulk_start_ms: u64) -> Result<()> {
    kv.put_f32(keys::ACCUMULATED_AH, accumulated_ah).map_err(kv_err)?;
    kv.put_u64(keys::BULK_START_TIME, bulk_start_ms).map_err(kv_err)?;
    kv.flush().map_err(kv_err).wrap_err("flush cycle state")
}
