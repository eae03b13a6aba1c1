//! Persisted per-node configuration record (§4.3, §6).
//!
//! `NodeConfig` is the in-memory record; `ConfigStore` is the contract a
//! concrete key/value backend must satisfy. Tests exercise `ConfigStore`
//! against `InMemoryKv`; a deployed node would plug in a real flash-backed
//! key/value library behind the same `KvStore` trait without this crate
//! depending on one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub const NAMESPACE: &str = "lss_node";

pub const KEY_NODE_ID: &str = "node_id";
pub const KEY_NETWORK_ID: &str = "network_id";
pub const KEY_TX_INTERVAL: &str = "tx_interval";
pub const KEY_LOCATION: &str = "location";
pub const KEY_ZONE: &str = "zone";
pub const KEY_TEMP_HI: &str = "temp_hi";
pub const KEY_TEMP_LO: &str = "temp_lo";
pub const KEY_BATT_LO: &str = "batt_lo";
pub const KEY_BATT_CRIT: &str = "batt_crit";
pub const KEY_LORA_FREQ: &str = "lora_freq";
pub const KEY_LORA_SF: &str = "lora_sf";
pub const KEY_LORA_TXPWR: &str = "lora_txpwr";
pub const KEY_MESH_EN: &str = "mesh_en";
pub const KEY_TZ_OFFSET: &str = "tz_offset";
pub const KEY_TIME_SYNC: &str = "time_sync";

pub const MIN_TX_INTERVAL_MS: u32 = 1_000;
pub const MAX_TX_INTERVAL_MS: u32 = 3_600_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: u8,
    pub network_id: u16,
    pub tx_interval_ms: u32,
    pub location: String,
    pub zone: String,
    pub temp_hi: f32,
    pub temp_lo: f32,
    pub batt_lo: f32,
    pub batt_crit: f32,
    pub lora_freq_mhz: f32,
    pub lora_sf: u8,
    pub lora_tx_power_dbm: u8,
    pub mesh_enabled: bool,
    pub tz_offset_minutes: i32,
    pub last_time_sync_epoch: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            network_id: 1,
            tx_interval_ms: 30_000,
            location: "Unknown".to_string(),
            zone: "default".to_string(),
            temp_hi: 50.0,
            temp_lo: -20.0,
            batt_lo: 20.0,
            batt_crit: 10.0,
            lora_freq_mhz: 915.0,
            lora_sf: 10,
            lora_tx_power_dbm: 20,
            mesh_enabled: true,
            tz_offset_minutes: 0,
            last_time_sync_epoch: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("key/value store error: {0}")]
    Kv(String),
    #[error("stored value for key {0:?} could not be parsed")]
    Malformed(&'static str),
}

/// A namespaced key/value store. Individual key loss is tolerated by
/// `NodeConfig::load`/`save` (best effort per spec §4.3); this trait only
/// needs to report errors, not guarantee atomicity across keys.
pub trait KvStore {
    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>>;
    fn set(&mut self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), ConfigError>;
    fn remove(&mut self, namespace: &str, key: &str);
    fn clear_namespace(&mut self, namespace: &str);
    fn namespace_exists(&self, namespace: &str) -> bool;
}

/// In-memory `KvStore` fake used by tests and by the `lss-node` demo binary.
#[derive(Debug, Default)]
pub struct InMemoryKv {
    data: HashMap<(String, String), Vec<u8>>,
    namespaces: std::collections::HashSet<String>,
}

impl KvStore for InMemoryKv {
    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.data.get(&(namespace.to_string(), key.to_string())).cloned()
    }

    fn set(&mut self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), ConfigError> {
        self.namespaces.insert(namespace.to_string());
        self.data.insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    fn remove(&mut self, namespace: &str, key: &str) {
        self.data.remove(&(namespace.to_string(), key.to_string()));
    }

    fn clear_namespace(&mut self, namespace: &str) {
        self.data.retain(|(ns, _), _| ns != namespace);
        self.namespaces.remove(namespace);
    }

    fn namespace_exists(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace)
    }
}

fn get_str(kv: &impl KvStore, key: &str, default: &str) -> String {
    kv.get(NAMESPACE, key)
        .and_then(|b| String::from_utf8(b).ok())
        .unwrap_or_else(|| default.to_string())
}

fn get_u8(kv: &impl KvStore, key: &str, default: u8) -> u8 {
    kv.get(NAMESPACE, key)
        .and_then(|b| b.first().copied())
        .unwrap_or(default)
}

fn get_u16(kv: &impl KvStore, key: &str, default: u16) -> u16 {
    kv.get(NAMESPACE, key)
        .and_then(|b| b.try_into().ok())
        .map(u16::from_le_bytes)
        .unwrap_or(default)
}

fn get_u32(kv: &impl KvStore, key: &str, default: u32) -> u32 {
    kv.get(NAMESPACE, key)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .unwrap_or(default)
}

fn get_i32(kv: &impl KvStore, key: &str, default: i32) -> i32 {
    kv.get(NAMESPACE, key)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_le_bytes)
        .unwrap_or(default)
}

fn get_f32(kv: &impl KvStore, key: &str, default: f32) -> f32 {
    kv.get(NAMESPACE, key)
        .and_then(|b| b.try_into().ok())
        .map(f32::from_le_bytes)
        .unwrap_or(default)
}

fn get_bool(kv: &impl KvStore, key: &str, default: bool) -> bool {
    kv.get(NAMESPACE, key)
        .and_then(|b| b.first().copied())
        .map(|b| b != 0)
        .unwrap_or(default)
}

impl NodeConfig {
    /// Loads every field by key from `kv`. If the `lss_node` namespace is
    /// absent, defaults are written back and returned.
    pub fn load(kv: &mut impl KvStore) -> Result<Self, ConfigError> {
        if !kv.namespace_exists(NAMESPACE) {
            let defaults = Self::default();
            defaults.save(kv)?;
            return Ok(defaults);
        }

        let defaults = Self::default();
        Ok(Self {
            node_id: get_u8(kv, KEY_NODE_ID, defaults.node_id),
            network_id: get_u16(kv, KEY_NETWORK_ID, defaults.network_id),
            tx_interval_ms: get_u32(kv, KEY_TX_INTERVAL, defaults.tx_interval_ms),
            location: get_str(kv, KEY_LOCATION, &defaults.location),
            zone: get_str(kv, KEY_ZONE, &defaults.zone),
            temp_hi: get_f32(kv, KEY_TEMP_HI, defaults.temp_hi),
            temp_lo: get_f32(kv, KEY_TEMP_LO, defaults.temp_lo),
            batt_lo: get_f32(kv, KEY_BATT_LO, defaults.batt_lo),
            batt_crit: get_f32(kv, KEY_BATT_CRIT, defaults.batt_crit),
            lora_freq_mhz: get_f32(kv, KEY_LORA_FREQ, defaults.lora_freq_mhz),
            lora_sf: get_u8(kv, KEY_LORA_SF, defaults.lora_sf),
            lora_tx_power_dbm: get_u8(kv, KEY_LORA_TXPWR, defaults.lora_tx_power_dbm),
            mesh_enabled: get_bool(kv, KEY_MESH_EN, defaults.mesh_enabled),
            tz_offset_minutes: get_i32(kv, KEY_TZ_OFFSET, defaults.tz_offset_minutes),
            last_time_sync_epoch: get_u32(kv, KEY_TIME_SYNC, defaults.last_time_sync_epoch),
        })
    }

    /// Writes every field, one key at a time (best effort: a failure on one
    /// key does not roll back keys already written).
    pub fn save(&self, kv: &mut impl KvStore) -> Result<(), ConfigError> {
        kv.set(NAMESPACE, KEY_NODE_ID, vec![self.node_id])?;
        kv.set(NAMESPACE, KEY_NETWORK_ID, self.network_id.to_le_bytes().to_vec())?;
        kv.set(NAMESPACE, KEY_TX_INTERVAL, self.tx_interval_ms.to_le_bytes().to_vec())?;
        kv.set(NAMESPACE, KEY_LOCATION, self.location.as_bytes().to_vec())?;
        kv.set(NAMESPACE, KEY_ZONE, self.zone.as_bytes().to_vec())?;
        kv.set(NAMESPACE, KEY_TEMP_HI, self.temp_hi.to_le_bytes().to_vec())?;
        kv.set(NAMESPACE, KEY_TEMP_LO, self.temp_lo.to_le_bytes().to_vec())?;
        kv.set(NAMESPACE, KEY_BATT_LO, self.batt_lo.to_le_bytes().to_vec())?;
        kv.set(NAMESPACE, KEY_BATT_CRIT, self.batt_crit.to_le_bytes().to_vec())?;
        kv.set(NAMESPACE, KEY_LORA_FREQ, self.lora_freq_mhz.to_le_bytes().to_vec())?;
        kv.set(NAMESPACE, KEY_LORA_SF, vec![self.lora_sf])?;
        kv.set(NAMESPACE, KEY_LORA_TXPWR, vec![self.lora_tx_power_dbm])?;
        kv.set(NAMESPACE, KEY_MESH_EN, vec![self.mesh_enabled as u8])?;
        kv.set(
            NAMESPACE,
            KEY_TZ_OFFSET,
            self.tz_offset_minutes.to_le_bytes().to_vec(),
        )?;
        kv.set(
            NAMESPACE,
            KEY_TIME_SYNC,
            self.last_time_sync_epoch.to_le_bytes().to_vec(),
        )?;
        Ok(())
    }

    /// Clears the namespace and reloads (and re-persists) defaults.
    pub fn factory_reset(kv: &mut impl KvStore) -> Result<Self, ConfigError> {
        kv.clear_namespace(NAMESPACE);
        Self::load(kv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_on_empty_store_writes_and_returns_defaults() {
        let mut kv = InMemoryKv::default();
        let cfg = NodeConfig::load(&mut kv).unwrap();
        assert_eq!(cfg, NodeConfig::default());
        assert!(kv.namespace_exists(NAMESPACE));
    }

    #[test]
    fn save_then_load_round_trips() {
        let mut kv = InMemoryKv::default();
        let mut cfg = NodeConfig::load(&mut kv).unwrap();
        cfg.tx_interval_ms = 15_000;
        cfg.location = "Shed".to_string();
        cfg.save(&mut kv).unwrap();

        let reloaded = NodeConfig::load(&mut kv).unwrap();
        assert_eq!(reloaded.tx_interval_ms, 15_000);
        assert_eq!(reloaded.location, "Shed");
    }

    #[test]
    fn factory_reset_restores_defaults() {
        let mut kv = InMemoryKv::default();
        let mut cfg = NodeConfig::load(&mut kv).unwrap();
        cfg.tx_interval_ms = 60_000;
        cfg.save(&mut kv).unwrap();

        let reset = NodeConfig::factory_reset(&mut kv).unwrap();
        assert_eq!(reset, NodeConfig::default());
    }
}
