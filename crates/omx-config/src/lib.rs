//! Layered configuration.
//!
//! YAML files load and deep-merge in order (later files override earlier),
//! the merged document canonicalizes (sorted keys, compact JSON) and
//! hashes, and the result deserializes into the typed [`OmxConfig`]. The
//! hash is logged at startup so an operator can tie a running process to
//! an exact configuration.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: OmxConfig,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Load + merge YAML files in order, then canonicalize, hash and type.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    let config: OmxConfig =
        serde_json::from_value(merged).context("config does not match the omx schema")?;

    Ok(LoadedConfig {
        config,
        canonical_json: canonical,
        config_hash: hash,
    })
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars
/// overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting
/// compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

// ---------------------------------------------------------------------------
// Typed config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OmxConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub state_machine: StateMachineConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub deadline: DeadlineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// `worker.count`: command worker pool size.
    pub count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { count: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutboxConfig {
    /// `outbox.publisher.count`.
    pub publisher_count: usize,
    /// `outbox.poll.interval` in milliseconds.
    pub poll_interval_ms: u64,
    /// `outbox.backoff.initial` in milliseconds.
    pub backoff_initial_ms: u64,
    /// `outbox.backoff.max` in milliseconds.
    pub backoff_max_ms: u64,
    /// Rows claimed per publisher round.
    pub batch_size: i64,
    /// Producer ack budget per message, in milliseconds.
    pub ack_timeout_ms: u64,
    /// Quarantine a poisoned row after this many attempts (0 disables).
    pub quarantine_after: i32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            publisher_count: 1,
            poll_interval_ms: 250,
            backoff_initial_ms: 100,
            backoff_max_ms: 30_000,
            batch_size: 100,
            ack_timeout_ms: 5_000,
            quarantine_after: 10,
        }
    }
}

impl OutboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    /// `validation.max_order_qty`.
    pub max_order_qty: Decimal,
    /// `validation.equity.round_lot` (default 100).
    pub equity_round_lot: u32,
    /// FX minimum notional floor.
    pub fx_min_notional: Decimal,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_order_qty: Decimal::from(1_000_000),
            equity_round_lot: 100,
            fx_min_notional: Decimal::from(1_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateMachineConfig {
    /// `state_machine.variant`: "standard" or "simplified".
    pub variant: String,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            variant: "standard".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbConfig {
    /// `db.connection.pool.size`.
    pub pool_size: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { pool_size: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeadlineConfig {
    /// `deadline.default` in milliseconds; applied when a command carries
    /// no deadline of its own. 0 means none.
    pub default_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self { default_ms: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Conflict-retry attempts per command (first try included).
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 25,
            max_backoff_ms: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_yaml(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn defaults_apply_for_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_yaml(&dir, "base.yaml", "{}");
        let loaded = load_layered_yaml(&[&base]).unwrap();
        assert_eq!(loaded.config.worker.count, 4);
        assert_eq!(loaded.config.outbox.publisher_count, 1);
        assert_eq!(loaded.config.state_machine.variant, "standard");
        assert_eq!(loaded.config.validation.equity_round_lot, 100);
    }

    #[test]
    fn later_files_override_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_yaml(
            &dir,
            "base.yaml",
            "worker:\n  count: 4\noutbox:\n  publisher_count: 1\n  poll_interval_ms: 250\n  backoff_initial_ms: 100\n  backoff_max_ms: 30000\n  batch_size: 100\n  ack_timeout_ms: 5000\n  quarantine_after: 10\n",
        );
        let env = write_yaml(&dir, "prod.yaml", "worker:\n  count: 16\n");
        let loaded = load_layered_yaml(&[&base, &env]).unwrap();
        assert_eq!(loaded.config.worker.count, 16);
        // Non-overridden keys survive the merge.
        assert_eq!(loaded.config.outbox.publisher_count, 1);
    }

    #[test]
    fn hash_is_stable_under_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_yaml(&dir, "a.yaml", "worker:\n  count: 8\ndb:\n  pool_size: 5\n");
        let b = write_yaml(&dir, "b.yaml", "db:\n  pool_size: 5\nworker:\n  count: 8\n");
        let ha = load_layered_yaml(&[&a]).unwrap().config_hash;
        let hb = load_layered_yaml(&[&b]).unwrap().config_hash;
        assert_eq!(ha, hb);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write_yaml(&dir, "bad.yaml", "workerz:\n  count: 8\n");
        assert!(load_layered_yaml(&[&bad]).is_err());
    }

    #[test]
    fn durations_convert() {
        let cfg = OutboxConfig::default();
        assert_eq!(cfg.poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.backoff_max(), Duration::from_secs(30));
    }
}
