use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub mod secrets;

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    // Canonicalize (stable key order) by round-tripping through serde_json::to_string,
    // which orders keys deterministically for maps (BTreeMap) only if we ensure sorting.
    // So we implement a manual canonicalization step that sorts object keys.
    let canonical = canonicalize_json(&merged);

    // Hash canonical bytes
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

impl LoadedConfig {
    /// Deserialize the merged config into `T`. Unknown top-level keys are
    /// not an error here — see [`unused_top_level_keys`] for the warning
    /// path operators should wire into startup logging.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.config_json.clone()).context("config deserialization failed")
    }
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
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

/// Canonicalize JSON by sorting all object keys recursively and emitting compact JSON.
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
// SchedulerConfig — tunables for the store, populator, and loop
// ---------------------------------------------------------------------------

/// Deploy-time tuning for the scheduler loop, the store, and the populator.
/// Loaded via [`load_layered_yaml`] + [`LoadedConfig::deserialize`]; every
/// field carries a sane default so a bare `{}` config is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// `claim_due`'s grace window on top of `now`. Seconds.
    pub grace_window_secs: i64,
    /// Change-notify "near horizon" filter. Seconds.
    pub near_horizon_secs: i64,
    /// Maximum wait absent any notification. Seconds.
    pub safety_timeout_secs: i64,
    /// Lead time subtracted from a computed wait so we don't oversleep past
    /// the target. Seconds.
    pub small_lead_secs: i64,
    /// Max rows claimed per DISPATCH iteration.
    pub batch_limit: i64,
    /// Per-call database timeout. Seconds.
    pub db_call_timeout_secs: u64,
    /// Retry cap before a row is dead-lettered. Count.
    pub max_row_retries: u32,
    /// Hard-coded fallback reminder offsets, minutes before start.
    pub default_reminder_offsets: Vec<i64>,
    /// Fallback game duration when a game has none set. Minutes.
    pub default_game_duration_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            grace_window_secs: 60,
            near_horizon_secs: 600,
            safety_timeout_secs: 300,
            small_lead_secs: 10,
            batch_limit: 50,
            db_call_timeout_secs: 5,
            max_row_retries: 5,
            default_reminder_offsets: vec![60, 15],
            default_game_duration_minutes: 120,
        }
    }
}

/// Report keys present in `config_json` that `SchedulerConfig` does not
/// recognize, so operators are warned about typos instead of silently
/// ignored settings.
pub fn unused_top_level_keys(config_json: &Value) -> Vec<String> {
    const KNOWN: &[&str] = &[
        "grace_window_secs",
        "near_horizon_secs",
        "safety_timeout_secs",
        "small_lead_secs",
        "batch_limit",
        "db_call_timeout_secs",
        "max_row_retries",
        "default_reminder_offsets",
        "default_game_duration_minutes",
        "secrets",
    ];

    let Some(obj) = config_json.as_object() else {
        return Vec::new();
    };

    obj.keys()
        .filter(|k| !KNOWN.contains(&k.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn later_file_overrides_earlier_scalar() {
        let base = write_temp_yaml("batch_limit: 10\nmax_row_retries: 5\n");
        let override_file = write_temp_yaml("batch_limit: 99\n");

        let loaded = load_layered_yaml(&[
            base.path().to_str().unwrap(),
            override_file.path().to_str().unwrap(),
        ])
        .unwrap();

        assert_eq!(loaded.config_json["batch_limit"], 99);
        assert_eq!(loaded.config_json["max_row_retries"], 5);
    }

    #[test]
    fn config_hash_is_stable_for_equivalent_key_order() {
        let a = write_temp_yaml("batch_limit: 10\nmax_row_retries: 5\n");
        let b = write_temp_yaml("max_row_retries: 5\nbatch_limit: 10\n");

        let loaded_a = load_layered_yaml(&[a.path().to_str().unwrap()]).unwrap();
        let loaded_b = load_layered_yaml(&[b.path().to_str().unwrap()]).unwrap();

        assert_eq!(loaded_a.config_hash, loaded_b.config_hash);
    }

    #[test]
    fn default_scheduler_config_matches_documented_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.grace_window_secs, 60);
        assert_eq!(cfg.near_horizon_secs, 600);
        assert_eq!(cfg.safety_timeout_secs, 300);
        assert_eq!(cfg.small_lead_secs, 10);
        assert_eq!(cfg.default_reminder_offsets, vec![60, 15]);
    }

    #[test]
    fn deserialize_fills_missing_fields_with_defaults() {
        let f = write_temp_yaml("batch_limit: 7\n");
        let loaded = load_layered_yaml(&[f.path().to_str().unwrap()]).unwrap();
        let cfg: SchedulerConfig = loaded.deserialize().unwrap();
        assert_eq!(cfg.batch_limit, 7);
        assert_eq!(cfg.safety_timeout_secs, 300);
    }

    #[test]
    fn unused_top_level_keys_flags_typos() {
        let f = write_temp_yaml("batch_limit: 7\nbatc_limit: 8\n");
        let loaded = load_layered_yaml(&[f.path().to_str().unwrap()]).unwrap();
        let unused = unused_top_level_keys(&loaded.config_json);
        assert_eq!(unused, vec!["batc_limit".to_string()]);
    }
}
